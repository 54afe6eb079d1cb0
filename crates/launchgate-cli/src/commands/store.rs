use clap::Subcommand;
use launchgate_core::StoreKey;
use serde_json::{Map, Value};

use super::open_store;

#[derive(Subcommand)]
pub enum StoreAction {
    /// Print a persisted value
    Get {
        /// Store key (e.g. "endpoint", "operation_mode")
        key: String,
    },
    /// Persist a value
    Set {
        /// Store key
        key: String,
        /// New value
        value: String,
    },
    /// Delete a persisted value
    Remove {
        /// Store key
        key: String,
    },
    /// Print every persisted value as JSON
    Show,
}

pub fn run(action: StoreAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(false)?;
    match action {
        StoreAction::Get { key } => {
            let key: StoreKey = key.parse()?;
            match store.load(key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("not set: {key}");
                    std::process::exit(1);
                }
            }
        }
        StoreAction::Set { key, value } => {
            let key: StoreKey = key.parse()?;
            store.save(key, &value);
            println!("ok");
        }
        StoreAction::Remove { key } => {
            let key: StoreKey = key.parse()?;
            store.remove(key);
            println!("removed {key}");
        }
        StoreAction::Show => {
            let entries: Map<String, Value> = store
                .snapshot()
                .into_iter()
                .map(|(key, value)| (key.to_string(), Value::String(value)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}
