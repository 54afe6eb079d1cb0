pub mod config;
pub mod device_id;
pub mod run;
pub mod store;

use launchgate_core::storage::KeyringTier;
use launchgate_core::{PersistentKeyValueStore, SqliteTier};

/// The on-disk store with its keyring backup, or a throwaway in-memory one.
pub fn open_store(memory: bool) -> Result<PersistentKeyValueStore, Box<dyn std::error::Error>> {
    if memory {
        return Ok(PersistentKeyValueStore::in_memory());
    }
    let primary = SqliteTier::open()?;
    Ok(PersistentKeyValueStore::new(
        Box::new(primary),
        Some(Box::new(KeyringTier::new())),
    ))
}
