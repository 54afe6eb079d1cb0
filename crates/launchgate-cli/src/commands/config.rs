use clap::Subcommand;
use launchgate_core::LaunchSettings;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a settings value
    Get {
        /// Dot-separated key (e.g. "timing.deadline", "network.endpoint_url")
        key: String,
    },
    /// Set a settings value
    Set {
        /// Dot-separated key
        key: String,
        /// New value
        value: String,
    },
    /// List all settings
    List,
    /// Reset settings to defaults
    Reset,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let settings = LaunchSettings::load_or_default();
            match settings.get(&key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("unknown key: {key}");
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut settings = LaunchSettings::load_or_default();
            settings.set(&key, &value)?;
            settings.save()?;
            println!("ok");
        }
        ConfigAction::List => {
            let settings = LaunchSettings::load_or_default();
            let json = serde_json::to_string_pretty(&settings)?;
            println!("{json}");
        }
        ConfigAction::Reset => {
            LaunchSettings::default().save()?;
            println!("settings reset to defaults");
        }
    }
    Ok(())
}
