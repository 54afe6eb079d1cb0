mod config;
pub mod codec;
pub mod database;
pub mod backup;
pub mod kv;
pub mod tier;

pub use config::{LaunchSettings, NetworkSettings, PermissionSettings, TimingSettings};
pub use database::SqliteTier;
pub use backup::KeyringTier;
pub use kv::{PersistentKeyValueStore, StoreKey};
pub use tier::{MemoryTier, StorageTier};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/launchgate[-dev]/` based on LAUNCHGATE_ENV.
///
/// Set LAUNCHGATE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("LAUNCHGATE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("launchgate-dev")
    } else {
        base_dir.join("launchgate")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::LoadFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}
