//! OS keyring backup tier.
//!
//! Critical keys are mirrored here so they survive loss of the primary
//! database file.

use super::tier::StorageTier;
use crate::error::StoreError;

const SERVICE: &str = "launchgate";

/// Thin wrapper around the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringTier {
    service: String,
}

impl Default for KeyringTier {
    fn default() -> Self {
        Self {
            service: SERVICE.to_string(),
        }
    }
}

impl KeyringTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom keyring service name (separate dev/prod entries).
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        Ok(keyring::Entry::new(&self.service, key)?)
    }
}

impl StorageTier for KeyringTier {
    fn name(&self) -> &str {
        "keyring"
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
