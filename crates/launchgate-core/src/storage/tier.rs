//! Storage tier abstraction.
//!
//! A tier is a flat string-to-string map. [`PersistentKeyValueStore`] layers a
//! namespace, a read cache and the primary/backup fallback on top of tiers.
//!
//! [`PersistentKeyValueStore`]: super::PersistentKeyValueStore

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;

/// One durable layer of key/value storage.
///
/// Implementations must tolerate concurrent callers; last writer wins per key.
pub trait StorageTier: Send + Sync {
    /// Short label used in log lines ("sqlite", "keyring", "memory").
    fn name(&self) -> &str;

    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local tier backed by a shared map.
///
/// Clones share the same map, so a test can keep a handle and wipe it to
/// simulate eviction of that tier.
#[derive(Debug, Clone, Default)]
pub struct MemoryTier {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry.
    pub fn wipe(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}
