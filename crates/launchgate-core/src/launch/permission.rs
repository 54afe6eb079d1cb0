//! Notification permission state and the authorization seam.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{PersistentKeyValueStore, StoreKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    NotAsked,
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            PermissionStatus::NotAsked => 0,
            PermissionStatus::Granted => 1,
            PermissionStatus::Denied => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => PermissionStatus::Granted,
            2 => PermissionStatus::Denied,
            _ => PermissionStatus::NotAsked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub status: PermissionStatus,
    pub last_asked: Option<DateTime<Utc>>,
}

impl Default for PermissionState {
    fn default() -> Self {
        Self {
            status: PermissionStatus::NotAsked,
            last_asked: None,
        }
    }
}

impl PermissionState {
    pub fn new(status: PermissionStatus, last_asked: DateTime<Utc>) -> Self {
        Self {
            status,
            last_asked: Some(last_asked),
        }
    }

    /// True only while undecided and outside the cooldown window.
    pub fn can_ask(&self, now: DateTime<Utc>, cooldown_days: i64) -> bool {
        if self.status != PermissionStatus::NotAsked {
            return false;
        }
        match self.last_asked {
            None => true,
            Some(at) => now - at >= Duration::days(cooldown_days),
        }
    }

    pub fn load(store: &PersistentKeyValueStore) -> Self {
        Self {
            status: store
                .load_i64(StoreKey::PermissionStatus)
                .map(PermissionStatus::from_i64)
                .unwrap_or(PermissionStatus::NotAsked),
            last_asked: store.load_timestamp(StoreKey::PermissionAskedAt),
        }
    }

    pub fn persist(&self, store: &PersistentKeyValueStore) {
        store.save_i64(StoreKey::PermissionStatus, self.status.as_i64());
        match self.last_asked {
            Some(at) => store.save_timestamp(StoreKey::PermissionAskedAt, at),
            None => store.remove(StoreKey::PermissionAskedAt),
        }
    }
}

/// OS-level notification authorization, modelled as one async request.
#[async_trait]
pub trait PermissionAuthorizer: Send + Sync {
    /// Returns whether the user granted authorization.
    async fn request_authorization(&self) -> bool;
}

/// Authorizer that answers with a fixed decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedAuthorizer(pub bool);

#[async_trait]
impl PermissionAuthorizer for FixedAuthorizer {
    async fn request_authorization(&self) -> bool {
        self.0
    }
}
