//! Namespaced key/value store with a read cache and two-tier fallback.
//!
//! Reads consult the in-process cache, then the primary tier, then the backup
//! tier. Writes go to the primary tier; critical keys are mirrored into the
//! backup tier as well. Tier failures are logged and treated as "absent" so
//! storage can never abort a launch.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::codec;
use super::tier::{MemoryTier, StorageTier};

const NAMESPACE: &str = "launchgate";

/// Every key the launch engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Latest attribution mapping (JSON text).
    AttributionData,
    /// Latest deep-link mapping (encoded JSON text).
    DeepLinkData,
    /// Resolved destination endpoint.
    Endpoint,
    /// Operation mode recorded alongside the endpoint ("Active").
    OperationMode,
    /// False once an endpoint has been durably saved.
    FirstLaunch,
    /// Permission status as an integer enum.
    PermissionStatus,
    /// Last time the permission prompt was resolved (epoch millis).
    PermissionAskedAt,
    /// Destination extracted from a notification payload.
    TempEndpoint,
    TempEndpointAt,
    /// Stable per-install identifier sent to the attribution service.
    DeviceId,
    /// Push token registered by the host layer.
    PushToken,
    /// Guard read by the fusion buffer before accepting navigation data.
    FusionCompleted,
}

impl StoreKey {
    pub const ALL: [StoreKey; 12] = [
        StoreKey::AttributionData,
        StoreKey::DeepLinkData,
        StoreKey::Endpoint,
        StoreKey::OperationMode,
        StoreKey::FirstLaunch,
        StoreKey::PermissionStatus,
        StoreKey::PermissionAskedAt,
        StoreKey::TempEndpoint,
        StoreKey::TempEndpointAt,
        StoreKey::DeviceId,
        StoreKey::PushToken,
        StoreKey::FusionCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::AttributionData => "attribution_data",
            StoreKey::DeepLinkData => "deep_link_data",
            StoreKey::Endpoint => "endpoint",
            StoreKey::OperationMode => "operation_mode",
            StoreKey::FirstLaunch => "first_launch",
            StoreKey::PermissionStatus => "permission_status",
            StoreKey::PermissionAskedAt => "permission_asked_at",
            StoreKey::TempEndpoint => "temp_endpoint",
            StoreKey::TempEndpointAt => "temp_endpoint_at",
            StoreKey::DeviceId => "device_id",
            StoreKey::PushToken => "push_token",
            StoreKey::FusionCompleted => "fusion_completed",
        }
    }

    /// Critical keys are mirrored into the backup tier.
    pub fn is_critical(&self) -> bool {
        matches!(self, StoreKey::Endpoint | StoreKey::OperationMode)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown store key: {s}"))
    }
}

/// Durable launch state shared by the orchestrator, the fusion buffer and the
/// notification router.
pub struct PersistentKeyValueStore {
    namespace: String,
    cache: RwLock<HashMap<StoreKey, String>>,
    primary: Box<dyn StorageTier>,
    backup: Option<Box<dyn StorageTier>>,
}

impl PersistentKeyValueStore {
    pub fn new(primary: Box<dyn StorageTier>, backup: Option<Box<dyn StorageTier>>) -> Self {
        Self {
            namespace: NAMESPACE.to_string(),
            cache: RwLock::new(HashMap::new()),
            primary,
            backup,
        }
    }

    /// Store with fresh in-memory primary and backup tiers.
    pub fn in_memory() -> Self {
        Self::new(
            Box::new(MemoryTier::new()),
            Some(Box::new(MemoryTier::new())),
        )
    }

    fn qualified(&self, key: StoreKey) -> String {
        format!("{}.{}", self.namespace, key.as_str())
    }

    pub fn save(&self, key: StoreKey, value: &str) {
        let qualified = self.qualified(key);
        if let Err(e) = self.primary.write(&qualified, value) {
            warn!(key = %key, tier = self.primary.name(), error = %e, "primary write failed");
        }
        if key.is_critical() {
            if let Some(backup) = &self.backup {
                if let Err(e) = backup.write(&qualified, value) {
                    warn!(key = %key, tier = backup.name(), error = %e, "backup write failed");
                }
            }
        }
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, value.to_string());
        }
    }

    pub fn load(&self, key: StoreKey) -> Option<String> {
        if let Some(hit) = self.cache.read().ok().and_then(|c| c.get(&key).cloned()) {
            return Some(hit);
        }

        let qualified = self.qualified(key);
        let mut value = read_tier(self.primary.as_ref(), &qualified, key);

        if value.is_none() && key.is_critical() {
            if let Some(backup) = &self.backup {
                value = read_tier(backup.as_ref(), &qualified, key);
                if let Some(v) = &value {
                    debug!(key = %key, "restored from backup tier");
                    if let Err(e) = self.primary.write(&qualified, v) {
                        warn!(key = %key, error = %e, "failed to heal primary tier");
                    }
                }
            }
        }

        if let Some(v) = &value {
            if let Ok(mut cache) = self.cache.write() {
                cache.insert(key, v.clone());
            }
        }
        value
    }

    pub fn remove(&self, key: StoreKey) {
        let qualified = self.qualified(key);
        if let Err(e) = self.primary.remove(&qualified) {
            warn!(key = %key, error = %e, "primary remove failed");
        }
        if key.is_critical() {
            if let Some(backup) = &self.backup {
                if let Err(e) = backup.remove(&qualified) {
                    warn!(key = %key, error = %e, "backup remove failed");
                }
            }
        }
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&key);
        }
    }

    /// Forget cached reads so the next `load` goes back to the tiers.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    // ── Typed helpers ────────────────────────────────────────────────

    pub fn save_bool(&self, key: StoreKey, value: bool) {
        self.save(key, if value { "true" } else { "false" });
    }

    pub fn load_bool(&self, key: StoreKey) -> Option<bool> {
        self.load(key).and_then(|v| v.parse().ok())
    }

    pub fn save_i64(&self, key: StoreKey, value: i64) {
        self.save(key, &value.to_string());
    }

    pub fn load_i64(&self, key: StoreKey) -> Option<i64> {
        self.load(key).and_then(|v| v.parse().ok())
    }

    pub fn save_timestamp(&self, key: StoreKey, at: DateTime<Utc>) {
        self.save_i64(key, at.timestamp_millis());
    }

    pub fn load_timestamp(&self, key: StoreKey) -> Option<DateTime<Utc>> {
        let millis = self.load_i64(key)?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn save_json(&self, key: StoreKey, map: &Map<String, Value>) {
        match serde_json::to_string(map) {
            Ok(text) => self.save(key, &text),
            Err(e) => warn!(key = %key, error = %e, "failed to serialize mapping"),
        }
    }

    pub fn load_json(&self, key: StoreKey) -> Option<Map<String, Value>> {
        let text = self.load(key)?;
        parse_object(&text, key)
    }

    /// Like [`save_json`](Self::save_json) but stored through the text-safe codec.
    pub fn save_encoded_json(&self, key: StoreKey, map: &Map<String, Value>) {
        match serde_json::to_string(map) {
            Ok(text) => self.save(key, &codec::encode(&text)),
            Err(e) => warn!(key = %key, error = %e, "failed to serialize mapping"),
        }
    }

    pub fn load_encoded_json(&self, key: StoreKey) -> Option<Map<String, Value>> {
        let encoded = self.load(key)?;
        let Some(text) = codec::decode(&encoded) else {
            warn!(key = %key, "stored value is not decodable");
            return None;
        };
        parse_object(&text, key)
    }

    /// Stable per-install identifier, created on first use.
    pub fn device_id(&self) -> String {
        if let Some(id) = self.load(StoreKey::DeviceId).filter(|id| !id.is_empty()) {
            return id;
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.save(StoreKey::DeviceId, &id);
        id
    }

    /// Every key that currently resolves to a value.
    pub fn snapshot(&self) -> Vec<(StoreKey, String)> {
        StoreKey::ALL
            .iter()
            .filter_map(|k| self.load(*k).map(|v| (*k, v)))
            .collect()
    }
}

fn read_tier(tier: &dyn StorageTier, qualified: &str, key: StoreKey) -> Option<String> {
    match tier.read(qualified) {
        Ok(v) => v,
        Err(e) => {
            warn!(key = %key, tier = tier.name(), error = %e, "read failed, treating as absent");
            None
        }
    }
}

fn parse_object(text: &str, key: StoreKey) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!(key = %key, "stored value is not a JSON object");
            None
        }
        Err(e) => {
            warn!(key = %key, error = %e, "stored value is not valid JSON");
            None
        }
    }
}
