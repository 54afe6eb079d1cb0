//! TOML-based launch settings.
//!
//! Stores:
//! - Remote service locations and client identity sent with every request
//! - Launch timing (deadline, debounce, retry schedule, network timeouts)
//! - Permission prompt cooldown
//!
//! Settings are stored at `~/.config/launchgate/settings.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;

/// Remote services and client metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Attribution lookup base; the app id is appended as a path segment.
    #[serde(default = "default_attribution_url")]
    pub attribution_url: String,
    /// Endpoint-resolution service (POST).
    #[serde(default)]
    pub endpoint_url: String,
    /// Well-known record consulted by the validation gate (GET).
    #[serde(default)]
    pub validation_url: String,
    #[serde(default)]
    pub dev_key: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub bundle_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Locale override; the process locale is used when absent.
    #[serde(default)]
    pub locale: Option<String>,
    /// host:port probed by the CLI connectivity monitor.
    #[serde(default = "default_connectivity_probe")]
    pub connectivity_probe: String,
}

/// Launch timing, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_deadline")]
    pub deadline: f64,
    #[serde(default = "default_debounce")]
    pub debounce: f64,
    #[serde(default = "default_organic_delay")]
    pub organic_delay: f64,
    #[serde(default = "default_router_delay")]
    pub router_delay: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
    #[serde(default = "default_resource_timeout")]
    pub resource_timeout: f64,
    #[serde(default = "default_retry_delays")]
    pub retry_delays: Vec<f64>,
    #[serde(default = "default_probe_interval")]
    pub probe_interval: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSettings {
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: i64,
}

/// Launch settings.
///
/// Serialized to/from TOML at `~/.config/launchgate/settings.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchSettings {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub permission: PermissionSettings,
}

fn default_attribution_url() -> String {
    "https://gcdsdk.appsflyer.com/install_data/v4.0".into()
}
fn default_platform() -> String {
    "iOS".into()
}
fn default_connectivity_probe() -> String {
    "1.1.1.1:443".into()
}
fn default_deadline() -> f64 {
    30.0
}
fn default_debounce() -> f64 {
    2.5
}
fn default_organic_delay() -> f64 {
    5.0
}
fn default_router_delay() -> f64 {
    2.5
}
fn default_request_timeout() -> f64 {
    30.0
}
fn default_resource_timeout() -> f64 {
    90.0
}
fn default_retry_delays() -> Vec<f64> {
    vec![3.5, 7.0, 14.0]
}
fn default_probe_interval() -> f64 {
    5.0
}
fn default_cooldown_days() -> i64 {
    3
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            attribution_url: default_attribution_url(),
            endpoint_url: String::new(),
            validation_url: String::new(),
            dev_key: String::new(),
            app_id: String::new(),
            bundle_id: String::new(),
            project_id: String::new(),
            platform: default_platform(),
            locale: None,
            connectivity_probe: default_connectivity_probe(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            deadline: default_deadline(),
            debounce: default_debounce(),
            organic_delay: default_organic_delay(),
            router_delay: default_router_delay(),
            request_timeout: default_request_timeout(),
            resource_timeout: default_resource_timeout(),
            retry_delays: default_retry_delays(),
            probe_interval: default_probe_interval(),
        }
    }
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            cooldown_days: default_cooldown_days(),
        }
    }
}

/// Seconds to `Duration`, clamping negatives and NaN to zero.
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

impl TimingSettings {
    pub fn deadline(&self) -> Duration {
        secs(self.deadline)
    }

    pub fn debounce(&self) -> Duration {
        secs(self.debounce)
    }

    pub fn organic_delay(&self) -> Duration {
        secs(self.organic_delay)
    }

    pub fn router_delay(&self) -> Duration {
        secs(self.router_delay)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout)
    }

    pub fn resource_timeout(&self) -> Duration {
        secs(self.resource_timeout)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays.iter().copied().map(secs).collect()
    }

    pub fn probe_interval(&self) -> Duration {
        secs(self.probe_interval)
    }
}

impl LaunchSettings {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let (parent_path, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(unknown());
        }

        let parent = match parent_path {
            Some(path) => {
                let mut current = &mut *root;
                for part in path.split('.') {
                    current = current.get_mut(part).ok_or_else(unknown)?;
                }
                current
            }
            None => root,
        };
        let obj = parent.as_object_mut().ok_or_else(unknown)?;
        let existing = obj.get(leaf).ok_or_else(unknown)?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(_) => {
                if let Ok(n) = value.parse::<i64>() {
                    serde_json::Value::Number(n.into())
                } else {
                    let n = value
                        .parse::<f64>()
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                    serde_json::Number::from_f64(n)
                        .map(serde_json::Value::Number)
                        .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                }
            }
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
            }
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("settings.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file exists but cannot be parsed,
    /// or if the default settings cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults there when missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let settings = Self::default();
                settings.save_to(path)?;
                Ok(settings)
            }
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a settings value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Update a value in memory by dot-separated key. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
