//! Launch state machine types and the outputs published to the host layer.
//!
//! ```text
//! Initial -> Preparing -> Checking -> Verified -> Running(endpoint)
//!                 \            \           \
//!                  +------------+-----------+--> Waiting
//! (any non-terminal phase) <-> Disconnected
//! ```

use serde::{Deserialize, Serialize};

use crate::storage::{PersistentKeyValueStore, StoreKey};

/// Operation mode stored next to a successfully resolved endpoint.
pub const MODE_ACTIVE: &str = "Active";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "endpoint", rename_all = "snake_case")]
pub enum Phase {
    Initial,
    Preparing,
    Checking,
    Verified,
    Running(String),
    Waiting,
    Disconnected,
}

impl Phase {
    /// Running and Waiting end the routing decision.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Running(_) | Phase::Waiting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    pub phase: Phase,
    /// Set together with `is_ready` on entering Running, never cleared.
    pub endpoint: Option<String>,
    pub is_ready: bool,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            phase: Phase::Initial,
            endpoint: None,
            is_ready: false,
        }
    }
}

/// Boot-time view of what earlier launches persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub is_first_launch: bool,
    pub saved_endpoint: Option<String>,
    pub operation_mode: Option<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            is_first_launch: true,
            saved_endpoint: None,
            operation_mode: None,
        }
    }
}

impl LaunchConfig {
    pub fn load(store: &PersistentKeyValueStore) -> Self {
        Self {
            is_first_launch: store.load_bool(StoreKey::FirstLaunch).unwrap_or(true),
            saved_endpoint: store.load(StoreKey::Endpoint).filter(|e| !e.is_empty()),
            operation_mode: store.load(StoreKey::OperationMode),
        }
    }

    /// Saved endpoint usable for an immediate warm start.
    pub fn warm_endpoint(&self) -> Option<&str> {
        match (&self.saved_endpoint, self.operation_mode.as_deref()) {
            (Some(endpoint), Some(MODE_ACTIVE)) => Some(endpoint),
            _ => None,
        }
    }
}

/// Everything the presentation layer observes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOutputs {
    pub show_permission_prompt: bool,
    pub show_offline: bool,
    pub navigate_to_primary: bool,
    pub navigate_to_fallback: bool,
    pub flow: FlowState,
}

/// Final routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    Primary { endpoint: String },
    Fallback,
}

impl LaunchOutputs {
    pub fn route(&self) -> Option<Route> {
        if self.navigate_to_primary {
            let endpoint = self.flow.endpoint.clone().unwrap_or_default();
            Some(Route::Primary { endpoint })
        } else if self.navigate_to_fallback {
            Some(Route::Fallback)
        } else {
            None
        }
    }
}
