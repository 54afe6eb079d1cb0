//! # Launchgate Core Library
//!
//! Decides, once per process start, whether an application opens its
//! remotely resolved primary destination or falls back to the local flow.
//!
//! ## Architecture
//!
//! - **Storage**: key-value persistence over a SQLite primary tier with a
//!   keyring backup for critical keys, plus TOML settings
//! - **Launch**: signal fusion, the orchestrator state machine and the
//!   notification payload router
//! - **Resolve**: HTTP endpoint resolution with retry, the validation gate
//!   and connectivity monitoring
//!
//! ## Key Components
//!
//! - [`LaunchOrchestrator`]: single-writer launch state machine
//! - [`PersistentKeyValueStore`]: cached two-tier key-value store
//! - [`HttpEndpointResolver`]: attribution and endpoint lookups
//! - [`LaunchSettings`]: application configuration

pub mod error;
pub mod launch;
pub mod resolve;
pub mod storage;

pub use error::{ConfigError, CoreError, ResolveError, StoreError};
pub use launch::{
    AttributionSignal, FixedAuthorizer, FlowState, LaunchDeps, LaunchHandle, LaunchOrchestrator,
    LaunchOutputs, NavigationSignal, PermissionAuthorizer, Phase, Route,
};
pub use resolve::{
    always_online, EndpointResolver, HttpEndpointResolver, HttpValidationGate, ProbeMonitor,
    ValidationGate,
};
pub use storage::{LaunchSettings, PersistentKeyValueStore, SqliteTier, StoreKey};
