//! Launch decision flow: signal fusion, notification routing, permission
//! handling and the orchestrator that ties them together.

pub mod fusion;
pub mod orchestrator;
pub mod permission;
pub mod router;
pub mod signal;
pub mod state;

pub use fusion::{FusionOutput, SignalFusionBuffer};
pub use orchestrator::{LaunchDeps, LaunchHandle, LaunchOrchestrator};
pub use permission::{FixedAuthorizer, PermissionAuthorizer, PermissionState, PermissionStatus};
pub use router::{extract_destination, NotificationPayloadRouter};
pub use signal::{fuse, AttributionSignal, NavigationSignal};
pub use state::{FlowState, LaunchConfig, LaunchOutputs, Phase, Route, MODE_ACTIVE};
