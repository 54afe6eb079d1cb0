//! Remote collaborators of the launch engine: endpoint resolution, the
//! deployment validation gate and the connectivity monitor.

pub mod client;
pub mod connectivity;
pub mod retry;
pub mod validation;

pub use client::{normalize_locale, ClientIdentity, EndpointResolver, HttpEndpointResolver};
pub use connectivity::{always_online, ProbeMonitor};
pub use retry::{AttemptError, RetryPolicy};
pub use validation::{HttpValidationGate, ValidationGate};
