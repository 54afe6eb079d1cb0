//! Deployment validation gate.
//!
//! One remote read of a well-known record per launch. The deployment may
//! proceed only when the record holds a non-empty absolute URL.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::ResolveError;
use crate::storage::LaunchSettings;

#[async_trait]
pub trait ValidationGate: Send + Sync {
    /// `Ok(false)` for an absent or unusable record; transport failures are `Err`.
    async fn validate(&self) -> Result<bool, ResolveError>;
}

pub struct HttpValidationGate {
    client: Client,
    record_url: String,
}

impl HttpValidationGate {
    pub fn new(settings: &LaunchSettings) -> Result<Self, ResolveError> {
        let mut builder = Client::builder();
        let timeout = settings.timing.request_timeout();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ResolveError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client,
            record_url: settings.network.validation_url.clone(),
        })
    }
}

/// Whether a record body holds a usable absolute reference.
///
/// Accepts a JSON string, or raw text when the body is not JSON.
pub fn record_allows_launch(body: &str) -> bool {
    let candidate = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(_) => return false,
        Err(_) => body.to_string(),
    };
    let candidate = candidate.trim();
    !candidate.is_empty() && Url::parse(candidate).is_ok()
}

#[async_trait]
impl ValidationGate for HttpValidationGate {
    async fn validate(&self) -> Result<bool, ResolveError> {
        let url = Url::parse(&self.record_url)?;
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!("validation record absent");
            return Ok(false);
        }
        if !status.is_success() {
            return Err(ResolveError::Server {
                status: status.as_u16(),
            });
        }

        let body = resp.text().await?;
        let allowed = record_allows_launch(&body);
        debug!(allowed, "validation record read");
        Ok(allowed)
    }
}
