//! Endpoint-resolution client.
//!
//! Two outbound calls:
//! - attribution lookup by device id (GET, single attempt)
//! - destination endpoint resolution from attribution data (POST, retried)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use super::retry::{AttemptError, RetryPolicy};
use crate::error::ResolveError;
use crate::storage::{LaunchSettings, PersistentKeyValueStore, StoreKey};

/// Outbound resolution calls used by the orchestrator.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Look up attribution data for this install.
    async fn resolve_attribution(&self, device_id: &str)
        -> Result<Map<String, Value>, ResolveError>;

    /// Resolve attribution data to a destination endpoint.
    async fn resolve_endpoint(
        &self,
        attribution: &Map<String, Value>,
    ) -> Result<String, ResolveError>;
}

/// Client metadata attached to every endpoint request.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub dev_key: String,
    pub app_id: String,
    pub bundle_id: String,
    pub project_id: String,
    pub platform: String,
    pub locale: String,
}

impl ClientIdentity {
    pub fn from_settings(settings: &LaunchSettings) -> Self {
        let network = &settings.network;
        let raw_locale = network
            .locale
            .clone()
            .or_else(|| std::env::var("LANG").ok())
            .unwrap_or_default();
        Self {
            dev_key: network.dev_key.clone(),
            app_id: network.app_id.clone(),
            bundle_id: network.bundle_id.clone(),
            project_id: network.project_id.clone(),
            platform: network.platform.clone(),
            locale: normalize_locale(&raw_locale),
        }
    }
}

/// Language subtag only, lowercase: `en_US.UTF-8` -> `en`. Falls back to `en`.
pub fn normalize_locale(raw: &str) -> String {
    let language = raw
        .split(['_', '-', '.', '@'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if language.is_empty() || language == "c" || language == "posix" {
        "en".to_string()
    } else {
        language
    }
}

/// reqwest-backed [`EndpointResolver`].
pub struct HttpEndpointResolver {
    client: Client,
    attribution_url: String,
    endpoint_url: String,
    identity: ClientIdentity,
    retry: RetryPolicy,
    store: Arc<PersistentKeyValueStore>,
}

impl HttpEndpointResolver {
    /// Build from launch settings.
    ///
    /// # Errors
    /// Returns `InvalidUrl` if the HTTP client cannot be constructed.
    pub fn new(
        settings: &LaunchSettings,
        store: Arc<PersistentKeyValueStore>,
    ) -> Result<Self, ResolveError> {
        let timing = &settings.timing;
        Ok(Self {
            client: build_client(timing.request_timeout(), timing.resource_timeout())?,
            attribution_url: settings.network.attribution_url.clone(),
            endpoint_url: settings.network.endpoint_url.clone(),
            identity: ClientIdentity::from_settings(settings),
            retry: RetryPolicy::new(timing.retry_delays()),
            store,
        })
    }

    fn attribution_request_url(&self, device_id: &str) -> Result<Url, ResolveError> {
        let base = self.attribution_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/id{}", base, self.identity.app_id))?;
        url.query_pairs_mut()
            .append_pair("devkey", &self.identity.dev_key)
            .append_pair("device_id", device_id);
        Ok(url)
    }

    /// Attribution data plus client metadata, as POSTed to the endpoint service.
    pub fn endpoint_request_body(&self, attribution: &Map<String, Value>) -> Map<String, Value> {
        let mut body = attribution.clone();
        let identity = &self.identity;
        body.insert("os".into(), Value::String(identity.platform.clone()));
        body.insert("af_id".into(), Value::String(self.store.device_id()));
        body.insert("bundle_id".into(), Value::String(identity.bundle_id.clone()));
        body.insert("firebase_project_id".into(), Value::String(identity.project_id.clone()));
        if let Some(token) = self.store.load(StoreKey::PushToken) {
            body.insert("push_token".into(), Value::String(token));
        }
        body.insert("locale".into(), Value::String(identity.locale.clone()));
        body
    }

    async fn post_once(&self, url: &Url, body: &Map<String, Value>) -> Result<String, AttemptError> {
        let resp = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.into()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Throttled);
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(ResolveError::Server {
                status: status.as_u16(),
            }));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| AttemptError::Transient(e.into()))?;
        parse_endpoint_response(&text).map_err(AttemptError::Fatal)
    }
}

fn build_client(request_timeout: Duration, resource_timeout: Duration) -> Result<Client, ResolveError> {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    let mut builder = Client::builder().default_headers(headers);
    if !request_timeout.is_zero() {
        builder = builder.connect_timeout(request_timeout);
    }
    if !resource_timeout.is_zero() {
        builder = builder.timeout(resource_timeout);
    }
    builder
        .build()
        .map_err(|e| ResolveError::InvalidUrl(e.to_string()))
}

/// Expect `{"ok": bool, "url": string}` with `ok == true`.
pub fn parse_endpoint_response(text: &str) -> Result<String, ResolveError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ResolveError::Decoding(e.to_string()))?;
    let ok = value
        .get("ok")
        .and_then(Value::as_bool)
        .ok_or_else(|| ResolveError::Decoding("missing boolean 'ok'".into()))?;
    let url = value
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| ResolveError::Decoding("missing string 'url'".into()))?;
    if !ok {
        return Err(ResolveError::Decoding("service answered ok=false".into()));
    }
    Ok(url.to_string())
}

#[async_trait]
impl EndpointResolver for HttpEndpointResolver {
    async fn resolve_attribution(
        &self,
        device_id: &str,
    ) -> Result<Map<String, Value>, ResolveError> {
        let url = self.attribution_request_url(device_id)?;
        debug!(host = url.host_str().unwrap_or_default(), "requesting attribution data");

        let resp = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ResolveError::Server {
                status: status.as_u16(),
            });
        }

        let text = resp.text().await?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ResolveError::Decoding("attribution body is not an object".into())),
            Err(e) => Err(ResolveError::Decoding(e.to_string())),
        }
    }

    async fn resolve_endpoint(
        &self,
        attribution: &Map<String, Value>,
    ) -> Result<String, ResolveError> {
        let url = Url::parse(&self.endpoint_url)?;
        let body = self.endpoint_request_body(attribution);

        let endpoint = self.retry.run(|_| self.post_once(&url, &body)).await?;
        info!("endpoint resolved");
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn settings(server_url: &str) -> LaunchSettings {
        let mut settings = LaunchSettings::default();
        settings.network.attribution_url = format!("{server_url}/install_data");
        settings.network.endpoint_url = format!("{server_url}/resolve");
        settings.network.dev_key = "DK".into();
        settings.network.app_id = "123".into();
        settings.network.bundle_id = "com.example.app".into();
        settings.network.project_id = "proj-1".into();
        settings.network.locale = Some("de_DE.UTF-8".into());
        settings.timing.retry_delays = vec![0.01, 0.02, 0.04];
        settings
    }

    fn resolver(server_url: &str) -> (HttpEndpointResolver, Arc<PersistentKeyValueStore>) {
        let store = Arc::new(PersistentKeyValueStore::in_memory());
        let resolver = HttpEndpointResolver::new(&settings(server_url), store.clone()).unwrap();
        (resolver, store)
    }

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn locale_keeps_language_only() {
        assert_eq!(normalize_locale("en_US.UTF-8"), "en");
        assert_eq!(normalize_locale("pt-BR"), "pt");
        assert_eq!(normalize_locale("DE"), "de");
        assert_eq!(normalize_locale(""), "en");
        assert_eq!(normalize_locale("C.UTF-8"), "en");
    }

    #[test]
    fn endpoint_response_requires_ok_and_url() {
        assert_eq!(
            parse_endpoint_response(r#"{"ok": true, "url": "https://dest.example"}"#),
            Ok("https://dest.example".to_string())
        );
        assert!(matches!(
            parse_endpoint_response(r#"{"ok": "yes", "url": "https://dest.example"}"#),
            Err(ResolveError::Decoding(_))
        ));
        assert!(matches!(
            parse_endpoint_response(r#"{"ok": true}"#),
            Err(ResolveError::Decoding(_))
        ));
        assert!(matches!(
            parse_endpoint_response(r#"{"ok": false, "url": ""}"#),
            Err(ResolveError::Decoding(_))
        ));
        assert!(matches!(parse_endpoint_response("<html>"), Err(ResolveError::Decoding(_))));
    }

    #[test]
    fn request_body_carries_client_metadata() {
        let (resolver, store) = resolver("http://127.0.0.1:9");
        store.save(StoreKey::PushToken, "push-abc");
        let body = resolver.endpoint_request_body(&map(json!({"af_status": "Organic"})));
        assert_eq!(body["af_status"], "Organic");
        assert_eq!(body["os"], "iOS");
        assert_eq!(body["af_id"], Value::String(store.device_id()));
        assert_eq!(body["bundle_id"], "com.example.app");
        assert_eq!(body["firebase_project_id"], "proj-1");
        assert_eq!(body["push_token"], "push-abc");
        assert_eq!(body["locale"], "de");
    }

    #[tokio::test]
    async fn resolve_attribution_sends_dev_key_and_device_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex("^/install_data/id123".into()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("devkey".into(), "DK".into()),
                Matcher::UrlEncoded("device_id".into(), "dev-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"af_status": "Non-organic", "campaign": "spring"}"#)
            .create_async()
            .await;

        let (resolver, _) = resolver(&server.url());
        let data = resolver.resolve_attribution("dev-1").await.unwrap();
        assert_eq!(data["campaign"], "spring");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn resolve_attribution_rejects_non_object_and_errors() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", Matcher::Regex("^/install_data/id123".into()))
            .with_status(200)
            .with_body("[1, 2]")
            .create_async()
            .await;
        let (list_resolver, _) = resolver(&server.url());
        assert!(matches!(
            list_resolver.resolve_attribution("dev-1").await,
            Err(ResolveError::Decoding(_))
        ));

        let mut server = mockito::Server::new_async().await;
        let _fail = server
            .mock("GET", Matcher::Regex("^/install_data/id123".into()))
            .with_status(403)
            .expect(1)
            .create_async()
            .await;
        let (forbidden_resolver, _) = resolver(&server.url());
        assert_eq!(
            forbidden_resolver.resolve_attribution("dev-1").await,
            Err(ResolveError::Server { status: 403 })
        );
    }

    #[tokio::test]
    async fn resolve_endpoint_posts_augmented_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/resolve")
            .match_body(Matcher::PartialJson(json!({
                "campaign": "spring",
                "os": "iOS",
                "bundle_id": "com.example.app",
                "locale": "de"
            })))
            .with_status(200)
            .with_body(r#"{"ok": true, "url": "https://dest.example/home"}"#)
            .expect(1)
            .create_async()
            .await;

        let (resolver, _) = resolver(&server.url());
        let endpoint = resolver
            .resolve_endpoint(&map(json!({"campaign": "spring"})))
            .await
            .unwrap();
        assert_eq!(endpoint, "https://dest.example/home");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/resolve")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let (resolver, _) = resolver(&server.url());
        let result = resolver.resolve_endpoint(&Map::new()).await;
        assert_eq!(result, Err(ResolveError::Server { status: 500 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn throttling_uses_every_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/resolve")
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let (resolver, _) = resolver(&server.url());
        let result = resolver.resolve_endpoint(&Map::new()).await;
        assert_eq!(result, Err(ResolveError::Server { status: 429 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_success_body_is_decoding_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/resolve")
            .with_status(200)
            .with_body(r#"{"url": "https://dest.example"}"#)
            .expect(1)
            .create_async()
            .await;

        let (resolver, _) = resolver(&server.url());
        assert!(matches!(
            resolver.resolve_endpoint(&Map::new()).await,
            Err(ResolveError::Decoding(_))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_surfaces_transport_error() {
        let (resolver, _) = resolver("http://127.0.0.1:9");
        let result = resolver.resolve_endpoint(&Map::new()).await;
        assert!(matches!(result, Err(ResolveError::Transport(_))));
    }

    #[tokio::test]
    async fn invalid_endpoint_url_is_reported() {
        let store = Arc::new(PersistentKeyValueStore::in_memory());
        let mut settings = settings("http://127.0.0.1:9");
        settings.network.endpoint_url = "not a url".into();
        let resolver = HttpEndpointResolver::new(&settings, store).unwrap();
        assert!(matches!(
            resolver.resolve_endpoint(&Map::new()).await,
            Err(ResolveError::InvalidUrl(_))
        ));
    }
}
