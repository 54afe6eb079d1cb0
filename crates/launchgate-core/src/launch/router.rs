//! Notification payload router.
//!
//! Pulls a destination out of push payloads of varying shape, records it as
//! the temporary endpoint, and re-broadcasts it after a short delay so the
//! UI is mounted before it reacts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::storage::{PersistentKeyValueStore, StoreKey};

const DESTINATION_KEY: &str = "url";

/// First non-empty destination among the supported payload shapes:
/// `url`, `data.url`, `aps.data.url`, `custom.target`.
pub fn extract_destination(payload: &Value) -> Option<String> {
    let candidates = [
        payload.get(DESTINATION_KEY),
        payload.get("data").and_then(|d| d.get(DESTINATION_KEY)),
        payload
            .get("aps")
            .and_then(|a| a.get("data"))
            .and_then(|d| d.get(DESTINATION_KEY)),
        payload.get("custom").and_then(|c| c.get("target")),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct NotificationPayloadRouter {
    store: Arc<PersistentKeyValueStore>,
    delay: Duration,
    tx: broadcast::Sender<String>,
}

impl NotificationPayloadRouter {
    pub fn new(store: Arc<PersistentKeyValueStore>, delay: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { store, delay, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Returns the extracted destination; `None` means the payload was ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn route(&self, payload: &Value) -> Option<String> {
        let Some(destination) = extract_destination(payload) else {
            debug!("notification payload carries no destination");
            return None;
        };

        self.store.save(StoreKey::TempEndpoint, &destination);
        self.store.save_timestamp(StoreKey::TempEndpointAt, Utc::now());
        info!("temporary endpoint recorded from notification");

        let tx = self.tx.clone();
        let delay = self.delay;
        let announced = destination.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // no subscribers is fine
            let _ = tx.send(announced);
        });
        Some(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::{timeout, Instant};

    #[test]
    fn extracts_each_supported_shape() {
        assert_eq!(
            extract_destination(&json!({"url": "https://a.example"})).as_deref(),
            Some("https://a.example")
        );
        assert_eq!(
            extract_destination(&json!({"data": {"url": "https://b.example"}})).as_deref(),
            Some("https://b.example")
        );
        assert_eq!(
            extract_destination(&json!({"aps": {"data": {"url": "https://c.example"}}})).as_deref(),
            Some("https://c.example")
        );
        assert_eq!(
            extract_destination(&json!({"custom": {"target": "https://d.example"}})).as_deref(),
            Some("https://d.example")
        );
    }

    #[test]
    fn top_level_wins_over_nested() {
        let payload = json!({
            "custom": {"target": "https://d.example"},
            "data": {"url": "https://b.example"},
            "url": "https://a.example"
        });
        assert_eq!(extract_destination(&payload).as_deref(), Some("https://a.example"));
    }

    #[test]
    fn empty_or_non_string_values_are_skipped() {
        let payload = json!({"url": "", "data": {"url": 5}, "custom": {"target": "https://d.example"}});
        assert_eq!(extract_destination(&payload).as_deref(), Some("https://d.example"));
        assert_eq!(extract_destination(&json!({"aps": {"alert": "hi"}})), None);
        assert_eq!(extract_destination(&json!("https://bare.example")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn route_persists_then_broadcasts_after_delay() {
        let store = Arc::new(PersistentKeyValueStore::in_memory());
        let router = NotificationPayloadRouter::new(store.clone(), Duration::from_millis(2500));
        let mut rx = router.subscribe();
        let started = Instant::now();

        let routed = router.route(&json!({"data": {"url": "https://b.example"}}));
        assert_eq!(routed.as_deref(), Some("https://b.example"));
        assert_eq!(store.load(StoreKey::TempEndpoint).as_deref(), Some("https://b.example"));
        assert!(store.load_timestamp(StoreKey::TempEndpointAt).is_some());

        assert!(timeout(Duration::from_millis(2400), rx.recv()).await.is_err());
        assert_eq!(rx.recv().await.unwrap(), "https://b.example");
        assert!(started.elapsed() >= Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_payload_is_a_no_op() {
        let store = Arc::new(PersistentKeyValueStore::in_memory());
        let router = NotificationPayloadRouter::new(store.clone(), Duration::from_millis(2500));
        let mut rx = router.subscribe();
        assert_eq!(router.route(&json!({"aps": {"badge": 1}})), None);
        assert_eq!(store.load(StoreKey::TempEndpoint), None);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
