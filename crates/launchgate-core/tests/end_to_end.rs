//! End-to-end launch against mock HTTP services.
//!
//! Uses real time with shortened timing so reqwest and mockito behave
//! normally.

use std::sync::Arc;

use launchgate_core::launch::MODE_ACTIVE;
use launchgate_core::{
    always_online, FixedAuthorizer, HttpEndpointResolver, HttpValidationGate, LaunchDeps,
    LaunchHandle, LaunchOrchestrator, LaunchSettings, PersistentKeyValueStore, Route, StoreKey,
};
use mockito::Matcher;
use serde_json::json;

fn settings(server_url: &str) -> LaunchSettings {
    let mut settings = LaunchSettings::default();
    settings.network.endpoint_url = format!("{server_url}/resolve");
    settings.network.validation_url = format!("{server_url}/gate.json");
    settings.network.bundle_id = "com.example.app".into();
    settings.timing.deadline = 10.0;
    settings.timing.debounce = 0.05;
    settings.timing.retry_delays = vec![0.05, 0.1, 0.2];
    settings
}

fn start(settings: &LaunchSettings, store: Arc<PersistentKeyValueStore>) -> LaunchHandle {
    let deps = LaunchDeps {
        store: store.clone(),
        resolver: Arc::new(HttpEndpointResolver::new(settings, store).unwrap()),
        gate: Arc::new(HttpValidationGate::new(settings).unwrap()),
        authorizer: Arc::new(FixedAuthorizer(true)),
        connectivity: always_online(),
    };
    LaunchOrchestrator::start(deps, settings)
}

#[tokio::test]
async fn launch_resolves_and_persists_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let gate = server
        .mock("GET", "/gate.json")
        .with_status(200)
        .with_body(r#""https://dest.example""#)
        .expect(1)
        .create_async()
        .await;
    let resolved = server
        .mock("POST", "/resolve")
        .match_body(Matcher::PartialJson(json!({
            "campaign": "spring",
            "bundle_id": "com.example.app",
            "os": "iOS"
        })))
        .with_status(200)
        .with_body(r#"{"ok": true, "url": "https://dest.example/home"}"#)
        .create_async()
        .await;
    let settings = settings(&server.url());
    let store = Arc::new(PersistentKeyValueStore::in_memory());
    let handle = start(&settings, store.clone());
    handle.receive_attribution(
        json!({"af_status": "Non-organic", "campaign": "spring"})
            .as_object()
            .cloned()
            .unwrap(),
    );

    handle.wait_for(|o| o.show_permission_prompt).await;
    handle.grant_permission();
    assert_eq!(
        handle.route_decision().await,
        Route::Primary {
            endpoint: "https://dest.example/home".into()
        }
    );

    gate.assert_async().await;
    resolved.assert_async().await;
    assert_eq!(store.load(StoreKey::Endpoint).as_deref(), Some("https://dest.example/home"));
    assert_eq!(store.load(StoreKey::OperationMode).as_deref(), Some(MODE_ACTIVE));
}

#[tokio::test]
async fn missing_gate_record_routes_to_fallback() {
    let mut server = mockito::Server::new_async().await;
    let _gate = server
        .mock("GET", "/gate.json")
        .with_status(404)
        .create_async()
        .await;
    let resolve = server
        .mock("POST", "/resolve")
        .expect(0)
        .create_async()
        .await;

    let settings = settings(&server.url());
    let handle = start(&settings, Arc::new(PersistentKeyValueStore::in_memory()));
    handle.receive_attribution(json!({"af_status": "Non-organic"}).as_object().cloned().unwrap());

    assert_eq!(handle.route_decision().await, Route::Fallback);
    resolve.assert_async().await;
}
