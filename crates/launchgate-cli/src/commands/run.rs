use std::sync::Arc;

use clap::Args;
use launchgate_core::{
    always_online, FixedAuthorizer, HttpEndpointResolver, HttpValidationGate, LaunchDeps,
    LaunchOrchestrator, LaunchSettings, ProbeMonitor,
};
use serde_json::{json, Map, Value};

use super::open_store;

#[derive(Args)]
pub struct RunArgs {
    /// Attribution payload as a JSON object
    #[arg(long)]
    attribution: Option<String>,
    /// Deep-link payload as a JSON object
    #[arg(long)]
    navigation: Option<String>,
    /// Notification payload routed before any signal is delivered
    #[arg(long)]
    push: Option<String>,
    /// Answer the permission prompt by requesting authorization
    #[arg(long, conflicts_with = "skip")]
    grant: bool,
    /// Answer the permission prompt by skipping it; also the answer when
    /// neither flag is given
    #[arg(long)]
    skip: bool,
    /// Use a throwaway in-memory store
    #[arg(long)]
    memory: bool,
    /// Probe connectivity instead of assuming the network is up
    #[arg(long)]
    probe: bool,
}

fn parse_object(flag: &str, text: &str) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(format!("--{flag} must be a JSON object").into()),
    }
}

/// Skip wins unless `--grant` alone was given.
fn grants_permission(grant: bool, skip: bool) -> bool {
    grant && !skip
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let attribution = args
        .attribution
        .as_deref()
        .map(|t| parse_object("attribution", t))
        .transpose()?;
    let navigation = args
        .navigation
        .as_deref()
        .map(|t| parse_object("navigation", t))
        .transpose()?;
    let push = args
        .push
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()?;

    let settings = LaunchSettings::load_or_default();
    let store = Arc::new(open_store(args.memory)?);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let connectivity = if args.probe {
            ProbeMonitor::new(
                settings.network.connectivity_probe.clone(),
                settings.timing.probe_interval(),
            )
            .spawn()
        } else {
            always_online()
        };

        let deps = LaunchDeps {
            store: store.clone(),
            resolver: Arc::new(HttpEndpointResolver::new(&settings, store.clone())?),
            gate: Arc::new(HttpValidationGate::new(&settings)?),
            authorizer: Arc::new(FixedAuthorizer(args.grant)),
            connectivity,
        };
        let handle = LaunchOrchestrator::start(deps, &settings);

        if let Some(payload) = &push {
            if handle.route(payload).is_none() {
                eprintln!("push payload carries no destination");
            }
        }
        if let Some(data) = navigation {
            handle.receive_navigation(data);
        }
        if let Some(data) = attribution {
            handle.receive_attribution(data);
        }

        let outputs = handle
            .wait_for(|o| o.show_permission_prompt || o.route().is_some())
            .await;
        let prompted = outputs.show_permission_prompt;
        if prompted {
            if grants_permission(args.grant, args.skip) {
                handle.grant_permission();
            } else {
                handle.skip_permission();
            }
        }

        let route = handle.route_decision().await;
        let report = json!({
            "route": route,
            "flow": handle.current_flow_state(),
            "permission_prompted": prompted,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
