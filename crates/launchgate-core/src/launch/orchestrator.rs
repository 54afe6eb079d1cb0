//! Launch orchestrator.
//!
//! A single actor task owns every piece of launch state. Producers (the
//! fusion buffer, the connectivity watcher, the deadline timer, spawned
//! network calls and the host layer through [`LaunchHandle`]) only ever send
//! messages to it, so no two transitions interleave.
//!
//! ## Decision flow
//!
//! ```text
//! boot -> Preparing --fused--> Checking --gate ok--> Verified --resolved--> Running
//!            |                     |                     |
//!            +------deadline-------+------gate denied----+----failed--------> Waiting
//! ```
//!
//! Exactly one of "navigate to primary" / "navigate to fallback" is ever
//! emitted. Late network results are dropped once the latch is set.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::fusion::{FusionOutput, SignalFusionBuffer};
use super::permission::{PermissionAuthorizer, PermissionState, PermissionStatus};
use super::router::NotificationPayloadRouter;
use super::signal::{AttributionSignal, NavigationSignal};
use super::state::{FlowState, LaunchConfig, LaunchOutputs, Phase, Route, MODE_ACTIVE};
use crate::error::ResolveError;
use crate::resolve::{EndpointResolver, ValidationGate};
use crate::storage::{LaunchSettings, PersistentKeyValueStore, StoreKey};

/// Collaborators injected into the orchestrator.
pub struct LaunchDeps {
    pub store: Arc<PersistentKeyValueStore>,
    pub resolver: Arc<dyn EndpointResolver>,
    pub gate: Arc<dyn ValidationGate>,
    pub authorizer: Arc<dyn PermissionAuthorizer>,
    /// Network path state; `true` when satisfied.
    pub connectivity: watch::Receiver<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermissionChoice {
    Grant,
    Skip,
}

#[derive(Debug)]
enum LaunchCommand {
    Permission(PermissionChoice),
    AuthorizationFinished(bool),
    DeadlineExpired,
    ValidationFinished(Result<bool, ResolveError>),
    OrganicResolved(Result<Map<String, Value>, ResolveError>),
    EndpointResolved(Result<String, ResolveError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validation {
    NotStarted,
    InFlight,
    Passed,
}

#[derive(Debug, Clone)]
struct Timing {
    deadline: Duration,
    organic_delay: Duration,
    cooldown_days: i64,
}

/// The launch state machine. Construct with [`LaunchOrchestrator::start`].
pub struct LaunchOrchestrator {
    store: Arc<PersistentKeyValueStore>,
    resolver: Arc<dyn EndpointResolver>,
    gate: Arc<dyn ValidationGate>,
    authorizer: Arc<dyn PermissionAuthorizer>,
    timing: Timing,
    commands: mpsc::UnboundedSender<LaunchCommand>,
    published: watch::Sender<LaunchOutputs>,
    outputs: LaunchOutputs,

    config: LaunchConfig,
    permission: PermissionState,
    attribution: Option<AttributionSignal>,
    deep_link: NavigationSignal,

    validation: Validation,
    resolving: bool,
    /// Set only by entering Running.
    is_processing: bool,
    /// Set by the first navigation output of either kind.
    routed: bool,
    awaiting_permission: bool,
    authorizing: bool,
    resume_phase: Option<Phase>,
    deadline: Option<JoinHandle<()>>,
}

impl LaunchOrchestrator {
    /// Boot the orchestrator and its fusion buffer and router.
    ///
    /// Must be called from within a tokio runtime. The actor lives for the
    /// rest of the process.
    pub fn start(deps: LaunchDeps, settings: &LaunchSettings) -> LaunchHandle {
        let LaunchDeps {
            store,
            resolver,
            gate,
            authorizer,
            connectivity,
        } = deps;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (fusion_tx, fusion_rx) = mpsc::unbounded_channel();
        let (published, outputs_rx) = watch::channel(LaunchOutputs::default());

        let fusion = SignalFusionBuffer::new(store.clone(), settings.timing.debounce(), fusion_tx);
        let router = NotificationPayloadRouter::new(store.clone(), settings.timing.router_delay());

        let deep_link = store
            .load_encoded_json(StoreKey::DeepLinkData)
            .map(NavigationSignal::new)
            .unwrap_or_default();
        let orchestrator = Self {
            config: LaunchConfig::load(&store),
            permission: PermissionState::load(&store),
            attribution: store.load_json(StoreKey::AttributionData).map(AttributionSignal::new),
            deep_link,
            store,
            resolver,
            gate,
            authorizer,
            timing: Timing {
                deadline: settings.timing.deadline(),
                organic_delay: settings.timing.organic_delay(),
                cooldown_days: settings.permission.cooldown_days,
            },
            commands: command_tx.clone(),
            published,
            outputs: LaunchOutputs::default(),
            validation: Validation::NotStarted,
            resolving: false,
            is_processing: false,
            routed: false,
            awaiting_permission: false,
            authorizing: false,
            resume_phase: None,
            deadline: None,
        };

        tokio::spawn(orchestrator.run(command_rx, fusion_rx, connectivity));

        LaunchHandle {
            commands: command_tx,
            fusion,
            router,
            outputs: outputs_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LaunchCommand>,
        mut fusion: mpsc::UnboundedReceiver<FusionOutput>,
        mut connectivity: watch::Receiver<bool>,
    ) {
        self.boot();
        let online = *connectivity.borrow_and_update();
        self.on_connectivity(online);
        self.publish();

        let mut watching = true;
        loop {
            tokio::select! {
                Some(command) = commands.recv() => self.handle(command),
                Some(output) = fusion.recv() => self.on_fusion(output),
                changed = connectivity.changed(), if watching => match changed {
                    Ok(()) => {
                        let online = *connectivity.borrow_and_update();
                        self.on_connectivity(online);
                    }
                    Err(_) => {
                        debug!("connectivity source closed");
                        watching = false;
                    }
                },
                else => break,
            }
            self.publish();
        }
    }

    fn boot(&mut self) {
        self.set_phase(Phase::Preparing);
        info!(
            first_launch = self.config.is_first_launch,
            has_saved_endpoint = self.config.saved_endpoint.is_some(),
            "launch preparing"
        );

        let commands = self.commands.clone();
        let deadline = self.timing.deadline;
        self.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = commands.send(LaunchCommand::DeadlineExpired);
        }));

        if let Some(endpoint) = self.config.warm_endpoint().map(str::to_string) {
            info!("warm start with saved endpoint");
            self.finalize(endpoint);
        }
    }

    fn publish(&self) {
        self.published.send_if_modified(|current| {
            if *current == self.outputs {
                false
            } else {
                *current = self.outputs.clone();
                true
            }
        });
    }

    fn phase(&self) -> &Phase {
        &self.outputs.flow.phase
    }

    /// While disconnected, non-terminal transitions are remembered and
    /// applied when the path comes back.
    fn set_phase(&mut self, phase: Phase) {
        if *self.phase() == Phase::Disconnected && !phase.is_terminal() {
            self.resume_phase = Some(phase);
            return;
        }
        if phase.is_terminal() {
            self.resume_phase = None;
        }
        debug!(from = ?self.phase(), to = ?phase, "phase transition");
        self.outputs.flow.phase = phase;
    }

    fn decided(&self) -> bool {
        self.is_processing || self.routed
    }

    fn handle(&mut self, command: LaunchCommand) {
        match command {
            LaunchCommand::DeadlineExpired => self.on_deadline(),
            LaunchCommand::ValidationFinished(result) => self.on_validation(result),
            LaunchCommand::OrganicResolved(result) => self.on_organic_attribution(result),
            LaunchCommand::EndpointResolved(result) => self.on_endpoint(result),
            LaunchCommand::Permission(choice) => self.on_permission_choice(choice),
            LaunchCommand::AuthorizationFinished(granted) => self.on_authorization(granted),
        }
    }

    fn on_connectivity(&mut self, online: bool) {
        if matches!(self.phase(), Phase::Running(_)) {
            return;
        }
        self.outputs.show_offline = !online;

        if !online && !self.phase().is_terminal() && *self.phase() != Phase::Disconnected {
            info!("network path unsatisfied");
            self.resume_phase = Some(self.phase().clone());
            self.outputs.flow.phase = Phase::Disconnected;
        } else if online && *self.phase() == Phase::Disconnected {
            info!("network path restored");
            self.outputs.flow.phase = self.resume_phase.take().unwrap_or(Phase::Preparing);
        }
    }

    fn on_fusion(&mut self, output: FusionOutput) {
        match output {
            FusionOutput::Navigation(navigation) => {
                self.store
                    .save_encoded_json(StoreKey::DeepLinkData, navigation.data());
                self.deep_link = navigation;
            }
            FusionOutput::Fused(attribution) => self.on_attribution(attribution),
        }
    }

    fn on_attribution(&mut self, attribution: AttributionSignal) {
        if self.decided() || self.outputs.flow.endpoint.is_some() {
            debug!("attribution update after routing decision ignored");
            return;
        }

        self.store.save_json(StoreKey::AttributionData, attribution.data());
        self.attribution = Some(attribution);

        match self.validation {
            Validation::NotStarted => {
                self.validation = Validation::InFlight;
                self.set_phase(Phase::Checking);
                let gate = self.gate.clone();
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let result = gate.validate().await;
                    let _ = commands.send(LaunchCommand::ValidationFinished(result));
                });
            }
            // the pending result picks up the newest attribution
            Validation::InFlight => {}
            Validation::Passed if !self.resolving => self.resolve_business(),
            Validation::Passed => {}
        }
    }

    fn on_validation(&mut self, result: Result<bool, ResolveError>) {
        if self.decided() {
            debug!("late validation result discarded");
            return;
        }
        match result {
            Ok(true) => {
                self.validation = Validation::Passed;
                self.set_phase(Phase::Verified);
                self.resolve_business();
            }
            Ok(false) => {
                self.validation = Validation::NotStarted;
                self.route_fallback(&ResolveError::ValidationDenied);
            }
            Err(e) => {
                self.validation = Validation::NotStarted;
                self.route_fallback(&e);
            }
        }
    }

    fn resolve_business(&mut self) {
        let attribution = self.attribution.clone().unwrap_or_default();

        if attribution.is_empty() {
            debug!("attribution empty");
            self.finalize_with_saved_or_fallback(&ResolveError::Decoding(
                "empty attribution".into(),
            ));
            return;
        }

        if let Some(temp) = self
            .store
            .load(StoreKey::TempEndpoint)
            .filter(|t| !t.is_empty())
        {
            info!("using temporary endpoint from notification");
            self.finalize(temp);
            return;
        }

        if self.config.is_first_launch && attribution.is_organic() {
            info!(delay = ?self.timing.organic_delay, "organic first launch, fetching attribution");
            self.resolving = true;
            let resolver = self.resolver.clone();
            let commands = self.commands.clone();
            let device_id = self.store.device_id();
            let delay = self.timing.organic_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let result = resolver.resolve_attribution(&device_id).await;
                let _ = commands.send(LaunchCommand::OrganicResolved(result));
            });
            return;
        }

        self.request_endpoint(attribution);
    }

    fn request_endpoint(&mut self, attribution: AttributionSignal) {
        self.resolving = true;
        let resolver = self.resolver.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = resolver.resolve_endpoint(attribution.data()).await;
            let _ = commands.send(LaunchCommand::EndpointResolved(result));
        });
    }

    fn on_organic_attribution(&mut self, result: Result<Map<String, Value>, ResolveError>) {
        if self.decided() {
            self.resolving = false;
            debug!("late attribution lookup discarded");
            return;
        }
        match result {
            Ok(data) => {
                let merged = AttributionSignal::new(data).merged_with(self.deep_link.data());
                self.store.save_json(StoreKey::AttributionData, merged.data());
                self.attribution = Some(merged.clone());
                self.request_endpoint(merged);
            }
            Err(e) => {
                self.resolving = false;
                self.route_fallback(&e);
            }
        }
    }

    fn on_endpoint(&mut self, result: Result<String, ResolveError>) {
        self.resolving = false;
        if self.decided() {
            debug!("late endpoint result discarded");
            return;
        }
        match result {
            Ok(endpoint) => {
                self.store.save(StoreKey::Endpoint, &endpoint);
                self.store.save(StoreKey::OperationMode, MODE_ACTIVE);
                self.store.save_bool(StoreKey::FirstLaunch, false);
                self.config = LaunchConfig {
                    is_first_launch: false,
                    saved_endpoint: Some(endpoint.clone()),
                    operation_mode: Some(MODE_ACTIVE.to_string()),
                };
                self.finalize(endpoint);
            }
            Err(e) => self.finalize_with_saved_or_fallback(&e),
        }
    }

    fn finalize_with_saved_or_fallback(&mut self, reason: &ResolveError) {
        match self.config.saved_endpoint.clone() {
            Some(saved) => {
                info!(%reason, "falling back to saved endpoint");
                self.finalize(saved);
            }
            None => self.route_fallback(reason),
        }
    }

    fn on_deadline(&mut self) {
        self.deadline = None;
        if self.decided() {
            return;
        }
        let secs = self.timing.deadline.as_secs_f64();
        self.route_fallback(&ResolveError::Timeout { secs });
    }

    /// Commit the launch to `endpoint`. No-op once the latch is set.
    fn finalize(&mut self, endpoint: String) {
        if self.decided() {
            return;
        }
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
        self.is_processing = true;
        self.outputs.flow.endpoint = Some(endpoint.clone());
        self.outputs.flow.is_ready = true;
        self.outputs.show_offline = false;
        self.set_phase(Phase::Running(endpoint));
        info!("launch finalized");

        if self.permission.can_ask(Utc::now(), self.timing.cooldown_days) {
            self.awaiting_permission = true;
            self.outputs.show_permission_prompt = true;
        } else {
            self.navigate_primary();
        }
    }

    fn route_fallback(&mut self, reason: &ResolveError) {
        if self.decided() {
            return;
        }
        warn!(%reason, "routing to fallback flow");
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
        self.set_phase(Phase::Waiting);
        self.routed = true;
        self.outputs.navigate_to_fallback = true;
    }

    fn navigate_primary(&mut self) {
        if self.routed {
            return;
        }
        self.routed = true;
        self.outputs.navigate_to_primary = true;
    }

    fn on_permission_choice(&mut self, choice: PermissionChoice) {
        if !self.awaiting_permission || self.authorizing {
            debug!(?choice, "no permission prompt pending");
            return;
        }
        match choice {
            PermissionChoice::Grant => {
                self.authorizing = true;
                let authorizer = self.authorizer.clone();
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let granted = authorizer.request_authorization().await;
                    let _ = commands.send(LaunchCommand::AuthorizationFinished(granted));
                });
            }
            PermissionChoice::Skip => {
                self.resolve_permission(PermissionStatus::NotAsked);
            }
        }
    }

    fn on_authorization(&mut self, granted: bool) {
        self.authorizing = false;
        let status = if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        self.resolve_permission(status);
    }

    fn resolve_permission(&mut self, status: PermissionStatus) {
        self.permission = PermissionState::new(status, Utc::now());
        self.permission.persist(&self.store);
        info!(?status, "permission prompt resolved");
        self.awaiting_permission = false;
        self.outputs.show_permission_prompt = false;
        self.navigate_primary();
    }
}

/// Host-layer entry points into a running launch.
#[derive(Clone)]
pub struct LaunchHandle {
    commands: mpsc::UnboundedSender<LaunchCommand>,
    fusion: SignalFusionBuffer,
    router: NotificationPayloadRouter,
    outputs: watch::Receiver<LaunchOutputs>,
}

impl LaunchHandle {
    pub fn receive_attribution(&self, data: Map<String, Value>) {
        self.fusion.receive_attribution(AttributionSignal::new(data));
    }

    pub fn receive_navigation(&self, data: Map<String, Value>) {
        self.fusion.receive_navigation(NavigationSignal::new(data));
    }

    /// Feed a push/notification payload to the router.
    pub fn route(&self, payload: &Value) -> Option<String> {
        self.router.route(payload)
    }

    pub fn grant_permission(&self) {
        let _ = self
            .commands
            .send(LaunchCommand::Permission(PermissionChoice::Grant));
    }

    pub fn skip_permission(&self) {
        let _ = self
            .commands
            .send(LaunchCommand::Permission(PermissionChoice::Skip));
    }

    pub fn router(&self) -> &NotificationPayloadRouter {
        &self.router
    }

    pub fn outputs(&self) -> watch::Receiver<LaunchOutputs> {
        self.outputs.clone()
    }

    pub fn current_flow_state(&self) -> FlowState {
        self.outputs.borrow().flow.clone()
    }

    /// Wait until the published outputs satisfy `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&LaunchOutputs) -> bool) -> LaunchOutputs {
        let mut rx = self.outputs.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Wait for the navigation decision.
    pub async fn route_decision(&self) -> Route {
        let outputs = self.wait_for(|o| o.route().is_some()).await;
        outputs.route().unwrap_or(Route::Fallback)
    }
}
