//! Signal fusion buffer.
//!
//! Collects the attribution and navigation payloads, which arrive
//! independently and in either order, and emits one fused attribution
//! signal once both are present or the debounce window after the latest
//! attribution payload elapses.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::signal::{fuse, AttributionSignal, NavigationSignal};
use crate::storage::{PersistentKeyValueStore, StoreKey};

/// What the buffer hands to its listener.
#[derive(Debug, Clone, PartialEq)]
pub enum FusionOutput {
    /// Attribution with navigation folded in.
    Fused(AttributionSignal),
    /// Raw navigation payload, forwarded as soon as it is accepted.
    Navigation(NavigationSignal),
}

#[derive(Default)]
struct Buffers {
    attribution: Option<AttributionSignal>,
    navigation: Option<NavigationSignal>,
    debounce: Option<JoinHandle<()>>,
    /// Bumped whenever a timer is armed or cancelled; a timer only fires
    /// while its own generation is current.
    generation: u64,
}

impl Buffers {
    fn cancel_debounce(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.debounce.take() {
            timer.abort();
        }
    }
}

struct Inner {
    buffers: Mutex<Buffers>,
    store: Arc<PersistentKeyValueStore>,
    debounce: Duration,
    output: mpsc::UnboundedSender<FusionOutput>,
}

/// Cheap to clone; clones share the same buffers.
///
/// Must be used from within a tokio runtime (the debounce timer is a task).
#[derive(Clone)]
pub struct SignalFusionBuffer {
    inner: Arc<Inner>,
}

impl SignalFusionBuffer {
    pub fn new(
        store: Arc<PersistentKeyValueStore>,
        debounce: Duration,
        output: mpsc::UnboundedSender<FusionOutput>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffers: Mutex::new(Buffers::default()),
                store,
                debounce,
                output,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn receive_attribution(&self, payload: AttributionSignal) {
        let mut buffers = self.lock();
        buffers.attribution = Some(payload);
        buffers.cancel_debounce();

        if buffers.navigation.is_some() {
            debug!("navigation already buffered, fusing immediately");
            self.emit_fused(&buffers);
            return;
        }

        let this = self.clone();
        let window = self.inner.debounce;
        let generation = buffers.generation;
        buffers.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            debug!(?window, "debounce window elapsed");
            this.debounce_elapsed(generation);
        }));
    }

    pub fn receive_navigation(&self, payload: NavigationSignal) {
        // FusionCompleted is honoured here but nothing in the launch flow sets it.
        if self.inner.store.load_bool(StoreKey::FusionCompleted) == Some(true) {
            debug!("fusion already completed, dropping navigation payload");
            return;
        }

        let mut buffers = self.lock();
        buffers.navigation = Some(payload.clone());
        let _ = self.inner.output.send(FusionOutput::Navigation(payload));
        buffers.cancel_debounce();

        if buffers.attribution.is_some() {
            self.emit_fused(&buffers);
        }
    }

    /// Emit the fused signal for whatever is buffered now, cancelling any
    /// pending debounce timer.
    pub fn fuse(&self) {
        let mut buffers = self.lock();
        buffers.cancel_debounce();
        self.emit_fused(&buffers);
    }

    fn debounce_elapsed(&self, generation: u64) {
        let mut buffers = self.lock();
        if buffers.generation != generation {
            debug!("stale debounce timer ignored");
            return;
        }
        buffers.debounce = None;
        self.emit_fused(&buffers);
    }

    fn emit_fused(&self, buffers: &Buffers) {
        let Some(attribution) = &buffers.attribution else {
            return;
        };
        let fused = match &buffers.navigation {
            Some(navigation) => fuse(attribution, navigation),
            None => attribution.clone(),
        };
        debug!(keys = fused.data().len(), "emitting fused attribution");
        let _ = self.inner.output.send(FusionOutput::Fused(fused));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::time::{timeout, Instant};

    fn attribution(v: Value) -> AttributionSignal {
        AttributionSignal::new(v.as_object().cloned().unwrap())
    }

    fn navigation(v: Value) -> NavigationSignal {
        NavigationSignal::new(v.as_object().cloned().unwrap())
    }

    fn buffer() -> (
        SignalFusionBuffer,
        mpsc::UnboundedReceiver<FusionOutput>,
        Arc<PersistentKeyValueStore>,
    ) {
        let store = Arc::new(PersistentKeyValueStore::in_memory());
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = SignalFusionBuffer::new(store.clone(), Duration::from_millis(2500), tx);
        (buffer, rx, store)
    }

    #[tokio::test(start_paused = true)]
    async fn lone_attribution_fuses_after_debounce() {
        let (buffer, mut rx, _) = buffer();
        let started = Instant::now();
        buffer.receive_attribution(attribution(json!({"a": 1})));

        assert!(timeout(Duration::from_millis(2400), rx.recv()).await.is_err());
        let out = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2500));
        assert_eq!(out, FusionOutput::Fused(attribution(json!({"a": 1}))));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_first_fuses_on_attribution_arrival() {
        let (buffer, mut rx, _) = buffer();
        buffer.receive_navigation(navigation(json!({"a": 2, "b": 3})));
        assert_eq!(
            rx.recv().await.unwrap(),
            FusionOutput::Navigation(navigation(json!({"a": 2, "b": 3})))
        );

        let started = Instant::now();
        buffer.receive_attribution(attribution(json!({"a": 1})));
        let out = rx.try_recv().unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(out, FusionOutput::Fused(attribution(json!({"a": 1, "deep_b": 3}))));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_inside_window_cancels_timer() {
        let (buffer, mut rx, _) = buffer();
        buffer.receive_attribution(attribution(json!({"a": 1})));
        tokio::time::sleep(Duration::from_secs(1)).await;
        buffer.receive_navigation(navigation(json!({"b": 3})));

        assert!(matches!(rx.try_recv(), Ok(FusionOutput::Navigation(_))));
        assert!(matches!(rx.try_recv(), Ok(FusionOutput::Fused(_))));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn later_attribution_refuses_with_same_navigation() {
        let (buffer, mut rx, _) = buffer();
        buffer.receive_navigation(navigation(json!({"b": 3})));
        buffer.receive_attribution(attribution(json!({"a": 1})));
        buffer.receive_attribution(attribution(json!({"a": 5})));

        let fused: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|o| match o {
                FusionOutput::Fused(s) => Some(s),
                FusionOutput::Navigation(_) => None,
            })
            .collect();
        assert_eq!(
            fused,
            vec![
                attribution(json!({"a": 1, "deep_b": 3})),
                attribution(json!({"a": 5, "deep_b": 3})),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_attribution_restarts_window() {
        let (buffer, mut rx, _) = buffer();
        buffer.receive_attribution(attribution(json!({"a": 1})));
        tokio::time::sleep(Duration::from_secs(2)).await;
        buffer.receive_attribution(attribution(json!({"a": 2})));

        let started = Instant::now();
        let out = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2500));
        assert_eq!(out, FusionOutput::Fused(attribution(json!({"a": 2}))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_timer_leaves_current_one_armed() {
        let (buffer, mut rx, _) = buffer();
        buffer.receive_attribution(attribution(json!({"a": 1})));
        let stale = buffer.lock().generation;
        buffer.receive_attribution(attribution(json!({"a": 2})));

        // an earlier timer that woke before being aborted
        buffer.debounce_elapsed(stale);
        assert!(rx.try_recv().is_err());
        assert!(buffer.lock().debounce.is_some());

        buffer.receive_navigation(navigation(json!({"b": 3})));
        assert!(matches!(rx.try_recv(), Ok(FusionOutput::Navigation(_))));
        assert_eq!(
            rx.try_recv().unwrap(),
            FusionOutput::Fused(attribution(json!({"a": 2, "deep_b": 3})))
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_flag_drops_navigation() {
        let (buffer, mut rx, store) = buffer();
        store.save_bool(StoreKey::FusionCompleted, true);
        buffer.receive_navigation(navigation(json!({"b": 3})));
        assert!(rx.try_recv().is_err());
    }

    // The completed flag is only ever read. This pins the current behaviour:
    // fusing does not set it, so navigation keeps being accepted.
    #[tokio::test(start_paused = true)]
    async fn fusing_does_not_set_completed_flag() {
        let (buffer, mut rx, store) = buffer();
        buffer.receive_navigation(navigation(json!({"b": 3})));
        buffer.receive_attribution(attribution(json!({"a": 1})));
        assert_eq!(store.load_bool(StoreKey::FusionCompleted), None);

        buffer.receive_navigation(navigation(json!({"c": 4})));
        let outputs: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(outputs.len(), 4);
    }
}
