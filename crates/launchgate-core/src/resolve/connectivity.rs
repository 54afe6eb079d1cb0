//! Network path monitoring.
//!
//! The orchestrator only sees a `watch::Receiver<bool>` (true = satisfied);
//! any source can feed it.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

/// Receiver that reports a permanently satisfied path.
pub fn always_online() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(true);
    rx
}

/// Periodically opens a TCP connection to a well-known host.
#[derive(Debug, Clone)]
pub struct ProbeMonitor {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl ProbeMonitor {
    pub fn new(target: impl Into<String>, interval: Duration) -> Self {
        Self {
            target: target.into(),
            interval,
            timeout: Duration::from_secs(3),
        }
    }

    async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        )
    }

    /// Start probing. The task stops once every receiver is dropped.
    pub fn spawn(self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(true);
        tokio::spawn(async move {
            loop {
                let satisfied = self.probe().await;
                let changed = tx.send_if_modified(|current| {
                    let changed = *current != satisfied;
                    *current = satisfied;
                    changed
                });
                if changed {
                    debug!(satisfied, target = %self.target, "network path changed");
                }
                if tx.is_closed() {
                    break;
                }
                tokio::time::sleep(self.interval).await;
            }
        });
        rx
    }
}
