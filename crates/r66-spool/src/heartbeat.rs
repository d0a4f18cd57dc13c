//! Heartbeat emitter
//!
//! Every `elapse_waarp` the daemon sends its aggregate status to each
//! observer host as a business request. Observers that cannot be reached
//! are logged and skipped; the next period tries again.

use crate::clock::Ticker;
use crate::status::{DaemonStatus, StatusProbe};
use r66_client::TransferClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Business request class carried by heartbeats
pub const INFORM_TASK: &str = "SpooledInformTask";

/// Build the heartbeat payload for `status`.
///
/// # Errors
///
/// Returns an error if the status cannot be serialised.
pub fn payload(status: &DaemonStatus) -> serde_json::Result<String> {
    Ok(format!("{} {}", INFORM_TASK, serde_json::to_string(status)?))
}

/// Periodic status broadcaster
pub struct HeartbeatEmitter {
    client: Arc<dyn TransferClient>,
    observers: Vec<String>,
    period: Duration,
    probe: StatusProbe,
}

impl HeartbeatEmitter {
    /// Create an emitter for `observers` (already trimmed).
    pub fn new(
        client: Arc<dyn TransferClient>,
        observers: Vec<String>,
        period: Duration,
        probe: StatusProbe,
    ) -> Self {
        Self {
            client,
            observers,
            period,
            probe,
        }
    }

    /// Send one heartbeat to every observer. Returns the number of observers
    /// reached.
    pub async fn emit_once(&self) -> usize {
        let status = self.probe.status();
        let payload = match payload(&status) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("{}: cannot encode status: {}", status.name, e);
                return 0;
            }
        };

        let mut reached = 0;
        for host in &self.observers {
            match self.client.business_request(host, &payload).await {
                Ok(()) => reached += 1,
                Err(e) => {
                    tracing::info!("{}: cannot inform {}: {}", status.name, host, e);
                }
            }
        }
        reached
    }

    /// Run on a dedicated task until `shutdown` turns `true` or its sender
    /// is dropped. The first heartbeat is sent one period after start.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = Ticker::delayed(self.period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.emit_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("{}: heartbeat stopped", self.probe.name);
        })
    }
}
