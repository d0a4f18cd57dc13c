//! Transfer dispatcher
//!
//! One dispatch sends one stable file to every destination host. Host legs
//! are independent: a failing host is counted and logged, and the file is
//! settled `DoneOk` as soon as one leg succeeded.

use crate::config::{SpoolConfig, TransferMode};
use crate::item::FileItem;
use crate::ledger::SharedLedger;
use crate::status::DaemonCounters;
use r66_client::{
    ClientError, RuleCatalog, SpecialId, TaskLedger, TransferClient, TransferOutcome,
    TransferRequest, digest,
};
use std::sync::Arc;
use tokio::sync::Notify;

/// Sends ledger items to the configured hosts
pub struct TransferDispatcher {
    config: Arc<SpoolConfig>,
    ledger: SharedLedger,
    client: Arc<dyn TransferClient>,
    catalog: Arc<dyn RuleCatalog>,
    tasks: Arc<dyn TaskLedger>,
    counters: Arc<DaemonCounters>,
    settled: Arc<Notify>,
}

impl TransferDispatcher {
    /// Create a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `config` - Daemon configuration
    /// * `ledger` - Ledger receiving digests and settlements
    /// * `client` - Transfer client
    /// * `catalog` - Resolves the requester id for restart requests
    /// * `tasks` - Task ledger, used to drop rows when `nolog` is set
    /// * `counters` - Leg tallies
    /// * `settled` - Notified after every settlement
    pub fn new(
        config: Arc<SpoolConfig>,
        ledger: SharedLedger,
        client: Arc<dyn TransferClient>,
        catalog: Arc<dyn RuleCatalog>,
        tasks: Arc<dyn TaskLedger>,
        counters: Arc<DaemonCounters>,
        settled: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            ledger,
            client,
            catalog,
            tasks,
            counters,
            settled,
        }
    }

    /// Send `item` to every host, then settle it in the ledger.
    ///
    /// Returns `true` if at least one leg succeeded.
    pub async fn dispatch(&self, item: FileItem) -> bool {
        let config = &self.config;
        let path = item.path.clone();

        if config.md5 {
            self.record_digest(&item).await;
        }

        let hosts: Vec<&str> = config.hosts().collect();
        let multi_host = hosts.len() > 1;
        let mut special_id = item.special_id;
        let mut delivered = false;

        for host in hosts {
            // One id cannot identify transfers to several hosts
            let effective = if multi_host {
                SpecialId::ILLEGAL
            } else {
                special_id
            };
            let request = TransferRequest {
                host: host.to_string(),
                path: path.clone(),
                rule: config.rule.clone(),
                file_info: config.file_info.clone(),
                md5: config.md5,
                block_size: config.block_size,
                special_id: effective,
            };

            match self.send_leg(&request).await {
                TransferOutcome::Success {
                    special_id: id,
                    file_after,
                    warning,
                } => {
                    delivered = true;
                    special_id = id;
                    self.counters.record_sent();
                    if config.effective_nolog()
                        && let Err(e) = self.tasks.delete(id)
                    {
                        tracing::warn!("Cannot delete task row {}: {}", id, e);
                    }
                    let after = file_after
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::warn!(
                        "Transfer {}: {} to {} (id {}, rule {}, final file {})",
                        if warning { "WARNING" } else { "SUCCESS" },
                        path.display(),
                        host,
                        id,
                        config.rule,
                        after
                    );
                }
                TransferOutcome::Failure {
                    special_id: id,
                    cause,
                } => {
                    if let Some(id) = id {
                        special_id = id;
                    }
                    self.counters.record_error();
                    tracing::error!(
                        "Transfer in error: {} to {} (id {}, rule {}): {}",
                        path.display(),
                        host,
                        special_id,
                        config.rule,
                        cause
                    );
                }
            }
        }

        let stored = if multi_host {
            SpecialId::ILLEGAL
        } else {
            special_id
        };
        self.ledger.lock().settle(&path, delivered, stored);
        self.settled.notify_one();
        delivered
    }

    async fn send_leg(&self, request: &TransferRequest) -> TransferOutcome {
        match self.config.mode {
            TransferMode::Submit => self.client.submit(request).await,
            TransferMode::Direct if request.special_id.is_legal() => {
                match self.catalog.requester_of(&request.host) {
                    Ok(requester) => {
                        tracing::debug!(
                            "Requesting restart of {} on {} as {}",
                            request.special_id,
                            request.host,
                            requester
                        );
                        let outcome = self
                            .client
                            .request_restart(&request.host, request.special_id, &requester)
                            .await;
                        match outcome {
                            TransferOutcome::Failure {
                                cause: ClientError::TaskNotFound(_),
                                ..
                            } => {
                                tracing::info!(
                                    "Transfer {} no longer known by {}, sending again",
                                    request.special_id,
                                    request.host
                                );
                                self.client.direct(request).await
                            }
                            other => other,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Cannot restart transfer {} on {}, sending again: {}",
                            request.special_id,
                            request.host,
                            e
                        );
                        self.client.direct(request).await
                    }
                }
            }
            TransferMode::Direct => self.client.direct(request).await,
        }
    }

    async fn record_digest(&self, item: &FileItem) {
        let path = item.path.clone();
        let block = self.config.block_size as usize;
        let result =
            tokio::task::spawn_blocking(move || digest::file_digest(&path, block)).await;
        match result {
            Ok(Ok(hash)) => {
                tracing::debug!("MD5 of {} is {}", item.path.display(), digest::to_hex(&hash));
                self.ledger.lock().record_digest(&item.path, hash);
            }
            Ok(Err(e)) => {
                tracing::warn!("Cannot compute MD5 of {}: {}", item.path.display(), e);
            }
            Err(e) => {
                tracing::warn!("MD5 task for {} failed: {}", item.path.display(), e);
            }
        }
    }
}
