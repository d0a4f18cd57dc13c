//! File-system transfer client
//!
//! [`OutboxClient`] stands in for an R66 partner: the outbox root holds one
//! directory per partner host, and a transfer streams the source file block
//! by block into `<root>/<host>/`. A host is reachable iff its directory
//! exists. Every leg is recorded as a row of the injected [`TaskLedger`].

use crate::digest::{self, Md5Digest};
use crate::error::{ClientError, Result};
use crate::task::{NewTask, TaskLedger, TaskStatus};
use crate::transfer::{TransferClient, TransferOutcome, TransferRequest};
use crate::{DEFAULT_TIMEOUTCON_MS, SpecialId};
use async_trait::async_trait;
use md5::{Digest, Md5};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Sub-directory of a host outbox receiving business requests
pub const BUSINESS_DIR: &str = ".business";

/// Transfer client writing into per-host outbox directories
pub struct OutboxClient {
    root: PathBuf,
    host_id: String,
    ledger: Arc<dyn TaskLedger>,
    timeout: Duration,
}

/// Where a delivered file landed
struct Delivery {
    destination: PathBuf,
    overwrote: bool,
}

impl OutboxClient {
    /// Create a client for the local host `host_id`.
    ///
    /// # Arguments
    ///
    /// * `root` - Outbox root holding one directory per partner host
    /// * `host_id` - Local host id, recorded as requester of every row
    /// * `ledger` - Task ledger receiving the transfer rows
    pub fn new(
        root: impl Into<PathBuf>,
        host_id: impl Into<String>,
        ledger: Arc<dyn TaskLedger>,
    ) -> Self {
        Self {
            root: root.into(),
            host_id: host_id.into(),
            ledger,
            timeout: Duration::from_millis(DEFAULT_TIMEOUTCON_MS),
        }
    }

    /// Abort any block read or write making no progress for `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Outbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Task ledger behind this client.
    pub fn ledger(&self) -> &Arc<dyn TaskLedger> {
        &self.ledger
    }

    fn host_dir(&self, host: &str) -> Result<PathBuf> {
        if host.is_empty() || host.contains(['/', '\\']) || host == "." || host == ".." {
            return Err(ClientError::Refused(format!("invalid host id '{host}'")));
        }
        let dir = self.root.join(host);
        if !dir.is_dir() {
            return Err(ClientError::Unreachable(host.to_string()));
        }
        Ok(dir)
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(ClientError::from),
            Err(_) => Err(ClientError::Timeout(format!(
                "{what} made no progress for {} ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// Stream `source` into the outbox of `host`.
    ///
    /// The file is written under a hidden partial name and renamed once
    /// complete, so readers of the outbox never see a partial file.
    async fn deliver(
        &self,
        host: &str,
        source: &Path,
        block_size: u32,
        md5: bool,
    ) -> Result<Delivery> {
        let dir = self.host_dir(host)?;
        let name = source
            .file_name()
            .ok_or_else(|| ClientError::Other(format!("no file name in {}", source.display())))?;
        let destination = dir.join(name);
        let partial = dir.join(format!(".{}.part", name.to_string_lossy()));

        let mut input = self.bounded("open", tokio::fs::File::open(source)).await?;
        let mut output = self.bounded("create", tokio::fs::File::create(&partial)).await?;
        let mut buf = vec![0u8; block_size.max(1) as usize];
        let mut hasher = md5.then(Md5::new);
        let mut total = 0u64;

        let copied: Result<()> = async {
            loop {
                let n = self.bounded("read", input.read(&mut buf)).await?;
                if n == 0 {
                    break;
                }
                if let Some(h) = hasher.as_mut() {
                    h.update(&buf[..n]);
                }
                self.bounded("write", output.write_all(&buf[..n])).await?;
                total += n as u64;
            }
            self.bounded("flush", output.sync_all()).await
        }
        .await;

        if let Err(e) = copied {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        drop(output);

        if let Some(h) = hasher {
            let sent: Md5Digest = h.finalize().into();
            let check = partial.clone();
            let block = block_size.max(1) as usize;
            let received = tokio::task::spawn_blocking(move || digest::file_digest(&check, block))
                .await
                .map_err(|e| ClientError::Other(format!("digest task failed: {e}")))??;
            if sent != received {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(ClientError::DigestMismatch(source.display().to_string()));
            }
        }

        let overwrote = destination.exists();
        tokio::fs::rename(&partial, &destination).await?;
        tracing::debug!(
            "Delivered {} bytes of {} to {}",
            total,
            source.display(),
            destination.display()
        );

        Ok(Delivery {
            destination,
            overwrote,
        })
    }

    /// Deliver for an existing row and record the result on it.
    async fn run_leg(
        &self,
        special_id: SpecialId,
        host: &str,
        source: &Path,
        block_size: u32,
        md5: bool,
    ) -> TransferOutcome {
        if let Err(e) = self.ledger.update_status(special_id, TaskStatus::Running) {
            return TransferOutcome::failure(Some(special_id), e);
        }

        match self.deliver(host, source, block_size, md5).await {
            Ok(delivery) => {
                let status = if delivery.overwrote {
                    TaskStatus::Warning
                } else {
                    TaskStatus::Done
                };
                if let Err(e) = self.ledger.update_status(special_id, status) {
                    tracing::warn!("Cannot mark transfer {} as {:?}: {}", special_id, status, e);
                }
                TransferOutcome::Success {
                    special_id,
                    file_after: Some(delivery.destination),
                    warning: delivery.overwrote,
                }
            }
            Err(cause) => {
                if let Err(e) = self.ledger.update_status(special_id, TaskStatus::Error) {
                    tracing::warn!("Cannot mark transfer {} as failed: {}", special_id, e);
                }
                TransferOutcome::failure(Some(special_id), cause)
            }
        }
    }

    fn new_task(&self, request: &TransferRequest, status: TaskStatus) -> NewTask {
        NewTask {
            rule: request.rule.clone(),
            host: request.host.clone(),
            file: request.path.clone(),
            file_info: request.file_info.clone(),
            requester: self.host_id.clone(),
            status,
            block_size: request.block_size,
            md5: request.md5,
        }
    }
}

#[async_trait]
impl TransferClient for OutboxClient {
    async fn direct(&self, request: &TransferRequest) -> TransferOutcome {
        // Resume the row of an earlier attempt when it still exists
        let existing = if request.special_id.is_legal() {
            match self.ledger.get(request.special_id) {
                Ok(row) => row.map(|r| r.special_id),
                Err(e) => {
                    tracing::debug!("Cannot look up transfer {}: {}", request.special_id, e);
                    None
                }
            }
        } else {
            None
        };

        let special_id = match existing {
            Some(id) => id,
            None => match self.ledger.insert(self.new_task(request, TaskStatus::Running)) {
                Ok(id) => id,
                Err(e) => return TransferOutcome::failure(None, e),
            },
        };

        self.run_leg(
            special_id,
            &request.host,
            &request.path,
            request.block_size,
            request.md5,
        )
        .await
    }

    async fn submit(&self, request: &TransferRequest) -> TransferOutcome {
        if !self.ledger.is_connected() {
            return TransferOutcome::failure(None, ClientError::NotConnected);
        }
        match self.ledger.insert(self.new_task(request, TaskStatus::Submitted)) {
            Ok(special_id) => {
                tracing::debug!(
                    "Submitted {} to {} as transfer {}",
                    request.path.display(),
                    request.host,
                    special_id
                );
                TransferOutcome::success(special_id, None)
            }
            Err(e) => TransferOutcome::failure(None, e),
        }
    }

    async fn request_restart(
        &self,
        host: &str,
        special_id: SpecialId,
        requester: &str,
    ) -> TransferOutcome {
        let row = match self.ledger.get(special_id) {
            Ok(Some(row)) => row,
            Ok(None) => {
                return TransferOutcome::failure(
                    Some(special_id),
                    ClientError::TaskNotFound(special_id),
                );
            }
            Err(e) => return TransferOutcome::failure(Some(special_id), e),
        };

        if row.host != host || row.requester != requester {
            return TransferOutcome::failure(
                Some(special_id),
                ClientError::Refused(format!(
                    "transfer {special_id} belongs to {} -> {}",
                    row.requester, row.host
                )),
            );
        }

        tracing::debug!("Restarting {}", row.short_string());
        self.run_leg(special_id, host, &row.file, row.block_size, row.md5)
            .await
    }

    async fn business_request(&self, host: &str, payload: &str) -> Result<()> {
        let dir = self.host_dir(host)?.join(BUSINESS_DIR);
        self.bounded("business mkdir", tokio::fs::create_dir_all(&dir))
            .await?;
        let target = dir.join(format!("{}.msg", self.host_id));
        self.bounded("business write", tokio::fs::write(&target, payload))
            .await
    }
}
