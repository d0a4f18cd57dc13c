//! Transfer client abstraction
//!
//! A [`TransferClient`] performs one host leg of a spooled transfer and
//! reports a [`TransferOutcome`]. Implementations are expected to honour
//! task cancellation at their next suspension point and to abort a transfer
//! that makes no progress for longer than `TIMEOUTCON`.

use crate::error::{ClientError, Result};
use crate::SpecialId;
use async_trait::async_trait;
use std::path::PathBuf;

/// One host leg of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Destination host id
    pub host: String,
    /// Absolute path of the file to send
    pub path: PathBuf,
    /// Transfer rule name
    pub rule: String,
    /// Opaque metadata attached to the transfer
    pub file_info: String,
    /// Require an end-to-end MD5 check
    pub md5: bool,
    /// Transfer block size in bytes
    pub block_size: u32,
    /// Id to reuse, or [`SpecialId::ILLEGAL`] for a fresh transfer
    pub special_id: SpecialId,
}

/// Result of a single host leg
#[derive(Debug)]
pub enum TransferOutcome {
    /// Leg completed
    Success {
        /// Id of the task row that carried the transfer
        special_id: SpecialId,
        /// Final name of the file on the remote side, when known
        file_after: Option<PathBuf>,
        /// Completed with a WARNING sub-code
        warning: bool,
    },
    /// Leg failed
    Failure {
        /// Id of the task row, when one was created
        special_id: Option<SpecialId>,
        /// Why the leg failed
        cause: ClientError,
    },
}

impl TransferOutcome {
    /// Successful outcome without a warning
    pub fn success(special_id: SpecialId, file_after: Option<PathBuf>) -> Self {
        Self::Success {
            special_id,
            file_after,
            warning: false,
        }
    }

    /// Failed outcome
    pub fn failure(special_id: Option<SpecialId>, cause: ClientError) -> Self {
        Self::Failure { special_id, cause }
    }

    /// Whether the leg succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Id reported by the leg, if any
    pub fn special_id(&self) -> Option<SpecialId> {
        match self {
            Self::Success { special_id, .. } => Some(*special_id),
            Self::Failure { special_id, .. } => *special_id,
        }
    }
}

/// Transfer operations the spooled daemon needs from an R66 client
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Open a transport to `request.host` and stream the file.
    async fn direct(&self, request: &TransferRequest) -> TransferOutcome;

    /// Insert a transfer row for a server to execute later.
    async fn submit(&self, request: &TransferRequest) -> TransferOutcome;

    /// Ask `host` to restart the transfer identified by `special_id`.
    ///
    /// `requester` is this host's id as known by `host`.
    async fn request_restart(
        &self,
        host: &str,
        special_id: SpecialId,
        requester: &str,
    ) -> TransferOutcome;

    /// One-shot business request carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error when the host cannot be informed.
    async fn business_request(&self, host: &str, payload: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let ok = TransferOutcome::success(SpecialId::new(3), None);
        assert!(ok.is_success());
        assert_eq!(ok.special_id(), Some(SpecialId::new(3)));

        let err = TransferOutcome::failure(None, ClientError::Unreachable("hostB".into()));
        assert!(!err.is_success());
        assert_eq!(err.special_id(), None);

        let err = TransferOutcome::failure(
            Some(SpecialId::new(9)),
            ClientError::Timeout("no progress".into()),
        );
        assert_eq!(err.special_id(), Some(SpecialId::new(9)));
    }
}
