//! # R66 Client
//!
//! Collaborator seams used by the spooled-directory engine.
//!
//! The engine never talks to the R66 wire protocol or to the task-runner
//! database directly. It goes through three traits:
//! - [`TransferClient`]: direct transfers, submissions, restart requests and
//!   business requests (heartbeats)
//! - [`RuleCatalog`]: rule lookup and requester resolution
//! - [`TaskLedger`]: the transfer rows owned by the task-runner database
//!
//! This crate also ships file-system based implementations of each seam:
//! - [`OutboxClient`]: streams files block by block into `<outbox>/<host>/`
//! - [`JournalTaskLedger`]: an append-only JSON-lines task journal
//! - [`MemoryTaskLedger`]: in-memory rows, connected or detached
//! - [`StaticRuleCatalog`]: rules and partners declared up front

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod digest;
pub mod error;
pub mod journal;
pub mod outbox;
pub mod rule;
pub mod task;
pub mod transfer;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::{ClientError, Result};
pub use journal::JournalTaskLedger;
pub use outbox::OutboxClient;
pub use rule::{Rule, RuleCatalog, RuleMode, StaticRuleCatalog};
pub use task::{MemoryTaskLedger, NewTask, TaskLedger, TaskRow, TaskStatus};
pub use transfer::{TransferClient, TransferOutcome, TransferRequest};

/// Default connection timeout (`TIMEOUTCON`) in milliseconds.
pub const DEFAULT_TIMEOUTCON_MS: u64 = 30_000;

/// 64-bit transfer identifier allocated by the task ledger.
///
/// [`SpecialId::ILLEGAL`] is the reserved "not yet assigned" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecialId(i64);

impl SpecialId {
    /// Sentinel meaning "no transfer id assigned".
    pub const ILLEGAL: SpecialId = SpecialId(i64::MIN);

    /// Wrap a raw id.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this id was assigned by a task ledger.
    pub const fn is_legal(self) -> bool {
        self.0 != i64::MIN
    }
}

impl Default for SpecialId {
    fn default() -> Self {
        Self::ILLEGAL
    }
}

impl fmt::Display for SpecialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_legal() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("ILLEGAL")
        }
    }
}
