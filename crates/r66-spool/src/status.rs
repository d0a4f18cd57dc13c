//! Daemon counters, lifecycle state and status snapshots

use crate::clock::Clock;
use crate::item::FileState;
use crate::ledger::{SharedLedger, StateCounts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Lifecycle of a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// Built, not validated yet
    Init,
    /// Scanning and dispatching
    Running,
    /// Draining workers
    Stopping,
    /// Done
    Stopped,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SupervisorState::Init,
            1 => SupervisorState::Running,
            2 => SupervisorState::Stopping,
            _ => SupervisorState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SupervisorState::Init => 0,
            SupervisorState::Running => 1,
            SupervisorState::Stopping => 2,
            SupervisorState::Stopped => 3,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Init => "init",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free holder of a [`SupervisorState`]
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(SupervisorState::Init.as_u8()))
    }
}

impl StateCell {
    /// Current state.
    pub fn get(&self) -> SupervisorState {
        SupervisorState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replace the state.
    pub fn set(&self, state: SupervisorState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Per-leg tallies of a daemon
#[derive(Debug, Default)]
pub struct DaemonCounters {
    sent: AtomicU64,
    error: AtomicU64,
}

impl DaemonCounters {
    /// Count a successful leg.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed leg.
    pub fn record_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful legs so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Failed legs so far.
    pub fn error(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }
}

/// Aggregate status broadcast to observer hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon name
    pub name: String,
    /// Lifecycle state
    pub state: SupervisorState,
    /// Successful legs
    pub sent: u64,
    /// Failed legs
    pub error: u64,
    /// Items per state
    pub counts: StateCounts,
    /// Coarse state of every watched file
    pub files: BTreeMap<String, FileState>,
    /// When the snapshot was taken (ms since epoch)
    pub timestamp: i64,
}

/// Builds [`DaemonStatus`] snapshots from the live daemon parts
#[derive(Clone)]
pub struct StatusProbe {
    /// Daemon name
    pub name: String,
    /// Ledger to summarise
    pub ledger: SharedLedger,
    /// Leg tallies
    pub counters: Arc<DaemonCounters>,
    /// Lifecycle state
    pub state: Arc<StateCell>,
    /// Timestamp source
    pub clock: Arc<dyn Clock>,
}

impl StatusProbe {
    /// Snapshot of the daemon, taken under the ledger lock.
    pub fn status(&self) -> DaemonStatus {
        let (counts, files) = {
            let ledger = self.ledger.lock();
            let files = ledger
                .snapshot()
                .into_iter()
                .map(|item| (item.path.display().to_string(), item.state))
                .collect();
            (ledger.state_counts(), files)
        };
        DaemonStatus {
            name: self.name.clone(),
            state: self.state.get(),
            sent: self.counters.sent(),
            error: self.counters.error(),
            counts,
            files,
            timestamp: self.clock.now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::FileLedger;
    use std::path::Path;

    #[test]
    fn test_state_cell() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), SupervisorState::Init);
        for state in [
            SupervisorState::Running,
            SupervisorState::Stopping,
            SupervisorState::Stopped,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn test_counters() {
        let counters = DaemonCounters::default();
        counters.record_sent();
        counters.record_sent();
        counters.record_error();
        assert_eq!(counters.sent(), 2);
        assert_eq!(counters.error(), 1);
    }

    #[test]
    fn test_probe_snapshot() {
        let ledger = FileLedger::new().shared();
        ledger.lock().touch(Path::new("/in/a.txt"), 1, 1);
        let probe = StatusProbe {
            name: "hosta : /in".into(),
            ledger,
            counters: Arc::new(DaemonCounters::default()),
            state: Arc::new(StateCell::default()),
            clock: Arc::new(ManualClock::new(5_000)),
        };
        probe.counters.record_error();

        let status = probe.status();
        assert_eq!(status.name, "hosta : /in");
        assert_eq!(status.error, 1);
        assert_eq!(status.counts.seen, 1);
        assert_eq!(status.files.get("/in/a.txt"), Some(&FileState::Seen));
        assert_eq!(status.timestamp, 5_000);

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"init\""));
    }
}
