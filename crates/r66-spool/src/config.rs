//! Daemon configuration
//!
//! A [`SpoolConfig`] is built once (from flags or from the XML file), clamped
//! with [`SpoolConfig::clamp`] and then shared read-only by every component.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default delay between two scans
pub const DEFAULT_ELAPSE: Duration = Duration::from_millis(1000);

/// Shortest accepted delay between two scans
pub const MIN_ELAPSE: Duration = Duration::from_millis(100);

/// Default delay between two heartbeats
pub const DEFAULT_ELAPSE_WAARP: Duration = Duration::from_millis(5000);

/// Heartbeat periods must be strictly above this
pub const MIN_ELAPSE_WAARP: Duration = Duration::from_millis(1000);

/// Default transfer block size
pub const DEFAULT_BLOCK_SIZE: u32 = 65536;

/// Smallest accepted transfer block size
pub const MIN_BLOCK_SIZE: u32 = 100;

/// Transfer information used when none is given
pub const DEFAULT_FILE_INFO: &str = "noinfo";

/// Default drain deadline on shutdown (`TIMEOUTCON`)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration =
    Duration::from_millis(r66_client::DEFAULT_TIMEOUTCON_MS);

/// How a file leg reaches its host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferMode {
    /// Open a transport and stream the file now
    Direct,
    /// Insert a row for an R66 server to execute later
    #[default]
    Submit,
}

/// Configuration of one spooled daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolConfig {
    /// Instance name, used as heartbeat label
    pub name: String,
    /// Watched roots, in order
    pub directories: Vec<PathBuf>,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Filename pattern (whole name must match), none to accept all
    pub regex: Option<String>,
    /// Delay between scans
    pub elapse: Duration,
    /// Persisted ledger
    pub status_file: PathBuf,
    /// Sentinel whose appearance stops the daemon
    pub stop_file: PathBuf,
    /// SEND rule
    pub rule: String,
    /// Destination hosts
    pub remote_hosts: Vec<String>,
    /// Opaque transfer information
    pub file_info: String,
    /// Require an MD5 check
    pub md5: bool,
    /// Transfer block size
    pub block_size: u32,
    /// Direct or submit
    pub mode: TransferMode,
    /// Delete task rows of successful direct transfers
    pub nolog: bool,
    /// Dispatch several files at once (direct mode only)
    pub parallel: bool,
    /// Worker bound when parallel, 0 for the CPU count
    pub limit_parallel: usize,
    /// Heartbeat observers
    pub waarp_hosts: Vec<String>,
    /// Delay between heartbeats
    pub elapse_waarp: Duration,
    /// Drain deadline on shutdown
    pub shutdown_timeout: Duration,
}

impl SpoolConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(
        directories: Vec<PathBuf>,
        status_file: impl Into<PathBuf>,
        stop_file: impl Into<PathBuf>,
        rule: impl Into<String>,
        remote_hosts: Vec<String>,
    ) -> Self {
        Self {
            name: String::new(),
            directories,
            recursive: false,
            regex: None,
            elapse: DEFAULT_ELAPSE,
            status_file: status_file.into(),
            stop_file: stop_file.into(),
            rule: rule.into(),
            remote_hosts,
            file_info: DEFAULT_FILE_INFO.to_string(),
            md5: false,
            block_size: DEFAULT_BLOCK_SIZE,
            mode: TransferMode::Submit,
            nolog: false,
            parallel: true,
            limit_parallel: 0,
            waarp_hosts: Vec::new(),
            elapse_waarp: DEFAULT_ELAPSE_WAARP,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Name used when none is configured: `"<hostid> : <directories>"`.
    pub fn default_name(host_id: &str, directories: &[PathBuf]) -> String {
        let dirs: Vec<String> = directories
            .iter()
            .map(|d| d.display().to_string())
            .collect();
        format!("{} : {}", host_id, dirs.join(","))
    }

    /// Raise periods below their minimum, logging each adjustment.
    pub fn clamp(&mut self) {
        if self.elapse < MIN_ELAPSE {
            tracing::warn!(
                "{}: elapse {} ms is below {} ms, using {} ms",
                self.name,
                self.elapse.as_millis(),
                MIN_ELAPSE.as_millis(),
                MIN_ELAPSE.as_millis()
            );
            self.elapse = MIN_ELAPSE;
        }
        if self.elapse_waarp <= MIN_ELAPSE_WAARP {
            let raised = MIN_ELAPSE_WAARP + Duration::from_millis(1);
            tracing::warn!(
                "{}: elapseWaarp {} ms must be above {} ms, using {} ms",
                self.name,
                self.elapse_waarp.as_millis(),
                MIN_ELAPSE_WAARP.as_millis(),
                raised.as_millis()
            );
            self.elapse_waarp = raised;
        }
    }

    /// Trimmed, non-empty destination hosts.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        trimmed(&self.remote_hosts)
    }

    /// Trimmed, non-empty heartbeat observers.
    pub fn observers(&self) -> impl Iterator<Item = &str> {
        trimmed(&self.waarp_hosts)
    }

    /// Number of concurrent dispatches: 1 in submit mode or when sequential,
    /// otherwise `limit_parallel` (0 meaning the CPU count).
    pub fn worker_count(&self) -> usize {
        if self.mode == TransferMode::Submit || !self.parallel {
            1
        } else if self.limit_parallel == 0 {
            num_cpus::get().max(1)
        } else {
            self.limit_parallel
        }
    }

    /// `nolog` only applies to direct transfers.
    pub fn effective_nolog(&self) -> bool {
        self.nolog && self.mode == TransferMode::Direct
    }
}

fn trimmed(values: &[String]) -> impl Iterator<Item = &str> {
    values.iter().map(|v| v.trim()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpoolConfig {
        SpoolConfig::new(
            vec![PathBuf::from("/tmp/in")],
            "/tmp/status",
            "/tmp/stop",
            "out",
            vec!["hostA".into()],
        )
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.elapse, Duration::from_millis(1000));
        assert_eq!(cfg.elapse_waarp, Duration::from_millis(5000));
        assert_eq!(cfg.block_size, 65536);
        assert_eq!(cfg.mode, TransferMode::Submit);
        assert_eq!(cfg.file_info, "noinfo");
        assert!(cfg.parallel);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_default_name() {
        let name = SpoolConfig::default_name(
            "hosta",
            &[PathBuf::from("/in/a"), PathBuf::from("/in/b")],
        );
        assert_eq!(name, "hosta : /in/a,/in/b");
    }

    #[test]
    fn test_clamp_raises_short_periods() {
        let mut cfg = config();
        cfg.elapse = Duration::from_millis(10);
        cfg.elapse_waarp = Duration::from_millis(1000);
        cfg.clamp();
        assert_eq!(cfg.elapse, MIN_ELAPSE);
        assert!(cfg.elapse_waarp > MIN_ELAPSE_WAARP);

        let mut cfg = config();
        cfg.elapse = Duration::from_millis(200);
        cfg.elapse_waarp = Duration::from_millis(1100);
        cfg.clamp();
        assert_eq!(cfg.elapse, Duration::from_millis(200));
        assert_eq!(cfg.elapse_waarp, Duration::from_millis(1100));
    }

    #[test]
    fn test_worker_count() {
        let mut cfg = config();
        assert_eq!(cfg.worker_count(), 1, "submit mode is sequential");

        cfg.mode = TransferMode::Direct;
        cfg.limit_parallel = 2;
        assert_eq!(cfg.worker_count(), 2);

        cfg.limit_parallel = 0;
        assert_eq!(cfg.worker_count(), num_cpus::get().max(1));

        cfg.parallel = false;
        assert_eq!(cfg.worker_count(), 1);
    }

    #[test]
    fn test_nolog_only_in_direct_mode() {
        let mut cfg = config();
        cfg.nolog = true;
        assert!(!cfg.effective_nolog());
        cfg.mode = TransferMode::Direct;
        assert!(cfg.effective_nolog());
    }

    #[test]
    fn test_hosts_are_trimmed() {
        let mut cfg = config();
        cfg.remote_hosts = vec![" hostA ".into(), "".into(), "hostB".into(), "  ".into()];
        assert_eq!(cfg.hosts().collect::<Vec<_>>(), vec!["hostA", "hostB"]);
    }
}
