//! # R66 Spool
//!
//! Spooled-directory transfer engine.
//!
//! A daemon watches one or more directories, waits until each file has been
//! observed unchanged on two consecutive scans, then sends it to every
//! configured remote host through a [`r66_client::TransferClient`]. The
//! per-file state survives restarts in a status file, so a file delivered
//! before a crash is not sent again.
//!
//! ## Architecture
//!
//! - [`supervisor`]: daemon lifecycle, scan loop and shutdown
//! - [`scanner`] and [`filter`]: directory walking and name filtering
//! - [`ledger`] and [`item`]: per-file state machine and stability gate
//! - [`dispatcher`] and [`pool`]: fan-out of stable files to hosts
//! - [`status_file`]: checksummed persistence of the ledger
//! - [`heartbeat`] and [`status`]: status broadcast to observer hosts
//!
//! ## Example
//!
//! ```no_run
//! use r66_client::{MemoryTaskLedger, OutboxClient, RuleMode, StaticRuleCatalog};
//! use r66_spool::{Collaborators, SpoolConfig, Supervisor, TransferMode};
//! use std::sync::Arc;
//!
//! # async fn example() -> r66_spool::Result<()> {
//! let tasks = Arc::new(MemoryTaskLedger::detached());
//! let client = Arc::new(OutboxClient::new("/var/r66/out", "hosta", tasks.clone()));
//! let catalog = StaticRuleCatalog::new("hosta").with_rule("send", RuleMode::Send);
//!
//! let mut config = SpoolConfig::new(
//!     vec!["/var/spool/in".into()],
//!     "/var/spool/in.status",
//!     "/var/spool/in.stop",
//!     "send",
//!     vec!["hostb".into()],
//! );
//! config.mode = TransferMode::Direct;
//!
//! let report = Supervisor::new(config, Collaborators::new(client, Arc::new(catalog), tasks))
//!     .run()
//!     .await?;
//! println!("{} sent, {} error", report.sent, report.error);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod heartbeat;
pub mod item;
pub mod ledger;
pub mod pool;
pub mod scanner;
pub mod status;
pub mod status_file;
pub mod supervisor;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SpoolConfig, TransferMode};
pub use error::{Result, SpoolError};
pub use item::{FileItem, FileState};
pub use ledger::{FileLedger, SharedLedger, StateCounts};
pub use pool::{DrainReport, PoolMode, WorkerPool};
pub use status::{DaemonStatus, SupervisorState};
pub use status_file::StatusFile;
pub use supervisor::{Collaborators, CycleReport, SpoolReport, Supervisor, SupervisorHandle};
