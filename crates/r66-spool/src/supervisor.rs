//! Daemon supervisor
//!
//! Owns one spooled daemon from validation to shutdown:
//!
//! ```text
//! Init --validate/load--> Running --stop file | stop() | fault--> Stopping --drain/flush--> Stopped
//! ```
//!
//! While running, every `elapse` the supervisor scans the roots, feeds the
//! observations to the stability gate, hands stable files to the worker
//! pool, drops settled entries that vanished and persists the ledger. It is
//! the only writer of the status file; dispatch tasks mark the ledger dirty
//! and wake it up.

use crate::clock::{Clock, SystemClock, Ticker};
use crate::config::{MIN_BLOCK_SIZE, SpoolConfig, TransferMode};
use crate::dispatcher::TransferDispatcher;
use crate::error::{Result, SpoolError};
use crate::filter::FileFilter;
use crate::heartbeat::HeartbeatEmitter;
use crate::item::Transition;
use crate::ledger::{FileLedger, SharedLedger};
use crate::pool::{DrainReport, PoolMode, WorkerPool};
use crate::scanner::DirectoryScanner;
use crate::status::{DaemonCounters, DaemonStatus, StateCell, StatusProbe, SupervisorState};
use crate::status_file::StatusFile;
use r66_client::{RuleCatalog, TaskLedger, TransferClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};
use tokio::task::{JoinError, JoinHandle};

/// Consecutive status file write failures tolerated before stopping
pub const MAX_PERSIST_FAILURES: u32 = 3;

/// External collaborators of a daemon
#[derive(Clone)]
pub struct Collaborators {
    /// Transfer client
    pub client: Arc<dyn TransferClient>,
    /// Rule catalog
    pub catalog: Arc<dyn RuleCatalog>,
    /// Task ledger
    pub tasks: Arc<dyn TaskLedger>,
    /// Wall clock
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators using the system clock.
    pub fn new(
        client: Arc<dyn TransferClient>,
        catalog: Arc<dyn RuleCatalog>,
        tasks: Arc<dyn TaskLedger>,
    ) -> Self {
        Self {
            client,
            catalog,
            tasks,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Final account of a daemon run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolReport {
    /// Daemon name
    pub name: String,
    /// Successful legs
    pub sent: u64,
    /// Failed legs
    pub error: u64,
    /// State at return
    pub state: SupervisorState,
    /// Worker drain outcome
    pub drain: DrainReport,
}

/// What one scan cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Files found by the scan
    pub scanned: usize,
    /// Files handed to the pool
    pub dispatched: usize,
    /// Entries dropped from the ledger
    pub removed: Vec<PathBuf>,
    /// Stop file present at the end of the cycle
    pub stop_requested: bool,
}

/// Control handle of a running daemon
#[derive(Clone)]
pub struct SupervisorHandle {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    pool: Arc<WorkerPool>,
    probe: StatusProbe,
}

impl SupervisorHandle {
    /// Ask the daemon to stop. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        // Release a supervisor parked on a full pool
        self.pool.close();
        self.wake.notify_one();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.probe.state.get()
    }

    /// Current status snapshot.
    pub fn status(&self) -> DaemonStatus {
        self.probe.status()
    }
}

type Heartbeat = (watch::Sender<bool>, JoinHandle<()>);

/// Lifecycle owner of one spooled daemon
pub struct Supervisor {
    config: Arc<SpoolConfig>,
    collab: Collaborators,
    ledger: SharedLedger,
    status_file: StatusFile,
    scanner: Option<Arc<DirectoryScanner>>,
    pool: Arc<WorkerPool>,
    dispatcher: Arc<TransferDispatcher>,
    probe: StatusProbe,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    settled: Arc<Notify>,
    persist_failures: u32,
    heartbeat: Option<Heartbeat>,
}

impl Supervisor {
    /// Build a daemon. Periods below their minimum are raised.
    pub fn new(mut config: SpoolConfig, collab: Collaborators) -> Self {
        config.clamp();
        let config = Arc::new(config);
        let ledger = FileLedger::new().shared();
        let counters = Arc::new(DaemonCounters::default());
        let settled = Arc::new(Notify::new());

        let scanner = FileFilter::new(config.regex.as_deref()).ok().map(|filter| {
            Arc::new(DirectoryScanner::new(
                config.directories.clone(),
                config.recursive,
                filter,
            ))
        });
        let dispatcher = Arc::new(TransferDispatcher::new(
            config.clone(),
            ledger.clone(),
            collab.client.clone(),
            collab.catalog.clone(),
            collab.tasks.clone(),
            counters.clone(),
            settled.clone(),
        ));
        let probe = StatusProbe {
            name: config.name.clone(),
            ledger: ledger.clone(),
            counters,
            state: Arc::new(StateCell::default()),
            clock: collab.clock.clone(),
        };

        Self {
            status_file: StatusFile::new(&config.status_file),
            pool: Arc::new(WorkerPool::new(PoolMode::for_workers(config.worker_count()))),
            config,
            collab,
            ledger,
            scanner,
            dispatcher,
            probe,
            stop_flag: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            settled,
            persist_failures: 0,
            heartbeat: None,
        }
    }

    /// Daemon name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Effective configuration.
    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.probe.state.get()
    }

    /// The daemon's file ledger.
    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    /// Control handle, usable from other tasks.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            stop_flag: self.stop_flag.clone(),
            wake: self.wake.clone(),
            pool: self.pool.clone(),
            probe: self.probe.clone(),
        }
    }

    /// Check the configuration against the file system and collaborators.
    ///
    /// Has no side effect on the file system.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Validation`] (or [`SpoolError::Regex`]) naming
    /// the first problem found.
    pub fn validate(&self) -> Result<()> {
        let config = &self.config;
        let invalid = |msg: String| Err(SpoolError::Validation(format!("{}: {msg}", config.name)));

        if config.directories.is_empty() {
            return invalid("no directory to watch".into());
        }
        for dir in &config.directories {
            if !dir.is_dir() {
                return invalid(format!("{} is not a directory", dir.display()));
            }
        }
        if config.status_file.is_dir() {
            return invalid(format!(
                "status file {} is a directory",
                config.status_file.display()
            ));
        }
        if config.stop_file.is_dir() {
            return invalid(format!(
                "stop file {} is a directory",
                config.stop_file.display()
            ));
        }
        if config.hosts().next().is_none() {
            return invalid("no remote host".into());
        }
        if config.block_size < MIN_BLOCK_SIZE {
            return invalid(format!(
                "block size {} is below {}",
                config.block_size, MIN_BLOCK_SIZE
            ));
        }
        FileFilter::new(config.regex.as_deref())?;

        match self.collab.catalog.rule(&config.rule) {
            Ok(rule) if rule.mode.is_recv() => {
                return invalid(format!("rule {} is a receive rule ({})", rule.name, rule.mode));
            }
            Ok(_) => {}
            Err(e) => return invalid(e.to_string()),
        }
        if config.mode == TransferMode::Submit && !self.collab.tasks.is_connected() {
            return invalid("submit mode needs a connected task database".into());
        }
        Ok(())
    }

    /// Validate, check the stop file and load the status file.
    ///
    /// Returns `Ok(false)` when the stop file is already present: the daemon
    /// is then `Stopped` without having run.
    ///
    /// # Errors
    ///
    /// Returns the validation or status file error; the daemon is then
    /// `Stopped`.
    pub async fn prepare(&mut self) -> Result<bool> {
        if let Err(e) = self.validate() {
            self.probe.state.set(SupervisorState::Stopped);
            return Err(e);
        }

        if self.config.stop_file.is_file() {
            tracing::warn!(
                "{}: stop file {} already present, not starting",
                self.config.name,
                self.config.stop_file.display()
            );
            self.probe.state.set(SupervisorState::Stopped);
            return Ok(false);
        }

        let status_file = self.status_file.clone();
        let loaded = match tokio::task::spawn_blocking(move || status_file.load()).await {
            Ok(Ok(ledger)) => ledger,
            Ok(Err(e)) => {
                self.probe.state.set(SupervisorState::Stopped);
                return Err(e);
            }
            Err(e) => {
                self.probe.state.set(SupervisorState::Stopped);
                return Err(e.into());
            }
        };
        *self.ledger.lock() = loaded;

        self.probe.state.set(SupervisorState::Running);
        self.start_heartbeat();
        tracing::warn!(
            "{}: spooled directory started ({:?} mode, {} workers, every {} ms)",
            self.config.name,
            self.config.mode,
            self.pool.mode().workers(),
            self.config.elapse.as_millis()
        );
        Ok(true)
    }

    fn start_heartbeat(&mut self) {
        let observers: Vec<String> = self.config.observers().map(String::from).collect();
        if observers.is_empty() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        let emitter = HeartbeatEmitter::new(
            self.collab.client.clone(),
            observers,
            self.config.elapse_waarp,
            self.probe.clone(),
        );
        self.heartbeat = Some((tx, emitter.spawn(rx)));
    }

    /// Run one scan cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Fault`] when the status file could not be
    /// written [`MAX_PERSIST_FAILURES`] times in a row.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let scanner = self
            .scanner
            .clone()
            .ok_or_else(|| SpoolError::Validation(format!("{}: invalid regex", self.config.name)))?;
        let scanned = tokio::task::spawn_blocking(move || scanner.scan()).await?;

        {
            let mut ledger = self.ledger.lock();
            for file in &scanned {
                match ledger.touch(&file.path, file.size, file.mtime) {
                    Transition::FirstSeen => {
                        tracing::debug!("New file {}", file.path.display());
                    }
                    Transition::Rearmed => {
                        tracing::info!("File {} modified, will be sent again", file.path.display());
                    }
                    _ => {}
                }
            }
        }

        let limit = self.pool.available_slots() + self.pool.mode().workers();
        let now = self.collab.clock.now_ms();
        let ready = self.ledger.lock().take_ready(limit, now);

        let mut dispatched = 0;
        for item in ready {
            let path = item.path.clone();
            let dispatcher = self.dispatcher.clone();
            let submitted = self
                .pool
                .submit(async move {
                    dispatcher.dispatch(item).await;
                })
                .await;
            match submitted {
                Ok(()) => dispatched += 1,
                Err(_) => {
                    self.ledger.lock().requeue(&path);
                }
            }
        }

        let removed = self.ledger.lock().sweep();
        for path in &removed {
            tracing::warn!("File removed: {}", path.display());
        }

        self.persist(false).await?;

        Ok(CycleReport {
            scanned: scanned.len(),
            dispatched,
            removed,
            stop_requested: self.config.stop_file.is_file(),
        })
    }

    /// Write the status file if the ledger changed.
    async fn persist(&mut self, force: bool) -> Result<()> {
        let items = {
            let mut ledger = self.ledger.lock();
            if !ledger.take_dirty() && !force {
                return Ok(());
            }
            ledger.snapshot()
        };

        let status_file = self.status_file.clone();
        let saved = match tokio::task::spawn_blocking(move || status_file.save(&items)).await {
            Ok(res) => res,
            Err(e) => Err(e.into()),
        };

        match saved {
            Ok(()) => {
                self.persist_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.ledger.lock().mark_dirty();
                self.persist_failures += 1;
                tracing::warn!(
                    "{}: cannot write status file ({}/{}): {}",
                    self.config.name,
                    self.persist_failures,
                    MAX_PERSIST_FAILURES,
                    e
                );
                if self.persist_failures >= MAX_PERSIST_FAILURES {
                    Err(SpoolError::Fault(format!(
                        "status file {} not writable: {e}",
                        self.status_file.path().display()
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Write the status file now.
    ///
    /// # Errors
    ///
    /// Returns the persistence error, if any.
    pub async fn flush(&mut self) -> Result<()> {
        self.persist(true).await
    }

    /// Wait until no dispatch is running.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    /// Drain workers, stop the heartbeat and flush the ledger.
    pub async fn finish(&mut self) -> SpoolReport {
        self.probe.state.set(SupervisorState::Stopping);
        tracing::info!("{}: stopping", self.config.name);

        let drain = self.pool.shutdown(self.config.shutdown_timeout).await;

        if let Some((tx, handle)) = self.heartbeat.take() {
            let _ = tx.send(true);
            if let Err(e) = handle.await {
                tracing::warn!("{}: heartbeat task failed: {}", self.config.name, e);
            }
        }

        if let Err(e) = self.persist(true).await {
            tracing::error!("{}: final status flush failed: {}", self.config.name, e);
        }

        self.probe.state.set(SupervisorState::Stopped);
        let report = self.report(drain);
        tracing::warn!(
            "{}: stopped, {} sent, {} error",
            report.name,
            report.sent,
            report.error
        );
        report
    }

    fn report(&self, drain: DrainReport) -> SpoolReport {
        SpoolReport {
            name: self.config.name.clone(),
            sent: self.probe.counters.sent(),
            error: self.probe.counters.error(),
            state: self.probe.state.get(),
            drain,
        }
    }

    /// Run the daemon until the stop file appears, [`SupervisorHandle::stop`]
    /// is called or a fatal fault occurs.
    ///
    /// # Errors
    ///
    /// Returns validation and status file errors raised before running, and
    /// the fault that stopped a running daemon (after draining).
    pub async fn run(mut self) -> Result<SpoolReport> {
        if !self.prepare().await? {
            return Ok(self.report(DrainReport::default()));
        }

        let wake = self.wake.clone();
        let settled = self.settled.clone();
        let mut ticker = Ticker::immediate(self.config.elapse);
        let mut fault = None;

        while !self.stop_flag.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(cycle) if cycle.stop_requested => {
                            tracing::info!(
                                "{}: stop file {} found",
                                self.config.name,
                                self.config.stop_file.display()
                            );
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            fault = Some(e);
                            break;
                        }
                    }
                }
                _ = wake.notified() => {}
                _ = settled.notified() => {
                    if let Err(e) = self.persist(false).await {
                        fault = Some(e);
                        break;
                    }
                }
                res = heartbeat_exit(&mut self.heartbeat) => {
                    self.heartbeat = None;
                    let detail = match res {
                        Ok(()) => "exited".to_string(),
                        Err(e) => e.to_string(),
                    };
                    fault = Some(SpoolError::Fault(format!("heartbeat task {detail}")));
                    break;
                }
            }
        }

        if let Some(e) = &fault {
            tracing::error!("{}: {}", self.config.name, e);
        }
        let report = self.finish().await;
        match fault {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Resolves when the heartbeat task ends; never when there is none.
async fn heartbeat_exit(heartbeat: &mut Option<Heartbeat>) -> std::result::Result<(), JoinError> {
    match heartbeat {
        Some((_, handle)) => handle.await,
        None => std::future::pending().await,
    }
}
