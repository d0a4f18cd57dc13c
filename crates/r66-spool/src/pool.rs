//! Bounded worker pool
//!
//! Dispatch futures run as tokio tasks; a semaphore bounds how many run at
//! once. [`WorkerPool::submit`] waits for a free slot, which slows the
//! scanner down to the pace of the workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// One worker
    Sequential,
    /// Up to N workers
    Parallel(usize),
}

impl PoolMode {
    /// Mode for `workers` concurrent tasks.
    pub fn for_workers(workers: usize) -> Self {
        if workers <= 1 {
            PoolMode::Sequential
        } else {
            PoolMode::Parallel(workers)
        }
    }

    /// Number of workers.
    pub fn workers(self) -> usize {
        match self {
            PoolMode::Sequential => 1,
            PoolMode::Parallel(n) => n.max(1),
        }
    }
}

/// Returned by [`WorkerPool::submit`] once the pool is closing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("worker pool is shutting down")]
pub struct Rejected;

/// Outcome of [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that finished during the drain
    pub completed: usize,
    /// Tasks cancelled at the deadline
    pub aborted: usize,
}

/// Bounded executor for dispatch tasks
#[derive(Debug)]
pub struct WorkerPool {
    mode: PoolMode,
    slots: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    /// Create a pool.
    pub fn new(mode: PoolMode) -> Self {
        Self {
            mode,
            slots: Arc::new(Semaphore::new(mode.workers())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Pool sizing.
    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    /// Run `task` once a slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`] if the pool is closed, including while waiting.
    pub async fn submit<F>(&self, task: F) -> Result<(), Rejected>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Rejected)?;

        let mut tasks = self.tasks.lock().await;
        Self::reap(&mut tasks);
        tasks.spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }

    fn reap(tasks: &mut JoinSet<()>) {
        while let Some(res) = tasks.try_join_next() {
            if let Err(e) = res
                && e.is_panic()
            {
                tracing::error!("Dispatch task panicked: {}", e);
            }
        }
    }

    /// Free slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.mode.workers().saturating_sub(self.slots.available_permits())
    }

    /// Whether the pool rejects new work.
    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Stop accepting work. Waiting submitters are released with
    /// [`Rejected`]; running tasks continue.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Wait until every submitted task has finished.
    pub async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res
                && e.is_panic()
            {
                tracing::error!("Dispatch task panicked: {}", e);
            }
        }
    }

    /// Close the pool and wait up to `timeout` for running tasks, then abort
    /// whatever is left.
    pub async fn shutdown(&self, timeout: Duration) -> DrainReport {
        self.close();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut tasks = self.tasks.lock().await;
        let mut report = DrainReport::default();

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => report.completed += 1,
                Ok(None) => break,
                Err(_) => {
                    report.aborted = tasks.len();
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        if report.aborted > 0 {
            tracing::warn!(
                "Aborted {} dispatch tasks still running after {} ms",
                report.aborted,
                timeout.as_millis()
            );
        }
        report
    }
}
