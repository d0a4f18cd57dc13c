//! Task ledger: the transfer rows of the task-runner database

use crate::error::{ClientError, Result};
use crate::SpecialId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

/// Lifecycle of a transfer row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a server to pick it up
    Submitted,
    /// Being transferred
    Running,
    /// Completed
    Done,
    /// Completed with a warning
    Warning,
    /// Failed
    Error,
}

/// Fields of a row to insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Rule name
    pub rule: String,
    /// Destination host
    pub host: String,
    /// Source file
    pub file: PathBuf,
    /// Opaque transfer information
    pub file_info: String,
    /// Requester host id
    pub requester: String,
    /// Initial status
    pub status: TaskStatus,
    /// Block size
    pub block_size: u32,
    /// MD5 check requested
    pub md5: bool,
}

/// A stored transfer row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    /// Row id
    pub special_id: SpecialId,
    /// Rule name
    pub rule: String,
    /// Destination host
    pub host: String,
    /// Source file
    pub file: PathBuf,
    /// Opaque transfer information
    pub file_info: String,
    /// Requester host id
    pub requester: String,
    /// Current status
    pub status: TaskStatus,
    /// Block size
    pub block_size: u32,
    /// MD5 check requested
    pub md5: bool,
    /// Creation time (ms since epoch)
    pub created_at: i64,
    /// Last status change (ms since epoch)
    pub updated_at: i64,
}

impl TaskRow {
    pub(crate) fn from_new(special_id: SpecialId, task: NewTask) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            special_id,
            rule: task.rule,
            host: task.host,
            file: task.file,
            file_info: task.file_info,
            requester: task.requester,
            status: task.status,
            block_size: task.block_size,
            md5: task.md5,
            created_at: now,
            updated_at: now,
        }
    }

    /// One-line summary used in transfer logs.
    pub fn short_string(&self) -> String {
        format!(
            "<ID>{}</ID> <RULE>{}</RULE> <HOST>{}</HOST> <FILE>{}</FILE> <STATUS>{:?}</STATUS>",
            self.special_id,
            self.rule,
            self.host,
            self.file.display(),
            self.status
        )
    }
}

/// Transfer rows shared with R66 servers
///
/// Implementations must be thread-safe; the engine calls them from every
/// worker.
pub trait TaskLedger: Send + Sync {
    /// Whether a database stands behind this ledger (required to submit).
    fn is_connected(&self) -> bool;

    /// Insert a row and allocate its id.
    ///
    /// # Errors
    ///
    /// Returns an error when the row cannot be stored.
    fn insert(&self, task: NewTask) -> Result<SpecialId>;

    /// Fetch a row.
    ///
    /// # Errors
    ///
    /// Returns an error when the ledger cannot be read.
    fn get(&self, special_id: SpecialId) -> Result<Option<TaskRow>>;

    /// Change the status of a row.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TaskNotFound`] when the row does not exist.
    fn update_status(&self, special_id: SpecialId, status: TaskStatus) -> Result<()>;

    /// Delete a row.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TaskNotFound`] when the row does not exist.
    fn delete(&self, special_id: SpecialId) -> Result<()>;
}

/// In-memory task ledger
///
/// A *detached* ledger still allocates ids (like a client running without
/// database) but reports itself as not connected, so submissions are refused.
#[derive(Debug)]
pub struct MemoryTaskLedger {
    rows: DashMap<SpecialId, TaskRow>,
    next_id: AtomicI64,
    connected: bool,
}

impl MemoryTaskLedger {
    /// Ledger backed by a (simulated) database.
    pub fn connected() -> Self {
        Self::with_connection(true)
    }

    /// Ledger without database.
    pub fn detached() -> Self {
        Self::with_connection(false)
    }

    fn with_connection(connected: bool) -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
            connected,
        }
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row is stored.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows, ordered by id.
    pub fn rows(&self) -> Vec<TaskRow> {
        let mut rows: Vec<TaskRow> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by_key(|r| r.special_id);
        rows
    }
}

impl TaskLedger for MemoryTaskLedger {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn insert(&self, task: NewTask) -> Result<SpecialId> {
        let special_id = SpecialId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.rows
            .insert(special_id, TaskRow::from_new(special_id, task));
        Ok(special_id)
    }

    fn get(&self, special_id: SpecialId) -> Result<Option<TaskRow>> {
        Ok(self.rows.get(&special_id).map(|r| r.value().clone()))
    }

    fn update_status(&self, special_id: SpecialId, status: TaskStatus) -> Result<()> {
        let mut row = self
            .rows
            .get_mut(&special_id)
            .ok_or(ClientError::TaskNotFound(special_id))?;
        row.status = status;
        row.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(())
    }

    fn delete(&self, special_id: SpecialId) -> Result<()> {
        self.rows
            .remove(&special_id)
            .map(|_| ())
            .ok_or(ClientError::TaskNotFound(special_id))
    }
}
