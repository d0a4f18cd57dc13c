//! Append-only JSON-lines task journal
//!
//! Every mutation appends one line; the current state is the replay of the
//! journal. A torn last line (crash during append) is skipped on open.

use crate::error::{ClientError, Result};
use crate::task::{NewTask, TaskLedger, TaskRow, TaskStatus};
use crate::SpecialId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Put { row: TaskRow },
    Delete { special_id: SpecialId },
}

struct JournalState {
    file: File,
    rows: HashMap<SpecialId, TaskRow>,
    next_id: i64,
}

/// Task ledger persisted as a JSON-lines journal
///
/// This is the "shared database" of the file-based deployment: it is always
/// connected, so submissions are accepted.
pub struct JournalTaskLedger {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl JournalTaskLedger {
    /// Open (or create) the journal at `path` and replay it.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut rows = HashMap::new();
        let mut next_id = 1;
        let mut torn = false;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            torn = !content.is_empty() && !content.ends_with('\n');
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(JournalEntry::Put { row }) => {
                        next_id = next_id.max(row.special_id.get() + 1);
                        rows.insert(row.special_id, row);
                    }
                    Ok(JournalEntry::Delete { special_id }) => {
                        next_id = next_id.max(special_id.get() + 1);
                        rows.remove(&special_id);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Skipping unreadable journal line {} in {}: {}",
                            line_no + 1,
                            path.display(),
                            e
                        );
                    }
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if torn {
            // Terminate the torn line so the next entry starts on its own line
            file.write_all(b"\n")?;
        }
        tracing::debug!(
            "Opened task journal {} ({} rows, next id {})",
            path.display(),
            rows.len(),
            next_id
        );

        Ok(Self {
            path,
            state: Mutex::new(JournalState {
                file,
                rows,
                next_id,
            }),
        })
    }

    /// Journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live rows, ordered by id.
    pub fn rows(&self) -> Vec<TaskRow> {
        let state = self.state.lock();
        let mut rows: Vec<TaskRow> = state.rows.values().cloned().collect();
        rows.sort_by_key(|r| r.special_id);
        rows
    }

    fn append(file: &mut File, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

impl TaskLedger for JournalTaskLedger {
    fn is_connected(&self) -> bool {
        true
    }

    fn insert(&self, task: NewTask) -> Result<SpecialId> {
        let mut state = self.state.lock();
        let special_id = SpecialId::new(state.next_id);
        let row = TaskRow::from_new(special_id, task);
        Self::append(&mut state.file, &JournalEntry::Put { row: row.clone() })?;
        state.next_id += 1;
        state.rows.insert(special_id, row);
        Ok(special_id)
    }

    fn get(&self, special_id: SpecialId) -> Result<Option<TaskRow>> {
        Ok(self.state.lock().rows.get(&special_id).cloned())
    }

    fn update_status(&self, special_id: SpecialId, status: TaskStatus) -> Result<()> {
        let mut state = self.state.lock();
        let mut row = state
            .rows
            .get(&special_id)
            .cloned()
            .ok_or(ClientError::TaskNotFound(special_id))?;
        row.status = status;
        row.updated_at = chrono::Utc::now().timestamp_millis();
        Self::append(&mut state.file, &JournalEntry::Put { row: row.clone() })?;
        state.rows.insert(special_id, row);
        Ok(())
    }

    fn delete(&self, special_id: SpecialId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.rows.contains_key(&special_id) {
            return Err(ClientError::TaskNotFound(special_id));
        }
        Self::append(&mut state.file, &JournalEntry::Delete { special_id })?;
        state.rows.remove(&special_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_task(file: &str) -> NewTask {
        NewTask {
            rule: "out".into(),
            host: "hostb".into(),
            file: PathBuf::from(file),
            file_info: "noinfo".into(),
            requester: "hosta".into(),
            status: TaskStatus::Submitted,
            block_size: 4096,
            md5: true,
        }
    }

    #[test]
    fn test_journal_replay_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");

        let (kept, dropped) = {
            let journal = JournalTaskLedger::open(&path).unwrap();
            let kept = journal.insert(new_task("/spool/a")).unwrap();
            let dropped = journal.insert(new_task("/spool/b")).unwrap();
            journal.update_status(kept, TaskStatus::Done).unwrap();
            journal.delete(dropped).unwrap();
            (kept, dropped)
        };

        let journal = JournalTaskLedger::open(&path).unwrap();
        let rows = journal.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].special_id, kept);
        assert_eq!(rows[0].status, TaskStatus::Done);
        assert!(journal.get(dropped).unwrap().is_none());

        // Ids keep increasing past deleted rows
        let next = journal.insert(new_task("/spool/c")).unwrap();
        assert!(next > dropped);
    }

    #[test]
    fn test_journal_skips_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");

        {
            let journal = JournalTaskLedger::open(&path).unwrap();
            journal.insert(new_task("/spool/a")).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{\"op\":\"put\",\"row\":{\"special_").unwrap();
        }

        let journal = JournalTaskLedger::open(&path).unwrap();
        assert_eq!(journal.rows().len(), 1);
        assert!(journal.is_connected());
    }

    #[test]
    fn test_journal_unknown_row() {
        let dir = TempDir::new().unwrap();
        let journal = JournalTaskLedger::open(dir.path().join("tasks.jsonl")).unwrap();
        assert!(matches!(
            journal.update_status(SpecialId::new(5), TaskStatus::Done),
            Err(ClientError::TaskNotFound(_))
        ));
    }
}
