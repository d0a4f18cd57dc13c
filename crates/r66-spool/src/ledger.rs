//! File ledger and stability gate
//!
//! The ledger maps every watched path to its [`FileItem`]. [`FileLedger::touch`]
//! is the stability gate: a file becomes `Stable` only after two consecutive
//! scans observe the same size and modification time, and only `Stable`
//! items are handed out by [`FileLedger::take_ready`].
//!
//! # State machine
//!
//! ```text
//!            touch(same)        take_ready          settle
//!   Seen ----------------> Stable ---------> InFlight -------> DoneOk / DoneErr
//!    ^                       |      requeue     |                  |
//!    |                       <------------------+                  |
//!    +-------------------- touch(changed) -------------------------+
//! ```

use crate::item::{FileItem, FileState, Transition};
use parking_lot::Mutex;
use r66_client::SpecialId;
use r66_client::digest::Md5Digest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ledger shared between the supervisor and dispatcher tasks
pub type SharedLedger = Arc<Mutex<FileLedger>>;

/// Number of items per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Items in `Seen`
    pub seen: usize,
    /// Items in `Stable`
    pub stable: usize,
    /// Items in `InFlight`
    pub in_flight: usize,
    /// Items in `DoneOk`
    pub done_ok: usize,
    /// Items in `DoneErr`
    pub done_err: usize,
}

/// In-memory ledger of watched files
#[derive(Debug, Default)]
pub struct FileLedger {
    items: HashMap<PathBuf, FileItem>,
    next_seq: u64,
    dirty: bool,
}

impl FileLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted items.
    ///
    /// Items persisted `InFlight` were interrupted by a crash and become
    /// `Stable` again, keeping their transfer id. Every item starts unvisited.
    pub fn from_items(items: impl IntoIterator<Item = FileItem>) -> Self {
        let mut ledger = Self::new();
        for mut item in items {
            item.used = false;
            if item.state == FileState::InFlight {
                item.state = FileState::Stable;
            }
            ledger.next_seq = ledger.next_seq.max(item.stable_seq + 1);
            ledger.items.insert(item.path.clone(), item);
        }
        ledger
    }

    /// Wrap into a [`SharedLedger`].
    pub fn shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item for `path`.
    pub fn get(&self, path: &Path) -> Option<&FileItem> {
        self.items.get(path)
    }

    /// Record an observation of `path`.
    pub fn touch(&mut self, path: &Path, size: u64, mtime: i64) -> Transition {
        let Some(item) = self.items.get_mut(path) else {
            self.items
                .insert(path.to_path_buf(), FileItem::seen(path.to_path_buf(), size, mtime));
            self.dirty = true;
            return Transition::FirstSeen;
        };

        item.used = true;
        let same = item.same_observation(size, mtime);
        match item.state {
            FileState::InFlight => Transition::Busy,
            FileState::Seen if same => {
                item.state = FileState::Stable;
                item.stable_seq = self.next_seq;
                self.next_seq += 1;
                self.dirty = true;
                Transition::Stabilised
            }
            FileState::Seen => {
                item.size = size;
                item.mtime = mtime;
                self.dirty = true;
                Transition::Changed
            }
            _ if same => Transition::Unchanged,
            prior => {
                // A new content version gets a new transfer; a failed one
                // keeps its id so the restart can resume the same row
                if prior == FileState::DoneOk {
                    item.special_id = SpecialId::ILLEGAL;
                }
                item.state = FileState::Seen;
                item.size = size;
                item.mtime = mtime;
                item.hash = None;
                self.dirty = true;
                Transition::Rearmed
            }
        }
    }

    /// End of a scan cycle: drop settled items that were not observed, then
    /// mark the rest unvisited for the next cycle.
    ///
    /// Items that have not settled yet keep their entry (and transfer id)
    /// even when a scan misses them. Returns the dropped paths, sorted.
    pub fn sweep(&mut self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        self.items.retain(|path, item| {
            if !item.used && item.state.is_settled() {
                removed.push(path.clone());
                false
            } else {
                item.used = false;
                true
            }
        });
        if !removed.is_empty() {
            self.dirty = true;
        }
        removed.sort();
        removed
    }

    /// Move up to `limit` stable items observed in this cycle to `InFlight`,
    /// oldest stable first.
    pub fn take_ready(&mut self, limit: usize, now_ms: i64) -> Vec<FileItem> {
        if limit == 0 {
            return Vec::new();
        }
        let mut ready: Vec<&mut FileItem> = self
            .items
            .values_mut()
            .filter(|item| item.state == FileState::Stable && item.used)
            .collect();
        ready.sort_by_key(|item| item.stable_seq);
        ready.truncate(limit);

        let taken: Vec<FileItem> = ready
            .into_iter()
            .map(|item| {
                item.state = FileState::InFlight;
                item.last_dispatch_at = Some(now_ms);
                item.clone()
            })
            .collect();
        if !taken.is_empty() {
            self.dirty = true;
        }
        taken
    }

    /// Record the end of a dispatch.
    ///
    /// Returns `false` (and changes nothing) if the item is unknown or not in
    /// flight.
    pub fn settle(&mut self, path: &Path, delivered: bool, special_id: SpecialId) -> bool {
        match self.items.get_mut(path) {
            Some(item) if item.state == FileState::InFlight => {
                item.state = if delivered {
                    FileState::DoneOk
                } else {
                    FileState::DoneErr
                };
                item.special_id = special_id;
                self.dirty = true;
                true
            }
            Some(item) => {
                tracing::warn!(
                    "Ignoring settlement of {} in state {}",
                    path.display(),
                    item.state
                );
                false
            }
            None => {
                tracing::warn!("Ignoring settlement of unknown file {}", path.display());
                false
            }
        }
    }

    /// Give back an item that could not be handed to a worker.
    pub fn requeue(&mut self, path: &Path) -> bool {
        match self.items.get_mut(path) {
            Some(item) if item.state == FileState::InFlight => {
                item.state = FileState::Stable;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Store the content digest of an item.
    pub fn record_digest(&mut self, path: &Path, digest: Md5Digest) -> bool {
        match self.items.get_mut(path) {
            Some(item) => {
                item.hash = Some(digest);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Copy of every item, sorted by path.
    pub fn snapshot(&self) -> Vec<FileItem> {
        let mut items: Vec<FileItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        items
    }

    /// Number of items per state.
    pub fn state_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for item in self.items.values() {
            match item.state {
                FileState::Seen => counts.seen += 1,
                FileState::Stable => counts.stable += 1,
                FileState::InFlight => counts.in_flight += 1,
                FileState::DoneOk => counts.done_ok += 1,
                FileState::DoneErr => counts.done_err += 1,
            }
        }
        counts
    }

    /// Whether anything changed since the last [`FileLedger::take_dirty`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force the next persistence pass to write.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Read and clear the change flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
