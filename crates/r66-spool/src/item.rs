//! Ledger entries

use r66_client::SpecialId;
use r66_client::digest::Md5Digest;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Dispatch state of a watched file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileState {
    /// Observed once, or changed since last observation
    Seen,
    /// Observed twice with identical size and mtime
    Stable,
    /// A dispatcher task owns it
    InFlight,
    /// At least one host leg succeeded
    DoneOk,
    /// Every host leg failed
    DoneErr,
}

impl FileState {
    /// Whether dispatch finished (successfully or not).
    pub fn is_settled(self) -> bool {
        matches!(self, FileState::DoneOk | FileState::DoneErr)
    }

    /// Label used in logs and heartbeats.
    pub fn as_str(self) -> &'static str {
        match self {
            FileState::Seen => "seen",
            FileState::Stable => "stable",
            FileState::InFlight => "in_flight",
            FileState::DoneOk => "done_ok",
            FileState::DoneErr => "done_err",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One watched file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    /// Absolute canonical path
    #[serde(with = "os_path")]
    pub path: PathBuf,
    /// Last observed length
    pub size: u64,
    /// Last observed modification time (ms since epoch)
    pub mtime: i64,
    /// MD5 of the content, when computed for dispatch
    pub hash: Option<Md5Digest>,
    /// Transfer id, [`SpecialId::ILLEGAL`] until assigned
    pub special_id: SpecialId,
    /// Dispatch state
    pub state: FileState,
    /// Observed during the current scan cycle
    pub used: bool,
    /// When the item was last taken for dispatch (ms since epoch)
    pub last_dispatch_at: Option<i64>,
    /// Order in which items became stable
    pub stable_seq: u64,
}

impl FileItem {
    /// A freshly observed file.
    pub fn seen(path: PathBuf, size: u64, mtime: i64) -> Self {
        Self {
            path,
            size,
            mtime,
            hash: None,
            special_id: SpecialId::ILLEGAL,
            state: FileState::Seen,
            used: true,
            last_dispatch_at: None,
            stable_seq: 0,
        }
    }

    /// Whether `(size, mtime)` equals the last observation.
    pub fn same_observation(&self, size: u64, mtime: i64) -> bool {
        self.size == size && self.mtime == mtime
    }
}

/// Paths as raw OS bytes, so names that are not UTF-8 persist unchanged
mod os_path {
    use super::*;

    #[cfg(unix)]
    fn to_bytes(path: &Path) -> Vec<u8> {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    }

    #[cfg(unix)]
    fn from_bytes(bytes: Vec<u8>) -> PathBuf {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }

    #[cfg(not(unix))]
    fn to_bytes(path: &Path) -> Vec<u8> {
        path.to_string_lossy().into_owned().into_bytes()
    }

    #[cfg(not(unix))]
    fn from_bytes(bytes: Vec<u8>) -> PathBuf {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        to_bytes(path).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        Vec::<u8>::deserialize(deserializer).map(from_bytes)
    }
}

/// What a `touch` did to an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// New item, now `Seen`
    FirstSeen,
    /// `Seen` with identical values, now `Stable`
    Stabilised,
    /// Modified after settling (or while waiting), back to `Seen`
    Rearmed,
    /// A dispatcher owns the item; nothing changed
    Busy,
    /// Still `Seen`, values updated
    Changed,
    /// Nothing to do
    Unchanged,
}
