//! Status file: the persisted ledger
//!
//! # Format
//!
//! ```text
//! magic    8 bytes  "R66SPOOL"
//! version  u16 LE   1
//! record*  u32 LE payload length | payload (bincode FileItem) | 8-byte BLAKE3 prefix
//! ```
//!
//! Writes go to a temporary file in the same directory which is synced and
//! then renamed over the previous status file. Reads stop at the first
//! incomplete or corrupt record and keep everything before it.

use crate::error::{Result, SpoolError};
use crate::item::FileItem;
use crate::ledger::FileLedger;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Status file magic
pub const STATUS_MAGIC: &[u8; 8] = b"R66SPOOL";

/// Current format version
pub const STATUS_VERSION: u16 = 1;

const HEADER_LEN: usize = STATUS_MAGIC.len() + 2;
const LEN_PREFIX: usize = 4;
const CHECKSUM_LEN: usize = 8;

/// Result of decoding a status file
#[derive(Debug, Default)]
pub struct Decoded {
    /// Records read before the first bad one
    pub items: Vec<FileItem>,
    /// Bytes dropped after the last good record
    pub dropped_bytes: usize,
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hash = blake3::hash(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LEN]);
    out
}

/// Serialise items to the status file format.
///
/// An item that cannot be encoded is logged and left out; the others are
/// still written.
pub fn encode(items: &[FileItem]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + items.len() * 96);
    out.extend_from_slice(STATUS_MAGIC);
    out.extend_from_slice(&STATUS_VERSION.to_le_bytes());

    for item in items {
        let payload = match bincode::serde::encode_to_vec(item, bincode::config::standard()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Not persisting {}: {}", item.path.display(), e);
                continue;
            }
        };
        let Ok(len) = u32::try_from(payload.len()) else {
            tracing::warn!("Not persisting {}: record too large", item.path.display());
            continue;
        };
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&checksum(&payload));
    }
    Ok(out)
}

/// Parse a status file image.
///
/// An empty image is an empty ledger.
///
/// # Errors
///
/// Returns [`SpoolError::StatusFile`] when the header is not a known status
/// file header.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    if bytes.is_empty() {
        return Ok(Decoded::default());
    }
    if bytes.len() < HEADER_LEN || &bytes[..STATUS_MAGIC.len()] != STATUS_MAGIC {
        return Err(SpoolError::StatusFile("not a status file (bad magic)".into()));
    }
    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != STATUS_VERSION {
        return Err(SpoolError::StatusFile(format!(
            "unsupported status file version {version}"
        )));
    }

    let mut items = Vec::new();
    let mut pos = HEADER_LEN;
    while pos < bytes.len() {
        match decode_record(&bytes[pos..]) {
            Some((item, consumed)) => {
                items.push(item);
                pos += consumed;
            }
            None => break,
        }
    }

    Ok(Decoded {
        items,
        dropped_bytes: bytes.len() - pos,
    })
}

/// One record, or `None` if it is incomplete or corrupt.
fn decode_record(bytes: &[u8]) -> Option<(FileItem, usize)> {
    let len_bytes: [u8; LEN_PREFIX] = bytes.get(..LEN_PREFIX)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let end = LEN_PREFIX.checked_add(len)?;
    let payload = bytes.get(LEN_PREFIX..end)?;
    let sum = bytes.get(end..end + CHECKSUM_LEN)?;
    if sum != checksum(payload) {
        return None;
    }
    let (item, read): (FileItem, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard()).ok()?;
    if read != payload.len() {
        return None;
    }
    Some((item, end + CHECKSUM_LEN))
}

/// Location of a daemon's status file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Status file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger. A missing file is an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::StatusFile`] for a foreign or unsupported file
    /// and [`SpoolError::Io`] if it cannot be read.
    pub fn load(&self) -> Result<FileLedger> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No status file at {}, starting empty", self.path.display());
                return Ok(FileLedger::new());
            }
            Err(e) => return Err(e.into()),
        };

        let decoded = decode(&bytes).map_err(|e| match e {
            SpoolError::StatusFile(msg) => {
                SpoolError::StatusFile(format!("{}: {msg}", self.path.display()))
            }
            other => other,
        })?;
        if decoded.dropped_bytes > 0 {
            tracing::warn!(
                "Status file {} has a damaged tail, dropped {} bytes after {} records",
                self.path.display(),
                decoded.dropped_bytes,
                decoded.items.len()
            );
        }
        tracing::debug!(
            "Loaded {} records from {}",
            decoded.items.len(),
            self.path.display()
        );
        Ok(FileLedger::from_items(decoded.items))
    }

    /// Atomically replace the status file with `items`.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Persistence`] if the file cannot be written.
    pub fn save(&self, items: &[FileItem]) -> Result<()> {
        let bytes = encode(items)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let persist_err =
            |e: std::io::Error| SpoolError::Persistence(format!("{}: {e}", self.path.display()));

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
        tmp.write_all(&bytes).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&self.path).map_err(|e| persist_err(e.error))?;
        Ok(())
    }
}
