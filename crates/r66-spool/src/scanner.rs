//! Directory scanner

use crate::filter::FileFilter;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Absolute canonical path
    pub path: PathBuf,
    /// Length in bytes
    pub size: u64,
    /// Modification time (ms since epoch)
    pub mtime: i64,
}

/// Walks the watched roots and reports matching regular files
///
/// Recursive scans follow symlinks; a file reachable through several links
/// is reported once, under its canonical path. Unreadable entries are logged
/// and skipped.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    roots: Vec<PathBuf>,
    recursive: bool,
    filter: FileFilter,
}

impl DirectoryScanner {
    /// Create a scanner.
    ///
    /// # Arguments
    ///
    /// * `roots` - Directories to scan, in reporting order
    /// * `recursive` - Descend into subdirectories
    /// * `filter` - Filename filter
    pub fn new(roots: Vec<PathBuf>, recursive: bool, filter: FileFilter) -> Self {
        Self {
            roots,
            recursive,
            filter,
        }
    }

    /// Scan every root once. Blocking.
    ///
    /// Results are grouped by root in configuration order, sorted by path
    /// within a root.
    pub fn scan(&self) -> Vec<ScannedFile> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for root in &self.roots {
            let mut found = self.scan_root(root, &mut seen);
            found.sort_by(|a, b| a.path.cmp(&b.path));
            files.extend(found);
        }
        files
    }

    fn scan_root(&self, root: &Path, seen: &mut HashSet<PathBuf>) -> Vec<ScannedFile> {
        let mut walker = WalkDir::new(root).min_depth(1).follow_links(self.recursive);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error walking {}: {}", root.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            if !self.filter.accepts(entry.path(), false) {
                continue;
            }

            // Follow links to files even in non-recursive mode
            let metadata = match std::fs::metadata(entry.path()) {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let path = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if !seen.insert(path.clone()) {
                continue;
            }

            let mtime = metadata
                .modified()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
                .unwrap_or_default();
            found.push(ScannedFile {
                path,
                size: metadata.len(),
                mtime,
            });
        }
        found
    }
}
