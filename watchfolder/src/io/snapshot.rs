//! Point-in-time directory listings.

use std::fs;
use std::path::Path;

use tracing::warn;

pub use crate::core::types::FileEntry;
use crate::error::WatchError;

/// Files of a directory at one instant, sorted by name.
///
/// A listing may include a file an external producer is still writing; the
/// watch loop compensates for that, the snapshot does not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<FileEntry>,
}

impl Snapshot {
    pub fn capture(dir: &Path) -> Result<Self, WatchError> {
        let snapshot_err = |source| WatchError::Snapshot {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(snapshot_err)? {
            let entry = entry.map_err(snapshot_err)?;
            // Follows symlinks so a linked image counts as a file.
            let meta = match fs::metadata(entry.path()) {
                Ok(meta) => meta,
                // Vanished between readdir and stat.
                Err(_) => continue,
            };
            if !meta.is_file() {
                continue;
            }
            // Names travel through the ledger as JSON strings and are joined
            // back onto paths, so a lossy name would never resolve.
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(dir = %dir.display(), name = ?raw, "skipping file with non-UTF-8 name");
                    continue;
                }
            };
            entries.push(FileEntry {
                name,
                len: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Lexicographically last entry.
    pub fn last(&self) -> Option<&FileEntry> {
        self.entries.last()
    }

    /// Split into (candidates, withheld): everything but the last entry, and the last.
    pub fn split_withheld(&self) -> (&[FileEntry], Option<&FileEntry>) {
        match self.entries.split_last() {
            Some((last, rest)) => (rest, Some(last)),
            None => (&[], None),
        }
    }
}

/// File names in `dir`, sorted, directories excluded.
pub fn list(dir: &Path) -> Result<Vec<String>, WatchError> {
    Ok(Snapshot::capture(dir)?.names().map(str::to_string).collect())
}
