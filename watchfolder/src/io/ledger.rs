//! Submission ledger: the persisted set of file names already sent for processing.
//!
//! The ledger is the only durable state of the watch loop. Every `record`
//! rewrites the whole sorted set through a temp file and a rename, so a reader
//! never observes a partial write. A name that reached disk is never
//! submitted again, even across restarts.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::WatchError;

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    names: BTreeSet<String>,
}

impl Ledger {
    /// Load the ledger at `path`. A missing file yields an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, WatchError> {
        let path = path.into();
        debug!(path = %path.display(), "loading ledger");
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("ledger absent, starting empty");
                return Ok(Self {
                    path,
                    names: BTreeSet::new(),
                });
            }
            Err(err) => return Err(WatchError::Persistence { path, source: err }),
        };
        let names: Vec<String> = serde_json::from_str(&contents)
            .map_err(|source| WatchError::CorruptLedger {
                path: path.clone(),
                source,
            })?;
        debug!(count = names.len(), "ledger loaded");
        Ok(Self {
            path,
            names: names.into_iter().collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Add `name` and persist the full set before returning.
    ///
    /// Returns `Ok(false)` without touching disk when the name is already
    /// present. On a failed write the name is removed again so memory and disk
    /// agree.
    pub fn record(&mut self, name: &str) -> Result<bool, WatchError> {
        if !self.names.insert(name.to_string()) {
            return Ok(false);
        }
        if let Err(err) = self.persist() {
            self.names.remove(name);
            return Err(err);
        }
        info!(file = name, total = self.names.len(), "recorded submission");
        Ok(true)
    }

    /// Delete the backing file. A missing file is not an error.
    pub fn clear(path: &Path) -> Result<(), WatchError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WatchError::Delete {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn persist(&self) -> Result<(), WatchError> {
        let names: Vec<&str> = self.names().collect();
        let mut buf = serde_json::to_string_pretty(&names).map_err(|err| {
            WatchError::Persistence {
                path: self.path.clone(),
                source: io::Error::other(err),
            }
        })?;
        buf.push('\n');
        write_atomic(&self.path, &buf).map_err(|source| WatchError::Persistence {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write through a uniquely named temp file in the same directory, fsync it,
/// rename over `path`, then fsync the directory so the rename survives a crash.
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".ledger-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
