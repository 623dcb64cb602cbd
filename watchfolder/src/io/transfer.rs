//! File copies between the remote and compute sides.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::WatchError;

/// Copy `name` from `from_dir` into `to_dir`, overwriting any existing file.
///
/// Permissions and the modification time are carried over so the copy looks
/// like the source to downstream tools. Returns the destination path.
pub fn copy_into(from_dir: &Path, name: &str, to_dir: &Path) -> Result<PathBuf, WatchError> {
    let from = from_dir.join(name);
    let to = to_dir.join(name);
    let copy_err = |source| WatchError::Copy {
        from: from.clone(),
        to: to.clone(),
        source,
    };

    fs::copy(&from, &to).map_err(copy_err)?;
    let modified = fs::metadata(&from)
        .and_then(|meta| meta.modified())
        .map_err(copy_err)?;
    OpenOptions::new()
        .write(true)
        .open(&to)
        .and_then(|file| file.set_modified(modified))
        .map_err(copy_err)?;

    debug!(from = %from.display(), to = %to.display(), "copied file");
    Ok(to)
}
