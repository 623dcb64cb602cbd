//! Reset controller: wipe the ledger and watched directories for a fresh run.
//!
//! Every deletion is best effort. A locked or vanished file is logged and
//! skipped so a stuck pipeline can always be reset.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::WatchError;
use crate::io::config::WatchConfig;
use crate::io::ledger::Ledger;

/// What a reset removed, or would have removed in a dry run.
#[derive(Debug, Default)]
pub struct ResetReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<WatchError>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Delete the ledger file, then the contents (not the directories) of all
/// four watched directories. With `execute == false` only logs.
pub fn reset(cfg: &WatchConfig, execute: bool) -> ResetReport {
    let mut report = ResetReport::default();

    info!(path = %cfg.submitted.display(), "clearing ledger");
    if execute {
        let existed = cfg.submitted.exists();
        match Ledger::clear(&cfg.submitted) {
            Ok(()) if existed => report.removed.push(cfg.submitted.clone()),
            Ok(()) => {}
            Err(err) => {
                warn!(error = %err, "failed to delete ledger");
                report.failures.push(err);
            }
        }
    } else if cfg.submitted.exists() {
        info!(path = %cfg.submitted.display(), "dry run: would delete ledger");
    }

    for (key, dir) in cfg.watched_dirs() {
        info!(key, dir = %dir.display(), "deleting directory contents");
        clear_dir(dir, execute, &mut report);
    }
    report
}

fn clear_dir(dir: &Path, execute: bool, report: &mut ResetReport) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) => {
            let err = WatchError::Delete {
                path: dir.to_path_buf(),
                source,
            };
            warn!(error = %err, "failed to list directory for reset");
            report.failures.push(err);
            return;
        }
    };

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(source) => {
                report.failures.push(WatchError::Delete {
                    path: dir.to_path_buf(),
                    source,
                });
                continue;
            }
        };
        if !execute {
            info!(path = %path.display(), "dry run: would delete");
            continue;
        }
        // symlink_metadata so a link to a directory is unlinked, not followed.
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => report.removed.push(path),
            Err(source) => {
                let err = WatchError::Delete { path, source };
                warn!(error = %err, "failed to delete");
                report.failures.push(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestDirs;

    #[test]
    fn reset_removes_contents_but_keeps_directories() {
        let dirs = TestDirs::new().expect("dirs");
        let cfg = dirs.config(&["true"]);
        dirs.add_input("a.tif", "a").expect("input");
        fs::write(dirs.massive_output.join("a.tif"), "out").expect("output");
        fs::create_dir(dirs.remote_output.join("nested")).expect("nested");
        fs::write(dirs.remote_output.join("nested/b.tif"), "b").expect("nested file");
        fs::write(&cfg.submitted, "[\"a.tif\"]\n").expect("ledger");

        let report = reset(&cfg, true);

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert!(!cfg.submitted.exists());
        for (_, dir) in cfg.watched_dirs() {
            assert!(dir.is_dir());
            assert_eq!(fs::read_dir(dir).expect("read dir").count(), 0);
        }
        assert_eq!(report.removed.len(), 4);
    }

    #[test]
    fn reset_twice_matches_reset_once() {
        let dirs = TestDirs::new().expect("dirs");
        let cfg = dirs.config(&["true"]);
        dirs.add_input("a.tif", "a").expect("input");

        reset(&cfg, true);
        let second = reset(&cfg, true);

        assert!(second.is_clean());
        assert!(second.removed.is_empty());
        for (_, dir) in cfg.watched_dirs() {
            assert_eq!(fs::read_dir(dir).expect("read dir").count(), 0);
        }
    }

    #[test]
    fn dry_run_reset_deletes_nothing() {
        let dirs = TestDirs::new().expect("dirs");
        let cfg = dirs.config(&["true"]);
        dirs.add_input("a.tif", "a").expect("input");
        fs::write(&cfg.submitted, "[]\n").expect("ledger");

        let report = reset(&cfg, false);

        assert!(report.removed.is_empty());
        assert!(cfg.submitted.exists());
        assert!(dirs.remote_input.join("a.tif").exists());
    }

    #[test]
    fn missing_directory_is_reported_not_fatal() {
        let dirs = TestDirs::new().expect("dirs");
        let mut cfg = dirs.config(&["true"]);
        cfg.remote_output_dir = dirs.root().join("vanished");
        dirs.add_input("a.tif", "a").expect("input");

        let report = reset(&cfg, true);

        assert_eq!(report.failures.len(), 1);
        assert!(!dirs.remote_input.join("a.tif").exists());
    }
}
