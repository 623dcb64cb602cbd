//! Error taxonomy for the watch loop.
//!
//! Variants split into fatal errors, which stop the process with a non-zero
//! exit status, and per-file errors, which are logged and retried on a later
//! cycle. See [`WatchError::is_fatal`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Configuration is missing, unparseable, or violates an invariant.
    #[error("config error: {0}")]
    Config(String),

    /// The ledger file exists but is not a JSON array of file names.
    #[error("corrupt ledger {}: {source}", path.display())]
    CorruptLedger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The ledger could not be written. The at-most-once guarantee depends on
    /// this write, so the loop must stop.
    #[error("persist ledger {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A watched directory could not be listed.
    #[error("list directory {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The processing collaborator did not exit cleanly.
    #[error("job for {file} failed ({}){}", describe_status(*status), describe_tail(stderr_tail))]
    JobFailed {
        file: String,
        /// Exit code, or `None` when the child was killed, timed out, or never spawned.
        status: Option<i32>,
        /// Trailing stderr lines captured from the child.
        stderr_tail: Vec<String>,
    },

    #[error("copy {} -> {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WatchError {
    /// Fatal errors terminate the process; the rest are logged and skipped.
    pub fn is_fatal(&self) -> bool {
        match self {
            WatchError::Config(_)
            | WatchError::CorruptLedger { .. }
            | WatchError::Persistence { .. }
            | WatchError::Snapshot { .. } => true,
            WatchError::JobFailed { .. } | WatchError::Copy { .. } | WatchError::Delete { .. } => {
                false
            }
        }
    }
}

fn describe_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "no exit status".to_string(),
    }
}

fn describe_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail.join(" | "))
    }
}
