//! Shared deterministic types for the watch loop core.
//!
//! These types carry no I/O handles; the loop fills them from directory
//! snapshots and hands them to [`crate::core::decision`].

use std::fmt;
use std::time::SystemTime;

/// One regular file seen in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Lifecycle of a watch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Polling; the last input file is withheld.
    Watching,
    /// The withheld file was submitted this cycle.
    FinalizingLast,
    /// Waiting for the final outputs to appear.
    Draining,
    /// Terminal.
    Done,
}

impl WatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchState::Watching => "watching",
            WatchState::FinalizingLast => "finalizing_last",
            WatchState::Draining => "draining",
            WatchState::Done => "done",
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run counters, mutated once per poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleState {
    /// Consecutive cycles without a new submission.
    pub idle_streak: u32,
    pub last_input_count: usize,
    pub last_output_count: usize,
    /// Withheld input entry seen on the previous cycle.
    pub last_withheld: Option<FileEntry>,
}
