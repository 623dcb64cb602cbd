//! Stable exit codes for the watchfolder CLI.

/// The run finished, the reset completed, or the cycle limit was reached.
pub const OK: i32 = 0;
/// Fatal error: bad config, corrupt ledger, ledger write failure, or an
/// unreadable watched directory.
pub const FATAL: i32 = 1;
/// Stopped by Ctrl-C between cycles.
pub const INTERRUPTED: i32 = 130;
