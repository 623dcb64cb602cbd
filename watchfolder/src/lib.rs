//! Watch-folder pipeline for ferrying acquisition files to a compute cluster.
//!
//! Images land in a remote input directory while a microscope is still
//! writing them. The watch loop stages finished files into the compute input
//! directory, runs the processing collaborator on each one exactly once, and
//! copies results back to the remote output directory. The split follows:
//!
//! - **[`core`]**: Pure, deterministic logic (idle streak, withhold-last and
//!   finalize decisions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, ledger, directory
//!   listings, copies, child processes, reset).
//!
//! [`watch`] coordinates core logic with I/O to implement the poll loop.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watch;
