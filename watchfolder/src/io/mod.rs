//! I/O helpers for the watch loop.

pub mod config;
pub mod job;
pub mod ledger;
pub mod process;
pub mod reset;
pub mod snapshot;
pub mod template;
pub mod transfer;
