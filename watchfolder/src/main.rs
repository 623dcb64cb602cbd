//! Watch a remote acquisition folder and feed new files to a processing job.
//!
//! Without `--execute` every run is a dry run that only logs what it would do.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};

use watchfolder::exit_codes;
use watchfolder::io::config::{WatchConfig, load_config};
use watchfolder::io::reset::reset;
use watchfolder::logging;
use watchfolder::watch::{self, WatchOptions, WatchStop};

#[derive(Debug, Parser)]
#[command(
    name = "watchfolder",
    version,
    about = "Monitor a folder for new files and submit them for processing",
    arg_required_else_help = true
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long)]
    config: PathBuf,

    /// Perform copies, submissions, and deletions. Without it, only log them.
    #[arg(short, long)]
    execute: bool,

    /// Clear the ledger and the contents of all watched folders, then exit.
    #[arg(short, long)]
    reset: bool,

    /// Stop after this many poll cycles.
    #[arg(long, value_name = "N")]
    max_cycles: Option<u64>,
}

fn main() {
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    let level = logging::parse_level(&config.log_level)?;
    let _guard = logging::init(level, config.log_files.watch.as_deref())?;

    // Log while the file writer is still alive.
    dispatch(&cli, config).inspect_err(|err| error!(error = %format!("{err:#}"), "fatal error"))
}

fn dispatch(cli: &Cli, config: WatchConfig) -> Result<i32> {
    if !cli.execute {
        info!("dry run: pass --execute to act");
    }

    if cli.reset {
        let report = reset(&config, cli.execute);
        info!(
            removed = report.removed.len(),
            failures = report.failures.len(),
            "reset finished"
        );
        if !report.is_clean() {
            warn!("some entries could not be deleted");
        }
        return Ok(exit_codes::OK);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let mut watch_loop = watch::open(
        config,
        WatchOptions {
            execute: cli.execute,
            max_cycles: cli.max_cycles,
        },
    )?;
    let outcome = watch_loop.run(&shutdown, |report| {
        debug!(
            cycle = report.cycle,
            state = %report.state,
            inputs = report.input_count,
            outputs = report.output_count,
            idle_streak = report.idle_streak,
            "cycle finished"
        );
    })?;

    info!(
        cycles = outcome.cycles,
        submitted = outcome.submitted.len(),
        copied = outcome.copied.len(),
        "finished"
    );
    Ok(match outcome.stop {
        WatchStop::Done | WatchStop::CycleLimit => exit_codes::OK,
        WatchStop::Interrupted => exit_codes::INTERRUPTED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_flags() {
        let cli = Cli::parse_from(["watchfolder", "-c", "config.toml", "-e"]);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert!(cli.execute);
        assert!(!cli.reset);
        assert_eq!(cli.max_cycles, None);
    }

    #[test]
    fn parse_reset_and_cycle_limit() {
        let cli = Cli::parse_from([
            "watchfolder",
            "--config",
            "config.toml",
            "--reset",
            "--max-cycles",
            "3",
        ]);
        assert!(cli.reset);
        assert!(!cli.execute);
        assert_eq!(cli.max_cycles, Some(3));
    }

    #[test]
    fn config_is_required() {
        assert!(Cli::try_parse_from(["watchfolder", "--execute"]).is_err());
    }
}
