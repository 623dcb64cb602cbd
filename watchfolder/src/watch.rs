//! The watch loop: poll both sides, submit new inputs, copy outputs back,
//! and decide when the transfer is finished.
//!
//! One cycle runs to completion before the next starts, including any
//! blocking job. Shutdown requests are honored only between cycles, so the
//! ledger and the copied set are never left half updated.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::decision::{CycleFacts, Decision, advance_streak, decide, is_stable};
use crate::core::types::{CycleState, WatchState};
use crate::error::WatchError;
use crate::io::config::WatchConfig;
use crate::io::job::{JobRunner, runner_from_config};
use crate::io::ledger::Ledger;
use crate::io::snapshot::Snapshot;
use crate::io::transfer::copy_into;

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Run-level switches that come from the command line, not the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Perform copies, spawn jobs, and write the ledger. `false` is a dry run.
    pub execute: bool,
    /// Stop after this many cycles even if the run is not done.
    pub max_cycles: Option<u64>,
}

/// Reason why [`WatchLoop::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStop {
    /// All inputs were submitted and their outputs copied back, or nothing
    /// ever arrived.
    Done,
    /// A shutdown was requested.
    Interrupted,
    /// `max_cycles` was reached.
    CycleLimit,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    pub cycles: u64,
    pub submitted: Vec<String>,
    pub copied: Vec<String>,
    pub stop: WatchStop,
}

/// What happened during one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// 1-indexed cycle number.
    pub cycle: u64,
    pub input_count: usize,
    pub output_count: usize,
    pub idle_streak: u32,
    pub decision: Decision,
    /// State after the decision was applied.
    pub state: WatchState,
    /// Inputs submitted this cycle (planned ones in a dry run).
    pub submitted: Vec<String>,
    /// Outputs copied back this cycle.
    pub copied: Vec<String>,
    /// Inputs whose copy or job failed; retried on a later cycle.
    pub failed: Vec<String>,
}

impl CycleReport {
    fn new(cycle: u64) -> Self {
        Self {
            cycle,
            input_count: 0,
            output_count: 0,
            idle_streak: 0,
            decision: Decision::Wait,
            state: WatchState::Watching,
            submitted: Vec::new(),
            copied: Vec::new(),
            failed: Vec::new(),
        }
    }
}

pub struct WatchLoop<J: JobRunner> {
    config: WatchConfig,
    options: WatchOptions,
    ledger: Ledger,
    runner: J,
    /// Outputs copied back during this process lifetime. Not persisted.
    copied: BTreeSet<String>,
    /// Dry-run stand-in for the ledger so each intended action is logged once.
    planned: BTreeSet<String>,
    cycle: CycleState,
    state: WatchState,
    cycles_run: u64,
}

/// Load the ledger and build the configured job runner.
pub fn open(
    config: WatchConfig,
    options: WatchOptions,
) -> Result<WatchLoop<Box<dyn JobRunner>>, WatchError> {
    let ledger = Ledger::load(&config.submitted)?;
    let runner = runner_from_config(&config)?;
    Ok(WatchLoop::new(config, options, ledger, runner))
}

impl<J: JobRunner> WatchLoop<J> {
    pub fn new(config: WatchConfig, options: WatchOptions, ledger: Ledger, runner: J) -> Self {
        Self {
            config,
            options,
            ledger,
            runner,
            copied: BTreeSet::new(),
            planned: BTreeSet::new(),
            cycle: CycleState::default(),
            state: WatchState::Watching,
            cycles_run: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn cycle_state(&self) -> &CycleState {
        &self.cycle
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn runner(&self) -> &J {
        &self.runner
    }

    pub fn copied(&self) -> impl Iterator<Item = &str> {
        self.copied.iter().map(String::as_str)
    }

    /// Poll until done, interrupted, or the cycle limit is hit.
    ///
    /// `shutdown` is checked before every cycle and while sleeping. Fatal
    /// errors abort the run; everything else is logged inside the cycle.
    pub fn run<F: FnMut(&CycleReport)>(
        &mut self,
        shutdown: &AtomicBool,
        mut on_cycle: F,
    ) -> Result<WatchOutcome, WatchError> {
        info!(
            remote_input = %self.config.remote_input_dir.display(),
            execute = self.options.execute,
            ledger = %self.ledger.path().display(),
            ledger_entries = self.ledger.len(),
            "watching folder"
        );
        let mut submitted = Vec::new();
        let mut copied = Vec::new();

        let stop = loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, stopping between cycles");
                break WatchStop::Interrupted;
            }
            if self
                .options
                .max_cycles
                .is_some_and(|limit| self.cycles_run >= limit)
            {
                info!(cycles = self.cycles_run, "cycle limit reached");
                break WatchStop::CycleLimit;
            }

            let report = self.run_cycle()?;
            submitted.extend(report.submitted.iter().cloned());
            copied.extend(report.copied.iter().cloned());
            on_cycle(&report);

            if self.state == WatchState::Done {
                break WatchStop::Done;
            }
            sleep_unless_shutdown(self.config.poll_interval(), shutdown);
        };

        info!(cycles = self.cycles_run, ?stop, "watch loop stopped");
        Ok(WatchOutcome {
            cycles: self.cycles_run,
            submitted,
            copied,
            stop,
        })
    }

    /// Run one poll cycle without sleeping.
    #[instrument(skip_all, fields(cycle = self.cycles_run + 1))]
    pub fn run_cycle(&mut self) -> Result<CycleReport, WatchError> {
        self.cycles_run += 1;
        let mut report = CycleReport::new(self.cycles_run);

        let inputs = Snapshot::capture(&self.config.remote_input_dir)?;
        report.input_count = inputs.len();
        debug!(input_count = inputs.len(), "input snapshot");

        // The last sorted input may still be mid-transfer; never submit it here.
        let (candidates, withheld) = inputs.split_withheld();
        let mut productive = false;
        for entry in candidates {
            if self.is_handled(&entry.name) {
                continue;
            }
            if self.submit_file(&entry.name, &mut report)? {
                productive = true;
            }
        }

        let outputs = Snapshot::capture(&self.config.massive_output_dir)?;
        report.output_count = outputs.len();
        debug!(output_count = outputs.len(), "output snapshot");
        let (ready, _) = outputs.split_withheld();
        for entry in ready {
            if !self.copied.contains(&entry.name) {
                self.copy_output(&entry.name, &mut report);
            }
        }

        advance_streak(&mut self.cycle, &mut self.state, productive);
        report.idle_streak = self.cycle.idle_streak;
        debug!(idle_streak = self.cycle.idle_streak, "idle streak");

        let facts = CycleFacts {
            state: self.state,
            idle_streak: self.cycle.idle_streak,
            delay: self.config.delay,
            input_count: inputs.len(),
            output_count: outputs.len(),
            withheld_stable: is_stable(self.cycle.last_withheld.as_ref(), withheld),
            withheld_pending: withheld.is_some_and(|last| !self.is_handled(&last.name)),
        };
        let decision = decide(&facts);
        report.decision = decision;
        match decision {
            Decision::SubmitWithheld => {
                if let Some(last) = withheld {
                    self.finalize_last(&last.name, &mut report)?;
                }
            }
            Decision::CopyFinalOutput => {
                if let Some(last) = outputs.last() {
                    self.copy_final_output(&last.name, &mut report);
                }
            }
            Decision::FinishEmpty => {
                info!("no input files found, finishing");
                self.state = WatchState::Done;
            }
            Decision::Drain => {
                debug!("waiting for final outputs");
                self.state = WatchState::Draining;
            }
            Decision::Wait => {}
        }

        self.cycle.last_input_count = inputs.len();
        self.cycle.last_output_count = outputs.len();
        self.cycle.last_withheld = withheld.cloned();
        report.state = self.state;
        Ok(report)
    }

    fn is_handled(&self, name: &str) -> bool {
        self.ledger.contains(name) || self.planned.contains(name)
    }

    /// Stage and submit one input. Returns whether it was submitted.
    ///
    /// Copy and job failures leave the file unrecorded so a later cycle
    /// retries it; a ledger write failure is returned as fatal.
    fn submit_file(&mut self, name: &str, report: &mut CycleReport) -> Result<bool, WatchError> {
        let staged = self.config.massive_input_dir.join(name);
        if !self.options.execute {
            info!(
                file = name,
                staged = %staged.display(),
                output_dir = %self.config.massive_output_dir.display(),
                "dry run: would copy and submit"
            );
            self.planned.insert(name.to_string());
            report.submitted.push(name.to_string());
            return Ok(true);
        }

        if let Err(err) = copy_into(
            &self.config.remote_input_dir,
            name,
            &self.config.massive_input_dir,
        ) {
            warn!(file = name, error = %err, "failed to stage input");
            report.failed.push(name.to_string());
            return Ok(false);
        }

        info!(file = name, "submitting file");
        match self.runner.submit(&staged, &self.config.massive_output_dir) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(file = name, error = %err, "job failed, will retry");
                report.failed.push(name.to_string());
                return Ok(false);
            }
        }

        self.ledger.record(name)?;
        report.submitted.push(name.to_string());
        Ok(true)
    }

    fn finalize_last(&mut self, name: &str, report: &mut CycleReport) -> Result<(), WatchError> {
        if self.is_handled(name) {
            debug!(file = name, "withheld file already submitted");
        } else if self.submit_file(name, report)? {
            info!(file = name, "submitted last file");
        } else {
            return Ok(());
        }

        if self.options.execute {
            self.state = WatchState::FinalizingLast;
        } else {
            info!("dry run: no outputs will appear, finishing");
            self.state = WatchState::Done;
        }
        Ok(())
    }

    fn copy_output(&mut self, name: &str, report: &mut CycleReport) -> bool {
        if !self.options.execute {
            info!(
                file = name,
                to = %self.config.remote_output_dir.display(),
                "dry run: would copy output"
            );
            self.copied.insert(name.to_string());
            return true;
        }
        match copy_into(
            &self.config.massive_output_dir,
            name,
            &self.config.remote_output_dir,
        ) {
            Ok(_) => {
                self.copied.insert(name.to_string());
                report.copied.push(name.to_string());
                true
            }
            Err(err) => {
                warn!(file = name, error = %err, "failed to copy output, will retry");
                false
            }
        }
    }

    fn copy_final_output(&mut self, name: &str, report: &mut CycleReport) {
        if self.copy_output(name, report) {
            info!(
                file = name,
                to = %self.config.remote_output_dir.display(),
                "copied last file"
            );
            self.state = WatchState::Done;
        } else if self.state == WatchState::FinalizingLast {
            self.state = WatchState::Draining;
        }
    }
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}
