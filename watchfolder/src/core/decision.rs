//! Deterministic end-of-cycle decisions for the watch loop.

use crate::core::types::{CycleState, FileEntry, WatchState};

/// Facts gathered during one cycle, evaluated after the idle streak update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleFacts {
    pub state: WatchState,
    pub idle_streak: u32,
    /// Idle cycles required before the withheld file is released.
    pub delay: u32,
    pub input_count: usize,
    pub output_count: usize,
    /// The withheld input is unchanged since the previous cycle.
    pub withheld_stable: bool,
    /// The withheld input is neither in the ledger nor planned. A file that
    /// arrives after finalization lands here without a productive cycle.
    pub withheld_pending: bool,
}

/// What the loop does at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Submit the withheld last input, then move to `FinalizingLast`.
    SubmitWithheld,
    /// Copy the withheld last output back, then stop (`Done`).
    CopyFinalOutput,
    /// No input ever appeared; stop (`Done`).
    FinishEmpty,
    /// Outputs still outstanding after finalizing; move to `Draining`.
    Drain,
    /// Sleep and poll again in the current state.
    Wait,
}

/// Evaluate the decision table, first match wins.
///
/// - `Watching` or a pending withheld input, idle for `delay` cycles, at least
///   one input, withheld stable → [`Decision::SubmitWithheld`]
/// - finalizing or draining, nothing pending, idle for `delay`, and
///   `output_count >= input_count` → [`Decision::CopyFinalOutput`]. Extra
///   files in the output directory do not hold the run open.
/// - idle for `delay` with no inputs → [`Decision::FinishEmpty`]
/// - `FinalizingLast` otherwise → [`Decision::Drain`]
/// - otherwise → [`Decision::Wait`]
pub fn decide(facts: &CycleFacts) -> Decision {
    let idle = facts.idle_streak >= facts.delay;
    let has_input = facts.input_count > 0;
    let finalizing = matches!(
        facts.state,
        WatchState::FinalizingLast | WatchState::Draining
    );

    let releasable = facts.state == WatchState::Watching || facts.withheld_pending;

    if releasable && idle && has_input && facts.withheld_stable {
        Decision::SubmitWithheld
    } else if finalizing
        && !facts.withheld_pending
        && idle
        && has_input
        && facts.output_count >= facts.input_count
    {
        Decision::CopyFinalOutput
    } else if idle && !has_input {
        Decision::FinishEmpty
    } else if facts.state == WatchState::FinalizingLast {
        Decision::Drain
    } else {
        Decision::Wait
    }
}

/// Apply the productive/idle outcome of a cycle.
///
/// A productive cycle means new input arrived, so a run that was finalizing
/// goes back to watching.
pub fn advance_streak(cycle: &mut CycleState, state: &mut WatchState, productive: bool) {
    if productive {
        cycle.idle_streak = 0;
        if matches!(*state, WatchState::FinalizingLast | WatchState::Draining) {
            *state = WatchState::Watching;
        }
    } else {
        cycle.idle_streak = cycle.idle_streak.saturating_add(1);
    }
}

/// The withheld entry counts as stable when it matches the previous cycle's
/// withheld entry by name, size, and modification time.
pub fn is_stable(previous: Option<&FileEntry>, current: Option<&FileEntry>) -> bool {
    match (previous, current) {
        (Some(prev), Some(cur)) => prev == cur,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(state: WatchState, idle_streak: u32, inputs: usize, outputs: usize) -> CycleFacts {
        CycleFacts {
            state,
            idle_streak,
            delay: 2,
            input_count: inputs,
            output_count: outputs,
            withheld_stable: true,
            withheld_pending: false,
        }
    }

    fn entry(name: &str, len: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            len,
            modified: None,
        }
    }

    #[test]
    fn waits_until_idle_threshold() {
        assert_eq!(decide(&facts(WatchState::Watching, 1, 3, 2)), Decision::Wait);
        assert_eq!(
            decide(&facts(WatchState::Watching, 2, 3, 2)),
            Decision::SubmitWithheld
        );
    }

    #[test]
    fn unstable_withheld_file_is_not_submitted() {
        let mut f = facts(WatchState::Watching, 5, 1, 0);
        f.withheld_stable = false;
        assert_eq!(decide(&f), Decision::Wait);
    }

    #[test]
    fn finalizing_copies_final_output_once_counts_match() {
        assert_eq!(
            decide(&facts(WatchState::FinalizingLast, 3, 3, 3)),
            Decision::CopyFinalOutput
        );
        assert_eq!(
            decide(&facts(WatchState::Draining, 4, 3, 3)),
            Decision::CopyFinalOutput
        );
    }

    #[test]
    fn extra_outputs_still_finish() {
        assert_eq!(
            decide(&facts(WatchState::Draining, 2, 2, 5)),
            Decision::CopyFinalOutput
        );
    }

    #[test]
    fn late_withheld_file_is_released_while_draining() {
        let mut f = facts(WatchState::Draining, 6, 2, 1);
        f.withheld_pending = true;
        assert_eq!(decide(&f), Decision::SubmitWithheld);

        f.withheld_stable = false;
        assert_eq!(decide(&f), Decision::Wait);
    }

    #[test]
    fn pending_withheld_file_blocks_final_copy() {
        let mut f = facts(WatchState::Draining, 6, 2, 2);
        f.withheld_pending = true;
        f.withheld_stable = false;
        assert_eq!(decide(&f), Decision::Wait);
    }

    #[test]
    fn finalizing_without_outputs_drains() {
        assert_eq!(
            decide(&facts(WatchState::FinalizingLast, 3, 3, 2)),
            Decision::Drain
        );
        assert_eq!(decide(&facts(WatchState::Draining, 4, 3, 2)), Decision::Wait);
    }

    #[test]
    fn empty_input_finishes_after_threshold() {
        assert_eq!(decide(&facts(WatchState::Watching, 1, 0, 0)), Decision::Wait);
        assert_eq!(
            decide(&facts(WatchState::Watching, 2, 0, 0)),
            Decision::FinishEmpty
        );
    }

    #[test]
    fn zero_delay_acts_on_first_cycle() {
        let mut f = facts(WatchState::Watching, 0, 0, 0);
        f.delay = 0;
        assert_eq!(decide(&f), Decision::FinishEmpty);
    }

    #[test]
    fn productive_cycle_resets_streak_and_state() {
        let mut cycle = CycleState {
            idle_streak: 4,
            ..CycleState::default()
        };
        let mut state = WatchState::Draining;

        advance_streak(&mut cycle, &mut state, true);
        assert_eq!(cycle.idle_streak, 0);
        assert_eq!(state, WatchState::Watching);

        advance_streak(&mut cycle, &mut state, false);
        assert_eq!(cycle.idle_streak, 1);
        assert_eq!(state, WatchState::Watching);
    }

    #[test]
    fn stability_requires_identical_entry() {
        let a = entry("c.tif", 10);
        assert!(is_stable(Some(&a), Some(&entry("c.tif", 10))));
        assert!(!is_stable(Some(&a), Some(&entry("c.tif", 11))));
        assert!(!is_stable(Some(&a), Some(&entry("d.tif", 10))));
        assert!(!is_stable(None, Some(&a)));
    }
}
