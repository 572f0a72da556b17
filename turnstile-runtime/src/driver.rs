//! Deterministic round-robin driver.
//!
//! Each step pops the next machine off the runtime's ready queue, runs one
//! turn, then advances every monitor's liveness temperature. The run ends
//! when nothing is ready, when the step bound is reached, or at the first
//! bug if the configuration asks for it.

use crate::runtime::{BugReport, Runtime};
use serde::{Deserialize, Serialize};
use turnstile_core::TurnOutcome;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No machine had work left.
    Quiescent,
    /// A bug was recorded.
    Bug,
    /// The step bound was reached.
    StepLimit,
}

/// Outcome of a driver run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub steps: u64,
    pub stop_reason: StopReason,
    pub bug: Option<BugReport>,
    /// Display names of the machines that halted.
    pub halted: Vec<String>,
}

impl RunSummary {
    pub fn found_bug(&self) -> bool {
        self.bug.is_some()
    }
}

/// Drives a runtime one turn at a time.
pub struct Driver<'a> {
    runtime: &'a Runtime,
}

impl<'a> Driver<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Runs until quiescence, the step bound, or the first bug.
    pub fn run(&self) -> RunSummary {
        let testing = &self.runtime.config().testing;
        let limit = testing.step_limit();
        let mut steps = 0u64;

        let stop_reason = loop {
            if testing.stop_on_first_bug && self.runtime.bug().is_some() {
                break StopReason::Bug;
            }
            if limit.is_some_and(|limit| steps >= limit) {
                break StopReason::StepLimit;
            }
            if !self.step() {
                break StopReason::Quiescent;
            }
            steps += 1;
        };

        let bug = self.runtime.bug();
        let stop_reason = match (stop_reason, &bug) {
            (StopReason::Quiescent, Some(_)) if testing.stop_on_first_bug => StopReason::Bug,
            (reason, _) => reason,
        };
        tracing::info!("Run stopped after {} steps: {:?}", steps, stop_reason);

        RunSummary {
            steps,
            stop_reason,
            bug,
            halted: self
                .runtime
                .halted_machines()
                .iter()
                .map(|id| id.to_string())
                .collect(),
        }
    }

    /// Runs one turn of the next ready machine. Returns false when nothing
    /// is ready.
    pub fn step(&self) -> bool {
        let Some(id) = self.runtime.next_ready() else {
            return false;
        };

        // Errors are recorded as bugs by the runtime itself.
        if let Ok(TurnOutcome::Halted) = self.runtime.run_turn(&id) {
            tracing::debug!("{} halted during its turn", id);
        }
        let _ = self.runtime.check_liveness();
        true
    }
}
