//! Iteration Controller.
//!
//! The only component that ends a run. After each coverage report it either
//! terminates (target met, plateaued, budget exhausted, checked in that
//! order) or requests more scenarios for the least covered operations.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::coverage::{CoverageMap, CoverageReport};
use crate::domain::{ForgeError, ForgeResult, HistoryEntry, IterationState, OperationModel, TerminationReason};

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Jobs for the current iteration are running.
    Collecting,
    /// Jobs drained; waiting for the report.
    Evaluating,
    RequestingMore,
    Terminated(TerminationReason),
}

/// What the pipeline does next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run another iteration focused on these operation signatures.
    Continue { priority: Vec<String> },
    Terminate(TerminationReason),
}

/// Fixed limits for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub target_percent: f64,
    pub max_iterations: u32,
    pub plateau_epsilon: f64,
    pub plateau_patience: u32,
    pub low_coverage_ratio: f64,
    pub wall_clock_budget: Option<Duration>,
}

impl From<&RunConfig> for Limits {
    fn from(config: &RunConfig) -> Self {
        Self {
            target_percent: config.target_percent,
            max_iterations: config.max_iterations,
            plateau_epsilon: config.plateau_epsilon,
            plateau_patience: config.plateau_patience,
            low_coverage_ratio: config.low_coverage_ratio,
            wall_clock_budget: config.wall_clock_budget(),
        }
    }
}

pub struct IterationController {
    limits: Limits,
    state: IterationState,
    phase: Phase,
    flat_streak: u32,
    started: Instant,
}

/// Consecutive trailing iterations whose improvement stayed below `epsilon`.
fn trailing_flat_streak(history: &[HistoryEntry], epsilon: f64) -> u32 {
    let mut streak = 0;
    let mut previous = 0.0;
    for entry in history {
        if entry.line_percent - previous < epsilon {
            streak += 1;
        } else {
            streak = 0;
        }
        previous = entry.line_percent;
    }
    streak
}

impl IterationController {
    pub fn new(run_id: impl Into<String>, limits: Limits) -> Self {
        let state = IterationState::new(run_id, limits.target_percent, limits.max_iterations);
        Self::resume(state, limits)
    }

    /// Continue from a persisted state. The wall-clock budget restarts.
    pub fn resume(state: IterationState, limits: Limits) -> Self {
        let flat_streak = trailing_flat_streak(&state.history, limits.plateau_epsilon);
        let phase = match state.termination {
            Some(reason) => Phase::Terminated(reason),
            None => Phase::RequestingMore,
        };
        Self {
            limits,
            state,
            phase,
            flat_streak,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }

    /// Time left before the wall-clock budget runs out, if one is set.
    pub fn remaining_budget(&self) -> Option<Duration> {
        self.limits
            .wall_clock_budget
            .map(|budget| budget.saturating_sub(self.started.elapsed()))
    }

    pub fn budget_exceeded(&self) -> bool {
        self.remaining_budget().map_or(false, |left| left.is_zero())
    }

    /// Start the next iteration and return its number.
    pub fn begin_iteration(&mut self) -> ForgeResult<u32> {
        if let Phase::Terminated(reason) = self.phase {
            return Err(ForgeError::InvalidState(format!("run already terminated: {}", reason)));
        }
        self.state.iteration += 1;
        self.phase = Phase::Collecting;
        Ok(self.state.iteration)
    }

    /// Every job of the current iteration has returned.
    pub fn jobs_drained(&mut self) {
        if self.phase == Phase::Collecting {
            self.phase = Phase::Evaluating;
        }
    }

    /// End the run immediately (wall-clock budget hit mid-iteration).
    pub fn terminate(&mut self, reason: TerminationReason) {
        if self.is_terminated() {
            return;
        }
        self.state.termination = Some(reason);
        self.state.finished_at = Some(Utc::now());
        self.phase = Phase::Terminated(reason);
        info!(reason = %reason, iteration = self.state.iteration, "Run terminated");
    }

    /// Record the iteration's report and decide what happens next.
    ///
    /// `candidates` are the operations that can still receive scenarios;
    /// `coverage` is the cumulative map the report was taken from.
    pub fn evaluate(
        &mut self,
        report: &CoverageReport,
        coverage: &CoverageMap,
        candidates: &[OperationModel],
    ) -> ForgeResult<Decision> {
        if self.is_terminated() {
            return Err(ForgeError::InvalidState("evaluate after termination".to_string()));
        }
        if report.iteration != self.state.iteration {
            return Err(ForgeError::InvalidState(format!(
                "report for iteration {} while iteration {} is current",
                report.iteration, self.state.iteration
            )));
        }
        self.phase = Phase::Evaluating;

        let previous = self.state.latest_percent();
        let improvement = report.line_percent - previous;
        self.state.history.push(HistoryEntry {
            iteration: report.iteration,
            report_id: report.id.clone(),
            line_percent: report.line_percent,
        });
        if improvement < self.limits.plateau_epsilon {
            self.flat_streak += 1;
        } else {
            self.flat_streak = 0;
        }
        debug!(
            line_percent = report.line_percent,
            improvement,
            flat_streak = self.flat_streak,
            "Iteration evaluated"
        );

        let reason = if report.line_percent >= self.limits.target_percent {
            Some(TerminationReason::TargetMet)
        } else if self.flat_streak >= self.limits.plateau_patience {
            Some(TerminationReason::Plateaued)
        } else if self.state.iteration >= self.limits.max_iterations || self.budget_exceeded() {
            Some(TerminationReason::BudgetExhausted)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.terminate(reason);
            return Ok(Decision::Terminate(reason));
        }

        self.phase = Phase::RequestingMore;
        Ok(Decision::Continue {
            priority: self.priority_list(coverage, candidates),
        })
    }

    /// Candidate signatures whose observed line ratio is below the low
    /// coverage ratio, least covered first. Operations with no recorded
    /// function count as uncovered.
    pub fn priority_list(&self, coverage: &CoverageMap, candidates: &[OperationModel]) -> Vec<String> {
        let mut ranked: Vec<(f64, String)> = candidates
            .iter()
            .map(|op| (coverage.operation_ratio(op).unwrap_or(0.0), op.signature()))
            .filter(|(ratio, _)| *ratio < self.limits.low_coverage_ratio)
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        ranked.dedup_by(|a, b| a.1 == b.1);
        ranked.into_iter().map(|(_, sig)| sig).collect()
    }
}
