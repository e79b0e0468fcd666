//! Run-level iteration state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    TargetMet,
    Plateaued,
    BudgetExhausted,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::TargetMet => "target-met",
            TerminationReason::Plateaued => "plateaued",
            TerminationReason::BudgetExhausted => "budget-exhausted",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed iteration as recorded in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    /// Identifier of the CoverageReport produced by the iteration.
    pub report_id: String,
    pub line_percent: f64,
}

/// Iteration bookkeeping for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub run_id: String,
    /// Current (or last completed) iteration, 1-based; 0 before the first.
    pub iteration: u32,
    pub target_percent: f64,
    pub max_iterations: u32,
    pub history: Vec<HistoryEntry>,
    pub termination: Option<TerminationReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IterationState {
    pub fn new(run_id: impl Into<String>, target_percent: f64, max_iterations: u32) -> Self {
        Self {
            run_id: run_id.into(),
            iteration: 0,
            target_percent,
            max_iterations,
            history: Vec::new(),
            termination: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }

    /// Aggregate coverage of the latest completed iteration, 0 if none.
    pub fn latest_percent(&self) -> f64 {
        self.history.last().map(|h| h.line_percent).unwrap_or(0.0)
    }
}
