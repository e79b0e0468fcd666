//! Structured lifecycle events for a pipeline run.
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{info, warn};

use crate::domain::{Outcome, TerminationReason};

/// Span carrying `run_id` and `iteration` for everything logged while one
/// iteration runs. Attach with `tracing::Instrument`.
pub fn iteration_span(run_id: &str, iteration: u32) -> tracing::Span {
    tracing::info_span!("unitforge.iteration", run_id = %run_id, iteration = iteration)
}

pub fn emit_run_started(run_id: &str, project_root: &str, target_percent: f64, max_iterations: u32) {
    info!(
        event = "run.started",
        run_id = %run_id,
        project_root = %project_root,
        target_percent = target_percent,
        max_iterations = max_iterations,
    );
}

pub fn emit_iteration_started(run_id: &str, iteration: u32, scenarios: usize, gaps: usize) {
    info!(
        event = "iteration.started",
        run_id = %run_id,
        iteration = iteration,
        scenarios = scenarios,
        gaps = gaps,
    );
}

/// One artifact reached its final outcome.
pub fn emit_artifact_classified(artifact_id: &str, outcome: Outcome, fallback_used: bool, duration_ms: u64) {
    info!(
        event = "artifact.classified",
        artifact_id = %artifact_id,
        outcome = outcome.as_str(),
        fallback_used = fallback_used,
        duration_ms = duration_ms,
    );
}

pub fn emit_coverage_merged(iteration: u32, samples: usize, dropped: usize, line_percent: f64) {
    info!(
        event = "coverage.merged",
        iteration = iteration,
        samples = samples,
        dropped = dropped,
        line_percent = line_percent,
    );
}

pub fn emit_run_terminated(run_id: &str, reason: TerminationReason, iterations: u32, line_percent: f64) {
    info!(
        event = "run.terminated",
        run_id = %run_id,
        reason = reason.as_str(),
        iterations = iterations,
        line_percent = line_percent,
    );
}

/// A coverage sample was rejected instead of merged.
pub fn emit_sample_dropped(path: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "coverage.sample_dropped", path = %path, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_and_events_do_not_panic() {
        let span = iteration_span("run-test", 1);
        let _entered = span.enter();
        emit_iteration_started("run-test", 1, 4, 1);
        emit_artifact_classified("a1", Outcome::CompiledPassed, false, 12);
        emit_coverage_merged(1, 3, 1, 42.5);
        emit_run_terminated("run-test", TerminationReason::Plateaued, 3, 42.5);
    }
}
