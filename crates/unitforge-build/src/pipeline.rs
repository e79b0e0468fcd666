//! Iteration pipeline.
//!
//! extract -> synthesize -> fabricate mocks -> build/run -> aggregate ->
//! evaluate, repeated until the controller terminates the run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use unitforge_core::metrics::METRICS;
use unitforge_core::obs;
use unitforge_core::synth::eligibility;
use unitforge_core::{
    Aggregator, CoverageReport, Decision, Extractor, IterationController, IterationState, Limits,
    OperationModel, ProjectIndex, RunConfig, RunSummary, ScenarioEnhancer, SourceModel, Synthesizer,
    TerminationReason,
};
use uuid::Uuid;

use crate::artifact::ArtifactPlanner;
use crate::orchestrator::Orchestrator;
use crate::store::RunStore;
use crate::toolchain::probe_tool;

/// Result of a complete run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: String,
    pub state: IterationState,
    /// Report of the last completed iteration.
    pub final_report: CoverageReport,
    pub summary: RunSummary,
    pub output_dir: PathBuf,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn termination(&self) -> TerminationReason {
        self.state.termination.unwrap_or(TerminationReason::BudgetExhausted)
    }

    pub fn target_met(&self) -> bool {
        self.state.termination == Some(TerminationReason::TargetMet)
    }
}

/// Requests cancellation of a running pipeline. Outstanding build jobs are
/// killed and the run terminates after reporting what finished.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

pub struct Pipeline {
    config: Arc<RunConfig>,
    enhancer: Option<Arc<dyn ScenarioEnhancer>>,
    resume: bool,
    cancel: Arc<watch::Sender<bool>>,
}

/// Operations that can still receive scenarios.
fn candidates(model: &SourceModel) -> Vec<OperationModel> {
    model
        .types
        .iter()
        .flat_map(|ty| ty.operations.iter().filter(move |op| eligibility(ty, op).is_ok()))
        .cloned()
        .collect()
}

fn extract_model(extractor: &Extractor, store: &RunStore) -> Result<SourceModel> {
    let model = extractor.extract()?;
    for diagnostic in &model.diagnostics {
        warn!(diagnostic = %diagnostic, "Extraction diagnostic");
    }
    info!(
        types = model.types.len(),
        headers = model.headers.len(),
        sources = model.sources.len(),
        "Source model extracted"
    );
    store.write_model(&model)?;
    Ok(model)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("Failed to read current directory")?
            .join(path))
    }
}

impl Pipeline {
    /// `config` must already be validated.
    pub fn new(config: Arc<RunConfig>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            config,
            enhancer: None,
            resume: false,
            cancel: Arc::new(tx),
        }
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn ScenarioEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Continue a run persisted in the output directory instead of starting
    /// over.
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            tx: Arc::clone(&self.cancel),
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Run the loop to termination.
    ///
    /// Only a missing compiler or coverage tool (and I/O failures on the
    /// output directory) end it with an error; everything else degrades to
    /// outcomes, gaps and diagnostics.
    pub async fn run(&self) -> Result<PipelineResult> {
        let start = Instant::now();
        let config = &self.config;
        let root = config.canonical_root();

        probe_tool(&config.toolchain.compiler, &root).await?;
        probe_tool(&config.coverage.lcov, &root).await?;

        let output_dir = absolute(&config.output_dir)?;
        let store = RunStore::open(&output_dir)?;
        let output_dir = output_dir.canonicalize().unwrap_or(output_dir);

        let extractor = Extractor::new(&root)
            .with_exclude_dirs(config.exclude_dirs.iter().cloned())
            .with_exclude_path(&output_dir);
        let mut model = extract_model(&extractor, &store)?;
        let mut fingerprint = model.fingerprint();
        let mut index = ProjectIndex::from_model(&model);
        let mut candidates = candidates(&model);
        let limits = Limits::from(&**config);
        let mut aggregator = Aggregator::new(&root);
        let mut attempted: BTreeSet<String> = BTreeSet::new();

        let previous = if self.resume { store.read_state()? } else { None };
        let (mut controller, mut summary, mut last_report) = match previous {
            Some(mut state) => {
                info!(run_id = %state.run_id, iteration = state.iteration, "Resuming run");
                // A larger iteration budget reopens a run that ran out of it.
                if state.termination == Some(TerminationReason::BudgetExhausted)
                    && state.iteration < limits.max_iterations
                {
                    state.termination = None;
                    state.finished_at = None;
                }
                state.max_iterations = limits.max_iterations;
                let persisted = store.load_iterations(state.iteration)?;
                // A report written before the state that should have recorded it.
                let unrecorded = match state.termination {
                    None => store.load_iteration(state.iteration + 1)?,
                    Some(_) => None,
                };
                let restore: Vec<_> = persisted
                    .iter()
                    .chain(&unrecorded)
                    .map(|p| (p.iteration, p.results.clone()))
                    .collect();
                aggregator.restore(&restore);
                let mut summary = RunSummary::new(&state, &root);
                for p in persisted.iter().chain(&unrecorded) {
                    attempted.extend(p.scenarios.iter().map(|s| s.id.clone()));
                    summary.push_iteration(&p.report, p.scenarios.len(), &p.gaps, &p.results);
                }

                let mut controller = IterationController::resume(state, limits);
                if let Some(p) = &unrecorded {
                    info!(iteration = p.iteration, "Adopting unrecorded iteration report");
                    controller.begin_iteration()?;
                    controller.jobs_drained();
                    controller.evaluate(&p.report, aggregator.cumulative(), &candidates)?;
                    store.write_state(controller.state())?;
                }
                let last = unrecorded.or_else(|| persisted.last().cloned()).map(|p| p.report);
                (controller, summary, last)
            }
            None => {
                store.reset()?;
                let controller = IterationController::new(Uuid::new_v4().to_string(), limits);
                let summary = RunSummary::new(controller.state(), &root);
                (controller, summary, None)
            }
        };
        let run_id = controller.state().run_id.clone();
        obs::emit_run_started(
            &run_id,
            &root.display().to_string(),
            config.target_percent,
            config.max_iterations,
        );

        let synthesizer = Synthesizer::default();
        let mut orchestrator = Orchestrator::new(config, &root);
        if let Some(enhancer) = &self.enhancer {
            orchestrator = orchestrator.with_enhancer(Arc::clone(enhancer));
        }

        // On resume, focus on what the restored coverage still lacks.
        let mut focus: Option<Vec<String>> = if controller.state().history.is_empty() {
            None
        } else {
            Some(controller.priority_list(aggregator.cumulative(), &candidates)).filter(|p| !p.is_empty())
        };

        let mut first = true;
        while !controller.is_terminated() {
            // The tree is re-read every iteration; an unchanged tree yields an
            // identical model.
            if !std::mem::take(&mut first) {
                let fresh = extract_model(&extractor, &store)?;
                let fresh_fingerprint = fresh.fingerprint();
                if fresh_fingerprint != fingerprint {
                    warn!(from = %fingerprint, to = %fresh_fingerprint, "Source tree changed during the run");
                    index = ProjectIndex::from_model(&fresh);
                    candidates = self::candidates(&fresh);
                    fingerprint = fresh_fingerprint;
                }
                model = fresh;
            }
            let iteration = controller.begin_iteration()?;
            let span = obs::iteration_span(&run_id, iteration);
            let decision = async {
                let output = synthesizer.synthesize(&model.types, focus.as_deref(), &attempted);
                obs::emit_iteration_started(&run_id, iteration, output.scenarios.len(), output.gaps.len());

                store.begin_iteration(iteration)?;
                store.write_scenarios(iteration, &output.scenarios)?;
                store.write_gaps(iteration, &output.gaps)?;

                let artifacts = ArtifactPlanner::new(&index, &model.types)
                    .plan(&output.scenarios, &store.artifacts_dir(iteration));
                let outcome = orchestrator
                    .run_iteration(
                        iteration,
                        artifacts,
                        self.cancel.subscribe(),
                        controller.remaining_budget(),
                    )
                    .await?;
                controller.jobs_drained();
                store.write_results(iteration, &outcome.results)?;
                attempted.extend(output.scenarios.iter().map(|s| s.id.clone()));

                let report = aggregator.aggregate(iteration, &outcome.results)?;
                store.write_report(&report)?;
                summary.push_iteration(&report, output.scenarios.len(), &output.gaps, &outcome.results);

                let decision = controller.evaluate(&report, aggregator.cumulative(), &candidates)?;
                if (outcome.interrupted || self.cancelled()) && !controller.is_terminated() {
                    controller.terminate(TerminationReason::BudgetExhausted);
                }
                store.write_state(controller.state())?;
                last_report = Some(report);
                Ok::<Decision, anyhow::Error>(decision)
            }
            .instrument(span)
            .await?;

            if let Decision::Continue { priority } = decision {
                info!(iteration, prioritised = priority.len(), "Requesting more scenarios");
                focus = if priority.is_empty() { None } else { Some(priority) };
            }
        }

        let state = controller.state().clone();
        let final_report = match last_report {
            Some(report) => report,
            None => aggregator.aggregate(state.iteration.max(1), &[])?,
        };
        summary.termination = state.termination;
        summary.final_line_percent = final_report.line_percent;
        store.write_summary(&summary)?;

        let reason = state.termination.unwrap_or(TerminationReason::BudgetExhausted);
        obs::emit_run_terminated(&run_id, reason, state.iteration, final_report.line_percent);
        METRICS.flush();

        Ok(PipelineResult {
            run_id,
            state,
            final_report,
            summary,
            output_dir,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceller_flips_shared_flag() {
        let pipeline = Pipeline::new(Arc::new(RunConfig::default()));
        assert!(!pipeline.cancelled());
        pipeline.canceller().cancel();
        assert!(pipeline.cancelled());
    }

    #[test]
    fn test_candidates_exclude_ineligible_operations() {
        let mut model = SourceModel {
            root: PathBuf::from("/proj"),
            types: Vec::new(),
            headers: Vec::new(),
            sources: Vec::new(),
            diagnostics: Vec::new(),
        };
        let mut ty = unitforge_core::TypeModel::new("Shape", "Shape.h");
        ty.operations.push(OperationModel::method("Shape", "Area", "int"));
        ty.operations.push(
            OperationModel::method("Shape", "Hidden", "void").with_visibility(unitforge_core::Visibility::Private),
        );
        model.types.push(ty);

        let names: Vec<String> = candidates(&model).into_iter().map(|op| op.name).collect();
        assert_eq!(names, vec!["Area"]);
    }
}
