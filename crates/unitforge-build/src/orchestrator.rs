//! Build-and-Run Orchestrator.
//!
//! Compiles and runs every artifact of an iteration on a bounded worker
//! pool. Each job owns its artifact directory and appends exactly one
//! [`ExecutionResult`] to the shared collector. The iteration is only
//! reported once every job has returned, been cancelled, or the pool was
//! stopped by a fatal toolchain error.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};
use unitforge_core::domain::{Rendering, TimeoutPhase};
use unitforge_core::metrics::METRICS;
use unitforge_core::obs;
use unitforge_core::{
    enhance_or_baseline, ExecutionResult, ForgeError, ForgeResult, OutcomeCounts, Outcome, RunConfig,
    ScenarioEnhancer, ToolchainConfig,
};

use crate::artifact::BuildArtifact;
use crate::collector::ResultsCollector;
use crate::coverage_tool::LcovTool;
use crate::runner::{run_command, CommandOutcome, ProcessOutput};
use crate::toolchain::compile_args;

/// What one iteration's pool produced.
#[derive(Debug, Clone, Default)]
pub struct IterationOutcome {
    pub iteration: u32,
    pub submitted: usize,
    /// One per finished job, ordered by artifact id.
    pub results: Vec<ExecutionResult>,
    /// Jobs abandoned because the pool was interrupted.
    pub cancelled: usize,
    /// Cancellation was requested or the wall-clock budget ran out.
    pub interrupted: bool,
}

impl IterationOutcome {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::from_results(&self.results)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }
}

struct JobContext {
    toolchain: ToolchainConfig,
    lcov: LcovTool,
    enhancer: Option<Arc<dyn ScenarioEnhancer>>,
}

enum Compile {
    Built,
    Failed(ProcessOutput),
    TimedOut,
}

pub struct Orchestrator {
    ctx: Arc<JobContext>,
    workers: usize,
}

impl Orchestrator {
    /// `root` is the canonical project root.
    pub fn new(config: &RunConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            ctx: Arc::new(JobContext {
                toolchain: config.toolchain.clone(),
                lcov: LcovTool::new(config.coverage.clone(), root),
                enhancer: None,
            }),
            workers: config.workers.max(1),
        }
    }

    pub fn with_enhancer(self, enhancer: Arc<dyn ScenarioEnhancer>) -> Self {
        let ctx = JobContext {
            toolchain: self.ctx.toolchain.clone(),
            lcov: self.ctx.lcov.clone(),
            enhancer: Some(enhancer),
        };
        Self {
            ctx: Arc::new(ctx),
            workers: self.workers,
        }
    }

    /// Build and run `artifacts` concurrently.
    ///
    /// Setting `cancel` to true, or `budget` elapsing, aborts every
    /// outstanding job; running compilers and binaries are killed. Only a
    /// missing compiler is returned as an error.
    pub async fn run_iteration(
        &self,
        iteration: u32,
        artifacts: Vec<BuildArtifact>,
        cancel: watch::Receiver<bool>,
        budget: Option<Duration>,
    ) -> ForgeResult<IterationOutcome> {
        let submitted = artifacts.len();
        let collector = ResultsCollector::new();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();
        // task -> (artifact id, scenario id), for jobs that die without a result
        let mut jobs: HashMap<Id, (String, String)> = HashMap::with_capacity(submitted);

        info!(iteration, artifacts = submitted, workers = self.workers, "Starting build pool");

        for artifact in artifacts {
            let ctx = Arc::clone(&self.ctx);
            let collector = collector.clone();
            let semaphore = Arc::clone(&semaphore);
            let ids = (artifact.id.clone(), artifact.scenario.id.clone());
            let handle = join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = build_and_run(&ctx, &artifact).await?;
                collector.push(result).await;
                Ok::<(), ForgeError>(())
            });
            jobs.insert(handle.id(), ids);
        }

        let interrupt = interrupted(cancel, budget);
        tokio::pin!(interrupt);
        let mut was_interrupted = false;
        let mut fatal: Option<ForgeError> = None;

        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        warn!(error = %e, "Fatal build error; stopping pool");
                        join_set.abort_all();
                        fatal.get_or_insert(e);
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Build job panicked");
                        if let Some((artifact_id, scenario_id)) = jobs.remove(&e.id()) {
                            let mut result = ExecutionResult::new(&artifact_id, &scenario_id, Outcome::CompileError);
                            result.stderr = format!("build job panicked: {}", e);
                            obs::emit_artifact_classified(&artifact_id, result.outcome, false, 0);
                            collector.push(result).await;
                        }
                    }
                },
                _ = &mut interrupt, if !was_interrupted => {
                    warn!(iteration, "Build pool interrupted; killing outstanding jobs");
                    was_interrupted = true;
                    join_set.abort_all();
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let results = collector.drain().await;
        let outcome = IterationOutcome {
            iteration,
            submitted,
            cancelled: submitted.saturating_sub(results.len()),
            results,
            interrupted: was_interrupted,
        };
        let counts = outcome.counts();
        info!(
            iteration,
            passed = counts.compiled_passed,
            failed = counts.compiled_failed,
            compile_errors = counts.compile_error,
            timeouts = counts.timeout,
            cancelled = outcome.cancelled,
            "Build pool drained"
        );
        Ok(outcome)
    }
}

/// Resolves once cancellation is requested or the budget elapses.
async fn interrupted(mut cancel: watch::Receiver<bool>, budget: Option<Duration>) {
    let cancelled = async move {
        let requested = cancel.wait_for(|c| *c).await.is_ok();
        if !requested {
            // Sender gone: nobody can cancel any more.
            std::future::pending::<()>().await;
        }
    };
    let expired = async move {
        match budget {
            Some(left) => tokio::time::sleep(left).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = cancelled => {}
        _ = expired => {}
    }
}

async fn compile(ctx: &JobContext, artifact: &BuildArtifact) -> ForgeResult<Compile> {
    let args = compile_args(&ctx.toolchain, artifact);
    debug!(artifact = %artifact.id, compiler = %ctx.toolchain.compiler, "Compiling");
    match run_command(&ctx.toolchain.compiler, &args, &artifact.dir, ctx.toolchain.compile_timeout()).await {
        Ok(CommandOutcome::Completed(output)) if output.passed() && artifact.binary_path().is_file() => {
            METRICS.inc_compiled();
            Ok(Compile::Built)
        }
        Ok(CommandOutcome::Completed(output)) => Ok(Compile::Failed(output)),
        Ok(CommandOutcome::TimedOut { .. }) => Ok(Compile::TimedOut),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            Err(ForgeError::ToolchainMissing {
                tool: ctx.toolchain.compiler.clone(),
                reason: e.to_string(),
            })
        }
        Err(e) => Ok(Compile::Failed(ProcessOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: e.to_string(),
            duration_ms: 0,
            success: false,
        })),
    }
}

fn finish(mut result: ExecutionResult, start: Instant) -> ExecutionResult {
    result.duration_ms = start.elapsed().as_millis() as u64;
    if result.outcome == Outcome::Timeout {
        METRICS.inc_timeouts();
    }
    obs::emit_artifact_classified(&result.artifact_id, result.outcome, result.fallback_used, result.duration_ms);
    result
}

/// Compile (with at most one retry) and run one artifact.
async fn build_and_run(ctx: &JobContext, artifact: &BuildArtifact) -> ForgeResult<ExecutionResult> {
    let start = Instant::now();
    let mut result = ExecutionResult::new(&artifact.id, &artifact.scenario.id, Outcome::CompileError);

    if let Err(e) = artifact.prepare() {
        warn!(artifact = %artifact.id, error = %e, "Cannot materialize artifact");
        result.stderr = format!("{:#}", e);
        return Ok(finish(result, start));
    }

    let baseline = artifact.render(Rendering::Primary);
    let (source, enhanced) = match &ctx.enhancer {
        Some(enhancer) => enhance_or_baseline(enhancer.as_ref(), &artifact.scenario, &baseline).await,
        None => (baseline, false),
    };
    result.enhanced = enhanced;

    // The one retry: the deterministic rendering after an enhanced source,
    // otherwise the fallback rendering if it differs from the primary.
    let mut retry = if enhanced {
        Some(artifact.render(Rendering::Primary))
    } else if artifact.scenario.has_fallback() {
        Some(artifact.render(Rendering::Fallback))
    } else {
        None
    };

    let mut next = Some(source);
    let mut built = false;
    while let Some(source) = next.take() {
        if let Err(e) = artifact.write_source(&source) {
            result.stderr = format!("{:#}", e);
            break;
        }
        result.compile_attempts += 1;
        match compile(ctx, artifact).await? {
            Compile::Built => {
                built = true;
            }
            Compile::Failed(output) => {
                result.stdout = output.stdout;
                result.stderr = output.stderr;
                if let Some(fallback) = retry.take() {
                    debug!(artifact = %artifact.id, "Compile failed; retrying once");
                    result.fallback_used = true;
                    METRICS.inc_fallbacks();
                    next = Some(fallback);
                }
            }
            Compile::TimedOut => {
                result.outcome = Outcome::Timeout;
                result.timeout_phase = Some(TimeoutPhase::Compile);
                return Ok(finish(result, start));
            }
        }
    }

    if !built {
        result.outcome = if result.fallback_used {
            Outcome::CompiledFailed
        } else {
            Outcome::CompileError
        };
        return Ok(finish(result, start));
    }

    let binary = artifact.binary_path().display().to_string();
    let no_args: [&str; 0] = [];
    match run_command(&binary, &no_args, &artifact.dir, ctx.toolchain.run_timeout()).await {
        Ok(CommandOutcome::Completed(output)) => {
            let passed = output.passed();
            result.stdout = output.stdout;
            result.stderr = output.stderr;
            if passed {
                result.outcome = Outcome::CompiledPassed;
                result.coverage_samples = ctx.lcov.collect(&artifact.dir).await.into_iter().collect();
            } else {
                result.outcome = Outcome::CompiledFailed;
            }
        }
        Ok(CommandOutcome::TimedOut { .. }) => {
            // Partial .gcda data is never captured.
            result.outcome = Outcome::Timeout;
            result.timeout_phase = Some(TimeoutPhase::Run);
        }
        Err(e) => {
            result.outcome = Outcome::CompiledFailed;
            result.stderr = e.to_string();
        }
    }
    Ok(finish(result, start))
}
