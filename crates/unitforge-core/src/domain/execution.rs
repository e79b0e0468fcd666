//! Execution results reported by the build-and-run stage.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Final classification of one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    CompiledPassed,
    CompiledFailed,
    CompileError,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::CompiledPassed => "compiled-passed",
            Outcome::CompiledFailed => "compiled-failed",
            Outcome::CompileError => "compile-error",
            Outcome::Timeout => "timeout",
        }
    }
}

/// Which bounded step exceeded its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    Compile,
    Run,
}

/// Result of building and running one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub artifact_id: String,
    pub scenario_id: String,
    pub outcome: Outcome,
    /// Set when `outcome` is [`Outcome::Timeout`].
    pub timeout_phase: Option<TimeoutPhase>,
    /// Compile attempts made (1, or 2 when the fallback rendering was tried).
    pub compile_attempts: u32,
    pub fallback_used: bool,
    /// The compiled source came from the enhancement collaborator.
    pub enhanced: bool,
    /// Project-filtered coverage tracefiles. Empty unless the binary passed.
    pub coverage_samples: Vec<PathBuf>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn new(artifact_id: impl Into<String>, scenario_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            scenario_id: scenario_id.into(),
            outcome,
            timeout_phase: None,
            compile_attempts: 0,
            fallback_used: false,
            enhanced: false,
            coverage_samples: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::CompiledPassed
    }
}
