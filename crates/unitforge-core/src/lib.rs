//! unitforge Core Library
//!
//! Toolchain-free building blocks of the coverage-driven test synthesis loop:
//! model extraction, mock fabrication, scenario synthesis, coverage
//! aggregation and the iteration controller.

pub mod config;
pub mod controller;
pub mod coverage;
pub mod domain;
pub mod enhance;
pub mod extract;
pub mod metrics;
pub mod mock;
pub mod obs;
pub mod project;
pub mod reporting;
pub mod synth;
pub mod telemetry;

pub use config::{CoverageToolConfig, EnhancerConfig, RunConfig, ToolchainConfig, CONFIG_FILE_NAME};

pub use controller::{Decision, IterationController, Limits, Phase};

pub use coverage::{Aggregator, CoverageMap, CoverageReport, FileSummary, SampleError};

pub use domain::{
    ArgumentBinding, ConfigError, ExecutionResult, ExpectedOutcome, ExtractionError, ForgeError,
    ForgeResult, HistoryEntry, IterationState, OperationKind, OperationModel, Outcome, Parameter,
    Rendering, StrategyTag, TerminationReason, TestScenario, TimeoutPhase, TypeModel, Visibility,
};

pub use enhance::{enhance_or_baseline, validate_enhanced, OllamaEnhancer, ScenarioEnhancer};

pub use extract::{Extractor, HeaderFile, SourceFile, SourceModel};

pub use mock::{MockFabricator, MockHeader, MockSet};

pub use project::ProjectIndex;

pub use reporting::{render_summary_md, OutcomeCounts, RunSummary};

pub use synth::render::render_test;
pub use synth::{CoverageGap, GapReason, SynthesisOutput, Synthesizer};
