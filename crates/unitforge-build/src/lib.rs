//! unitforge build-and-run orchestration.
//!
//! Turns synthesized scenarios into compiled, executed and coverage-measured
//! artifacts, and drives the iteration loop end to end.

pub mod artifact;
pub mod collector;
pub mod coverage_tool;
pub mod orchestrator;
pub mod pipeline;
pub mod runner;
pub mod store;
pub mod toolchain;

pub use artifact::{ArtifactPlanner, BuildArtifact};
pub use collector::ResultsCollector;
pub use coverage_tool::LcovTool;
pub use orchestrator::{IterationOutcome, Orchestrator};
pub use pipeline::{Canceller, Pipeline, PipelineResult};
pub use runner::{run_command, CommandOutcome, ProcessOutput};
pub use store::{PersistedIteration, RunStore};
pub use toolchain::{compile_args, probe_tool};
