//! Domain models for unitforge.
//!
//! Canonical definitions for the core entities:
//! - `TypeModel` / `OperationModel`: reconstructed API surface of the target
//! - `TestScenario`: one renderable test case for one operation
//! - `ExecutionResult`: outcome of building and running a scenario
//! - `IterationState`: run-level loop bookkeeping

pub mod error;
pub mod execution;
pub mod iteration;
pub mod model;
pub mod scenario;

pub use error::{ConfigError, ExtractionError, ForgeError, ForgeResult};
pub use execution::{ExecutionResult, Outcome, TimeoutPhase};
pub use iteration::{HistoryEntry, IterationState, TerminationReason};
pub use model::{
    base_type, slugify, unqualified, DataMember, OperationKind, OperationModel, Parameter, TypeModel,
    Visibility,
};
pub use scenario::{
    ArgumentBinding, ExpectedOutcome, LocalValue, ParamCategory, PassBy, Rendering, StrategyTag,
    TestScenario,
};
