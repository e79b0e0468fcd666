//! Test scenarios: one concrete, renderable test case for one operation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::model::{slugify, OperationModel};

/// Synthesis strategy that produced a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyTag {
    ConstructOnly,
    InvokeOnce,
    InvokeRepeated,
    BoundaryArgument,
    NoThrow,
    TruthyPath,
    BoundedValue,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::ConstructOnly => "construct-only",
            StrategyTag::InvokeOnce => "invoke-once",
            StrategyTag::InvokeRepeated => "invoke-repeated",
            StrategyTag::BoundaryArgument => "boundary-argument",
            StrategyTag::NoThrow => "no-throw",
            StrategyTag::TruthyPath => "truthy-path",
            StrategyTag::BoundedValue => "bounded-value",
        }
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the rendered test asserts about the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpectedOutcome {
    MustNotThrow,
    MustReturnTruthy,
    ValueUnconstrained,
}

/// Coarse shape of a declared parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamCategory {
    Integral,
    Floating,
    Boolean,
    StringLike,
    Pointer,
    Reference,
    UserDefined,
}

/// How a local value is handed to the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassBy {
    Address,
    Reference,
}

/// A named local declared before the call, used for pointer and reference
/// parameters so that no null literal is ever passed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalValue {
    pub var: String,
    /// Declared type of the local (the pointee/referent, cv-stripped).
    pub type_name: String,
    pub pass_by: PassBy,
}

/// The literal chosen for one declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgumentBinding {
    pub parameter: String,
    pub category: ParamCategory,
    /// Value used by the primary rendering.
    pub primary: String,
    /// Value used by the single fallback rendering.
    pub fallback: String,
    pub local: Option<LocalValue>,
}

impl ArgumentBinding {
    /// Value literal for the requested rendering.
    pub fn value(&self, rendering: Rendering) -> &str {
        match rendering {
            Rendering::Primary => &self.primary,
            Rendering::Fallback => &self.fallback,
        }
    }

    /// Expression placed in the argument list.
    pub fn call_expr(&self, rendering: Rendering) -> String {
        match &self.local {
            Some(LocalValue {
                var,
                pass_by: PassBy::Address,
                ..
            }) => format!("&{}", var),
            Some(LocalValue { var, .. }) => var.clone(),
            None => self.value(rendering).to_string(),
        }
    }

    /// Whether the fallback rendering differs from the primary one.
    pub fn has_alternative(&self) -> bool {
        self.primary != self.fallback
    }
}

/// Which of the two deterministic renderings to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rendering {
    Primary,
    Fallback,
}

/// One concrete test case for one operation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestScenario {
    /// `<operation signature>#<strategy>`.
    pub id: String,
    pub strategy: StrategyTag,
    pub operation: OperationModel,
    /// Header declaring the owning type, relative to the project root.
    pub header: PathBuf,
    /// Constructor arguments used to build the receiver for instance calls;
    /// `None` for constructor scenarios and static calls.
    pub receiver: Option<Vec<ArgumentBinding>>,
    pub arguments: Vec<ArgumentBinding>,
    /// How many times the operation is invoked.
    pub calls: u32,
    pub expected: ExpectedOutcome,
}

impl TestScenario {
    pub fn scenario_id(operation: &OperationModel, strategy: StrategyTag) -> String {
        format!("{}#{}", operation.signature(), strategy.as_str())
    }

    /// Identifier-safe form of the id, used for directories and test names.
    pub fn slug(&self) -> String {
        slugify(&self.id)
    }

    /// Whether a fallback rendering exists that differs from the primary one.
    pub fn has_fallback(&self) -> bool {
        self.arguments
            .iter()
            .chain(self.receiver.iter().flatten())
            .any(ArgumentBinding::has_alternative)
    }
}
