//! Scenario Synthesizer.
//!
//! Turns eligible operations into [`TestScenario`]s through the registered
//! strategy table. Operations that cannot be exercised are never guessed at:
//! they become [`CoverageGap`]s naming the reason.

pub mod literal;
pub mod render;
pub mod strategy;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{base_type, OperationKind, OperationModel, TestScenario, TypeModel};
use crate::metrics::METRICS;
use literal::{plan_parameter, return_category, ParamPlan, ReturnCategory};
use strategy::{OperationPlan, StrategyRegistry};

/// Why an operation was not synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GapReason {
    NonPublic,
    Deleted,
    Destructor,
    /// Instance operation (or constructor) of a type a test cannot create
    /// and destroy.
    OwnerNotInstantiable,
    /// The owner is instantiable in principle but no public constructor has
    /// bindable arguments.
    NoUsableConstructor,
    UnsupportedParameter {
        parameter: String,
        type_name: String,
        detail: String,
    },
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapReason::NonPublic => f.write_str("non-public operation"),
            GapReason::Deleted => f.write_str("deleted operation"),
            GapReason::Destructor => f.write_str("destructor"),
            GapReason::OwnerNotInstantiable => f.write_str("owner type is not instantiable"),
            GapReason::NoUsableConstructor => f.write_str("no constructor with bindable arguments"),
            GapReason::UnsupportedParameter {
                parameter,
                type_name,
                detail,
            } => write!(f, "unsupported parameter {} of type `{}` ({})", parameter, type_name, detail),
        }
    }
}

/// An ineligible operation, recorded instead of synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageGap {
    /// Operation signature.
    pub operation: String,
    pub header: PathBuf,
    pub reason: GapReason,
}

/// Scenarios and gaps produced by one synthesis request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub scenarios: Vec<TestScenario>,
    pub gaps: Vec<CoverageGap>,
}

/// Structural eligibility, before any parameter is looked at.
pub fn eligibility(ty: &TypeModel, op: &OperationModel) -> Result<(), GapReason> {
    if !op.is_public() {
        return Err(GapReason::NonPublic);
    }
    if op.is_deleted {
        return Err(GapReason::Deleted);
    }
    match op.kind {
        OperationKind::Destructor => Err(GapReason::Destructor),
        OperationKind::Constructor if !ty.instantiable() => Err(GapReason::OwnerNotInstantiable),
        OperationKind::Method if !op.is_static && !ty.instantiable() => Err(GapReason::OwnerNotInstantiable),
        _ => Ok(()),
    }
}

/// Plan every parameter. A trailing run of defaulted parameters that cannot
/// be bound is simply omitted from the call.
fn plan_parameters(
    op: &OperationModel,
    var_prefix: &str,
    types: &[TypeModel],
) -> Result<Vec<ParamPlan>, GapReason> {
    let mut plans = Vec::with_capacity(op.parameters.len());
    for (index, param) in op.parameters.iter().enumerate() {
        let var = format!("{}{}", var_prefix, index);
        match plan_parameter(&param.name, &param.type_name, &var, types) {
            Ok(plan) => plans.push(plan),
            Err(_) if op.parameters[index..].iter().all(|p| p.has_default) => break,
            Err(unsupported) => {
                return Err(GapReason::UnsupportedParameter {
                    parameter: if param.name.is_empty() { var } else { param.name.clone() },
                    type_name: unsupported.type_name,
                    detail: unsupported.detail.to_string(),
                })
            }
        }
    }
    Ok(plans)
}

/// Constructor arguments for building a receiver, preferring value
/// initialisation, then the public constructor with the fewest parameters
/// that can all be bound. Copy and move constructors are never used.
pub fn receiver_plan(ty: &TypeModel, types: &[TypeModel]) -> Option<Vec<ParamPlan>> {
    if ty.default_constructible {
        return Some(Vec::new());
    }
    let mut candidates: Vec<&OperationModel> = ty
        .constructors()
        .filter(|c| c.is_public() && !c.is_deleted)
        .filter(|c| {
            !c.parameters
                .iter()
                .any(|p| base_type(&p.type_name) == ty.name || base_type(&p.type_name) == c.owner)
        })
        .collect();
    candidates.sort_by_key(|c| c.parameters.len());
    candidates
        .into_iter()
        .find_map(|ctor| plan_parameters(ctor, "ctor_arg", types).ok())
}

/// Produces scenarios from a strategy registry.
pub struct Synthesizer {
    registry: StrategyRegistry,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(StrategyRegistry::default())
    }
}

impl Synthesizer {
    pub fn new(registry: StrategyRegistry) -> Self {
        Self { registry }
    }

    /// Synthesize for a set of types.
    ///
    /// With `focus = None` every operation is considered with base-tier
    /// strategies. With a focus list only the named operation signatures are
    /// considered, with escalation strategies enabled. Scenario ids in
    /// `attempted` are never emitted again.
    pub fn synthesize(
        &self,
        types: &[TypeModel],
        focus: Option<&[String]>,
        attempted: &BTreeSet<String>,
    ) -> SynthesisOutput {
        let mut output = SynthesisOutput::default();
        let escalate = focus.is_some();

        for ty in types {
            let receiver = receiver_plan(ty, types);
            for op in &ty.operations {
                if let Some(focus) = focus {
                    if !focus.iter().any(|sig| *sig == op.signature()) {
                        continue;
                    }
                }
                match self.operation_scenarios(ty, op, receiver.as_deref(), types, escalate) {
                    Ok(scenarios) => output
                        .scenarios
                        .extend(scenarios.into_iter().filter(|s| !attempted.contains(&s.id))),
                    Err(reason) => {
                        debug!(operation = %op.signature(), reason = %reason, "Operation ineligible");
                        output.gaps.push(CoverageGap {
                            operation: op.signature(),
                            header: ty.header.clone(),
                            reason,
                        });
                    }
                }
            }
        }

        METRICS.add_scenarios(output.scenarios.len() as u64);
        output
    }

    fn operation_scenarios(
        &self,
        ty: &TypeModel,
        op: &OperationModel,
        receiver: Option<&[ParamPlan]>,
        types: &[TypeModel],
        escalate: bool,
    ) -> Result<Vec<TestScenario>, GapReason> {
        eligibility(ty, op)?;
        let params = plan_parameters(op, "arg", types)?;

        let needs_receiver = op.kind == OperationKind::Method && !op.is_static;
        let receiver = if needs_receiver {
            Some(receiver.ok_or(GapReason::NoUsableConstructor)?)
        } else {
            None
        };
        let returns = if op.kind == OperationKind::Method {
            return_category(&op.return_type)
        } else {
            ReturnCategory::Void
        };

        let plan = OperationPlan {
            op,
            header: &ty.header,
            receiver,
            params: &params,
            returns,
        };
        Ok(self.registry.scenarios(&plan, escalate))
    }
}
