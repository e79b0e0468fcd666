//! The strategy table.
//!
//! Each strategy is a registered value keyed by what it applies to (return
//! category, operation kind, parameter shape). Adding a strategy means adding
//! one type and one registry entry.

use std::path::Path;

use super::literal::{ParamPlan, ReturnCategory};
use crate::domain::{ExpectedOutcome, OperationKind, OperationModel, StrategyTag, TestScenario};

/// When a strategy is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// First request for an operation.
    Base,
    /// Only for operations the controller reprioritised.
    Escalation,
}

/// Calls made by `invoke-repeated` scenarios.
pub const REPEATED_CALLS: u32 = 3;

/// Method-name prefixes whose `bool` result is expected to signal success.
const SUCCESS_VERBS: &[&str] = &["init", "start", "open", "connect", "load", "begin", "setup"];

/// Everything a strategy may look at for one eligible operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationPlan<'a> {
    pub op: &'a OperationModel,
    pub header: &'a Path,
    /// Constructor arguments for the receiver; `None` for constructors and
    /// static methods.
    pub receiver: Option<&'a [ParamPlan]>,
    pub params: &'a [ParamPlan],
    pub returns: ReturnCategory,
}

impl OperationPlan<'_> {
    fn is_method(&self) -> bool {
        self.op.kind == OperationKind::Method
    }

    fn scenario(&self, strategy: StrategyTag, calls: u32, expected: ExpectedOutcome, boundary: bool) -> TestScenario {
        TestScenario {
            id: TestScenario::scenario_id(self.op, strategy),
            strategy,
            operation: self.op.clone(),
            header: self.header.to_path_buf(),
            receiver: self
                .receiver
                .map(|plans| plans.iter().map(|p| p.binding(false)).collect()),
            arguments: self.params.iter().map(|p| p.binding(boundary)).collect(),
            calls,
            expected,
        }
    }
}

pub trait Strategy: Send + Sync {
    fn tag(&self) -> StrategyTag;
    fn tier(&self) -> Tier;
    fn applies(&self, plan: &OperationPlan<'_>) -> bool;
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario;
}

/// Construct and let the object go out of scope. Never chained with calls.
pub struct ConstructOnly;

impl Strategy for ConstructOnly {
    fn tag(&self) -> StrategyTag {
        StrategyTag::ConstructOnly
    }
    fn tier(&self) -> Tier {
        Tier::Base
    }
    fn applies(&self, plan: &OperationPlan<'_>) -> bool {
        plan.op.kind == OperationKind::Constructor
    }
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario {
        plan.scenario(self.tag(), 1, ExpectedOutcome::MustNotThrow, false)
    }
}

/// Single call. Void results must not throw; boolean results are left
/// unconstrained.
pub struct InvokeOnce;

impl Strategy for InvokeOnce {
    fn tag(&self) -> StrategyTag {
        StrategyTag::InvokeOnce
    }
    fn tier(&self) -> Tier {
        Tier::Base
    }
    fn applies(&self, plan: &OperationPlan<'_>) -> bool {
        plan.is_method() && matches!(plan.returns, ReturnCategory::Void | ReturnCategory::Boolean)
    }
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario {
        let expected = if plan.returns == ReturnCategory::Void {
            ExpectedOutcome::MustNotThrow
        } else {
            ExpectedOutcome::ValueUnconstrained
        };
        plan.scenario(self.tag(), 1, expected, false)
    }
}

/// `bool` results of success-verb methods (`Init`, `Open`...) must be true.
pub struct TruthyPath;

pub fn is_success_verb(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SUCCESS_VERBS.iter().any(|verb| lower.starts_with(verb))
}

impl Strategy for TruthyPath {
    fn tag(&self) -> StrategyTag {
        StrategyTag::TruthyPath
    }
    fn tier(&self) -> Tier {
        Tier::Base
    }
    fn applies(&self, plan: &OperationPlan<'_>) -> bool {
        plan.is_method() && plan.returns == ReturnCategory::Boolean && is_success_verb(&plan.op.name)
    }
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario {
        plan.scenario(self.tag(), 1, ExpectedOutcome::MustReturnTruthy, false)
    }
}

/// The call completes without an exception.
pub struct NoThrow;

impl Strategy for NoThrow {
    fn tag(&self) -> StrategyTag {
        StrategyTag::NoThrow
    }
    fn tier(&self) -> Tier {
        Tier::Base
    }
    fn applies(&self, plan: &OperationPlan<'_>) -> bool {
        plan.is_method() && matches!(plan.returns, ReturnCategory::Numeric | ReturnCategory::Other)
    }
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario {
        plan.scenario(self.tag(), 1, ExpectedOutcome::MustNotThrow, false)
    }
}

/// Numeric results satisfy what their declaration implies: floating values
/// are not NaN and signed counts or sizes are non-negative.
pub struct BoundedValue;

impl Strategy for BoundedValue {
    fn tag(&self) -> StrategyTag {
        StrategyTag::BoundedValue
    }
    fn tier(&self) -> Tier {
        Tier::Base
    }
    fn applies(&self, plan: &OperationPlan<'_>) -> bool {
        plan.is_method() && plan.returns == ReturnCategory::Numeric
    }
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario {
        plan.scenario(self.tag(), 1, ExpectedOutcome::ValueUnconstrained, false)
    }
}

/// Repeated calls on one receiver to catch repeat-call defects. Void
/// operations get it up front; others only when escalated.
pub struct InvokeRepeated {
    tier: Tier,
}

impl InvokeRepeated {
    pub fn base() -> Self {
        Self { tier: Tier::Base }
    }

    pub fn escalation() -> Self {
        Self {
            tier: Tier::Escalation,
        }
    }
}

impl Strategy for InvokeRepeated {
    fn tag(&self) -> StrategyTag {
        StrategyTag::InvokeRepeated
    }
    fn tier(&self) -> Tier {
        self.tier
    }
    fn applies(&self, plan: &OperationPlan<'_>) -> bool {
        let is_void = plan.returns == ReturnCategory::Void;
        plan.is_method()
            && match self.tier {
                Tier::Base => is_void,
                Tier::Escalation => !is_void,
            }
    }
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario {
        plan.scenario(self.tag(), REPEATED_CALLS, ExpectedOutcome::MustNotThrow, false)
    }
}

/// Arguments at their type's extreme (`numeric_limits::max()`, long strings).
pub struct BoundaryArgument;

impl Strategy for BoundaryArgument {
    fn tag(&self) -> StrategyTag {
        StrategyTag::BoundaryArgument
    }
    fn tier(&self) -> Tier {
        Tier::Escalation
    }
    fn applies(&self, plan: &OperationPlan<'_>) -> bool {
        plan.params.iter().any(ParamPlan::has_boundary)
    }
    fn build(&self, plan: &OperationPlan<'_>) -> TestScenario {
        plan.scenario(self.tag(), 1, ExpectedOutcome::MustNotThrow, true)
    }
}

/// Ordered set of registered strategies.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
            .register(ConstructOnly)
            .register(InvokeOnce)
            .register(TruthyPath)
            .register(NoThrow)
            .register(BoundedValue)
            .register(InvokeRepeated::base())
            .register(BoundaryArgument)
            .register(InvokeRepeated::escalation())
    }
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn register(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Scenarios from every applicable strategy in the allowed tiers, in
    /// registration order.
    pub fn scenarios(&self, plan: &OperationPlan<'_>, escalate: bool) -> Vec<TestScenario> {
        self.strategies
            .iter()
            .filter(|s| escalate || s.tier() == Tier::Base)
            .filter(|s| s.applies(plan))
            .map(|s| s.build(plan))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Parameter;
    use crate::synth::literal::{plan_parameter, return_category};
    use crate::domain::TypeModel;

    fn tags(op: &OperationModel, escalate: bool) -> Vec<StrategyTag> {
        let none: &[TypeModel] = &[];
        let params: Vec<ParamPlan> = op
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| plan_parameter(&p.name, &p.type_name, &format!("arg{}", i), none).unwrap())
            .collect();
        let receiver: Vec<ParamPlan> = Vec::new();
        let plan = OperationPlan {
            op,
            header: Path::new("Shape.h"),
            receiver: (op.kind == OperationKind::Method).then_some(receiver.as_slice()),
            params: &params,
            returns: if op.kind == OperationKind::Method {
                return_category(&op.return_type)
            } else {
                ReturnCategory::Void
            },
        };
        StrategyRegistry::default()
            .scenarios(&plan, escalate)
            .into_iter()
            .map(|s| s.strategy)
            .collect()
    }

    #[test]
    fn test_constructor_gets_construct_only() {
        let op = OperationModel::constructor("Shape");
        assert_eq!(tags(&op, false), vec![StrategyTag::ConstructOnly]);
    }

    #[test]
    fn test_numeric_return() {
        let op = OperationModel::method("Shape", "Area", "int");
        assert_eq!(tags(&op, false), vec![StrategyTag::NoThrow, StrategyTag::BoundedValue]);
        assert_eq!(
            tags(&op, true),
            vec![StrategyTag::NoThrow, StrategyTag::BoundedValue, StrategyTag::InvokeRepeated]
        );
    }

    #[test]
    fn test_void_return_gets_once_and_repeated() {
        let op = OperationModel::method("Shape", "Reset", "void");
        assert_eq!(tags(&op, false), vec![StrategyTag::InvokeOnce, StrategyTag::InvokeRepeated]);
    }

    #[test]
    fn test_bool_return_truthy_only_for_success_verbs() {
        let init = OperationModel::method("Port", "Open", "bool");
        assert_eq!(tags(&init, false), vec![StrategyTag::InvokeOnce, StrategyTag::TruthyPath]);
        let query = OperationModel::method("Port", "IsBusy", "bool");
        assert_eq!(tags(&query, false), vec![StrategyTag::InvokeOnce]);
    }

    #[test]
    fn test_boundary_argument_needs_numeric_or_string_parameter() {
        let op = OperationModel::method("Shape", "Scale", "void")
            .with_parameters(vec![Parameter::new("factor", "double")]);
        assert!(tags(&op, true).contains(&StrategyTag::BoundaryArgument));
        assert!(!tags(&op, false).contains(&StrategyTag::BoundaryArgument));

        let op = OperationModel::method("Shape", "Mirror", "void")
            .with_parameters(vec![Parameter::new("axis", "Axis")]);
        assert!(!tags(&op, true).contains(&StrategyTag::BoundaryArgument));
    }

    #[test]
    fn test_repeated_scenarios_call_at_least_three_times() {
        let op = OperationModel::method("Shape", "Reset", "void");
        let none: &[ParamPlan] = &[];
        let plan = OperationPlan {
            op: &op,
            header: Path::new("Shape.h"),
            receiver: Some(none),
            params: none,
            returns: ReturnCategory::Void,
        };
        let scenario = InvokeRepeated::base().build(&plan);
        assert!(scenario.calls >= 3);
        assert_eq!(scenario.id, "Shape::Reset()#invoke-repeated");
    }
}
