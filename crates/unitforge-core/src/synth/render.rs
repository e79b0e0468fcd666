//! GoogleTest rendering of a scenario.
//!
//! One scenario renders to one complete translation unit. The same scenario
//! always renders to the same text for a given [`Rendering`].

use std::fmt::Write as _;

use crate::domain::{
    slugify, ArgumentBinding, ExpectedOutcome, OperationKind, Rendering, StrategyTag,
    TestScenario,
};

use super::literal::{return_category, value_bound, ReturnCategory, ValueBound};

/// Name of the variable holding the receiver in instance-method tests.
pub const RECEIVER_VAR: &str = "obj";

/// Namespace part of a qualified owner name, if any.
fn owner_namespace(owner: &str) -> Option<&str> {
    owner.rfind("::").map(|pos| &owner[..pos])
}

fn argument_list(bindings: &[ArgumentBinding], rendering: Rendering) -> String {
    bindings
        .iter()
        .map(|b| b.call_expr(rendering))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_locals(body: &mut String, bindings: &[ArgumentBinding], rendering: Rendering) {
    for binding in bindings {
        if let Some(local) = &binding.local {
            let _ = writeln!(
                body,
                "    {} {} = {};",
                local.type_name,
                local.var,
                binding.value(rendering)
            );
        }
    }
}

/// Expression invoking the operation once.
fn call_expression(scenario: &TestScenario, rendering: Rendering) -> String {
    let op = &scenario.operation;
    let args = argument_list(&scenario.arguments, rendering);
    if op.is_static {
        format!("{}::{}({})", op.owner, op.name, args)
    } else {
        format!("{}.{}({})", RECEIVER_VAR, op.name, args)
    }
}

/// Test suite name: `geo_Shape_Area`.
pub fn suite_name(scenario: &TestScenario) -> String {
    let op = &scenario.operation;
    slugify(&format!("{}_{}", op.owner, op.name.trim_start_matches('~')))
}

/// Render a complete test translation unit.
///
/// `includes` lists quoted headers in order; the first is normally the
/// target's own header.
pub fn render_test(scenario: &TestScenario, rendering: Rendering, includes: &[String]) -> String {
    let op = &scenario.operation;
    let mut out = String::new();

    let _ = writeln!(out, "// Generated by unitforge: {}", scenario.id);
    if rendering == Rendering::Fallback {
        let _ = writeln!(out, "// Fallback rendering.");
    }
    out.push_str("#include <gtest/gtest.h>\n");
    out.push_str("#include <cmath>\n");
    out.push_str("#include <limits>\n");
    out.push_str("#include <string>\n");
    out.push_str("#include <type_traits>\n");
    let uses_string_view = scenario
        .arguments
        .iter()
        .chain(scenario.receiver.iter().flatten())
        .any(|b| b.value(rendering).contains("string_view"));
    if uses_string_view {
        out.push_str("#include <string_view>\n");
    }
    for include in includes {
        let _ = writeln!(out, "#include \"{}\"", include);
    }
    out.push('\n');
    if let Some(ns) = owner_namespace(&op.owner) {
        let _ = writeln!(out, "using namespace {};\n", ns);
    }

    let _ = writeln!(
        out,
        "TEST({}, {}) {{",
        suite_name(scenario),
        slugify(scenario.strategy.as_str())
    );

    let mut body = String::new();
    match op.kind {
        OperationKind::Constructor => {
            write_locals(&mut body, &scenario.arguments, rendering);
            let construct = if scenario.arguments.is_empty() {
                format!("{} instance{{}};", op.owner)
            } else {
                format!(
                    "{} instance({});",
                    op.owner,
                    argument_list(&scenario.arguments, rendering)
                )
            };
            let _ = writeln!(body, "    EXPECT_NO_THROW({{ {} (void)instance; }});", construct);
        }
        OperationKind::Method | OperationKind::Destructor => {
            if let Some(receiver) = &scenario.receiver {
                write_locals(&mut body, receiver, rendering);
                if receiver.is_empty() {
                    let _ = writeln!(body, "    {} {}{{}};", op.owner, RECEIVER_VAR);
                } else {
                    let _ = writeln!(
                        body,
                        "    {} {}({});",
                        op.owner,
                        RECEIVER_VAR,
                        argument_list(receiver, rendering)
                    );
                }
            }
            write_locals(&mut body, &scenario.arguments, rendering);
            write_invocations(&mut body, scenario, rendering);
        }
    }

    out.push_str(&body);
    out.push_str("}\n");
    out
}

fn write_invocations(body: &mut String, scenario: &TestScenario, rendering: Rendering) {
    let call = call_expression(scenario, rendering);
    let is_void = return_category(&scenario.operation.return_type) == ReturnCategory::Void;

    if scenario.strategy == StrategyTag::BoundedValue {
        let op = &scenario.operation;
        let _ = writeln!(body, "    const auto result = {};", call);
        match value_bound(&op.return_type, &op.name) {
            Some(ValueBound::NotNan) => body.push_str("    EXPECT_FALSE(std::isnan(result));\n"),
            Some(ValueBound::NonNegative) => body.push_str("    EXPECT_GE(result, 0);\n"),
            // Smoke call: any representable value is acceptable.
            None => body.push_str("    (void)result;\n"),
        }
        return;
    }

    for _ in 0..scenario.calls.max(1) {
        match scenario.expected {
            ExpectedOutcome::MustReturnTruthy => {
                let _ = writeln!(body, "    EXPECT_TRUE({});", call);
            }
            ExpectedOutcome::MustNotThrow | ExpectedOutcome::ValueUnconstrained => {
                if is_void {
                    let _ = writeln!(body, "    EXPECT_NO_THROW({});", call);
                } else {
                    let _ = writeln!(body, "    EXPECT_NO_THROW((void){});", call);
                }
            }
        }
    }
}

/// Number of times the rendered body invokes the operation.
pub fn invocation_count(source: &str, scenario: &TestScenario) -> usize {
    let op = &scenario.operation;
    let needle = if op.kind == OperationKind::Constructor {
        format!("{} instance", op.owner)
    } else if op.is_static {
        format!("{}::{}(", op.owner, op.name)
    } else {
        format!("{}.{}(", RECEIVER_VAR, op.name)
    };
    source.matches(&needle).count()
}

/// Include line spelling for a header path: its file name, since the
/// header's own directory is on the include path.
pub fn include_name(header: &std::path::Path) -> String {
    header
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| header.to_string_lossy().into_owned())
}
