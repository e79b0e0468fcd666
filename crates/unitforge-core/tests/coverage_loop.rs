//! Coverage merging and controller decisions across iterations.

use unitforge_core::coverage::{parse_tracefile, CoverageMap};
use unitforge_core::domain::{ExecutionResult, OperationModel, Outcome, TerminationReason};
use unitforge_core::{Aggregator, Decision, IterationController, Limits};

const A: &str = "SF:/proj/src/Shape.cpp\nFN:3,_ZN5Shape4AreaEv\nFNDA:1,_ZN5Shape4AreaEv\nDA:3,1\nDA:4,1\nDA:5,0\nend_of_record\n";
const B: &str = "SF:/proj/src/Shape.cpp\nFN:8,_ZN5Shape5ResetEv\nFNDA:2,_ZN5Shape5ResetEv\nDA:8,2\nDA:9,2\nend_of_record\nSF:/proj/src/Bus.cpp\nDA:1,0\nend_of_record\n";
const C: &str = "SF:/proj/src/Shape.cpp\nDA:5,3\nend_of_record\n";

fn merged(order: &[&str]) -> CoverageMap {
    let mut map = CoverageMap::default();
    for text in order {
        map.merge(&parse_tracefile(text).unwrap());
    }
    map
}

#[test]
fn merge_is_order_independent() {
    let reference = merged(&[A, B, C]);
    for order in [[A, C, B], [B, A, C], [B, C, A], [C, A, B], [C, B, A]] {
        assert_eq!(merged(&order), reference);
    }

    // (A + B) + C == A + (B + C)
    let mut left = merged(&[A, B]);
    left.merge(&merged(&[C]));
    let mut right = merged(&[A]);
    right.merge(&merged(&[B, C]));
    assert_eq!(left, right);

    assert_eq!(reference.line_totals(), (6, 5));
}

fn limits() -> Limits {
    Limits {
        target_percent: 90.0,
        max_iterations: 10,
        plateau_epsilon: 0.5,
        plateau_patience: 2,
        low_coverage_ratio: 0.5,
        wall_clock_budget: None,
    }
}

fn passed_with(dir: &std::path::Path, name: &str, body: &str) -> ExecutionResult {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut result = ExecutionResult::new(name, name, Outcome::CompiledPassed);
    result.coverage_samples = vec![path];
    result
}

#[test]
fn loop_plateaus_when_new_samples_add_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let sample = format!(
        "SF:{}/src/Shape.cpp\nFN:3,_ZN5Shape4AreaEv\nFNDA:1,_ZN5Shape4AreaEv\nDA:3,1\nDA:4,0\nend_of_record\n",
        root.display()
    );
    let candidates = vec![
        OperationModel::method("Shape", "Area", "int"),
        OperationModel::method("Shape", "Reset", "void"),
    ];

    let mut aggregator = Aggregator::new(root);
    let mut controller = IterationController::new("run", limits());

    // Iteration 1 measures 50%; Reset was never seen so it is prioritised.
    let i = controller.begin_iteration().unwrap();
    controller.jobs_drained();
    let report = aggregator.aggregate(i, &[passed_with(root, "1.info", &sample)]).unwrap();
    assert_eq!(report.line_percent, 50.0);
    let decision = controller
        .evaluate(&report, aggregator.cumulative(), &candidates)
        .unwrap();
    assert_eq!(
        decision,
        Decision::Continue {
            priority: vec!["Shape::Reset()".to_string()]
        }
    );

    // Iterations 2 and 3 only produce failing artifacts: flat twice.
    for _ in 0..2 {
        let i = controller.begin_iteration().unwrap();
        controller.jobs_drained();
        let failed = ExecutionResult::new("f", "f", Outcome::CompiledFailed);
        let report = aggregator.aggregate(i, &[failed]).unwrap();
        assert_eq!(report.line_percent, 50.0);
        controller
            .evaluate(&report, aggregator.cumulative(), &candidates)
            .unwrap();
    }
    assert_eq!(controller.state().termination, Some(TerminationReason::Plateaued));
    assert_eq!(controller.state().history.len(), 3);
}
