use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coverage::{CoverageReport, FileSummary};
use crate::domain::{ExecutionResult, IterationState, Outcome, TerminationReason};
use crate::synth::CoverageGap;

pub const SUMMARY_SCHEMA_VERSION: &str = "1.0";

/// Per-outcome artifact counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub compiled_passed: usize,
    pub compiled_failed: usize,
    pub compile_error: usize,
    pub timeout: usize,
    pub fallback_used: usize,
    pub enhanced: usize,
}

impl OutcomeCounts {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut counts = Self::default();
        for r in results {
            match r.outcome {
                Outcome::CompiledPassed => counts.compiled_passed += 1,
                Outcome::CompiledFailed => counts.compiled_failed += 1,
                Outcome::CompileError => counts.compile_error += 1,
                Outcome::Timeout => counts.timeout += 1,
            }
            counts.fallback_used += usize::from(r.fallback_used);
            counts.enhanced += usize::from(r.enhanced);
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.compiled_passed + self.compiled_failed + self.compile_error + self.timeout
    }
}

/// One iteration row of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub report_id: String,
    pub line_percent: f64,
    pub scenarios: usize,
    pub gaps: usize,
    pub outcomes: OutcomeCounts,
}

/// Final summary of a run, persisted as SUMMARY.md.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: String,
    pub project_root: PathBuf,
    pub target_percent: f64,
    pub termination: Option<TerminationReason>,
    pub final_line_percent: f64,
    pub iterations: Vec<IterationSummary>,
    /// Per-file totals of the last report.
    pub files: BTreeMap<PathBuf, FileSummary>,
    /// Gaps of the last iteration that recorded any.
    pub gaps: Vec<CoverageGap>,
}

impl RunSummary {
    pub fn new(state: &IterationState, project_root: &Path) -> Self {
        Self {
            schema_version: SUMMARY_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            run_id: state.run_id.clone(),
            project_root: project_root.to_path_buf(),
            target_percent: state.target_percent,
            termination: state.termination,
            final_line_percent: state.latest_percent(),
            iterations: Vec::new(),
            files: BTreeMap::new(),
            gaps: Vec::new(),
        }
    }

    /// Add one iteration. Iterations are expected oldest first; the latest
    /// report's files and the latest non-empty gap list are kept.
    pub fn push_iteration(
        &mut self,
        report: &CoverageReport,
        scenarios: usize,
        gaps: &[CoverageGap],
        results: &[ExecutionResult],
    ) {
        self.iterations.push(IterationSummary {
            iteration: report.iteration,
            report_id: report.id.clone(),
            line_percent: report.line_percent,
            scenarios,
            gaps: gaps.len(),
            outcomes: OutcomeCounts::from_results(results),
        });
        self.files = report.files.clone();
        self.final_line_percent = report.line_percent;
        if !gaps.is_empty() {
            self.gaps = gaps.to_vec();
        }
    }

    pub fn target_met(&self) -> bool {
        self.termination == Some(TerminationReason::TargetMet)
    }
}

/// Render SUMMARY.md.
pub fn render_summary_md(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("# unitforge Run Summary\n\n");
    out.push_str(&format!(
        "- run: `{}`\n- project: `{}`\n- coverage: {:.1}% (target {:.1}%)\n- termination: {}\n\n",
        summary.run_id,
        summary.project_root.display(),
        summary.final_line_percent,
        summary.target_percent,
        summary.termination.map_or("running", |r| r.as_str()),
    ));

    out.push_str("## Iterations\n");
    out.push_str("| # | coverage | scenarios | passed | failed | compile error | timeout | fallback | gaps |\n");
    out.push_str("|---|---|---|---|---|---|---|---|---|\n");
    for it in &summary.iterations {
        out.push_str(&format!(
            "| {} | {:.1}% | {} | {} | {} | {} | {} | {} | {} |\n",
            it.iteration,
            it.line_percent,
            it.scenarios,
            it.outcomes.compiled_passed,
            it.outcomes.compiled_failed,
            it.outcomes.compile_error,
            it.outcomes.timeout,
            it.outcomes.fallback_used,
            it.gaps,
        ));
    }
    out.push('\n');

    if !summary.files.is_empty() {
        out.push_str("## Files\n");
        let mut files: Vec<(&PathBuf, &FileSummary)> = summary.files.iter().collect();
        files.sort_by(|a, b| a.1.line_percent.total_cmp(&b.1.line_percent).then_with(|| a.0.cmp(b.0)));
        for (path, f) in files {
            out.push_str(&format!(
                "- `{}`: {:.1}% ({}/{} lines, {}/{} functions)\n",
                path.display(),
                f.line_percent,
                f.lines_hit,
                f.lines_found,
                f.functions_hit,
                f.functions_found
            ));
        }
        out.push('\n');
    }

    if !summary.gaps.is_empty() {
        out.push_str("## Ineligible Operations\n");
        for gap in &summary.gaps {
            out.push_str(&format!("- `{}`: {}\n", gap.operation, gap.reason));
        }
    }
    out
}

pub fn write_summary_md(path: &Path, summary: &RunSummary) -> Result<()> {
    let md = render_summary_md(summary);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write any artifact as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("serialize artifact")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parse {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::GapReason;

    fn report(iteration: u32, percent: f64) -> CoverageReport {
        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("src/Shape.cpp"),
            FileSummary {
                lines_found: 10,
                lines_hit: 4,
                functions_found: 2,
                functions_hit: 1,
                line_percent: 40.0,
            },
        );
        CoverageReport {
            id: CoverageReport::report_id(iteration),
            iteration,
            generated_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            files,
            lines_found: 10,
            lines_hit: 4,
            line_percent: percent,
            functions_found: 2,
            functions_hit: 1,
            samples_merged: 1,
            samples_dropped: 0,
        }
    }

    #[test]
    fn outcome_counts_cover_every_outcome() {
        let mut fallback = ExecutionResult::new("a", "s", Outcome::CompiledFailed);
        fallback.fallback_used = true;
        let results = vec![
            ExecutionResult::new("b", "s", Outcome::CompiledPassed),
            fallback,
            ExecutionResult::new("c", "s", Outcome::Timeout),
        ];
        let counts = OutcomeCounts::from_results(&results);
        assert_eq!(counts.compiled_passed, 1);
        assert_eq!(counts.compiled_failed, 1);
        assert_eq!(counts.timeout, 1);
        assert_eq!(counts.fallback_used, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn summary_markdown_lists_iterations_files_and_gaps() {
        let mut state = IterationState::new("run-1", 80.0, 3);
        state.termination = Some(TerminationReason::Plateaued);
        let mut summary = RunSummary::new(&state, Path::new("/proj"));
        let gaps = vec![CoverageGap {
            operation: "Factory::Build()".to_string(),
            header: PathBuf::from("Factory.h"),
            reason: GapReason::OwnerNotInstantiable,
        }];
        summary.push_iteration(&report(1, 40.0), 5, &gaps, &[]);

        let md = render_summary_md(&summary);
        assert!(md.contains("- coverage: 40.0% (target 80.0%)"));
        assert!(md.contains("- termination: plateaued"));
        assert!(md.contains("| 1 | 40.0% | 5 | 0 | 0 | 0 | 0 | 0 | 1 |"));
        assert!(md.contains("- `src/Shape.cpp`: 40.0% (4/10 lines, 1/2 functions)"));
        assert!(md.contains("- `Factory::Build()`: owner type is not instantiable"));
        assert!(!summary.target_met());
    }

    #[test]
    fn json_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        let original = report(2, 55.0);
        write_json(&path, &original).unwrap();
        let back: CoverageReport = read_json(&path).unwrap();
        assert_eq!(back, original);
    }
}
