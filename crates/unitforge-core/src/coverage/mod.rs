//! Coverage Aggregator.
//!
//! Merges the tracefiles of `compiled-passed` artifacts into a cumulative
//! [`CoverageMap`] restricted to the project root, and snapshots it into one
//! write-once [`CoverageReport`] per iteration.

pub mod lcov;
pub mod map;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionResult, ForgeError, ForgeResult};
use crate::metrics::METRICS;
use crate::obs;

pub use lcov::{parse_tracefile, SampleError};
pub use map::{function_matches, percent, CoverageMap, FileCoverage, FunctionCoverage};

/// Totals for one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub lines_found: u64,
    pub lines_hit: u64,
    pub functions_found: u64,
    pub functions_hit: u64,
    pub line_percent: f64,
}

/// Coverage as of the end of one iteration, including everything measured
/// in earlier iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub id: String,
    pub iteration: u32,
    pub generated_at: DateTime<Utc>,
    /// Keyed by path relative to the project root.
    pub files: BTreeMap<PathBuf, FileSummary>,
    pub lines_found: u64,
    pub lines_hit: u64,
    pub line_percent: f64,
    pub functions_found: u64,
    pub functions_hit: u64,
    /// Samples merged and dropped during this iteration only.
    pub samples_merged: usize,
    pub samples_dropped: usize,
}

impl CoverageReport {
    pub fn report_id(iteration: u32) -> String {
        format!("coverage-{:03}", iteration)
    }

    fn snapshot(iteration: u32, map: &CoverageMap, merged: usize, dropped: usize) -> Self {
        let files = map
            .files()
            .map(|(path, file)| {
                let (lines_found, lines_hit) = file.line_totals();
                let (functions_found, functions_hit) = file.function_totals();
                (
                    path.clone(),
                    FileSummary {
                        lines_found,
                        lines_hit,
                        functions_found,
                        functions_hit,
                        line_percent: percent(lines_hit, lines_found),
                    },
                )
            })
            .collect();
        let (lines_found, lines_hit) = map.line_totals();
        let (functions_found, functions_hit) = map.function_totals();
        Self {
            id: Self::report_id(iteration),
            iteration,
            generated_at: Utc::now(),
            files,
            lines_found,
            lines_hit,
            line_percent: percent(lines_hit, lines_found),
            functions_found,
            functions_hit,
            samples_merged: merged,
            samples_dropped: dropped,
        }
    }
}

/// Counts from absorbing one batch of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Absorbed {
    pub merged: usize,
    pub dropped: usize,
}

/// Owns the cumulative coverage of a run.
#[derive(Debug, Clone)]
pub struct Aggregator {
    root: PathBuf,
    cumulative: CoverageMap,
    last_report: u32,
}

/// Read and validate one tracefile.
pub fn load_sample(path: &Path) -> Result<CoverageMap, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let text = String::from_utf8(bytes).map_err(|_| "tracefile is not UTF-8".to_string())?;
    parse_tracefile(&text).map_err(|e| e.to_string())
}

impl Aggregator {
    /// `root` should be canonical: tracefile paths are absolute.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cumulative: CoverageMap::default(),
            last_report: 0,
        }
    }

    pub fn cumulative(&self) -> &CoverageMap {
        &self.cumulative
    }

    pub fn last_report(&self) -> u32 {
        self.last_report
    }

    /// Merge the samples of passed results into the cumulative map without
    /// producing a report. Results of any other outcome are ignored, and
    /// unreadable or corrupt samples are dropped.
    pub fn absorb(&mut self, results: &[ExecutionResult]) -> Absorbed {
        let mut counts = Absorbed::default();
        let mut batch = CoverageMap::default();
        for result in results.iter().filter(|r| r.passed()) {
            for sample in &result.coverage_samples {
                match load_sample(sample) {
                    Ok(map) => {
                        batch.merge(&map.restricted_to(&self.root));
                        counts.merged += 1;
                    }
                    Err(reason) => {
                        obs::emit_sample_dropped(&sample.display().to_string(), &reason);
                        METRICS.inc_samples_dropped();
                        counts.dropped += 1;
                    }
                }
            }
        }
        self.cumulative.merge(&batch);
        counts
    }

    /// Absorb an iteration's results and produce its report. Each iteration
    /// gets exactly one report; asking again is an error.
    pub fn aggregate(&mut self, iteration: u32, results: &[ExecutionResult]) -> ForgeResult<CoverageReport> {
        if iteration <= self.last_report {
            return Err(ForgeError::ReportExists(iteration));
        }
        let counts = self.absorb(results);
        self.last_report = iteration;
        let report = CoverageReport::snapshot(iteration, &self.cumulative, counts.merged, counts.dropped);
        obs::emit_coverage_merged(iteration, counts.merged, counts.dropped, report.line_percent);
        Ok(report)
    }

    /// Restore state from persisted iterations (oldest first) on resume.
    pub fn restore(&mut self, iterations: &[(u32, Vec<ExecutionResult>)]) {
        for (iteration, results) in iterations {
            self.absorb(results);
            self.last_report = self.last_report.max(*iteration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;

    fn tracefile(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn passed(samples: Vec<PathBuf>) -> ExecutionResult {
        let mut r = ExecutionResult::new("a", "s", Outcome::CompiledPassed);
        r.coverage_samples = samples;
        r
    }

    #[test]
    fn test_only_passed_results_contribute() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let body = format!("SF:{}/src/a.cpp\nDA:1,1\nDA:2,0\nend_of_record\n", root.display());
        let sample = tracefile(root, "a.info", &body);

        let mut failed = ExecutionResult::new("b", "t", Outcome::CompiledFailed);
        failed.coverage_samples = vec![sample.clone()];

        let mut agg = Aggregator::new(root);
        let report = agg.aggregate(1, &[failed]).unwrap();
        assert_eq!(report.lines_found, 0);
        assert_eq!(report.line_percent, 0.0);

        let report = agg.aggregate(2, &[passed(vec![sample])]).unwrap();
        assert_eq!(report.lines_found, 2);
        assert_eq!(report.line_percent, 50.0);
        assert!(report.files.contains_key(Path::new("src/a.cpp")));
    }

    #[test]
    fn test_corrupt_and_foreign_samples() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let empty = tracefile(root, "empty.info", "");
        let foreign = tracefile(root, "sys.info", "SF:/usr/include/c++/vector\nDA:1,1\nend_of_record\n");
        let missing = root.join("missing.info");

        let mut agg = Aggregator::new(root);
        let report = agg.aggregate(1, &[passed(vec![empty, foreign, missing])]).unwrap();
        assert_eq!(report.samples_dropped, 2);
        assert_eq!(report.samples_merged, 1);
        assert_eq!(report.lines_found, 0);
    }

    #[test]
    fn test_reports_are_cumulative_and_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let first = tracefile(root, "1.info", &format!("SF:{}/a.cpp\nDA:1,1\nDA:2,0\nend_of_record\n", root.display()));
        let second = tracefile(root, "2.info", &format!("SF:{}/a.cpp\nDA:2,4\nend_of_record\n", root.display()));

        let mut agg = Aggregator::new(root);
        let r1 = agg.aggregate(1, &[passed(vec![first])]).unwrap();
        let r2 = agg.aggregate(2, &[passed(vec![second])]).unwrap();
        assert_eq!(r1.line_percent, 50.0);
        assert_eq!(r2.line_percent, 100.0);
        assert_eq!(r1.id, "coverage-001");

        assert!(matches!(agg.aggregate(2, &[]), Err(ForgeError::ReportExists(2))));
    }

    #[test]
    fn test_restore_rebuilds_cumulative_map() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let sample = tracefile(root, "1.info", &format!("SF:{}/a.cpp\nDA:1,1\nend_of_record\n", root.display()));

        let mut agg = Aggregator::new(root);
        agg.restore(&[(1, vec![passed(vec![sample])])]);
        assert_eq!(agg.last_report(), 1);
        assert_eq!(agg.cumulative().line_totals(), (1, 1));
        assert!(agg.aggregate(1, &[]).is_err());
        assert!(agg.aggregate(2, &[]).is_ok());
    }
}
