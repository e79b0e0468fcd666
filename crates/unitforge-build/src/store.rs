//! Persisted run layout.
//!
//! ```text
//! <output>/
//!   run.json              IterationState, rewritten after each iteration
//!   model.json            latest SourceModel
//!   summary.json          RunSummary
//!   SUMMARY.md
//!   iteration-001/
//!     scenarios.json
//!     gaps.json
//!     results.json
//!     coverage.json       write-once
//!     artifacts/<slug>/
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;
use unitforge_core::reporting::{read_json, write_json, write_summary_md};
use unitforge_core::{CoverageGap, CoverageReport, ExecutionResult, IterationState, RunSummary, SourceModel, TestScenario};

const STATE_FILE: &str = "run.json";
const MODEL_FILE: &str = "model.json";
const SUMMARY_JSON: &str = "summary.json";
const SUMMARY_MD: &str = "SUMMARY.md";
const SCENARIOS_FILE: &str = "scenarios.json";
const GAPS_FILE: &str = "gaps.json";
const RESULTS_FILE: &str = "results.json";
const COVERAGE_FILE: &str = "coverage.json";

/// Everything recorded for one completed iteration.
#[derive(Debug, Clone)]
pub struct PersistedIteration {
    pub iteration: u32,
    pub scenarios: Vec<TestScenario>,
    pub gaps: Vec<CoverageGap>,
    pub results: Vec<ExecutionResult>,
    pub report: CoverageReport,
}

/// Filesystem layout of one run's output directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

fn iteration_dir_name(iteration: u32) -> String {
    format!("iteration-{:03}", iteration)
}

fn parse_iteration_dir(name: &str) -> Option<u32> {
    name.strip_prefix("iteration-")?.parse().ok()
}

impl RunStore {
    /// Create the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.dir.join(iteration_dir_name(iteration))
    }

    pub fn artifacts_dir(&self, iteration: u32) -> PathBuf {
        self.iteration_dir(iteration).join("artifacts")
    }

    /// Remove everything a previous run left behind.
    pub fn reset(&self) -> Result<()> {
        for number in self.iteration_numbers()? {
            let dir = self.iteration_dir(number);
            std::fs::remove_dir_all(&dir).with_context(|| format!("remove {:?}", dir))?;
        }
        for file in [STATE_FILE, SUMMARY_JSON, SUMMARY_MD] {
            let path = self.dir.join(file);
            if path.exists() {
                std::fs::remove_file(&path).with_context(|| format!("remove {:?}", path))?;
            }
        }
        Ok(())
    }

    /// Start iteration `iteration` from an empty directory. Leftovers of an
    /// iteration that never produced a report are discarded.
    pub fn begin_iteration(&self, iteration: u32) -> Result<PathBuf> {
        let dir = self.iteration_dir(iteration);
        if dir.join(COVERAGE_FILE).exists() {
            bail!("iteration {} already has a coverage report", iteration);
        }
        if dir.exists() {
            debug!(dir = %dir.display(), "Discarding incomplete iteration");
            std::fs::remove_dir_all(&dir).with_context(|| format!("remove {:?}", dir))?;
        }
        let artifacts = self.artifacts_dir(iteration);
        std::fs::create_dir_all(&artifacts).with_context(|| format!("create {:?}", artifacts))?;
        Ok(dir)
    }

    pub fn write_state(&self, state: &IterationState) -> Result<()> {
        write_json(&self.dir.join(STATE_FILE), state)
    }

    pub fn read_state(&self) -> Result<Option<IterationState>> {
        let path = self.dir.join(STATE_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn write_model(&self, model: &SourceModel) -> Result<()> {
        write_json(&self.dir.join(MODEL_FILE), model)
    }

    pub fn write_scenarios(&self, iteration: u32, scenarios: &[TestScenario]) -> Result<()> {
        write_json(&self.iteration_dir(iteration).join(SCENARIOS_FILE), scenarios)
    }

    pub fn write_gaps(&self, iteration: u32, gaps: &[CoverageGap]) -> Result<()> {
        write_json(&self.iteration_dir(iteration).join(GAPS_FILE), gaps)
    }

    pub fn write_results(&self, iteration: u32, results: &[ExecutionResult]) -> Result<()> {
        write_json(&self.iteration_dir(iteration).join(RESULTS_FILE), results)
    }

    /// Write an iteration's report. Existing reports are never replaced.
    pub fn write_report(&self, report: &CoverageReport) -> Result<()> {
        let path = self.iteration_dir(report.iteration).join(COVERAGE_FILE);
        let content = serde_json::to_string_pretty(report).context("serialize coverage report")?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create {:?} (reports are write-once)", path))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("write {:?}", path))?;
        Ok(())
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        write_json(&self.dir.join(SUMMARY_JSON), summary)?;
        write_summary_md(&self.dir.join(SUMMARY_MD), summary)
    }

    pub fn read_summary(&self) -> Result<RunSummary> {
        read_json(&self.dir.join(SUMMARY_JSON))
    }

    fn iteration_numbers(&self) -> Result<Vec<u32>> {
        let mut numbers = Vec::new();
        for entry in std::fs::read_dir(&self.dir).with_context(|| format!("read {:?}", self.dir))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(n) = entry.file_name().to_str().and_then(parse_iteration_dir) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// One iteration, if it completed with a report.
    pub fn load_iteration(&self, iteration: u32) -> Result<Option<PersistedIteration>> {
        let dir = self.iteration_dir(iteration);
        if !dir.join(COVERAGE_FILE).is_file() {
            return Ok(None);
        }
        Ok(Some(PersistedIteration {
            iteration,
            scenarios: read_json(&dir.join(SCENARIOS_FILE))?,
            gaps: read_json(&dir.join(GAPS_FILE))?,
            results: read_json(&dir.join(RESULTS_FILE))?,
            report: read_json(&dir.join(COVERAGE_FILE))?,
        }))
    }

    /// Iterations `1..=up_to` that completed with a report, oldest first.
    pub fn load_iterations(&self, up_to: u32) -> Result<Vec<PersistedIteration>> {
        let mut loaded = Vec::new();
        for iteration in self.iteration_numbers()?.into_iter().filter(|n| *n <= up_to) {
            loaded.extend(self.load_iteration(iteration)?);
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use unitforge_core::Outcome;

    fn report(iteration: u32) -> CoverageReport {
        CoverageReport {
            id: CoverageReport::report_id(iteration),
            iteration,
            generated_at: Utc::now(),
            files: BTreeMap::new(),
            lines_found: 4,
            lines_hit: 2,
            line_percent: 50.0,
            functions_found: 1,
            functions_hit: 1,
            samples_merged: 1,
            samples_dropped: 0,
        }
    }

    fn complete(store: &RunStore, iteration: u32) {
        store.begin_iteration(iteration).unwrap();
        store.write_scenarios(iteration, &[]).unwrap();
        store.write_gaps(iteration, &[]).unwrap();
        store
            .write_results(iteration, &[ExecutionResult::new("a", "s", Outcome::CompiledPassed)])
            .unwrap();
        store.write_report(&report(iteration)).unwrap();
    }

    #[test]
    fn test_reports_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path().join("out")).unwrap();
        complete(&store, 1);
        assert!(store.write_report(&report(1)).is_err());
        assert!(store.begin_iteration(1).is_err());
    }

    #[test]
    fn test_load_skips_incomplete_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        complete(&store, 1);
        complete(&store, 2);
        store.begin_iteration(3).unwrap();
        store.write_scenarios(3, &[]).unwrap();

        let loaded = store.load_iterations(u32::MAX).unwrap();
        let numbers: Vec<u32> = loaded.iter().map(|p| p.iteration).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(loaded[0].results.len(), 1);
        assert_eq!(loaded[1].report.id, "coverage-002");

        assert_eq!(store.load_iterations(1).unwrap().len(), 1);
        assert!(store.load_iteration(2).unwrap().is_some());
        assert!(store.load_iteration(3).unwrap().is_none());

        // Restarting iteration 3 discards its leftovers.
        let dir3 = store.begin_iteration(3).unwrap();
        assert!(!dir3.join(SCENARIOS_FILE).exists());
        assert!(dir3.join("artifacts").is_dir());
    }

    #[test]
    fn test_state_round_trip_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        assert!(store.read_state().unwrap().is_none());

        let state = IterationState::new("run-1", 80.0, 3);
        store.write_state(&state).unwrap();
        assert_eq!(store.read_state().unwrap(), Some(state));

        complete(&store, 1);
        store.reset().unwrap();
        assert!(store.read_state().unwrap().is_none());
        assert!(!store.iteration_dir(1).exists());
    }
}
