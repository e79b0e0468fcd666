//! lcov capture and project-root filtering.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use unitforge_core::CoverageToolConfig;

use crate::runner::{run_command, CommandOutcome};

/// Runs lcov over an artifact directory after its binary passed.
#[derive(Debug, Clone)]
pub struct LcovTool {
    config: CoverageToolConfig,
    root: PathBuf,
}

pub const CAPTURE_FILE: &str = "capture.info";
pub const COVERAGE_FILE: &str = "coverage.info";

impl LcovTool {
    /// `root` is the canonical project root used for `--extract`.
    pub fn new(config: CoverageToolConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.config.lcov
    }

    fn capture_args(&self, dir: &Path) -> Vec<String> {
        let mut args = vec![
            "--capture".to_string(),
            "--directory".to_string(),
            dir.display().to_string(),
            "--output-file".to_string(),
            dir.join(CAPTURE_FILE).display().to_string(),
        ];
        if let Some(gcov) = &self.config.gcov {
            args.push("--gcov-tool".to_string());
            args.push(gcov.clone());
        }
        args
    }

    fn extract_args(&self, dir: &Path) -> Vec<String> {
        vec![
            "--extract".to_string(),
            dir.join(CAPTURE_FILE).display().to_string(),
            format!("{}/*", self.root.display()),
            "--output-file".to_string(),
            dir.join(COVERAGE_FILE).display().to_string(),
        ]
    }

    async fn step(&self, dir: &Path, args: &[String], name: &str) -> bool {
        match run_command(&self.config.lcov, args, dir, self.config.timeout()).await {
            Ok(CommandOutcome::Completed(output)) if output.passed() => true,
            Ok(CommandOutcome::Completed(output)) => {
                warn!(step = name, exit_code = output.exit_code, stderr = %output.stderr.trim(), "lcov failed");
                false
            }
            Ok(CommandOutcome::TimedOut { .. }) => {
                warn!(step = name, "lcov timed out");
                false
            }
            Err(e) => {
                warn!(step = name, error = %e, "lcov could not be started");
                false
            }
        }
    }

    /// Capture and filter the coverage of one artifact directory. Returns
    /// the filtered tracefile, or `None` when no sample could be produced.
    pub async fn collect(&self, dir: &Path) -> Option<PathBuf> {
        if !self.step(dir, &self.capture_args(dir), "capture").await {
            return None;
        }
        if !self.step(dir, &self.extract_args(dir), "extract").await {
            return None;
        }
        let sample = dir.join(COVERAGE_FILE);
        if sample.is_file() {
            debug!(sample = %sample.display(), "Coverage sample captured");
            Some(sample)
        } else {
            warn!(sample = %sample.display(), "lcov reported success but wrote no tracefile");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        let config = CoverageToolConfig {
            gcov: Some("gcov-12".to_string()),
            ..CoverageToolConfig::default()
        };
        let tool = LcovTool::new(config, "/proj");
        let dir = Path::new("/out/a");

        let capture = tool.capture_args(dir);
        assert_eq!(&capture[..3], ["--capture", "--directory", "/out/a"]);
        assert!(capture.ends_with(&["--gcov-tool".to_string(), "gcov-12".to_string()]));

        let extract = tool.extract_args(dir);
        assert_eq!(extract[1], "/out/a/capture.info");
        assert_eq!(extract[2], "/proj/*");
        assert_eq!(extract[4], "/out/a/coverage.info");
    }

    #[tokio::test]
    async fn test_missing_lcov_yields_no_sample() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoverageToolConfig {
            lcov: "unitforge-no-such-lcov".to_string(),
            ..CoverageToolConfig::default()
        };
        let tool = LcovTool::new(config, dir.path());
        assert!(tool.collect(dir.path()).await.is_none());
    }
}
