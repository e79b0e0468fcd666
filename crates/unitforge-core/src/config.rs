//! Run configuration.
//!
//! A [`RunConfig`] is built once per run (defaults, then an optional
//! `unitforge.toml`, then command-line overrides), validated, and shared
//! read-only behind an `Arc` by every component.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "unitforge.toml";

/// External compiler and test framework settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable (name on `PATH` or absolute path).
    pub compiler: String,
    /// Value for `-std=`.
    pub std: String,
    /// Extra flags placed before the include directories.
    pub flags: Vec<String>,
    /// Framework headers, passed with `-isystem` after all project dirs.
    pub framework_include_dirs: Vec<PathBuf>,
    pub framework_lib_dirs: Vec<PathBuf>,
    /// Libraries passed as `-l<name>`, in order.
    pub link_libs: Vec<String>,
    pub compile_timeout_secs: u64,
    pub run_timeout_secs: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "g++".to_string(),
            std: "c++17".to_string(),
            flags: Vec::new(),
            framework_include_dirs: Vec::new(),
            framework_lib_dirs: Vec::new(),
            link_libs: vec!["gtest".to_string(), "gtest_main".to_string(), "pthread".to_string()],
            compile_timeout_secs: 60,
            run_timeout_secs: 10,
        }
    }
}

impl ToolchainConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Coverage extraction tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageToolConfig {
    pub lcov: String,
    /// Passed as `--gcov-tool` when set.
    pub gcov: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CoverageToolConfig {
    fn default() -> Self {
        Self {
            lcov: "lcov".to_string(),
            gcov: None,
            timeout_secs: 60,
        }
    }
}

impl CoverageToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Optional text-enhancement endpoint (Ollama-compatible).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "codellama".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Immutable settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub project_root: PathBuf,
    /// Where iteration artifacts and reports are written.
    pub output_dir: PathBuf,
    /// Aggregate line coverage percentage that ends the run.
    pub target_percent: f64,
    pub max_iterations: u32,
    /// Minimum improvement (percentage points) that does not count as flat.
    pub plateau_epsilon: f64,
    /// Consecutive flat iterations before the run is declared plateaued.
    pub plateau_patience: u32,
    /// Operations below this observed line ratio are reprioritised.
    pub low_coverage_ratio: f64,
    /// Overall wall-clock budget; exceeding it ends the run.
    pub wall_clock_budget_secs: Option<u64>,
    /// Size of the compile/run worker pool.
    pub workers: usize,
    /// Extra directory names skipped during extraction.
    pub exclude_dirs: Vec<String>,
    pub toolchain: ToolchainConfig,
    pub coverage: CoverageToolConfig,
    /// Present only when enhancement is enabled.
    pub enhancer: Option<EnhancerConfig>,
}

/// Worker count when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            output_dir: PathBuf::from("unitforge-output"),
            target_percent: 80.0,
            max_iterations: 3,
            plateau_epsilon: 0.5,
            plateau_patience: 2,
            low_coverage_ratio: 0.5,
            wall_clock_budget_secs: None,
            workers: default_workers(),
            exclude_dirs: Vec::new(),
            toolchain: ToolchainConfig::default(),
            coverage: CoverageToolConfig::default(),
            enhancer: None,
        }
    }
}

impl RunConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents, path)
    }

    fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Malformed {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// `unitforge.toml` in the given directory, if present.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        candidate.is_file().then_some(candidate)
    }

    /// Load from an explicit file, else from a discovered file in
    /// `project_root`, else defaults. The root always comes from the caller.
    pub fn load(explicit: Option<&Path>, project_root: &Path) -> Result<Self, ConfigError> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(project_root),
        };
        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.project_root = project_root.to_path_buf();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.project_root.is_dir() {
            return Err(ConfigError::MissingProjectRoot(self.project_root.clone()));
        }
        if !(self.target_percent > 0.0 && self.target_percent <= 100.0) {
            return Err(ConfigError::InvalidTarget(self.target_percent));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::Zero { field: "max_iterations" });
        }
        if self.plateau_patience == 0 {
            return Err(ConfigError::Zero { field: "plateau_patience" });
        }
        if self.workers == 0 {
            return Err(ConfigError::Zero { field: "workers" });
        }
        if self.toolchain.compile_timeout_secs == 0 {
            return Err(ConfigError::Zero { field: "compile_timeout_secs" });
        }
        if self.toolchain.run_timeout_secs == 0 {
            return Err(ConfigError::Zero { field: "run_timeout_secs" });
        }
        if !(self.plateau_epsilon.is_finite() && self.plateau_epsilon >= 0.0) {
            return Err(ConfigError::InvalidEpsilon(self.plateau_epsilon));
        }
        Ok(())
    }

    /// Validate and freeze for sharing across components.
    pub fn into_shared(self) -> Result<Arc<Self>, ConfigError> {
        self.validate()?;
        Ok(Arc::new(self))
    }

    pub fn wall_clock_budget(&self) -> Option<Duration> {
        self.wall_clock_budget_secs.map(Duration::from_secs)
    }

    /// Canonical project root (falls back to the configured path).
    pub fn canonical_root(&self) -> PathBuf {
        self.project_root
            .canonicalize()
            .unwrap_or_else(|_| self.project_root.clone())
    }
}
