//! Error taxonomy for unitforge.
//!
//! Only [`ForgeError::ToolchainMissing`] is orchestration-fatal. Everything
//! else a run can encounter on a per-file or per-scenario basis is carried as
//! a value (diagnostic, gap, outcome) instead of an error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single header or source that could not be scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionError {
    #[error("cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("unbalanced braces in {path} near byte {offset}")]
    UnbalancedBraces { path: PathBuf, offset: usize },

    #[error("template type {name} in {path} skipped")]
    TemplateSkipped { path: PathBuf, name: String },
}

/// Errors produced while validating a [`crate::config::RunConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("project root does not exist or is not a directory: {0}")]
    MissingProjectRoot(PathBuf),

    #[error("coverage target must be in (0, 100], got {0}")]
    InvalidTarget(f64),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("plateau epsilon must be non-negative, got {0}")]
    InvalidEpsilon(f64),

    #[error("cannot read config file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("invalid config file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// unitforge errors.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("required tool not found: {tool} ({reason})")]
    ToolchainMissing { tool: String, reason: String },

    #[error("coverage report for iteration {0} already exists")]
    ReportExists(u32),

    #[error("invalid run state: {0}")]
    InvalidState(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// Whether this error must stop the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ForgeError::ToolchainMissing { .. })
    }
}

/// Result type for unitforge operations.
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolchain_missing_is_fatal() {
        let err = ForgeError::ToolchainMissing {
            tool: "g++".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("g++"));

        let err = ForgeError::InvalidState("no iteration in progress".to_string());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_config_error_display() {
        let err = ForgeError::from(ConfigError::InvalidTarget(120.0));
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("120"));

        let err = ConfigError::Zero {
            field: "max_iterations",
        };
        assert_eq!(err.to_string(), "max_iterations must be greater than zero");
    }

    #[test]
    fn test_extraction_error_mentions_path() {
        let err = ExtractionError::UnbalancedBraces {
            path: PathBuf::from("inc/Broken.h"),
            offset: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("inc/Broken.h"));
        assert!(msg.contains("42"));
    }
}
