//! Log output for `unitforge` runs.
//!
//! Everything is written to stderr: stdout carries the run summary and the
//! `--json` model dumps. `RUST_LOG` overrides the level chosen on the
//! command line.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the process-wide subscriber; `json` selects newline-delimited
/// JSON lines. Returns false when a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let stderr_lines = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter(level));
    let installed = if json {
        registry.with(stderr_lines.json()).try_init()
    } else {
        registry.with(stderr_lines).try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_refused() {
        init_tracing(false, Level::DEBUG);
        assert!(!init_tracing(true, Level::INFO));
    }
}
