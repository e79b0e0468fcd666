//! Bounded subprocess execution.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Captured output of a subprocess that exited on its own.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    pub success: bool,
}

impl ProcessOutput {
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// How a bounded subprocess ended.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Completed(ProcessOutput),
    /// The limit expired; the child was killed.
    TimedOut { duration_ms: u64 },
}

/// Keep at most this many bytes of each captured stream (the tail).
const MAX_CAPTURE: usize = 16 * 1024;

fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_CAPTURE {
        return text.into_owned();
    }
    let mut start = text.len() - MAX_CAPTURE;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[truncated]\n{}", &text[start..])
}

/// Run `program args` in `cwd` with a hard time limit.
///
/// The child is spawned with `kill_on_drop`, so a timeout (or the caller
/// dropping this future on cancellation) kills it instead of leaving it
/// running. Spawn failures are returned as the underlying I/O error.
pub async fn run_command<S: AsRef<std::ffi::OsStr>>(
    program: &str,
    args: &[S],
    cwd: &Path,
    limit: Duration,
) -> std::io::Result<CommandOutcome> {
    let start = Instant::now();

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Ok(CommandOutcome::TimedOut {
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
    };

    Ok(CommandOutcome::Completed(ProcessOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: capture(&output.stdout),
        stderr: capture(&output.stderr),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> std::path::PathBuf {
        std::env::current_dir().unwrap()
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let outcome = run_command("echo", &["hello"], &here(), Duration::from_secs(10))
            .await
            .expect("execute failed");
        let CommandOutcome::Completed(output) = outcome else {
            panic!("echo timed out");
        };
        assert!(output.passed());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let outcome = run_command::<&str>("false", &[], &here(), Duration::from_secs(10))
            .await
            .expect("execute failed");
        let CommandOutcome::Completed(output) = outcome else {
            panic!("false timed out");
        };
        assert!(!output.passed());
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let start = Instant::now();
        let outcome = run_command("sleep", &["5"], &here(), Duration::from_millis(200))
            .await
            .expect("execute failed");
        assert!(matches!(outcome, CommandOutcome::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = run_command::<&str>("unitforge-no-such-tool", &[], &here(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_capture_keeps_tail() {
        let long = "x".repeat(MAX_CAPTURE + 10) + "END";
        let kept = capture(long.as_bytes());
        assert!(kept.starts_with("[truncated]"));
        assert!(kept.ends_with("END"));
    }
}
