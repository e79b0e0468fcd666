//! Compiler command lines and tool availability.

use std::path::Path;
use std::time::Duration;

use tracing::debug;
use unitforge_core::{ForgeError, ForgeResult, ToolchainConfig};

use crate::artifact::BuildArtifact;
use crate::runner::{run_command, CommandOutcome};

/// Arguments (without the program) that compile `artifact`.
///
/// Include order is fixed: the artifact's mock directory, the target
/// header's directory, the project root, then any other project header
/// directories, and framework headers last as system includes.
pub fn compile_args(config: &ToolchainConfig, artifact: &BuildArtifact) -> Vec<String> {
    let mut args = vec![format!("-std={}", config.std)];
    args.extend(config.flags.iter().cloned());
    args.extend(["--coverage", "-O0", "-g"].map(String::from));

    args.push(format!("-I{}", artifact.mock_dir().display()));
    args.push(format!("-I{}", artifact.header_dir.display()));
    args.push(format!("-I{}", artifact.project_root.display()));
    for dir in &artifact.extra_include_dirs {
        if dir != &artifact.header_dir && dir != &artifact.project_root {
            args.push(format!("-I{}", dir.display()));
        }
    }
    for dir in &config.framework_include_dirs {
        args.push("-isystem".to_string());
        args.push(dir.display().to_string());
    }

    args.push(artifact.source_path().display().to_string());
    args.extend(artifact.impl_sources.iter().map(|p| p.display().to_string()));
    args.push("-o".to_string());
    args.push(artifact.binary_path().display().to_string());

    args.extend(config.framework_lib_dirs.iter().map(|d| format!("-L{}", d.display())));
    args.extend(config.link_libs.iter().map(|l| format!("-l{}", l)));
    args
}

/// Check that `program` can be spawned at all. Exit status is ignored;
/// only a failure to start is fatal.
pub async fn probe_tool(program: &str, cwd: &Path) -> ForgeResult<()> {
    match run_command(program, &["--version"], cwd, Duration::from_secs(30)).await {
        Ok(CommandOutcome::Completed(output)) => {
            debug!(tool = %program, exit_code = output.exit_code, "Tool available");
            Ok(())
        }
        Ok(CommandOutcome::TimedOut { .. }) => {
            debug!(tool = %program, "Tool probe timed out; assuming available");
            Ok(())
        }
        Err(e) => Err(ForgeError::ToolchainMissing {
            tool: program.to_string(),
            reason: e.to_string(),
        }),
    }
}
