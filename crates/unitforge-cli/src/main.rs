//! unitforge - coverage-driven unit test synthesis for C++ projects
//!
//! ## Commands
//!
//! - `run`: extract, synthesize, build, measure and iterate until the run terminates
//! - `extract`: print the structural model of a project
//! - `report`: print the summary of a persisted run

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use unitforge_build::{Pipeline, RunStore};
use unitforge_core::telemetry::init_tracing;
use unitforge_core::{render_summary_md, EnhancerConfig, Extractor, OllamaEnhancer, RunConfig, SourceModel};

/// Exit status when the run ended without reaching its target.
const EXIT_TARGET_MISSED: u8 = 2;

#[derive(Parser)]
#[command(name = "unitforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Coverage-driven unit test synthesis for C++ projects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize, build and run tests until the coverage target, a plateau or the budget
    Run(RunArgs),

    /// Print the extracted types, operations and diagnostics
    Extract {
        /// Project root
        root: PathBuf,
    },

    /// Print the summary of a persisted run
    Report {
        /// Output directory of a previous run
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Project root
    root: PathBuf,

    /// Aggregate line coverage percentage that ends the run
    #[arg(short, long)]
    target: Option<f64>,

    /// Maximum number of iterations
    #[arg(short = 'n', long)]
    max_iterations: Option<u32>,

    /// Configuration file (default: unitforge.toml in the project root)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for iteration artifacts and reports
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Size of the compile/run worker pool
    #[arg(short, long)]
    workers: Option<usize>,

    /// Compiler executable
    #[arg(long, env = "UNITFORGE_CXX")]
    compiler: Option<String>,

    /// Overall wall-clock budget in seconds
    #[arg(long)]
    budget_secs: Option<u64>,

    /// Continue the run persisted in the output directory
    #[arg(long)]
    resume: bool,

    /// Ask an Ollama-compatible endpoint to improve generated tests
    #[arg(long)]
    enhance: bool,
}

impl RunArgs {
    fn to_config(&self) -> Result<RunConfig> {
        let mut config = RunConfig::load(self.config.as_deref(), &self.root).context("Failed to load configuration")?;
        if let Some(target) = self.target {
            config.target_percent = target;
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = max;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(compiler) = &self.compiler {
            config.toolchain.compiler = compiler.clone();
        }
        if let Some(budget) = self.budget_secs {
            config.wall_clock_budget_secs = Some(budget);
        }
        if self.enhance && config.enhancer.is_none() {
            config.enhancer = Some(EnhancerConfig::default());
        }
        if !self.enhance {
            config.enhancer = None;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(&args, cli.json).await,
        Commands::Extract { root } => cmd_extract(&root, cli.json).map(|()| ExitCode::SUCCESS),
        Commands::Report { output } => cmd_report(&output, cli.json).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(args: &RunArgs, json: bool) -> Result<ExitCode> {
    let config = args.to_config()?.into_shared().context("Invalid configuration")?;

    let mut pipeline = Pipeline::new(Arc::clone(&config)).resume(args.resume);
    if let Some(enhancer) = &config.enhancer {
        let enhancer = OllamaEnhancer::new(enhancer).context("Failed to set up enhancer")?;
        pipeline = pipeline.with_enhancer(Arc::new(enhancer));
    }

    let canceller = pipeline.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping outstanding jobs");
            canceller.cancel();
        }
    });

    let result = pipeline.run().await?;
    info!(
        run_id = %result.run_id,
        duration_ms = result.duration_ms,
        output = %result.output_dir.display(),
        "Run finished"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&result.summary)?);
    } else {
        print!("{}", render_summary_md(&result.summary));
        println!();
        println!("Artifacts: {}", result.output_dir.display());
    }

    Ok(if result.target_met() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_TARGET_MISSED)
    })
}

fn print_model(model: &SourceModel) {
    println!("Project: {}", model.root.display());
    println!(
        "{} types, {} headers, {} sources, {} diagnostics",
        model.types.len(),
        model.headers.len(),
        model.sources.len(),
        model.diagnostics.len()
    );
    for ty in &model.types {
        println!();
        println!(
            "{} ({}){}",
            ty.qualified_name(),
            ty.header.display(),
            if ty.instantiable() { "" } else { " [not instantiable]" }
        );
        for op in &ty.operations {
            println!("  {:<8} {}", op.visibility.as_str(), op.signature());
        }
    }
    if !model.diagnostics.is_empty() {
        println!();
        println!("Diagnostics:");
        for diagnostic in &model.diagnostics {
            println!("  {}", diagnostic);
        }
    }
}

fn cmd_extract(root: &Path, json: bool) -> Result<()> {
    let model = Extractor::new(root)
        .extract()
        .with_context(|| format!("Failed to extract {:?}", root))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&model)?);
    } else {
        print_model(&model);
    }
    Ok(())
}

fn cmd_report(output: &Path, json: bool) -> Result<()> {
    if !output.is_dir() {
        bail!("No run found at {:?}", output);
    }
    let store = RunStore::open(output)?;
    let summary = store
        .read_summary()
        .with_context(|| format!("No summary in {:?}; has the run finished?", output))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary_md(&summary));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["unitforge", "run"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_run_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("unitforge.toml"),
            "target_percent = 50.0\nmax_iterations = 9\n[toolchain]\ncompiler = \"clang++\"\n",
        )
        .unwrap();
        let root = dir.path().to_str().unwrap();

        let config = args(&[root, "--target", "75", "-w", "2"]).to_config().unwrap();
        assert_eq!(config.target_percent, 75.0);
        assert_eq!(config.max_iterations, 9);
        assert_eq!(config.workers, 2);
        assert_eq!(config.toolchain.compiler, "clang++");
        assert!(config.enhancer.is_none());

        let config = args(&[root, "--enhance", "--budget-secs", "30"]).to_config().unwrap();
        assert!(config.enhancer.is_some());
        assert_eq!(config.wall_clock_budget_secs, Some(30));
    }

    #[test]
    fn test_extract_and_report_commands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Shape.h"),
            "class Shape {\npublic:\n    int Area() const;\n};\n",
        )
        .unwrap();
        assert!(cmd_extract(dir.path(), true).is_ok());
        assert!(cmd_extract(&dir.path().join("missing"), false).is_err());

        assert!(cmd_report(&dir.path().join("missing"), false).is_err());
        assert!(cmd_report(dir.path(), false).is_err());
    }

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["unitforge", "report", "out", "--json", "-v"]);
        assert!(cli.json);
        assert!(cli.verbose);
    }
}
