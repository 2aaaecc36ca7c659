//! modelbench - cross-model code-generation reliability benchmark
//!
//! Sends one coding task to every configured model several times, injects
//! each answer into a scratch copy of the target project, runs the test
//! suite and security scanner, and reports which model is both reliable and
//! cheap.
//!
//! ## Commands
//!
//! - `run`: execute the benchmark and write JSON and Markdown reports
//! - `models`: list the configured roster
//! - `check-config`: validate configuration without calling any endpoint

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn, Level};

use modelbench_core::metrics::METRICS;
use modelbench_core::reporting::{render_summary_md, write_report_json, write_summary_md};
use modelbench_core::{
    git, BenchConfig, ConsistencyEvaluator, OpenAiCompatClient, PatchApplier, ReportAggregator,
    TargetArtifact,
};
use modelbench_verify::CommandVerifier;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "modelbench.toml";

#[derive(Parser)]
#[command(name = "modelbench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Measure how consistently LLMs produce a working, secure patch", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "MODELBENCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark over the roster
    Run {
        /// Iterations per model
        #[arg(short = 'n', long, env = "MODELBENCH_ITERATIONS")]
        iterations: Option<u32>,

        /// Restrict the run to these model ids (comma separated or repeated)
        #[arg(short, long = "model", value_delimiter = ',')]
        models: Vec<String>,

        /// Sessions to run at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Where to write the JSON report
        #[arg(short, long, default_value = "modelbench-report.json")]
        output: PathBuf,

        /// Where to write the Markdown summary
        #[arg(long, default_value = "modelbench-summary.md")]
        summary: PathBuf,
    },

    /// List the configured models
    Models,

    /// Validate the configuration and print it fully resolved
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    modelbench_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    debug!(
        models = config.models.len(),
        iterations = config.iterations,
        "configuration loaded"
    );

    match cli.command {
        Commands::Run {
            iterations,
            models,
            concurrency,
            output,
            summary,
        } => {
            let config = apply_overrides(config, iterations, &models, concurrency);
            cmd_run(config, &output, &summary).await
        }
        Commands::Models => cmd_models(&config),
        Commands::CheckConfig => cmd_check_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<BenchConfig> {
    match path {
        Some(path) => BenchConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            BenchConfig::load(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("Failed to load {DEFAULT_CONFIG_FILE}"))
        }
        None => Ok(BenchConfig::default()),
    }
}

fn apply_overrides(
    mut config: BenchConfig,
    iterations: Option<u32>,
    models: &[String],
    concurrency: Option<usize>,
) -> BenchConfig {
    if let Some(n) = iterations {
        config.iterations = n;
    }
    if !models.is_empty() {
        config.select_models(models);
    }
    if let Some(c) = concurrency {
        config.max_concurrent_sessions = c;
    }
    config
}

async fn cmd_run(config: BenchConfig, output: &Path, summary: &Path) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let api_key = config.resolve_api_key()?;

    let target = Arc::new(
        TargetArtifact::load(
            &config.target.project_root,
            &config.target.artifact,
            config.target.excludes.clone(),
        )
        .context("Failed to load target artifact")?,
    );

    let client = OpenAiCompatClient::new(
        &api_key,
        &config.endpoint.api_base,
        config.endpoint.temperature,
        config.request_timeout(),
    )?;
    let verifier = CommandVerifier::from_config(&config.verification);

    let evaluator = ConsistencyEvaluator::new(
        Arc::new(client),
        Arc::new(verifier),
        PatchApplier::new(config.target.anchor()),
        target,
        Arc::from(config.prompt()),
        config.evaluator_settings(),
    );
    let aggregator = ReportAggregator::new(Arc::new(evaluator), config.max_concurrent_sessions);

    let cancel = aggregator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling sessions");
            cancel.cancel();
        }
    });

    info!(
        models = config.models.len(),
        iterations = config.iterations,
        "starting benchmark"
    );
    let report = aggregator
        .run(&config.models)
        .await?
        .with_git_sha(git::provenance(&config.target.project_root));

    write_report_json(output, &report)?;
    write_summary_md(summary, &report)?;
    METRICS.flush();

    println!("{}", render_summary_md(&report));
    println!("Report:  {}", output.display());
    println!("Summary: {}", summary.display());

    if !report.is_complete() {
        warn!(
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "benchmark finished with incomplete sessions"
        );
    }
    Ok(())
}

fn cmd_models(config: &BenchConfig) -> Result<()> {
    if config.models.is_empty() {
        println!("No models configured.");
        return Ok(());
    }
    for model in &config.models {
        match &model.endpoint {
            Some(endpoint) => println!("{:<32} {}  [{}]", model.id, model.display_name, endpoint),
            None => println!("{:<32} {}", model.id, model.display_name),
        }
    }
    Ok(())
}

fn cmd_check_config(config: &BenchConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let target = TargetArtifact::load(
        &config.target.project_root,
        &config.target.artifact,
        config.target.excludes.clone(),
    )
    .context("Failed to load target artifact")?;

    // Inject a throwaway method to prove the anchor resolves.
    let probe = "def __modelbench_probe__(self):\n    return None";
    PatchApplier::new(config.target.anchor())
        .inject(target.baseline(), probe)
        .map_err(|failure| anyhow::anyhow!("Anchor check failed: {failure:?}"))?;

    let credential = match config.resolve_api_key() {
        Ok(_) => "present".to_string(),
        Err(e) => e.to_string(),
    };

    println!("{}", toml::to_string_pretty(config).context("Failed to render configuration")?);
    println!("# target:     {}", target.original_path().display());
    println!("# anchor:     {}", config.target.anchor());
    println!("# credential: {credential}");
    println!("Configuration OK");
    Ok(())
}
