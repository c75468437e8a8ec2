//! annalist - CLI entry point.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use annalist::git::GitCli;
use annalist::pipeline::{PUBLISH_RESULT_FILE, Stage, StageStatus};
use annalist::publish::{PublishOptions, PublishOutcome, channels_from_config};
use annalist::{ArtifactStore, Config, Pipeline, ProviderRegistry, RunContext, preflight};

/// Annotate working-tree changes with LLM-written explanations and commit messages.
#[derive(Parser, Debug)]
#[command(name = "annalist")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "annalist.yml")]
    config: PathBuf,

    /// Repository to process
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every stage against the current working tree
    Run(PublishArgs),

    /// Re-run one stage against an existing run directory
    Stage {
        /// Stage name (extract, strategy, classify, explain, commit_message, aggregate, publish)
        name: Stage,

        /// Run id (YYMMDD_HHMM) under the results directory
        #[arg(long = "run")]
        run_id: String,

        #[command(flatten)]
        publish: PublishArgs,
    },

    /// Check git, the repository, the remote, the config and notification channels
    Check,
}

#[derive(Args, Debug, Clone, Copy)]
struct PublishArgs {
    /// Commit locally without pushing
    #[arg(long)]
    no_push: bool,

    /// Skip notification channels and the record upload
    #[arg(long)]
    no_notify: bool,
}

impl PublishArgs {
    fn options(&self) -> PublishOptions {
        PublishOptions {
            push: !self.no_push,
            notify: !self.no_notify,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check => check(&cli.repo, &cli.config).await,
        Command::Run(args) => {
            let config = load_config(&cli.repo, &cli.config)?;
            let store = ArtifactStore::create(&config.results_dir, Local::now().naive_local())
                .context("Failed to create the run directory")?;
            let (pipeline, ctx) = prepare(config, &cli.repo, store, args)?;

            let summary = pipeline.run(&ctx).await.context("Run aborted")?;
            println!("Run {} finished", ctx.run_id());
            for (stage, status) in &summary.stages {
                println!("  {:<15} {}", stage.as_str(), describe(status));
            }
            report_publish(&ctx)
        }
        Command::Stage {
            name,
            run_id,
            publish,
        } => {
            let config = load_config(&cli.repo, &cli.config)?;
            let store = ArtifactStore::open(&config.results_dir, &run_id).with_context(|| {
                format!("Run {run_id} not found under {}", config.results_dir.display())
            })?;
            let (pipeline, ctx) = prepare(config, &cli.repo, store, publish)?;

            let status = pipeline
                .run_stage(name, &ctx)
                .await
                .with_context(|| format!("Stage {name} failed"))?;
            println!("{} {}", name, describe(&status));
            if name == Stage::Publish {
                report_publish(&ctx)?;
            }
            Ok(())
        }
    }
}

/// Load the configuration and anchor relative output paths at the repository.
fn load_config(repo: &Path, path: &Path) -> Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    config.results_dir = repo.join(&config.results_dir);
    config.logs_dir = repo.join(&config.logs_dir);
    config.exchange.cache_file = repo.join(&config.exchange.cache_file);
    Ok(config)
}

fn prepare(
    config: Config,
    repo: &Path,
    store: ArtifactStore,
    args: PublishArgs,
) -> Result<(Pipeline, RunContext)> {
    let ctx = RunContext::from_config(store, &config, Utc::now());
    init_tracing(Some(ctx.log_path()))?;
    tracing::info!("annalist {} run {}", env!("CARGO_PKG_VERSION"), ctx.run_id());

    let pipeline =
        Pipeline::new(config, repo, ProviderRegistry::from_env()).with_options(args.options());
    Ok((pipeline, ctx))
}

async fn check(repo: &Path, config_path: &Path) -> Result<()> {
    init_tracing(None)?;
    let config = Config::load(config_path);
    let channels = config
        .as_ref()
        .map(|c| channels_from_config(&c.notify))
        .unwrap_or_default();
    let scm = GitCli::new(repo);

    let report = preflight::run_checks(repo, &config, &scm, &channels).await;
    println!("{}", report.render());
    if !report.passed() {
        bail!("{} preflight check(s) failed", report.failures().count());
    }
    Ok(())
}

/// Stderr logging filtered by `RUST_LOG`, plus an append-only plain-text run log.
fn init_tracing(log_path: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("annalist=info"));

    let file_layer = match log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open run log {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

fn describe(status: &StageStatus) -> String {
    match status {
        StageStatus::Completed => "completed".to_string(),
        StageStatus::Skipped(reason) => format!("skipped ({reason})"),
        StageStatus::NoUpdate => "no update".to_string(),
    }
}

fn report_publish(ctx: &RunContext) -> Result<()> {
    let Ok(outcome) = ctx.store().read_json::<PublishOutcome>(PUBLISH_RESULT_FILE) else {
        return Ok(());
    };
    println!(
        "✓ {} committed, {} with fallback message, {} failed",
        outcome.success.len(),
        outcome.fallback.len(),
        outcome.failed.len()
    );
    if !outcome.failed_channels.is_empty() {
        println!("  Notification failed for: {}", outcome.failed_channels.join(", "));
    }
    Ok(())
}
