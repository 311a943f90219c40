use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::to_writer_pretty;
use slipway::definition::PipelineDefinition;
use slipway::deploy::StackStore;
use slipway::fetch::{EnvSecretStore, GitHubArchiveProvider, RetryPolicy};
use slipway::handler::{Handler, HttpUpstreamClient};
use slipway::lockfile::generate_lock;
use slipway::observability::log_snapshot;
use slipway::pipeline::{AssemblyOptions, Orchestrator, RunStatus, assemble_pipeline};
use slipway::validation::validate_definition;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    configure_tracing()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            pipeline,
            dry_run,
            print_metrics,
            metrics_json,
            store,
            state_dir,
            source_base_url,
        } => {
            run_pipeline(
                pipeline,
                dry_run,
                print_metrics,
                metrics_json,
                store,
                state_dir,
                source_base_url,
            )
            .await
        }
        Commands::Validate { pipeline } => validate_cmd(pipeline),
        Commands::Lock { pipeline, output } => lock_cmd(pipeline, output),
        Commands::InvokeHandler { url } => invoke_handler(url).await,
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

async fn run_pipeline(
    pipeline_path: PathBuf,
    dry_run: bool,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    store: PathBuf,
    state_dir: PathBuf,
    source_base_url: Option<String>,
) -> Result<()> {
    let definition = PipelineDefinition::load(&pipeline_path)?;

    let report = validate_definition(&definition);
    for warning in &report.warnings {
        warn!(file = %pipeline_path.display(), "{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %pipeline_path.display(), "{error_msg}");
        }
        return Err(anyhow!(
            "Pipeline validation failed with {} error(s)",
            report.errors.len()
        ));
    }

    if dry_run {
        info!(
            "Loaded pipeline with {} stage(s) and {} artifact(s)",
            definition.stages.len(),
            definition.artifacts.len()
        );
        return Ok(());
    }

    let sources = match source_base_url {
        Some(base) => GitHubArchiveProvider::with_base_url(base),
        None => GitHubArchiveProvider::new(),
    };
    let options = AssemblyOptions {
        secrets: Arc::new(EnvSecretStore),
        sources: Arc::new(sources),
        deployer: Arc::new(StackStore::new(state_dir)),
        retry: RetryPolicy::default(),
    };
    let executable = assemble_pipeline(&definition, &options)?;

    let orchestrator = Orchestrator::new(store);
    let run_report = orchestrator.run(&executable).await;

    if print_metrics || metrics_json.is_some() {
        let snapshot = orchestrator.metrics().snapshot();
        if print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = metrics_json {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create metrics directory: {}", parent.display())
                })?;
            }
            let file = File::create(&path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
    }

    match run_report.status {
        RunStatus::Succeeded => {
            info!(
                stages = run_report.completed_stages.len(),
                "Pipeline succeeded"
            );
            Ok(())
        }
        RunStatus::Failed {
            stage,
            action,
            cause,
        } => {
            error!(stage, action, cause, "Pipeline failed");
            Err(anyhow!("Pipeline failed at stage '{stage}', action '{action}': {cause}"))
        }
        RunStatus::Cancelled { after_stage } => {
            warn!(after_stage, "Pipeline cancelled");
            Err(anyhow!("Pipeline cancelled after stage '{after_stage}'"))
        }
    }
}

fn validate_cmd(pipeline_path: PathBuf) -> Result<()> {
    let definition = PipelineDefinition::load(&pipeline_path)?;
    let report = validate_definition(&definition);

    for warning in &report.warnings {
        warn!(file = %pipeline_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %pipeline_path.display(), "Pipeline validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %pipeline_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Pipeline validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn lock_cmd(pipeline_path: PathBuf, output_path: PathBuf) -> Result<()> {
    let definition = PipelineDefinition::load(&pipeline_path)?;
    let report = validate_definition(&definition);

    for warning in &report.warnings {
        warn!(file = %pipeline_path.display(), "{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %pipeline_path.display(), "{error_msg}");
        }
        return Err(anyhow!(
            "Cannot generate lockfile due to {} validation error(s)",
            report.errors.len()
        ));
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create lockfile directory: {}", parent.display())
        })?;
    }

    generate_lock(&definition, &output_path)?;
    info!(lockfile = %output_path.display(), "Lockfile generated successfully");
    Ok(())
}

async fn invoke_handler(url: Option<String>) -> Result<()> {
    let upstream = Arc::new(HttpUpstreamClient::new());
    let handler = match url {
        Some(url) => Handler::new(upstream, url),
        None => Handler::from_env(upstream)?,
    };
    let response = handler.handle().await;
    println!("{} {}", response.status_code, response.body);
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "slipway",
    version,
    about = "Build-artifact pipeline orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline definition end to end.
    Run {
        pipeline: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long, default_value = ".slipway/artifacts")]
        store: PathBuf,
        #[arg(long = "state-dir", default_value = ".slipway/stacks")]
        state_dir: PathBuf,
        #[arg(long = "source-base-url")]
        source_base_url: Option<String>,
    },
    /// Check a pipeline definition without running it.
    Validate { pipeline: PathBuf },
    /// Write a lockfile capturing the pipeline shape and recipe hashes.
    Lock { pipeline: PathBuf, output: PathBuf },
    /// Invoke the runtime handler locally against API_URL or --url.
    InvokeHandler {
        #[arg(long)]
        url: Option<String>,
    },
}
