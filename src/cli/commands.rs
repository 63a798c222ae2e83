//! CLI command definitions for engagement-pipeline.
//!
//! The `run` command mirrors the historical pipeline entry point: a fixed
//! sequence of containerized sync stages parameterized by user, credentials,
//! and configuration module. `stage` runs a single stage outside the fixed
//! sequence, and `archive` exposes the data directory archiver on its own.

use std::path::PathBuf;

use clap::Parser;

use crate::archive;
use crate::pipeline::{
    OrchestratorConfig, PipelineDriver, RunRequest, StageInvocation, StageKind,
};

/// Containerized orchestrator for engagement database sync pipelines.
#[derive(Parser)]
#[command(name = "engagement-pipeline")]
#[command(about = "Run containerized engagement database sync pipelines")]
#[command(version)]
#[command(
    long_about = "engagement-pipeline sequences the containerized stages of a RapidPro <-> \
engagement database <-> Coda sync deployment.\n\nEach stage runs in its own container with a \
per-invocation credential copy and a cache volume scoped by pipeline name.\n\nExample usage:\n  \
engagement-pipeline run ops@example.org kenya-pool ./credentials.json configurations.kenya_pool ./data ./backups"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the full fixed stage sequence of a pipeline deployment.
    Run(RunArgs),

    /// Run a single pipeline stage.
    ///
    /// Useful for the stages outside the fixed sequence (Facebook, Telegram,
    /// KoBoToolbox sources, or the engagement-db -> Rapid Pro sync) and for
    /// re-running one step of a deployment by hand.
    Stage(StageArgs),

    /// Compress a data directory into a gzipped tar archive.
    Archive(ArchiveArgs),
}

/// Arguments for `engagement-pipeline run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Identifier of the user launching the pipeline run.
    pub user: String,

    /// Name of the pipeline deployment; scopes image tags and cache volumes.
    pub pipeline_name: String,

    /// Path to the Google Cloud service account credentials file.
    pub credentials_path: PathBuf,

    /// Configuration module passed through to every stage,
    /// e.g. "configurations.kenya_pool".
    pub configuration_module: String,

    /// Directory for pipeline data and analysis outputs.
    pub data_dir: PathBuf,

    /// Directory to write the run's data-<run-id>.tar.gzip archive into.
    pub archive_location: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `engagement-pipeline stage`.
#[derive(Parser, Debug)]
pub struct StageArgs {
    /// Stage to run, e.g. "telegram-to-engagement-db".
    pub stage: String,

    /// Identifier of the user launching the stage.
    pub user: String,

    /// Name of the pipeline deployment; scopes the image tag and cache volume.
    pub pipeline_name: String,

    /// Path to the Google Cloud service account credentials file.
    pub credentials_path: PathBuf,

    /// Configuration module passed through to the stage.
    pub configuration_module: String,

    /// Data directory for stages that produce local output.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Arguments for `engagement-pipeline archive`.
#[derive(Parser, Debug)]
pub struct ArchiveArgs {
    /// Data directory to archive.
    pub source: PathBuf,

    /// Destination archive file path.
    pub destination: PathBuf,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses command-line arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the selected command with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Stage(args) => run_stage(args).await,
        Commands::Archive(args) => run_archive(args),
    }
}

async fn run_pipeline(args: RunArgs) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let driver = PipelineDriver::new(config)?;

    let summary = driver
        .run(RunRequest {
            user: args.user,
            pipeline_name: args.pipeline_name,
            credentials_path: args.credentials_path,
            configuration_module: args.configuration_module,
            data_dir: args.data_dir,
            archive_location: args.archive_location,
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Pipeline run {} completed in {:.1}s",
            summary.run_id, summary.duration_secs
        );
        for stage in &summary.stages {
            println!("  {:<32} {:>8.1}s", stage.stage, stage.duration_secs);
        }
        if let Some(path) = &summary.archive_path {
            println!("Archived data directory to {}", path.display());
        }
    }

    Ok(())
}

async fn run_stage(args: StageArgs) -> anyhow::Result<()> {
    let stage: StageKind = args.stage.parse()?;

    let config = OrchestratorConfig::from_env()?;
    let driver = PipelineDriver::new(config)?;

    let data_dir = match args.data_dir {
        Some(dir) => Some(std::fs::canonicalize(&dir)?),
        None => None,
    };

    driver
        .run_stage(&StageInvocation {
            stage,
            user: args.user,
            pipeline_name: args.pipeline_name,
            credentials_path: args.credentials_path,
            configuration_module: args.configuration_module,
            data_dir,
        })
        .await?;

    println!("Stage {stage} completed");
    Ok(())
}

fn run_archive(args: ArchiveArgs) -> anyhow::Result<()> {
    archive::archive_directory(&args.source, &args.destination)?;
    println!("Archived {} to {}", args.source.display(), args.destination.display());
    Ok(())
}
