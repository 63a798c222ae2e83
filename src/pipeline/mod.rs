//! Pipeline orchestration.
//!
//! This module provides the infrastructure for running a sync pipeline as a
//! fixed sequence of containerized stages:
//!
//! - **Run identifiers**: UTC timestamp + checkout revision, one per run
//! - **Stages**: the containerized processing steps and their entry contracts
//! - **Stage runner**: image build, credential provisioning, container
//!   lifecycle for a single stage
//! - **Driver**: sequences the fixed stage order, emits lifecycle events,
//!   archives the data directory
//! - **Config**: orchestrator-level settings from the environment
//!
//! # Pipeline Flow
//!
//! 1. A run identifier is generated from the current time and `git rev-parse
//!    HEAD`.
//! 2. `PipelineRunStart` is emitted.
//! 3. The four stages of [`STAGE_SEQUENCE`] run strictly in order, each in a
//!    fresh container with its own credential copy and a cache volume scoped
//!    by pipeline name. The first failure aborts the run.
//! 4. `PipelineRunEnd` is emitted.
//! 5. If an archive location was given, the data directory is compressed to
//!    `data-<run-id>.tar.gzip`.
//!
//! # Example
//!
//! ```rust,ignore
//! use engagement_pipeline::pipeline::{OrchestratorConfig, PipelineDriver, RunRequest};
//!
//! let config = OrchestratorConfig::from_env()?;
//! let driver = PipelineDriver::new(config)?;
//!
//! let summary = driver
//!     .run(RunRequest {
//!         user: "ops@example.org".to_string(),
//!         pipeline_name: "kenya-pool".to_string(),
//!         credentials_path: "./google-cloud-credentials.json".into(),
//!         configuration_module: "configurations.kenya_pool".to_string(),
//!         data_dir: "./data".into(),
//!         archive_location: Some("./backups".into()),
//!     })
//!     .await?;
//!
//! println!("run {} finished in {:.1}s", summary.run_id, summary.duration_secs);
//! ```

pub mod config;
pub mod driver;
pub mod run_id;
pub mod stage;

// Re-export main types for convenience
pub use config::{ConfigError, OrchestratorConfig};
pub use driver::{
    PipelineDriver, PipelineError, RunRequest, RunSummary, StageExecution, STAGE_SEQUENCE,
};
pub use run_id::{head_revision, RevisionError, RunId};
pub use stage::{
    StageError, StageExecutor, StageInvocation, StageKind, StageRunner, UnknownStage, CACHE_MOUNT,
    DATA_MOUNT,
};
