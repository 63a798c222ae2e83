//! Pipeline driver.
//!
//! Sequences the fixed stage order of a full pipeline run, emits the
//! `PipelineRunStart`/`PipelineRunEnd` lifecycle events, and archives the
//! data directory when an archive location is given. Stages run strictly one
//! after another; the first failure aborts everything that follows.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::archive;
use crate::docker::DockerClient;
use crate::error::{ArchiveError, DockerError};

use super::config::{ConfigError, OrchestratorConfig};
use super::run_id::{RevisionError, RunId};
use super::stage::{StageError, StageExecutor, StageInvocation, StageKind, StageRunner};

/// The fixed execution order of a full pipeline run.
pub const STAGE_SEQUENCE: [StageKind; 4] = [
    StageKind::RapidProToEngagementDb,
    StageKind::EngagementDbToCoda,
    StageKind::CodaToEngagementDb,
    StageKind::EngagementDbToAnalysis,
];

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Docker-related error.
    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    /// Revision lookup error.
    #[error("Revision error: {0}")]
    Revision(#[from] RevisionError),

    /// Stage execution error.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Archival error.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters of one full pipeline run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Identifier of the user launching the run.
    pub user: String,
    /// Name of the pipeline deployment.
    pub pipeline_name: String,
    /// Local path of the credentials file provisioned into every stage.
    pub credentials_path: PathBuf,
    /// Configuration module passed through to every stage.
    pub configuration_module: String,
    /// Host directory for pipeline data and analysis outputs.
    pub data_dir: PathBuf,
    /// Directory the run's archive artifact is written into, if any.
    pub archive_location: Option<PathBuf>,
}

/// Record of one completed stage within a run.
#[derive(Debug, Clone, Serialize)]
pub struct StageExecution {
    /// Stage name.
    pub stage: &'static str,
    /// Wall-clock duration of the stage.
    pub duration_secs: f64,
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// The run identifier.
    pub run_id: String,
    /// Name of the pipeline deployment.
    pub pipeline_name: String,
    /// Source-control revision the run was launched from.
    pub revision: String,
    /// Completed stages, in execution order.
    pub stages: Vec<StageExecution>,
    /// Path of the archive artifact, if one was requested.
    pub archive_path: Option<PathBuf>,
    /// Wall-clock duration of the whole run.
    pub duration_secs: f64,
}

/// Sequences stage runners for full pipeline runs.
pub struct PipelineDriver {
    executor: Box<dyn StageExecutor>,
}

impl PipelineDriver {
    /// Creates a new pipeline driver with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid or the Docker
    /// daemon is unreachable.
    pub fn new(config: OrchestratorConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let docker = Arc::new(DockerClient::new()?);
        let executor = Box::new(StageRunner::new(docker, config));

        Ok(Self { executor })
    }

    /// Creates a driver around an explicit stage executor.
    fn with_executor(executor: Box<dyn StageExecutor>) -> Self {
        Self { executor }
    }

    /// Runs the full fixed stage sequence.
    ///
    /// Generates one run identifier, then runs the stages of
    /// [`STAGE_SEQUENCE`] in order. The first failing stage aborts the run:
    /// later stages are not invoked and the failure is propagated.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary, PipelineError> {
        let run_id = RunId::generate().await?;
        self.run_with_id(request, run_id).await
    }

    /// Runs the full fixed stage sequence under an existing run identifier.
    pub async fn run_with_id(
        &self,
        request: RunRequest,
        run_id: RunId,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let data_dir = std::fs::canonicalize(&request.data_dir)?;

        info!(
            run_id = %run_id,
            pipeline = %request.pipeline_name,
            user = %request.user,
            "PipelineRunStart"
        );

        let mut stages = Vec::with_capacity(STAGE_SEQUENCE.len());
        for stage in STAGE_SEQUENCE {
            let invocation = self.invocation(stage, &request, &data_dir);
            let stage_started = Instant::now();

            if let Err(e) = self.executor.execute(&invocation).await {
                error!(
                    run_id = %run_id,
                    stage = %stage,
                    error = %e,
                    "Stage failed; aborting pipeline run"
                );
                return Err(e.into());
            }

            stages.push(StageExecution {
                stage: stage.name(),
                duration_secs: stage_started.elapsed().as_secs_f64(),
            });
        }

        info!(
            run_id = %run_id,
            pipeline = %request.pipeline_name,
            "PipelineRunEnd"
        );

        let archive_path = match &request.archive_location {
            Some(location) => {
                let destination = location.join(run_id.archive_file_name());
                archive::archive_directory(&data_dir, &destination)?;
                Some(destination)
            }
            None => None,
        };

        Ok(RunSummary {
            run_id: run_id.to_string(),
            pipeline_name: request.pipeline_name,
            revision: run_id.revision().to_string(),
            stages,
            archive_path,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Runs a single stage outside the fixed sequence.
    pub async fn run_stage(&self, invocation: &StageInvocation) -> Result<(), PipelineError> {
        Ok(self.executor.execute(invocation).await?)
    }

    fn invocation(
        &self,
        stage: StageKind,
        request: &RunRequest,
        data_dir: &Path,
    ) -> StageInvocation {
        StageInvocation {
            stage,
            user: request.user.clone(),
            pipeline_name: request.pipeline_name.clone(),
            credentials_path: request.credentials_path.clone(),
            configuration_module: request.configuration_module.clone(),
            data_dir: stage.uses_data_dir().then(|| data_dir.to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records executed stages and optionally fails at one of them.
    struct RecordingExecutor {
        calls: Arc<Mutex<Vec<StageKind>>>,
        fail_on: Option<StageKind>,
    }

    #[async_trait]
    impl StageExecutor for RecordingExecutor {
        async fn execute(&self, invocation: &StageInvocation) -> Result<(), StageError> {
            self.calls.lock().unwrap().push(invocation.stage);
            if self.fail_on == Some(invocation.stage) {
                return Err(StageError::ExitStatus {
                    stage: invocation.stage.name(),
                    status: 1,
                });
            }
            Ok(())
        }
    }

    fn driver_with_recorder(fail_on: Option<StageKind>) -> (PipelineDriver, Arc<Mutex<Vec<StageKind>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = RecordingExecutor {
            calls: Arc::clone(&calls),
            fail_on,
        };
        (PipelineDriver::with_executor(Box::new(executor)), calls)
    }

    fn request(data_dir: &Path) -> RunRequest {
        RunRequest {
            user: "test-user".to_string(),
            pipeline_name: "test-pipeline".to_string(),
            credentials_path: PathBuf::from("/tmp/creds.json"),
            configuration_module: "configurations.test_config".to_string(),
            data_dir: data_dir.to_path_buf(),
            archive_location: None,
        }
    }

    fn run_id() -> RunId {
        let timestamp = chrono::Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 22).unwrap();
        RunId::from_parts(timestamp, "8f4e2c9b1d0a3f6e5c7b8a9d0e1f2a3b4c5d6e7f")
    }

    #[test]
    fn test_fixed_sequence_order() {
        assert_eq!(
            STAGE_SEQUENCE,
            [
                StageKind::RapidProToEngagementDb,
                StageKind::EngagementDbToCoda,
                StageKind::CodaToEngagementDb,
                StageKind::EngagementDbToAnalysis,
            ]
        );
    }

    #[tokio::test]
    async fn test_run_invokes_every_stage_in_order() {
        let data_dir = TempDir::new().unwrap();
        let (driver, calls) = driver_with_recorder(None);

        let summary = driver
            .run_with_id(request(data_dir.path()), run_id())
            .await
            .unwrap();

        assert_eq!(calls.lock().unwrap().as_slice(), &STAGE_SEQUENCE);
        assert_eq!(summary.stages.len(), STAGE_SEQUENCE.len());
        assert_eq!(summary.stages[0].stage, "rapid-pro-to-engagement-db");
        assert!(summary.archive_path.is_none());
    }

    #[tokio::test]
    async fn test_failing_stage_aborts_remaining_sequence() {
        let data_dir = TempDir::new().unwrap();
        let (driver, calls) = driver_with_recorder(Some(StageKind::EngagementDbToCoda));

        let result = driver.run_with_id(request(data_dir.path()), run_id()).await;

        assert!(matches!(result, Err(PipelineError::Stage(_))));
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[
                StageKind::RapidProToEngagementDb,
                StageKind::EngagementDbToCoda,
            ]
        );
    }

    #[tokio::test]
    async fn test_run_archives_data_dir_when_requested() {
        let data_dir = TempDir::new().unwrap();
        std::fs::write(data_dir.path().join("a.txt"), "payload").unwrap();
        let archive_dir = TempDir::new().unwrap();

        let (driver, _calls) = driver_with_recorder(None);
        let mut request = request(data_dir.path());
        request.archive_location = Some(archive_dir.path().to_path_buf());

        let summary = driver.run_with_id(request, run_id()).await.unwrap();

        let archive_path = summary.archive_path.unwrap();
        assert!(archive_path.is_file());
        assert_eq!(
            archive_path.file_name().unwrap().to_string_lossy(),
            run_id().archive_file_name()
        );
    }

    #[tokio::test]
    async fn test_only_data_dir_stages_receive_data_dir() {
        let data_dir = TempDir::new().unwrap();
        let (driver, _calls) = driver_with_recorder(None);

        let canonical = std::fs::canonicalize(data_dir.path()).unwrap();
        let req = request(data_dir.path());

        let analysis = driver.invocation(StageKind::EngagementDbToAnalysis, &req, &canonical);
        assert_eq!(analysis.data_dir.as_deref(), Some(canonical.as_path()));

        let sync = driver.invocation(StageKind::RapidProToEngagementDb, &req, &canonical);
        assert!(sync.data_dir.is_none());
    }

    #[tokio::test]
    async fn test_run_stage_propagates_failure() {
        let (driver, _calls) = driver_with_recorder(Some(StageKind::TelegramToEngagementDb));

        let invocation = StageInvocation {
            stage: StageKind::TelegramToEngagementDb,
            user: "test-user".to_string(),
            pipeline_name: "test-pipeline".to_string(),
            credentials_path: PathBuf::from("/tmp/creds.json"),
            configuration_module: "configurations.test_config".to_string(),
            data_dir: None,
        };

        let result = driver.run_stage(&invocation).await;
        assert!(matches!(result, Err(PipelineError::Stage(_))));
    }
}
