//! Stage definitions and the containerized stage runner.
//!
//! A stage is one containerized processing step of the pipeline, e.g. the
//! Rapid Pro → engagement database sync. The runner builds the stage's image,
//! provisions credentials into a fresh container, runs the stage entry
//! command to completion while forwarding its output, and removes the
//! container on every exit path.

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::docker::{
    build_context, credentials_archive, ContainerSpec, DockerClient, StreamKind,
    CONTAINER_CREDENTIALS_PATH,
};
use crate::error::DockerError;

use super::config::OrchestratorConfig;

/// In-container mount point of a stage's incremental cache volume.
pub const CACHE_MOUNT: &str = "/cache";

/// In-container mount point of the pipeline data directory.
pub const DATA_MOUNT: &str = "/data";

/// The containerized processing steps the orchestrator knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    RapidProToEngagementDb,
    EngagementDbToCoda,
    CodaToEngagementDb,
    EngagementDbToAnalysis,
    FacebookToEngagementDb,
    TelegramToEngagementDb,
    KobotoolboxToEngagementDb,
    EngagementDbToRapidPro,
}

impl StageKind {
    /// Every stage the orchestrator can run, whether or not it is part of the
    /// fixed full-run sequence.
    pub const fn all() -> &'static [StageKind] {
        &[
            StageKind::RapidProToEngagementDb,
            StageKind::EngagementDbToCoda,
            StageKind::CodaToEngagementDb,
            StageKind::EngagementDbToAnalysis,
            StageKind::FacebookToEngagementDb,
            StageKind::TelegramToEngagementDb,
            StageKind::KobotoolboxToEngagementDb,
            StageKind::EngagementDbToRapidPro,
        ]
    }

    /// Stage name, used in image tags, cache volume names, and the CLI.
    pub const fn name(self) -> &'static str {
        match self {
            StageKind::RapidProToEngagementDb => "rapid-pro-to-engagement-db",
            StageKind::EngagementDbToCoda => "engagement-db-to-coda",
            StageKind::CodaToEngagementDb => "coda-to-engagement-db",
            StageKind::EngagementDbToAnalysis => "engagement-db-to-analysis",
            StageKind::FacebookToEngagementDb => "facebook-to-engagement-db",
            StageKind::TelegramToEngagementDb => "telegram-to-engagement-db",
            StageKind::KobotoolboxToEngagementDb => "kobotoolbox-to-engagement-db",
            StageKind::EngagementDbToRapidPro => "engagement-db-to-rapid-pro",
        }
    }

    /// Entry script run inside the stage container.
    pub const fn entry_script(self) -> &'static str {
        match self {
            StageKind::RapidProToEngagementDb => "sync_rapid_pro_to_engagement_db.py",
            StageKind::EngagementDbToCoda => "sync_engagement_db_to_coda.py",
            StageKind::CodaToEngagementDb => "sync_coda_to_engagement_db.py",
            StageKind::EngagementDbToAnalysis => "engagement_db_to_analysis.py",
            StageKind::FacebookToEngagementDb => "sync_facebook_to_engagement_db.py",
            StageKind::TelegramToEngagementDb => "sync_telegram_group_to_engagement_db.py",
            StageKind::KobotoolboxToEngagementDb => "sync_kobotoolbox_to_engagement_db.py",
            StageKind::EngagementDbToRapidPro => "sync_engagement_db_to_rapid_pro.py",
        }
    }

    /// Whether the stage mounts an incremental cache volume.
    pub const fn uses_incremental_cache(self) -> bool {
        matches!(
            self,
            StageKind::RapidProToEngagementDb
                | StageKind::EngagementDbToAnalysis
                | StageKind::FacebookToEngagementDb
                | StageKind::TelegramToEngagementDb
                | StageKind::KobotoolboxToEngagementDb
        )
    }

    /// Whether the stage mounts the pipeline data directory.
    pub const fn uses_data_dir(self) -> bool {
        matches!(
            self,
            StageKind::EngagementDbToAnalysis | StageKind::FacebookToEngagementDb
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unrecognized stage name.
#[derive(Debug, Error)]
#[error("Unknown stage '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for StageKind {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::all()
            .iter()
            .copied()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Parameters of one containerized stage invocation.
///
/// An invocation exists only for the lifetime of its container; nothing is
/// shared across stages except the named cache volume.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub stage: StageKind,
    /// Identifier of the user launching the stage.
    pub user: String,
    /// Name of the pipeline deployment; scopes image tags and cache volumes.
    pub pipeline_name: String,
    /// Local path of the credentials file copied into the container.
    pub credentials_path: PathBuf,
    /// Configuration module passed through opaquely to the stage command.
    pub configuration_module: String,
    /// Host data directory, mounted for stages that produce local output.
    pub data_dir: Option<PathBuf>,
}

impl StageInvocation {
    /// Image tag the stage is built as.
    pub fn image_tag(&self) -> String {
        format!("{}/{}", self.pipeline_name, self.stage.name())
    }

    /// Name of the stage's incremental cache volume, if it uses one.
    ///
    /// Names are scoped by pipeline name so differently named deployments
    /// never share caches.
    pub fn cache_volume(&self) -> Option<String> {
        self.stage
            .uses_incremental_cache()
            .then(|| format!("{}-{}-cache", self.pipeline_name, self.stage.name()))
    }

    /// Entry command run inside the stage container.
    ///
    /// Every stage receives `(user, credentials-path, configuration-module)`
    /// positionally. Source syncs take their incremental cache as a flag;
    /// the analysis stage takes its datasets cache directory positionally.
    pub fn command(&self) -> Vec<String> {
        let user = self.user.clone();
        let credentials = CONTAINER_CREDENTIALS_PATH.to_string();
        let configuration = self.configuration_module.clone();

        let mut cmd: Vec<String> = vec![
            "python".to_string(),
            "-u".to_string(),
            self.stage.entry_script().to_string(),
        ];

        match self.stage {
            StageKind::EngagementDbToAnalysis => {
                cmd.extend([user, credentials, CACHE_MOUNT.to_string(), configuration]);
            }
            stage if stage.uses_incremental_cache() => {
                cmd.extend([
                    "--incremental-cache-path".to_string(),
                    CACHE_MOUNT.to_string(),
                    user,
                    credentials,
                    configuration,
                ]);
                if stage == StageKind::FacebookToEngagementDb {
                    cmd.push(DATA_MOUNT.to_string());
                }
            }
            _ => {
                cmd.extend([user, credentials, configuration]);
            }
        }

        cmd
    }
}

/// Errors that can occur while running a stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Docker error in stage '{stage}': {source}")]
    Docker {
        stage: &'static str,
        #[source]
        source: DockerError,
    },

    #[error("Stage '{stage}' exited with status {status}")]
    ExitStatus { stage: &'static str, status: i64 },
}

/// Executes stage invocations.
///
/// The production implementation is [`StageRunner`]; the pipeline driver
/// depends on this seam.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, invocation: &StageInvocation) -> Result<(), StageError>;
}

/// Runs one stage in an ephemeral container.
pub struct StageRunner {
    docker: Arc<DockerClient>,
    config: OrchestratorConfig,
}

impl StageRunner {
    /// Creates a new stage runner.
    pub fn new(docker: Arc<DockerClient>, config: OrchestratorConfig) -> Self {
        Self { docker, config }
    }

    /// Runs a stage to completion.
    ///
    /// Builds the stage image, creates a container, copies the credentials
    /// file in, runs the entry command while forwarding stdout/stderr, and
    /// removes the container whether or not the stage succeeded. A nonzero
    /// exit status is an error.
    pub async fn run(&self, invocation: &StageInvocation) -> Result<(), StageError> {
        let stage = invocation.stage.name();
        let docker_err = |source| StageError::Docker { stage, source };

        info!(
            stage,
            pipeline = %invocation.pipeline_name,
            user = %invocation.user,
            "Running stage"
        );

        let context = build_context(&self.config.docker_context).map_err(docker_err)?;
        let tag = invocation.image_tag();
        self.docker
            .build_image(&tag, context)
            .await
            .map_err(docker_err)?;

        let mut spec = ContainerSpec::new(tag.as_str())
            .with_cmd(invocation.command())
            .with_memory_mb(self.config.docker_memory_mb)
            .with_cpu_cores(self.config.docker_cpu_cores)
            .with_network_mode(self.config.docker_network.as_str());

        if let Some(volume) = invocation.cache_volume() {
            spec = spec.with_bind(format!("{volume}:{CACHE_MOUNT}"));
        }

        if invocation.stage.uses_data_dir() {
            if let Some(data_dir) = &invocation.data_dir {
                spec = spec.with_bind(format!("{}:{DATA_MOUNT}", data_dir.display()));
            }
        }

        let container_id = self.docker.create_container(spec).await.map_err(docker_err)?;

        let result = self.execute_in_container(&container_id, invocation).await;

        // Removal happens on every exit path once the container exists.
        if let Err(e) = self.docker.remove_container(&container_id, true).await {
            warn!(
                stage,
                container = %container_id,
                error = %e,
                "Failed to remove stage container"
            );
        }

        let status = result.map_err(docker_err)?;
        if status != 0 {
            return Err(StageError::ExitStatus { stage, status });
        }

        info!(stage, "Stage completed");
        Ok(())
    }

    /// Provisions credentials, starts the container, and waits for exit.
    async fn execute_in_container(
        &self,
        container_id: &str,
        invocation: &StageInvocation,
    ) -> Result<i64, DockerError> {
        let credentials = credentials_archive(&invocation.credentials_path)?;
        self.docker
            .upload_archive(container_id, "/", credentials)
            .await?;

        self.docker.start_container(container_id).await?;

        self.docker
            .follow_logs(container_id, |stream, bytes| match stream {
                StreamKind::Stdout => {
                    let _ = io::stdout().write_all(bytes);
                }
                StreamKind::Stderr => {
                    let _ = io::stderr().write_all(bytes);
                }
            })
            .await?;

        self.docker.wait_container(container_id).await
    }
}

#[async_trait]
impl StageExecutor for StageRunner {
    async fn execute(&self, invocation: &StageInvocation) -> Result<(), StageError> {
        self.run(invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(stage: StageKind) -> StageInvocation {
        StageInvocation {
            stage,
            user: "test-user".to_string(),
            pipeline_name: "test-pipeline".to_string(),
            credentials_path: PathBuf::from("/tmp/creds.json"),
            configuration_module: "configurations.test_config".to_string(),
            data_dir: Some(PathBuf::from("/srv/data")),
        }
    }

    #[test]
    fn test_stage_name_round_trip() {
        for stage in StageKind::all() {
            let parsed: StageKind = stage.name().parse().unwrap();
            assert_eq!(parsed, *stage);
        }
    }

    #[test]
    fn test_unknown_stage_name() {
        let result: Result<StageKind, _> = "engagement-db-to-nowhere".parse();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unknown stage"));
    }

    #[test]
    fn test_image_tag_scoped_by_pipeline() {
        let inv = invocation(StageKind::CodaToEngagementDb);
        assert_eq!(inv.image_tag(), "test-pipeline/coda-to-engagement-db");
    }

    #[test]
    fn test_cache_volume_naming() {
        let inv = invocation(StageKind::RapidProToEngagementDb);
        assert_eq!(
            inv.cache_volume().unwrap(),
            "test-pipeline-rapid-pro-to-engagement-db-cache"
        );

        let inv = invocation(StageKind::CodaToEngagementDb);
        assert!(inv.cache_volume().is_none());
    }

    #[test]
    fn test_incremental_sync_command() {
        let cmd = invocation(StageKind::RapidProToEngagementDb).command();
        assert_eq!(
            cmd,
            vec![
                "python",
                "-u",
                "sync_rapid_pro_to_engagement_db.py",
                "--incremental-cache-path",
                "/cache",
                "test-user",
                "/credentials/google-cloud-credentials.json",
                "configurations.test_config",
            ]
        );
    }

    #[test]
    fn test_plain_sync_command() {
        let cmd = invocation(StageKind::CodaToEngagementDb).command();
        assert_eq!(
            cmd,
            vec![
                "python",
                "-u",
                "sync_coda_to_engagement_db.py",
                "test-user",
                "/credentials/google-cloud-credentials.json",
                "configurations.test_config",
            ]
        );
    }

    #[test]
    fn test_analysis_command_takes_cache_positionally() {
        let cmd = invocation(StageKind::EngagementDbToAnalysis).command();
        assert_eq!(
            cmd,
            vec![
                "python",
                "-u",
                "engagement_db_to_analysis.py",
                "test-user",
                "/credentials/google-cloud-credentials.json",
                "/cache",
                "configurations.test_config",
            ]
        );
    }

    #[test]
    fn test_facebook_command_appends_metrics_dir() {
        let cmd = invocation(StageKind::FacebookToEngagementDb).command();
        assert_eq!(cmd.last().unwrap(), "/data");
        assert!(cmd.contains(&"--incremental-cache-path".to_string()));
    }

    #[test]
    fn test_data_dir_stages() {
        assert!(StageKind::EngagementDbToAnalysis.uses_data_dir());
        assert!(StageKind::FacebookToEngagementDb.uses_data_dir());
        assert!(!StageKind::RapidProToEngagementDb.uses_data_dir());
        assert!(!StageKind::EngagementDbToCoda.uses_data_dir());
    }
}
