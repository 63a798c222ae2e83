//! Error types for orchestrator operations.
//!
//! Defines error types for the subsystems that talk to the outside world:
//! - Docker image builds and container lifecycle management
//! - Data directory archival
//!
//! Pipeline-level errors (`ConfigError`, `StageError`, `PipelineError`) live
//! next to the types they describe in the `pipeline` module.

use thiserror::Error;

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Failed to copy files to container: {0}")]
    CopyFailed(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while archiving a data directory.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Source directory does not exist: {0}")]
    SourceMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
