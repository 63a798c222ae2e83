//! Run identifiers.
//!
//! A run identifier combines a UTC timestamp (second precision) with the
//! source-control revision of the orchestrator checkout. It is generated once
//! per pipeline execution and names the run's archive artifact.

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use thiserror::Error;
use tokio::process::Command;

/// Timestamp layout used in rendered run identifiers.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Errors that can occur while resolving the checkout revision.
#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("Failed to run git: {0}")]
    Git(#[from] std::io::Error),

    #[error("git rev-parse exited with status {status}: {stderr}")]
    RevParseFailed { status: i32, stderr: String },

    #[error("git returned an empty revision")]
    EmptyRevision,
}

/// Unique token for one pipeline execution.
///
/// Identifiers rendered from the same second at the same revision are
/// identical; identifiers from different revisions always differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId {
    timestamp: DateTime<Utc>,
    revision: String,
}

impl RunId {
    /// Creates a run identifier from an explicit timestamp and revision.
    ///
    /// Sub-second precision is truncated so identity matches the rendered
    /// form.
    pub fn from_parts(timestamp: DateTime<Utc>, revision: impl Into<String>) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self {
            timestamp,
            revision: revision.into(),
        }
    }

    /// Generates a run identifier for the current time and checkout revision.
    pub async fn generate() -> Result<Self, RevisionError> {
        let revision = head_revision().await?;
        Ok(Self::from_parts(Utc::now(), revision))
    }

    /// The UTC timestamp component.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The source-control revision component.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// File name of the archive artifact for this run.
    pub fn archive_file_name(&self) -> String {
        format!("data-{self}.tar.gzip")
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.revision
        )
    }
}

/// Resolves the HEAD revision of the current checkout via `git rev-parse`.
pub async fn head_revision() -> Result<String, RevisionError> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .await?;

    if !output.status.success() {
        return Err(RevisionError::RevParseFailed {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if revision.is_empty() {
        return Err(RevisionError::EmptyRevision);
    }

    Ok(revision)
}
