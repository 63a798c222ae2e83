//! engagement-pipeline: containerized orchestrator for engagement database
//! sync pipelines.
//!
//! This library sequences the containerized stages of a RapidPro ↔ engagement
//! database ↔ Coda sync deployment: it builds each stage's image, provisions
//! credentials into a fresh container, runs the stage to completion, and
//! tears the container down again. It also archives pipeline data directories
//! into timestamped backup artifacts.

pub mod archive;
pub mod cli;
pub mod docker;
pub mod error;
pub mod pipeline;

// Re-export commonly used error types
pub use error::{ArchiveError, DockerError};
