//! Container runtime integration.
//!
//! Wraps the bollard Docker API with the surface the pipeline needs:
//! building stage images from a Dockerfile context, creating and running
//! containers with resource limits, uploading credential files, streaming
//! logs, and removing containers.

mod client;
mod context;

pub use client::{ContainerSpec, DockerClient, StreamKind};
pub use context::{build_context, credentials_archive, CONTAINER_CREDENTIALS_PATH};
