//! Docker API wrapper using the bollard crate.
//!
//! This module provides a high-level interface to the Docker operations
//! needed for stage execution: image builds, container lifecycle, credential
//! upload, and log streaming.

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use crate::error::DockerError;

/// CPU scheduler period used to translate fractional cores into a quota.
const CPU_PERIOD_MICROS: i64 = 100_000;

/// Configuration for creating a stage container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Docker image to run.
    pub image: String,
    /// Command to run in the container.
    pub cmd: Vec<String>,
    /// Memory limit in megabytes.
    pub memory_mb: u64,
    /// CPU cores allocated to the container.
    pub cpu_cores: f64,
    /// Network mode (e.g., "none", "bridge", "host").
    pub network_mode: Option<String>,
    /// Volume mounts in `volume-or-host-path:container-path` form.
    pub binds: Vec<String>,
}

impl ContainerSpec {
    /// Creates a new container spec for the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            cmd: Vec::new(),
            memory_mb: 4096,
            cpu_cores: 2.0,
            network_mode: Some("bridge".to_string()),
            binds: Vec::new(),
        }
    }

    /// Sets the command to run in the container.
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    /// Sets the memory limit in megabytes.
    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Sets the CPU core allocation.
    pub fn with_cpu_cores(mut self, cpu_cores: f64) -> Self {
        self.cpu_cores = cpu_cores;
        self
    }

    /// Sets the network mode.
    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    /// Adds a volume mount.
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    fn memory_bytes(&self) -> i64 {
        (self.memory_mb as i64) * 1024 * 1024
    }

    fn cpu_quota(&self) -> i64 {
        (self.cpu_cores * CPU_PERIOD_MICROS as f64) as i64
    }
}

/// Which output stream a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Docker client wrapper for stage container operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not
    /// accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Builds an image from a tarred Dockerfile context and tags it.
    ///
    /// Build output lines are forwarded to the `docker_build` log target at
    /// debug level. A build error reported by the daemon fails the call.
    pub async fn build_image(&self, tag: &str, context_tar: Vec<u8>) -> Result<(), DockerError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(context_tar.into()));

        while let Some(update) = stream.next().await {
            let update = update.map_err(|e| DockerError::BuildFailed(e.to_string()))?;

            if let Some(error) = update.error {
                return Err(DockerError::BuildFailed(error));
            }

            if let Some(line) = update.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(target: "docker_build", image = tag, "{line}");
                }
            }
        }

        Ok(())
    }

    /// Creates a new container with the given spec.
    ///
    /// The container name is left to the daemon, so repeated invocations of
    /// the same stage never collide.
    ///
    /// # Returns
    ///
    /// The container ID on success.
    pub async fn create_container(&self, spec: ContainerSpec) -> Result<String, DockerError> {
        let host_config = HostConfig {
            memory: Some(spec.memory_bytes()),
            cpu_period: Some(CPU_PERIOD_MICROS),
            cpu_quota: Some(spec.cpu_quota()),
            network_mode: spec.network_mode.clone(),
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            host_config: Some(host_config),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to create container: {e}")))?;

        Ok(response.id)
    }

    /// Uploads a tar archive into a container, unpacking it at `path`.
    pub async fn upload_archive(
        &self,
        id: &str,
        path: &str,
        tar: Vec<u8>,
    ) -> Result<(), DockerError> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(id, Some(options), tar.into())
            .await
            .map_err(|e| DockerError::CopyFailed(format!("Failed to upload archive: {e}")))?;

        Ok(())
    }

    /// Starts a container by ID.
    pub async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to start container: {e}")))?;

        Ok(())
    }

    /// Follows a container's log streams until the container stops.
    ///
    /// Each chunk is handed to `write` together with the stream it came from,
    /// preserving the stdout/stderr split of the containerized process.
    pub async fn follow_logs<F>(&self, id: &str, mut write: F) -> Result<(), DockerError>
    where
        F: FnMut(StreamKind, &[u8]),
    {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(id, Some(options));

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => write(StreamKind::Stdout, &message),
                Ok(LogOutput::StdErr { message }) => write(StreamKind::Stderr, &message),
                Ok(_) => {}
                Err(e) => {
                    return Err(DockerError::RunFailed(format!("Error reading logs: {e}")));
                }
            }
        }

        Ok(())
    }

    /// Waits for a container to finish executing.
    ///
    /// # Returns
    ///
    /// The exit code of the container.
    pub async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        if let Some(result) = stream.next().await {
            let wait_response = result
                .map_err(|e| DockerError::RunFailed(format!("Error waiting for container: {e}")))?;

            return Ok(wait_response.status_code);
        }

        Err(DockerError::RunFailed(
            "Container did not exit normally".to_string(),
        ))
    }

    /// Removes a container by ID.
    ///
    /// # Arguments
    ///
    /// * `id` - Container ID
    /// * `force` - Force removal even if running
    pub async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force,
            v: true, // Remove anonymous volumes
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                if e.to_string().contains("No such container") {
                    DockerError::ContainerNotFound { id: id.to_string() }
                } else {
                    DockerError::RunFailed(format!("Failed to remove container: {e}"))
                }
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_spec_builder() {
        let spec = ContainerSpec::new("test-pipeline/rapid-pro-to-engagement-db")
            .with_cmd(vec!["python".to_string(), "-u".to_string()])
            .with_memory_mb(2048)
            .with_cpu_cores(1.5)
            .with_network_mode("none")
            .with_bind("test-cache:/cache".to_string());

        assert_eq!(spec.image, "test-pipeline/rapid-pro-to-engagement-db");
        assert_eq!(spec.cmd.len(), 2);
        assert_eq!(spec.memory_mb, 2048);
        assert!((spec.cpu_cores - 1.5).abs() < f64::EPSILON);
        assert_eq!(spec.network_mode.as_deref(), Some("none"));
        assert_eq!(spec.binds, vec!["test-cache:/cache".to_string()]);
    }

    #[test]
    fn test_container_spec_defaults() {
        let spec = ContainerSpec::new("ubuntu:22.04");

        assert!(spec.cmd.is_empty());
        assert_eq!(spec.memory_mb, 4096);
        assert_eq!(spec.network_mode.as_deref(), Some("bridge"));
        assert!(spec.binds.is_empty());
    }

    #[test]
    fn test_resource_translation() {
        let spec = ContainerSpec::new("ubuntu:22.04")
            .with_memory_mb(1024)
            .with_cpu_cores(2.0);

        assert_eq!(spec.memory_bytes(), 1024 * 1024 * 1024);
        assert_eq!(spec.cpu_quota(), 200_000);
    }
}
