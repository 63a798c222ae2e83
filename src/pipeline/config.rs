//! Orchestrator configuration.
//!
//! Settings that apply to every stage container a deployment runs: the
//! Dockerfile context the stage images are built from, container resource
//! limits, and the container network mode. Stage-specific parameters travel
//! in the stage invocation instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory containing the Dockerfile the stage images are built from.
    pub docker_context: PathBuf,
    /// Memory limit for stage containers (in MB).
    pub docker_memory_mb: u64,
    /// CPU cores allocated to stage containers.
    pub docker_cpu_cores: f64,
    /// Network mode for stage containers.
    pub docker_network: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            docker_context: PathBuf::from("./docker"),
            docker_memory_mb: 4096,
            docker_cpu_cores: 2.0,
            docker_network: "bridge".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPELINE_DOCKER_CONTEXT`: Dockerfile context directory (default: ./docker)
    /// - `PIPELINE_DOCKER_MEMORY_MB`: Container memory limit (default: 4096)
    /// - `PIPELINE_DOCKER_CPU_CORES`: Container CPU cores (default: 2.0)
    /// - `PIPELINE_DOCKER_NETWORK`: Container network mode (default: bridge)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PIPELINE_DOCKER_CONTEXT") {
            config.docker_context = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PIPELINE_DOCKER_MEMORY_MB") {
            config.docker_memory_mb = parse_env_value(&val, "PIPELINE_DOCKER_MEMORY_MB")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_DOCKER_CPU_CORES") {
            config.docker_cpu_cores = parse_env_value(&val, "PIPELINE_DOCKER_CPU_CORES")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_DOCKER_NETWORK") {
            config.docker_network = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.docker_context.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "docker_context cannot be empty".to_string(),
            ));
        }

        if self.docker_memory_mb < 256 {
            return Err(ConfigError::ValidationFailed(
                "docker_memory_mb must be at least 256 MB".to_string(),
            ));
        }

        if self.docker_cpu_cores <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "docker_cpu_cores must be greater than 0".to_string(),
            ));
        }

        if self.docker_network.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "docker_network cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the Dockerfile context directory.
    pub fn with_docker_context(mut self, context: impl Into<PathBuf>) -> Self {
        self.docker_context = context.into();
        self
    }

    /// Builder method to set the container memory limit.
    pub fn with_docker_memory_mb(mut self, memory: u64) -> Self {
        self.docker_memory_mb = memory;
        self
    }

    /// Builder method to set the container CPU allocation.
    pub fn with_docker_cpu_cores(mut self, cores: f64) -> Self {
        self.docker_cpu_cores = cores;
        self
    }

    /// Builder method to set the container network mode.
    pub fn with_docker_network(mut self, network: impl Into<String>) -> Self {
        self.docker_network = network.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
