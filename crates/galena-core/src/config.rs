//! Configuration module for Galena
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all optional values. The four mandatory
//! startup parameters (jobs directory, worker count, backup budget,
//! registration pipe path) arrive on the command line and override the
//! corresponding fields here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{GalenaError, Result};

/// Upper bound on the session and backup budgets. Both budgets are
/// drained through `u32` semaphore acquires at shutdown, so they must
/// stay in `u32` range.
const MAX_BUDGET: usize = 65_536;

/// Main configuration structure for Galena
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session/registration listener configuration
    pub server: ServerConfig,

    /// Store configuration
    pub store: StoreConfig,

    /// Job scheduler configuration
    pub jobs: JobsConfig,

    /// Backup configuration
    pub backup: BackupConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GalenaError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| GalenaError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.registry_path.as_os_str().is_empty() {
            return Err(GalenaError::Config(
                "Registration pipe path cannot be empty".to_string(),
            ));
        }

        if self.server.max_sessions == 0 {
            return Err(GalenaError::Config(
                "Max sessions cannot be 0".to_string(),
            ));
        }

        if self.server.max_sessions > MAX_BUDGET {
            return Err(GalenaError::Config(format!(
                "Max sessions cannot exceed {MAX_BUDGET}"
            )));
        }

        if self.server.outbox_depth == 0 {
            return Err(GalenaError::Config(
                "Session outbox depth cannot be 0".to_string(),
            ));
        }

        if self.store.buckets == 0 {
            return Err(GalenaError::Config(
                "Store bucket count cannot be 0".to_string(),
            ));
        }

        if self.jobs.directory.as_os_str().is_empty() {
            return Err(GalenaError::Config(
                "Jobs directory cannot be empty".to_string(),
            ));
        }

        if self.jobs.workers == 0 {
            return Err(GalenaError::Config("Worker count cannot be 0".to_string()));
        }

        if self.backup.max_concurrent == 0 {
            return Err(GalenaError::Config(
                "Max concurrent backups cannot be 0".to_string(),
            ));
        }

        if self.backup.max_concurrent > MAX_BUDGET {
            return Err(GalenaError::Config(format!(
                "Max concurrent backups cannot exceed {MAX_BUDGET}"
            )));
        }

        Ok(())
    }
}

/// Session/registration listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Well-known registration pipe path clients announce themselves on
    pub registry_path: PathBuf,

    /// Maximum number of concurrently connected sessions; registrations
    /// beyond this wait for a session slot before the handshake completes
    pub max_sessions: usize,

    /// Depth of each session's outbound delivery queue
    pub outbox_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("/tmp/galena_registry"),
            max_sessions: 64,
            outbox_depth: 64,
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of hash buckets; fixed at initialization, never resized
    pub buckets: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { buckets: 128 }
    }
}

/// Job scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Directory scanned once at startup for `.job` files
    pub directory: PathBuf,

    /// Number of worker tasks claiming job files
    pub workers: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./jobs"),
            workers: 4,
        }
    }
}

/// Backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Maximum number of in-flight snapshot tasks; BACKUP commands beyond
    /// this block their worker until a slot frees
    pub max_concurrent: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { max_concurrent: 1 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
