//! Configuration for the document pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocflowConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database and file locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Worker lanes and task budgets
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Notification hub configuration
    #[serde(default)]
    pub hub: HubConfig,
    /// Search defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl DocflowConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text; missing sections fall back to defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets and pool sizes the workers cannot run with
    pub fn validate(&self) -> Result<()> {
        let p = &self.processing;
        if p.soft_time_limit_secs == 0 || p.hard_time_limit_secs == 0 {
            return Err(Error::Config("task time limits must be positive".to_string()));
        }
        if p.soft_time_limit_secs > p.hard_time_limit_secs {
            return Err(Error::Config(format!(
                "soft time limit ({}s) exceeds hard time limit ({}s)",
                p.soft_time_limit_secs, p.hard_time_limit_secs
            )));
        }
        if p.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".to_string()));
        }
        if self.hub.outbound_buffer == 0 {
            return Err(Error::Config("hub.outbound_buffer must be positive".to_string()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Where records, uploads and converted output live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding file records and stage rows
    pub database_path: PathBuf,
    /// Directory for stored uploads
    pub upload_dir: PathBuf,
    /// Directory for converted markdown
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join("docflow");

        Self {
            database_path: base.join("file_manager.db"),
            upload_dir: base.join("uploads"),
            output_dir: base.join("output"),
        }
    }
}

/// Worker lanes and per-task time budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Concurrent conversion workers (default: CPU count, max 4)
    pub conversion_workers: Option<usize>,
    /// Concurrent indexing workers (default: 2)
    pub indexing_workers: Option<usize>,
    /// Pending tasks buffered per lane
    pub queue_capacity: usize,
    /// Soft budget: handlers stop at their next boundary (default: 240s)
    pub soft_time_limit_secs: u64,
    /// Hard budget: the worker slot is reclaimed (default: 300s)
    pub hard_time_limit_secs: u64,
    /// How long finished task states stay queryable (default: 3600s)
    pub result_expires_secs: u64,
    /// Maximum files per batch submission
    pub max_batch_files: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            conversion_workers: None,
            indexing_workers: None,
            queue_capacity: 1000,
            soft_time_limit_secs: 240,
            hard_time_limit_secs: 300,
            result_expires_secs: 3600,
            max_batch_files: 10,
        }
    }
}

impl ProcessingConfig {
    pub fn conversion_worker_count(&self) -> usize {
        self.conversion_workers
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }

    pub fn indexing_worker_count(&self) -> usize {
        self.indexing_workers.unwrap_or(2).max(1)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }

    pub fn result_expires(&self) -> Duration {
        Duration::from_secs(self.result_expires_secs)
    }
}

/// Notification hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Messages buffered per connection before it counts as broken
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { outbound_buffer: 256 }
    }
}

/// Search defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned when a query does not say
    pub default_top_k: usize,
    /// Minimum similarity for a hit
    pub similarity_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            similarity_threshold: 0.7,
        }
    }
}
