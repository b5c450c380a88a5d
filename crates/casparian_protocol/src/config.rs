//! Configuration surface for the execution fabric.
//!
//! External loaders (CLI, config files) supply this object; the core only
//! recognizes the options below.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fingerprint algorithm exposed via `_cf_source_hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: defaults::DEFAULT_CATALOG_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Parallel hashing tasks. 0 means 2x logical CPUs.
    pub parallelism: usize,
    pub hash_algorithm: HashAlgorithm,
    /// Cap on bytes concurrently being hashed.
    pub max_inflight_bytes: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            hash_algorithm: HashAlgorithm::Blake3,
            max_inflight_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub sweep_interval_ms: u64,
    pub liveness_window_ms: u64,
    pub retry_ceiling: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: defaults::DEFAULT_SWEEP_INTERVAL_MS,
            liveness_window_ms: defaults::DEFAULT_LIVENESS_WINDOW_MS,
            retry_ceiling: defaults::DEFAULT_RETRY_CEILING,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub heartbeat_interval_ms: u64,
    pub max_inflight_jobs: u32,
    /// Absolute path for the environment cache. None means
    /// `~/.casparian_flow/envs`.
    pub env_dir: Option<PathBuf>,
    pub guest_idle_timeout_ms: u64,
    pub guest_startup_timeout_ms: u64,
    pub env_prepare_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: defaults::DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_inflight_jobs: defaults::DEFAULT_MAX_INFLIGHT_JOBS,
            env_dir: None,
            guest_idle_timeout_ms: defaults::DEFAULT_GUEST_IDLE_TIMEOUT_MS,
            guest_startup_timeout_ms: defaults::DEFAULT_GUEST_STARTUP_TIMEOUT_MS,
            env_prepare_timeout_ms: defaults::DEFAULT_ENV_PREPARE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    pub default_row_group_rows: usize,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            default_row_group_rows: defaults::DEFAULT_ROW_GROUP_ROWS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory for relative sink path templates.
    pub output_root: Option<PathBuf>,
}

/// The full recognized configuration object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    pub catalog: CatalogConfig,
    pub scanner: ScannerConfig,
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    pub sinks: SinksConfig,
    pub paths: PathsConfig,
}

impl ScannerConfig {
    /// Effective parallelism: configured value or 2x logical CPUs.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let config = CoreConfig::default();
        assert_eq!(config.coordinator.sweep_interval_ms, 10_000);
        assert_eq!(config.coordinator.liveness_window_ms, 15_000);
        assert_eq!(config.coordinator.retry_ceiling, 3);
        assert_eq!(config.worker.heartbeat_interval_ms, 3_000);
        assert_eq!(config.worker.max_inflight_jobs, 1);
        assert_eq!(config.worker.guest_idle_timeout_ms, 60_000);
        assert_eq!(config.worker.guest_startup_timeout_ms, 10_000);
        assert_eq!(config.sinks.default_row_group_rows, 100_000);
    }

    #[test]
    fn test_partial_config_deserializes() {
        let json = r#"{"coordinator":{"retry_ceiling":5}}"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.coordinator.retry_ceiling, 5);
        assert_eq!(config.coordinator.sweep_interval_ms, 10_000);
    }

    #[test]
    fn test_effective_parallelism_floor() {
        let config = ScannerConfig {
            parallelism: 3,
            ..Default::default()
        };
        assert_eq!(config.effective_parallelism(), 3);
        assert!(ScannerConfig::default().effective_parallelism() >= 2);
    }
}
