//! Environment cache: isolated interpreter environments keyed by a hash of
//! the dependency set.
//!
//! Preparation is idempotent and cached across jobs. A keyed lock serializes
//! concurrent preparation of the same environment; finished environments are
//! used read-only so concurrent jobs may share them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// Hash of the sorted dependency set; the environment's identity.
pub fn env_key(dependency_set: &[String]) -> String {
    let mut sorted: Vec<&str> = dependency_set.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();
    blake3::hash(sorted.join("\n").as_bytes()).to_hex().to_string()
}

/// One cached environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvEntry {
    pub env_key: String,
    pub created_at: String,
    pub last_used: String,
    pub size_bytes: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EnvMetadata {
    entries: Vec<EnvEntry>,
}

impl EnvMetadata {
    fn find_mut(&mut self, key: &str) -> Option<&mut EnvEntry> {
        self.entries.iter_mut().find(|e| e.env_key == key)
    }

    fn upsert(&mut self, entry: EnvEntry) {
        if let Some(existing) = self.find_mut(&entry.env_key) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }
}

/// Result of a prepare call.
#[derive(Debug, Clone)]
pub struct PreparedEnv {
    pub env_key: String,
    pub interpreter: PathBuf,
    pub cached: bool,
}

pub struct EnvManager {
    envs_dir: PathBuf,
    uv_path: Option<PathBuf>,
    system_python: Option<PathBuf>,
    metadata_path: PathBuf,
    metadata: StdMutex<EnvMetadata>,
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EnvManager {
    /// Create the manager once at worker startup.
    pub fn new(env_dir: Option<PathBuf>) -> Result<Self> {
        let envs_dir = env_dir.unwrap_or_else(casparian_logging::envs_dir);
        std::fs::create_dir_all(&envs_dir)
            .with_context(|| format!("Failed to create env dir: {}", envs_dir.display()))?;

        let metadata_path = envs_dir.join(".metadata.json");
        let metadata = load_metadata(&metadata_path);

        let uv_path = find_uv();
        let system_python = which::which("python3")
            .or_else(|_| which::which("python"))
            .ok();

        info!(
            "EnvManager initialized: {} cached envs at {}",
            metadata.entries.len(),
            envs_dir.display()
        );

        Ok(Self {
            envs_dir,
            uv_path,
            system_python,
            metadata_path,
            metadata: StdMutex::new(metadata),
            locks: AsyncMutex::new(HashMap::new()),
        })
    }

    pub fn interpreter_path(&self, key: &str) -> PathBuf {
        let env_path = self.envs_dir.join(key);
        if cfg!(windows) {
            env_path.join("Scripts/python.exe")
        } else {
            env_path.join("bin/python")
        }
    }

    /// Prepare (or reuse) the environment for a dependency set.
    ///
    /// An empty dependency set resolves to the system interpreter - there is
    /// nothing to isolate. Concurrent prepares of the same key serialize on
    /// a per-key lock; the loser of the race sees a cache hit.
    pub async fn prepare(&self, dependency_set: &[String]) -> Result<PreparedEnv> {
        if dependency_set.is_empty() {
            let interpreter = self
                .system_python
                .clone()
                .context("No python interpreter found on PATH")?;
            return Ok(PreparedEnv {
                env_key: "system".to_string(),
                interpreter,
                cached: true,
            });
        }

        let key = env_key(dependency_set);
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _guard = lock.lock().await;

        let interpreter = self.interpreter_path(&key);
        if interpreter.exists() {
            self.touch(&key);
            return Ok(PreparedEnv {
                env_key: key,
                interpreter,
                cached: true,
            });
        }

        info!("EnvManager: cache miss for {}, provisioning", &key[..12]);
        let uv_path = self
            .uv_path
            .clone()
            .context("uv not found. Install: curl -LsSf https://astral.sh/uv/install.sh | sh")?;
        let env_path = self.envs_dir.join(&key);
        let deps = dependency_set.to_vec();
        let interpreter_clone = interpreter.clone();
        tokio::task::spawn_blocking(move || create_env(&uv_path, &env_path, &deps))
            .await
            .context("env provisioning task panicked")??;

        let size = dir_size(&self.envs_dir.join(&key));
        let now = chrono::Utc::now().to_rfc3339();
        {
            let mut metadata = self
                .metadata
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            metadata.upsert(EnvEntry {
                env_key: key.clone(),
                created_at: now.clone(),
                last_used: now,
                size_bytes: size,
            });
            self.save_metadata(&metadata);
        }

        info!("EnvManager: provisioned env {}", &key[..12]);
        Ok(PreparedEnv {
            env_key: key,
            interpreter: interpreter_clone,
            cached: false,
        })
    }

    fn touch(&self, key: &str) {
        let mut metadata = self
            .metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = metadata.find_mut(key) {
            entry.last_used = chrono::Utc::now().to_rfc3339();
        }
        self.save_metadata(&metadata);
    }

    fn save_metadata(&self, metadata: &EnvMetadata) {
        if let Ok(json) = serde_json::to_string_pretty(metadata) {
            let _ = std::fs::write(&self.metadata_path, json);
        }
    }

    /// Cache stats: (env count, total bytes).
    pub fn stats(&self) -> (usize, u64) {
        let metadata = self
            .metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = metadata.entries.len();
        let bytes = metadata.entries.iter().map(|e| e.size_bytes).sum();
        (count, bytes)
    }
}

fn load_metadata(path: &Path) -> EnvMetadata {
    if !path.exists() {
        return EnvMetadata::default();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Failed to parse env metadata: {}", e);
            EnvMetadata::default()
        }),
        Err(_) => EnvMetadata::default(),
    }
}

fn find_uv() -> Option<PathBuf> {
    if let Ok(path) = which::which("uv") {
        return Some(path);
    }
    let home = std::env::var("HOME").unwrap_or_default();
    let candidates = [
        format!("{home}/.cargo/bin/uv"),
        format!("{home}/.local/bin/uv"),
        "/usr/local/bin/uv".to_string(),
    ];
    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn create_env(uv_path: &Path, env_path: &Path, dependency_set: &[String]) -> Result<()> {
    std::fs::create_dir_all(env_path)?;

    let output = Command::new(uv_path)
        .arg("venv")
        .arg(env_path)
        .output()
        .context("Failed to run uv venv")?;
    if !output.status.success() {
        anyhow::bail!("uv venv failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    let requirements = env_path.join("requirements.txt");
    std::fs::write(&requirements, dependency_set.join("\n"))?;

    let python = if cfg!(windows) {
        env_path.join("Scripts/python.exe")
    } else {
        env_path.join("bin/python")
    };
    let output = Command::new(uv_path)
        .args(["pip", "install", "-r"])
        .arg(&requirements)
        .arg("--python")
        .arg(&python)
        .output()
        .context("Failed to run uv pip install")?;
    if !output.status.success() {
        anyhow::bail!(
            "uv pip install failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    fn walk(path: &Path, total: &mut u64) {
        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                walk(&entry.path(), total);
            } else if let Ok(meta) = entry.metadata() {
                *total += meta.len();
            }
        }
    }
    let mut total = 0;
    walk(path, &mut total);
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_order_independent() {
        let a = env_key(&["pandas==2.2".to_string(), "pyarrow==17".to_string()]);
        let b = env_key(&["pyarrow==17".to_string(), "pandas==2.2".to_string()]);
        assert_eq!(a, b);

        let c = env_key(&["pandas==2.3".to_string(), "pyarrow==17".to_string()]);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_empty_dependency_set_uses_system_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EnvManager::new(Some(dir.path().to_path_buf())).unwrap();
        if manager.system_python.is_none() {
            return; // no python on this machine; nothing to assert
        }
        let prepared = manager.prepare(&[]).await.unwrap();
        assert!(prepared.cached);
        assert_eq!(prepared.env_key, "system");
    }

    #[test]
    fn test_interpreter_path_contains_key() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EnvManager::new(Some(dir.path().to_path_buf())).unwrap();
        let path = manager.interpreter_path("abc123");
        assert!(path.to_string_lossy().contains("abc123"));
        assert!(path.to_string_lossy().contains("python"));
    }
}
