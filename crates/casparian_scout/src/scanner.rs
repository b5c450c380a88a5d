//! Filesystem scanner.
//!
//! Walks scan roots, streams file bytes through the fingerprint hash, and
//! upserts results into the catalog. Hashing is parallel up to the
//! configured pool with a total in-flight byte cap; catalog upserts are the
//! persistence boundary, so interrupted scans are resumable and rescans are
//! idempotent.

use crate::config::{ScanConfig, ScanFilters};
use crate::error::{Result, ScoutError};
use crate::fingerprint::fingerprint_file;
use crate::ScanCancelToken;
use casparian_catalog::{Catalog, EventDetails, EventType};
use casparian_protocol::types::UpsertOutcome;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Byte-budget permits are handed out in 1 MiB units.
const BYTE_PERMIT_UNIT: u64 = 1024 * 1024;

/// Progress update during a scan.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub files_seen: u64,
    pub files_persisted: u64,
    pub current_path: Option<String>,
}

/// Result of a scan operation.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub files_seen: u64,
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unchanged: u64,
    pub files_tagged: u64,
    pub errors: u64,
    pub bytes_hashed: u64,
    pub duration_ms: u64,
    pub cancelled: bool,
}

/// Filesystem scanner bound to a catalog.
pub struct Scout {
    catalog: Catalog,
    config: ScanConfig,
}

struct WalkedFile {
    rel_path: String,
    abs_path: PathBuf,
    size: u64,
}

enum FileOutcome {
    Persisted {
        outcome: UpsertOutcome,
        tagged: bool,
        bytes: u64,
    },
    Error,
}

impl Scout {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            config: ScanConfig::default(),
        }
    }

    pub fn with_config(catalog: Catalog, config: ScanConfig) -> Self {
        Self { catalog, config }
    }

    /// Scan one root. Root-level errors are fatal; file-level errors are
    /// recorded and counted but do not abort the scan.
    pub async fn scan_root(
        &self,
        root: &Path,
        progress_tx: Option<mpsc::Sender<ScanProgress>>,
        cancel: &ScanCancelToken,
    ) -> Result<ScanStats> {
        let start = std::time::Instant::now();

        let metadata = std::fs::metadata(root)
            .map_err(|_| ScoutError::RootMissing(root.display().to_string()))?;
        if !metadata.is_dir() {
            return Err(ScoutError::RootMissing(root.display().to_string()));
        }
        // Surface permission problems on the root up front.
        std::fs::read_dir(root).map_err(|source| ScoutError::RootUnreadable {
            path: root.display().to_string(),
            source,
        })?;

        let root = root
            .canonicalize()
            .map_err(|_| ScoutError::RootMissing(root.display().to_string()))?;
        let filters = self.config.build_filters()?;

        info!(root = %root.display(), "Starting scan");

        // Walker runs on the blocking pool and streams entries through a
        // bounded channel; the async side hashes and persists.
        let (entry_tx, mut entry_rx) = mpsc::channel::<WalkedFile>(1024);
        let walk_root = root.clone();
        let walk_cancel = cancel.clone();
        let follow_symlinks = self.config.follow_symlinks;
        let walk_handle = tokio::task::spawn_blocking(move || {
            walk_files(&walk_root, follow_symlinks, &filters, entry_tx, &walk_cancel)
        });

        let hash_permits = Arc::new(Semaphore::new(self.config.effective_parallelism()));
        let byte_budget = (self.config.max_inflight_bytes / BYTE_PERMIT_UNIT).max(1) as usize;
        let byte_permits = Arc::new(Semaphore::new(byte_budget));

        let mut stats = ScanStats::default();
        let mut tasks: JoinSet<FileOutcome> = JoinSet::new();
        let mut persisted: u64 = 0;

        while let Some(file) = entry_rx.recv().await {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            stats.files_seen += 1;

            if let Some(tx) = progress_tx.as_ref() {
                let _ = tx.try_send(ScanProgress {
                    files_seen: stats.files_seen,
                    files_persisted: persisted,
                    current_path: Some(file.rel_path.clone()),
                });
            }

            let needed = byte_permits_for(file.size, byte_budget);
            let Ok(hash_permit) = Arc::clone(&hash_permits).acquire_owned().await else {
                break;
            };
            let Ok(byte_permit) = Arc::clone(&byte_permits).acquire_many_owned(needed).await else {
                break;
            };
            let catalog = self.catalog.clone();
            let root_str = root.display().to_string();

            tasks.spawn(async move {
                let _permits = (hash_permit, byte_permit);
                process_file(&catalog, &root_str, file).await
            });

            // Drain finished tasks without blocking the feed loop.
            while let Some(done) = tasks.try_join_next() {
                persisted += 1;
                fold_outcome(&mut stats, done);
            }
        }

        // Wait for the walker and the stragglers.
        match walk_handle.await {
            Ok(result) => result?,
            Err(e) => return Err(ScoutError::TaskPanic(e.to_string())),
        }
        while let Some(done) = tasks.join_next().await {
            persisted += 1;
            fold_outcome(&mut stats, done.map_err(|e| ScoutError::TaskPanic(e.to_string())));
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            new = stats.files_new,
            changed = stats.files_changed,
            unchanged = stats.files_unchanged,
            tagged = stats.files_tagged,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            cancelled = stats.cancelled,
            "Scan complete"
        );
        Ok(stats)
    }
}

fn byte_permits_for(size: u64, budget: usize) -> u32 {
    let needed = (size / BYTE_PERMIT_UNIT + 1).min(budget as u64);
    needed as u32
}

fn fold_outcome(stats: &mut ScanStats, done: std::result::Result<FileOutcome, impl std::fmt::Display>) {
    match done {
        Ok(FileOutcome::Persisted {
            outcome,
            tagged,
            bytes,
        }) => {
            stats.bytes_hashed += bytes;
            if tagged {
                stats.files_tagged += 1;
            }
            match outcome {
                UpsertOutcome::Inserted => stats.files_new += 1,
                UpsertOutcome::Updated => stats.files_changed += 1,
                UpsertOutcome::Unchanged => stats.files_unchanged += 1,
            }
        }
        Ok(FileOutcome::Error) => stats.errors += 1,
        Err(e) => {
            warn!("File task failed: {}", e);
            stats.errors += 1;
        }
    }
}

/// Hash one file and persist the result. Errors are recorded, not raised.
async fn process_file(catalog: &Catalog, root: &str, file: WalkedFile) -> FileOutcome {
    let abs_path = file.abs_path.clone();
    let hashed = tokio::task::spawn_blocking(move || fingerprint_file(&abs_path)).await;

    let (fingerprint, bytes) = match hashed {
        Ok(Ok(pair)) => pair,
        Ok(Err(io_err)) => {
            warn!(path = %file.abs_path.display(), "Failed to hash file: {}", io_err);
            // If the file is already known, record the error against its row.
            if let Ok(Some(existing)) = catalog.get_file_by_path(root, &file.rel_path).await {
                let _ = catalog
                    .record_file_error(existing.id, &io_err.to_string())
                    .await;
            }
            return FileOutcome::Error;
        }
        Err(join_err) => {
            warn!("Hash task panicked: {}", join_err);
            return FileOutcome::Error;
        }
    };

    let upserted = catalog
        .upsert_file(
            root,
            &file.rel_path,
            &file.abs_path.display().to_string(),
            bytes as i64,
            &fingerprint,
        )
        .await;

    let (file_id, outcome) = match upserted {
        Ok(pair) => pair,
        Err(e) => {
            warn!(path = %file.abs_path.display(), "Upsert failed: {}", e);
            return FileOutcome::Error;
        }
    };

    let mut tagged = false;
    match outcome {
        UpsertOutcome::Unchanged => {}
        UpsertOutcome::Inserted => {
            let _ = catalog
                .append_event(EventType::FileDiscovered, EventDetails::for_file(&fingerprint))
                .await;
            if let Ok(Some(_)) = catalog.apply_rules(file_id).await {
                tagged = true;
                let _ = catalog
                    .append_event(EventType::FileTagged, EventDetails::for_file(&fingerprint))
                    .await;
            }
        }
        UpsertOutcome::Updated => {
            if let Ok(Some(_)) = catalog.apply_rules(file_id).await {
                tagged = true;
                let _ = catalog
                    .append_event(EventType::FileRetagged, EventDetails::for_file(&fingerprint))
                    .await;
            }
        }
    }

    debug!(path = %file.rel_path, ?outcome, tagged, "File persisted");
    FileOutcome::Persisted {
        outcome,
        tagged,
        bytes,
    }
}

/// Walk the root, honoring excludes before descending. Symlinked directories
/// are not followed unless configured, which also breaks symlink cycles.
fn walk_files(
    root: &Path,
    follow_symlinks: bool,
    filters: &ScanFilters,
    entry_tx: mpsc::Sender<WalkedFile>,
    cancel: &ScanCancelToken,
) -> Result<()> {
    let walker = WalkBuilder::new(root)
        .follow_links(follow_symlinks)
        .standard_filters(false)
        .hidden(false)
        .filter_entry({
            let root = root.to_path_buf();
            // The filter only prunes directories; files are re-checked below
            // with includes applied.
            let excludes = filters.clone();
            move |entry| {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    let rel = rel_path_of(&root, entry.path());
                    return excludes.allows_dir(&rel);
                }
                true
            }
        })
        .build();

    for result in walker {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Walk error: {}", e);
                continue;
            }
        };
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let rel_path = rel_path_of(root, entry.path());
        if !filters.allows_file(&rel_path) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

        let walked = WalkedFile {
            rel_path,
            abs_path: entry.path().to_path_buf(),
            size,
        };
        if entry_tx.blocking_send(walked).is_err() {
            // Receiver dropped: the scan was cancelled or failed.
            return Ok(());
        }
    }
    Ok(())
}

fn rel_path_of(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
