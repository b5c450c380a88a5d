//! Scanner configuration.

use crate::error::{Result, ScoutError};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Configuration for scanning operations.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Parallel hashing tasks (0 = 2x logical CPUs).
    pub parallelism: usize,
    /// Cap on bytes concurrently in flight through hashers.
    pub max_inflight_bytes: u64,
    /// Include globs; empty means everything.
    pub include: Vec<String>,
    /// Exclude globs, honored before descending into directories.
    pub exclude: Vec<String>,
    /// Whether to follow symlinks. Off by default to avoid cycles.
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            max_inflight_bytes: 256 * 1024 * 1024,
            include: Vec::new(),
            exclude: Vec::new(),
            follow_symlinks: false,
        }
    }
}

impl ScanConfig {
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
        }
    }

    pub(crate) fn build_filters(&self) -> Result<ScanFilters> {
        Ok(ScanFilters {
            include: build_globset(&self.include)?,
            exclude: build_globset(&self.exclude)?,
            include_empty: self.include.is_empty(),
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ScoutError::Pattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ScoutError::Pattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

#[derive(Debug, Clone)]
pub(crate) struct ScanFilters {
    include: GlobSet,
    exclude: GlobSet,
    include_empty: bool,
}

impl ScanFilters {
    /// Whether a directory may be descended into.
    pub(crate) fn allows_dir(&self, rel_path: &str) -> bool {
        !self.exclude.is_match(rel_path)
    }

    /// Whether a file should be scanned.
    pub(crate) fn allows_file(&self, rel_path: &str) -> bool {
        if self.exclude.is_match(rel_path) {
            return false;
        }
        self.include_empty || self.include.is_match(rel_path)
    }
}
