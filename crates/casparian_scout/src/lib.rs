//! Filesystem scanner for the execution fabric.
//!
//! The scanner discovers files under configured roots, computes content
//! fingerprints, applies tagging rules, and upserts file rows into the
//! catalog. It holds no authoritative state of its own.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod scanner;

pub use config::ScanConfig;
pub use error::{Result, ScoutError};
pub use fingerprint::{fingerprint_bytes, fingerprint_file};
pub use scanner::{ScanProgress, ScanStats, Scout};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Token for cooperative cancellation of a running scan.
///
/// Clone is cheap and shares state. Partial progress is persisted at each
/// catalog upsert, so a cancelled scan can simply be re-run.
#[derive(Debug, Clone, Default)]
pub struct ScanCancelToken {
    cancelled: Arc<AtomicBool>,
}

impl ScanCancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
