//! Scanner error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoutError>;

#[derive(Debug, Error)]
pub enum ScoutError {
    /// Root-level problems are fatal to the scan.
    #[error("scan root does not exist or is not a directory: {0}")]
    RootMissing(String),

    #[error("scan root is not readable: {path}: {source}")]
    RootUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid filter pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] casparian_catalog::CatalogError),

    #[error("hashing task panicked: {0}")]
    TaskPanic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
