//! Catalog error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("invalid stored value: {0}")]
    Corrupt(String),

    #[error("invalid tagging rule pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("file {0} not found")]
    FileNotFound(i64),

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("parser binding {0} not found")]
    BindingNotFound(i64),

    #[error("schema contract rejected: {0}")]
    Contract(#[from] casparian_protocol::schema::SchemaContractError),

    #[error("{0}")]
    Encoding(#[from] serde_json::Error),
}
