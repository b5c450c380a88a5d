//! Sink writers for job output.
//!
//! Each sink receives lineage-stamped Arrow record batches from a single job
//! and owns its buffering and flush policy. The capability set is
//! `open(schema)`, `write_batch(batch)`, `close() -> (path, rows)`, plus
//! `abort()` which guarantees no externally visible output remains.

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

use casparian_protocol::sink::{resolve_template, SinkSpec, TemplateContext};
use casparian_protocol::types::JobId;

pub mod lineage;

mod csv;
mod parquet_sink;
mod sqlite;

pub use csv::CsvSink;
pub use lineage::{stamp_lineage, stamped_schema, LineageStamp};
pub use parquet_sink::ParquetSink;
pub use sqlite::SqliteSink;

/// Errors returned by sink operations.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    pub fn message(message: impl Into<String>) -> Self {
        SinkError::Message {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for SinkError {
    fn from(err: anyhow::Error) -> Self {
        SinkError::Source {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Per-job identity a sink needs to resolve templates and name artifacts.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub tag: String,
    pub parser_name: String,
    /// Base for relative path templates.
    pub output_root: Option<PathBuf>,
}

impl JobContext {
    fn resolve_path(&self, template: &str) -> PathBuf {
        let ctx = TemplateContext::new(self.job_id, &self.tag, &self.parser_name);
        let rendered = resolve_template(template, &ctx);
        let path = PathBuf::from(rendered);
        if path.is_absolute() {
            path
        } else if let Some(root) = &self.output_root {
            root.join(path)
        } else {
            path
        }
    }
}

/// Capability set every sink variant implements.
pub trait RecordSink: Send {
    /// Create the destination for the given (stamped) schema. Called once,
    /// before any batch - a zero-row job still produces a valid artifact.
    fn open(&mut self, schema: SchemaRef) -> SinkResult<()>;

    /// Append one batch. Batches arrive in guest send order.
    fn write_batch(&mut self, batch: &RecordBatch) -> SinkResult<()>;

    /// Commit and return (artifact path, row count).
    fn close(self: Box<Self>) -> SinkResult<(PathBuf, u64)>;

    /// Discard all output. After abort, nothing is externally visible.
    fn abort(self: Box<Self>) -> SinkResult<()>;
}

/// Buffering knobs shared by the file sinks.
#[derive(Debug, Clone, Copy)]
pub struct SinkTuning {
    pub row_group_rows: usize,
    pub row_group_bytes: usize,
}

impl Default for SinkTuning {
    fn default() -> Self {
        Self {
            row_group_rows: casparian_protocol::defaults::DEFAULT_ROW_GROUP_ROWS,
            row_group_bytes: casparian_protocol::defaults::DEFAULT_ROW_GROUP_BYTES,
        }
    }
}

/// Instantiate the sink a binding's spec asks for.
pub fn create_sink(
    spec: &SinkSpec,
    ctx: &JobContext,
    tuning: SinkTuning,
) -> SinkResult<Box<dyn RecordSink>> {
    match spec {
        SinkSpec::Parquet { path_template } => {
            let path = ctx.resolve_path(path_template);
            Ok(Box::new(ParquetSink::new(path, tuning)))
        }
        SinkSpec::Csv { path_template } => {
            let path = ctx.resolve_path(path_template);
            Ok(Box::new(CsvSink::new(path)))
        }
        SinkSpec::Sqlite { path, table } => {
            let path = if Path::new(path).is_absolute() {
                PathBuf::from(path)
            } else if let Some(root) = &ctx.output_root {
                root.join(path)
            } else {
                PathBuf::from(path)
            };
            Ok(Box::new(SqliteSink::new(path, table.clone())))
        }
    }
}

/// Temp-file path used for staging before the atomic rename.
pub(crate) fn staging_path(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    final_path.with_file_name(format!(".{}.tmp", file_name))
}

pub(crate) fn ensure_parent_dir(path: &Path) -> SinkResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SinkError::message(format!(
                "Failed to create output directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}
