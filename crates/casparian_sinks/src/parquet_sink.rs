//! Parquet sink: one file per job, staged to a temp path and promoted with
//! an atomic rename on close.

use crate::{ensure_parent_dir, staging_path, RecordSink, SinkError, SinkResult, SinkTuning};
use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::PathBuf;
use tracing::{debug, info};

pub struct ParquetSink {
    final_path: PathBuf,
    temp_path: PathBuf,
    tuning: SinkTuning,
    writer: Option<ArrowWriter<File>>,
    rows_written: u64,
}

impl ParquetSink {
    pub fn new(path: PathBuf, tuning: SinkTuning) -> Self {
        let temp_path = staging_path(&path);
        Self {
            final_path: path,
            temp_path,
            tuning,
            writer: None,
            rows_written: 0,
        }
    }
}

impl RecordSink for ParquetSink {
    fn open(&mut self, schema: SchemaRef) -> SinkResult<()> {
        ensure_parent_dir(&self.final_path)?;

        let file = File::create(&self.temp_path).map_err(|e| {
            SinkError::message(format!(
                "Failed to create temp parquet file {}: {}",
                self.temp_path.display(),
                e
            ))
        })?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(self.tuning.row_group_rows)
            .build();

        let writer = ArrowWriter::try_new(file, schema, Some(props))
            .map_err(|e| SinkError::message(format!("Failed to create Parquet writer: {}", e)))?;
        self.writer = Some(writer);

        info!("Parquet sink staging at {}", self.temp_path.display());
        Ok(())
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::message("Parquet sink not opened"))?;

        writer
            .write(batch)
            .map_err(|e| SinkError::message(format!("Failed to write parquet batch: {}", e)))?;
        self.rows_written += batch.num_rows() as u64;

        // Row groups flush on the row cap; also flush early on decoded size.
        if writer.in_progress_size() >= self.tuning.row_group_bytes {
            writer
                .flush()
                .map_err(|e| SinkError::message(format!("Failed to flush row group: {}", e)))?;
        }

        debug!(
            "Parquet sink: {} rows buffered ({} total)",
            batch.num_rows(),
            self.rows_written
        );
        Ok(())
    }

    fn close(mut self: Box<Self>) -> SinkResult<(PathBuf, u64)> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| SinkError::message("Parquet sink not opened"))?;
        writer
            .close()
            .map_err(|e| SinkError::message(format!("Failed to close Parquet writer: {}", e)))?;

        std::fs::rename(&self.temp_path, &self.final_path).map_err(|e| {
            SinkError::message(format!(
                "Failed to promote parquet output to {}: {}",
                self.final_path.display(),
                e
            ))
        })?;

        info!(
            "Parquet sink committed: {} ({} rows)",
            self.final_path.display(),
            self.rows_written
        );
        Ok((self.final_path.clone(), self.rows_written))
    }

    fn abort(mut self: Box<Self>) -> SinkResult<()> {
        drop(self.writer.take());
        let _ = std::fs::remove_file(&self.temp_path);
        debug!("Parquet sink aborted, staging removed");
        Ok(())
    }
}
