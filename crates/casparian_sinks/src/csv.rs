//! CSV sink: streamed writes, header row written once, temp + rename commit.

use crate::{ensure_parent_dir, staging_path, RecordSink, SinkError, SinkResult};
use arrow::array::RecordBatch;
use arrow::csv::writer::WriterBuilder;
use arrow::datatypes::SchemaRef;
use std::fs::File;
use std::path::PathBuf;
use tracing::{debug, info};

pub struct CsvSink {
    final_path: PathBuf,
    temp_path: PathBuf,
    writer: Option<arrow::csv::Writer<File>>,
    rows_written: u64,
}

impl CsvSink {
    pub fn new(path: PathBuf) -> Self {
        let temp_path = staging_path(&path);
        Self {
            final_path: path,
            temp_path,
            writer: None,
            rows_written: 0,
        }
    }
}

impl RecordSink for CsvSink {
    fn open(&mut self, schema: SchemaRef) -> SinkResult<()> {
        ensure_parent_dir(&self.final_path)?;
        let file = File::create(&self.temp_path).map_err(|e| {
            SinkError::message(format!(
                "Failed to create temp csv file {}: {}",
                self.temp_path.display(),
                e
            ))
        })?;
        // The arrow writer emits the header ahead of the first batch; an
        // empty batch up front guarantees the header even for zero-row jobs.
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        writer
            .write(&RecordBatch::new_empty(schema))
            .map_err(|e| SinkError::message(format!("Failed to write csv header: {}", e)))?;
        self.writer = Some(writer);
        Ok(())
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::message("CSV sink not opened"))?;
        writer
            .write(batch)
            .map_err(|e| SinkError::message(format!("Failed to write csv batch: {}", e)))?;
        self.rows_written += batch.num_rows() as u64;
        debug!("CSV sink: {} rows total", self.rows_written);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> SinkResult<(PathBuf, u64)> {
        // Dropping the writer flushes its BufWriter.
        drop(self.writer.take());
        std::fs::rename(&self.temp_path, &self.final_path).map_err(|e| {
            SinkError::message(format!(
                "Failed to promote csv output to {}: {}",
                self.final_path.display(),
                e
            ))
        })?;
        info!(
            "CSV sink committed: {} ({} rows)",
            self.final_path.display(),
            self.rows_written
        );
        Ok((self.final_path.clone(), self.rows_written))
    }

    fn abort(mut self: Box<Self>) -> SinkResult<()> {
        drop(self.writer.take());
        let _ = std::fs::remove_file(&self.temp_path);
        debug!("CSV sink aborted, staging removed");
        Ok(())
    }
}
