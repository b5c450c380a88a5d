//! SQLite sink: the sink owns the connection and writes inside a single
//! transaction per job. Abort rolls everything back, including the table
//! creation, so a cancelled job leaves nothing behind.

use crate::{ensure_parent_dir, RecordSink, SinkError, SinkResult};
use arrow::array::{
    Array, BinaryArray, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use rusqlite::{params_from_iter, Connection};
use std::path::PathBuf;
use tracing::{debug, info};

pub struct SqliteSink {
    path: PathBuf,
    table: String,
    conn: Option<Connection>,
    insert_sql: Option<String>,
    rows_written: u64,
}

impl SqliteSink {
    pub fn new(path: PathBuf, table: String) -> Self {
        Self {
            path,
            table,
            conn: None,
            insert_sql: None,
            rows_written: 0,
        }
    }
}

fn sqlite_type_for(data_type: &DataType) -> SinkResult<&'static str> {
    match data_type {
        DataType::Utf8 => Ok("TEXT"),
        DataType::Int64 => Ok("INTEGER"),
        DataType::Float64 => Ok("REAL"),
        DataType::Boolean => Ok("INTEGER"),
        DataType::Timestamp(TimeUnit::Microsecond, _) => Ok("TEXT"),
        DataType::Binary => Ok("BLOB"),
        other => Err(SinkError::message(format!(
            "sqlite sink cannot store arrow type {:?}",
            other
        ))),
    }
}

fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

impl RecordSink for SqliteSink {
    fn open(&mut self, schema: SchemaRef) -> SinkResult<()> {
        ensure_parent_dir(&self.path)?;
        let conn = Connection::open(&self.path).map_err(|e| {
            SinkError::message(format!(
                "Failed to open sqlite sink {}: {}",
                self.path.display(),
                e
            ))
        })?;

        conn.execute_batch("BEGIN")
            .map_err(|e| SinkError::message(format!("Failed to begin sink transaction: {}", e)))?;

        let mut column_defs = Vec::with_capacity(schema.fields().len());
        let mut column_names = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let sql_type = sqlite_type_for(field.data_type())?;
            let null_clause = if field.is_nullable() { "" } else { " NOT NULL" };
            column_defs.push(format!(
                "{} {}{}",
                quote_ident(field.name()),
                sql_type,
                null_clause
            ));
            column_names.push(quote_ident(field.name()));
        }

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            column_defs.join(", ")
        );
        conn.execute_batch(&create)
            .map_err(|e| SinkError::message(format!("Failed to create sink table: {}", e)))?;

        let placeholders = vec!["?"; column_names.len()].join(", ");
        self.insert_sql = Some(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            column_names.join(", "),
            placeholders
        ));
        self.conn = Some(conn);
        info!(
            "SQLite sink opened: {} table {}",
            self.path.display(),
            self.table
        );
        Ok(())
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| SinkError::message("SQLite sink not opened"))?;
        let insert_sql = self
            .insert_sql
            .as_ref()
            .ok_or_else(|| SinkError::message("SQLite sink not opened"))?;

        let mut stmt = conn
            .prepare_cached(insert_sql)
            .map_err(|e| SinkError::message(format!("Failed to prepare insert: {}", e)))?;

        for row in 0..batch.num_rows() {
            let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(batch.num_columns());
            for col in 0..batch.num_columns() {
                values.push(cell_value(batch, row, col)?);
            }
            stmt.execute(params_from_iter(values))
                .map_err(|e| SinkError::message(format!("Failed to insert row: {}", e)))?;
        }

        self.rows_written += batch.num_rows() as u64;
        debug!("SQLite sink: {} rows total", self.rows_written);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> SinkResult<(PathBuf, u64)> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| SinkError::message("SQLite sink not opened"))?;
        conn.execute_batch("COMMIT")
            .map_err(|e| SinkError::message(format!("Failed to commit sink transaction: {}", e)))?;
        info!(
            "SQLite sink committed: {} ({} rows into {})",
            self.path.display(),
            self.rows_written,
            self.table
        );
        Ok((self.path.clone(), self.rows_written))
    }

    fn abort(mut self: Box<Self>) -> SinkResult<()> {
        if let Some(conn) = self.conn.take() {
            let _ = conn.execute_batch("ROLLBACK");
        }
        debug!("SQLite sink aborted, transaction rolled back");
        Ok(())
    }
}

fn cell_value(batch: &RecordBatch, row: usize, col: usize) -> SinkResult<rusqlite::types::Value> {
    use rusqlite::types::Value;

    let array = batch.column(col);
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        DataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| SinkError::message("column type mismatch (utf8)"))?;
            Value::Text(arr.value(row).to_string())
        }
        DataType::Int64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| SinkError::message("column type mismatch (int64)"))?;
            Value::Integer(arr.value(row))
        }
        DataType::Float64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| SinkError::message("column type mismatch (float64)"))?;
            Value::Real(arr.value(row))
        }
        DataType::Boolean => {
            let arr = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| SinkError::message("column type mismatch (bool)"))?;
            Value::Integer(arr.value(row) as i64)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let arr = array
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| SinkError::message("column type mismatch (timestamp)"))?;
            let micros = arr.value(row);
            let rendered = chrono::DateTime::from_timestamp_micros(micros)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| micros.to_string());
            Value::Text(rendered)
        }
        DataType::Binary => {
            let arr = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| SinkError::message("column type mismatch (binary)"))?;
            Value::Blob(arr.value(row).to_vec())
        }
        other => {
            return Err(SinkError::message(format!(
                "sqlite sink cannot store arrow type {:?}",
                other
            )))
        }
    };
    Ok(value)
}
