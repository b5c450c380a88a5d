//! Lineage stamping: the four reserved columns appended to every output row.

use crate::{SinkError, SinkResult};
use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use casparian_protocol::schema::{is_reserved_column, RESERVED_LINEAGE_COLUMNS};
use std::sync::Arc;

/// Values stamped onto every batch of one job.
#[derive(Debug, Clone)]
pub struct LineageStamp {
    /// The input file's content fingerprint.
    pub source_hash: String,
    pub job_id: i64,
    pub parser_version: String,
    /// Microseconds since epoch, fixed at job start.
    pub processed_at_micros: i64,
}

impl LineageStamp {
    pub fn new(source_hash: String, job_id: i64, parser_version: String) -> Self {
        Self {
            source_hash,
            job_id,
            parser_version,
            processed_at_micros: chrono::Utc::now().timestamp_micros(),
        }
    }
}

fn lineage_fields() -> Vec<Field> {
    vec![
        Field::new(RESERVED_LINEAGE_COLUMNS[0], DataType::Utf8, false),
        Field::new(RESERVED_LINEAGE_COLUMNS[1], DataType::Int64, false),
        Field::new(RESERVED_LINEAGE_COLUMNS[2], DataType::Utf8, false),
        Field::new(
            RESERVED_LINEAGE_COLUMNS[3],
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
    ]
}

/// The sink-facing schema: declared columns plus the four lineage columns.
pub fn stamped_schema(declared: &Schema) -> SinkResult<SchemaRef> {
    for field in declared.fields() {
        if is_reserved_column(field.name()) {
            return Err(SinkError::message(format!(
                "schema already contains reserved lineage column '{}'",
                field.name()
            )));
        }
    }
    let mut fields: Vec<Field> = declared
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.extend(lineage_fields());
    Ok(Arc::new(Schema::new(fields)))
}

/// Append the four lineage columns to a batch.
///
/// The guest never sends lineage columns; a batch that already carries one
/// is a `lineage_collision` and must fail the job before reaching here.
pub fn stamp_lineage(batch: &RecordBatch, stamp: &LineageStamp) -> SinkResult<RecordBatch> {
    let schema = stamped_schema(batch.schema().as_ref())?;
    let rows = batch.num_rows();

    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    columns.push(Arc::new(StringArray::from(vec![
        stamp.source_hash.as_str();
        rows
    ])));
    columns.push(Arc::new(Int64Array::from(vec![stamp.job_id; rows])));
    columns.push(Arc::new(StringArray::from(vec![
        stamp.parser_version.as_str();
        rows
    ])));
    columns.push(Arc::new(TimestampMicrosecondArray::from(vec![
        stamp.processed_at_micros;
        rows
    ])));

    RecordBatch::try_new(schema, columns)
        .map_err(|e| SinkError::message(format!("Failed to stamp lineage columns: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 3])),
                Arc::new(Int64Array::from(vec![2, 4])),
            ],
        )
        .unwrap()
    }

    fn sample_stamp() -> LineageStamp {
        LineageStamp {
            source_hash: "feedface".to_string(),
            job_id: 7,
            parser_version: "abc123def456".to_string(),
            processed_at_micros: 1_700_000_000_000_000,
        }
    }

    #[test]
    fn test_stamp_appends_four_columns() {
        let batch = sample_batch();
        let stamped = stamp_lineage(&batch, &sample_stamp()).unwrap();

        assert_eq!(stamped.num_columns(), 6);
        assert_eq!(stamped.num_rows(), 2);

        let schema = stamped.schema();
        let names: Vec<&str> = schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "a",
                "b",
                "_cf_source_hash",
                "_cf_job_id",
                "_cf_parser_version",
                "_cf_processed_at"
            ]
        );

        let hashes = stamped
            .column_by_name("_cf_source_hash")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(hashes.iter().all(|v| v == Some("feedface")));

        let job_ids = stamped
            .column_by_name("_cf_job_id")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert!(job_ids.iter().all(|v| v == Some(7)));
    }

    #[test]
    fn test_stamp_empty_batch() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        let batch = RecordBatch::new_empty(schema);
        let stamped = stamp_lineage(&batch, &sample_stamp()).unwrap();
        assert_eq!(stamped.num_rows(), 0);
        assert_eq!(stamped.num_columns(), 5);
    }

    #[test]
    fn test_stamp_rejects_reserved_column() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "_cf_job_id",
            DataType::Int64,
            false,
        )]));
        let batch = RecordBatch::new_empty(schema);
        assert!(stamp_lineage(&batch, &sample_stamp()).is_err());
    }
}
