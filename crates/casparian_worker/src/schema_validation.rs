//! Batch validation against the binding's schema contract.
//!
//! Runs on every batch before lineage stamping. Violations are terminal for
//! the job and never retried: a parser that emits the wrong shape will emit
//! it again.

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use casparian_protocol::schema::{is_reserved_column, LogicalType, SchemaContract};
use casparian_protocol::types::ErrorKind;

use crate::{JobError, JobResult};

/// Arrow type for a contract logical type.
pub fn arrow_type_for(logical: LogicalType) -> DataType {
    match logical {
        LogicalType::String => DataType::Utf8,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Bool => DataType::Boolean,
        LogicalType::TimestampMicros => DataType::Timestamp(TimeUnit::Microsecond, None),
        LogicalType::Binary => DataType::Binary,
    }
}

/// The declared (pre-lineage) arrow schema for a contract.
pub fn contract_arrow_schema(contract: &SchemaContract) -> Schema {
    let fields: Vec<Field> = contract
        .columns
        .iter()
        .map(|col| Field::new(&col.name, arrow_type_for(col.logical_type), col.nullable))
        .collect();
    Schema::new(fields)
}

/// Validate one guest batch against the contract.
///
/// Checks, in order: reserved lineage names (`lineage_collision`), then
/// column count, names/order, types, and nullability (`schema_violation`).
pub fn validate_batch(contract: &SchemaContract, batch: &RecordBatch) -> JobResult<()> {
    let schema = batch.schema();

    for field in schema.fields() {
        if is_reserved_column(field.name()) {
            return Err(JobError::new(
                ErrorKind::LineageCollision,
                format!("parser emitted reserved lineage column '{}'", field.name()),
            ));
        }
    }

    if schema.fields().len() != contract.columns.len() {
        return Err(JobError::new(
            ErrorKind::SchemaViolation,
            format!(
                "expected {} columns {:?}, got {} {:?}",
                contract.columns.len(),
                contract.column_names(),
                schema.fields().len(),
                schema
                    .fields()
                    .iter()
                    .map(|f| f.name().as_str())
                    .collect::<Vec<_>>()
            ),
        ));
    }

    for (index, (spec, field)) in contract.columns.iter().zip(schema.fields()).enumerate() {
        if spec.name != *field.name() {
            return Err(JobError::new(
                ErrorKind::SchemaViolation,
                format!(
                    "column {} is named '{}', contract declares '{}'",
                    index,
                    field.name(),
                    spec.name
                ),
            ));
        }

        let expected = arrow_type_for(spec.logical_type);
        if field.data_type() != &expected {
            return Err(JobError::new(
                ErrorKind::SchemaViolation,
                format!(
                    "column '{}' has type {:?}, contract declares {:?}",
                    spec.name,
                    field.data_type(),
                    expected
                ),
            ));
        }

        if !spec.nullable && batch.column(index).null_count() > 0 {
            return Err(JobError::new(
                ErrorKind::SchemaViolation,
                format!(
                    "column '{}' is declared non-nullable but contains {} null(s)",
                    spec.name,
                    batch.column(index).null_count()
                ),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use casparian_protocol::schema::ColumnSpec;
    use std::sync::Arc;

    fn contract() -> SchemaContract {
        SchemaContract::new(vec![
            ColumnSpec::new("a", LogicalType::Int64, false),
            ColumnSpec::new("b", LogicalType::Int64, false),
        ])
    }

    fn batch_with(fields: Vec<Field>, columns: Vec<arrow::array::ArrayRef>) -> RecordBatch {
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
    }

    #[test]
    fn test_valid_batch_passes() {
        let batch = batch_with(
            vec![
                Field::new("a", DataType::Int64, false),
                Field::new("b", DataType::Int64, false),
            ],
            vec![
                Arc::new(Int64Array::from(vec![1, 3])),
                Arc::new(Int64Array::from(vec![2, 4])),
            ],
        );
        assert!(validate_batch(&contract(), &batch).is_ok());
    }

    #[test]
    fn test_reserved_column_is_lineage_collision() {
        let batch = batch_with(
            vec![
                Field::new("a", DataType::Int64, false),
                Field::new("_cf_job_id", DataType::Int64, false),
            ],
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(Int64Array::from(vec![9])),
            ],
        );
        let err = validate_batch(&contract(), &batch).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LineageCollision);
    }

    #[test]
    fn test_wrong_type_is_schema_violation() {
        let batch = batch_with(
            vec![
                Field::new("a", DataType::Int64, false),
                Field::new("b", DataType::Utf8, false),
            ],
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(StringArray::from(vec!["x"])),
            ],
        );
        let err = validate_batch(&contract(), &batch).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaViolation);
    }

    #[test]
    fn test_wrong_column_count_is_schema_violation() {
        let batch = batch_with(
            vec![Field::new("a", DataType::Int64, false)],
            vec![Arc::new(Int64Array::from(vec![1]))],
        );
        let err = validate_batch(&contract(), &batch).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaViolation);
    }

    #[test]
    fn test_null_in_non_nullable_column() {
        let batch = batch_with(
            vec![
                Field::new("a", DataType::Int64, true),
                Field::new("b", DataType::Int64, false),
            ],
            vec![
                Arc::new(Int64Array::from(vec![Some(1), None])),
                Arc::new(Int64Array::from(vec![2, 4])),
            ],
        );
        let err = validate_batch(&contract(), &batch).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaViolation);
    }

    #[test]
    fn test_contract_arrow_schema_mapping() {
        let contract = SchemaContract::new(vec![
            ColumnSpec::new("s", LogicalType::String, true),
            ColumnSpec::new("t", LogicalType::TimestampMicros, false),
            ColumnSpec::new("raw", LogicalType::Binary, true),
        ]);
        let schema = contract_arrow_schema(&contract);
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(
            schema.field(1).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        assert_eq!(schema.field(2).data_type(), &DataType::Binary);
        assert!(schema.field(0).is_nullable());
        assert!(!schema.field(1).is_nullable());
    }
}
