//! Schema contracts: the typed column list a parser binding promises.
//!
//! The reserved lineage columns are a system invariant - a parser emitting
//! any of them fails its job with `lineage_collision`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Columns the worker appends to every output row. Parsers must not emit them.
pub const RESERVED_LINEAGE_COLUMNS: [&str; 4] = [
    "_cf_source_hash",
    "_cf_job_id",
    "_cf_parser_version",
    "_cf_processed_at",
];

/// Whether a column name is reserved for lineage stamping.
pub fn is_reserved_column(name: &str) -> bool {
    RESERVED_LINEAGE_COLUMNS.contains(&name)
}

/// Logical column types a contract may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    String,
    Int64,
    Float64,
    Bool,
    TimestampMicros,
    Binary,
}

impl LogicalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalType::String => "string",
            LogicalType::Int64 => "int64",
            LogicalType::Float64 => "float64",
            LogicalType::Bool => "bool",
            LogicalType::TimestampMicros => "timestamp_micros",
            LogicalType::Binary => "binary",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogicalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(LogicalType::String),
            "int64" => Ok(LogicalType::Int64),
            "float64" => Ok(LogicalType::Float64),
            "bool" | "boolean" => Ok(LogicalType::Bool),
            "timestamp_micros" => Ok(LogicalType::TimestampMicros),
            "binary" => Ok(LogicalType::Binary),
            _ => Err(format!("Invalid logical type: '{}'", s)),
        }
    }
}

/// One declared output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable,
            description: None,
        }
    }
}

/// Ordered list of columns a binding promises to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaContractError {
    #[error("column name '{0}' is reserved for lineage stamping")]
    ReservedName(String),
    #[error("duplicate column name '{0}'")]
    DuplicateName(String),
    #[error("column name must not be empty")]
    EmptyName,
}

impl SchemaContract {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Reject reserved names, duplicates, and empty names.
    /// Run at binding registration time, not per batch.
    pub fn validate(&self) -> Result<(), SchemaContractError> {
        let mut seen = HashSet::new();
        for col in &self.columns {
            if col.name.is_empty() {
                return Err(SchemaContractError::EmptyName);
            }
            if is_reserved_column(&col.name) {
                return Err(SchemaContractError::ReservedName(col.name.clone()));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaContractError::DuplicateName(col.name.clone()));
            }
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_int_columns() -> SchemaContract {
        SchemaContract::new(vec![
            ColumnSpec::new("a", LogicalType::Int64, false),
            ColumnSpec::new("b", LogicalType::Int64, false),
        ])
    }

    #[test]
    fn test_validate_ok() {
        assert!(two_int_columns().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_reserved() {
        let contract = SchemaContract::new(vec![ColumnSpec::new(
            "_cf_job_id",
            LogicalType::Int64,
            false,
        )]);
        assert_eq!(
            contract.validate(),
            Err(SchemaContractError::ReservedName("_cf_job_id".into()))
        );
    }

    #[test]
    fn test_validate_rejects_duplicate() {
        let contract = SchemaContract::new(vec![
            ColumnSpec::new("a", LogicalType::Int64, false),
            ColumnSpec::new("a", LogicalType::String, true),
        ]);
        assert_eq!(
            contract.validate(),
            Err(SchemaContractError::DuplicateName("a".into()))
        );
    }

    #[test]
    fn test_reserved_names_fixed() {
        for name in RESERVED_LINEAGE_COLUMNS {
            assert!(is_reserved_column(name));
        }
        assert!(!is_reserved_column("cf_job_id"));
    }

    #[test]
    fn test_contract_serde_roundtrip() {
        let contract = two_int_columns();
        let json = serde_json::to_string(&contract).unwrap();
        assert!(json.contains("int64"));
        let parsed: SchemaContract = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, contract);
    }

    #[test]
    fn test_logical_type_spelling() {
        let json = serde_json::to_string(&LogicalType::TimestampMicros).unwrap();
        assert_eq!(json, "\"timestamp_micros\"");
    }
}
