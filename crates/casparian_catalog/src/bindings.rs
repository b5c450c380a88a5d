//! Parser bindings: content-addressed, immutable per (name, source_hash).

use crate::error::Result;
use crate::models::ParserBinding;
use crate::{Catalog, CatalogError};
use casparian_protocol::schema::SchemaContract;
use casparian_protocol::sink::SinkSpec;
use casparian_protocol::types::parser_version_from_hash;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn map_binding_row(row: &SqliteRow) -> Result<ParserBinding> {
    let dependency_set: String = row.try_get("dependency_set")?;
    let schema_contract: String = row.try_get("schema_contract")?;
    let sink_spec: String = row.try_get("sink_spec")?;
    Ok(ParserBinding {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source_hash: row.try_get("source_hash")?,
        parser_version: row.try_get("parser_version")?,
        source_code: row.try_get("source_code")?,
        dependency_set: serde_json::from_str(&dependency_set)?,
        schema_contract: serde_json::from_str(&schema_contract)?,
        sink_spec: serde_json::from_str(&sink_spec)?,
    })
}

impl Catalog {
    /// Register a parser binding and its tag subscriptions.
    ///
    /// The `(name, source_hash)` tuple is immutable; re-registering it is a
    /// no-op that returns the existing row (`created = false`). Publishing
    /// changed source inserts a new binding - old ones never auto-retire.
    pub async fn register_binding(
        &self,
        name: &str,
        source_code: &str,
        dependency_set: &[String],
        subscribed_tags: &[String],
        schema_contract: &SchemaContract,
        sink_spec: &SinkSpec,
    ) -> Result<(i64, bool)> {
        schema_contract.validate()?;

        let source_hash = blake3::hash(source_code.as_bytes()).to_hex().to_string();
        let parser_version = parser_version_from_hash(&source_hash);

        let mut tx = self.pool().begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM cf_parser_bindings WHERE name = ? AND source_hash = ?")
                .bind(name)
                .bind(&source_hash)
                .fetch_optional(&mut *tx)
                .await?;

        let (binding_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO cf_parser_bindings
                        (name, source_hash, parser_version, source_code,
                         dependency_set, schema_contract, sink_spec, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(name)
                .bind(&source_hash)
                .bind(&parser_version)
                .bind(source_code)
                .bind(serde_json::to_string(dependency_set)?)
                .bind(serde_json::to_string(schema_contract)?)
                .bind(serde_json::to_string(sink_spec)?)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
                (result.last_insert_rowid(), true)
            }
        };

        for tag in subscribed_tags {
            sqlx::query(
                "INSERT OR IGNORE INTO cf_subscriptions (tag, parser_binding_id) VALUES (?, ?)",
            )
            .bind(tag)
            .bind(binding_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((binding_id, created))
    }

    pub async fn get_binding(&self, binding_id: i64) -> Result<ParserBinding> {
        let row = sqlx::query("SELECT * FROM cf_parser_bindings WHERE id = ?")
            .bind(binding_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CatalogError::BindingNotFound(binding_id))?;
        map_binding_row(&row)
    }

    /// Bindings subscribed to a tag, oldest first.
    pub async fn bindings_for_tag(&self, tag: &str) -> Result<Vec<ParserBinding>> {
        let rows = sqlx::query(
            r#"
            SELECT b.* FROM cf_parser_bindings b
            JOIN cf_subscriptions s ON s.parser_binding_id = b.id
            WHERE s.tag = ?
            ORDER BY b.id ASC
            "#,
        )
        .bind(tag)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_binding_row).collect()
    }
}
