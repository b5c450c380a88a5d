//! Tagging rules: storage and first-match-wins evaluation.

use crate::error::Result;
use crate::models::{RuleApplication, TaggingRule};
use crate::{Catalog, CatalogError};
use casparian_protocol::types::TagSource;
use globset::{Glob, GlobMatcher};
use sqlx::Row;

struct CompiledRule {
    rule: TaggingRule,
    matcher: GlobMatcher,
}

fn compile_rules(rules: &[TaggingRule]) -> Result<Vec<CompiledRule>> {
    let mut compiled = Vec::with_capacity(rules.len());
    for rule in rules {
        let matcher = Glob::new(&rule.pattern)
            .map_err(|e| CatalogError::Pattern {
                pattern: rule.pattern.clone(),
                message: e.to_string(),
            })?
            .compile_matcher();
        compiled.push(CompiledRule {
            rule: rule.clone(),
            matcher,
        });
    }
    Ok(compiled)
}

impl Catalog {
    pub async fn add_rule(
        &self,
        pattern: &str,
        tag: &str,
        priority: i32,
        description: Option<&str>,
    ) -> Result<i64> {
        // Reject bad globs at insert time, not scan time.
        Glob::new(pattern).map_err(|e| CatalogError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let result = sqlx::query(
            "INSERT INTO cf_tagging_rules (pattern, tag, priority, enabled, description) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(pattern)
        .bind(tag)
        .bind(priority)
        .bind(description)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_rule_enabled(&self, rule_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE cf_tagging_rules SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(rule_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Enabled rules in application order: priority descending, id ascending.
    pub async fn enabled_rules(&self) -> Result<Vec<TaggingRule>> {
        let rows = sqlx::query(
            "SELECT * FROM cf_tagging_rules WHERE enabled = 1 ORDER BY priority DESC, id ASC",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TaggingRule {
                    id: row.try_get("id")?,
                    pattern: row.try_get("pattern")?,
                    tag: row.try_get("tag")?,
                    priority: row.try_get("priority")?,
                    enabled: row.try_get::<i64, _>("enabled")? != 0,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    /// Evaluate enabled rules against a file's rel_path. First match wins.
    ///
    /// Never overwrites a manual tag. On a match the file moves to `tagged`
    /// with `tag_source = rule`; `changed` reports whether the tag differs
    /// from what was there before.
    pub async fn apply_rules(&self, file_id: i64) -> Result<Option<RuleApplication>> {
        let file = self.get_file(file_id).await?;
        if file.tag_source == TagSource::Manual {
            return Ok(None);
        }

        let rules = self.enabled_rules().await?;
        let compiled = compile_rules(&rules)?;

        let hit = compiled
            .iter()
            .find(|candidate| candidate.matcher.is_match(&file.rel_path));

        let Some(hit) = hit else {
            return Ok(None);
        };

        let changed = file.tag.as_deref() != Some(hit.rule.tag.as_str());
        sqlx::query(
            r#"
            UPDATE cf_files
            SET tag = ?, tag_source = 'rule', rule_id = ?, status = 'tagged', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&hit.rule.tag)
        .bind(hit.rule.id)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(file_id)
        .execute(self.pool())
        .await?;

        Ok(Some(RuleApplication {
            tag: hit.rule.tag.clone(),
            rule_id: hit.rule.id,
            changed,
        }))
    }
}
