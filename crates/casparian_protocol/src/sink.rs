//! Sink specifications and output path templates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::JobId;

/// Destination for a binding's output rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkSpec {
    Parquet { path_template: String },
    Csv { path_template: String },
    Sqlite { path: String, table: String },
}

impl SinkSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkSpec::Parquet { .. } => "parquet",
            SinkSpec::Csv { .. } => "csv",
            SinkSpec::Sqlite { .. } => "sqlite",
        }
    }
}

impl fmt::Display for SinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkSpec::Parquet { path_template } => write!(f, "parquet://{}", path_template),
            SinkSpec::Csv { path_template } => write!(f, "csv://{}", path_template),
            SinkSpec::Sqlite { path, table } => write!(f, "sqlite://{}?table={}", path, table),
        }
    }
}

/// Values substituted into a sink path template.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub job_id: JobId,
    pub tag: &'a str,
    pub parser: &'a str,
    /// UTC date, `YYYY-MM-DD`.
    pub date: String,
}

impl<'a> TemplateContext<'a> {
    pub fn new(job_id: JobId, tag: &'a str, parser: &'a str) -> Self {
        Self {
            job_id,
            tag,
            parser,
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
        }
    }
}

/// Resolve `{job_id}`, `{tag}`, `{parser}`, `{date}` in a path template.
///
/// Templates must resolve uniquely per job; callers rely on `{job_id}`
/// being present somewhere for exclusive sink files.
pub fn resolve_template(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{job_id}", &ctx.job_id.to_string())
        .replace("{tag}", ctx.tag)
        .replace("{parser}", ctx.parser)
        .replace("{date}", &ctx.date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_template() {
        let ctx = TemplateContext {
            job_id: JobId::new(7),
            tag: "csv_tag",
            parser: "p_csv",
            date: "2026-08-01".to_string(),
        };
        let resolved = resolve_template("/out/{tag}/{parser}/{date}/{job_id}.parquet", &ctx);
        assert_eq!(resolved, "/out/csv_tag/p_csv/2026-08-01/7.parquet");
    }

    #[test]
    fn test_resolve_template_no_placeholders() {
        let ctx = TemplateContext::new(JobId::new(1), "t", "p");
        assert_eq!(resolve_template("/out/fixed.csv", &ctx), "/out/fixed.csv");
    }

    #[test]
    fn test_sink_spec_serde() {
        let spec = SinkSpec::Sqlite {
            path: "/data/out.db".into(),
            table: "events".into(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"kind\":\"sqlite\""));
        let parsed: SinkSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);

        let parquet: SinkSpec =
            serde_json::from_str(r#"{"kind":"parquet","path_template":"/out/{job_id}.parquet"}"#)
                .unwrap();
        assert_eq!(parquet.kind(), "parquet");
    }
}
