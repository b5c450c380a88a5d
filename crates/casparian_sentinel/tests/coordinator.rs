//! Coordinator policy tests against an in-memory catalog (no sockets).

use casparian_catalog::Catalog;
use casparian_protocol::schema::{ColumnSpec, LogicalType, SchemaContract};
use casparian_protocol::sink::SinkSpec;
use casparian_protocol::types::{ConcludePayload, ErrorKind, JobOutcome, JobState};
use casparian_sentinel::{apply_conclude, dispatch_command_for};

const FP: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

async fn seeded_catalog() -> (Catalog, i64) {
    let catalog = Catalog::open_in_memory().await.unwrap();
    catalog
        .register_binding(
            "p_csv",
            "def parse(path, config):\n    return []\n",
            &["pyarrow".to_string()],
            &["csv_tag".to_string()],
            &SchemaContract::new(vec![
                ColumnSpec::new("a", LogicalType::Int64, false),
                ColumnSpec::new("b", LogicalType::Int64, false),
            ]),
            &SinkSpec::Parquet {
                path_template: "/out/{job_id}.parquet".to_string(),
            },
        )
        .await
        .unwrap();
    catalog.add_rule("*.csv", "csv_tag", 10, None).await.unwrap();
    let (file_id, _) = catalog
        .upsert_file("/in", "a.csv", "/in/a.csv", 12, FP)
        .await
        .unwrap();
    catalog.apply_rules(file_id).await.unwrap().unwrap();
    let jobs = catalog.match_tagged_files().await.unwrap();
    (catalog, jobs[0])
}

#[tokio::test]
async fn test_dispatch_command_carries_binding() {
    let (catalog, job_id) = seeded_catalog().await;
    let claimed = catalog.claim_next_job("w1").await.unwrap().unwrap();
    assert_eq!(claimed.job_id, job_id);

    let cmd = dispatch_command_for(&claimed);
    assert_eq!(cmd.parser_name, "p_csv");
    assert_eq!(cmd.file_fingerprint, FP);
    assert_eq!(cmd.tag, "csv_tag");
    assert_eq!(cmd.input_path, "/in/a.csv");
    assert_eq!(cmd.dependency_set, vec!["pyarrow".to_string()]);
    assert_eq!(cmd.parser_version.len(), 12);
    assert!(cmd.parser_source.contains("def parse"));
    assert_eq!(cmd.schema_contract.columns.len(), 2);
}

#[tokio::test]
async fn test_conclude_success_marks_job() {
    let (catalog, job_id) = seeded_catalog().await;
    catalog.claim_next_job("w1").await.unwrap().unwrap();

    let payload = ConcludePayload::succeeded("/out/1.parquet".to_string(), 2);
    apply_conclude(&catalog, job_id, &payload, 3).await.unwrap();

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Succeeded);
    assert_eq!(job.output_path.as_deref(), Some("/out/1.parquet"));
    assert_eq!(job.row_count, Some(2));
}

#[tokio::test]
async fn test_retriable_failure_requeues_then_exhausts() {
    let (catalog, job_id) = seeded_catalog().await;

    for _ in 0..2 {
        catalog.claim_next_job("w1").await.unwrap().unwrap();
        let payload = ConcludePayload::failed(ErrorKind::GuestCrashed, "boom");
        apply_conclude(&catalog, job_id, &payload, 2).await.unwrap();
        let job = catalog.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobState::Queued);
    }

    catalog.claim_next_job("w1").await.unwrap().unwrap();
    let payload = ConcludePayload::failed(ErrorKind::GuestCrashed, "boom");
    apply_conclude(&catalog, job_id, &payload, 2).await.unwrap();

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error_kind.as_deref(), Some("exceeded_retries"));
}

#[tokio::test]
async fn test_nonretriable_failure_is_terminal_immediately() {
    let (catalog, job_id) = seeded_catalog().await;
    catalog.claim_next_job("w1").await.unwrap().unwrap();

    let payload = ConcludePayload::failed(ErrorKind::LineageCollision, "reserved column _cf_job_id");
    apply_conclude(&catalog, job_id, &payload, 3).await.unwrap();

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error_kind.as_deref(), Some("lineage_collision"));
    assert_eq!(job.retry_count, 0);

    // Nothing left to claim: non-retriable failures never loop.
    assert!(catalog.claim_next_job("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_conclude_preserves_retry_count() {
    let (catalog, job_id) = seeded_catalog().await;
    catalog.claim_next_job("w1").await.unwrap().unwrap();

    apply_conclude(&catalog, job_id, &ConcludePayload::cancelled(), 3)
        .await
        .unwrap();

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Cancelled);
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn test_failure_without_kind_is_treated_as_crash() {
    let (catalog, job_id) = seeded_catalog().await;
    catalog.claim_next_job("w1").await.unwrap().unwrap();

    let payload = ConcludePayload {
        outcome: JobOutcome::Failed,
        error_kind: None,
        message: Some("worker died mid-flight".to_string()),
        output_path: None,
        row_count: None,
    };
    apply_conclude(&catalog, job_id, &payload, 3).await.unwrap();

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    // Conservative default: retriable, so the job is queued again.
    assert_eq!(job.status, JobState::Queued);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test]
async fn test_deferred_job_keeps_retry_count() {
    let (catalog, job_id) = seeded_catalog().await;
    catalog.claim_next_job("w1").await.unwrap().unwrap();

    catalog.defer_job(job_id).await.unwrap();

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Queued);
    assert_eq!(job.retry_count, 0);
    assert!(job.worker_id.is_none());
}
