//! Catalog behavior tests: upsert idempotency, at-most-once jobs, atomic
//! claiming, orphan sweep, retry ceiling.

use casparian_catalog::{CancelOutcome, Catalog, EventType, RetryDecision};
use casparian_protocol::schema::{ColumnSpec, LogicalType, SchemaContract};
use casparian_protocol::sink::SinkSpec;
use casparian_protocol::types::{ErrorKind, FileStatus, JobOutcome, JobState, UpsertOutcome};

const FP_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const FP_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn csv_contract() -> SchemaContract {
    SchemaContract::new(vec![
        ColumnSpec::new("a", LogicalType::Int64, false),
        ColumnSpec::new("b", LogicalType::Int64, false),
    ])
}

fn parquet_sink() -> SinkSpec {
    SinkSpec::Parquet {
        path_template: "/out/{job_id}.parquet".to_string(),
    }
}

async fn seed_binding(catalog: &Catalog, name: &str, source: &str) -> i64 {
    let (id, _) = catalog
        .register_binding(
            name,
            source,
            &[],
            &["csv_tag".to_string()],
            &csv_contract(),
            &parquet_sink(),
        )
        .await
        .unwrap();
    id
}

async fn seed_tagged_file(catalog: &Catalog, rel_path: &str, fingerprint: &str) -> i64 {
    catalog
        .add_rule("*.csv", "csv_tag", 10, None)
        .await
        .unwrap();
    let (file_id, outcome) = catalog
        .upsert_file("/in", rel_path, &format!("/in/{rel_path}"), 14, fingerprint)
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Inserted);
    catalog.apply_rules(file_id).await.unwrap().unwrap();
    file_id
}

#[tokio::test]
async fn test_upsert_rescan_is_noop() {
    let catalog = Catalog::open_in_memory().await.unwrap();

    let (id1, outcome) = catalog
        .upsert_file("/in", "a.csv", "/in/a.csv", 14, FP_A)
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Inserted);

    // Byte-identical rescan: no transitions, same row.
    let (id2, outcome) = catalog
        .upsert_file("/in", "a.csv", "/in/a.csv", 14, FP_A)
        .await
        .unwrap();
    assert_eq!(id1, id2);
    assert_eq!(outcome, UpsertOutcome::Unchanged);

    let file = catalog.get_file(id1).await.unwrap();
    assert_eq!(file.status, FileStatus::Discovered);
}

#[tokio::test]
async fn test_upsert_content_change_resets_and_keeps_manual_tag() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    let (file_id, _) = catalog
        .upsert_file("/in", "a.csv", "/in/a.csv", 14, FP_A)
        .await
        .unwrap();
    catalog.set_manual_tag(file_id, "special").await.unwrap();

    let (_, outcome) = catalog
        .upsert_file("/in", "a.csv", "/in/a.csv", 20, FP_B)
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Updated);

    let file = catalog.get_file(file_id).await.unwrap();
    assert_eq!(file.status, FileStatus::Discovered);
    assert_eq!(file.fingerprint, FP_B);
    // Manual tags survive content changes.
    assert_eq!(file.tag.as_deref(), Some("special"));
}

#[tokio::test]
async fn test_rule_priority_and_manual_protection() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    catalog.add_rule("*.csv", "low", 1, None).await.unwrap();
    catalog.add_rule("*.csv", "high", 10, None).await.unwrap();

    let (file_id, _) = catalog
        .upsert_file("/in", "x.csv", "/in/x.csv", 1, FP_A)
        .await
        .unwrap();
    let applied = catalog.apply_rules(file_id).await.unwrap().unwrap();
    assert_eq!(applied.tag, "high");

    // Manual tag wins and is never overwritten by rules.
    catalog.set_manual_tag(file_id, "mine").await.unwrap();
    assert!(catalog.apply_rules(file_id).await.unwrap().is_none());
    let file = catalog.get_file(file_id).await.unwrap();
    assert_eq!(file.tag.as_deref(), Some("mine"));
}

#[tokio::test]
async fn test_at_most_one_nonterminal_job_per_pair() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    seed_binding(&catalog, "p_csv", "src-1").await;
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;

    let created = catalog.create_jobs_for_file(file_id).await.unwrap();
    assert_eq!(created.len(), 1);

    // Matching again creates nothing new.
    let created = catalog.create_jobs_for_file(file_id).await.unwrap();
    assert!(created.is_empty());
    let created = catalog.match_tagged_files().await.unwrap();
    assert!(created.is_empty());
}

#[tokio::test]
async fn test_terminal_jobs_are_not_resurrected() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    seed_binding(&catalog, "p_csv", "src-1").await;
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;
    let created = catalog.create_jobs_for_file(file_id).await.unwrap();
    let job_id = created[0];

    let claimed = catalog.claim_next_job("w1").await.unwrap().unwrap();
    assert_eq!(claimed.job_id, job_id);
    catalog
        .conclude_job(
            job_id,
            JobOutcome::Failed,
            Some(ErrorKind::ParserError),
            Some("boom"),
            None,
            None,
        )
        .await
        .unwrap();

    // A backlog scan must not recreate a job for terminally failed work.
    let created = catalog.create_jobs_for_file(file_id).await.unwrap();
    assert!(created.is_empty());

    let file = catalog.get_file(file_id).await.unwrap();
    assert_eq!(file.status, FileStatus::Failed);
}

#[tokio::test]
async fn test_claim_skips_running_fingerprint() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    let b1 = seed_binding(&catalog, "p_one", "src-1").await;
    let b2 = seed_binding(&catalog, "p_two", "src-2").await;
    assert_ne!(b1, b2);
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;

    let created = catalog.create_jobs_for_file(file_id).await.unwrap();
    assert_eq!(created.len(), 2);

    // First claim wins one of the two jobs.
    let first = catalog.claim_next_job("w1").await.unwrap().unwrap();
    // Second claim sees the same fingerprint running and gets nothing.
    assert!(catalog.claim_next_job("w2").await.unwrap().is_none());

    catalog
        .conclude_job(
            first.job_id,
            JobOutcome::Succeeded,
            None,
            None,
            Some("/out/1.parquet"),
            Some(0),
        )
        .await
        .unwrap();

    // Now the second binding's job is claimable.
    let second = catalog.claim_next_job("w2").await.unwrap().unwrap();
    assert_ne!(second.job_id, first.job_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_claimers_exactly_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("catalog.db").display());
    let catalog = Catalog::open(&url).await.unwrap();
    seed_binding(&catalog, "p_csv", "src-1").await;
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;
    catalog.create_jobs_for_file(file_id).await.unwrap();

    let c1 = catalog.clone();
    let c2 = catalog.clone();
    let (r1, r2) = tokio::join!(c1.claim_next_job("w1"), c2.claim_next_job("w2"));
    let wins = [r1.unwrap(), r2.unwrap()]
        .into_iter()
        .flatten()
        .count();
    assert_eq!(wins, 1, "exactly one claimer must win");
}

#[tokio::test]
async fn test_conclude_success_and_idempotency() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    seed_binding(&catalog, "p_csv", "src-1").await;
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;
    let job_id = catalog.create_jobs_for_file(file_id).await.unwrap()[0];
    catalog.claim_next_job("w1").await.unwrap().unwrap();

    let applied = catalog
        .conclude_job(
            job_id,
            JobOutcome::Succeeded,
            None,
            None,
            Some("/out/1.parquet"),
            Some(2),
        )
        .await
        .unwrap();
    assert!(applied);

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Succeeded);
    assert_eq!(job.row_count, Some(2));

    let file = catalog.get_file(file_id).await.unwrap();
    assert_eq!(file.status, FileStatus::Done);

    // Second conclude on a terminal job is a no-op.
    let applied = catalog
        .conclude_job(job_id, JobOutcome::Failed, Some(ErrorKind::IoRead), None, None, None)
        .await
        .unwrap();
    assert!(!applied);
    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Succeeded);

    let events = catalog.events_for_job(job_id).await.unwrap();
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert!(kinds.contains(&EventType::JobQueued));
    assert!(kinds.contains(&EventType::JobSucceeded));
}

#[tokio::test]
async fn test_retry_ceiling_exhaustion() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    seed_binding(&catalog, "p_csv", "src-1").await;
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;
    let job_id = catalog.create_jobs_for_file(file_id).await.unwrap()[0];

    for attempt in 1..=2 {
        catalog.claim_next_job("w1").await.unwrap().unwrap();
        let decision = catalog
            .retry_or_fail(job_id, ErrorKind::GuestCrashed, "crash", 2)
            .await
            .unwrap();
        assert_eq!(decision, RetryDecision::Requeued(attempt));
    }

    catalog.claim_next_job("w1").await.unwrap().unwrap();
    let decision = catalog
        .retry_or_fail(job_id, ErrorKind::GuestCrashed, "crash", 2)
        .await
        .unwrap();
    assert_eq!(decision, RetryDecision::Exhausted);

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error_kind.as_deref(), Some("exceeded_retries"));
}

#[tokio::test]
async fn test_sweep_stale_requeues_and_is_idempotent() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    seed_binding(&catalog, "p_csv", "src-1").await;
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;
    let job_id = catalog.create_jobs_for_file(file_id).await.unwrap()[0];

    let now = casparian_catalog::now_millis();
    catalog.record_heartbeat("w1", now, &[]).await.unwrap();
    catalog.claim_next_job("w1").await.unwrap().unwrap();

    // Heartbeat is fresh: nothing to sweep.
    let report = catalog.sweep_stale(now, 15_000, 3).await.unwrap();
    assert!(report.is_empty());

    // Heartbeat ages out: the job is returned to the queue.
    let later = now + 60_000;
    let report = catalog.sweep_stale(later, 15_000, 3).await.unwrap();
    assert_eq!(report.requeued, vec![job_id]);

    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Queued);
    assert_eq!(job.retry_count, 1);
    assert!(job.worker_id.is_none());

    let orphan_events = catalog
        .list_events_of_type(EventType::JobOrphaned)
        .await
        .unwrap();
    assert_eq!(orphan_events.len(), 1);

    // Sweeping again touches nothing: the job is queued, not running.
    let report = catalog.sweep_stale(later, 15_000, 3).await.unwrap();
    assert!(report.is_empty());

    // Terminal jobs are never swept.
    catalog.claim_next_job("w2").await.unwrap().unwrap();
    catalog
        .conclude_job(job_id, JobOutcome::Succeeded, None, None, Some("/out/x"), Some(1))
        .await
        .unwrap();
    let report = catalog.sweep_stale(later + 60_000, 15_000, 3).await.unwrap();
    assert!(report.is_empty());
    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Succeeded);
}

#[tokio::test]
async fn test_cancel_outcomes() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    seed_binding(&catalog, "p_csv", "src-1").await;
    let file_id = seed_tagged_file(&catalog, "a.csv", FP_A).await;
    let job_id = catalog.create_jobs_for_file(file_id).await.unwrap()[0];

    assert_eq!(
        catalog.cancel_job(9999).await.unwrap(),
        CancelOutcome::NotFound
    );

    // Queued: cancels terminally.
    assert_eq!(
        catalog.cancel_job(job_id).await.unwrap(),
        CancelOutcome::CancelledQueued
    );
    let job = catalog.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Cancelled);
    assert_eq!(job.retry_count, 0);

    assert_eq!(
        catalog.cancel_job(job_id).await.unwrap(),
        CancelOutcome::AlreadyTerminal
    );

    // Running: reports the owning worker.
    seed_binding(&catalog, "p_two", "src-2").await;
    let (f2, _) = catalog
        .upsert_file("/in", "b.csv", "/in/b.csv", 3, FP_B)
        .await
        .unwrap();
    catalog.apply_rules(f2).await.unwrap().unwrap();
    let j2 = catalog.create_jobs_for_file(f2).await.unwrap()[0];
    catalog.claim_next_job("w7").await.unwrap().unwrap();
    assert_eq!(
        catalog.cancel_job(j2).await.unwrap(),
        CancelOutcome::RunningOn("w7".to_string())
    );
}

#[tokio::test]
async fn test_deploy_same_source_is_noop() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    let (id1, created1) = catalog
        .register_binding("p", "src", &[], &["t".into()], &csv_contract(), &parquet_sink())
        .await
        .unwrap();
    assert!(created1);
    let (id2, created2) = catalog
        .register_binding("p", "src", &[], &["t".into()], &csv_contract(), &parquet_sink())
        .await
        .unwrap();
    assert_eq!(id1, id2);
    assert!(!created2);

    // Same name, different source: a separate binding.
    let (id3, created3) = catalog
        .register_binding("p", "src-v2", &[], &["t".into()], &csv_contract(), &parquet_sink())
        .await
        .unwrap();
    assert!(created3);
    assert_ne!(id1, id3);
}

#[tokio::test]
async fn test_contract_with_reserved_column_rejected() {
    let catalog = Catalog::open_in_memory().await.unwrap();
    let bad = SchemaContract::new(vec![ColumnSpec::new(
        "_cf_source_hash",
        LogicalType::String,
        false,
    )]);
    let result = catalog
        .register_binding("p", "src", &[], &["t".into()], &bad, &parquet_sink())
        .await;
    assert!(result.is_err());
}
