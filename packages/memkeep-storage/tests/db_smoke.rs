use serde_json::{Map, json};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use memkeep_config::Postgres;
use memkeep_domain::{ManagedTable, OperationStatus, OperationType, PolicyKey};
use memkeep_storage::{
	db::Db,
	models::{LogFinish, LogQuery, PipelineTag, RecordOperation},
	queries,
	store::{MaintenanceLogger, RecordStore, RunLockKey, SoftDeleteScope},
};
use memkeep_testkit::TestDatabase;

async fn bootstrap(test_db: &TestDatabase) -> Db {
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	db
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MEMKEEP_PG_DSN to run."]
async fn schema_bootstrap_is_idempotent_and_seeds_defaults() {
	let Some(base_dsn) = memkeep_testkit::env_dsn() else {
		eprintln!(
			"Skipping schema_bootstrap_is_idempotent_and_seeds_defaults; set MEMKEEP_PG_DSN."
		);

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;

	db.upsert_config("ttl_cleanup_days", "30", None, Some("operator"))
		.await
		.expect("Failed to set config.");
	db.ensure_schema().await.expect("Second bootstrap failed.");

	let config = db.load_config().await.expect("Failed to load config.");

	assert_eq!(config.len(), PolicyKey::ALL.len());
	assert!(config.iter().any(|entry| entry.key == "ttl_cleanup_days" && entry.value == "30"));

	for table in ManagedTable::ALL {
		let count: i64 = sqlx::query_scalar(
			"SELECT count(*) FROM information_schema.views WHERE table_name = $1",
		)
		.bind(table.active_view())
		.fetch_one(&db.pool)
		.await
		.expect("Failed to query views.");

		assert_eq!(count, 1, "Missing view for {table}.");
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MEMKEEP_PG_DSN to run."]
async fn soft_delete_hides_rows_from_active_view() {
	let Some(base_dsn) = memkeep_testkit::env_dsn() else {
		eprintln!("Skipping soft_delete_hides_rows_from_active_view; set MEMKEEP_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let table = ManagedTable::UserSessions;
	let now = OffsetDateTime::now_utc();

	for days in [120, 100, 10] {
		queries::insert_record(&db.pool, table, "alice", now - Duration::days(days))
			.await
			.expect("Failed to insert record.");
	}

	let scope = SoftDeleteScope::CreatedBefore(now - Duration::days(90));
	let candidates =
		db.count_soft_delete_candidates(table, &scope).await.expect("Failed to count.");
	let first = db.soft_delete_batch(table, &scope, 1, now).await.expect("Batch failed.");
	let second = db.soft_delete_batch(table, &scope, 10, now).await.expect("Batch failed.");
	let third = db.soft_delete_batch(table, &scope, 10, now).await.expect("Batch failed.");
	let active = db.active_records(table, Some("alice")).await.expect("Failed to read.");

	assert_eq!(candidates, 2);
	assert_eq!((first, second, third), (1, 1, 0));
	assert_eq!(active.len(), 1);
	assert!(active[0].deleted_at.is_none());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MEMKEEP_PG_DSN to run."]
async fn terminal_log_entries_are_immutable() {
	let Some(base_dsn) = memkeep_testkit::env_dsn() else {
		eprintln!("Skipping terminal_log_entries_are_immutable; set MEMKEEP_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let mut op = RecordOperation::running(OperationType::TtlCleanup, PipelineTag::default());

	op.table_name = Some("user_sessions".to_string());

	let log_id = db.record(&op).await.expect("Failed to record.");
	let finish = LogFinish {
		status: OperationStatus::Completed,
		records_affected: 7,
		error_message: None,
		parameters: Map::from_iter([("batches".to_string(), json!(1))]),
		completed_at: OffsetDateTime::now_utc(),
		duration_ms: 12,
	};

	assert!(db.finish(log_id, &finish).await.expect("Failed to finish."));
	assert!(!db.finish(log_id, &finish).await.expect("Failed to finish."));

	let tampered = sqlx::query("UPDATE memory_maintenance_log SET records_affected = 0")
		.execute(&db.pool)
		.await;
	let deleted = sqlx::query("DELETE FROM memory_maintenance_log").execute(&db.pool).await;

	assert!(tampered.is_err());
	assert!(deleted.is_err());

	let entry = db.get(log_id).await.expect("Failed to get.").expect("Missing entry.");

	assert_eq!(entry.records_affected, 7);
	assert_eq!(entry.parameters["batches"], json!(1));
	assert!(entry.completed_at.is_some_and(|at| at >= entry.started_at));

	let entries = db
		.query(&LogQuery {
			operation_type: Some(OperationType::TtlCleanup),
			..LogQuery::default()
		})
		.await
		.expect("Failed to query.");

	assert_eq!(entries.len(), 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MEMKEEP_PG_DSN to run."]
async fn failed_entry_without_message_is_rejected() {
	let Some(base_dsn) = memkeep_testkit::env_dsn() else {
		eprintln!("Skipping failed_entry_without_message_is_rejected; set MEMKEEP_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let mut op = RecordOperation::running(OperationType::ForgetUser, PipelineTag::default());

	op.status = OperationStatus::Failed;

	assert!(db.record(&op).await.is_err());

	let direct = sqlx::query(
		"SELECT record_maintenance_operation('forget_user', NULL, 'u1', 0, '{}'::jsonb, 'failed', \
		 NULL, NULL, NULL)",
	)
	.execute(&db.pool)
	.await;

	assert!(direct.is_err());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MEMKEEP_PG_DSN to run."]
async fn run_lock_lease_blocks_second_holder() {
	let Some(base_dsn) = memkeep_testkit::env_dsn() else {
		eprintln!("Skipping run_lock_lease_blocks_second_holder; set MEMKEEP_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let key = RunLockKey::table(OperationType::TtlCleanup, ManagedTable::UserMemory);
	let now = OffsetDateTime::now_utc();
	let lease = Duration::minutes(10);
	let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

	assert!(db.try_acquire_run_lock(&key, first, lease, now).await.expect("Lock failed."));
	assert!(!db.try_acquire_run_lock(&key, second, lease, now).await.expect("Lock failed."));

	db.release_run_lock(&key, first).await.expect("Release failed.");

	assert!(db.try_acquire_run_lock(&key, second, lease, now).await.expect("Lock failed."));

	let table = ManagedTable::UserMemory;
	let alice = RunLockKey::user(OperationType::ForgetUser, table, "alice");
	let bob = RunLockKey::user(OperationType::ForgetUser, table, "bob");

	assert!(db.try_acquire_run_lock(&alice, first, lease, now).await.expect("Lock failed."));
	assert!(db.try_acquire_run_lock(&bob, second, lease, now).await.expect("Lock failed."));

	let renewed_at = now + Duration::minutes(1);

	assert!(db.try_acquire_run_lock(&alice, first, lease, renewed_at).await.expect("Lock failed."));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
