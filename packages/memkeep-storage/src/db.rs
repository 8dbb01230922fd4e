use sqlx::{PgPool, postgres::PgPoolOptions};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	BoxFuture, Result, locks, log,
	models::{ConfigEntry, LogFinish, LogQuery, MaintenanceLogEntry, Record, RecordOperation},
	queries, schema,
	store::{MaintenanceLogger, PurgeScope, RecordStore, RunLockKey, SoftDeleteScope},
};
use memkeep_domain::ManagedTable;

const SCHEMA_LOCK_ID: i64 = 7_120_301;

#[derive(Clone)]
pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &memkeep_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	/// Idempotent bootstrap of the managed tables, support tables, views and functions.
	pub async fn ensure_schema(&self) -> Result<()> {
		let sql = schema::render_schema();
		// Advisory locks are held per connection. Use a single transaction so the lock is scoped to
		// one connection and automatically released when the transaction ends.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(SCHEMA_LOCK_ID)
			.execute(&mut *tx)
			.await?;
		sqlx::raw_sql(&sql).execute(&mut *tx).await?;

		queries::seed_config_defaults(&mut *tx).await?;

		tx.commit().await?;

		tracing::info!(tables = ManagedTable::ALL.len(), "Maintenance schema is up to date.");

		Ok(())
	}
}
impl RecordStore for Db {
	fn load_config(&self) -> BoxFuture<'_, Result<Vec<ConfigEntry>>> {
		Box::pin(queries::load_config(&self.pool))
	}

	fn upsert_config<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		description: Option<&'a str>,
		updated_by: Option<&'a str>,
	) -> BoxFuture<'a, Result<ConfigEntry>> {
		Box::pin(queries::upsert_config(&self.pool, key, value, description, updated_by))
	}

	fn count_soft_delete_candidates<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a SoftDeleteScope,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(queries::count_soft_delete_candidates(&self.pool, table, scope))
	}

	fn soft_delete_batch<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a SoftDeleteScope,
		limit: u32,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(queries::soft_delete_batch(self, table, scope, limit, now))
	}

	fn count_purge_candidates<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a PurgeScope,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(queries::count_purge_candidates(&self.pool, table, scope))
	}

	fn purge_batch<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a PurgeScope,
		limit: u32,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(queries::purge_batch(self, table, scope, limit))
	}

	fn active_records<'a>(
		&'a self,
		table: ManagedTable,
		user_id: Option<&'a str>,
	) -> BoxFuture<'a, Result<Vec<Record>>> {
		Box::pin(queries::active_records(&self.pool, table, user_id))
	}

	fn try_acquire_run_lock<'a>(
		&'a self,
		key: &'a RunLockKey,
		holder: Uuid,
		lease: Duration,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(locks::try_acquire(&self.pool, key, holder, lease, now))
	}

	fn release_run_lock<'a>(
		&'a self,
		key: &'a RunLockKey,
		holder: Uuid,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(locks::release(&self.pool, key, holder))
	}

	fn ping(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;

			if one == 1 {
				Ok(())
			} else {
				Err(crate::Error::Unavailable(format!("Health check query returned {one}.")))
			}
		})
	}
}
impl MaintenanceLogger for Db {
	fn record<'a>(&'a self, op: &'a RecordOperation) -> BoxFuture<'a, Result<Uuid>> {
		Box::pin(log::record(&self.pool, op))
	}

	fn finish<'a>(&'a self, log_id: Uuid, finish: &'a LogFinish) -> BoxFuture<'a, Result<bool>> {
		Box::pin(log::finish(&self.pool, log_id, finish))
	}

	fn get(&self, log_id: Uuid) -> BoxFuture<'_, Result<Option<MaintenanceLogEntry>>> {
		Box::pin(log::get(&self.pool, log_id))
	}

	fn query<'a>(
		&'a self,
		query: &'a LogQuery,
	) -> BoxFuture<'a, Result<Vec<MaintenanceLogEntry>>> {
		Box::pin(log::query(&self.pool, query))
	}
}
