use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;

use crate::{
	Result,
	db::Db,
	models::{ConfigEntry, Record},
	store::{PurgeScope, SoftDeleteScope},
};
use memkeep_domain::ManagedTable;

pub async fn load_config(pool: &PgPool) -> Result<Vec<ConfigEntry>> {
	let entries = sqlx::query_as::<_, ConfigEntry>(
		"\
SELECT key, value, description, updated_at, updated_by
FROM memory_maintenance_config
ORDER BY key",
	)
	.fetch_all(pool)
	.await?;

	Ok(entries)
}

pub async fn upsert_config(
	pool: &PgPool,
	key: &str,
	value: &str,
	description: Option<&str>,
	updated_by: Option<&str>,
) -> Result<ConfigEntry> {
	let entry = sqlx::query_as::<_, ConfigEntry>(
		"\
INSERT INTO memory_maintenance_config (key, value, description, updated_at, updated_by)
VALUES ($1, $2, $3, now(), $4)
ON CONFLICT (key) DO UPDATE
SET
	value = EXCLUDED.value,
	description = COALESCE(EXCLUDED.description, memory_maintenance_config.description),
	updated_at = EXCLUDED.updated_at,
	updated_by = EXCLUDED.updated_by
RETURNING key, value, description, updated_at, updated_by",
	)
	.bind(key)
	.bind(value)
	.bind(description)
	.bind(updated_by)
	.fetch_one(pool)
	.await?;

	Ok(entry)
}

/// Inserts a default row for every key that has none yet. Existing operator values are kept.
pub async fn seed_config_defaults(conn: &mut PgConnection) -> Result<()> {
	for key in memkeep_domain::PolicyKey::ALL {
		sqlx::query(
			"\
INSERT INTO memory_maintenance_config (key, value, description, updated_by)
VALUES ($1, $2, $3, 'bootstrap')
ON CONFLICT (key) DO NOTHING",
		)
		.bind(key.as_str())
		.bind(key.default_value())
		.bind(key.description())
		.execute(&mut *conn)
		.await?;
	}

	Ok(())
}

pub async fn count_soft_delete_candidates(
	pool: &PgPool,
	table: ManagedTable,
	scope: &SoftDeleteScope,
) -> Result<u64> {
	let name = table.name();
	let count: i64 = match scope {
		SoftDeleteScope::CreatedBefore(cutoff) => sqlx::query_scalar(&format!(
			"SELECT count(*) FROM {name} WHERE deleted_at IS NULL AND created_at < $1"
		))
		.bind(*cutoff)
		.fetch_one(pool)
		.await?,
		SoftDeleteScope::User(user_id) => sqlx::query_scalar(&format!(
			"SELECT count(*) FROM {name} WHERE deleted_at IS NULL AND user_id = $1"
		))
		.bind(user_id.as_str())
		.fetch_one(pool)
		.await?,
	};

	Ok(count.max(0) as u64)
}

/// One batch, one transaction. The inner select locks its rows and skips rows held by concurrent
/// writers; the outer predicate re-checks `deleted_at` so a row is never marked twice.
pub async fn soft_delete_batch(
	db: &Db,
	table: ManagedTable,
	scope: &SoftDeleteScope,
	limit: u32,
	now: OffsetDateTime,
) -> Result<u64> {
	let name = table.name();
	let mut tx = db.pool.begin().await?;
	let result = match scope {
		SoftDeleteScope::CreatedBefore(cutoff) => sqlx::query(&format!(
			"\
UPDATE {name}
SET deleted_at = GREATEST($1, created_at)
WHERE deleted_at IS NULL
	AND id IN (
		SELECT id
		FROM {name}
		WHERE deleted_at IS NULL AND created_at < $2
		ORDER BY created_at, id
		LIMIT $3
		FOR UPDATE SKIP LOCKED
	)"
		))
		.bind(now)
		.bind(*cutoff)
		.bind(i64::from(limit))
		.execute(&mut *tx)
		.await?,
		SoftDeleteScope::User(user_id) => sqlx::query(&format!(
			"\
UPDATE {name}
SET deleted_at = GREATEST($1, created_at)
WHERE deleted_at IS NULL
	AND user_id = $2
	AND id IN (
		SELECT id
		FROM {name}
		WHERE deleted_at IS NULL AND user_id = $2
		ORDER BY created_at, id
		LIMIT $3
		FOR UPDATE SKIP LOCKED
	)"
		))
		.bind(now)
		.bind(user_id.as_str())
		.bind(i64::from(limit))
		.execute(&mut *tx)
		.await?,
	};

	tx.commit().await?;

	Ok(result.rows_affected())
}

pub async fn count_purge_candidates(
	pool: &PgPool,
	table: ManagedTable,
	scope: &PurgeScope,
) -> Result<u64> {
	let name = table.name();
	let count: i64 = match scope {
		PurgeScope::DeletedBefore(cutoff) => sqlx::query_scalar(&format!(
			"SELECT count(*) FROM {name} WHERE deleted_at IS NOT NULL AND deleted_at < $1"
		))
		.bind(*cutoff)
		.fetch_one(pool)
		.await?,
		PurgeScope::User(user_id) => sqlx::query_scalar(&format!(
			"SELECT count(*) FROM {name} WHERE deleted_at IS NOT NULL AND user_id = $1"
		))
		.bind(user_id.as_str())
		.fetch_one(pool)
		.await?,
	};

	Ok(count.max(0) as u64)
}

pub async fn purge_batch(
	db: &Db,
	table: ManagedTable,
	scope: &PurgeScope,
	limit: u32,
) -> Result<u64> {
	let name = table.name();
	let mut tx = db.pool.begin().await?;
	let result = match scope {
		PurgeScope::DeletedBefore(cutoff) => sqlx::query(&format!(
			"\
DELETE FROM {name}
WHERE id IN (
	SELECT id
	FROM {name}
	WHERE deleted_at IS NOT NULL AND deleted_at < $1
	ORDER BY deleted_at, id
	LIMIT $2
	FOR UPDATE SKIP LOCKED
)"
		))
		.bind(*cutoff)
		.bind(i64::from(limit))
		.execute(&mut *tx)
		.await?,
		PurgeScope::User(user_id) => sqlx::query(&format!(
			"\
DELETE FROM {name}
WHERE id IN (
	SELECT id
	FROM {name}
	WHERE deleted_at IS NOT NULL AND user_id = $1
	ORDER BY deleted_at, id
	LIMIT $2
	FOR UPDATE SKIP LOCKED
)"
		))
		.bind(user_id.as_str())
		.bind(i64::from(limit))
		.execute(&mut *tx)
		.await?,
	};

	tx.commit().await?;

	Ok(result.rows_affected())
}

/// Reads go through the `active_*` view, so the soft-delete predicate cannot be forgotten.
pub async fn active_records(
	pool: &PgPool,
	table: ManagedTable,
	user_id: Option<&str>,
) -> Result<Vec<Record>> {
	let view = table.active_view();
	let records = sqlx::query_as::<_, Record>(&format!(
		"\
SELECT id::text AS id, user_id, created_at, deleted_at
FROM {view}
WHERE $1::text IS NULL OR user_id = $1
ORDER BY created_at, id"
	))
	.bind(user_id)
	.fetch_all(pool)
	.await?;

	Ok(records)
}

/// Test and bootstrap helper: inserts one row and returns its id.
pub async fn insert_record(
	pool: &PgPool,
	table: ManagedTable,
	user_id: &str,
	created_at: OffsetDateTime,
) -> Result<String> {
	let name = table.name();
	let id: String = sqlx::query_scalar(&format!(
		"INSERT INTO {name} (user_id, created_at) VALUES ($1, $2) RETURNING id::text"
	))
	.bind(user_id)
	.bind(created_at)
	.fetch_one(pool)
	.await?;

	Ok(id)
}
