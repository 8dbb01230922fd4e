use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Result, store::RunLockKey};

/// Takes the lease when the slot is free or its previous lease has expired. The current holder
/// calling again extends its own lease.
pub async fn try_acquire(
	pool: &PgPool,
	key: &RunLockKey,
	holder: Uuid,
	lease: Duration,
	now: OffsetDateTime,
) -> Result<bool> {
	let acquired: Option<Uuid> = sqlx::query_scalar(
		"\
INSERT INTO memory_maintenance_run_locks (
	operation_type,
	table_name,
	scope,
	holder_id,
	acquired_at,
	expires_at
)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (operation_type, table_name, scope) DO UPDATE
SET
	holder_id = EXCLUDED.holder_id,
	acquired_at = EXCLUDED.acquired_at,
	expires_at = EXCLUDED.expires_at
WHERE memory_maintenance_run_locks.expires_at <= EXCLUDED.acquired_at
	OR memory_maintenance_run_locks.holder_id = EXCLUDED.holder_id
RETURNING holder_id",
	)
	.bind(key.operation_type.as_str())
	.bind(key.table.name())
	.bind(key.scope.as_str())
	.bind(holder)
	.bind(now)
	.bind(now + lease)
	.fetch_optional(pool)
	.await?;

	Ok(acquired == Some(holder))
}

pub async fn release(pool: &PgPool, key: &RunLockKey, holder: Uuid) -> Result<()> {
	sqlx::query(
		"\
DELETE FROM memory_maintenance_run_locks
WHERE operation_type = $1 AND table_name = $2 AND scope = $3 AND holder_id = $4",
	)
	.bind(key.operation_type.as_str())
	.bind(key.table.name())
	.bind(key.scope.as_str())
	.bind(holder)
	.execute(pool)
	.await?;

	Ok(())
}
