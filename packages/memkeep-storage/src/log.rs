use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
	Result,
	models::{LogFinish, LogQuery, MaintenanceLogEntry, MaintenanceLogRow, RecordOperation},
};

const LOG_COLUMNS: &str = "\
log_id, operation_type, table_name, user_id, records_affected, parameters, status, error_message, \
started_at, completed_at, duration_ms, pipeline_id, pipeline_version";

/// Writes through the `record_maintenance_operation` SQL function so that Rust callers and
/// external callers share one entry point.
pub async fn record(pool: &PgPool, op: &RecordOperation) -> Result<Uuid> {
	op.validate()?;

	let log_id: Uuid = sqlx::query_scalar(
		"SELECT record_maintenance_operation($1, $2, $3, $4, $5, $6, $7, $8, $9)",
	)
	.bind(op.operation_type.as_str())
	.bind(op.table_name.as_deref())
	.bind(op.user_id.as_deref())
	.bind(op.records_affected as i64)
	.bind(Value::Object(op.parameters.clone()))
	.bind(op.status.as_str())
	.bind(op.error_message.as_deref())
	.bind(op.pipeline.pipeline_id.as_deref())
	.bind(op.pipeline.pipeline_version.as_deref())
	.fetch_one(pool)
	.await?;

	Ok(log_id)
}

/// The `status = 'running'` guard makes finalization happen at most once.
pub async fn finish(pool: &PgPool, log_id: Uuid, finish: &LogFinish) -> Result<bool> {
	let result = sqlx::query(
		"\
UPDATE memory_maintenance_log
SET
	status = $2,
	records_affected = $3,
	error_message = $4,
	parameters = parameters || $5,
	completed_at = $6,
	duration_ms = $7
WHERE log_id = $1 AND status = 'running'",
	)
	.bind(log_id)
	.bind(finish.status.as_str())
	.bind(i64::try_from(finish.records_affected).unwrap_or(i64::MAX))
	.bind(finish.error_message.as_deref())
	.bind(Value::Object(finish.parameters.clone()))
	.bind(finish.completed_at)
	.bind(i64::try_from(finish.duration_ms).unwrap_or(i64::MAX))
	.execute(pool)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn get(pool: &PgPool, log_id: Uuid) -> Result<Option<MaintenanceLogEntry>> {
	let row = sqlx::query_as::<_, MaintenanceLogRow>(&format!(
		"SELECT {LOG_COLUMNS} FROM memory_maintenance_log WHERE log_id = $1"
	))
	.bind(log_id)
	.fetch_optional(pool)
	.await?;

	row.map(MaintenanceLogEntry::try_from).transpose()
}

pub async fn query(pool: &PgPool, query: &LogQuery) -> Result<Vec<MaintenanceLogEntry>> {
	let mut builder: QueryBuilder<'_, Postgres> =
		QueryBuilder::new(format!("SELECT {LOG_COLUMNS} FROM memory_maintenance_log WHERE TRUE"));

	if let Some(op) = query.operation_type {
		builder.push(" AND operation_type = ").push_bind(op.as_str());
	}
	if let Some(status) = query.status {
		builder.push(" AND status = ").push_bind(status.as_str());
	}
	if let Some(table) = query.table_name.as_deref() {
		builder.push(" AND table_name = ").push_bind(table);
	}
	if let Some(user_id) = query.user_id.as_deref() {
		builder.push(" AND user_id = ").push_bind(user_id);
	}
	if let Some(after) = query.started_after {
		builder.push(" AND started_at >= ").push_bind(after);
	}
	if let Some(before) = query.started_before {
		builder.push(" AND started_at < ").push_bind(before);
	}

	builder.push(" ORDER BY started_at DESC, log_id DESC LIMIT ");
	builder.push_bind(i64::from(query.effective_limit()));

	let rows = builder.build_query_as::<MaintenanceLogRow>().fetch_all(pool).await?;

	rows.into_iter().map(MaintenanceLogEntry::try_from).collect()
}
