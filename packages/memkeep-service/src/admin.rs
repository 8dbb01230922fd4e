use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, MaintenanceService, Result};
use memkeep_domain::{ManagedTable, OperationStatus, OperationType, PolicyKey, redact};
use memkeep_storage::models::{
	ConfigEntry, LogQuery, MaintenanceLogEntry, PipelineTag, Record, RecordOperation,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
	Stored,
	Default,
}

/// One policy key as listed for operators.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigRow {
	pub key: PolicyKey,
	/// Canonical form when valid, otherwise the stored text unchanged.
	pub value: String,
	pub source: ConfigSource,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Arguments of the externally callable `record_maintenance_operation`.
#[derive(Clone, Debug, Deserialize)]
pub struct RecordRequest {
	pub operation_type: OperationType,
	#[serde(default)]
	pub table_name: Option<String>,
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub records_affected: i64,
	#[serde(default)]
	pub parameters: Option<Value>,
	pub status: OperationStatus,
	#[serde(default)]
	pub error_message: Option<String>,
	/// Overrides the service's own provenance when present.
	#[serde(default)]
	pub pipeline_id: Option<String>,
	#[serde(default)]
	pub pipeline_version: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
	pub healthy: bool,
	/// Store endpoint with credentials removed.
	pub endpoint: String,
	#[serde(with = "memkeep_storage::time_serde")]
	pub checked_at: OffsetDateTime,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl MaintenanceService {
	/// Writes one log entry on behalf of an external caller, such as the pipeline monitor.
	pub async fn record_operation(&self, req: RecordRequest) -> Result<Uuid> {
		let Ok(records_affected) = u64::try_from(req.records_affected) else {
			return Err(Error::InvalidRequest {
				message: "records_affected must be zero or greater.".to_string(),
			});
		};
		let parameters = match req.parameters {
			None | Some(Value::Null) => Map::new(),
			Some(Value::Object(map)) => map,
			Some(_) =>
				return Err(Error::InvalidRequest {
					message: "parameters must be a JSON object.".to_string(),
				}),
		};
		let error_message =
			non_blank(req.error_message).map(|message| redact::sanitize_error(&message));
		let pipeline = match non_blank(req.pipeline_id) {
			Some(pipeline_id) => PipelineTag {
				pipeline_id: Some(pipeline_id),
				pipeline_version: non_blank(req.pipeline_version),
			},
			None => self.pipeline.clone(),
		};
		let op = RecordOperation {
			operation_type: req.operation_type,
			table_name: non_blank(req.table_name),
			user_id: non_blank(req.user_id),
			records_affected,
			parameters,
			status: req.status,
			error_message,
			pipeline,
		};
		let log_id = self.logger.record(&op).await?;

		tracing::info!(
			%log_id,
			operation_type = %op.operation_type,
			status = %op.status,
			"Recorded maintenance operation."
		);

		Ok(log_id)
	}

	/// Newest first. The limit is clamped to [`LogQuery::MAX_LIMIT`].
	pub async fn query_log(&self, query: &LogQuery) -> Result<Vec<MaintenanceLogEntry>> {
		let inverted = match (query.started_after, query.started_before) {
			(Some(after), Some(before)) => after > before,
			_ => false,
		};

		if inverted {
			return Err(Error::InvalidRequest {
				message: "started_after must not be later than started_before.".to_string(),
			});
		}

		Ok(self.logger.query(query).await?)
	}

	pub async fn log_entry(&self, log_id: Uuid) -> Result<MaintenanceLogEntry> {
		self.logger
			.get(log_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Log entry {log_id}.") })
	}

	/// Stored policy rows, one per known key. Keys without a row report their default.
	///
	/// A row that fails validation is still listed, verbatim and with the reason, so an operator
	/// can see what blocks the runs and fix it.
	pub async fn config_entries(&self) -> Result<Vec<ConfigRow>> {
		let stored = self.load_config_rows().await?;
		let rows = PolicyKey::ALL
			.into_iter()
			.map(|key| {
				let Some(entry) = stored.iter().find(|entry| entry.key.trim() == key.as_str())
				else {
					return ConfigRow {
						key,
						value: key.default_value().to_string(),
						source: ConfigSource::Default,
						error: None,
					};
				};

				match key.normalize(&entry.value) {
					Ok(value) =>
						ConfigRow { key, value, source: ConfigSource::Stored, error: None },
					Err(err) => {
						tracing::warn!(
							key = %key,
							value = %entry.value,
							error = %err,
							"Invalid config row."
						);

						ConfigRow {
							key,
							value: entry.value.clone(),
							source: ConfigSource::Stored,
							error: Some(err.to_string()),
						}
					},
				}
			})
			.collect();

		Ok(rows)
	}

	/// Validates `value` against the key's type before storing it.
	pub async fn set_config(
		&self,
		key: &str,
		value: &str,
		updated_by: Option<&str>,
	) -> Result<ConfigEntry> {
		let key = key
			.trim()
			.parse::<PolicyKey>()
			.map_err(|err| Error::InvalidRequest { message: err.to_string() })?;
		let value =
			key.normalize(value).map_err(|err| Error::InvalidRequest { message: err.to_string() })?;
		let entry = self
			.store
			.upsert_config(key.as_str(), &value, Some(key.description()), updated_by)
			.await?;

		tracing::info!(key = %key, value = %entry.value, updated_by, "Maintenance config updated.");

		Ok(entry)
	}

	/// The active-record read path. Soft-deleted rows are never returned.
	pub async fn active_records(
		&self,
		table: ManagedTable,
		user_id: Option<&str>,
	) -> Result<Vec<Record>> {
		Ok(self.store.active_records(table, user_id).await?)
	}

	/// Round-trips the primary store and records the check as a `health_check` entry when the
	/// log is reachable.
	pub async fn health_check(&self) -> HealthReport {
		let checked_at = OffsetDateTime::now_utc();
		let result = self.store.ping().await;
		let error = result.err().map(|err| redact::sanitize_error(&err.to_string()));
		let report = HealthReport {
			healthy: error.is_none(),
			endpoint: self.endpoint.clone(),
			checked_at,
			error,
		};
		let mut op = RecordOperation::running(OperationType::HealthCheck, self.pipeline.clone());

		op.parameters = Map::from_iter([("endpoint".to_string(), json!(report.endpoint))]);

		match &report.error {
			Some(message) => {
				op.status = OperationStatus::Failed;
				op.error_message = Some(message.clone());
			},
			None => op.status = OperationStatus::Completed,
		}

		if let Err(err) = self.logger.record(&op).await {
			tracing::warn!(error = %err, "Failed to record health check.");
		}

		tracing::info!(
			healthy = report.healthy,
			endpoint = %report.endpoint,
			"Health check finished."
		);

		report
	}

	/// Records a completed schema bootstrap.
	pub async fn record_migration(&self, parameters: Map<String, Value>) -> Result<Uuid> {
		let mut op =
			RecordOperation::running(OperationType::MigrationApply, self.pipeline.clone());

		op.status = OperationStatus::Completed;
		op.parameters = parameters;

		Ok(self.logger.record(&op).await?)
	}
}

fn non_blank(value: Option<String>) -> Option<String> {
	value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}
