use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};
use memkeep_domain::{OperationStatus, OperationType};

/// A row of a managed table as seen through its active view.
#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct Record {
	pub id: String,
	pub user_id: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde::option")]
	pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct ConfigEntry {
	pub key: String,
	pub value: String,
	pub description: Option<String>,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
	pub updated_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MaintenanceLogEntry {
	pub log_id: Uuid,
	pub operation_type: OperationType,
	pub table_name: Option<String>,
	pub user_id: Option<String>,
	pub records_affected: u64,
	pub parameters: Value,
	pub status: OperationStatus,
	pub error_message: Option<String>,
	#[serde(with = "crate::time_serde")]
	pub started_at: OffsetDateTime,
	#[serde(with = "crate::time_serde::option")]
	pub completed_at: Option<OffsetDateTime>,
	pub duration_ms: Option<u64>,
	pub pipeline_id: Option<String>,
	pub pipeline_version: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MaintenanceLogRow {
	pub log_id: Uuid,
	pub operation_type: String,
	pub table_name: Option<String>,
	pub user_id: Option<String>,
	pub records_affected: i64,
	pub parameters: Value,
	pub status: String,
	pub error_message: Option<String>,
	pub started_at: OffsetDateTime,
	pub completed_at: Option<OffsetDateTime>,
	pub duration_ms: Option<i64>,
	pub pipeline_id: Option<String>,
	pub pipeline_version: Option<String>,
}
impl TryFrom<MaintenanceLogRow> for MaintenanceLogEntry {
	type Error = Error;

	fn try_from(row: MaintenanceLogRow) -> Result<Self> {
		let operation_type = row
			.operation_type
			.parse::<OperationType>()
			.map_err(|err| Error::InvalidArgument(err.to_string()))?;
		let status = row
			.status
			.parse::<OperationStatus>()
			.map_err(|err| Error::InvalidArgument(err.to_string()))?;

		Ok(Self {
			log_id: row.log_id,
			operation_type,
			table_name: row.table_name,
			user_id: row.user_id,
			records_affected: u64::try_from(row.records_affected).unwrap_or(0),
			parameters: row.parameters,
			status,
			error_message: row.error_message,
			started_at: row.started_at,
			completed_at: row.completed_at,
			duration_ms: row.duration_ms.map(|ms| u64::try_from(ms).unwrap_or(0)),
			pipeline_id: row.pipeline_id,
			pipeline_version: row.pipeline_version,
		})
	}
}

/// Provenance attached to every entry written by one process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineTag {
	pub pipeline_id: Option<String>,
	pub pipeline_version: Option<String>,
}
impl From<&memkeep_config::Provenance> for PipelineTag {
	fn from(provenance: &memkeep_config::Provenance) -> Self {
		Self {
			pipeline_id: Some(provenance.pipeline_id.clone()),
			pipeline_version: provenance.pipeline_version.clone(),
		}
	}
}

/// Arguments of `record_maintenance_operation`. Also used to open `running` entries.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordOperation {
	pub operation_type: OperationType,
	pub table_name: Option<String>,
	pub user_id: Option<String>,
	pub records_affected: u64,
	pub parameters: Map<String, Value>,
	pub status: OperationStatus,
	pub error_message: Option<String>,
	pub pipeline: PipelineTag,
}
impl RecordOperation {
	pub fn running(operation_type: OperationType, pipeline: PipelineTag) -> Self {
		Self {
			operation_type,
			table_name: None,
			user_id: None,
			records_affected: 0,
			parameters: Map::new(),
			status: OperationStatus::Running,
			error_message: None,
			pipeline,
		}
	}

	/// Enforces the entry invariants before anything reaches storage.
	pub fn validate(&self) -> Result<()> {
		match (self.status, self.error_message.as_deref()) {
			(OperationStatus::Failed, None) =>
				return Err(Error::InvalidArgument(
					"error_message is required when status is failed.".to_string(),
				)),
			(OperationStatus::Failed, Some(message)) if message.trim().is_empty() =>
				return Err(Error::InvalidArgument(
					"error_message must be non-empty when status is failed.".to_string(),
				)),
			(OperationStatus::Running | OperationStatus::Completed, Some(_)) =>
				return Err(Error::InvalidArgument(
					"error_message is only allowed when status is failed.".to_string(),
				)),
			_ => {},
		}
		if self.status == OperationStatus::Running && self.records_affected > 0 {
			return Err(Error::InvalidArgument(
				"records_affected must be zero for a running entry.".to_string(),
			));
		}
		if i64::try_from(self.records_affected).is_err() {
			return Err(Error::InvalidArgument("records_affected is out of range.".to_string()));
		}

		Ok(())
	}
}

/// Terminal outcome applied to a `running` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct LogFinish {
	pub status: OperationStatus,
	pub records_affected: u64,
	pub error_message: Option<String>,
	/// Merged into the entry's existing parameters.
	pub parameters: Map<String, Value>,
	pub completed_at: OffsetDateTime,
	pub duration_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogQuery {
	pub operation_type: Option<OperationType>,
	pub status: Option<OperationStatus>,
	pub table_name: Option<String>,
	pub user_id: Option<String>,
	pub started_after: Option<OffsetDateTime>,
	pub started_before: Option<OffsetDateTime>,
	pub limit: u32,
}
impl LogQuery {
	pub const DEFAULT_LIMIT: u32 = 100;
	pub const MAX_LIMIT: u32 = 1_000;

	pub fn effective_limit(&self) -> u32 {
		match self.limit {
			0 => Self::DEFAULT_LIMIT,
			limit => limit.min(Self::MAX_LIMIT),
		}
	}

	pub fn matches(&self, entry: &MaintenanceLogEntry) -> bool {
		self.operation_type.is_none_or(|op| op == entry.operation_type)
			&& self.status.is_none_or(|status| status == entry.status)
			&& self
				.table_name
				.as_deref()
				.is_none_or(|table| entry.table_name.as_deref() == Some(table))
			&& self.user_id.as_deref().is_none_or(|user| entry.user_id.as_deref() == Some(user))
			&& self.started_after.is_none_or(|after| entry.started_at >= after)
			&& self.started_before.is_none_or(|before| entry.started_at < before)
	}
}
