use serde::Serialize;
use uuid::Uuid;

use memkeep_domain::{ManagedTable, OperationStatus, OperationType};

/// Why a run or a table did no work.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	MaintenanceDisabled,
	ConcurrentRun,
}
impl SkipReason {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::MaintenanceDisabled => "maintenance_disabled",
			Self::ConcurrentRun => "concurrent_run",
		}
	}
}

/// Result of one table's unit of work.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableOutcome {
	pub table: ManagedTable,
	/// `None` only when the log itself could not be written.
	pub log_id: Option<Uuid>,
	pub status: OperationStatus,
	pub records_affected: u64,
	pub batches: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub candidates: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub skipped: Option<SkipReason>,
	pub budget_exhausted: bool,
	/// Rows that still matched after a batch came back empty, typically because another session
	/// held them locked.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub candidates_remaining: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}
impl TableOutcome {
	pub(crate) fn new(table: ManagedTable, log_id: Option<Uuid>) -> Self {
		Self {
			table,
			log_id,
			status: OperationStatus::Completed,
			records_affected: 0,
			batches: 0,
			candidates: None,
			skipped: None,
			budget_exhausted: false,
			candidates_remaining: None,
			error: None,
		}
	}

	pub fn is_failed(&self) -> bool {
		self.status == OperationStatus::Failed
	}
}

/// Synchronous summary handed back to the caller. The log holds the full detail.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
	pub operation_type: OperationType,
	pub status: OperationStatus,
	pub total_affected: u64,
	pub tables: Vec<TableOutcome>,
	/// The run-level entry, when one was written (forget-user umbrella or a skipped run).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub log_id: Option<Uuid>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub skipped: Option<SkipReason>,
	pub dry_run: bool,
}
impl RunSummary {
	pub(crate) fn from_tables(
		operation_type: OperationType,
		tables: Vec<TableOutcome>,
		dry_run: bool,
	) -> Self {
		let total_affected = tables.iter().map(|outcome| outcome.records_affected).sum();
		let status = if tables.iter().any(TableOutcome::is_failed) {
			OperationStatus::Failed
		} else {
			OperationStatus::Completed
		};

		Self {
			operation_type,
			status,
			total_affected,
			tables,
			log_id: None,
			skipped: None,
			dry_run,
		}
	}

	pub(crate) fn skipped(operation_type: OperationType, log_id: Uuid, reason: SkipReason) -> Self {
		Self {
			operation_type,
			status: OperationStatus::Completed,
			total_affected: 0,
			tables: Vec::new(),
			log_id: Some(log_id),
			skipped: Some(reason),
			dry_run: false,
		}
	}

	pub fn table(&self, table: ManagedTable) -> Option<&TableOutcome> {
		self.tables.iter().find(|outcome| outcome.table == table)
	}

	/// Tables left untouched because a concurrent run held their lock.
	pub fn skipped_tables(&self) -> Vec<ManagedTable> {
		self.tables
			.iter()
			.filter(|outcome| outcome.skipped.is_some())
			.map(|outcome| outcome.table)
			.collect()
	}

	pub fn failed_tables(&self) -> Vec<ManagedTable> {
		self.tables
			.iter()
			.filter(|outcome| outcome.is_failed())
			.map(|outcome| outcome.table)
			.collect()
	}
}
