//! Storage seams for the maintenance engine.
//!
//! [`RecordStore`] covers the managed tables, the policy table and run locks;
//! [`MaintenanceLogger`] covers the audit trail. Both are implemented for Postgres by
//! [`crate::db::Db`] and in memory by [`crate::memory::MemoryStore`].

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	BoxFuture, Result,
	models::{ConfigEntry, LogFinish, LogQuery, MaintenanceLogEntry, Record, RecordOperation},
};
use memkeep_domain::{ManagedTable, OperationType};

/// Which active rows a soft-delete batch may touch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SoftDeleteScope {
	/// Rows with `created_at` strictly before the cutoff.
	CreatedBefore(OffsetDateTime),
	/// Rows owned by one user.
	User(String),
}

/// Which soft-deleted rows a purge batch may physically remove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurgeScope {
	/// Rows with `deleted_at` strictly before the cutoff.
	DeletedBefore(OffsetDateTime),
	/// Every soft-deleted row owned by one user, regardless of age.
	User(String),
}

/// Identifies the mutual-exclusion slot for one kind of run on one table.
///
/// `scope` narrows the slot when runs with disjoint predicates may proceed side by side, such as
/// erasures of different users. It is empty for table-wide runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunLockKey {
	pub operation_type: OperationType,
	pub table: ManagedTable,
	pub scope: String,
}
impl RunLockKey {
	pub fn table(operation_type: OperationType, table: ManagedTable) -> Self {
		Self { operation_type, table, scope: String::new() }
	}

	pub fn user(operation_type: OperationType, table: ManagedTable, user_id: &str) -> Self {
		Self { operation_type, table, scope: format!("user:{user_id}") }
	}
}

pub trait RecordStore
where
	Self: Send + Sync,
{
	fn load_config(&self) -> BoxFuture<'_, Result<Vec<ConfigEntry>>>;

	fn upsert_config<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		description: Option<&'a str>,
		updated_by: Option<&'a str>,
	) -> BoxFuture<'a, Result<ConfigEntry>>;

	fn count_soft_delete_candidates<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a SoftDeleteScope,
	) -> BoxFuture<'a, Result<u64>>;

	/// Marks up to `limit` active rows in scope, oldest first, as one atomic unit. Returns the
	/// number of rows marked; zero means the scope is exhausted.
	fn soft_delete_batch<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a SoftDeleteScope,
		limit: u32,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>>;

	fn count_purge_candidates<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a PurgeScope,
	) -> BoxFuture<'a, Result<u64>>;

	/// Physically deletes up to `limit` soft-deleted rows in scope as one atomic unit.
	fn purge_batch<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a PurgeScope,
		limit: u32,
	) -> BoxFuture<'a, Result<u64>>;

	/// The active-record read path. Soft-deleted rows are never returned.
	fn active_records<'a>(
		&'a self,
		table: ManagedTable,
		user_id: Option<&'a str>,
	) -> BoxFuture<'a, Result<Vec<Record>>>;

	/// Returns `false` while another holder owns an unexpired lease on `key`.
	fn try_acquire_run_lock<'a>(
		&'a self,
		key: &'a RunLockKey,
		holder: Uuid,
		lease: Duration,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;

	fn release_run_lock<'a>(&'a self, key: &'a RunLockKey, holder: Uuid)
	-> BoxFuture<'a, Result<()>>;

	fn ping(&self) -> BoxFuture<'_, Result<()>>;
}

pub trait MaintenanceLogger
where
	Self: Send + Sync,
{
	/// Inserts an entry exactly as described and returns its id.
	fn record<'a>(&'a self, op: &'a RecordOperation) -> BoxFuture<'a, Result<Uuid>>;

	/// Moves a `running` entry to its terminal state. Returns `false` when the entry was already
	/// terminal, in which case nothing changes.
	fn finish<'a>(&'a self, log_id: Uuid, finish: &'a LogFinish) -> BoxFuture<'a, Result<bool>>;

	fn get(&self, log_id: Uuid) -> BoxFuture<'_, Result<Option<MaintenanceLogEntry>>>;

	/// Matching entries, newest first.
	fn query<'a>(&'a self, query: &'a LogQuery)
	-> BoxFuture<'a, Result<Vec<MaintenanceLogEntry>>>;
}
