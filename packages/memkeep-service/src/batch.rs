//! The per-table unit of work shared by sweep, erasure and purge.
//!
//! Each table runs under its own log entry and run lock. Rows are processed in bounded batches,
//! each committed atomically by the store; the run budget is checked only between batches. The
//! lock lease is stamped with the wall clock when taken and renewed between batches once half of
//! it has elapsed.

use std::time::Instant;

use serde_json::{Map, Value, json};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	Error, MaintenanceService, Result,
	guard::LogGuard,
	report::{SkipReason, TableOutcome},
};
use memkeep_domain::{ManagedTable, OperationStatus, OperationType, retry::Backoff};
use memkeep_storage::{
	BoxFuture,
	models::RecordOperation,
	store::{PurgeScope, RecordStore, RunLockKey, SoftDeleteScope},
};

/// What a batch does to the rows it selects.
#[derive(Clone, Debug)]
pub(crate) enum Target {
	SoftDelete(SoftDeleteScope),
	Purge(PurgeScope),
}
impl Target {
	fn count<'a>(
		&'a self,
		store: &'a dyn RecordStore,
		table: ManagedTable,
	) -> BoxFuture<'a, memkeep_storage::Result<u64>> {
		match self {
			Self::SoftDelete(scope) => store.count_soft_delete_candidates(table, scope),
			Self::Purge(scope) => store.count_purge_candidates(table, scope),
		}
	}

	fn apply<'a>(
		&'a self,
		store: &'a dyn RecordStore,
		table: ManagedTable,
		limit: u32,
		now: OffsetDateTime,
	) -> BoxFuture<'a, memkeep_storage::Result<u64>> {
		match self {
			Self::SoftDelete(scope) => store.soft_delete_batch(table, scope, limit, now),
			Self::Purge(scope) => store.purge_batch(table, scope, limit),
		}
	}
}

/// Limits shared by every table of one run.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunBudget {
	pub(crate) deadline: Option<Instant>,
	/// Per table.
	pub(crate) rows: Option<u64>,
}
impl RunBudget {
	fn expired(&self) -> bool {
		self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
	}
}

pub(crate) struct TablePass<'a> {
	pub(crate) operation_type: OperationType,
	pub(crate) table: ManagedTable,
	pub(crate) target: Target,
	/// Store the batches run against. Locks always live in the service's primary store.
	pub(crate) store: &'a dyn RecordStore,
	pub(crate) user_id: Option<&'a str>,
	pub(crate) batch_size: u32,
	pub(crate) parameters: Map<String, Value>,
	pub(crate) dry_run: bool,
	pub(crate) budget: RunBudget,
	pub(crate) lease: Duration,
	pub(crate) holder: Uuid,
	pub(crate) now: OffsetDateTime,
}

#[derive(Debug, Default)]
struct Progress {
	affected: u64,
	batches: u32,
	budget_exhausted: bool,
	candidates_remaining: Option<u64>,
}

/// A run lock this pass currently holds.
struct HeldLock<'a> {
	store: &'a dyn RecordStore,
	key: RunLockKey,
	holder: Uuid,
	lease: Duration,
	renewed_at: Instant,
}
impl HeldLock<'_> {
	fn lock_key(pass: &TablePass<'_>) -> RunLockKey {
		match (pass.operation_type, pass.user_id) {
			(OperationType::ForgetUser, Some(user_id)) =>
				RunLockKey::user(pass.operation_type, pass.table, user_id),
			_ => RunLockKey::table(pass.operation_type, pass.table),
		}
	}

	fn due(&self) -> bool {
		self.renewed_at.elapsed() >= self.lease.unsigned_abs() / 2
	}

	/// Extends the lease from now. Fails when another holder took the slot over meanwhile.
	async fn renew(&mut self, backoff: &Backoff) -> Result<()> {
		let (store, key, holder, lease) = (self.store, &self.key, self.holder, self.lease);
		let renewed = retrying(backoff, key.table, move || {
			store.try_acquire_run_lock(key, holder, lease, OffsetDateTime::now_utc())
		})
		.await?;

		if !renewed {
			return Err(Error::LockLost {
				message: format!(
					"Lease on {} expired and was taken over by another run.",
					key.table.name()
				),
			});
		}

		self.renewed_at = Instant::now();

		tracing::debug!(table = %key.table, "Run lock renewed.");

		Ok(())
	}
}

impl MaintenanceService {
	pub(crate) async fn run_table(&self, pass: TablePass<'_>) -> TableOutcome {
		let table = pass.table;
		let mut op = RecordOperation::running(pass.operation_type, self.pipeline.clone());

		op.table_name = Some(table.name().to_string());
		op.user_id = pass.user_id.map(str::to_string);
		op.parameters = pass.parameters.clone();

		let mut guard = match LogGuard::open(self.logger.clone(), &op).await {
			Ok(guard) => guard,
			Err(err) => {
				tracing::error!(%table, error = %err, "Failed to open maintenance log entry.");

				let mut outcome = TableOutcome::new(table, None);

				outcome.status = OperationStatus::Failed;
				outcome.error = Some(err.to_string());

				return outcome;
			},
		};
		let mut outcome = TableOutcome::new(table, Some(guard.log_id()));
		let mut lock = HeldLock {
			store: self.store.as_ref(),
			key: HeldLock::lock_key(&pass),
			holder: pass.holder,
			lease: pass.lease,
			renewed_at: Instant::now(),
		};
		let acquired = {
			let (store, key, holder, lease) = (lock.store, &lock.key, lock.holder, lock.lease);

			retrying(&self.backoff, table, move || {
				store.try_acquire_run_lock(key, holder, lease, OffsetDateTime::now_utc())
			})
			.await
		};

		match acquired {
			Ok(true) => lock.renewed_at = Instant::now(),
			Ok(false) => {
				tracing::info!(%table, "Another run holds this table; skipping.");

				outcome.skipped = Some(SkipReason::ConcurrentRun);

				let parameters = Map::from_iter([(
					"skipped".to_string(),
					json!(SkipReason::ConcurrentRun.as_str()),
				)]);

				if let Err(err) = guard.complete(0, parameters).await {
					tracing::error!(%table, error = %err, "Failed to finalize log entry.");
				}

				return outcome;
			},
			Err(err) => {
				tracing::error!(%table, error = %err, "Failed to acquire run lock.");

				outcome.status = OperationStatus::Failed;
				outcome.error = Some(err.to_string());

				if let Err(log_err) = guard.fail(0, &err.to_string(), Map::new()).await {
					tracing::error!(%table, error = %log_err, "Failed to finalize log entry.");
				}

				return outcome;
			},
		}

		let mut progress = Progress::default();
		let result = if pass.dry_run {
			self.count_candidates(&pass).await.map(|candidates| {
				outcome.candidates = Some(candidates);
			})
		} else {
			self.drain(&pass, &mut guard, &mut lock, &mut progress).await
		};

		if let Err(err) = self.store.release_run_lock(&lock.key, lock.holder).await {
			tracing::warn!(
				%table,
				error = %err,
				"Failed to release run lock; the lease will expire."
			);
		}

		outcome.records_affected = progress.affected;
		outcome.batches = progress.batches;
		outcome.budget_exhausted = progress.budget_exhausted;
		outcome.candidates_remaining = progress.candidates_remaining;

		let mut parameters = Map::from_iter([("batches".to_string(), json!(progress.batches))]);

		if pass.dry_run {
			parameters.insert("dry_run".to_string(), Value::Bool(true));
			parameters.insert("candidates".to_string(), json!(outcome.candidates.unwrap_or(0)));
		}
		if progress.budget_exhausted {
			parameters.insert("budget_exhausted".to_string(), Value::Bool(true));
		}
		if let Some(remaining) = progress.candidates_remaining {
			parameters.insert("candidates_remaining".to_string(), json!(remaining));
		}

		let finalized = match result {
			Ok(()) => {
				tracing::info!(
					%table,
					records_affected = progress.affected,
					batches = progress.batches,
					"Table maintenance completed."
				);

				guard.complete(progress.affected, parameters).await
			},
			Err(err) => {
				tracing::error!(
					%table,
					records_affected = progress.affected,
					error = %err,
					"Table maintenance failed."
				);

				outcome.status = OperationStatus::Failed;
				outcome.error = Some(err.to_string());

				guard.fail(progress.affected, &err.to_string(), parameters).await
			},
		};

		if let Err(err) = finalized {
			tracing::error!(%table, error = %err, "Failed to finalize log entry.");
		}

		outcome
	}

	async fn count_candidates(&self, pass: &TablePass<'_>) -> Result<u64> {
		let (store, target, table) = (pass.store, &pass.target, pass.table);

		retrying(&self.backoff, table, move || target.count(store, table)).await
	}

	async fn drain(
		&self,
		pass: &TablePass<'_>,
		guard: &mut LogGuard,
		lock: &mut HeldLock<'_>,
		progress: &mut Progress,
	) -> Result<()> {
		let (store, target, table, now) = (pass.store, &pass.target, pass.table, pass.now);

		loop {
			if pass.budget.expired() {
				progress.budget_exhausted = true;

				break;
			}

			let limit = match pass.budget.rows {
				Some(rows) => {
					let remaining = rows.saturating_sub(progress.affected);

					if remaining == 0 {
						progress.budget_exhausted = true;

						break;
					}

					u32::try_from(remaining)
						.map_or(pass.batch_size, |remaining| remaining.min(pass.batch_size))
				},
				None => pass.batch_size,
			};

			if lock.due() {
				lock.renew(&self.backoff).await?;
			}

			let affected = retrying(&self.backoff, table, move || {
				target.apply(store, table, limit, now)
			})
			.await?;

			if affected == 0 {
				// An empty batch under SKIP LOCKED does not prove the table is drained.
				let remaining = self.count_candidates(pass).await?;

				if remaining > 0 {
					tracing::warn!(
						%table,
						candidates_remaining = remaining,
						"Matching rows are locked by another session; leaving them for a later run."
					);

					progress.candidates_remaining = Some(remaining);
				}

				break;
			}

			progress.affected += affected;
			progress.batches += 1;

			guard.set_progress(progress.affected);

			tracing::debug!(
				%table,
				batch = progress.batches,
				records_affected = affected,
				"Batch committed."
			);
		}

		Ok(())
	}
}

/// Runs `call` until it succeeds, fails permanently, or the attempt budget is spent. Only
/// transient storage failures are retried.
pub(crate) async fn retrying<'a, T, F>(
	backoff: &Backoff,
	table: ManagedTable,
	mut call: F,
) -> Result<T>
where
	F: FnMut() -> BoxFuture<'a, memkeep_storage::Result<T>>,
{
	let mut attempt = 1;

	loop {
		match call().await {
			Ok(value) => return Ok(value),
			Err(err) if err.is_transient() && backoff.allows_retry_after(attempt) => {
				let delay = backoff.delay_for(attempt);

				tracing::warn!(
					%table,
					attempt,
					delay_ms = delay.as_millis() as u64,
					error = %err,
					"Transient storage failure; retrying."
				);
				tokio::time::sleep(delay).await;

				attempt += 1;
			},
			Err(err) => return Err(Error::from(err)),
		}
	}
}
