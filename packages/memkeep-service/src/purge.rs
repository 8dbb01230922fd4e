use serde_json::json;

use crate::{
	Error, MaintenanceService, Result, RunStart,
	batch::{TablePass, Target},
	format_timestamp,
	report::RunSummary,
};
use memkeep_domain::{ManagedTable, OperationType};
use memkeep_storage::store::PurgeScope;

impl MaintenanceService {
	/// Physically removes soft-deleted rows, either those past the purge window or, when
	/// `user_id` is given, every soft-deleted row of that user.
	///
	/// Requires a purge store; without one nothing is touched and nothing is logged.
	pub async fn purge_deleted(
		&self,
		user_id: Option<&str>,
		dry_run: bool,
	) -> Result<RunSummary> {
		let Some(purge_store) = self.purge_store.as_deref() else {
			return Err(Error::PurgeNotPermitted {
				message: "No purge store is configured; set storage.purge_postgres.".to_string(),
			});
		};
		let user_id = match user_id.map(str::trim) {
			Some("") =>
				return Err(Error::InvalidRequest {
					message: "user_id must not be blank.".to_string(),
				}),
			other => other,
		};
		let ctx = match self.start_run(OperationType::PurgeDeleted, user_id).await? {
			RunStart::Ready(ctx) => ctx,
			RunStart::Skipped(summary) => return Ok(summary),
		};
		let batch_size = ctx.policy.purge_batch_size;
		let mut parameters = ctx.base_parameters(batch_size, dry_run);
		let scope = match user_id {
			Some(user_id) => PurgeScope::User(user_id.to_string()),
			None => {
				let cutoff = ctx.policy.purge_cutoff(ctx.now);

				parameters
					.insert("purge_after_days".to_string(), json!(ctx.policy.purge_after_days));
				parameters.insert("cutoff".to_string(), json!(format_timestamp(cutoff)));

				PurgeScope::DeletedBefore(cutoff)
			},
		};

		tracing::info!(user_id, batch_size, dry_run, "Purge of soft-deleted rows started.");

		let mut outcomes = Vec::with_capacity(ManagedTable::ALL.len());

		for table in ManagedTable::ALL {
			let outcome = self
				.run_table(TablePass {
					operation_type: OperationType::PurgeDeleted,
					table,
					target: Target::Purge(scope.clone()),
					store: purge_store,
					user_id,
					batch_size,
					parameters: parameters.clone(),
					dry_run,
					budget: ctx.budget,
					lease: ctx.policy.lock_lease(),
					holder: ctx.holder,
					now: ctx.now,
				})
				.await;

			outcomes.push(outcome);
		}

		let summary = RunSummary::from_tables(OperationType::PurgeDeleted, outcomes, dry_run);

		tracing::info!(
			status = %summary.status,
			total_affected = summary.total_affected,
			"Purge of soft-deleted rows finished."
		);

		Ok(summary)
	}
}
