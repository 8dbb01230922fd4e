use serde_json::json;

use crate::{
	MaintenanceService, Result, RunStart,
	batch::{TablePass, Target},
	format_timestamp,
	report::RunSummary,
};
use memkeep_domain::{ManagedTable, OperationType};
use memkeep_storage::store::SoftDeleteScope;

impl MaintenanceService {
	/// Soft-deletes every active record older than the retention window, table by table.
	///
	/// Tables are independent: a failure is logged against its own table and the sweep moves on.
	pub async fn ttl_sweep(&self, dry_run: bool) -> Result<RunSummary> {
		let ctx = match self.start_run(OperationType::TtlCleanup, None).await? {
			RunStart::Ready(ctx) => ctx,
			RunStart::Skipped(summary) => return Ok(summary),
		};
		let cutoff = ctx.policy.ttl_cutoff(ctx.now);
		let batch_size = ctx.policy.ttl_cleanup_batch_size;
		let mut parameters = ctx.base_parameters(batch_size, dry_run);

		parameters.insert("ttl_days".to_string(), json!(ctx.policy.ttl_cleanup_days));
		parameters.insert("cutoff".to_string(), json!(format_timestamp(cutoff)));

		tracing::info!(
			cutoff = %format_timestamp(cutoff),
			batch_size,
			dry_run,
			"TTL sweep started."
		);

		let mut outcomes = Vec::with_capacity(ManagedTable::ALL.len());

		for table in ManagedTable::ALL {
			let outcome = self
				.run_table(TablePass {
					operation_type: OperationType::TtlCleanup,
					table,
					target: Target::SoftDelete(SoftDeleteScope::CreatedBefore(cutoff)),
					store: self.store.as_ref(),
					user_id: None,
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

		let summary = RunSummary::from_tables(OperationType::TtlCleanup, outcomes, dry_run);

		tracing::info!(
			status = %summary.status,
			total_affected = summary.total_affected,
			"TTL sweep finished."
		);

		Ok(summary)
	}
}
