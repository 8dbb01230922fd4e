use serde_json::{Map, Value, json};

use crate::{
	Error, MaintenanceService, Result, RunStart,
	batch::{TablePass, Target},
	guard::LogGuard,
	report::RunSummary,
};
use memkeep_domain::{ManagedTable, OperationStatus, OperationType};
use memkeep_storage::{models::RecordOperation, store::SoftDeleteScope};

impl MaintenanceService {
	/// Soft-deletes every active record of one user across all managed tables.
	///
	/// Each table gets its own entry carrying the user id. One more entry without a table records
	/// the request as a whole: its parameters hold the per-table breakdown and its status is the
	/// overall outcome. Physical removal is left to [`MaintenanceService::purge_deleted`].
	pub async fn forget_user(&self, user_id: &str, dry_run: bool) -> Result<RunSummary> {
		let user_id = user_id.trim();

		if user_id.is_empty() {
			return Err(Error::InvalidRequest { message: "user_id is required.".to_string() });
		}

		let ctx = match self.start_run(OperationType::ForgetUser, Some(user_id)).await? {
			RunStart::Ready(ctx) => ctx,
			RunStart::Skipped(summary) => return Ok(summary),
		};
		let batch_size = ctx.policy.forget_user_batch_size;
		let parameters = ctx.base_parameters(batch_size, dry_run);
		let mut request =
			RecordOperation::running(OperationType::ForgetUser, self.pipeline.clone());

		request.user_id = Some(user_id.to_string());
		request.parameters = parameters.clone();

		let umbrella = LogGuard::open(self.logger.clone(), &request).await?;
		let umbrella_id = umbrella.log_id();

		tracing::info!(user_id, batch_size, dry_run, "Forget-user request started.");

		let scope = SoftDeleteScope::User(user_id.to_string());
		let mut outcomes = Vec::with_capacity(ManagedTable::ALL.len());

		for table in ManagedTable::ALL {
			let outcome = self
				.run_table(TablePass {
					operation_type: OperationType::ForgetUser,
					table,
					target: Target::SoftDelete(scope.clone()),
					store: self.store.as_ref(),
					user_id: Some(user_id),
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

		let mut summary = RunSummary::from_tables(OperationType::ForgetUser, outcomes, dry_run);
		let breakdown = summary
			.tables
			.iter()
			.map(|outcome| {
				let mut entry = json!({
					"status": outcome.status,
					"records_affected": outcome.records_affected,
				});

				if let Some(reason) = outcome.skipped {
					entry["skipped"] = json!(reason.as_str());
				}

				(outcome.table.name().to_string(), entry)
			})
			.collect::<Map<String, Value>>();
		let mut finish_parameters =
			Map::from_iter([("tables".to_string(), Value::Object(breakdown))]);
		let skipped = summary.skipped_tables();

		if !skipped.is_empty() {
			tracing::warn!(
				user_id,
				skipped = skipped.len(),
				"Some tables were held by a concurrent erasure of this user and were not touched."
			);

			let names = skipped.into_iter().map(|table| json!(table.name())).collect();

			finish_parameters.insert("skipped_tables".to_string(), Value::Array(names));
		}

		let finalized = match summary.status {
			OperationStatus::Failed => {
				let failed = summary
					.failed_tables()
					.into_iter()
					.map(ManagedTable::name)
					.collect::<Vec<_>>()
					.join(", ");

				umbrella
					.fail(
						summary.total_affected,
						&format!("Forget-user failed for tables: {failed}."),
						finish_parameters,
					)
					.await
			},
			_ => umbrella.complete(summary.total_affected, finish_parameters).await,
		};

		if let Err(err) = finalized {
			tracing::error!(user_id, error = %err, "Failed to finalize forget-user entry.");
		}

		summary.log_id = Some(umbrella_id);

		tracing::info!(
			user_id,
			status = %summary.status,
			total_affected = summary.total_affected,
			"Forget-user request finished."
		);

		Ok(summary)
	}
}
