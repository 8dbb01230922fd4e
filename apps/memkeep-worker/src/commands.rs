use color_eyre::{Result, eyre};
use serde_json::{Map, Value, json};

use crate::{Command, ConfigCommand, LogCommand};
use memkeep_domain::{ManagedTable, OperationStatus};
use memkeep_service::{MaintenanceService, RecordRequest, RunSummary};
use memkeep_storage::{db::Db, models::LogQuery};

/// Runs one subcommand and prints its result to stdout as pretty JSON.
///
/// Runs that finish with a failed table still print their summary, then exit with an error.
pub async fn execute(service: &MaintenanceService, db: &Db, command: Command) -> Result<()> {
	match command {
		Command::TtlSweep { dry_run } => finish_run(service.ttl_sweep(dry_run).await?),
		Command::ForgetUser { user_id, dry_run } =>
			finish_run(service.forget_user(&user_id, dry_run).await?),
		Command::Purge { user_id, dry_run } =>
			finish_run(service.purge_deleted(user_id.as_deref(), dry_run).await?),
		Command::Log(LogCommand::Query {
			operation_type,
			status,
			table,
			user_id,
			started_after,
			started_before,
			limit,
		}) => {
			let query = LogQuery {
				operation_type,
				status,
				table_name: table.map(|table| table.name().to_string()),
				user_id,
				started_after,
				started_before,
				limit,
			};

			print_json(&service.query_log(&query).await?)
		},
		Command::Log(LogCommand::Get { log_id }) => print_json(&service.log_entry(log_id).await?),
		Command::Config(ConfigCommand::Get) => {
			let rows = service.config_entries().await?;

			print_json(&rows)?;

			let invalid = rows
				.iter()
				.filter(|row| row.error.is_some())
				.map(|row| row.key.as_str())
				.collect::<Vec<_>>();

			if !invalid.is_empty() {
				return Err(eyre::eyre!("Invalid config rows: {}.", invalid.join(", ")));
			}

			Ok(())
		},
		Command::Config(ConfigCommand::Set { key, value, updated_by }) =>
			print_json(&service.set_config(&key, &value, updated_by.as_deref()).await?),
		Command::Records { table, user_id } =>
			print_json(&service.active_records(table, user_id.as_deref()).await?),
		Command::Record { json } => {
			let request = serde_json::from_str::<RecordRequest>(&json)?;
			let log_id = service.record_operation(request).await?;

			print_json(&json!({ "log_id": log_id }))
		},
		Command::Health => {
			let report = service.health_check().await;

			print_json(&report)?;

			if report.healthy {
				Ok(())
			} else {
				Err(eyre::eyre!("Primary store is unhealthy."))
			}
		},
		Command::EnsureSchema => {
			db.ensure_schema().await?;

			let tables = ManagedTable::ALL.iter().map(|table| json!(table.name())).collect();
			let parameters = Map::from_iter([
				("managed_tables".to_string(), Value::Array(tables)),
				("worker_version".to_string(), json!(memkeep_cli::VERSION)),
			]);
			let log_id = service.record_migration(parameters).await?;

			tracing::info!(%log_id, "Schema is up to date.");

			print_json(&json!({ "log_id": log_id }))
		},
	}
}

fn finish_run(summary: RunSummary) -> Result<()> {
	print_json(&summary)?;

	if summary.status == OperationStatus::Failed {
		let failed = summary
			.failed_tables()
			.into_iter()
			.map(ManagedTable::name)
			.collect::<Vec<_>>()
			.join(", ");

		return Err(eyre::eyre!("Maintenance run failed for tables: {failed}."));
	}

	Ok(())
}

fn print_json<T>(value: &T) -> Result<()>
where
	T: serde::Serialize + ?Sized,
{
	let json = serde_json::to_string_pretty(value)?;

	println!("{json}");

	Ok(())
}
