pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use memkeep_domain::{ManagedTable, OperationStatus, OperationType};
use memkeep_service::MaintenanceService;
use memkeep_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = memkeep_cli::VERSION,
	about = memkeep_cli::ABOUT,
	rename_all = "kebab",
	styles = memkeep_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum Command {
	/// Soft-delete active records older than `ttl_cleanup_days` in every managed table.
	TtlSweep {
		/// Count candidates without changing anything.
		#[arg(long)]
		dry_run: bool,
	},
	/// Soft-delete every active record of one user.
	ForgetUser {
		#[arg(long, value_name = "ID")]
		user_id: String,
		#[arg(long)]
		dry_run: bool,
	},
	/// Physically remove soft-deleted records. Needs `storage.purge_postgres`.
	Purge {
		/// Purge this user's soft-deleted rows regardless of age.
		#[arg(long, value_name = "ID")]
		user_id: Option<String>,
		#[arg(long)]
		dry_run: bool,
	},
	/// Read the maintenance log.
	#[command(subcommand)]
	Log(LogCommand),
	/// Read or change the maintenance policy.
	#[command(subcommand)]
	Config(ConfigCommand),
	/// Active rows of one table.
	Records {
		#[arg(long, value_name = "TABLE")]
		table: ManagedTable,
		#[arg(long, value_name = "ID")]
		user_id: Option<String>,
	},
	/// Write one log entry from a JSON object, the way an external pipeline would.
	Record {
		#[arg(long, value_name = "JSON")]
		json: String,
	},
	/// Probe the primary store.
	Health,
	/// Create or upgrade the schema and record the migration.
	EnsureSchema,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum LogCommand {
	Query {
		#[arg(long, value_name = "TYPE")]
		operation_type: Option<OperationType>,
		#[arg(long, value_name = "STATUS")]
		status: Option<OperationStatus>,
		#[arg(long, value_name = "TABLE")]
		table: Option<ManagedTable>,
		#[arg(long, value_name = "ID")]
		user_id: Option<String>,
		/// RFC 3339 timestamp, inclusive.
		#[arg(long, value_name = "TIME", value_parser = parse_timestamp)]
		started_after: Option<OffsetDateTime>,
		/// RFC 3339 timestamp, exclusive.
		#[arg(long, value_name = "TIME", value_parser = parse_timestamp)]
		started_before: Option<OffsetDateTime>,
		#[arg(long, value_name = "N", default_value_t = 100)]
		limit: u32,
	},
	Get {
		#[arg(value_name = "LOG_ID")]
		log_id: Uuid,
	},
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum ConfigCommand {
	/// Value of every policy key. Invalid stored rows are listed with their error.
	Get,
	Set {
		#[arg(value_name = "KEY")]
		key: String,
		#[arg(value_name = "VALUE")]
		value: String,
		#[arg(long, value_name = "NAME")]
		updated_by: Option<String>,
	},
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = memkeep_config::load(&args.config)?;

	memkeep_cli::init_tracing(&config.service.log_level).map_err(|err| eyre::eyre!(err))?;

	let db = Db::connect(&config.storage.postgres).await?;
	let purge_db = match config.storage.purge_postgres.as_ref() {
		Some(cfg) => Some(Db::connect(cfg).await?),
		None => None,
	};

	tracing::debug!(purge_enabled = purge_db.is_some(), "Connected to Postgres.");

	let service = MaintenanceService::from_config(&config, db.clone(), purge_db);

	commands::execute(&service, &db, args.command).await
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, String> {
	OffsetDateTime::parse(raw.trim(), &Rfc3339)
		.map_err(|err| format!("Expected an RFC 3339 timestamp: {err}."))
}
