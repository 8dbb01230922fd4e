pub mod admin;
pub mod forget;
pub mod guard;
pub mod purge;
pub mod report;
pub mod sweep;

mod batch;
mod error;

pub use admin::{ConfigRow, ConfigSource, HealthReport, RecordRequest};
pub use error::{Error, Result};
pub use guard::LogGuard;
pub use report::{RunSummary, SkipReason, TableOutcome};

use std::{sync::Arc, time::Instant};

use serde_json::{Map, Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::batch::RunBudget;
use memkeep_config::Config;
use memkeep_domain::{MaintenancePolicy, OperationStatus, OperationType, redact, retry::Backoff};
use memkeep_storage::{
	db::Db,
	models::{ConfigEntry, PipelineTag, RecordOperation},
	store::{MaintenanceLogger, RecordStore},
};

/// Orchestrates maintenance runs over a [`RecordStore`], recording every unit of work through a
/// [`MaintenanceLogger`].
pub struct MaintenanceService {
	store: Arc<dyn RecordStore>,
	logger: Arc<dyn MaintenanceLogger>,
	purge_store: Option<Arc<dyn RecordStore>>,
	pipeline: PipelineTag,
	backoff: Backoff,
	endpoint: String,
}
impl MaintenanceService {
	pub fn new(store: Arc<dyn RecordStore>, logger: Arc<dyn MaintenanceLogger>) -> Self {
		Self {
			store,
			logger,
			purge_store: None,
			pipeline: PipelineTag::default(),
			backoff: Backoff::default(),
			endpoint: "memory".to_string(),
		}
	}

	/// Wires the Postgres stores described by `cfg`. `purge_db` is only present when a purge
	/// principal is configured.
	pub fn from_config(cfg: &Config, db: Db, purge_db: Option<Db>) -> Self {
		let db = Arc::new(db);
		let mut service = Self::new(db.clone(), db)
			.with_backoff(Backoff::from(&cfg.retry))
			.with_endpoint(&cfg.storage.postgres.dsn);

		if let Some(provenance) = cfg.provenance.as_ref() {
			service = service.with_pipeline(PipelineTag::from(provenance));
		}
		if let Some(purge_db) = purge_db {
			service = service.with_purge_store(Arc::new(purge_db));
		}

		service
	}

	pub fn with_purge_store(mut self, store: Arc<dyn RecordStore>) -> Self {
		self.purge_store = Some(store);

		self
	}

	pub fn with_pipeline(mut self, pipeline: PipelineTag) -> Self {
		self.pipeline = pipeline;

		self
	}

	pub fn with_backoff(mut self, backoff: Backoff) -> Self {
		self.backoff = backoff;

		self
	}

	/// Endpoint reported by health checks. Credentials are stripped here.
	pub fn with_endpoint(mut self, endpoint: &str) -> Self {
		self.endpoint = redact::redact_url_credentials(endpoint);

		self
	}

	pub fn store(&self) -> &dyn RecordStore {
		self.store.as_ref()
	}

	pub fn logger(&self) -> Arc<dyn MaintenanceLogger> {
		self.logger.clone()
	}

	/// Resolves the policy for a run. Storage failures are retried like any batch.
	pub async fn load_policy(&self) -> Result<MaintenancePolicy> {
		let entries = self.load_config_rows().await?;
		let policy = MaintenancePolicy::from_entries(
			entries.iter().map(|entry| (entry.key.as_str(), entry.value.as_str())),
		)?;

		Ok(policy)
	}

	pub(crate) async fn load_config_rows(&self) -> Result<Vec<ConfigEntry>> {
		let mut attempt = 1;

		loop {
			match self.store.load_config().await {
				Ok(entries) => return Ok(entries),
				Err(err) if err.is_transient() && self.backoff.allows_retry_after(attempt) => {
					tracing::warn!(
						attempt,
						error = %err,
						"Failed to load maintenance config; retrying."
					);
					tokio::time::sleep(self.backoff.delay_for(attempt)).await;

					attempt += 1;
				},
				Err(err) => return Err(err.into()),
			}
		}
	}

	/// Common prelude of every mutating run: resolve the policy, then honour the kill switch.
	///
	/// A policy that cannot be resolved is logged as one `failed` entry and returned as an error.
	/// A disabled engine is logged as one `completed` entry and reported through
	/// [`RunStart::Skipped`].
	pub(crate) async fn start_run(
		&self,
		operation_type: OperationType,
		user_id: Option<&str>,
	) -> Result<RunStart> {
		let policy = match self.load_policy().await {
			Ok(policy) => policy,
			Err(err) => {
				tracing::error!(
					%operation_type,
					error = %err,
					"Maintenance run aborted before any mutation."
				);

				let mut op = self.run_entry(operation_type, user_id, OperationStatus::Failed);

				op.error_message = Some(redact::sanitize_error(&err.to_string()));

				if let Err(log_err) = self.logger.record(&op).await {
					tracing::error!(error = %log_err, "Failed to log aborted maintenance run.");
				}

				return Err(err);
			},
		};

		if !policy.is_enabled() {
			tracing::info!(%operation_type, "Maintenance is disabled; skipping run.");

			let mut op = self.run_entry(operation_type, user_id, OperationStatus::Completed);

			op.parameters.insert(
				"skipped".to_string(),
				json!(SkipReason::MaintenanceDisabled.as_str()),
			);

			let log_id = self.logger.record(&op).await?;

			return Ok(RunStart::Skipped(RunSummary::skipped(
				operation_type,
				log_id,
				SkipReason::MaintenanceDisabled,
			)));
		}

		let budget = RunBudget {
			deadline: policy.run_budget().map(|budget| Instant::now() + budget),
			rows: policy.row_budget(),
		};

		Ok(RunStart::Ready(RunContext {
			policy,
			budget,
			holder: Uuid::new_v4(),
			now: OffsetDateTime::now_utc(),
		}))
	}

	fn run_entry(
		&self,
		operation_type: OperationType,
		user_id: Option<&str>,
		status: OperationStatus,
	) -> RecordOperation {
		let mut op = RecordOperation::running(operation_type, self.pipeline.clone());

		op.status = status;
		op.user_id = user_id.map(str::to_string);

		op
	}
}

pub(crate) enum RunStart {
	Ready(RunContext),
	Skipped(RunSummary),
}

pub(crate) struct RunContext {
	pub(crate) policy: MaintenancePolicy,
	pub(crate) budget: RunBudget,
	/// Lock holder identity for this run.
	pub(crate) holder: Uuid,
	/// Reference time for cutoffs and `deleted_at`.
	pub(crate) now: OffsetDateTime,
}
impl RunContext {
	pub(crate) fn base_parameters(&self, batch_size: u32, dry_run: bool) -> Map<String, Value> {
		let mut parameters = Map::from_iter([("batch_size".to_string(), json!(batch_size))]);

		if dry_run {
			parameters.insert("dry_run".to_string(), Value::Bool(true));
		}

		parameters
	}
}

pub(crate) fn format_timestamp(ts: OffsetDateTime) -> String {
	ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}
