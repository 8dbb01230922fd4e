//! Scoped finalization of maintenance log entries.
//!
//! A [`LogGuard`] owns one `running` entry. Consuming it through [`LogGuard::complete`] or
//! [`LogGuard::fail`] writes the terminal state. Dropping it any other way (an early return, a
//! panic unwinding through the caller, a cancelled task) hands the entry to a background task that
//! marks it `failed`, so no entry is left `running` by a process that is still alive.

use std::{sync::Arc, time::Instant};

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::Result;
use memkeep_domain::{OperationStatus, redact};
use memkeep_storage::{
	models::{LogFinish, RecordOperation},
	store::MaintenanceLogger,
};

pub const ABORTED_MESSAGE: &str = "Operation aborted before completion.";

pub struct LogGuard {
	logger: Arc<dyn MaintenanceLogger>,
	log_id: Uuid,
	started: Instant,
	progress: u64,
	finished: bool,
}
impl LogGuard {
	/// Inserts a `running` entry described by `op` and starts the clock.
	pub async fn open(logger: Arc<dyn MaintenanceLogger>, op: &RecordOperation) -> Result<Self> {
		let log_id = logger.record(op).await?;

		Ok(Self { logger, log_id, started: Instant::now(), progress: 0, finished: false })
	}

	pub fn log_id(&self) -> Uuid {
		self.log_id
	}

	/// Rows committed so far. Reported if the guard is dropped without completion.
	pub fn set_progress(&mut self, records_affected: u64) {
		self.progress = records_affected;
	}

	pub async fn complete(
		self,
		records_affected: u64,
		parameters: Map<String, Value>,
	) -> Result<()> {
		self.finalize(OperationStatus::Completed, records_affected, None, parameters).await
	}

	/// `message` is sanitized and truncated before it is stored.
	pub async fn fail(
		self,
		records_affected: u64,
		message: &str,
		parameters: Map<String, Value>,
	) -> Result<()> {
		let message = redact::sanitize_error(message);

		self.finalize(OperationStatus::Failed, records_affected, Some(message), parameters).await
	}

	async fn finalize(
		mut self,
		status: OperationStatus,
		records_affected: u64,
		error_message: Option<String>,
		parameters: Map<String, Value>,
	) -> Result<()> {
		let finish = LogFinish {
			status,
			records_affected,
			error_message,
			parameters,
			completed_at: OffsetDateTime::now_utc(),
			duration_ms: elapsed_ms(self.started),
		};
		let applied = self.logger.finish(self.log_id, &finish).await?;

		self.finished = true;

		if !applied {
			tracing::warn!(log_id = %self.log_id, "Log entry was already terminal.");
		}

		Ok(())
	}
}
impl Drop for LogGuard {
	fn drop(&mut self) {
		if self.finished {
			return;
		}

		let log_id = self.log_id;
		let Ok(handle) = Handle::try_current() else {
			tracing::error!(%log_id, "No runtime available to finalize an aborted log entry.");

			return;
		};
		let logger = self.logger.clone();
		let finish = LogFinish {
			status: OperationStatus::Failed,
			records_affected: self.progress,
			error_message: Some(ABORTED_MESSAGE.to_string()),
			parameters: Map::from_iter([("aborted".to_string(), Value::Bool(true))]),
			completed_at: OffsetDateTime::now_utc(),
			duration_ms: elapsed_ms(self.started),
		};

		tracing::warn!(%log_id, "Log guard dropped without completion; marking entry failed.");

		handle.spawn(async move {
			if let Err(err) = logger.finish(log_id, &finish).await {
				tracing::error!(%log_id, error = %err, "Failed to finalize aborted log entry.");
			}
		});
	}
}

fn elapsed_ms(started: Instant) -> u64 {
	u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
