use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("Unknown {kind}: {value}.")]
pub struct UnknownVariant {
	pub kind: &'static str,
	pub value: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
	TtlCleanup,
	ForgetUser,
	PurgeDeleted,
	MigrationApply,
	HealthCheck,
}
impl OperationType {
	pub const ALL: [Self; 5] = [
		Self::TtlCleanup,
		Self::ForgetUser,
		Self::PurgeDeleted,
		Self::MigrationApply,
		Self::HealthCheck,
	];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::TtlCleanup => "ttl_cleanup",
			Self::ForgetUser => "forget_user",
			Self::PurgeDeleted => "purge_deleted",
			Self::MigrationApply => "migration_apply",
			Self::HealthCheck => "health_check",
		}
	}
}
impl fmt::Display for OperationType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for OperationType {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|op| op.as_str() == s.trim())
			.ok_or_else(|| UnknownVariant { kind: "operation type", value: s.to_string() })
	}
}

/// Lifecycle of a log entry. `Running` may move to exactly one terminal state.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Running,
	Completed,
	Failed,
}
impl OperationStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	pub const fn is_terminal(self) -> bool {
		!matches!(self, Self::Running)
	}
}
impl fmt::Display for OperationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for OperationStatus {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"running" => Ok(Self::Running),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			other => Err(UnknownVariant { kind: "operation status", value: other.to_string() }),
		}
	}
}
