use std::{fmt, str::FromStr};

use serde::Serialize;
use time::{Duration, OffsetDateTime};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PolicyError {
	#[error("Maintenance config key {key} has invalid value {value:?}: {reason}.")]
	Invalid { key: &'static str, value: String, reason: &'static str },
	#[error("Unknown maintenance config key {0:?}.")]
	UnknownKey(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ValueKind {
	/// Strictly positive integer.
	Positive,
	/// Zero disables the limit.
	Budget,
	Flag,
}

/// Operator-tunable maintenance settings stored in `memory_maintenance_config`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKey {
	TtlCleanupDays,
	TtlCleanupBatchSize,
	ForgetUserBatchSize,
	MaintenanceEnabled,
	PurgeAfterDays,
	PurgeBatchSize,
	RunBudgetSeconds,
	RunRowBudget,
	RunLockLeaseSeconds,
}
impl PolicyKey {
	pub const ALL: [Self; 9] = [
		Self::TtlCleanupDays,
		Self::TtlCleanupBatchSize,
		Self::ForgetUserBatchSize,
		Self::MaintenanceEnabled,
		Self::PurgeAfterDays,
		Self::PurgeBatchSize,
		Self::RunBudgetSeconds,
		Self::RunRowBudget,
		Self::RunLockLeaseSeconds,
	];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::TtlCleanupDays => "ttl_cleanup_days",
			Self::TtlCleanupBatchSize => "ttl_cleanup_batch_size",
			Self::ForgetUserBatchSize => "forget_user_batch_size",
			Self::MaintenanceEnabled => "maintenance_enabled",
			Self::PurgeAfterDays => "purge_after_days",
			Self::PurgeBatchSize => "purge_batch_size",
			Self::RunBudgetSeconds => "run_budget_seconds",
			Self::RunRowBudget => "run_row_budget",
			Self::RunLockLeaseSeconds => "run_lock_lease_seconds",
		}
	}

	pub const fn description(self) -> &'static str {
		match self {
			Self::TtlCleanupDays =>
				"Records older than this many days are soft-deleted by TTL cleanup.",
			Self::TtlCleanupBatchSize => "Maximum rows soft-deleted per TTL cleanup batch.",
			Self::ForgetUserBatchSize => "Maximum rows soft-deleted per forget-user batch.",
			Self::MaintenanceEnabled =>
				"Global switch for TTL cleanup, forget-user and purge runs.",
			Self::PurgeAfterDays =>
				"Soft-deleted rows older than this many days may be physically purged.",
			Self::PurgeBatchSize => "Maximum rows physically deleted per purge batch.",
			Self::RunBudgetSeconds =>
				"Wall-clock budget per run; no new batch starts after it elapses. 0 disables.",
			Self::RunRowBudget => "Maximum rows touched per table per run. 0 disables.",
			Self::RunLockLeaseSeconds =>
				"Lease on the per-table run lock; an expired lease may be taken over.",
		}
	}

	pub const fn default_value(self) -> &'static str {
		match self {
			Self::TtlCleanupDays => "30",
			Self::TtlCleanupBatchSize => "1000",
			Self::ForgetUserBatchSize => "1000",
			Self::MaintenanceEnabled => "true",
			Self::PurgeAfterDays => "30",
			Self::PurgeBatchSize => "1000",
			Self::RunBudgetSeconds => "0",
			Self::RunRowBudget => "0",
			Self::RunLockLeaseSeconds => "3600",
		}
	}

	const fn kind(self) -> ValueKind {
		match self {
			Self::MaintenanceEnabled => ValueKind::Flag,
			Self::RunBudgetSeconds | Self::RunRowBudget => ValueKind::Budget,
			_ => ValueKind::Positive,
		}
	}

	/// Checks `raw` against the key's declared type and returns the canonical string form.
	pub fn normalize(self, raw: &str) -> Result<String, PolicyError> {
		match self.kind() {
			ValueKind::Flag => parse_flag(self, raw).map(|flag| flag.to_string()),
			ValueKind::Positive | ValueKind::Budget =>
				parse_number(self, raw).map(|number| number.to_string()),
		}
	}
}
impl fmt::Display for PolicyKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for PolicyKey {
	type Err = PolicyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|key| key.as_str() == s.trim())
			.ok_or_else(|| PolicyError::UnknownKey(s.to_string()))
	}
}

/// Resolved policy for one maintenance run. Absent keys fall back to their defaults.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MaintenancePolicy {
	pub ttl_cleanup_days: u32,
	pub ttl_cleanup_batch_size: u32,
	pub forget_user_batch_size: u32,
	pub maintenance_enabled: bool,
	pub purge_after_days: u32,
	pub purge_batch_size: u32,
	pub run_budget_seconds: u64,
	pub run_row_budget: u64,
	pub run_lock_lease_seconds: u32,
}
impl MaintenancePolicy {
	/// Builds a policy from `(key, value)` pairs. Unknown keys are ignored so operators can keep
	/// unrelated settings in the same table.
	pub fn from_entries<'a, I>(entries: I) -> Result<Self, PolicyError>
	where
		I: IntoIterator<Item = (&'a str, &'a str)>,
	{
		let mut policy = Self::default();

		for (key, value) in entries {
			let Ok(key) = key.parse::<PolicyKey>() else {
				continue;
			};

			policy.apply(key, value)?;
		}

		Ok(policy)
	}

	pub fn is_enabled(&self) -> bool {
		self.maintenance_enabled
	}

	pub fn get(&self, key: PolicyKey) -> String {
		match key {
			PolicyKey::TtlCleanupDays => self.ttl_cleanup_days.to_string(),
			PolicyKey::TtlCleanupBatchSize => self.ttl_cleanup_batch_size.to_string(),
			PolicyKey::ForgetUserBatchSize => self.forget_user_batch_size.to_string(),
			PolicyKey::MaintenanceEnabled => self.maintenance_enabled.to_string(),
			PolicyKey::PurgeAfterDays => self.purge_after_days.to_string(),
			PolicyKey::PurgeBatchSize => self.purge_batch_size.to_string(),
			PolicyKey::RunBudgetSeconds => self.run_budget_seconds.to_string(),
			PolicyKey::RunRowBudget => self.run_row_budget.to_string(),
			PolicyKey::RunLockLeaseSeconds => self.run_lock_lease_seconds.to_string(),
		}
	}

	pub fn ttl_cutoff(&self, now: OffsetDateTime) -> OffsetDateTime {
		days_before(now, self.ttl_cleanup_days)
	}

	pub fn purge_cutoff(&self, now: OffsetDateTime) -> OffsetDateTime {
		days_before(now, self.purge_after_days)
	}

	pub fn run_budget(&self) -> Option<std::time::Duration> {
		(self.run_budget_seconds > 0)
			.then(|| std::time::Duration::from_secs(self.run_budget_seconds))
	}

	pub fn row_budget(&self) -> Option<u64> {
		(self.run_row_budget > 0).then_some(self.run_row_budget)
	}

	pub fn lock_lease(&self) -> Duration {
		Duration::seconds(i64::from(self.run_lock_lease_seconds))
	}

	fn apply(&mut self, key: PolicyKey, raw: &str) -> Result<(), PolicyError> {
		match key {
			PolicyKey::TtlCleanupDays => self.ttl_cleanup_days = parse_u32(key, raw)?,
			PolicyKey::TtlCleanupBatchSize => self.ttl_cleanup_batch_size = parse_u32(key, raw)?,
			PolicyKey::ForgetUserBatchSize => self.forget_user_batch_size = parse_u32(key, raw)?,
			PolicyKey::MaintenanceEnabled => self.maintenance_enabled = parse_flag(key, raw)?,
			PolicyKey::PurgeAfterDays => self.purge_after_days = parse_u32(key, raw)?,
			PolicyKey::PurgeBatchSize => self.purge_batch_size = parse_u32(key, raw)?,
			PolicyKey::RunBudgetSeconds => self.run_budget_seconds = parse_number(key, raw)?,
			PolicyKey::RunRowBudget => self.run_row_budget = parse_number(key, raw)?,
			PolicyKey::RunLockLeaseSeconds => self.run_lock_lease_seconds = parse_u32(key, raw)?,
		}

		Ok(())
	}
}
impl Default for MaintenancePolicy {
	fn default() -> Self {
		Self {
			ttl_cleanup_days: 30,
			ttl_cleanup_batch_size: 1_000,
			forget_user_batch_size: 1_000,
			maintenance_enabled: true,
			purge_after_days: 30,
			purge_batch_size: 1_000,
			run_budget_seconds: 0,
			run_row_budget: 0,
			run_lock_lease_seconds: 3_600,
		}
	}
}

// Windows reaching past the representable range select nothing rather than panic.
fn days_before(now: OffsetDateTime, days: u32) -> OffsetDateTime {
	now.checked_sub(Duration::days(i64::from(days))).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn parse_number(key: PolicyKey, raw: &str) -> Result<u64, PolicyError> {
	let invalid = |reason: &'static str| PolicyError::Invalid {
		key: key.as_str(),
		value: raw.to_string(),
		reason,
	};
	let value =
		raw.trim().parse::<u64>().map_err(|_| invalid("expected a non-negative integer"))?;

	if key.kind() == ValueKind::Positive && value == 0 {
		return Err(invalid("must be greater than zero"));
	}

	Ok(value)
}

fn parse_u32(key: PolicyKey, raw: &str) -> Result<u32, PolicyError> {
	let value = parse_number(key, raw)?;

	u32::try_from(value).map_err(|_| PolicyError::Invalid {
		key: key.as_str(),
		value: raw.to_string(),
		reason: "exceeds the supported range",
	})
}

fn parse_flag(key: PolicyKey, raw: &str) -> Result<bool, PolicyError> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"true" | "1" | "yes" | "on" => Ok(true),
		"false" | "0" | "no" | "off" => Ok(false),
		_ => Err(PolicyError::Invalid {
			key: key.as_str(),
			value: raw.to_string(),
			reason: "expected a boolean",
		}),
	}
}
