use std::time::Duration;

use memkeep_config::Retry;

/// Exponential backoff for retrying a batch after a transient storage failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
	pub max_attempts: u32,
	base_ms: u64,
	max_ms: u64,
}
impl Backoff {
	pub const fn new(max_attempts: u32, base_ms: u64, max_ms: u64) -> Self {
		Self { max_attempts, base_ms, max_ms }
	}

	/// Delay before retry number `attempt` (1-based). Doubles per attempt and saturates at the
	/// configured ceiling.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exp = attempt.max(1).saturating_sub(1).min(16);
		let millis = self.base_ms.saturating_mul(1_u64 << exp).min(self.max_ms);

		Duration::from_millis(millis)
	}

	pub fn allows_retry_after(&self, attempt: u32) -> bool {
		attempt < self.max_attempts
	}
}
impl From<&Retry> for Backoff {
	fn from(cfg: &Retry) -> Self {
		Self::new(cfg.max_attempts, cfg.base_backoff_ms, cfg.max_backoff_ms)
	}
}
impl Default for Backoff {
	fn default() -> Self {
		Self::from(&Retry::default())
	}
}
