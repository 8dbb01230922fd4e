use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub retry: Retry,
	pub provenance: Option<Provenance>,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	/// Separate principal allowed to physically delete rows. Purge is refused when absent.
	pub purge_postgres: Option<Postgres>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

/// Retry policy for transient storage failures inside a single batch.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Retry {
	pub max_attempts: u32,
	pub base_backoff_ms: u64,
	pub max_backoff_ms: u64,
}
impl Default for Retry {
	fn default() -> Self {
		Self { max_attempts: 3, base_backoff_ms: 200, max_backoff_ms: 5_000 }
	}
}

/// Tags every log entry written by this process with the run that triggered it.
#[derive(Clone, Debug, Deserialize)]
pub struct Provenance {
	pub pipeline_id: String,
	pub pipeline_version: Option<String>,
}
