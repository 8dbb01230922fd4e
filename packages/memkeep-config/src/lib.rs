mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Postgres, Provenance, Retry, Service, Storage};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::Read { path: path.to_path_buf(), source: err })?;

	parse(&raw).map_err(|err| match err {
		Error::Parse { source, .. } => Error::Parse { path: path.to_path_buf(), source },
		other => other,
	})
}

pub fn parse(raw: &str) -> Result<Config> {
	let mut cfg: Config =
		toml::from_str(raw).map_err(|err| Error::Parse { path: Default::default(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::invalid("service.log_level", "must be non-empty."));
	}

	validate_postgres(
		"storage.postgres.dsn",
		"storage.postgres.pool_max_conns",
		&cfg.storage.postgres,
	)?;

	if let Some(purge) = cfg.storage.purge_postgres.as_ref() {
		validate_postgres(
			"storage.purge_postgres.dsn",
			"storage.purge_postgres.pool_max_conns",
			purge,
		)?;
	}

	if cfg.retry.max_attempts == 0 {
		return Err(Error::invalid("retry.max_attempts", "must be greater than zero."));
	}
	if cfg.retry.base_backoff_ms == 0 {
		return Err(Error::invalid("retry.base_backoff_ms", "must be greater than zero."));
	}
	if cfg.retry.base_backoff_ms > cfg.retry.max_backoff_ms {
		return Err(Error::invalid(
			"retry.max_backoff_ms",
			"must be greater than or equal to retry.base_backoff_ms.",
		));
	}

	if let Some(provenance) = cfg.provenance.as_ref() {
		if provenance.pipeline_id.trim().is_empty() {
			return Err(Error::invalid("provenance.pipeline_id", "must be non-empty."));
		}
		if provenance.pipeline_version.as_deref().is_some_and(|version| version.trim().is_empty())
		{
			return Err(Error::invalid(
				"provenance.pipeline_version",
				"must be non-empty when present.",
			));
		}
	}

	Ok(())
}

fn validate_postgres(
	dsn_field: &'static str,
	pool_field: &'static str,
	pg: &Postgres,
) -> Result<()> {
	if pg.dsn.trim().is_empty() {
		return Err(Error::invalid(dsn_field, "must be non-empty."));
	}
	if pg.pool_max_conns == 0 {
		return Err(Error::invalid(pool_field, "must be greater than zero."));
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();

	if let Some(provenance) = cfg.provenance.as_mut() {
		provenance.pipeline_id = provenance.pipeline_id.trim().to_string();
		provenance.pipeline_version =
			provenance.pipeline_version.take().map(|version| version.trim().to_string());
	}
}
