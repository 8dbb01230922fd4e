use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Failed to read maintenance config at {path:?}.")]
	Read { path: PathBuf, source: std::io::Error },
	#[error("Failed to parse maintenance config at {path:?}.")]
	Parse { path: PathBuf, source: toml::de::Error },
	#[error("{field} {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
		Self::Validation { field, reason: reason.into() }
	}

	pub fn field(&self) -> Option<&'static str> {
		match self {
			Self::Validation { field, .. } => Some(field),
			_ => None,
		}
	}
}
