use memkeep_domain::PolicyError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Config error: {message}")]
	Config { message: String },
	#[error("Storage unavailable: {message}")]
	StorageUnavailable { message: String },
	#[error("Constraint violation: {message}")]
	ConstraintViolation { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Purge not permitted: {message}")]
	PurgeNotPermitted { message: String },
	#[error("Run lock lost: {message}")]
	LockLost { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::StorageUnavailable { .. })
	}
}
impl From<memkeep_storage::Error> for Error {
	fn from(err: memkeep_storage::Error) -> Self {
		match err {
			memkeep_storage::Error::Unavailable(message) => Self::StorageUnavailable { message },
			memkeep_storage::Error::ConstraintViolation(message) =>
				Self::ConstraintViolation { message },
			memkeep_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			memkeep_storage::Error::NotFound(message) => Self::NotFound { message },
			memkeep_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			memkeep_storage::Error::Json(inner) => Self::Storage { message: inner.to_string() },
		}
	}
}
impl From<PolicyError> for Error {
	fn from(err: PolicyError) -> Self {
		Self::Config { message: err.to_string() }
	}
}
