use std::borrow::Cow;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(sqlx::Error),
	#[error("Storage unavailable: {0}")]
	Unavailable(String),
	#[error("Constraint violation: {0}")]
	ConstraintViolation(String),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
impl Error {
	/// Transient failures are worth retrying with backoff. Everything else fails the unit of work.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Unavailable(_))
	}
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		match classify(&err) {
			Class::Transient => Self::Unavailable(err.to_string()),
			Class::Constraint(message) => Self::ConstraintViolation(message),
			Class::Other => Self::Sqlx(err),
		}
	}
}

enum Class {
	Transient,
	Constraint(String),
	Other,
}

fn classify(err: &sqlx::Error) -> Class {
	match err {
		sqlx::Error::Database(db) => {
			let code = db.code().unwrap_or(Cow::Borrowed(""));

			// Class 23 is integrity violations; 08 connection loss; 53 resources; 57P shutdown;
			// 40001/40P01 serialization and deadlock aborts.
			if code.starts_with("23") {
				Class::Constraint(db.message().to_string())
			} else if code.starts_with("08")
				|| code.starts_with("53")
				|| code.starts_with("57P")
				|| code == "40001"
				|| code == "40P01"
			{
				Class::Transient
			} else {
				Class::Other
			}
		},
		sqlx::Error::Io(_)
		| sqlx::Error::Tls(_)
		| sqlx::Error::Protocol(_)
		| sqlx::Error::PoolTimedOut
		| sqlx::Error::PoolClosed
		| sqlx::Error::WorkerCrashed => Class::Transient,
		_ => Class::Other,
	}
}
