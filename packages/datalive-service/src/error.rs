use serde::Serialize;

use datalive_domain::{ClassifyError, SourceTag, UnknownStrategy};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
	EmptyQuery,
	QueryTooLong,
	InvalidStrategy,
	InvalidParameter,
}
impl ValidationCode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::EmptyQuery => "EMPTY_QUERY",
			Self::QueryTooLong => "QUERY_TOO_LONG",
			Self::InvalidStrategy => "INVALID_STRATEGY",
			Self::InvalidParameter => "INVALID_PARAMETER",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	Error,
	Timeout,
	Panicked,
}

/// One adapter that did not contribute to a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterFailure {
	pub source: SourceTag,
	pub kind: FailureKind,
	pub message: String,
}

/// Errors are `Clone` so every caller collapsed onto one in-flight computation shares its outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("{message}")]
	Validation { code: ValidationCode, message: String },
	#[error("Retrieval failed: {message}")]
	Retrieval { message: String, failures: Vec<AdapterFailure> },
	#[error("Timed out: {message}")]
	Timeout { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
	#[error("Cache error: {message}")]
	Cache { message: String },
}
impl Error {
	pub(crate) fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
		Self::Validation { code, message: message.into() }
	}
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}
impl From<datalive_storage::Error> for Error {
	fn from(err: datalive_storage::Error) -> Self {
		match err {
			datalive_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			datalive_storage::Error::InvalidArgument(message) => Self::Storage { message },
			datalive_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}
impl From<color_eyre::Report> for Error {
	fn from(err: color_eyre::Report) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
impl From<ClassifyError> for Error {
	fn from(err: ClassifyError) -> Self {
		let code = match err {
			ClassifyError::Empty => ValidationCode::EmptyQuery,
			ClassifyError::TooLong { .. } => ValidationCode::QueryTooLong,
		};

		Self::validation(code, err.to_string())
	}
}
impl From<UnknownStrategy> for Error {
	fn from(err: UnknownStrategy) -> Self {
		Self::validation(ValidationCode::InvalidStrategy, err.to_string())
	}
}
