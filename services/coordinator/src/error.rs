use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sea_orm::{DbErr, SqlErr};
use uuid::Uuid;

/// Coordinator error variants surfaced to callers of the mutation layer.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("could not acquire lock {key} within {waited:?}")]
    LockAcquisitionFailed { key: String, waited: Duration },
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
    #[error("{entity} {id} was modified concurrently (expected version {expected}, found {actual})")]
    OptimisticConflict {
        entity: &'static str,
        id: Uuid,
        expected: i64,
        actual: i64,
    },
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl CoordinatorError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::LockAcquisitionFailed { .. } => "LOCK_TIMEOUT",
            Self::Transient(_) => "TRANSIENT",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::OptimisticConflict { .. } => "CONFLICT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Transient errors are re-run in place by `TransactionScope::run_with_retry`.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the upstream caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockAcquisitionFailed { .. } | Self::Transient(_) | Self::RetryExhausted { .. }
        )
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Serialization failures, deadlocks and SQLite busy errors are worth re-running.
pub fn is_transient_db_error(err: &DbErr) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    [
        "could not serialize access",
        "deadlock detected",
        "database is locked",
        "database table is locked",
        "40001",
        "40p01",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

impl From<DbErr> for CoordinatorError {
    fn from(err: DbErr) -> Self {
        if is_transient_db_error(&err) {
            return Self::Transient(err.to_string());
        }
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            return Self::Internal(anyhow::anyhow!("unique constraint violated: {detail}"));
        }
        Self::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::OptimisticConflict { .. } => StatusCode::CONFLICT,
            Self::LockAcquisitionFailed { .. }
            | Self::Transient(_)
            | Self::RetryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Only 500s are logged here; everything else is an expected outcome for the caller.
        if let Self::Internal(ref e) = self {
            tracing::error!(error = %e, kind = "INTERNAL", "internal error");
        }
        let mut response = (
            status,
            axum::Json(serde_json::json!({
                "kind": self.kind(),
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            })),
        )
            .into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from_static("1"),
            );
        }
        response
    }
}

/// Outcome of one publish attempt, as classified by the transport.
///
/// Both kinds count against the message's `max_retries`; the kind is kept
/// for the dead-letter reason and logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Broker down, failing over, or timed out.
    #[error("transient publish failure: {0}")]
    Transient(String),
    /// The broker rejected the command or the payload did not serialize.
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}
