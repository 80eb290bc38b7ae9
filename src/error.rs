//! Error taxonomy shared by the ledger store, the transaction service, and
//! the HTTP layer. Every variant maps to exactly one HTTP status; no variant
//! carries a SQL string or a debug-formatted driver error out to a caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sqlx::Error as SqlxError;

/// PostgreSQL SQLSTATE codes this service treats specially.
///
/// Reference: <https://www.postgresql.org/docs/current/errcodes-appendix.html>
mod pg_error_codes {
    /// Class 40 — Transaction Rollback.
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    /// Class 23 — Integrity Constraint Violation.
    pub const UNIQUE_VIOLATION: &str = "23505";
}

/// Errors raised by [`crate::ledger::LedgerStore`].
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("transaction already exists")]
    TransactionDuplicate,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("user not found")]
    NotFound,

    #[error("transient database error, retry budget exhausted")]
    Transient,

    #[error("internal storage error: {0}")]
    Internal(anyhow::Error),
}

impl From<SqlxError> for LedgerError {
    fn from(err: SqlxError) -> Self {
        if let SqlxError::RowNotFound = err {
            return LedgerError::NotFound;
        }
        if sqlstate(&err).as_deref() == Some(pg_error_codes::UNIQUE_VIOLATION) {
            return LedgerError::TransactionDuplicate;
        }
        LedgerError::Internal(err.into())
    }
}

fn sqlstate(err: &SqlxError) -> Option<std::borrow::Cow<'_, str>> {
    err.as_database_error()?.code()
}

/// Determines if a database error is a serialization or deadlock conflict,
/// using the driver's SQLSTATE rather than matching on message text.
pub(crate) fn is_retryable(err: &SqlxError) -> bool {
    matches!(
        sqlstate(err).as_deref(),
        Some(pg_error_codes::SERIALIZATION_FAILURE) | Some(pg_error_codes::DEADLOCK_DETECTED)
    )
}

/// Errors raised by [`crate::service::TransactionService`], one level up from
/// the store. This is the type the HTTP layer converts to a response.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error("transaction already exists")]
    TransactionDuplicate,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("internal server error")]
    Transient,

    #[error("internal server error")]
    Internal,
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::TransactionDuplicate => ServiceError::TransactionDuplicate,
            LedgerError::InsufficientFunds => ServiceError::InsufficientFunds,
            LedgerError::NotFound => ServiceError::BadRequest("invalid user".to_string()),
            LedgerError::Transient => ServiceError::Transient,
            LedgerError::Internal(_) => ServiceError::Internal,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServiceError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServiceError::TransactionDuplicate => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            ServiceError::InsufficientFunds => (StatusCode::BAD_REQUEST, self.to_string()),
            ServiceError::Transient => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ServiceError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
