//! # Engine Error Types
//!
//! What callers of the engines see when an operation fails.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Depot                                  │
//! │                                                                         │
//! │  ValidationError ──┐                                                   │
//! │  (depot-core)      │                                                   │
//! │                    ▼                                                   │
//! │  CoreError ──────► EngineError ──► code()          "INSUFFICIENT_STOCK"│
//! │  (depot-core)      ▲               is_retryable()  true only for Busy  │
//! │                    │               ErrorPayload    { code, message }   │
//! │  DbError ──────────┘                                                   │
//! │  (depot-db)   Rule(CoreError) unwrapped, Busy kept, the rest is        │
//! │               logged and reported as DATABASE_ERROR                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A returned error means nothing was committed: every operation runs in one
//! transaction and an error drops it.

use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

use depot_core::error::{CoreError, ValidationError};
use depot_core::stock::StockShortage;
use depot_db::DbError;

/// Errors returned by the engines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input or a reference to a missing/inactive row.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Stock could not cover a debit.
    ///
    /// Approval reports shortages as `ApprovalResult::Rejected` instead; this
    /// error comes from cancellations whose reversal debit finds the goods
    /// already gone.
    #[error("Insufficient stock on {} line(s)", shortages.len())]
    InsufficientStock { shortages: Vec<StockShortage> },

    #[error("Sequence exhausted for {entity_type} in year {year}: max {max_value}")]
    SequenceExhausted {
        entity_type: String,
        year: i32,
        max_value: i64,
    },

    #[error("Sequence not configured for {entity_type} in year {year}")]
    SequenceNotConfigured { entity_type: String, year: i32 },

    #[error("{entity} {id} is already {status}")]
    AlreadyInTerminalState {
        entity: String,
        id: String,
        status: String,
    },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    #[error("Illegal reversal: {reason}")]
    IllegalReversal { reason: String },

    /// The database lock was not granted in time. The whole operation may be
    /// run again.
    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Any other storage failure. Details are logged, not returned.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-readable error codes.
///
/// ## Usage in a Controller
/// ```typescript
/// switch (e.code) {
///   case 'INSUFFICIENT_STOCK': showShortages(e.message); break;
///   case 'BUSY':               retryLater(); break;
///   case 'ALREADY_IN_TERMINAL_STATE': refresh(); break;
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InsufficientStock,
    SequenceExhausted,
    SequenceNotConfigured,
    AlreadyInTerminalState,
    InvalidTransition,
    IllegalReversal,
    Busy,
    NotFound,
    DatabaseError,
    ConfigError,
}

/// Serializable form of an [`EngineError`].
///
/// ```json
/// { "code": "NOT_FOUND", "message": "Voucher not found: 9b1d...", "retryable": false }
/// ```
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation(_) => ErrorCode::ValidationError,
            EngineError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            EngineError::SequenceExhausted { .. } => ErrorCode::SequenceExhausted,
            EngineError::SequenceNotConfigured { .. } => ErrorCode::SequenceNotConfigured,
            EngineError::AlreadyInTerminalState { .. } => ErrorCode::AlreadyInTerminalState,
            EngineError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            EngineError::IllegalReversal { .. } => ErrorCode::IllegalReversal,
            EngineError::Busy(_) => ErrorCode::Busy,
            EngineError::NotFound { .. } => ErrorCode::NotFound,
            EngineError::Database(_) => ErrorCode::DatabaseError,
            EngineError::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// Only lock timeouts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// A reference field naming a row that is missing or inactive.
    pub fn unknown_reference(field: &str, entity: &str, value: &str) -> Self {
        EngineError::Validation(ValidationError::UnknownReference {
            field: field.to_string(),
            entity: entity.to_string(),
            value: value.to_string(),
        })
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InsufficientStock {
                product_id,
                branch_id,
                available,
                requested,
            } => EngineError::InsufficientStock {
                shortages: vec![StockShortage {
                    line_no: 0,
                    product_id,
                    branch_id,
                    requested,
                    available,
                    shortage: requested - available,
                    suggestions: Vec::new(),
                }],
            },
            CoreError::SequenceNotConfigured { entity_type, year } => {
                EngineError::SequenceNotConfigured { entity_type, year }
            }
            CoreError::SequenceExhausted {
                entity_type,
                year,
                max_value,
            } => EngineError::SequenceExhausted {
                entity_type,
                year,
                max_value,
            },
            CoreError::InvalidTransition { entity, id, from, to } => {
                EngineError::InvalidTransition { entity, id, from, to }
            }
            CoreError::AlreadyInTerminalState { entity, id, status } => {
                EngineError::AlreadyInTerminalState { entity, id, status }
            }
            CoreError::IllegalReversal { reason } => EngineError::IllegalReversal { reason },
            CoreError::Validation(e) => EngineError::Validation(e),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Rule(core) => core.into(),
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            DbError::UniqueViolation { field, value } => {
                EngineError::Validation(ValidationError::Duplicate { field, value })
            }
            DbError::Busy(reason) => {
                tracing::warn!(%reason, "Database busy");
                EngineError::Busy(reason)
            }
            DbError::PoolExhausted => EngineError::Busy("connection pool exhausted".to_string()),
            other => {
                // Log the actual error, return the summary
                tracing::error!(error = %other, "Database operation failed");
                EngineError::Database(other.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_errors_unwrap() {
        let err: EngineError = DbError::Rule(CoreError::terminal("Voucher", "v1", "approved")).into();
        assert_eq!(err.code(), ErrorCode::AlreadyInTerminalState);
        assert!(!err.is_retryable());

        let err: EngineError = DbError::Rule(CoreError::InsufficientStock {
            product_id: "p1".to_string(),
            branch_id: "b1".to_string(),
            available: 3,
            requested: 5,
        })
        .into();
        match err {
            EngineError::InsufficientStock { shortages } => assert_eq!(shortages[0].shortage, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_only_busy_is_retryable() {
        let busy: EngineError = DbError::Busy("database is locked".to_string()).into();
        assert!(busy.is_retryable());
        assert_eq!(busy.code(), ErrorCode::Busy);

        let exhausted: EngineError = DbError::PoolExhausted.into();
        assert!(exhausted.is_retryable());

        let missing: EngineError = DbError::not_found("Voucher", "v1").into();
        assert!(!missing.is_retryable());
        assert_eq!(missing.code(), ErrorCode::NotFound);

        let corrupt: EngineError = DbError::corrupt("vouchers", "bad discount").into();
        assert_eq!(corrupt.code(), ErrorCode::DatabaseError);
    }

    #[test]
    fn test_payload_serialization() {
        let err = EngineError::IllegalReversal {
            reason: "cheque already cleared".to_string(),
        };
        let json = serde_json::to_value(err.payload()).unwrap();
        assert_eq!(json["code"], "ILLEGAL_REVERSAL");
        assert_eq!(json["retryable"], false);
        assert_eq!(json["message"], "Illegal reversal: cheque already cleared");
    }
}
