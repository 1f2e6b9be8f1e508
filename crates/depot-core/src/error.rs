//! # Error Types
//!
//! Domain-specific error types for depot-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  depot-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Malformed input, rejected before any tx        │
//! │                                                                         │
//! │  depot-db errors (separate crate)                                      │
//! │  └── DbError          - Database failures, Busy, Rule(CoreError)       │
//! │                                                                         │
//! │  depot-engine errors (separate crate)                                  │
//! │  └── EngineError      - What callers see (code + retryable flag)       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
///
/// These are raised by pure rule checks here and by the locked sections of
/// the ledger primitives in depot-db, which wrap them in `DbError::Rule`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A stock debit asked for more than the branch holds.
    ///
    /// ## User Workflow
    /// ```text
    /// Approve voucher (line 1: qty 5)
    ///      │
    ///      ▼
    /// StockLedger.debit: current_quantity = 3
    ///      │
    ///      ▼
    /// InsufficientStock { available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Transaction rolls back, voucher stays DRAFT
    /// ```
    #[error("Insufficient stock for product {product_id} in branch {branch_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        branch_id: String,
        available: i64,
        requested: i64,
    },

    /// No sequence row exists for the entity type and year, and no
    /// auto-reset predecessor to derive one from.
    #[error("Sequence not configured for {entity_type} in year {year}")]
    SequenceNotConfigured { entity_type: String, year: i32 },

    /// The sequence reached `max_value` and does not auto-reset.
    ///
    /// Requires operator intervention (range reconfiguration).
    #[error("Sequence exhausted for {entity_type} in year {year}: max {max_value}")]
    SequenceExhausted {
        entity_type: String,
        year: i32,
        max_value: i64,
    },

    /// The requested transition is not an edge of the state machine.
    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    /// The entity already reached a state that allows no further change of
    /// the requested kind (approving an approved voucher, clearing a
    /// cleared cheque).
    #[error("{entity} {id} is already {status}")]
    AlreadyInTerminalState {
        entity: String,
        id: String,
        status: String,
    },

    /// A reversal whose downstream effects cannot be undone safely.
    #[error("Illegal reversal: {reason}")]
    IllegalReversal { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an AlreadyInTerminalState error.
    pub fn terminal(entity: impl Into<String>, id: impl Into<String>, status: impl ToString) -> Self {
        CoreError::AlreadyInTerminalState {
            entity: entity.into(),
            id: id.into(),
            status: status.to_string(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any transaction opens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format or inconsistent combination of fields.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Value appears more than once where it must be unique.
    #[error("{field} '{value}' is duplicated")]
    Duplicate { field: String, value: String },

    /// Referenced entity does not exist or is inactive.
    #[error("{field} refers to unknown or inactive {entity} '{value}'")]
    UnknownReference {
        field: String,
        entity: String,
        value: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
