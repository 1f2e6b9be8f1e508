//! # Payments & Cheques
//!
//! Payment records and the cheque state machine.
//!
//! ## Cheque Lifecycle
//! ```text
//!                 clear()
//!   ┌─────────┐ ──────────► ┌─────────┐
//!   │ PENDING │             │ CLEARED │   no ledger effect
//!   └─────────┘ ──────────► └─────────┘
//!        │       return_cheque()
//!        │                  ┌──────────┐
//!        └────────────────► │ RETURNED │   debit = amount
//!                           └──────────┘
//!
//!   cancel_payment() deletes a PENDING cheque together with its payment.
//!   CLEARED and RETURNED are terminal.
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::validation::{validate_amount, validate_id, validate_notes, validate_text, ValidationResult};

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Cheque,
    BankTransfer,
}

// =============================================================================
// Cheque Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChequeStatus {
    Pending,
    Cleared,
    Returned,
}

impl Default for ChequeStatus {
    fn default() -> Self {
        ChequeStatus::Pending
    }
}

impl ChequeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChequeStatus::Pending)
    }

    /// Checks that a cheque in this status may move to `to`.
    ///
    /// ## Errors
    /// `AlreadyInTerminalState` when the cheque is cleared or returned.
    pub fn ensure_transition(&self, cheque_id: &str, to: ChequeStatus) -> CoreResult<()> {
        if self.is_terminal() {
            return Err(CoreError::terminal("Cheque", cheque_id, self));
        }
        if to == ChequeStatus::Pending {
            return Err(CoreError::InvalidTransition {
                entity: "Cheque".to_string(),
                id: cheque_id.to_string(),
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ChequeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChequeStatus::Pending => "PENDING",
            ChequeStatus::Cleared => "CLEARED",
            ChequeStatus::Returned => "RETURNED",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Cheque
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Cheque {
    pub id: String,
    pub customer_id: String,
    pub cheque_number: String,
    pub bank_name: String,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
    pub amount: Money,
    pub status: ChequeStatus,
    pub payment_id: Option<String>,
    pub issue_voucher_id: Option<String>,
    pub cleared_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub cleared_at: Option<DateTime<Utc>>,
    pub returned_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub returned_at: Option<DateTime<Utc>>,
    pub return_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Cheque {
    /// Pending and past its due date.
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.status == ChequeStatus::Pending && self.due_date < as_of
    }
}

/// Cheque fields captured with a cheque payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChequeDetails {
    pub cheque_number: String,
    pub bank_name: String,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
}

impl ChequeDetails {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_text("cheque_number", &self.cheque_number, 50)?;
        validate_text("bank_name", &self.bank_name, 100)
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A recorded customer payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    /// From the `payments` sequence (PAY-00001).
    pub payment_number: String,
    pub customer_id: String,
    #[ts(as = "String")]
    pub payment_date: NaiveDate,
    pub amount: Money,
    pub method: PaymentMethod,
    pub cheque_id: Option<String>,
    pub issue_voucher_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Payload of `ChequePaymentEngine::record_payment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewPayment {
    pub customer_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
    #[ts(as = "String")]
    pub payment_date: NaiveDate,
    /// Required for cheque payments, forbidden otherwise.
    pub cheque: Option<ChequeDetails>,
    pub issue_voucher_id: Option<String>,
    pub notes: Option<String>,
}

impl NewPayment {
    /// Shape checks that need no database access.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::NaiveDate;
    /// use depot_core::money::Money;
    /// use depot_core::payment::{NewPayment, PaymentMethod};
    ///
    /// let payment = NewPayment {
    ///     customer_id: "550e8400-e29b-41d4-a716-446655440000".into(),
    ///     amount: Money::from_cents(50000),
    ///     method: PaymentMethod::Cheque,
    ///     payment_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
    ///     cheque: None,
    ///     issue_voucher_id: None,
    ///     notes: None,
    /// };
    /// assert!(payment.validate().is_err()); // cheque details missing
    /// ```
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("customer_id", &self.customer_id)?;
        validate_amount("amount", self.amount)?;
        validate_notes(self.notes.as_deref())?;
        if let Some(voucher_id) = &self.issue_voucher_id {
            validate_id("issue_voucher_id", voucher_id)?;
        }

        match (&self.method, &self.cheque) {
            (PaymentMethod::Cheque, Some(details)) => details.validate(),
            (PaymentMethod::Cheque, None) => Err(ValidationError::Required {
                field: "cheque".to_string(),
            }),
            (_, Some(_)) => Err(ValidationError::InvalidFormat {
                field: "cheque".to_string(),
                reason: "cheque details are only allowed for cheque payments".to_string(),
            }),
            (_, None) => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
