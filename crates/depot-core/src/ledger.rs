//! # Customer Ledger
//!
//! Ledger entries, postings and the balance projection used by
//! CustomerAccount.
//!
//! ## Double Entry on One Account
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Customer balance projection                         │
//! │                                                                         │
//! │  Issue voucher approved     debit  110   balance    0 → −110           │
//! │  Payment recorded           credit 500   balance −110 → 390            │
//! │  Cheque returned            debit  500   balance  390 → −110           │
//! │                                                                         │
//! │  new_balance = balance + credit − debit                                 │
//! │  Customer.balance == Σ credit − Σ debit   (at every commit)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are never updated or deleted. A reversal is a new entry with the
//! mirrored amounts and `reversal_of` pointing at the original.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::Customer;
use crate::validation::{validate_actor, ValidationResult};

// =============================================================================
// Reference Type
// =============================================================================

/// Kind of document that produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    IssueVoucher,
    ReturnVoucher,
    Payment,
    Cheque,
    Adjustment,
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceType::IssueVoucher => "issue_voucher",
            ReferenceType::ReturnVoucher => "return_voucher",
            ReferenceType::Payment => "payment",
            ReferenceType::Cheque => "cheque",
            ReferenceType::Adjustment => "adjustment",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// One append-only ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LedgerEntry {
    pub id: String,
    pub customer_id: String,
    #[ts(as = "String")]
    pub transaction_date: NaiveDate,
    pub debit: Money,
    pub credit: Money,
    /// Customer balance right after this entry.
    pub balance_after: Money,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    /// Display number of the document (ISS-00001, PAY-00003).
    pub reference_number: Option<String>,
    pub description: Option<String>,
    pub reversal_of: Option<String>,
    pub actor_id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Effect of this entry on the balance.
    pub fn delta(&self) -> Money {
        self.credit - self.debit
    }

    pub fn is_reversal(&self) -> bool {
        self.reversal_of.is_some()
    }

    /// Posting that undoes this entry.
    pub fn reversal(&self, transaction_date: NaiveDate, actor_id: &str) -> Posting {
        Posting {
            customer_id: self.customer_id.clone(),
            debit: self.credit,
            credit: self.debit,
            reference_type: self.reference_type,
            reference_id: self.reference_id.clone(),
            reference_number: self.reference_number.clone(),
            transaction_date,
            description: Some(match &self.reference_number {
                Some(number) => format!("Reversal of {}", number),
                None => format!("Reversal of {} entry", self.reference_type),
            }),
            reversal_of: Some(self.id.clone()),
            actor_id: actor_id.to_string(),
        }
    }
}

// =============================================================================
// Posting
// =============================================================================

/// Input to `CustomerAccount::post`.
///
/// Exactly one of `debit` and `credit` must be positive.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use depot_core::ledger::{Posting, ReferenceType};
/// use depot_core::money::Money;
///
/// let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
/// let posting = Posting::debit("cust-1", Money::from_cents(11000), ReferenceType::IssueVoucher, "v-1", date, "clerk")
///     .with_number("ISS-00001");
/// assert!(posting.validate().is_ok());
/// assert_eq!(posting.apply(Money::zero()).cents(), -11000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Posting {
    pub customer_id: String,
    pub debit: Money,
    pub credit: Money,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub reference_number: Option<String>,
    #[ts(as = "String")]
    pub transaction_date: NaiveDate,
    pub description: Option<String>,
    pub reversal_of: Option<String>,
    pub actor_id: String,
}

impl Posting {
    fn new(
        customer_id: impl Into<String>,
        debit: Money,
        credit: Money,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        transaction_date: NaiveDate,
        actor_id: impl Into<String>,
    ) -> Self {
        Posting {
            customer_id: customer_id.into(),
            debit,
            credit,
            reference_type,
            reference_id: reference_id.into(),
            reference_number: None,
            transaction_date,
            description: None,
            reversal_of: None,
            actor_id: actor_id.into(),
        }
    }

    /// A posting that increases what the customer owes.
    pub fn debit(
        customer_id: impl Into<String>,
        amount: Money,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        transaction_date: NaiveDate,
        actor_id: impl Into<String>,
    ) -> Self {
        Self::new(
            customer_id,
            amount,
            Money::zero(),
            reference_type,
            reference_id,
            transaction_date,
            actor_id,
        )
    }

    /// A posting that decreases what the customer owes.
    pub fn credit(
        customer_id: impl Into<String>,
        amount: Money,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        transaction_date: NaiveDate,
        actor_id: impl Into<String>,
    ) -> Self {
        Self::new(
            customer_id,
            Money::zero(),
            amount,
            reference_type,
            reference_id,
            transaction_date,
            actor_id,
        )
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.reference_number = Some(number.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn reversing(mut self, entry_id: impl Into<String>) -> Self {
        self.reversal_of = Some(entry_id.into());
        self
    }

    /// The posting with debit and credit swapped.
    pub fn offset(&self) -> Posting {
        Posting {
            debit: self.credit,
            credit: self.debit,
            ..self.clone()
        }
    }

    /// Rejects negative amounts and anything but exactly one positive side.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.debit.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "debit".to_string(),
            });
        }
        if self.credit.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "credit".to_string(),
            });
        }
        if self.debit.is_zero() && self.credit.is_zero() {
            return Err(ValidationError::InvalidFormat {
                field: "amount".to_string(),
                reason: "debit or credit must be positive".to_string(),
            });
        }
        if self.debit.is_positive() && self.credit.is_positive() {
            return Err(ValidationError::InvalidFormat {
                field: "amount".to_string(),
                reason: "only one of debit and credit may be set".to_string(),
            });
        }
        if self.reference_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "reference_id".to_string(),
            });
        }
        validate_actor(&self.actor_id)
    }

    /// Balance after applying this posting to `balance`.
    pub fn apply(&self, balance: Money) -> Money {
        balance + self.credit - self.debit
    }
}

// =============================================================================
// Balances
// =============================================================================

/// Whether a customer owes, is owed, or is square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    /// Owes us (negative balance).
    Debtor,
    /// We owe them (positive balance).
    Creditor,
    Settled,
}

impl BalanceStatus {
    pub fn of(balance: Money) -> Self {
        if balance.is_negative() {
            BalanceStatus::Debtor
        } else if balance.is_positive() {
            BalanceStatus::Creditor
        } else {
            BalanceStatus::Settled
        }
    }
}

/// One row of the balances report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustomerBalance {
    pub customer_id: String,
    pub code: String,
    pub name: String,
    pub balance: Money,
    pub credit_limit: Money,
    pub status: BalanceStatus,
}

impl From<&Customer> for CustomerBalance {
    fn from(customer: &Customer) -> Self {
        CustomerBalance {
            customer_id: customer.id.clone(),
            code: customer.code.clone(),
            name: customer.name.clone(),
            balance: customer.balance,
            credit_limit: customer.credit_limit,
            status: BalanceStatus::of(customer.balance),
        }
    }
}

/// Cached balance versus the ledger sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BalanceCheck {
    pub customer_id: String,
    pub cached_balance: Money,
    pub ledger_balance: Money,
    pub difference: Money,
    pub is_consistent: bool,
}

impl BalanceCheck {
    pub fn new(customer_id: impl Into<String>, cached_balance: Money, ledger_balance: Money) -> Self {
        let difference = cached_balance - ledger_balance;
        BalanceCheck {
            customer_id: customer_id.into(),
            cached_balance,
            ledger_balance,
            difference,
            is_consistent: difference.is_zero(),
        }
    }
}

/// Debit/credit pair that moves `current` to `target`, if they differ.
pub fn correction(current: Money, target: Money) -> Option<(Money, Money)> {
    let delta = target - current;
    if delta.is_zero() {
        None
    } else if delta.is_positive() {
        Some((Money::zero(), delta))
    } else {
        Some((delta.abs(), Money::zero()))
    }
}

// =============================================================================
// Credit Check
// =============================================================================

/// Projection of a debit against a customer's credit limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreditCheck {
    pub customer_id: String,
    pub credit_limit: Money,
    /// What the customer owes now.
    pub outstanding: Money,
    pub additional_debit: Money,
    /// What the customer would owe after the debit.
    pub projected_outstanding: Money,
    pub exceeded: bool,
}

impl CreditCheck {
    /// Projects `additional_debit` against the customer. A zero limit never
    /// exceeds.
    pub fn project(customer: &Customer, additional_debit: Money) -> Self {
        let projected_outstanding = (-(customer.balance - additional_debit)).clamp_non_negative();
        CreditCheck {
            customer_id: customer.id.clone(),
            credit_limit: customer.credit_limit,
            outstanding: customer.outstanding(),
            additional_debit,
            projected_outstanding,
            exceeded: customer.has_credit_limit() && projected_outstanding > customer.credit_limit,
        }
    }
}

// =============================================================================
// Statement
// =============================================================================

/// A ledger entry with the running balance at that point of the statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatementLine {
    pub entry: LedgerEntry,
    pub running_balance: Money,
}

/// Account statement for a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Statement {
    pub customer_id: String,
    #[ts(as = "String")]
    pub from: NaiveDate,
    #[ts(as = "String")]
    pub to: NaiveDate,
    pub opening_balance: Money,
    pub lines: Vec<StatementLine>,
    pub total_debit: Money,
    pub total_credit: Money,
    pub closing_balance: Money,
}

impl Statement {
    /// Builds a statement from the opening balance and the entries in range,
    /// which must be in posting order.
    pub fn build(
        customer_id: impl Into<String>,
        from: NaiveDate,
        to: NaiveDate,
        opening_balance: Money,
        entries: Vec<LedgerEntry>,
    ) -> Self {
        let mut running = opening_balance;
        let mut total_debit = Money::zero();
        let mut total_credit = Money::zero();
        let lines = entries
            .into_iter()
            .map(|entry| {
                running += entry.delta();
                total_debit += entry.debit;
                total_credit += entry.credit;
                StatementLine {
                    entry,
                    running_balance: running,
                }
            })
            .collect();

        Statement {
            customer_id: customer_id.into(),
            from,
            to,
            opening_balance,
            lines,
            total_debit,
            total_credit,
            closing_balance: running,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 10).unwrap()
    }

    fn entry(id: &str, debit: i64, credit: i64) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            customer_id: "c".to_string(),
            transaction_date: date(),
            debit: Money::from_cents(debit),
            credit: Money::from_cents(credit),
            balance_after: Money::zero(),
            reference_type: ReferenceType::Payment,
            reference_id: "p".to_string(),
            reference_number: Some("PAY-00001".to_string()),
            description: None,
            reversal_of: None,
            actor_id: "u".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_posting_validation() {
        let ok = Posting::credit("c", Money::from_cents(500), ReferenceType::Payment, "p", date(), "u");
        assert!(ok.validate().is_ok());

        let zero = Posting::debit("c", Money::zero(), ReferenceType::Payment, "p", date(), "u");
        assert!(zero.validate().is_err());

        let negative = Posting::debit("c", Money::from_cents(-1), ReferenceType::Payment, "p", date(), "u");
        assert!(matches!(
            negative.validate(),
            Err(ValidationError::MustNotBeNegative { .. })
        ));

        let mut both = ok.clone();
        both.debit = Money::from_cents(1);
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_apply_uses_credit_positive_sign() {
        let debit = Posting::debit("c", Money::from_cents(11000), ReferenceType::IssueVoucher, "v", date(), "u");
        let credit = Posting::credit("c", Money::from_cents(50000), ReferenceType::Payment, "p", date(), "u");
        let after_debit = debit.apply(Money::zero());
        assert_eq!(after_debit.cents(), -11000);
        assert_eq!(credit.apply(after_debit).cents(), 39000);
    }

    #[test]
    fn test_reversal_mirrors_amounts() {
        let original = entry("e1", 0, 50000);
        let reversal = original.reversal(date(), "u2");
        assert_eq!(reversal.debit.cents(), 50000);
        assert!(reversal.credit.is_zero());
        assert_eq!(reversal.reversal_of.as_deref(), Some("e1"));
        assert_eq!(reversal.description.as_deref(), Some("Reversal of PAY-00001"));
    }

    #[test]
    fn test_balance_status() {
        assert_eq!(BalanceStatus::of(Money::from_cents(-1)), BalanceStatus::Debtor);
        assert_eq!(BalanceStatus::of(Money::from_cents(1)), BalanceStatus::Creditor);
        assert_eq!(BalanceStatus::of(Money::zero()), BalanceStatus::Settled);
    }

    #[test]
    fn test_correction() {
        assert_eq!(correction(Money::from_cents(100), Money::from_cents(100)), None);
        assert_eq!(
            correction(Money::from_cents(-100), Money::zero()),
            Some((Money::zero(), Money::from_cents(100)))
        );
        assert_eq!(
            correction(Money::zero(), Money::from_cents(-40)),
            Some((Money::from_cents(40), Money::zero()))
        );
    }

    #[test]
    fn test_credit_check() {
        let mut customer = Customer::new("C-1", "Delta Builders", Utc::now());
        customer.credit_limit = Money::from_cents(10000);
        customer.balance = Money::from_cents(-8000);

        let check = CreditCheck::project(&customer, Money::from_cents(1500));
        assert!(!check.exceeded);
        assert_eq!(check.projected_outstanding.cents(), 9500);

        let check = CreditCheck::project(&customer, Money::from_cents(2500));
        assert!(check.exceeded);

        customer.credit_limit = Money::zero();
        assert!(!CreditCheck::project(&customer, Money::from_cents(1_000_000)).exceeded);
    }

    #[test]
    fn test_statement_running_balance() {
        let statement = Statement::build(
            "c",
            date(),
            date(),
            Money::from_cents(-1000),
            vec![entry("e1", 500, 0), entry("e2", 0, 2000)],
        );
        assert_eq!(statement.lines[0].running_balance.cents(), -1500);
        assert_eq!(statement.lines[1].running_balance.cents(), 500);
        assert_eq!(statement.total_debit.cents(), 500);
        assert_eq!(statement.total_credit.cents(), 2000);
        assert_eq!(statement.closing_balance.cents(), 500);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Folding postings one by one equals Σ credit − Σ debit.
        #[test]
        fn projection_conserves_ledger(
            amounts in proptest::collection::vec((1i64..100_000, any::<bool>()), 0..40)
        ) {
            let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
            let mut balance = Money::zero();
            let mut debits = Money::zero();
            let mut credits = Money::zero();

            for (cents, is_debit) in amounts {
                let amount = Money::from_cents(cents);
                let posting = if is_debit {
                    debits += amount;
                    Posting::debit("c", amount, ReferenceType::Adjustment, "r", date, "u")
                } else {
                    credits += amount;
                    Posting::credit("c", amount, ReferenceType::Adjustment, "r", date, "u")
                };
                prop_assert!(posting.validate().is_ok());
                balance = posting.apply(balance);
            }
            prop_assert_eq!(balance, credits - debits);
        }

        /// Posting an entry and its reversal leaves the balance unchanged.
        #[test]
        fn reversal_restores_balance(start in -1_000_000i64..1_000_000, cents in 1i64..1_000_000, is_debit in any::<bool>()) {
            let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
            let amount = Money::from_cents(cents);
            let posting = if is_debit {
                Posting::debit("c", amount, ReferenceType::Adjustment, "r", date, "u")
            } else {
                Posting::credit("c", amount, ReferenceType::Adjustment, "r", date, "u")
            };
            let start = Money::from_cents(start);
            let after = posting.apply(start);
            prop_assert_eq!(posting.offset().apply(after), start);
        }
    }
}
