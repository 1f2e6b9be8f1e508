//! # Vouchers
//!
//! Issue and return vouchers (including branch transfers): discounts, totals,
//! draft validation, the status machine and the stock plan applied on
//! approval.
//!
//! ## Voucher Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create()          approve()                  cancel()                 │
//! │  ─────────► DRAFT ─────────────► APPROVED ─────────────► CANCELLED     │
//! │               │     number, stock,             reverse stock            │
//! │               │     ledger                     and ledger               │
//! │               │                                                         │
//! │               └───────────────── cancel() ─────────────► CANCELLED     │
//! │                     no side effects, no number consumed                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Totals
//! ```text
//! line:    gross = qty × unit_price
//!          net   = gross − line discount
//! header:  total_amount = Σ gross
//!          subtotal     = Σ net
//!          net_total    = subtotal − header discount(subtotal)
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::ledger::{CreditCheck, ReferenceType};
use crate::money::Money;
use crate::sequence::EntityType;
use crate::stock::{DemandLine, Direction, MovementType, StockKey, StockReferenceType, StockShortage};
use crate::validation::{
    validate_id, validate_line_count, validate_notes, validate_percentage_bps, validate_price,
    validate_quantity, ValidationResult,
};

// =============================================================================
// Kind & Status
// =============================================================================

/// Issue vouchers move goods out of a branch, return vouchers bring them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum VoucherKind {
    Issue,
    Return,
}

impl fmt::Display for VoucherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoucherKind::Issue => f.write_str("issue"),
            VoucherKind::Return => f.write_str("return"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Draft,
    #[serde(alias = "completed")]
    Approved,
    Cancelled,
}

impl Default for VoucherStatus {
    fn default() -> Self {
        VoucherStatus::Draft
    }
}

impl VoucherStatus {
    pub fn can_transition_to(&self, to: VoucherStatus) -> bool {
        matches!(
            (self, to),
            (VoucherStatus::Draft, VoucherStatus::Approved)
                | (VoucherStatus::Draft, VoucherStatus::Cancelled)
                | (VoucherStatus::Approved, VoucherStatus::Cancelled)
        )
    }

    /// Checks the edge `self → to`.
    ///
    /// Approving anything but a draft, or cancelling a cancelled voucher, is
    /// `AlreadyInTerminalState`.
    pub fn ensure_transition(&self, voucher_id: &str, to: VoucherStatus) -> CoreResult<()> {
        if self.can_transition_to(to) {
            return Ok(());
        }
        match (self, to) {
            (VoucherStatus::Approved, VoucherStatus::Approved)
            | (VoucherStatus::Cancelled, _) => Err(CoreError::terminal("Voucher", voucher_id, self)),
            _ => Err(CoreError::InvalidTransition {
                entity: "Voucher".to_string(),
                id: voucher_id.to_string(),
                from: self.to_string(),
                to: to.to_string(),
            }),
        }
    }
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoucherStatus::Draft => "draft",
            VoucherStatus::Approved => "approved",
            VoucherStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Discount
// =============================================================================

/// A discount on a line or on the voucher subtotal.
///
/// Percentages are basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
    None,
    Fixed(Money),
    Percentage(u32),
}

impl Default for Discount {
    fn default() -> Self {
        Discount::None
    }
}

impl Discount {
    /// Amount taken off `base`.
    pub fn amount_on(&self, base: Money) -> Money {
        match self {
            Discount::None => Money::zero(),
            Discount::Fixed(amount) => *amount,
            Discount::Percentage(bps) => base.percentage_of(*bps),
        }
    }

    /// A fixed discount must lie in `0..=base`, a percentage in `0..=100 %`.
    pub fn validate(&self, field: &str, base: Money) -> ValidationResult<()> {
        match self {
            Discount::None => Ok(()),
            Discount::Fixed(amount) if amount.is_negative() => {
                Err(ValidationError::MustNotBeNegative {
                    field: field.to_string(),
                })
            }
            Discount::Fixed(amount) if *amount > base => Err(ValidationError::OutOfRange {
                field: field.to_string(),
                min: 0,
                max: base.cents(),
            }),
            Discount::Fixed(_) => Ok(()),
            Discount::Percentage(bps) => validate_percentage_bps(field, *bps),
        }
    }

    /// Storage form: `(discount_type, discount_value)`.
    pub fn to_parts(&self) -> (&'static str, i64) {
        match self {
            Discount::None => ("none", 0),
            Discount::Fixed(amount) => ("fixed", amount.cents()),
            Discount::Percentage(bps) => ("percentage", *bps as i64),
        }
    }

    pub fn from_parts(kind: &str, value: i64) -> ValidationResult<Self> {
        match kind {
            "none" => Ok(Discount::None),
            "fixed" => Ok(Discount::Fixed(Money::from_cents(value))),
            "percentage" => u32::try_from(value)
                .map(Discount::Percentage)
                .map_err(|_| ValidationError::OutOfRange {
                    field: "discount_value".to_string(),
                    min: 0,
                    max: u32::MAX as i64,
                }),
            _ => Err(ValidationError::NotAllowed {
                field: "discount_type".to_string(),
                allowed: vec!["none".into(), "fixed".into(), "percentage".into()],
            }),
        }
    }
}

// =============================================================================
// Totals
// =============================================================================

/// Priced quantity of a line, as far as totals are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInput {
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Discount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineTotals {
    pub gross: Money,
    pub discount_amount: Money,
    pub net: Money,
}

impl LineInput {
    /// ## Errors
    /// A discount outside its allowed range.
    pub fn totals(&self) -> ValidationResult<LineTotals> {
        let gross = self
            .unit_price
            .checked_multiply_quantity(self.quantity)
            .ok_or_else(|| too_large("line amount"))?;
        self.discount.validate("line discount", gross)?;
        let discount_amount = self.discount.amount_on(gross);
        Ok(LineTotals {
            gross,
            discount_amount,
            net: gross - discount_amount,
        })
    }
}

/// Header totals of a voucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VoucherTotals {
    /// Σ gross.
    pub total_amount: Money,
    /// Σ net.
    pub subtotal: Money,
    /// Header discount.
    pub discount_amount: Money,
    pub net_total: Money,
    pub lines: Vec<LineTotals>,
}

impl VoucherTotals {
    /// Computes line and header totals.
    ///
    /// ## Example
    /// ```rust
    /// use depot_core::money::Money;
    /// use depot_core::voucher::{Discount, LineInput, VoucherTotals};
    ///
    /// let lines = [LineInput {
    ///     quantity: 2,
    ///     unit_price: Money::from_cents(5000),
    ///     discount: Discount::Fixed(Money::from_cents(1000)),
    /// }];
    /// let totals = VoucherTotals::calculate(&lines, Discount::Percentage(1000)).unwrap();
    /// assert_eq!(totals.total_amount.cents(), 10000);
    /// assert_eq!(totals.subtotal.cents(), 9000);
    /// assert_eq!(totals.net_total.cents(), 8100);
    /// ```
    pub fn calculate(lines: &[LineInput], header: Discount) -> ValidationResult<Self> {
        let lines = lines
            .iter()
            .map(LineInput::totals)
            .collect::<ValidationResult<Vec<_>>>()?;

        let total_amount = checked_sum(lines.iter().map(|l| l.gross), "total_amount")?;
        let subtotal = checked_sum(lines.iter().map(|l| l.net), "subtotal")?;
        header.validate("discount", subtotal)?;
        let discount_amount = header.amount_on(subtotal);

        Ok(VoucherTotals {
            total_amount,
            subtotal,
            discount_amount,
            net_total: subtotal - discount_amount,
            lines,
        })
    }
}

fn too_large(field: &str) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: i64::MAX,
    }
}

fn checked_sum(mut amounts: impl Iterator<Item = Money>, field: &str) -> ValidationResult<Money> {
    amounts.try_fold(Money::zero(), |acc, amount| {
        acc.checked_add(amount).ok_or_else(|| too_large(field))
    })
}

// =============================================================================
// Draft
// =============================================================================

/// A line of a voucher being created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DraftItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
    #[serde(default)]
    pub discount: Discount,
}

/// Payload of `VoucherEngine::create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VoucherDraft {
    pub kind: VoucherKind,
    pub branch_id: String,
    /// Set for a branch-to-branch transfer.
    pub target_branch_id: Option<String>,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub is_cash_sale: bool,
    #[ts(as = "String")]
    pub voucher_date: NaiveDate,
    #[serde(default)]
    pub discount: Discount,
    pub notes: Option<String>,
    pub items: Vec<DraftItem>,
}

impl VoucherDraft {
    pub fn is_transfer(&self) -> bool {
        self.target_branch_id.is_some()
    }

    pub fn line_inputs(&self) -> Vec<LineInput> {
        self.items
            .iter()
            .map(|item| LineInput {
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: item.discount,
            })
            .collect()
    }

    /// Shape and combination checks, then totals.
    ///
    /// Existence and activity of the referenced rows is checked by the engine.
    pub fn validate(&self) -> ValidationResult<VoucherTotals> {
        validate_id("branch_id", &self.branch_id)?;
        validate_line_count(self.items.len())?;
        validate_notes(self.notes.as_deref())?;

        for item in &self.items {
            validate_id("product_id", &item.product_id)?;
            validate_quantity(item.quantity)?;
            validate_price(item.unit_price)?;
        }

        if let Some(target) = &self.target_branch_id {
            validate_id("target_branch_id", target)?;
            if self.kind == VoucherKind::Return {
                return Err(ValidationError::InvalidFormat {
                    field: "target_branch_id".to_string(),
                    reason: "a return voucher cannot be a transfer".to_string(),
                });
            }
            if target == &self.branch_id {
                return Err(ValidationError::InvalidFormat {
                    field: "target_branch_id".to_string(),
                    reason: "must differ from the source branch".to_string(),
                });
            }
            if self.customer_id.is_some() {
                return Err(ValidationError::InvalidFormat {
                    field: "customer_id".to_string(),
                    reason: "a transfer has no customer".to_string(),
                });
            }
            if self.is_cash_sale {
                return Err(ValidationError::InvalidFormat {
                    field: "is_cash_sale".to_string(),
                    reason: "a transfer is not a sale".to_string(),
                });
            }
        }

        // No customer means an anonymous sale: stock moves, the ledger does not.
        if let Some(customer_id) = &self.customer_id {
            validate_id("customer_id", customer_id)?;
        }

        VoucherTotals::calculate(&self.line_inputs(), self.discount)
    }
}

// =============================================================================
// Voucher
// =============================================================================

/// A stored voucher with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Voucher {
    pub id: String,
    pub kind: VoucherKind,
    /// Set on approval.
    pub voucher_number: Option<String>,
    pub number_year: Option<i32>,
    pub customer_id: Option<String>,
    pub branch_id: String,
    pub target_branch_id: Option<String>,
    pub is_cash_sale: bool,
    pub status: VoucherStatus,
    pub discount: Discount,
    pub total_amount: Money,
    pub subtotal: Money,
    pub discount_amount: Money,
    pub net_total: Money,
    #[ts(as = "String")]
    pub voucher_date: NaiveDate,
    pub notes: Option<String>,
    pub created_by: String,
    pub approved_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub approved_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub items: Vec<VoucherItem>,
}

/// A stored voucher line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VoucherItem {
    pub id: String,
    pub voucher_id: String,
    /// 1-based.
    pub line_no: i64,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Discount,
    pub gross: Money,
    pub discount_amount: Money,
    pub net: Money,
}

impl Voucher {
    pub fn is_transfer(&self) -> bool {
        self.target_branch_id.is_some()
    }

    /// Sequence that numbers this voucher.
    pub fn sequence_entity(&self) -> EntityType {
        match (self.kind, self.is_transfer()) {
            (VoucherKind::Issue, true) => EntityType::TransferVouchers,
            (VoucherKind::Issue, false) => EntityType::IssueVouchers,
            (VoucherKind::Return, _) => EntityType::ReturnVouchers,
        }
    }

    pub fn stock_reference_type(&self) -> StockReferenceType {
        match (self.kind, self.is_transfer()) {
            (VoucherKind::Issue, true) => StockReferenceType::TransferVoucher,
            (VoucherKind::Issue, false) => StockReferenceType::IssueVoucher,
            (VoucherKind::Return, _) => StockReferenceType::ReturnVoucher,
        }
    }

    pub fn ledger_reference_type(&self) -> ReferenceType {
        match self.kind {
            VoucherKind::Issue => ReferenceType::IssueVoucher,
            VoucherKind::Return => ReferenceType::ReturnVoucher,
        }
    }

    /// Lines that take stock out of the source branch, for the availability
    /// check. Empty for return vouchers.
    pub fn demand(&self) -> Vec<DemandLine> {
        match self.kind {
            VoucherKind::Return => Vec::new(),
            VoucherKind::Issue => self
                .items
                .iter()
                .map(|item| DemandLine {
                    line_no: item.line_no,
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        }
    }

    /// Stock operations applied on approval, in line order.
    ///
    /// ## Plans
    /// ```text
    /// transfer  per line: debit source (TRANSFER_OUT), credit target (TRANSFER_IN)
    /// issue     per line: debit source (ISSUE)
    /// return    per line: credit source (RETURN)
    /// ```
    pub fn stock_plan(&self) -> StockPlan {
        let mut moves = Vec::with_capacity(self.items.len() * 2);
        for item in &self.items {
            match (self.kind, &self.target_branch_id) {
                (VoucherKind::Issue, Some(target)) => {
                    moves.push(PlannedMove::new(item, &self.branch_id, MovementType::TransferOut));
                    moves.push(PlannedMove::new(item, target, MovementType::TransferIn));
                }
                (VoucherKind::Issue, None) => {
                    moves.push(PlannedMove::new(item, &self.branch_id, MovementType::Issue));
                }
                (VoucherKind::Return, _) => {
                    moves.push(PlannedMove::new(item, &self.branch_id, MovementType::Return));
                }
            }
        }
        StockPlan { moves }
    }
}

// =============================================================================
// Stock Plan
// =============================================================================

/// One stock operation of an approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub line_no: i64,
    pub key: StockKey,
    pub quantity: i64,
    pub movement_type: MovementType,
}

impl PlannedMove {
    fn new(item: &VoucherItem, branch_id: &str, movement_type: MovementType) -> Self {
        PlannedMove {
            line_no: item.line_no,
            key: StockKey::new(&item.product_id, branch_id),
            quantity: item.quantity,
            movement_type,
        }
    }

    pub fn direction(&self) -> Direction {
        self.movement_type.direction()
    }
}

/// All stock operations of an approval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockPlan {
    pub moves: Vec<PlannedMove>,
}

impl StockPlan {
    /// Distinct keys in lock order.
    pub fn lock_keys(&self) -> Vec<StockKey> {
        let mut keys: Vec<StockKey> = self.moves.iter().map(|m| m.key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Keys that only receive credits (may not exist yet).
    pub fn credit_only_keys(&self) -> Vec<StockKey> {
        self.lock_keys()
            .into_iter()
            .filter(|key| {
                self.moves
                    .iter()
                    .filter(|m| &m.key == key)
                    .all(|m| m.direction() == Direction::Credit)
            })
            .collect()
    }
}

// =============================================================================
// Approval Outcome
// =============================================================================

/// Why an approval was turned down without error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    InsufficientStock { shortages: Vec<StockShortage> },
    CreditLimitExceeded { check: CreditCheck },
}

/// Non-blocking findings of an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ApprovalWarning {
    CreditLimitExceeded { check: CreditCheck },
}

/// Result of `VoucherEngine::approve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalResult {
    Approved {
        voucher_number: String,
        warnings: Vec<ApprovalWarning>,
    },
    Rejected {
        reasons: Vec<RejectionReason>,
    },
}

impl ApprovalResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalResult::Approved { .. })
    }

    pub fn voucher_number(&self) -> Option<&str> {
        match self {
            ApprovalResult::Approved { voucher_number, .. } => Some(voucher_number),
            ApprovalResult::Rejected { .. } => None,
        }
    }

    pub fn shortages(&self) -> Vec<&StockShortage> {
        match self {
            ApprovalResult::Approved { .. } => Vec::new(),
            ApprovalResult::Rejected { reasons } => reasons
                .iter()
                .flat_map(|r| match r {
                    RejectionReason::InsufficientStock { shortages } => shortages.iter().collect(),
                    RejectionReason::CreditLimitExceeded { .. } => Vec::new(),
                })
                .collect(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn line_strategy() -> impl Strategy<Value = LineInput> {
        (1i64..1000, 0i64..100_000, 0u32..=10_000).prop_map(|(quantity, price, bps)| LineInput {
            quantity,
            unit_price: Money::from_cents(price),
            discount: Discount::Percentage(bps),
        })
    }

    proptest! {
        #[test]
        fn totals_are_ordered(
            lines in proptest::collection::vec(line_strategy(), 1..20),
            header_bps in 0u32..=10_000
        ) {
            let totals = VoucherTotals::calculate(&lines, Discount::Percentage(header_bps)).unwrap();
            prop_assert!(totals.net_total >= Money::zero());
            prop_assert!(totals.net_total <= totals.subtotal);
            prop_assert!(totals.subtotal <= totals.total_amount);
            prop_assert_eq!(totals.subtotal - totals.discount_amount, totals.net_total);
            let net: Money = totals.lines.iter().map(|l| l.net).sum();
            prop_assert_eq!(net, totals.subtotal);
        }
    }
}
