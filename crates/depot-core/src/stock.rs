//! # Stock Types
//!
//! Stock levels per (product, branch), the append-only movement log, and the
//! pure rules the StockLedger applies: movement signs, inverse movements for
//! reversals, cumulative shortage detection and adjustment planning.
//!
//! ## Movement Signs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Movement type    Direction   Signed quantity   Inverse                 │
//! │  ─────────────    ─────────   ───────────────   ───────                 │
//! │  ADD              credit      +qty              ISSUE                   │
//! │  ISSUE            debit       −qty              RETURN                  │
//! │  RETURN           credit      +qty              ISSUE                   │
//! │  TRANSFER_OUT     debit       −qty              TRANSFER_IN             │
//! │  TRANSFER_IN      credit      +qty              TRANSFER_OUT            │
//! │                                                                         │
//! │  Σ movement.quantity (product, branch) == current_quantity              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::validation::{validate_id, validate_notes, ValidationResult};

// =============================================================================
// Stock Level
// =============================================================================

/// Quantity of one product held by one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockLevel {
    pub id: String,
    pub product_id: String,
    pub branch_id: String,
    /// Never negative (SQLite CHECK constraint).
    pub current_quantity: i64,
    pub reserved_quantity: i64,
    /// Low-stock threshold.
    pub minimum_quantity: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Quantity not held back by reservations.
    pub fn available(&self) -> i64 {
        (self.current_quantity - self.reserved_quantity).max(0)
    }

    pub fn status(&self) -> StockStatus {
        StockStatus::classify(self.current_quantity, self.minimum_quantity)
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(&self.product_id, &self.branch_id)
    }
}

/// Stock health of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Ok,
    LowStock,
    OutOfStock,
}

impl StockStatus {
    /// ```rust
    /// use depot_core::stock::StockStatus;
    ///
    /// assert_eq!(StockStatus::classify(0, 5), StockStatus::OutOfStock);
    /// assert_eq!(StockStatus::classify(5, 5), StockStatus::LowStock);
    /// assert_eq!(StockStatus::classify(6, 5), StockStatus::Ok);
    /// ```
    pub fn classify(current: i64, minimum: i64) -> Self {
        if current <= 0 {
            StockStatus::OutOfStock
        } else if current <= minimum {
            StockStatus::LowStock
        } else {
            StockStatus::Ok
        }
    }
}

/// Lock key of a stock level.
///
/// The derived `Ord` compares `product_id` first, then `branch_id`, which is
/// the order every caller must lock keys in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: String,
    pub branch_id: String,
}

impl StockKey {
    pub fn new(product_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        StockKey {
            product_id: product_id.into(),
            branch_id: branch_id.into(),
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.product_id, self.branch_id)
    }
}

// =============================================================================
// Movements
// =============================================================================

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Add,
    Issue,
    Return,
    TransferOut,
    TransferIn,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Add => "ADD",
            MovementType::Issue => "ISSUE",
            MovementType::Return => "RETURN",
            MovementType::TransferOut => "TRANSFER_OUT",
            MovementType::TransferIn => "TRANSFER_IN",
        }
    }

    /// Natural direction of the movement type.
    pub fn direction(&self) -> Direction {
        match self {
            MovementType::Issue | MovementType::TransferOut => Direction::Debit,
            MovementType::Add | MovementType::Return | MovementType::TransferIn => {
                Direction::Credit
            }
        }
    }

    /// Type used when undoing a movement of this type.
    pub fn inverse(&self) -> MovementType {
        match self {
            MovementType::Add => MovementType::Issue,
            MovementType::Issue => MovementType::Return,
            MovementType::Return => MovementType::Issue,
            MovementType::TransferOut => MovementType::TransferIn,
            MovementType::TransferIn => MovementType::TransferOut,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debit removes stock, credit adds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }

    /// Signed quantity written to the movement log.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            Direction::Debit => -quantity,
            Direction::Credit => quantity,
        }
    }
}

/// Document a movement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockReferenceType {
    IssueVoucher,
    ReturnVoucher,
    TransferVoucher,
    StockAdjustment,
    StockReceipt,
}

/// One row of the append-only movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryMovement {
    pub id: String,
    pub product_id: String,
    pub branch_id: String,
    pub movement_type: MovementType,
    /// Negative for a debit, positive for a credit.
    pub quantity: i64,
    pub reference_type: StockReferenceType,
    pub reference_id: String,
    /// Movement this one undoes.
    pub reversal_of: Option<String>,
    pub notes: Option<String>,
    pub actor_id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn direction(&self) -> Direction {
        if self.quantity < 0 {
            Direction::Debit
        } else {
            Direction::Credit
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(&self.product_id, &self.branch_id)
    }

    /// Change that undoes this movement.
    pub fn reversal(&self, actor_id: &str, notes: Option<String>) -> StockChange {
        StockChange {
            product_id: self.product_id.clone(),
            branch_id: self.branch_id.clone(),
            quantity: self.quantity.abs(),
            movement_type: self.movement_type.inverse(),
            reference_type: self.reference_type,
            reference_id: self.reference_id.clone(),
            reversal_of: Some(self.id.clone()),
            notes,
            actor_id: actor_id.to_string(),
        }
    }
}

/// Input to `StockLedger::debit` / `StockLedger::credit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: String,
    pub branch_id: String,
    /// Always positive; the direction decides the sign.
    pub quantity: i64,
    pub movement_type: MovementType,
    pub reference_type: StockReferenceType,
    pub reference_id: String,
    pub reversal_of: Option<String>,
    pub notes: Option<String>,
    pub actor_id: String,
}

impl StockChange {
    pub fn key(&self) -> StockKey {
        StockKey::new(&self.product_id, &self.branch_id)
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if self.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }
        validate_notes(self.notes.as_deref())
    }
}

// =============================================================================
// Shortages
// =============================================================================

/// A line the source branch cannot cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockShortage {
    pub line_no: i64,
    pub product_id: String,
    pub branch_id: String,
    pub requested: i64,
    /// Stock left for this line after earlier lines of the same product.
    pub available: i64,
    pub shortage: i64,
    /// Other active branches holding at least `requested`.
    pub suggestions: Vec<BranchSuggestion>,
}

/// A branch that could supply a short line instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BranchSuggestion {
    pub branch_id: String,
    pub branch_code: String,
    pub branch_name: String,
    pub available: i64,
}

/// A line to check against a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandLine {
    pub line_no: i64,
    pub product_id: String,
    pub quantity: i64,
}

/// Lists every line that `on_hand` cannot cover.
///
/// Lines are consumed in order and cumulatively per product, so two lines of
/// the same product are checked against the same stock.
///
/// ## Example
/// ```rust
/// use std::collections::HashMap;
/// use depot_core::stock::{find_shortages, DemandLine};
///
/// let on_hand = HashMap::from([("p1".to_string(), 3)]);
/// let lines = [DemandLine { line_no: 1, product_id: "p1".into(), quantity: 5 }];
/// let shortages = find_shortages("b1", &lines, &on_hand);
/// assert_eq!(shortages[0].shortage, 2);
/// ```
pub fn find_shortages(
    branch_id: &str,
    lines: &[DemandLine],
    on_hand: &HashMap<String, i64>,
) -> Vec<StockShortage> {
    let mut consumed: HashMap<&str, i64> = HashMap::new();
    let mut shortages = Vec::new();

    for line in lines {
        let held = on_hand.get(&line.product_id).copied().unwrap_or(0);
        let used = consumed.entry(line.product_id.as_str()).or_insert(0);
        let left = (held - *used).max(0);

        if line.quantity > left {
            shortages.push(StockShortage {
                line_no: line.line_no,
                product_id: line.product_id.clone(),
                branch_id: branch_id.to_string(),
                requested: line.quantity,
                available: left,
                shortage: line.quantity - left,
                suggestions: Vec::new(),
            });
        }
        *used += line.quantity;
    }

    shortages
}

// =============================================================================
// Adjustments & Summary
// =============================================================================

/// Sets one level to an exact quantity (stock count correction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockAdjustment {
    pub product_id: String,
    pub branch_id: String,
    pub new_quantity: i64,
    pub notes: Option<String>,
}

impl StockAdjustment {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("product_id", &self.product_id)?;
        validate_id("branch_id", &self.branch_id)?;
        if self.new_quantity < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "new_quantity".to_string(),
            });
        }
        validate_notes(self.notes.as_deref())
    }

    /// Movement needed to go from `current` to the target quantity, if any.
    ///
    /// Increases are `ADD` credits and decreases are `ISSUE` debits.
    pub fn plan(&self, current: i64) -> Option<(MovementType, i64)> {
        let delta = self.new_quantity - current;
        match delta {
            0 => None,
            d if d > 0 => Some((MovementType::Add, d)),
            d => Some((MovementType::Issue, -d)),
        }
    }
}

/// Inventory totals for one branch or the whole company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventorySummary {
    pub item_count: i64,
    pub total_quantity: i64,
    /// Σ current_quantity × purchase_price.
    pub stock_value: Money,
    pub low_stock_count: i64,
    pub out_of_stock_count: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================
