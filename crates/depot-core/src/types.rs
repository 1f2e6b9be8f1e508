//! # Master Data Types
//!
//! Branches, products and customers. These are maintained by the CRUD layer;
//! the engine only reads them, except for `Customer.balance`, which only
//! CustomerAccount may write.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Master Data                                     │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Branch      │   │     Product     │   │    Customer     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  code           │   │  code           │   │  code           │       │
//! │  │  is_active      │   │  min_stock      │   │  credit_limit   │       │
//! │  └─────────────────┘   │  prices         │   │  balance ◄──────┼── ledger
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for relations and lock ordering
//! - `code`: human-readable business key, unique

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::money::Money;

// =============================================================================
// Branch
// =============================================================================

/// A physical warehouse location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Branch {
    pub id: String,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    /// Creates an active branch with a fresh id.
    pub fn new(code: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Branch {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
            name: name.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,

    /// Business identifier printed on vouchers.
    pub code: String,

    pub name: String,

    pub category: Option<String>,

    /// Unit of measure ("box", "kg", "piece").
    pub unit: String,

    /// Default low-stock threshold copied onto new stock levels.
    pub min_stock: i64,

    /// Cost used to value inventory.
    pub purchase_price: Money,

    /// Default selling price offered on new voucher lines.
    pub sale_price: Money,

    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates an active product with a fresh id.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        sale_price: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Product {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
            name: name.into(),
            category: None,
            unit: unit.into(),
            min_stock: 0,
            purchase_price: Money::zero(),
            sale_price,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Customer
// =============================================================================

/// A customer with a credit account.
///
/// ## Balance Sign Convention
/// ```text
/// balance > 0   customer is in credit (we owe them)
/// balance = 0   settled
/// balance < 0   customer owes us
///
/// balance == Σ ledger.credit − Σ ledger.debit   (always)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub code: String,
    pub name: String,
    pub phone: Option<String>,

    /// Maximum amount the customer may owe. Zero means unlimited.
    pub credit_limit: Money,

    /// Cached projection of the ledger. Written only by CustomerAccount.
    pub balance: Money,

    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Creates an active customer with a zero balance.
    pub fn new(code: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Customer {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
            name: name.into(),
            phone: None,
            credit_limit: Money::zero(),
            balance: Money::zero(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount the customer currently owes (zero when in credit).
    pub fn outstanding(&self) -> Money {
        (-self.balance).clamp_non_negative()
    }

    /// Whether a credit limit applies.
    pub fn has_credit_limit(&self) -> bool {
        self.credit_limit.is_positive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
