//! # depot-core: Pure Domain Logic for Depot
//!
//! This crate holds every rule of the inventory & ledger engine that can be
//! expressed without touching a database: money math, voucher totals, stock
//! plans, sequence arithmetic, ledger projection and the state machines.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Depot Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Controller layer (CRUD, reports, UI)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   depot-engine: VoucherEngine, ChequePaymentEngine              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   depot-db: SequenceAllocator, StockLedger, CustomerAccount     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ depot-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │  money  │ │ voucher │ │  stock  │ │ ledger  │ │sequence │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Master data (Branch, Product, Customer)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`voucher`] - Issue/Return vouchers, discounts, totals, stock plans
//! - [`stock`] - Stock levels, movements, shortage detection
//! - [`ledger`] - Customer ledger entries, postings, statements
//! - [`sequence`] - Document numbering arithmetic and formatting
//! - [`payment`] - Payments and the cheque state machine
//! - [`clock`] - Time source seam
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use depot_core::money::Money;
//! use depot_core::voucher::{Discount, VoucherTotals, LineInput};
//!
//! let lines = [
//!     LineInput { quantity: 5, unit_price: Money::from_major_minor(10, 0), discount: Discount::None },
//!     LineInput { quantity: 3, unit_price: Money::from_major_minor(20, 0), discount: Discount::None },
//! ];
//! let totals = VoucherTotals::calculate(&lines, Discount::None).unwrap();
//! assert_eq!(totals.net_total, Money::from_major_minor(110, 0));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod sequence;
pub mod stock;
pub mod types;
pub mod validation;
pub mod voucher;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CoreError, CoreResult, ValidationError};
pub use ledger::{BalanceStatus, LedgerEntry, Posting, ReferenceType};
pub use money::Money;
pub use payment::{Cheque, ChequeStatus, NewPayment, Payment, PaymentMethod};
pub use sequence::{DocumentNumber, EntityType, SequenceConfig};
pub use stock::{InventoryMovement, MovementType, StockLevel, StockShortage};
pub use types::*;
pub use voucher::{Discount, Voucher, VoucherDraft, VoucherItem, VoucherKind, VoucherStatus};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines on a single voucher.
pub const MAX_VOUCHER_LINES: usize = 500;

/// Maximum quantity on a single voucher line.
///
/// ## Business Reason
/// Catches keying mistakes (an extra zero on a pallet count) before they
/// reach the stock ledger.
pub const MAX_ITEM_QUANTITY: i64 = 1_000_000;

/// Highest accepted unit price, in cents (1,000,000,000.00).
pub const MAX_UNIT_PRICE_CENTS: i64 = 100_000_000_000;

/// Basis points in 100 %.
pub const FULL_PERCENT_BPS: u32 = 10_000;
