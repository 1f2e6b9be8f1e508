//! # Ledger Primitives
//!
//! The three components that own the shared mutable rows of the engine.
//! Each one locks its row before reading it and runs inside the caller's
//! transaction.
//!
//! ## Locking on SQLite
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SQLite has no SELECT ... FOR UPDATE. Every primitive starts with a    │
//! │  no-op write on its row:                                               │
//! │                                                                         │
//! │    UPDATE stock_levels SET current_quantity = current_quantity         │
//! │     WHERE product_id = ? AND branch_id = ?                             │
//! │                                                                         │
//! │  The first write of a transaction takes the database write lock and    │
//! │  holds it until COMMIT/ROLLBACK. Only then does the primitive read,    │
//! │  so the value it reads cannot change under it.                         │
//! │                                                                         │
//! │  Lock order inside one operation:                                      │
//! │    Sequence → Voucher → StockLevel (product_id, branch_id asc)         │
//! │             → Customer                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`SequenceAllocator`] - gapless document numbers per (entity, year)
//! - [`StockLedger`] - stock levels and the movement log
//! - [`CustomerAccount`] - the customer ledger and cached balance

pub mod account;
pub mod sequence;
pub mod stock;

pub use account::CustomerAccount;
pub use sequence::SequenceAllocator;
pub use stock::StockLedger;
