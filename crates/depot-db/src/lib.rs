//! # depot-db: Database Layer for Depot
//!
//! SQLite storage for the inventory and ledger engine, using sqlx for async
//! access. Every SQL statement and every row lock lives in this crate.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Depot Data Flow                                │
//! │                                                                         │
//! │  VoucherEngine / ChequePaymentEngine (depot-engine)                    │
//! │       │  pool.begin() ... commit()                                     │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     depot-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │    Ledger     │    │ Repositories │  │   │
//! │  │   │   (pool.rs)   │    │  primitives   │    │              │  │   │
//! │  │   │               │    │               │    │ Voucher      │  │   │
//! │  │   │ SqlitePool    │◄───│ Sequence      │    │ Payment      │  │   │
//! │  │   │ Clock         │    │ Stock         │    │ Branch       │  │   │
//! │  │   │ Migrations    │    │ Account       │    │ Product ...  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL, foreign keys, CHECK constraints)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`ledger`] - SequenceAllocator, StockLedger, CustomerAccount
//! - [`repository`] - Master data and document rows
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("depot.db")).await?;
//!
//! let mut tx = db.pool().begin().await?;
//! let number = db.sequences().next(&mut tx, EntityType::IssueVouchers, 2025).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use ledger::{CustomerAccount, SequenceAllocator, StockLedger};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::branch::BranchRepository;
pub use repository::customer::CustomerRepository;
pub use repository::payment::PaymentRepository;
pub use repository::product::ProductRepository;
pub use repository::voucher::VoucherRepository;
