//! # Repository Module
//!
//! Row access for master data and documents.
//!
//! ## Repositories vs Ledger Primitives
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Engines (depot-engine)                                                │
//! │       │                                                                 │
//! │       ├── db.vouchers() / db.payments()   document rows                │
//! │       ├── db.branches() / db.products()   master data (read, CRUD)     │
//! │       │   db.customers()                  never writes balance         │
//! │       │                                                                 │
//! │       └── db.sequences() / db.stock()     ledger primitives            │
//! │           db.accounts()                   (crate::ledger)              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Methods taking `&mut SqliteConnection` run inside the caller's
//! transaction; the rest use the pool.
//!
//! ## Available Repositories
//!
//! - [`branch::BranchRepository`] - Warehouse locations
//! - [`product::ProductRepository`] - Catalog
//! - [`customer::CustomerRepository`] - Customer master data
//! - [`voucher::VoucherRepository`] - Voucher headers and items
//! - [`payment::PaymentRepository`] - Payments and cheques

pub mod branch;
pub mod customer;
pub mod payment;
pub mod product;
pub mod voucher;
