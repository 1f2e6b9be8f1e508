//! # depot-engine: Document Engines for Depot
//!
//! Voucher and cheque/payment workflows on top of the depot-db ledger
//! primitives. Every public operation is a single database transaction:
//! it commits completely or leaves no trace.
//!
//! ## Module Organization
//!
//! - [`voucher`] - VoucherEngine: create, approve, cancel
//! - [`payment`] - ChequePaymentEngine: record, clear, return, cancel
//! - [`config`] - EngineConfig (TOML file + `DEPOT_*` environment)
//! - [`retry`] - whole-operation retry on `Busy`
//! - [`error`] - EngineError and its codes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_engine::{Depot, EngineConfig};
//!
//! let depot = Depot::connect(EngineConfig::load_or_default(None)).await?;
//!
//! let id = depot.vouchers().create(&draft, "clerk").await?;
//! let result = depot
//!     .with_retry("approve", || depot.vouchers().approve(&id, "manager"))
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod payment;
pub mod retry;
pub mod voucher;

#[cfg(test)]
mod testing;

pub use config::{CreditLimitPolicy, EngineConfig};
pub use error::{EngineError, EngineResult, ErrorCode};
pub use payment::ChequePaymentEngine;
pub use retry::RetryPolicy;
pub use voucher::VoucherEngine;

use std::future::Future;
use std::sync::Arc;
use tracing::info;

use depot_core::clock::{Clock, SystemClock};
use depot_db::{CustomerAccount, Database, StockLedger};

/// Connected engine set sharing one pool and one clock.
#[derive(Debug, Clone)]
pub struct Depot {
    db: Database,
    config: EngineConfig,
    vouchers: VoucherEngine,
    payments: ChequePaymentEngine,
    retry: RetryPolicy,
}

impl Depot {
    /// Opens the database described by `config` with the system clock.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        Self::connect_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::with_clock(config.database.to_db_config(), clock).await?;
        Self::from_database(db, config).await
    }

    /// Wraps an open database, creating this year's missing sequence rows.
    pub async fn from_database(db: Database, config: EngineConfig) -> EngineResult<Self> {
        let year = db.clock().year();
        let sequences = db.sequences();
        let mut created = 0;
        for sequence in config.sequence_configs(year) {
            if sequences.ensure_configured(&sequence).await? {
                created += 1;
            }
        }

        info!(
            year,
            sequences_created = created,
            credit_limit_policy = %config.vouchers.credit_limit_policy,
            max_retries = config.retry.max_retries,
            "Depot engine ready"
        );

        Ok(Depot {
            vouchers: VoucherEngine::new(db.clone(), config.vouchers.clone()),
            payments: ChequePaymentEngine::new(db.clone()),
            retry: config.retry.clone().into(),
            db,
            config,
        })
    }

    pub fn vouchers(&self) -> &VoucherEngine {
        &self.vouchers
    }

    pub fn payments(&self) -> &ChequePaymentEngine {
        &self.payments
    }

    pub fn stock(&self) -> StockLedger {
        self.db.stock()
    }

    pub fn accounts(&self) -> CustomerAccount {
        self.db.accounts()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `op` under the configured retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.retry.run(operation, op).await
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
