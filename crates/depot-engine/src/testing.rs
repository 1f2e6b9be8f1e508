//! Shared setup for engine tests.

use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use depot_core::clock::FixedClock;
use depot_core::money::Money;
use depot_core::sequence::{EntityType, SequenceConfig};
use depot_core::types::{Branch, Customer, Product};
use depot_db::{Database, DbConfig};

use crate::config::VoucherConfig;
use crate::payment::ChequePaymentEngine;
use crate::voucher::VoucherEngine;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

/// Two branches, two products, one customer and 2025 sequences, on a clock
/// fixed at 2025-03-01.
pub struct Fixture {
    pub db: Database,
    pub clock: Arc<FixedClock>,
    pub vouchers: VoucherEngine,
    pub payments: ChequePaymentEngine,
    pub branch_a: Branch,
    pub branch_b: Branch,
    pub customer: Customer,
    pub products: Vec<Product>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(DbConfig::in_memory()).await
    }

    pub async fn with_config(config: DbConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn,depot_engine=debug")
            .with_test_writer()
            .try_init();

        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
        let db = Database::with_clock(config, clock.clone()).await.unwrap();
        let now = Utc::now();

        let branch_a = db.branches().insert(&Branch::new("MAIN", "Main Warehouse", now)).await.unwrap();
        let branch_b = db.branches().insert(&Branch::new("NORTH", "North Yard", now)).await.unwrap();

        let mut products = Vec::new();
        for (code, name) in [("CEM-50", "Portland Cement 50kg"), ("STL-10", "Rebar 10mm")] {
            let product = Product::new(code, name, "piece", Money::from_cents(1000), now);
            products.push(db.products().insert(&product).await.unwrap());
        }

        let customer = db
            .customers()
            .insert(&Customer::new("C-001", "Nile Contracting", now))
            .await
            .unwrap();

        for entity in EntityType::ALL {
            db.sequences()
                .ensure_configured(&SequenceConfig::default_for(entity, 2025))
                .await
                .unwrap();
        }

        Fixture {
            vouchers: VoucherEngine::new(db.clone(), VoucherConfig::default()),
            payments: ChequePaymentEngine::new(db.clone()),
            db,
            clock,
            branch_a,
            branch_b,
            customer,
            products,
        }
    }

    pub async fn receive(&self, product: usize, branch: &Branch, quantity: i64) {
        self.db
            .stock()
            .receive(&self.products[product].id, &branch.id, quantity, None, "receiver")
            .await
            .unwrap();
    }

    pub async fn quantity(&self, product: usize, branch: &Branch) -> i64 {
        self.db
            .stock()
            .current_quantity(&self.products[product].id, &branch.id)
            .await
            .unwrap()
    }

    pub async fn balance(&self) -> Money {
        self.db.accounts().balance(&self.customer.id).await.unwrap()
    }

    pub async fn set_credit_limit(&self, limit: Money) {
        let mut customer = self.customer.clone();
        customer.credit_limit = limit;
        self.db.customers().update(&customer).await.unwrap();
    }
}
