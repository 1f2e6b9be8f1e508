//! # Customer Repository
//!
//! Customer master data. `balance` is written only by
//! [`crate::ledger::CustomerAccount`]: `insert` stores zero and `update`
//! never touches it.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use depot_core::error::ValidationError;
use depot_core::money::Money;
use depot_core::types::Customer;
use depot_core::validation::{validate_code, validate_name, validate_text};

use crate::error::{DbError, DbResult};

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    fn validate(customer: &Customer) -> DbResult<()> {
        validate_code(&customer.code)?;
        validate_name(&customer.name)?;
        if let Some(phone) = &customer.phone {
            validate_text("phone", phone, 30)?;
        }
        if customer.credit_limit.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "credit_limit".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Inserts a new customer with a zero balance.
    pub async fn insert(&self, customer: &Customer) -> DbResult<Customer> {
        Self::validate(customer)?;
        debug!(code = %customer.code, "Inserting customer");

        sqlx::query(
            "INSERT INTO customers (id, code, name, phone, credit_limit, balance, is_active, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
        )
        .bind(&customer.id)
        .bind(customer.code.trim())
        .bind(customer.name.trim())
        .bind(&customer.phone)
        .bind(customer.credit_limit)
        .bind(customer.is_active)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, customer.code.trim()),
            other => other,
        })?;

        let mut stored = customer.clone();
        stored.balance = Money::zero();
        Ok(stored)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(customer)
    }

    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE code = ?1")
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(customer)
    }

    pub async fn list_active(&self) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE is_active = 1 ORDER BY code")
            .fetch_all(&self.pool)
            .await?;

        Ok(customers)
    }

    /// Updates name, phone, credit limit and active flag.
    pub async fn update(&self, customer: &Customer) -> DbResult<()> {
        Self::validate(customer)?;
        debug!(id = %customer.id, "Updating customer");

        let result = sqlx::query(
            "UPDATE customers SET code = ?2, name = ?3, phone = ?4, credit_limit = ?5, is_active = ?6, \
             updated_at = ?7 WHERE id = ?1",
        )
        .bind(&customer.id)
        .bind(customer.code.trim())
        .bind(customer.name.trim())
        .bind(&customer.phone)
        .bind(customer.credit_limit)
        .bind(customer.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", &customer.id));
        }

        Ok(())
    }
}
