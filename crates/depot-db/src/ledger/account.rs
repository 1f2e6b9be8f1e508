//! # CustomerAccount
//!
//! Append-only customer ledger and the cached `customers.balance`
//! projection.
//!
//! ## Posting
//! ```text
//! post(conn, posting)
//!      │
//!      ├── validate (exactly one positive side)
//!      ├── lock customer row
//!      ├── new_balance = balance + credit − debit
//!      ├── INSERT customer_ledger_entries (balance_after = new_balance)
//!      └── UPDATE customers SET balance = new_balance
//! ```
//!
//! Entries are never updated. Undoing one posts its mirror with
//! `reversal_of` set; the partial unique index on `reversal_of` makes a
//! second reversal of the same entry impossible.

use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use depot_core::clock::Clock;
use depot_core::error::{CoreError, ValidationError};
use depot_core::ledger::{
    correction, BalanceCheck, CreditCheck, CustomerBalance, LedgerEntry, Posting, ReferenceType, Statement,
};
use depot_core::money::Money;
use depot_core::types::Customer;
use depot_core::validation::{validate_actor, validate_text};

use crate::error::{DbError, DbResult};

/// Customer ledger.
#[derive(Debug, Clone)]
pub struct CustomerAccount {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl CustomerAccount {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        CustomerAccount { pool, clock }
    }

    // =========================================================================
    // Transactional API
    // =========================================================================

    /// Locks the customer row and returns it.
    pub async fn lock(&self, conn: &mut SqliteConnection, customer_id: &str) -> DbResult<Customer> {
        let touched = sqlx::query("UPDATE customers SET balance = balance WHERE id = ?1")
            .bind(customer_id)
            .execute(&mut *conn)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", customer_id));
        }

        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?1")
            .bind(customer_id)
            .fetch_one(&mut *conn)
            .await?;

        Ok(customer)
    }

    /// Appends one entry and moves the cached balance with it.
    ///
    /// ## Errors
    /// * `Rule(Validation)` - negative amounts, both zero or both set
    /// * `Rule(IllegalReversal)` - `reversal_of` names an entry that is
    ///   missing or already reversed
    /// * `NotFound` - unknown customer
    pub async fn post(&self, conn: &mut SqliteConnection, posting: &Posting) -> DbResult<LedgerEntry> {
        posting.validate()?;

        let customer = self.lock(conn, &posting.customer_id).await?;

        if let Some(original_id) = &posting.reversal_of {
            self.ensure_reversible(conn, original_id).await?;
        }

        let new_balance = posting.apply(customer.balance);
        let now = self.clock.now();

        let entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            customer_id: posting.customer_id.clone(),
            transaction_date: posting.transaction_date,
            debit: posting.debit,
            credit: posting.credit,
            balance_after: new_balance,
            reference_type: posting.reference_type,
            reference_id: posting.reference_id.clone(),
            reference_number: posting.reference_number.clone(),
            description: posting.description.clone(),
            reversal_of: posting.reversal_of.clone(),
            actor_id: posting.actor_id.clone(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO customer_ledger_entries (id, customer_id, transaction_date, debit, credit, \
             balance_after, reference_type, reference_id, reference_number, description, reversal_of, \
             actor_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&entry.id)
        .bind(&entry.customer_id)
        .bind(entry.transaction_date)
        .bind(entry.debit)
        .bind(entry.credit)
        .bind(entry.balance_after)
        .bind(entry.reference_type)
        .bind(&entry.reference_id)
        .bind(&entry.reference_number)
        .bind(&entry.description)
        .bind(&entry.reversal_of)
        .bind(&entry.actor_id)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        sqlx::query("UPDATE customers SET balance = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(new_balance)
            .bind(now)
            .bind(&customer.id)
            .execute(&mut *conn)
            .await?;

        debug!(
            customer_id = %customer.id,
            reference_type = %entry.reference_type,
            reference_id = %entry.reference_id,
            debit = %entry.debit,
            credit = %entry.credit,
            balance_before = %customer.balance,
            balance_after = %new_balance,
            "Ledger entry posted"
        );
        Ok(entry)
    }

    async fn ensure_reversible(&self, conn: &mut SqliteConnection, original_id: &str) -> DbResult<()> {
        let original: Option<(Option<String>,)> =
            sqlx::query_as("SELECT reversal_of FROM customer_ledger_entries WHERE id = ?1")
                .bind(original_id)
                .fetch_optional(&mut *conn)
                .await?;

        match original {
            None => Err(CoreError::IllegalReversal {
                reason: format!("ledger entry {} does not exist", original_id),
            }
            .into()),
            Some((Some(_),)) => Err(CoreError::IllegalReversal {
                reason: format!("ledger entry {} is itself a reversal", original_id),
            }
            .into()),
            Some((None,)) => {
                let reversed: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM customer_ledger_entries WHERE reversal_of = ?1")
                        .bind(original_id)
                        .fetch_one(&mut *conn)
                        .await?;
                if reversed > 0 {
                    return Err(CoreError::IllegalReversal {
                        reason: format!("ledger entry {} is already reversed", original_id),
                    }
                    .into());
                }
                Ok(())
            }
        }
    }

    /// Posts the mirror of one entry.
    pub async fn reverse_entry(
        &self,
        conn: &mut SqliteConnection,
        entry_id: &str,
        transaction_date: NaiveDate,
        actor_id: &str,
    ) -> DbResult<LedgerEntry> {
        let entry = sqlx::query_as::<_, LedgerEntry>("SELECT * FROM customer_ledger_entries WHERE id = ?1")
            .bind(entry_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("LedgerEntry", entry_id))?;

        self.post(conn, &entry.reversal(transaction_date, actor_id)).await
    }

    /// Reverses every entry of a document that has not been reversed yet.
    ///
    /// ## Returns
    /// The reversing entries, empty when the document never touched the
    /// ledger or is fully reversed.
    pub async fn reverse_document(
        &self,
        conn: &mut SqliteConnection,
        reference_type: ReferenceType,
        reference_id: &str,
        transaction_date: NaiveDate,
        actor_id: &str,
    ) -> DbResult<Vec<LedgerEntry>> {
        let open = sqlx::query_as::<_, LedgerEntry>(
            "SELECT e.* FROM customer_ledger_entries e \
             WHERE e.reference_type = ?1 AND e.reference_id = ?2 AND e.reversal_of IS NULL \
             AND NOT EXISTS (SELECT 1 FROM customer_ledger_entries r WHERE r.reversal_of = e.id) \
             ORDER BY e.rowid",
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut reversals = Vec::with_capacity(open.len());
        for entry in &open {
            reversals.push(self.post(conn, &entry.reversal(transaction_date, actor_id)).await?);
        }

        if !reversals.is_empty() {
            info!(
                reference_type = %reference_type,
                reference_id,
                reversed = reversals.len(),
                "Document ledger entries reversed"
            );
        }
        Ok(reversals)
    }

    /// The document's credit entry that nothing has reversed yet, read in
    /// the caller's transaction.
    pub async fn open_credit(
        &self,
        conn: &mut SqliteConnection,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> DbResult<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            "SELECT e.* FROM customer_ledger_entries e \
             WHERE e.reference_type = ?1 AND e.reference_id = ?2 AND e.credit > 0 AND e.reversal_of IS NULL \
             AND NOT EXISTS (SELECT 1 FROM customer_ledger_entries r WHERE r.reversal_of = e.id) \
             ORDER BY e.rowid LIMIT 1",
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(entry)
    }

    // =========================================================================
    // Self-contained operations
    // =========================================================================

    /// Posts one `adjustment` entry so the balance equals `target`.
    ///
    /// ## Returns
    /// `None` when the balance already equals `target`.
    pub async fn correct_balance(
        &self,
        customer_id: &str,
        target: Money,
        reason: &str,
        transaction_date: NaiveDate,
        actor_id: &str,
    ) -> DbResult<Option<LedgerEntry>> {
        validate_text("reason", reason, 500)?;
        validate_actor(actor_id)?;

        let mut tx = self.pool.begin().await?;
        let customer = self.lock(&mut tx, customer_id).await?;

        let Some((debit, credit)) = correction(customer.balance, target) else {
            return Ok(None);
        };

        let reference_id = Uuid::new_v4().to_string();
        let posting = if debit.is_positive() {
            Posting::debit(customer_id, debit, ReferenceType::Adjustment, reference_id, transaction_date, actor_id)
        } else {
            Posting::credit(customer_id, credit, ReferenceType::Adjustment, reference_id, transaction_date, actor_id)
        }
        .with_description(reason.trim());

        let entry = self.post(&mut tx, &posting).await?;
        tx.commit().await?;

        warn!(
            customer_id,
            from = %customer.balance,
            to = %target,
            reason = reason.trim(),
            "Customer balance corrected"
        );
        Ok(Some(entry))
    }

    // =========================================================================
    // Read-only queries
    // =========================================================================

    async fn customer(&self, customer_id: &str) -> DbResult<Customer> {
        sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", customer_id))
    }

    /// Cached balance. Positive: in credit. Negative: owes.
    pub async fn balance(&self, customer_id: &str) -> DbResult<Money> {
        Ok(self.customer(customer_id).await?.balance)
    }

    /// All entries of a customer in posting order.
    pub async fn entries(&self, customer_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM customer_ledger_entries WHERE customer_id = ?1 ORDER BY rowid",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn entries_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> DbResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM customer_ledger_entries WHERE reference_type = ?1 AND reference_id = ?2 \
             ORDER BY rowid",
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Account statement for `from..=to` by transaction date.
    pub async fn statement(&self, customer_id: &str, from: NaiveDate, to: NaiveDate) -> DbResult<Statement> {
        if to < from {
            return Err(ValidationError::InvalidFormat {
                field: "to".to_string(),
                reason: "must not be before from".to_string(),
            }
            .into());
        }
        // Existence check
        self.customer(customer_id).await?;

        let opening: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(credit - debit), 0) FROM customer_ledger_entries \
             WHERE customer_id = ?1 AND transaction_date < ?2",
        )
        .bind(customer_id)
        .bind(from)
        .fetch_one(&self.pool)
        .await?;

        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM customer_ledger_entries \
             WHERE customer_id = ?1 AND transaction_date >= ?2 AND transaction_date <= ?3 \
             ORDER BY transaction_date, rowid",
        )
        .bind(customer_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(Statement::build(customer_id, from, to, Money::from_cents(opening), entries))
    }

    /// Every customer with their balance status, by code.
    pub async fn balances(&self) -> DbResult<Vec<CustomerBalance>> {
        let customers = sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY code")
            .fetch_all(&self.pool)
            .await?;

        Ok(customers.iter().map(CustomerBalance::from).collect())
    }

    /// Compares the cached balance with the ledger sum.
    pub async fn verify(&self, customer_id: &str) -> DbResult<BalanceCheck> {
        let customer = self.customer(customer_id).await?;
        let ledger: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(credit - debit), 0) FROM customer_ledger_entries WHERE customer_id = ?1",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        let check = BalanceCheck::new(customer_id, customer.balance, Money::from_cents(ledger));
        if !check.is_consistent {
            warn!(
                customer_id,
                cached = %check.cached_balance,
                ledger = %check.ledger_balance,
                "Customer balance does not match ledger"
            );
        }
        Ok(check)
    }

    /// Customers whose cached balance disagrees with their ledger.
    pub async fn verify_all(&self) -> DbResult<Vec<BalanceCheck>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT c.id, c.balance, COALESCE(SUM(e.credit - e.debit), 0) \
             FROM customers c LEFT JOIN customer_ledger_entries e ON e.customer_id = c.id \
             GROUP BY c.id, c.balance \
             HAVING c.balance <> COALESCE(SUM(e.credit - e.debit), 0) \
             ORDER BY c.code",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, cached, ledger)| BalanceCheck::new(id, Money::from_cents(cached), Money::from_cents(ledger)))
            .collect())
    }

    /// Projects `additional_debit` against the customer's credit limit.
    pub async fn credit_check(&self, customer_id: &str, additional_debit: Money) -> DbResult<CreditCheck> {
        let customer = self.customer(customer_id).await?;
        Ok(CreditCheck::project(&customer, additional_debit))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
