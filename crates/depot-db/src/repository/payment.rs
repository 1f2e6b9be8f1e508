//! # Payment Repository
//!
//! Payments and the cheques behind cheque payments.
//!
//! ## Cheque/Payment Link
//! ```text
//! 1. INSERT cheques   (payment_id NULL, status PENDING)
//! 2. INSERT payments  (cheque_id → cheque)
//! 3. UPDATE cheques   SET payment_id → payment
//! ```
//! Both foreign keys are `ON DELETE SET NULL`, so deleting the payment
//! first and the cheque second never trips a constraint.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use depot_core::payment::{Cheque, ChequeStatus, Payment};

use crate::error::{DbError, DbResult};

/// Repository for payments and cheques.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Writes (caller's transaction)
    // -------------------------------------------------------------------------

    pub async fn insert_cheque(&self, conn: &mut SqliteConnection, cheque: &Cheque) -> DbResult<()> {
        debug!(id = %cheque.id, number = %cheque.cheque_number, "Inserting cheque");

        sqlx::query(
            "INSERT INTO cheques (id, customer_id, cheque_number, bank_name, due_date, amount, status, \
             payment_id, issue_voucher_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&cheque.id)
        .bind(&cheque.customer_id)
        .bind(&cheque.cheque_number)
        .bind(&cheque.bank_name)
        .bind(cheque.due_date)
        .bind(cheque.amount)
        .bind(cheque.status)
        .bind(&cheque.payment_id)
        .bind(&cheque.issue_voucher_id)
        .bind(cheque.created_at)
        .bind(cheque.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn insert_payment(&self, conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        debug!(id = %payment.id, number = %payment.payment_number, "Inserting payment");

        sqlx::query(
            "INSERT INTO payments (id, payment_number, customer_id, payment_date, amount, method, \
             cheque_id, issue_voucher_id, notes, created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&payment.id)
        .bind(&payment.payment_number)
        .bind(&payment.customer_id)
        .bind(payment.payment_date)
        .bind(payment.amount)
        .bind(payment.method)
        .bind(&payment.cheque_id)
        .bind(&payment.issue_voucher_id)
        .bind(&payment.notes)
        .bind(&payment.created_by)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Points a cheque at the payment it funds.
    pub async fn link_cheque(&self, conn: &mut SqliteConnection, cheque_id: &str, payment_id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE cheques SET payment_id = ?2 WHERE id = ?1")
            .bind(cheque_id)
            .bind(payment_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Cheque", cheque_id));
        }
        Ok(())
    }

    pub async fn lock_payment(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Payment> {
        let touched = sqlx::query("UPDATE payments SET amount = amount WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("Payment", id));
        }

        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(payment)
    }

    pub async fn lock_cheque(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Cheque> {
        let touched = sqlx::query("UPDATE cheques SET status = status WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("Cheque", id));
        }

        let cheque = sqlx::query_as::<_, Cheque>("SELECT * FROM cheques WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(cheque)
    }

    /// `PENDING → CLEARED`.
    pub async fn mark_cleared(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE cheques SET status = ?2, cleared_by = ?3, cleared_at = ?4, updated_at = ?4 \
             WHERE id = ?1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(ChequeStatus::Cleared)
        .bind(actor_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Pending cheque", id));
        }
        Ok(())
    }

    /// `PENDING → RETURNED`.
    pub async fn mark_returned(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        reason: &str,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE cheques SET status = ?2, return_reason = ?3, returned_by = ?4, returned_at = ?5, \
             updated_at = ?5 WHERE id = ?1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(ChequeStatus::Returned)
        .bind(reason)
        .bind(actor_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Pending cheque", id));
        }
        Ok(())
    }

    pub async fn delete_payment(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM payments WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Payment", id));
        }
        Ok(())
    }

    /// Deletes a cheque that is still pending.
    pub async fn delete_pending_cheque(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM cheques WHERE id = ?1 AND status = 'PENDING'")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Pending cheque", id));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn get_payment(&self, id: &str) -> DbResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    pub async fn get_cheque(&self, id: &str) -> DbResult<Option<Cheque>> {
        let cheque = sqlx::query_as::<_, Cheque>("SELECT * FROM cheques WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(cheque)
    }

    pub async fn payments_for_customer(&self, customer_id: &str) -> DbResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE customer_id = ?1 ORDER BY payment_date, rowid",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// Pending cheques due strictly before `as_of`, oldest due date first.
    pub async fn overdue_cheques(&self, as_of: NaiveDate) -> DbResult<Vec<Cheque>> {
        let cheques = sqlx::query_as::<_, Cheque>(
            "SELECT * FROM cheques WHERE status = 'PENDING' AND due_date < ?1 ORDER BY due_date, rowid",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(cheques)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use depot_core::money::Money;
    use depot_core::payment::PaymentMethod;
    use depot_core::types::Customer;
    use uuid::Uuid;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    fn cheque(customer_id: &str, due: NaiveDate) -> Cheque {
        let now = Utc::now();
        Cheque {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            cheque_number: "000123".to_string(),
            bank_name: "National Bank".to_string(),
            due_date: due,
            amount: Money::from_cents(50000),
            status: ChequeStatus::Pending,
            payment_id: None,
            issue_voucher_id: None,
            cleared_by: None,
            cleared_at: None,
            returned_by: None,
            returned_at: None,
            return_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn payment(customer_id: &str, cheque_id: Option<String>) -> Payment {
        Payment {
            id: Uuid::new_v4().to_string(),
            payment_number: "PAY-00001".to_string(),
            customer_id: customer_id.to_string(),
            payment_date: date(6, 1),
            amount: Money::from_cents(50000),
            method: PaymentMethod::Cheque,
            cheque_id,
            issue_voucher_id: None,
            notes: None,
            created_by: "cashier".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_cheque_lifecycle_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customer = Customer::new("C-001", "Nile Traders", Utc::now());
        db.customers().insert(&customer).await.unwrap();
        let repo = db.payments();

        let cheque = cheque(&customer.id, date(6, 30));
        let payment = payment(&customer.id, Some(cheque.id.clone()));

        let mut tx = db.pool().begin().await.unwrap();
        repo.insert_cheque(&mut tx, &cheque).await.unwrap();
        repo.insert_payment(&mut tx, &payment).await.unwrap();
        repo.link_cheque(&mut tx, &cheque.id, &payment.id).await.unwrap();
        tx.commit().await.unwrap();

        let stored = repo.get_cheque(&cheque.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_id.as_deref(), Some(payment.id.as_str()));
        assert_eq!(repo.overdue_cheques(date(7, 1)).await.unwrap().len(), 1);
        assert!(repo.overdue_cheques(date(6, 30)).await.unwrap().is_empty());

        let mut tx = db.pool().begin().await.unwrap();
        repo.mark_returned(&mut tx, &cheque.id, "insufficient funds", "cashier", Utc::now())
            .await
            .unwrap();
        assert!(repo.mark_cleared(&mut tx, &cheque.id, "cashier", Utc::now()).await.is_err());
        tx.commit().await.unwrap();

        let returned = repo.get_cheque(&cheque.id).await.unwrap().unwrap();
        assert_eq!(returned.status, ChequeStatus::Returned);
        assert_eq!(returned.return_reason.as_deref(), Some("insufficient funds"));
        assert!(repo.overdue_cheques(date(7, 1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_payment_then_cheque() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customer = Customer::new("C-001", "Nile Traders", Utc::now());
        db.customers().insert(&customer).await.unwrap();
        let repo = db.payments();

        let cheque = cheque(&customer.id, date(6, 30));
        let payment = payment(&customer.id, Some(cheque.id.clone()));

        let mut tx = db.pool().begin().await.unwrap();
        repo.insert_cheque(&mut tx, &cheque).await.unwrap();
        repo.insert_payment(&mut tx, &payment).await.unwrap();
        repo.link_cheque(&mut tx, &cheque.id, &payment.id).await.unwrap();
        let locked = repo.lock_payment(&mut tx, &payment.id).await.unwrap();
        assert_eq!(locked.cheque_id.as_deref(), Some(cheque.id.as_str()));
        repo.delete_payment(&mut tx, &payment.id).await.unwrap();
        repo.delete_pending_cheque(&mut tx, &cheque.id).await.unwrap();
        tx.commit().await.unwrap();

        assert!(repo.get_payment(&payment.id).await.unwrap().is_none());
        assert!(repo.get_cheque(&cheque.id).await.unwrap().is_none());
        assert!(repo.payments_for_customer(&customer.id).await.unwrap().is_empty());
    }
}
