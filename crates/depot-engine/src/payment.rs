//! # Cheque & Payment Engine
//!
//! Customer payments and the lifecycle of the cheques behind them.
//!
//! ## Cheque Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  record_payment(method = cheque)                                       │
//! │        │  credit customer (amount)                                     │
//! │        ▼                                                                │
//! │    PENDING ───── clear() ─────────► CLEARED     no ledger effect       │
//! │        │                                                                │
//! │        └──────── return_cheque() ─► RETURNED    debit customer,        │
//! │                                                 reversal_of = credit   │
//! │                                                                         │
//! │  cancel_payment() only while the cheque is PENDING (or there is none): │
//! │  reverse the credit, delete payment, delete cheque                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use depot_core::clock::Clock;
use depot_core::ledger::{Posting, ReferenceType};
use depot_core::payment::{Cheque, ChequeStatus, NewPayment, Payment};
use depot_core::sequence::EntityType;
use depot_core::validation::{validate_actor, validate_text};
use depot_db::Database;

use crate::error::{EngineError, EngineResult};

const MAX_REASON_LENGTH: usize = 500;

/// Payment recording and cheque state changes.
#[derive(Debug, Clone)]
pub struct ChequePaymentEngine {
    db: Database,
}

impl ChequePaymentEngine {
    pub fn new(db: Database) -> Self {
        ChequePaymentEngine { db }
    }

    /// Records a payment, with its cheque for cheque payments, and credits
    /// the customer.
    ///
    /// ## Returns
    /// The payment id. Its number (`PAY-00001`) is on the stored payment.
    pub async fn record_payment(&self, new: &NewPayment, actor_id: &str) -> EngineResult<String> {
        validate_actor(actor_id)?;
        new.validate()?;

        match self.db.customers().get_by_id(&new.customer_id).await? {
            Some(customer) if customer.is_active => {}
            _ => return Err(EngineError::unknown_reference("customer_id", "customer", &new.customer_id)),
        }
        if let Some(voucher_id) = &new.issue_voucher_id {
            if self.db.vouchers().get_by_id(voucher_id).await?.is_none() {
                return Err(EngineError::unknown_reference("issue_voucher_id", "voucher", voucher_id));
            }
        }

        let payments = self.db.payments();
        let now = self.db.clock().now();
        let payment_id = Uuid::new_v4().to_string();

        let mut tx = self.db.pool().begin().await?;

        let number = self
            .db
            .sequences()
            .next(&mut tx, EntityType::Payments, self.db.clock().year())
            .await?;

        let cheque = new.cheque.as_ref().map(|details| Cheque {
            id: Uuid::new_v4().to_string(),
            customer_id: new.customer_id.clone(),
            cheque_number: details.cheque_number.clone(),
            bank_name: details.bank_name.clone(),
            due_date: details.due_date,
            amount: new.amount,
            status: ChequeStatus::Pending,
            payment_id: None,
            issue_voucher_id: new.issue_voucher_id.clone(),
            cleared_by: None,
            cleared_at: None,
            returned_by: None,
            returned_at: None,
            return_reason: None,
            created_at: now,
            updated_at: now,
        });
        if let Some(cheque) = &cheque {
            payments.insert_cheque(&mut tx, cheque).await?;
        }

        let payment = Payment {
            id: payment_id.clone(),
            payment_number: number.formatted.clone(),
            customer_id: new.customer_id.clone(),
            payment_date: new.payment_date,
            amount: new.amount,
            method: new.method,
            cheque_id: cheque.as_ref().map(|c| c.id.clone()),
            issue_voucher_id: new.issue_voucher_id.clone(),
            notes: new.notes.clone(),
            created_by: actor_id.to_string(),
            created_at: now,
        };
        payments.insert_payment(&mut tx, &payment).await?;
        if let Some(cheque) = &cheque {
            payments.link_cheque(&mut tx, &cheque.id, &payment.id).await?;
        }

        let posting = Posting::credit(
            &payment.customer_id,
            payment.amount,
            ReferenceType::Payment,
            &payment.id,
            payment.payment_date,
            actor_id,
        )
        .with_number(number.formatted.clone())
        .with_description(format!("Payment {}", number));
        self.db.accounts().post(&mut tx, &posting).await?;

        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            number = %number,
            customer_id = %payment.customer_id,
            amount = %payment.amount,
            cheque = payment.cheque_id.is_some(),
            "Payment recorded"
        );
        Ok(payment_id)
    }

    /// `PENDING → CLEARED`. The payment's credit stands as it is.
    pub async fn clear(&self, cheque_id: &str, actor_id: &str) -> EngineResult<()> {
        validate_actor(actor_id)?;
        let payments = self.db.payments();

        let mut tx = self.db.pool().begin().await?;
        let cheque = payments.lock_cheque(&mut tx, cheque_id).await?;
        cheque.status.ensure_transition(&cheque.id, ChequeStatus::Cleared)?;
        payments
            .mark_cleared(&mut tx, &cheque.id, actor_id, self.db.clock().now())
            .await?;
        tx.commit().await?;

        info!(cheque_id, number = %cheque.cheque_number, "Cheque cleared");
        Ok(())
    }

    /// `PENDING → RETURNED`, debiting the customer with the cheque amount.
    ///
    /// The debit points at the payment's credit entry through `reversal_of`,
    /// so the pair reads as one undone payment on the statement.
    pub async fn return_cheque(&self, cheque_id: &str, reason: &str, actor_id: &str) -> EngineResult<()> {
        validate_actor(actor_id)?;
        validate_text("reason", reason, MAX_REASON_LENGTH)?;

        let payments = self.db.payments();
        let accounts = self.db.accounts();
        let clock = self.db.clock();

        let mut tx = self.db.pool().begin().await?;
        let locked = payments.lock_cheque(&mut tx, cheque_id).await?;
        locked.status.ensure_transition(&locked.id, ChequeStatus::Returned)?;

        let credit_entry = match &locked.payment_id {
            Some(payment_id) => accounts.open_credit(&mut tx, ReferenceType::Payment, payment_id).await?,
            None => None,
        };
        payments
            .mark_returned(&mut tx, &locked.id, reason.trim(), actor_id, clock.now())
            .await?;

        let mut posting = Posting::debit(
            &locked.customer_id,
            locked.amount,
            ReferenceType::Cheque,
            &locked.id,
            clock.today(),
            actor_id,
        )
        .with_number(locked.cheque_number.clone())
        .with_description(format!("Returned cheque {}: {}", locked.cheque_number, reason.trim()));
        if let Some(entry) = &credit_entry {
            posting = posting.reversing(&entry.id);
        }
        accounts.post(&mut tx, &posting).await?;

        tx.commit().await?;

        warn!(
            cheque_id,
            number = %locked.cheque_number,
            amount = %locked.amount,
            customer_id = %locked.customer_id,
            reason = reason.trim(),
            "Cheque returned"
        );
        Ok(())
    }

    /// Undoes a payment whose cheque (if any) is still pending.
    ///
    /// ## Errors
    /// `IllegalReversal` when the cheque was already cleared or returned.
    pub async fn cancel_payment(&self, payment_id: &str, actor_id: &str) -> EngineResult<()> {
        validate_actor(actor_id)?;
        let payments = self.db.payments();

        let mut tx = self.db.pool().begin().await?;
        let payment = payments.lock_payment(&mut tx, payment_id).await?;

        let cheque = match &payment.cheque_id {
            Some(cheque_id) => Some(payments.lock_cheque(&mut tx, cheque_id).await?),
            None => None,
        };
        if let Some(cheque) = &cheque {
            if cheque.status != ChequeStatus::Pending {
                return Err(EngineError::IllegalReversal {
                    reason: format!(
                        "payment {} is backed by cheque {} which is already {}",
                        payment.payment_number, cheque.cheque_number, cheque.status
                    ),
                });
            }
        }

        self.db
            .accounts()
            .reverse_document(&mut tx, ReferenceType::Payment, &payment.id, self.db.clock().today(), actor_id)
            .await?;

        payments.delete_payment(&mut tx, &payment.id).await?;
        if let Some(cheque) = &cheque {
            payments.delete_pending_cheque(&mut tx, &cheque.id).await?;
        }
        tx.commit().await?;

        info!(
            payment_id,
            number = %payment.payment_number,
            amount = %payment.amount,
            "Payment cancelled"
        );
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_payment(&self, payment_id: &str) -> EngineResult<Payment> {
        self.db
            .payments()
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))
    }

    pub async fn get_cheque(&self, cheque_id: &str) -> EngineResult<Cheque> {
        self.db
            .payments()
            .get_cheque(cheque_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Cheque", cheque_id))
    }

    pub async fn payments_for_customer(&self, customer_id: &str) -> EngineResult<Vec<Payment>> {
        Ok(self.db.payments().payments_for_customer(customer_id).await?)
    }

    /// Pending cheques due before `as_of`.
    pub async fn overdue_cheques(&self, as_of: NaiveDate) -> EngineResult<Vec<Cheque>> {
        Ok(self.db.payments().overdue_cheques(as_of).await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{day, Fixture};
    use depot_core::money::Money;
    use depot_core::payment::{ChequeDetails, PaymentMethod};

    fn cheque_payment(fx: &Fixture, cents: i64) -> NewPayment {
        NewPayment {
            customer_id: fx.customer.id.clone(),
            amount: Money::from_cents(cents),
            method: PaymentMethod::Cheque,
            payment_date: day(1),
            cheque: Some(ChequeDetails {
                cheque_number: "000451".to_string(),
                bank_name: "National Bank".to_string(),
                due_date: day(20),
            }),
            issue_voucher_id: None,
            notes: None,
        }
    }

    fn cash_payment(fx: &Fixture, cents: i64) -> NewPayment {
        NewPayment {
            method: PaymentMethod::Cash,
            cheque: None,
            ..cheque_payment(fx, cents)
        }
    }

    #[tokio::test]
    async fn test_returned_cheque_debits_customer() {
        let fx = Fixture::new().await;

        let payment_id = fx.payments.record_payment(&cheque_payment(&fx, 50_000), "cashier").await.unwrap();
        let payment = fx.payments.get_payment(&payment_id).await.unwrap();
        assert_eq!(payment.payment_number, "PAY-00001");
        let after_payment = fx.balance().await;
        assert_eq!(after_payment, Money::from_cents(50_000));

        let cheque_id = payment.cheque_id.clone().unwrap();
        let cheque = fx.payments.get_cheque(&cheque_id).await.unwrap();
        assert_eq!(cheque.status, ChequeStatus::Pending);
        assert_eq!(cheque.payment_id.as_deref(), Some(payment_id.as_str()));

        fx.payments
            .return_cheque(&cheque_id, "insufficient funds", "cashier")
            .await
            .unwrap();

        let cheque = fx.payments.get_cheque(&cheque_id).await.unwrap();
        assert_eq!(cheque.status, ChequeStatus::Returned);
        assert_eq!(cheque.return_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(fx.balance().await, after_payment - Money::from_cents(50_000));

        let entries = fx.db.accounts().entries(&fx.customer.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].reference_type, ReferenceType::Cheque);
        assert_eq!(entries[1].reversal_of.as_deref(), Some(entries[0].id.as_str()));

        let err = fx.payments.clear(&cheque_id, "cashier").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInTerminalState { .. }));
    }

    #[tokio::test]
    async fn test_return_consumes_the_open_payment_credit() {
        let fx = Fixture::new().await;

        let payment_id = fx.payments.record_payment(&cheque_payment(&fx, 7_500), "cashier").await.unwrap();
        let cheque_id = fx.payments.get_payment(&payment_id).await.unwrap().cheque_id.unwrap();
        fx.payments.return_cheque(&cheque_id, "signature mismatch", "cashier").await.unwrap();

        let accounts = fx.db.accounts();
        let mut tx = fx.db.pool().begin().await.unwrap();
        let open = accounts.open_credit(&mut tx, ReferenceType::Payment, &payment_id).await.unwrap();
        assert!(open.is_none());
        drop(tx);

        let err = fx.payments.return_cheque(&cheque_id, "again", "cashier").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInTerminalState { .. }));
        let err = fx
            .payments
            .return_cheque(&Uuid::new_v4().to_string(), "lost", "cashier")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));

        assert_eq!(fx.balance().await, Money::zero());
        assert_eq!(accounts.entries(&fx.customer.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backdated_payment_numbered_in_current_year() {
        let fx = Fixture::new().await;

        let mut new = cash_payment(&fx, 1_000);
        new.payment_date = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        let payment_id = fx.payments.record_payment(&new, "cashier").await.unwrap();

        let payment = fx.payments.get_payment(&payment_id).await.unwrap();
        assert_eq!(payment.payment_number, "PAY-00001");
        assert_eq!(payment.payment_date, new.payment_date);
        assert_eq!(fx.db.sequences().issued(EntityType::Payments, 2025).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelling_payment_of_cleared_cheque_is_illegal() {
        let fx = Fixture::new().await;

        let payment_id = fx.payments.record_payment(&cheque_payment(&fx, 20_000), "cashier").await.unwrap();
        let cheque_id = fx.payments.get_payment(&payment_id).await.unwrap().cheque_id.unwrap();
        fx.payments.clear(&cheque_id, "cashier").await.unwrap();
        assert_eq!(fx.balance().await, Money::from_cents(20_000));

        let err = fx.payments.cancel_payment(&payment_id, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::IllegalReversal { .. }));
        assert_eq!(fx.balance().await, Money::from_cents(20_000));
        assert!(fx.payments.get_payment(&payment_id).await.is_ok());

        let err = fx.payments.clear(&cheque_id, "cashier").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInTerminalState { .. }));
    }

    #[tokio::test]
    async fn test_cancel_pending_cheque_payment() {
        let fx = Fixture::new().await;

        let payment_id = fx.payments.record_payment(&cheque_payment(&fx, 20_000), "cashier").await.unwrap();
        let cheque_id = fx.payments.get_payment(&payment_id).await.unwrap().cheque_id.unwrap();

        fx.payments.cancel_payment(&payment_id, "manager").await.unwrap();

        assert_eq!(fx.balance().await, Money::zero());
        assert!(matches!(
            fx.payments.get_payment(&payment_id).await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            fx.payments.get_cheque(&cheque_id).await,
            Err(EngineError::NotFound { .. })
        ));
        // The ledger keeps both sides.
        let entries = fx.db.accounts().entries(&fx.customer.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(fx.db.accounts().verify(&fx.customer.id).await.unwrap().is_consistent);
    }

    #[tokio::test]
    async fn test_cash_payment_numbers_and_cancel() {
        let fx = Fixture::new().await;

        let first = fx.payments.record_payment(&cash_payment(&fx, 1_000), "cashier").await.unwrap();
        let second = fx.payments.record_payment(&cash_payment(&fx, 2_500), "cashier").await.unwrap();
        assert_eq!(fx.payments.get_payment(&second).await.unwrap().payment_number, "PAY-00002");
        assert!(fx.payments.get_payment(&first).await.unwrap().cheque_id.is_none());
        assert_eq!(fx.balance().await, Money::from_cents(3_500));

        fx.payments.cancel_payment(&first, "manager").await.unwrap();
        assert_eq!(fx.balance().await, Money::from_cents(2_500));
        assert_eq!(fx.payments.payments_for_customer(&fx.customer.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payment_validation() {
        let fx = Fixture::new().await;

        let mut bad = cash_payment(&fx, 1_000);
        bad.cheque = cheque_payment(&fx, 1_000).cheque;
        assert!(matches!(
            fx.payments.record_payment(&bad, "cashier").await,
            Err(EngineError::Validation(_))
        ));

        let mut missing = cheque_payment(&fx, 1_000);
        missing.cheque = None;
        assert!(fx.payments.record_payment(&missing, "cashier").await.is_err());

        assert!(fx.payments.record_payment(&cash_payment(&fx, 0), "cashier").await.is_err());

        let mut stranger = cash_payment(&fx, 1_000);
        stranger.customer_id = Uuid::new_v4().to_string();
        assert!(matches!(
            fx.payments.record_payment(&stranger, "cashier").await,
            Err(EngineError::Validation(_))
        ));

        assert_eq!(fx.balance().await, Money::zero());
    }

    #[tokio::test]
    async fn test_return_requires_reason_and_overdue_listing() {
        let fx = Fixture::new().await;

        let payment_id = fx.payments.record_payment(&cheque_payment(&fx, 5_000), "cashier").await.unwrap();
        let cheque_id = fx.payments.get_payment(&payment_id).await.unwrap().cheque_id.unwrap();

        let err = fx.payments.return_cheque(&cheque_id, "   ", "cashier").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        assert!(fx.payments.overdue_cheques(day(20)).await.unwrap().is_empty());
        assert_eq!(fx.payments.overdue_cheques(day(21)).await.unwrap().len(), 1);

        fx.payments.clear(&cheque_id, "cashier").await.unwrap();
        assert!(fx.payments.overdue_cheques(day(21)).await.unwrap().is_empty());
    }
}
