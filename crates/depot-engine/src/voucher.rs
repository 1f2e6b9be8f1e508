//! # Voucher Engine
//!
//! Creates, approves and cancels issue, return and transfer vouchers.
//!
//! ## Approval
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  approve(voucher_id, actor)                                            │
//! │                                                                         │
//! │  Pre-check (pool, no transaction)                                      │
//! │    status == DRAFT                  else AlreadyInTerminalState        │
//! │    stock per line (cumulative)      short → Rejected(InsufficientStock)│
//! │    credit limit (issue, on account) warn → warning, block → Rejected   │
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │    1. SequenceAllocator.next(year) ← first write, clock year          │
//! │    2. lock voucher, re-check DRAFT                                     │
//! │    3. lock stock keys (product_id, branch_id asc), apply the plan      │
//! │    4. post net_total (+ offset for cash sales)                         │
//! │    5. mark APPROVED                                                    │
//! │  COMMIT                 any error drops the tx, number included        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A debit that loses a race between pre-check and lock is reported as
//! `Rejected(InsufficientStock)`, the same as a pre-check shortage.

use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

use depot_core::clock::Clock;
use depot_core::error::CoreError;
use depot_core::ledger::{CreditCheck, Posting};
use depot_core::stock::{StockChange, StockShortage};
use depot_core::validation::validate_actor;
use depot_core::voucher::{
    ApprovalResult, ApprovalWarning, PlannedMove, RejectionReason, Voucher, VoucherDraft, VoucherItem,
    VoucherKind, VoucherStatus,
};
use depot_db::{Database, DbError};

use crate::config::{CreditLimitPolicy, VoucherConfig};
use crate::error::{EngineError, EngineResult};

/// Voucher lifecycle operations.
#[derive(Debug, Clone)]
pub struct VoucherEngine {
    db: Database,
    config: VoucherConfig,
}

impl VoucherEngine {
    pub fn new(db: Database, config: VoucherConfig) -> Self {
        VoucherEngine { db, config }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Stores a new draft and returns its id.
    ///
    /// ## Errors
    /// `Validation` for malformed drafts and for branches, customers or
    /// products that are missing or inactive. Nothing is written then.
    pub async fn create(&self, draft: &VoucherDraft, actor_id: &str) -> EngineResult<String> {
        validate_actor(actor_id)?;
        let totals = draft.validate()?;
        self.check_references(draft).await?;

        let now = self.db.clock().now();
        let id = Uuid::new_v4().to_string();

        let items = draft
            .items
            .iter()
            .zip(&totals.lines)
            .enumerate()
            .map(|(i, (item, line))| VoucherItem {
                id: Uuid::new_v4().to_string(),
                voucher_id: id.clone(),
                line_no: i as i64 + 1,
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: item.discount,
                gross: line.gross,
                discount_amount: line.discount_amount,
                net: line.net,
            })
            .collect();

        let voucher = Voucher {
            id: id.clone(),
            kind: draft.kind,
            voucher_number: None,
            number_year: None,
            customer_id: draft.customer_id.clone(),
            branch_id: draft.branch_id.clone(),
            target_branch_id: draft.target_branch_id.clone(),
            is_cash_sale: draft.is_cash_sale,
            status: VoucherStatus::Draft,
            discount: draft.discount,
            total_amount: totals.total_amount,
            subtotal: totals.subtotal,
            discount_amount: totals.discount_amount,
            net_total: totals.net_total,
            voucher_date: draft.voucher_date,
            notes: draft.notes.clone(),
            created_by: actor_id.to_string(),
            approved_by: None,
            approved_at: None,
            cancelled_by: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            items,
        };

        self.db.vouchers().insert(&voucher).await?;

        info!(
            voucher_id = %id,
            kind = %voucher.kind,
            transfer = voucher.is_transfer(),
            lines = voucher.items.len(),
            net_total = %voucher.net_total,
            "Voucher drafted"
        );
        Ok(id)
    }

    async fn check_references(&self, draft: &VoucherDraft) -> EngineResult<()> {
        self.check_branches(&draft.branch_id, draft.target_branch_id.as_deref()).await?;

        if let Some(customer_id) = &draft.customer_id {
            match self.db.customers().get_by_id(customer_id).await? {
                Some(customer) if customer.is_active => {}
                _ => return Err(EngineError::unknown_reference("customer_id", "customer", customer_id)),
            }
        }

        let products = self.db.products();
        let ids: BTreeSet<&str> = draft.items.iter().map(|i| i.product_id.as_str()).collect();
        for product_id in ids {
            match products.get_by_id(product_id).await? {
                Some(product) if product.is_active => {}
                _ => return Err(EngineError::unknown_reference("product_id", "product", product_id)),
            }
        }

        Ok(())
    }

    /// Source and target must exist and be active, at create and at approve.
    async fn check_branches(&self, branch_id: &str, target_branch_id: Option<&str>) -> EngineResult<()> {
        let branches = self.db.branches();
        let source = std::iter::once(("branch_id", branch_id));
        for (field, id) in source.chain(target_branch_id.map(|t| ("target_branch_id", t))) {
            match branches.get_by_id(id).await? {
                Some(branch) if branch.is_active => {}
                _ => return Err(EngineError::unknown_reference(field, "branch", id)),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Approve
    // =========================================================================

    /// Numbers the voucher and applies its stock and ledger effects.
    ///
    /// ## Returns
    /// * `Approved { voucher_number, warnings }` - committed
    /// * `Rejected { reasons }` - nothing written, voucher stays DRAFT
    ///
    /// ## Errors
    /// * `AlreadyInTerminalState` - not a draft
    /// * `Validation` - a branch was deactivated after the draft was made
    /// * `SequenceExhausted` / `SequenceNotConfigured` - no number available
    /// * `Busy` - lock timeout, retryable
    pub async fn approve(&self, voucher_id: &str, actor_id: &str) -> EngineResult<ApprovalResult> {
        validate_actor(actor_id)?;
        let voucher = self.get(voucher_id).await?;
        voucher.status.ensure_transition(&voucher.id, VoucherStatus::Approved)?;
        self.check_branches(&voucher.branch_id, voucher.target_branch_id.as_deref())
            .await?;

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let shortages = self.shortages(&voucher).await?;
        if !shortages.is_empty() {
            reasons.push(RejectionReason::InsufficientStock { shortages });
        }

        if let Some(check) = self.credit_check(&voucher).await? {
            if check.exceeded {
                match self.config.credit_limit_policy {
                    CreditLimitPolicy::Warn => {
                        warn!(
                            voucher_id,
                            customer_id = %check.customer_id,
                            projected = %check.projected_outstanding,
                            limit = %check.credit_limit,
                            "Credit limit exceeded"
                        );
                        warnings.push(ApprovalWarning::CreditLimitExceeded { check });
                    }
                    CreditLimitPolicy::Block => reasons.push(RejectionReason::CreditLimitExceeded { check }),
                }
            }
        }

        if !reasons.is_empty() {
            warn!(voucher_id, reasons = reasons.len(), "Voucher approval rejected");
            return Ok(ApprovalResult::Rejected { reasons });
        }

        match self.approve_locked(&voucher, actor_id).await {
            Ok(voucher_number) => Ok(ApprovalResult::Approved {
                voucher_number,
                warnings,
            }),
            Err(EngineError::InsufficientStock { shortages }) => {
                warn!(voucher_id, short_lines = shortages.len(), "Stock changed during approval");
                Ok(ApprovalResult::Rejected {
                    reasons: vec![RejectionReason::InsufficientStock { shortages }],
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn approve_locked(&self, voucher: &Voucher, actor_id: &str) -> EngineResult<String> {
        let stock = self.db.stock();
        let accounts = self.db.accounts();
        let vouchers = self.db.vouchers();
        // Numbers are scoped to the year of approval, not the document date.
        let year = self.db.clock().year();

        let mut tx = self.db.pool().begin().await?;

        let number = self
            .db
            .sequences()
            .next(&mut tx, voucher.sequence_entity(), year)
            .await?;

        let locked = vouchers.lock(&mut tx, &voucher.id).await?;
        locked.status.ensure_transition(&locked.id, VoucherStatus::Approved)?;

        let plan = locked.stock_plan();
        let credit_only = plan.credit_only_keys();
        for key in plan.lock_keys() {
            stock.lock(&mut tx, &key, credit_only.contains(&key)).await?;
        }

        for planned in &plan.moves {
            let change = StockChange {
                product_id: planned.key.product_id.clone(),
                branch_id: planned.key.branch_id.clone(),
                quantity: planned.quantity,
                movement_type: planned.movement_type,
                reference_type: locked.stock_reference_type(),
                reference_id: locked.id.clone(),
                reversal_of: None,
                notes: Some(number.formatted.clone()),
                actor_id: actor_id.to_string(),
            };
            stock
                .post(&mut tx, &change)
                .await
                .map_err(|e| shortage_on_line(e, planned))?;
        }

        if let Some(customer_id) = &locked.customer_id {
            if locked.net_total.is_positive() {
                let posting = match locked.kind {
                    VoucherKind::Issue => Posting::debit(
                        customer_id,
                        locked.net_total,
                        locked.ledger_reference_type(),
                        &locked.id,
                        locked.voucher_date,
                        actor_id,
                    ),
                    VoucherKind::Return => Posting::credit(
                        customer_id,
                        locked.net_total,
                        locked.ledger_reference_type(),
                        &locked.id,
                        locked.voucher_date,
                        actor_id,
                    ),
                }
                .with_number(number.formatted.clone())
                .with_description(format!("{} voucher {}", locked.kind, number));

                accounts.post(&mut tx, &posting).await?;
                if locked.is_cash_sale {
                    let settlement = posting.offset().with_description(format!("Cash settlement of {}", number));
                    accounts.post(&mut tx, &settlement).await?;
                }
            }
        }

        vouchers
            .mark_approved(&mut tx, &locked.id, &number.formatted, year, actor_id, self.db.clock().now())
            .await?;

        tx.commit().await?;

        info!(
            voucher_id = %locked.id,
            number = %number,
            moves = plan.moves.len(),
            net_total = %locked.net_total,
            "Voucher approved"
        );
        Ok(number.formatted)
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Cancels a draft, or undoes an approved voucher's stock and ledger
    /// effects and cancels it.
    ///
    /// ## Errors
    /// * `AlreadyInTerminalState` - already cancelled
    /// * `InsufficientStock` - the goods a reversal must take back are gone
    pub async fn cancel(&self, voucher_id: &str, actor_id: &str) -> EngineResult<()> {
        validate_actor(actor_id)?;
        let stock = self.db.stock();
        let vouchers = self.db.vouchers();
        let clock = self.db.clock();

        let mut tx = self.db.pool().begin().await?;

        let locked = vouchers.lock(&mut tx, voucher_id).await?;
        locked.status.ensure_transition(&locked.id, VoucherStatus::Cancelled)?;

        if locked.status == VoucherStatus::Approved {
            let label = locked.voucher_number.clone().unwrap_or_else(|| locked.id.clone());

            let mut reversals: Vec<StockChange> = stock
                .unreversed_movements(&mut tx, locked.stock_reference_type(), &locked.id)
                .await?
                .iter()
                .map(|m| m.reversal(actor_id, Some(format!("Cancellation of {}", label))))
                .collect();
            reversals.sort_by_key(|change| change.key());

            for change in &reversals {
                stock.post(&mut tx, change).await?;
            }

            self.db
                .accounts()
                .reverse_document(&mut tx, locked.ledger_reference_type(), &locked.id, clock.today(), actor_id)
                .await?;
        }

        vouchers.mark_cancelled(&mut tx, &locked.id, actor_id, clock.now()).await?;
        tx.commit().await?;

        info!(
            voucher_id = %locked.id,
            number = locked.voucher_number.as_deref().unwrap_or("-"),
            was = %locked.status,
            "Voucher cancelled"
        );
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, voucher_id: &str) -> EngineResult<Voucher> {
        self.db
            .vouchers()
            .get_by_id(voucher_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Voucher", voucher_id))
    }

    pub async fn list(&self, status: Option<VoucherStatus>, limit: u32) -> EngineResult<Vec<Voucher>> {
        Ok(self.db.vouchers().list(status, limit).await?)
    }

    /// Preview of the lines the source branch cannot cover right now.
    pub async fn check_stock(&self, voucher_id: &str) -> EngineResult<Vec<StockShortage>> {
        let voucher = self.get(voucher_id).await?;
        self.shortages(&voucher).await
    }

    async fn shortages(&self, voucher: &Voucher) -> EngineResult<Vec<StockShortage>> {
        let demand = voucher.demand();
        if demand.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .db
            .stock()
            .check_availability(&voucher.branch_id, &demand, self.config.suggest_alternatives)
            .await?)
    }

    /// Credit projection for issue vouchers charged to an account.
    async fn credit_check(&self, voucher: &Voucher) -> EngineResult<Option<CreditCheck>> {
        match (&voucher.customer_id, voucher.kind) {
            (Some(customer_id), VoucherKind::Issue) if !voucher.is_cash_sale && voucher.net_total.is_positive() => {
                Ok(Some(self.db.accounts().credit_check(customer_id, voucher.net_total).await?))
            }
            _ => Ok(None),
        }
    }
}

/// Attaches the voucher line to a stock shortage raised under lock.
fn shortage_on_line(err: DbError, planned: &PlannedMove) -> EngineError {
    match err {
        DbError::Rule(CoreError::InsufficientStock {
            product_id,
            branch_id,
            available,
            requested,
        }) => EngineError::InsufficientStock {
            shortages: vec![StockShortage {
                line_no: planned.line_no,
                product_id,
                branch_id,
                requested,
                available,
                shortage: requested - available,
                suggestions: Vec::new(),
            }],
        },
        other => other.into(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{day, Fixture};
    use depot_core::ledger::ReferenceType;
    use depot_core::money::Money;
    use depot_core::sequence::{EntityType, SequenceConfig};
    use depot_core::stock::{MovementType, StockReferenceType};
    use chrono::NaiveDate;
    use depot_core::voucher::{Discount, DraftItem};

    fn issue(fx: &Fixture, lines: &[(usize, i64, i64)]) -> VoucherDraft {
        VoucherDraft {
            kind: VoucherKind::Issue,
            branch_id: fx.branch_a.id.clone(),
            target_branch_id: None,
            customer_id: Some(fx.customer.id.clone()),
            is_cash_sale: false,
            voucher_date: day(1),
            discount: Discount::None,
            notes: None,
            items: lines
                .iter()
                .map(|(p, qty, price)| DraftItem {
                    product_id: fx.products[*p].id.clone(),
                    quantity: *qty,
                    unit_price: Money::from_cents(*price),
                    discount: Discount::None,
                })
                .collect(),
        }
    }

    fn transfer(fx: &Fixture, quantity: i64) -> VoucherDraft {
        let mut draft = issue(fx, &[(0, quantity, 10)]);
        draft.customer_id = None;
        draft.target_branch_id = Some(fx.branch_b.id.clone());
        draft
    }

    #[tokio::test]
    async fn test_issue_voucher_moves_stock_and_debits_customer() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;
        fx.receive(1, &fx.branch_a, 8).await;

        let id = fx.vouchers.create(&issue(&fx, &[(0, 5, 10), (1, 3, 20)]), "clerk").await.unwrap();
        let draft = fx.vouchers.get(&id).await.unwrap();
        assert_eq!(draft.net_total, Money::from_cents(110));
        assert_eq!(draft.items[1].line_no, 2);

        let result = fx.vouchers.approve(&id, "manager").await.unwrap();
        assert_eq!(result.voucher_number(), Some("ISS-00001"));

        assert_eq!(fx.quantity(0, &fx.branch_a).await, 5);
        assert_eq!(fx.quantity(1, &fx.branch_a).await, 5);
        assert_eq!(fx.balance().await, Money::from_cents(-110));

        let entries = fx.db.accounts().entries(&fx.customer.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].debit, Money::from_cents(110));
        assert_eq!(entries[0].reference_number.as_deref(), Some("ISS-00001"));

        let approved = fx.vouchers.get(&id).await.unwrap();
        assert_eq!(approved.status, VoucherStatus::Approved);
        assert_eq!(approved.voucher_number.as_deref(), Some("ISS-00001"));
        assert_eq!(approved.number_year, Some(2025));
        assert_eq!(approved.approved_by.as_deref(), Some("manager"));
    }

    #[tokio::test]
    async fn test_shortage_rejects_without_side_effects() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 3).await;
        fx.receive(1, &fx.branch_a, 8).await;
        fx.receive(0, &fx.branch_b, 20).await;

        let id = fx.vouchers.create(&issue(&fx, &[(0, 5, 10), (1, 3, 20)]), "clerk").await.unwrap();
        let result = fx.vouchers.approve(&id, "manager").await.unwrap();

        assert!(!result.is_approved());
        let shortages = result.shortages();
        assert_eq!(shortages.len(), 1);
        assert_eq!(shortages[0].line_no, 1);
        assert_eq!(shortages[0].shortage, 2);
        assert_eq!(shortages[0].suggestions[0].branch_id, fx.branch_b.id);

        assert_eq!(fx.quantity(0, &fx.branch_a).await, 3);
        assert_eq!(fx.quantity(1, &fx.branch_a).await, 8);
        assert_eq!(fx.balance().await, Money::zero());
        assert_eq!(fx.vouchers.get(&id).await.unwrap().status, VoucherStatus::Draft);
        assert!(fx.db.sequences().current(EntityType::IssueVouchers, 2025).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transfer_moves_between_branches_without_ledger() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let mut draft = issue(&fx, &[(0, 4, 10)]);
        draft.customer_id = None;
        draft.target_branch_id = Some(fx.branch_b.id.clone());

        let id = fx.vouchers.create(&draft, "clerk").await.unwrap();
        let result = fx.vouchers.approve(&id, "manager").await.unwrap();
        assert_eq!(result.voucher_number(), Some("TRF-00001"));

        assert_eq!(fx.quantity(0, &fx.branch_a).await, 6);
        assert_eq!(fx.quantity(0, &fx.branch_b).await, 4);

        let moves = fx
            .db
            .stock()
            .movements_for(StockReferenceType::TransferVoucher, &id)
            .await
            .unwrap();
        let types: Vec<MovementType> = moves.iter().map(|m| m.movement_type).collect();
        assert_eq!(types, vec![MovementType::TransferOut, MovementType::TransferIn]);
        assert!(fx.db.accounts().entries(&fx.customer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_transfer_reverses_both_legs() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let id = fx.vouchers.create(&transfer(&fx, 4), "clerk").await.unwrap();
        fx.vouchers.approve(&id, "manager").await.unwrap();
        fx.vouchers.cancel(&id, "manager").await.unwrap();

        assert_eq!(fx.quantity(0, &fx.branch_a).await, 10);
        assert_eq!(fx.quantity(0, &fx.branch_b).await, 0);

        let moves = fx
            .db
            .stock()
            .movements_for(StockReferenceType::TransferVoucher, &id)
            .await
            .unwrap();
        assert_eq!(moves.len(), 4);
        for reversal in &moves[2..] {
            let original = moves[..2]
                .iter()
                .find(|m| Some(m.id.as_str()) == reversal.reversal_of.as_deref())
                .unwrap();
            assert_eq!(reversal.branch_id, original.branch_id);
            assert_eq!(reversal.movement_type, original.movement_type.inverse());
        }

        // Nothing left to undo.
        let err = fx.vouchers.cancel(&id, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInTerminalState { .. }));
    }

    #[tokio::test]
    async fn test_cancel_transfer_fails_when_target_stock_consumed() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let transfer_id = fx.vouchers.create(&transfer(&fx, 4), "clerk").await.unwrap();
        fx.vouchers.approve(&transfer_id, "manager").await.unwrap();

        let mut sale = issue(&fx, &[(0, 3, 10)]);
        sale.branch_id = fx.branch_b.id.clone();
        let sale_id = fx.vouchers.create(&sale, "clerk").await.unwrap();
        fx.vouchers.approve(&sale_id, "manager").await.unwrap();

        let err = fx.vouchers.cancel(&transfer_id, "manager").await.unwrap_err();
        match err {
            EngineError::InsufficientStock { shortages } => {
                assert_eq!(shortages[0].branch_id, fx.branch_b.id);
                assert_eq!(shortages[0].available, 1);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(fx.quantity(0, &fx.branch_a).await, 6);
        assert_eq!(fx.quantity(0, &fx.branch_b).await, 1);
        assert_eq!(fx.vouchers.get(&transfer_id).await.unwrap().status, VoucherStatus::Approved);
        let moves = fx
            .db
            .stock()
            .movements_for(StockReferenceType::TransferVoucher, &transfer_id)
            .await
            .unwrap();
        assert_eq!(moves.len(), 2);
    }

    #[tokio::test]
    async fn test_approve_rechecks_branch_activity() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let id = fx.vouchers.create(&transfer(&fx, 4), "clerk").await.unwrap();
        fx.db.branches().set_active(&fx.branch_b.id, false).await.unwrap();

        let err = fx.vouchers.approve(&id, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(fx.quantity(0, &fx.branch_a).await, 10);
        assert_eq!(fx.vouchers.get(&id).await.unwrap().status, VoucherStatus::Draft);
        assert!(fx.db.sequences().current(EntityType::TransferVouchers, 2025).await.unwrap().is_none());

        fx.db.branches().set_active(&fx.branch_b.id, true).await.unwrap();
        assert!(fx.vouchers.approve(&id, "manager").await.unwrap().is_approved());
    }

    #[tokio::test]
    async fn test_backdated_voucher_numbered_in_current_year() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let mut draft = issue(&fx, &[(0, 2, 10)]);
        draft.voucher_date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let id = fx.vouchers.create(&draft, "clerk").await.unwrap();

        let result = fx.vouchers.approve(&id, "manager").await.unwrap();
        assert_eq!(result.voucher_number(), Some("ISS-00001"));

        let approved = fx.vouchers.get(&id).await.unwrap();
        assert_eq!(approved.number_year, Some(2025));
        assert_eq!(approved.voucher_date, draft.voucher_date);
        assert!(fx.db.sequences().current(EntityType::IssueVouchers, 2024).await.unwrap().is_none());

        let entries = fx.db.accounts().entries(&fx.customer.id).await.unwrap();
        assert_eq!(entries[0].transaction_date, draft.voucher_date);
    }

    #[tokio::test]
    async fn test_return_voucher_credits_stock_and_customer() {
        let fx = Fixture::new().await;

        let mut draft = issue(&fx, &[(0, 2, 10)]);
        draft.kind = VoucherKind::Return;
        let id = fx.vouchers.create(&draft, "clerk").await.unwrap();

        let result = fx.vouchers.approve(&id, "manager").await.unwrap();
        assert_eq!(result.voucher_number(), Some("RET-000001"));
        assert_eq!(fx.quantity(0, &fx.branch_a).await, 2);
        assert_eq!(fx.balance().await, Money::from_cents(20));
    }

    #[tokio::test]
    async fn test_approving_twice_is_terminal() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let id = fx.vouchers.create(&issue(&fx, &[(0, 1, 10)]), "clerk").await.unwrap();
        fx.vouchers.approve(&id, "manager").await.unwrap();

        let err = fx.vouchers.approve(&id, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInTerminalState { .. }));
        assert_eq!(fx.quantity(0, &fx.branch_a).await, 9);
    }

    #[tokio::test]
    async fn test_exhausted_sequence_rolls_back_approval() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let mut config = SequenceConfig::default_for(EntityType::IssueVouchers, 2025);
        config.max_value = 1;
        config.auto_reset = false;
        fx.db.sequences().configure(&config).await.unwrap();

        let first = fx.vouchers.create(&issue(&fx, &[(0, 1, 10)]), "clerk").await.unwrap();
        let second = fx.vouchers.create(&issue(&fx, &[(0, 2, 10)]), "clerk").await.unwrap();
        fx.vouchers.approve(&first, "manager").await.unwrap();

        let err = fx.vouchers.approve(&second, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::SequenceExhausted { .. }));

        assert_eq!(fx.quantity(0, &fx.branch_a).await, 9);
        assert_eq!(fx.balance().await, Money::from_cents(-10));
        assert_eq!(fx.vouchers.get(&second).await.unwrap().status, VoucherStatus::Draft);
        assert_eq!(fx.db.sequences().issued(EntityType::IssueVouchers, 2025).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cash_sale_has_zero_net_effect() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let mut draft = issue(&fx, &[(0, 3, 100)]);
        draft.is_cash_sale = true;
        let id = fx.vouchers.create(&draft, "clerk").await.unwrap();
        fx.vouchers.approve(&id, "manager").await.unwrap();

        assert_eq!(fx.balance().await, Money::zero());
        let entries = fx
            .db
            .accounts()
            .entries_for_reference(ReferenceType::IssueVoucher, &id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].debit, Money::from_cents(300));
        assert_eq!(entries[1].credit, Money::from_cents(300));
    }

    #[tokio::test]
    async fn test_anonymous_cash_sale_moves_stock_only() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let mut draft = issue(&fx, &[(0, 3, 100)]);
        draft.customer_id = None;
        draft.is_cash_sale = true;
        let id = fx.vouchers.create(&draft, "clerk").await.unwrap();

        let result = fx.vouchers.approve(&id, "manager").await.unwrap();
        assert_eq!(result.voucher_number(), Some("ISS-00001"));
        assert_eq!(fx.quantity(0, &fx.branch_a).await, 7);
        let entries = fx
            .db
            .accounts()
            .entries_for_reference(ReferenceType::IssueVoucher, &id)
            .await
            .unwrap();
        assert!(entries.is_empty());

        fx.vouchers.cancel(&id, "manager").await.unwrap();
        assert_eq!(fx.quantity(0, &fx.branch_a).await, 10);
        assert_eq!(fx.vouchers.get(&id).await.unwrap().status, VoucherStatus::Cancelled);
        assert_eq!(fx.balance().await, Money::zero());
    }

    #[tokio::test]
    async fn test_cancel_approved_reverses_stock_and_ledger() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 10).await;

        let id = fx.vouchers.create(&issue(&fx, &[(0, 4, 25)]), "clerk").await.unwrap();
        fx.vouchers.approve(&id, "manager").await.unwrap();
        assert_eq!(fx.balance().await, Money::from_cents(-100));

        fx.vouchers.cancel(&id, "manager").await.unwrap();

        assert_eq!(fx.quantity(0, &fx.branch_a).await, 10);
        assert_eq!(fx.balance().await, Money::zero());
        let cancelled = fx.vouchers.get(&id).await.unwrap();
        assert_eq!(cancelled.status, VoucherStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("manager"));

        let moves = fx.db.stock().movements_for(StockReferenceType::IssueVoucher, &id).await.unwrap();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[1].movement_type, MovementType::Return);
        assert_eq!(moves[1].reversal_of.as_deref(), Some(moves[0].id.as_str()));
        assert!(fx.db.accounts().verify(&fx.customer.id).await.unwrap().is_consistent);

        let err = fx.vouchers.cancel(&id, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInTerminalState { .. }));
    }

    #[tokio::test]
    async fn test_cancel_draft_consumes_no_number() {
        let fx = Fixture::new().await;
        let id = fx.vouchers.create(&issue(&fx, &[(0, 1, 10)]), "clerk").await.unwrap();

        fx.vouchers.cancel(&id, "clerk").await.unwrap();

        assert_eq!(fx.vouchers.get(&id).await.unwrap().status, VoucherStatus::Cancelled);
        assert!(fx.db.sequences().current(EntityType::IssueVouchers, 2025).await.unwrap().is_none());
        let err = fx.vouchers.approve(&id, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInTerminalState { .. }));
    }

    #[tokio::test]
    async fn test_cancel_return_fails_when_goods_reissued() {
        let fx = Fixture::new().await;

        let mut ret = issue(&fx, &[(0, 5, 10)]);
        ret.kind = VoucherKind::Return;
        let return_id = fx.vouchers.create(&ret, "clerk").await.unwrap();
        fx.vouchers.approve(&return_id, "manager").await.unwrap();

        let reissue = fx.vouchers.create(&issue(&fx, &[(0, 4, 10)]), "clerk").await.unwrap();
        fx.vouchers.approve(&reissue, "manager").await.unwrap();

        let err = fx.vouchers.cancel(&return_id, "manager").await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));
        assert_eq!(fx.quantity(0, &fx.branch_a).await, 1);
        assert_eq!(fx.vouchers.get(&return_id).await.unwrap().status, VoucherStatus::Approved);
    }

    #[tokio::test]
    async fn test_credit_limit_policies() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 100).await;
        fx.set_credit_limit(Money::from_cents(500)).await;

        let id = fx.vouchers.create(&issue(&fx, &[(0, 10, 100)]), "clerk").await.unwrap();

        let blocking = VoucherEngine::new(
            fx.db.clone(),
            VoucherConfig {
                credit_limit_policy: CreditLimitPolicy::Block,
                suggest_alternatives: true,
            },
        );
        match blocking.approve(&id, "manager").await.unwrap() {
            ApprovalResult::Rejected { reasons } => {
                assert!(matches!(reasons[0], RejectionReason::CreditLimitExceeded { .. }))
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        match fx.vouchers.approve(&id, "manager").await.unwrap() {
            ApprovalResult::Approved { warnings, .. } => assert_eq!(warnings.len(), 1),
            other => panic!("expected approval, got {other:?}"),
        }
        assert_eq!(fx.balance().await, Money::from_cents(-1000));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_references() {
        let fx = Fixture::new().await;

        let mut draft = issue(&fx, &[(0, 1, 10)]);
        draft.items[0].product_id = Uuid::new_v4().to_string();
        let err = fx.vouchers.create(&draft, "clerk").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        fx.db.branches().set_active(&fx.branch_b.id, false).await.unwrap();
        let mut draft = issue(&fx, &[(0, 1, 10)]);
        draft.customer_id = None;
        draft.target_branch_id = Some(fx.branch_b.id.clone());
        let err = fx.vouchers.create(&draft, "clerk").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);

        assert!(fx.vouchers.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_stock_preview() {
        let fx = Fixture::new().await;
        fx.receive(0, &fx.branch_a, 2).await;

        let id = fx.vouchers.create(&issue(&fx, &[(0, 1, 10), (0, 2, 10)]), "clerk").await.unwrap();
        let shortages = fx.vouchers.check_stock(&id).await.unwrap();
        assert_eq!(shortages.len(), 1);
        assert_eq!(shortages[0].line_no, 2);
        assert_eq!(shortages[0].available, 1);
    }
}
