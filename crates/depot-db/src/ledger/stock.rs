//! # StockLedger
//!
//! Stock levels per (product, branch) and the append-only movement log.
//!
//! ## Debit / Credit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  debit(conn, change)                     credit(conn, change)           │
//! │       │                                        │                        │
//! │       ▼                                        ▼                        │
//! │  lock row (must exist)                   lock row (create at 0)        │
//! │       │                                        │                        │
//! │       ├── missing / qty short                  │                        │
//! │       │      └──► InsufficientStock            │                        │
//! │       ▼                                        ▼                        │
//! │  current_quantity −= qty                 current_quantity += qty       │
//! │  movement(quantity = −qty)               movement(quantity = +qty)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every successful call writes exactly one movement, so the movement sum of
//! a key always equals its `current_quantity`.

use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use depot_core::clock::Clock;
use depot_core::error::{CoreError, ValidationError};
use depot_core::stock::{
    find_shortages, BranchSuggestion, DemandLine, Direction, InventoryMovement, InventorySummary,
    MovementType, StockAdjustment, StockChange, StockKey, StockLevel, StockReferenceType,
    StockShortage,
};
use depot_core::validation::{validate_actor, validate_quantity};

use crate::error::{DbError, DbResult};

/// Stock levels and movements.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl StockLedger {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        StockLedger { pool, clock }
    }

    // =========================================================================
    // Transactional API
    // =========================================================================

    /// Locks the level of `key`.
    ///
    /// ## Arguments
    /// * `create_if_missing` - insert a zero level (minimum copied from the
    ///   product) when the row does not exist yet
    ///
    /// ## Returns
    /// `None` when the row is missing and `create_if_missing` is false.
    pub async fn lock(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        create_if_missing: bool,
    ) -> DbResult<Option<StockLevel>> {
        let touched = sqlx::query(
            "UPDATE stock_levels SET current_quantity = current_quantity \
             WHERE product_id = ?1 AND branch_id = ?2",
        )
        .bind(&key.product_id)
        .bind(&key.branch_id)
        .execute(&mut *conn)
        .await?;

        if touched.rows_affected() == 0 {
            if !create_if_missing {
                return Ok(None);
            }
            let created = sqlx::query(
                "INSERT INTO stock_levels (id, product_id, branch_id, current_quantity, \
                 reserved_quantity, minimum_quantity, updated_at) \
                 SELECT ?1, id, ?2, 0, 0, min_stock, ?3 FROM products WHERE id = ?4",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&key.branch_id)
            .bind(self.clock.now())
            .bind(&key.product_id)
            .execute(&mut *conn)
            .await?;

            if created.rows_affected() == 0 {
                return Err(DbError::not_found("Product", &key.product_id));
            }
            debug!(key = %key, "Stock level created");
        }

        let level = sqlx::query_as::<_, StockLevel>(
            "SELECT * FROM stock_levels WHERE product_id = ?1 AND branch_id = ?2",
        )
        .bind(&key.product_id)
        .bind(&key.branch_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Some(level))
    }

    /// Removes `change.quantity` from the level and logs a negative movement.
    ///
    /// ## Errors
    /// `Rule(InsufficientStock)` when the level is missing or holds less than
    /// requested. Nothing is written in that case.
    pub async fn debit(&self, conn: &mut SqliteConnection, change: &StockChange) -> DbResult<InventoryMovement> {
        change.validate()?;
        let key = change.key();

        let level = self.lock(conn, &key, false).await?;
        let available = level.as_ref().map(|l| l.current_quantity).unwrap_or(0);

        let level = match level {
            Some(level) if level.current_quantity >= change.quantity => level,
            _ => {
                return Err(CoreError::InsufficientStock {
                    product_id: key.product_id,
                    branch_id: key.branch_id,
                    available,
                    requested: change.quantity,
                }
                .into())
            }
        };

        self.apply(conn, &level, Direction::Debit, change).await
    }

    /// Adds `change.quantity` to the level (creating it) and logs a positive
    /// movement.
    pub async fn credit(&self, conn: &mut SqliteConnection, change: &StockChange) -> DbResult<InventoryMovement> {
        change.validate()?;
        let level = self
            .lock(conn, &change.key(), true)
            .await?
            .ok_or_else(|| DbError::not_found("StockLevel", change.key().to_string()))?;

        self.apply(conn, &level, Direction::Credit, change).await
    }

    /// Dispatches on the natural direction of the movement type.
    pub async fn post(&self, conn: &mut SqliteConnection, change: &StockChange) -> DbResult<InventoryMovement> {
        match change.movement_type.direction() {
            Direction::Debit => self.debit(conn, change).await,
            Direction::Credit => self.credit(conn, change).await,
        }
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        level: &StockLevel,
        direction: Direction,
        change: &StockChange,
    ) -> DbResult<InventoryMovement> {
        let signed = direction.signed(change.quantity);
        let now = self.clock.now();

        sqlx::query(
            "UPDATE stock_levels SET current_quantity = current_quantity + ?1, updated_at = ?2 \
             WHERE id = ?3",
        )
        .bind(signed)
        .bind(now)
        .bind(&level.id)
        .execute(&mut *conn)
        .await?;

        let movement = InventoryMovement {
            id: Uuid::new_v4().to_string(),
            product_id: change.product_id.clone(),
            branch_id: change.branch_id.clone(),
            movement_type: change.movement_type,
            quantity: signed,
            reference_type: change.reference_type,
            reference_id: change.reference_id.clone(),
            reversal_of: change.reversal_of.clone(),
            notes: change.notes.clone(),
            actor_id: change.actor_id.clone(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO inventory_movements (id, product_id, branch_id, movement_type, quantity, \
             reference_type, reference_id, reversal_of, notes, actor_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&movement.id)
        .bind(&movement.product_id)
        .bind(&movement.branch_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.reference_type)
        .bind(&movement.reference_id)
        .bind(&movement.reversal_of)
        .bind(&movement.notes)
        .bind(&movement.actor_id)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            key = %level.key(),
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            before = level.current_quantity,
            after = level.current_quantity + signed,
            "Stock movement recorded"
        );
        Ok(movement)
    }

    /// Movements of a document that have not been undone yet, in posting order.
    pub async fn unreversed_movements(
        &self,
        conn: &mut SqliteConnection,
        reference_type: StockReferenceType,
        reference_id: &str,
    ) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            "SELECT m.* FROM inventory_movements m \
             WHERE m.reference_type = ?1 AND m.reference_id = ?2 AND m.reversal_of IS NULL \
             AND NOT EXISTS (SELECT 1 FROM inventory_movements r WHERE r.reversal_of = m.id) \
             ORDER BY m.rowid",
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(movements)
    }

    // =========================================================================
    // Self-contained operations
    // =========================================================================

    /// Books received goods (`ADD`) in its own transaction.
    pub async fn receive(
        &self,
        product_id: &str,
        branch_id: &str,
        quantity: i64,
        notes: Option<String>,
        actor_id: &str,
    ) -> DbResult<InventoryMovement> {
        validate_quantity(quantity)?;
        validate_actor(actor_id)?;

        let change = StockChange {
            product_id: product_id.to_string(),
            branch_id: branch_id.to_string(),
            quantity,
            movement_type: MovementType::Add,
            reference_type: StockReferenceType::StockReceipt,
            reference_id: Uuid::new_v4().to_string(),
            reversal_of: None,
            notes,
            actor_id: actor_id.to_string(),
        };

        let mut tx = self.pool.begin().await?;
        let movement = self.credit(&mut tx, &change).await?;
        tx.commit().await?;

        info!(product_id, branch_id, quantity, "Stock received");
        Ok(movement)
    }

    /// Sets several levels to exact quantities in one transaction.
    ///
    /// Increases are written as `ADD`, decreases as `ISSUE`, both referencing
    /// one `stock_adjustment` batch id. Unchanged items write nothing.
    ///
    /// ## Returns
    /// The movements written, in lock order.
    pub async fn adjust_to(&self, adjustments: &[StockAdjustment], actor_id: &str) -> DbResult<Vec<InventoryMovement>> {
        validate_actor(actor_id)?;
        for adjustment in adjustments {
            adjustment.validate()?;
        }

        let mut ordered: Vec<&StockAdjustment> = adjustments.iter().collect();
        ordered.sort_by(|a, b| {
            (a.product_id.as_str(), a.branch_id.as_str()).cmp(&(b.product_id.as_str(), b.branch_id.as_str()))
        });
        for pair in ordered.windows(2) {
            if pair[0].product_id == pair[1].product_id && pair[0].branch_id == pair[1].branch_id {
                return Err(ValidationError::Duplicate {
                    field: "adjustment".to_string(),
                    value: format!("{}@{}", pair[0].product_id, pair[0].branch_id),
                }
                .into());
            }
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;
        let mut movements = Vec::new();

        for adjustment in ordered {
            let key = StockKey::new(&adjustment.product_id, &adjustment.branch_id);
            let level = self
                .lock(&mut tx, &key, true)
                .await?
                .ok_or_else(|| DbError::not_found("StockLevel", key.to_string()))?;

            if let Some((movement_type, quantity)) = adjustment.plan(level.current_quantity) {
                let change = StockChange {
                    product_id: key.product_id.clone(),
                    branch_id: key.branch_id.clone(),
                    quantity,
                    movement_type,
                    reference_type: StockReferenceType::StockAdjustment,
                    reference_id: batch_id.clone(),
                    reversal_of: None,
                    notes: adjustment.notes.clone(),
                    actor_id: actor_id.to_string(),
                };
                movements.push(self.post(&mut tx, &change).await?);
            }
        }

        tx.commit().await?;
        info!(batch_id = %batch_id, changed = movements.len(), "Stock adjusted");
        Ok(movements)
    }

    /// Sets the low-stock threshold of a level (creating it at zero).
    pub async fn set_minimum(&self, product_id: &str, branch_id: &str, minimum: i64) -> DbResult<StockLevel> {
        if minimum < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "minimum_quantity".to_string(),
            }
            .into());
        }

        let key = StockKey::new(product_id, branch_id);
        let mut tx = self.pool.begin().await?;
        let mut level = self
            .lock(&mut tx, &key, true)
            .await?
            .ok_or_else(|| DbError::not_found("StockLevel", key.to_string()))?;

        let now = self.clock.now();
        sqlx::query("UPDATE stock_levels SET minimum_quantity = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(minimum)
            .bind(now)
            .bind(&level.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        level.minimum_quantity = minimum;
        level.updated_at = now;
        Ok(level)
    }

    // =========================================================================
    // Read-only queries
    // =========================================================================

    /// Quantity on hand; 0 when the level does not exist.
    pub async fn current_quantity(&self, product_id: &str, branch_id: &str) -> DbResult<i64> {
        Ok(self
            .level(product_id, branch_id)
            .await?
            .map(|l| l.current_quantity)
            .unwrap_or(0))
    }

    pub async fn level(&self, product_id: &str, branch_id: &str) -> DbResult<Option<StockLevel>> {
        let level = sqlx::query_as::<_, StockLevel>(
            "SELECT * FROM stock_levels WHERE product_id = ?1 AND branch_id = ?2",
        )
        .bind(product_id)
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(level)
    }

    /// Lists every line the branch cannot cover, cumulatively per product.
    ///
    /// ## Arguments
    /// * `suggest` - attach other active branches holding at least the
    ///   requested quantity
    pub async fn check_availability(
        &self,
        branch_id: &str,
        lines: &[DemandLine],
        suggest: bool,
    ) -> DbResult<Vec<StockShortage>> {
        let mut on_hand = HashMap::new();
        for line in lines {
            if !on_hand.contains_key(&line.product_id) {
                let qty = self.current_quantity(&line.product_id, branch_id).await?;
                on_hand.insert(line.product_id.clone(), qty);
            }
        }

        let mut shortages = find_shortages(branch_id, lines, &on_hand);
        if suggest {
            for shortage in &mut shortages {
                shortage.suggestions = self
                    .suggest_branches(&shortage.product_id, branch_id, shortage.requested)
                    .await?;
            }
        }

        if !shortages.is_empty() {
            debug!(branch_id, short_lines = shortages.len(), "Stock check found shortages");
        }
        Ok(shortages)
    }

    async fn suggest_branches(
        &self,
        product_id: &str,
        exclude_branch_id: &str,
        requested: i64,
    ) -> DbResult<Vec<BranchSuggestion>> {
        let suggestions = sqlx::query_as::<_, BranchSuggestion>(
            "SELECT b.id AS branch_id, b.code AS branch_code, b.name AS branch_name, \
                    s.current_quantity AS available \
             FROM stock_levels s JOIN branches b ON b.id = s.branch_id \
             WHERE s.product_id = ?1 AND s.branch_id <> ?2 AND b.is_active = 1 \
               AND s.current_quantity >= ?3 \
             ORDER BY s.current_quantity DESC, b.code",
        )
        .bind(product_id)
        .bind(exclude_branch_id)
        .bind(requested)
        .fetch_all(&self.pool)
        .await?;

        Ok(suggestions)
    }

    /// Levels at or below their minimum, optionally for one branch.
    pub async fn low_stock(&self, branch_id: Option<&str>) -> DbResult<Vec<StockLevel>> {
        let levels = sqlx::query_as::<_, StockLevel>(
            "SELECT * FROM stock_levels \
             WHERE current_quantity <= minimum_quantity AND (?1 IS NULL OR branch_id = ?1) \
             ORDER BY current_quantity, product_id",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(levels)
    }

    /// Inventory totals for one branch or all branches.
    pub async fn summary(&self, branch_id: Option<&str>) -> DbResult<InventorySummary> {
        let summary = sqlx::query_as::<_, InventorySummary>(
            "SELECT COUNT(*) AS item_count, \
                    COALESCE(SUM(s.current_quantity), 0) AS total_quantity, \
                    COALESCE(SUM(s.current_quantity * p.purchase_price), 0) AS stock_value, \
                    COALESCE(SUM(CASE WHEN s.current_quantity > 0 \
                                       AND s.current_quantity <= s.minimum_quantity \
                                      THEN 1 ELSE 0 END), 0) AS low_stock_count, \
                    COALESCE(SUM(CASE WHEN s.current_quantity = 0 THEN 1 ELSE 0 END), 0) \
                        AS out_of_stock_count \
             FROM stock_levels s JOIN products p ON p.id = s.product_id \
             WHERE ?1 IS NULL OR s.branch_id = ?1",
        )
        .bind(branch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(summary)
    }

    /// Audit trail of one key, oldest first.
    pub async fn movements(&self, product_id: &str, branch_id: &str) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            "SELECT * FROM inventory_movements WHERE product_id = ?1 AND branch_id = ?2 ORDER BY rowid",
        )
        .bind(product_id)
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements of one document, oldest first.
    pub async fn movements_for(
        &self,
        reference_type: StockReferenceType,
        reference_id: &str,
    ) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            "SELECT * FROM inventory_movements WHERE reference_type = ?1 AND reference_id = ?2 \
             ORDER BY rowid",
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Σ movement quantity of a key; equals `current_quantity`.
    pub async fn movement_sum(&self, product_id: &str, branch_id: &str) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0) FROM inventory_movements \
             WHERE product_id = ?1 AND branch_id = ?2",
        )
        .bind(product_id)
        .bind(branch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;
    use depot_core::money::Money;
    use depot_core::stock::StockStatus;
    use depot_core::types::{Branch, Product};

    struct Fixture {
        db: Database,
        main: Branch,
        north: Branch,
        cement: Product,
        steel: Product,
    }

    async fn setup() -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let main = Branch::new("MAIN", "Main Warehouse", now);
        let north = Branch::new("NORTH", "North Yard", now);
        let mut cement = Product::new("CEM-50", "Cement 50kg", "bag", Money::from_cents(900), now);
        cement.purchase_price = Money::from_cents(700);
        cement.min_stock = 5;
        let steel = Product::new("STL-12", "Rebar 12mm", "bar", Money::from_cents(1500), now);

        db.branches().insert(&main).await.unwrap();
        db.branches().insert(&north).await.unwrap();
        db.products().insert(&cement).await.unwrap();
        db.products().insert(&steel).await.unwrap();

        Fixture { db, main, north, cement, steel }
    }

    fn change(product: &Product, branch: &Branch, quantity: i64, movement_type: MovementType) -> StockChange {
        StockChange {
            product_id: product.id.clone(),
            branch_id: branch.id.clone(),
            quantity,
            movement_type,
            reference_type: StockReferenceType::IssueVoucher,
            reference_id: "doc-1".to_string(),
            reversal_of: None,
            notes: None,
            actor_id: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn test_credit_creates_level_and_movement() {
        let f = setup().await;
        let stock = f.db.stock();

        let movement = stock
            .receive(&f.cement.id, &f.main.id, 10, None, "tester")
            .await
            .unwrap();
        assert_eq!(movement.quantity, 10);
        assert_eq!(movement.movement_type, MovementType::Add);

        let level = stock.level(&f.cement.id, &f.main.id).await.unwrap().unwrap();
        assert_eq!(level.current_quantity, 10);
        assert_eq!(level.minimum_quantity, 5, "minimum copied from product");
        assert_eq!(stock.movement_sum(&f.cement.id, &f.main.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_debit_short_writes_nothing() {
        let f = setup().await;
        let stock = f.db.stock();
        stock.receive(&f.cement.id, &f.main.id, 3, None, "tester").await.unwrap();

        let mut tx = f.db.pool().begin().await.unwrap();
        let err = stock
            .debit(&mut tx, &change(&f.cement, &f.main, 5, MovementType::Issue))
            .await
            .unwrap_err();
        drop(tx);

        match err {
            DbError::Rule(CoreError::InsufficientStock { available, requested, .. }) => {
                assert_eq!(available, 3);
                assert_eq!(requested, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(stock.current_quantity(&f.cement.id, &f.main.id).await.unwrap(), 3);
        assert_eq!(stock.movements(&f.cement.id, &f.main.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_debit_missing_level_is_insufficient() {
        let f = setup().await;
        let mut tx = f.db.pool().begin().await.unwrap();
        let err = f
            .db
            .stock()
            .debit(&mut tx, &change(&f.steel, &f.north, 1, MovementType::Issue))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Rule(CoreError::InsufficientStock { available: 0, requested: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_debit_then_reverse() {
        let f = setup().await;
        let stock = f.db.stock();
        stock.receive(&f.cement.id, &f.main.id, 10, None, "tester").await.unwrap();

        let mut tx = f.db.pool().begin().await.unwrap();
        let issued = stock
            .debit(&mut tx, &change(&f.cement, &f.main, 4, MovementType::Issue))
            .await
            .unwrap();
        let open = stock
            .unreversed_movements(&mut tx, StockReferenceType::IssueVoucher, "doc-1")
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        stock.post(&mut tx, &issued.reversal("tester", None)).await.unwrap();
        let open = stock
            .unreversed_movements(&mut tx, StockReferenceType::IssueVoucher, "doc-1")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(open.is_empty());
        assert_eq!(stock.current_quantity(&f.cement.id, &f.main.id).await.unwrap(), 10);
        assert_eq!(stock.movement_sum(&f.cement.id, &f.main.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_check_availability_with_suggestions() {
        let f = setup().await;
        let stock = f.db.stock();
        stock.receive(&f.cement.id, &f.main.id, 3, None, "tester").await.unwrap();
        stock.receive(&f.cement.id, &f.north.id, 20, None, "tester").await.unwrap();

        let lines = [
            DemandLine { line_no: 1, product_id: f.cement.id.clone(), quantity: 5 },
            DemandLine { line_no: 2, product_id: f.steel.id.clone(), quantity: 1 },
        ];
        let shortages = stock.check_availability(&f.main.id, &lines, true).await.unwrap();

        assert_eq!(shortages.len(), 2);
        assert_eq!(shortages[0].shortage, 2);
        assert_eq!(shortages[0].suggestions.len(), 1);
        assert_eq!(shortages[0].suggestions[0].branch_code, "NORTH");
        assert!(shortages[1].suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_adjust_to_exact_quantities() {
        let f = setup().await;
        let stock = f.db.stock();
        stock.receive(&f.cement.id, &f.main.id, 10, None, "tester").await.unwrap();

        let adjustments = vec![
            StockAdjustment {
                product_id: f.cement.id.clone(),
                branch_id: f.main.id.clone(),
                new_quantity: 7,
                notes: Some("count".to_string()),
            },
            StockAdjustment {
                product_id: f.steel.id.clone(),
                branch_id: f.main.id.clone(),
                new_quantity: 12,
                notes: None,
            },
        ];
        let movements = stock.adjust_to(&adjustments, "auditor").await.unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(stock.current_quantity(&f.cement.id, &f.main.id).await.unwrap(), 7);
        assert_eq!(stock.current_quantity(&f.steel.id, &f.main.id).await.unwrap(), 12);

        // Same targets again: nothing to write.
        assert!(stock.adjust_to(&adjustments, "auditor").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_adjust_rejects_duplicate_keys() {
        let f = setup().await;
        let adj = StockAdjustment {
            product_id: f.cement.id.clone(),
            branch_id: f.main.id.clone(),
            new_quantity: 1,
            notes: None,
        };
        let err = f.db.stock().adjust_to(&[adj.clone(), adj], "auditor").await.unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::Validation(ValidationError::Duplicate { .. }))));
    }

    #[tokio::test]
    async fn test_summary_and_low_stock() {
        let f = setup().await;
        let stock = f.db.stock();
        stock.receive(&f.cement.id, &f.main.id, 4, None, "tester").await.unwrap();
        stock.receive(&f.steel.id, &f.main.id, 2, None, "tester").await.unwrap();
        stock
            .adjust_to(
                &[StockAdjustment {
                    product_id: f.steel.id.clone(),
                    branch_id: f.main.id.clone(),
                    new_quantity: 0,
                    notes: None,
                }],
                "auditor",
            )
            .await
            .unwrap();

        let summary = stock.summary(Some(&f.main.id)).await.unwrap();
        assert_eq!(summary.item_count, 2);
        assert_eq!(summary.total_quantity, 4);
        assert_eq!(summary.stock_value, Money::from_cents(2800));
        assert_eq!(summary.low_stock_count, 1);
        assert_eq!(summary.out_of_stock_count, 1);

        let low = stock.low_stock(Some(&f.main.id)).await.unwrap();
        assert_eq!(low.len(), 2);
        assert_eq!(low[0].status(), StockStatus::OutOfStock);
        assert_eq!(low[1].status(), StockStatus::LowStock);

        let level = stock.set_minimum(&f.cement.id, &f.main.id, 2).await.unwrap();
        assert_eq!(level.status(), StockStatus::Ok);
        assert_eq!(stock.summary(None).await.unwrap().low_stock_count, 0);
    }
}
