//! # Voucher Repository
//!
//! Voucher headers and items.
//!
//! ## Storage of Discounts
//! `Discount` is an enum in the domain and two columns in SQLite:
//! ```text
//! Discount::None            → ('none', 0)
//! Discount::Fixed(500)      → ('fixed', 500)        cents
//! Discount::Percentage(750) → ('percentage', 750)   basis points
//! ```
//! Rows are read into private `*Row` structs and converted; a row that does
//! not convert is reported as `DbError::CorruptRow`.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use depot_core::money::Money;
use depot_core::voucher::{Discount, Voucher, VoucherItem, VoucherKind, VoucherStatus};

use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct VoucherRow {
    id: String,
    kind: VoucherKind,
    voucher_number: Option<String>,
    number_year: Option<i32>,
    customer_id: Option<String>,
    branch_id: String,
    target_branch_id: Option<String>,
    is_cash_sale: bool,
    status: VoucherStatus,
    discount_type: String,
    discount_value: i64,
    total_amount: Money,
    subtotal: Money,
    discount_amount: Money,
    net_total: Money,
    voucher_date: NaiveDate,
    notes: Option<String>,
    created_by: String,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    cancelled_by: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VoucherRow {
    fn into_voucher(self, items: Vec<VoucherItem>) -> DbResult<Voucher> {
        let discount =
            Discount::from_parts(&self.discount_type, self.discount_value).map_err(|e| DbError::corrupt("vouchers", e))?;

        Ok(Voucher {
            id: self.id,
            kind: self.kind,
            voucher_number: self.voucher_number,
            number_year: self.number_year,
            customer_id: self.customer_id,
            branch_id: self.branch_id,
            target_branch_id: self.target_branch_id,
            is_cash_sale: self.is_cash_sale,
            status: self.status,
            discount,
            total_amount: self.total_amount,
            subtotal: self.subtotal,
            discount_amount: self.discount_amount,
            net_total: self.net_total,
            voucher_date: self.voucher_date,
            notes: self.notes,
            created_by: self.created_by,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            cancelled_by: self.cancelled_by,
            cancelled_at: self.cancelled_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        })
    }
}

#[derive(Debug, FromRow)]
struct VoucherItemRow {
    id: String,
    voucher_id: String,
    line_no: i64,
    product_id: String,
    quantity: i64,
    unit_price: Money,
    discount_type: String,
    discount_value: i64,
    gross: Money,
    discount_amount: Money,
    net: Money,
}

impl TryFrom<VoucherItemRow> for VoucherItem {
    type Error = DbError;

    fn try_from(row: VoucherItemRow) -> DbResult<Self> {
        let discount = Discount::from_parts(&row.discount_type, row.discount_value)
            .map_err(|e| DbError::corrupt("voucher_items", e))?;

        Ok(VoucherItem {
            id: row.id,
            voucher_id: row.voucher_id,
            line_no: row.line_no,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            discount,
            gross: row.gross,
            discount_amount: row.discount_amount,
            net: row.net,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for vouchers.
#[derive(Debug, Clone)]
pub struct VoucherRepository {
    pool: SqlitePool,
}

impl VoucherRepository {
    pub fn new(pool: SqlitePool) -> Self {
        VoucherRepository { pool }
    }

    /// Inserts header and items in one transaction.
    pub async fn insert(&self, voucher: &Voucher) -> DbResult<()> {
        debug!(id = %voucher.id, lines = voucher.items.len(), "Inserting voucher");

        let (discount_type, discount_value) = voucher.discount.to_parts();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO vouchers (id, kind, voucher_number, number_year, customer_id, branch_id, \
             target_branch_id, is_cash_sale, status, discount_type, discount_value, total_amount, \
             subtotal, discount_amount, net_total, voucher_date, notes, created_by, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        )
        .bind(&voucher.id)
        .bind(voucher.kind)
        .bind(&voucher.voucher_number)
        .bind(voucher.number_year)
        .bind(&voucher.customer_id)
        .bind(&voucher.branch_id)
        .bind(&voucher.target_branch_id)
        .bind(voucher.is_cash_sale)
        .bind(voucher.status)
        .bind(discount_type)
        .bind(discount_value)
        .bind(voucher.total_amount)
        .bind(voucher.subtotal)
        .bind(voucher.discount_amount)
        .bind(voucher.net_total)
        .bind(voucher.voucher_date)
        .bind(&voucher.notes)
        .bind(&voucher.created_by)
        .bind(voucher.created_at)
        .bind(voucher.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in &voucher.items {
            let (discount_type, discount_value) = item.discount.to_parts();
            sqlx::query(
                "INSERT INTO voucher_items (id, voucher_id, line_no, product_id, quantity, unit_price, \
                 discount_type, discount_value, gross, discount_amount, net) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(&item.id)
            .bind(&voucher.id)
            .bind(item.line_no)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(discount_type)
            .bind(discount_value)
            .bind(item.gross)
            .bind(item.discount_amount)
            .bind(item.net)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Voucher>> {
        let Some(row) = sqlx::query_as::<_, VoucherRow>("SELECT * FROM vouchers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, VoucherItemRow>(
            "SELECT * FROM voucher_items WHERE voucher_id = ?1 ORDER BY line_no",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(VoucherItem::try_from)
        .collect::<DbResult<Vec<_>>>()?;

        Ok(Some(row.into_voucher(items)?))
    }

    /// Gets a voucher with its items.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Voucher>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, id).await
    }

    /// Locks the voucher row and re-reads it inside the caller's transaction.
    pub async fn lock(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Voucher> {
        let touched = sqlx::query("UPDATE vouchers SET status = status WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("Voucher", id));
        }

        Self::load(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Voucher", id))
    }

    /// Headers (without items) newest first, optionally by status.
    pub async fn list(&self, status: Option<VoucherStatus>, limit: u32) -> DbResult<Vec<Voucher>> {
        let rows = sqlx::query_as::<_, VoucherRow>(
            "SELECT * FROM vouchers WHERE (?1 IS NULL OR status = ?1) ORDER BY rowid DESC LIMIT ?2",
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| row.into_voucher(Vec::new())).collect()
    }

    pub async fn mark_approved(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        voucher_number: &str,
        number_year: i32,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE vouchers SET status = 'approved', voucher_number = ?2, number_year = ?3, \
             approved_by = ?4, approved_at = ?5, updated_at = ?5 \
             WHERE id = ?1 AND status = 'draft'",
        )
        .bind(id)
        .bind(voucher_number)
        .bind(number_year)
        .bind(actor_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Draft voucher", id));
        }
        Ok(())
    }

    pub async fn mark_cancelled(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE vouchers SET status = 'cancelled', cancelled_by = ?2, cancelled_at = ?3, updated_at = ?3 \
             WHERE id = ?1 AND status <> 'cancelled'",
        )
        .bind(id)
        .bind(actor_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Open voucher", id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
