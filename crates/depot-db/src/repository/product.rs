//! # Product Repository
//!
//! Catalog CRUD. Stock quantities live in `stock_levels` and are only
//! changed through `StockLedger`; `min_stock` here is the default copied
//! onto new levels.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use depot_core::types::Product;
use depot_core::validation::{validate_code, validate_name, validate_price};

use crate::error::{DbError, DbResult};

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let cement = repo.get_by_code("CEM-50").await?;
/// let page = repo.search("rebar", 20).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Searches active products by code or name prefix.
    ///
    /// An empty query lists active products by name.
    pub async fn search(&self, query: &str, limit: u32) -> DbResult<Vec<Product>> {
        let query = query.trim();
        debug!(query = %query, limit = %limit, "Searching products");

        let pattern = format!("{}%", query.replace('%', "").replace('_', ""));
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products \
             WHERE is_active = 1 AND (?1 = '%' OR code LIKE ?1 OR name LIKE ?1) \
             ORDER BY name LIMIT ?2",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = products.len(), "Search returned products");
        Ok(products)
    }

    /// Gets a product by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Product not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Gets a product by its business code (e.g., "CEM-50").
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE code = ?1")
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Inserts a new product.
    ///
    /// ## Returns
    /// * `Ok(Product)` - Inserted product
    /// * `Err(DbError::UniqueViolation)` - code already exists
    pub async fn insert(&self, product: &Product) -> DbResult<Product> {
        validate_code(&product.code)?;
        validate_name(&product.name)?;
        validate_price(product.sale_price)?;
        validate_price(product.purchase_price)?;
        debug!(code = %product.code, "Inserting product");

        sqlx::query(
            "INSERT INTO products (id, code, name, category, unit, min_stock, purchase_price, \
             sale_price, is_active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&product.id)
        .bind(product.code.trim())
        .bind(product.name.trim())
        .bind(&product.category)
        .bind(&product.unit)
        .bind(product.min_stock)
        .bind(product.purchase_price)
        .bind(product.sale_price)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, product.code.trim()),
            other => other,
        })?;

        Ok(product.clone())
    }

    /// Updates an existing product.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - Product doesn't exist
    pub async fn update(&self, product: &Product) -> DbResult<()> {
        validate_code(&product.code)?;
        validate_name(&product.name)?;
        validate_price(product.sale_price)?;
        validate_price(product.purchase_price)?;
        debug!(id = %product.id, "Updating product");

        let result = sqlx::query(
            "UPDATE products SET code = ?2, name = ?3, category = ?4, unit = ?5, min_stock = ?6, \
             purchase_price = ?7, sale_price = ?8, is_active = ?9, updated_at = ?10 \
             WHERE id = ?1",
        )
        .bind(&product.id)
        .bind(product.code.trim())
        .bind(product.name.trim())
        .bind(&product.category)
        .bind(&product.unit)
        .bind(product.min_stock)
        .bind(product.purchase_price)
        .bind(product.sale_price)
        .bind(product.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", &product.id));
        }

        Ok(())
    }

    /// Soft-deletes a product by setting is_active = false.
    ///
    /// Movements and voucher items keep referencing it.
    pub async fn soft_delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Soft-deleting product");

        let result = sqlx::query("UPDATE products SET is_active = 0, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use depot_core::money::Money;

    #[tokio::test]
    async fn test_product_crud_and_search() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();

        let mut cement = Product::new("CEM-50", "Cement 50kg", "bag", Money::from_cents(900), Utc::now());
        repo.insert(&cement).await.unwrap();
        repo.insert(&Product::new("STL-12", "Rebar 12mm", "bar", Money::from_cents(1500), Utc::now()))
            .await
            .unwrap();

        assert_eq!(repo.search("cem", 10).await.unwrap().len(), 1);
        assert_eq!(repo.search("Rebar", 10).await.unwrap()[0].code, "STL-12");
        assert_eq!(repo.search("", 10).await.unwrap().len(), 2);

        cement.sale_price = Money::from_cents(950);
        cement.min_stock = 10;
        repo.update(&cement).await.unwrap();
        let stored = repo.get_by_code("CEM-50").await.unwrap().unwrap();
        assert_eq!(stored.sale_price, Money::from_cents(950));
        assert_eq!(stored.min_stock, 10);

        repo.soft_delete(&cement.id).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_negative_price_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = Product::new("BAD", "Bad", "piece", Money::from_cents(-1), Utc::now());
        assert!(matches!(db.products().insert(&product).await, Err(DbError::Rule(_))));
    }
}
