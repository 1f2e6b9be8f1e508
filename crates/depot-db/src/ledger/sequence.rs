//! # SequenceAllocator
//!
//! Hands out gapless, year-scoped document numbers inside the caller's
//! transaction. A rollback of the caller also rolls back the allocation, so a
//! failed approval never burns a number.
//!
//! ## Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  next(conn, issue_vouchers, 2025)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPDATE sequences SET last_number = last_number   ← write lock         │
//! │       │                                                                 │
//! │       ├── no row ── previous year auto_reset? ──► derive 2025 row      │
//! │       │                    │                                            │
//! │       │                    └── no ──► SequenceNotConfigured            │
//! │       ▼                                                                 │
//! │  SequenceConfig::advance() ── exhausted ──► SequenceExhausted          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPDATE last_number, cycle                                             │
//! │  INSERT issued_numbers (UNIQUE entity, year, cycle, value)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DocumentNumber { formatted: "ISS-00001" }                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

use depot_core::clock::Clock;
use depot_core::error::CoreError;
use depot_core::sequence::{DocumentNumber, EntityType, SequenceConfig};

use crate::error::{DbError, DbResult};

/// Allocator of document numbers.
#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SequenceAllocator {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        SequenceAllocator { pool, clock }
    }

    // =========================================================================
    // Transactional API
    // =========================================================================

    /// Allocates the next number of `entity_type` for `year`.
    ///
    /// Must run inside the caller's transaction and be its first write, so
    /// the sequence row is the first lock taken.
    ///
    /// ## Errors
    /// - `Rule(SequenceNotConfigured)` - no row and no auto-reset predecessor
    /// - `Rule(SequenceExhausted)` - range used up without auto-reset
    pub async fn next(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        year: i32,
    ) -> DbResult<DocumentNumber> {
        let config = match self.lock(conn, entity_type, year).await? {
            Some(config) => config,
            None => self.derive_year(conn, entity_type, year).await?,
        };

        let next = config.advance()?;
        if next.wrapped {
            warn!(
                entity_type = %entity_type,
                year,
                cycle = next.cycle,
                max_value = config.max_value,
                "Sequence wrapped to its minimum value"
            );
        }

        let now = self.clock.now();
        sqlx::query(
            "UPDATE sequences SET last_number = ?1, cycle = ?2, updated_at = ?3 \
             WHERE entity_type = ?4 AND year = ?5",
        )
        .bind(next.value)
        .bind(next.cycle)
        .bind(now)
        .bind(entity_type)
        .bind(year)
        .execute(&mut *conn)
        .await?;

        let number = DocumentNumber {
            entity_type,
            year,
            cycle: next.cycle,
            value: next.value,
            formatted: config.format(next.value),
            issued_at: now,
        };

        sqlx::query(
            "INSERT INTO issued_numbers (entity_type, year, cycle, value, formatted, issued_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(number.entity_type)
        .bind(number.year)
        .bind(number.cycle)
        .bind(number.value)
        .bind(&number.formatted)
        .bind(number.issued_at)
        .execute(&mut *conn)
        .await?;

        debug!(entity_type = %entity_type, year, number = %number.formatted, "Number allocated");
        Ok(number)
    }

    /// Locks and reads the (entity_type, year) row.
    async fn lock(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        year: i32,
    ) -> DbResult<Option<SequenceConfig>> {
        let touched = sqlx::query(
            "UPDATE sequences SET last_number = last_number WHERE entity_type = ?1 AND year = ?2",
        )
        .bind(entity_type)
        .bind(year)
        .execute(&mut *conn)
        .await?;

        if touched.rows_affected() == 0 {
            return Ok(None);
        }

        let config = sqlx::query_as::<_, SequenceConfig>(
            "SELECT * FROM sequences WHERE entity_type = ?1 AND year = ?2",
        )
        .bind(entity_type)
        .bind(year)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Some(config))
    }

    /// Creates the `year` row from the latest earlier year when that row
    /// auto-resets.
    async fn derive_year(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        year: i32,
    ) -> DbResult<SequenceConfig> {
        let previous = sqlx::query_as::<_, SequenceConfig>(
            "SELECT * FROM sequences WHERE entity_type = ?1 AND year < ?2 \
             ORDER BY year DESC LIMIT 1",
        )
        .bind(entity_type)
        .bind(year)
        .fetch_optional(&mut *conn)
        .await?;

        let config = match previous {
            Some(prev) if prev.auto_reset => prev.roll_over(year),
            _ => {
                return Err(CoreError::SequenceNotConfigured {
                    entity_type: entity_type.to_string(),
                    year,
                }
                .into())
            }
        };

        self.insert(conn, &config).await?;
        info!(entity_type = %entity_type, year, "Sequence reset for new year");
        Ok(config)
    }

    async fn insert(&self, conn: &mut SqliteConnection, config: &SequenceConfig) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO sequences (entity_type, year, prefix, pad_width, last_number, min_value, \
             max_value, increment_by, auto_reset, cycle, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(config.entity_type)
        .bind(config.year)
        .bind(&config.prefix)
        .bind(config.pad_width)
        .bind(config.last_number)
        .bind(config.min_value)
        .bind(config.max_value)
        .bind(config.increment_by)
        .bind(config.auto_reset)
        .bind(config.cycle)
        .bind(self.clock.now())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Inserts or updates a sequence configuration.
    ///
    /// An existing row keeps its `last_number` and `cycle`; only the format,
    /// range and reset policy change.
    pub async fn configure(&self, config: &SequenceConfig) -> DbResult<()> {
        config.validate()?;
        debug!(entity_type = %config.entity_type, year = config.year, "Configuring sequence");

        sqlx::query(
            "INSERT INTO sequences (entity_type, year, prefix, pad_width, last_number, min_value, \
             max_value, increment_by, auto_reset, cycle, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT (entity_type, year) DO UPDATE SET \
               prefix = excluded.prefix, pad_width = excluded.pad_width, \
               min_value = excluded.min_value, max_value = excluded.max_value, \
               increment_by = excluded.increment_by, auto_reset = excluded.auto_reset, \
               updated_at = excluded.updated_at",
        )
        .bind(config.entity_type)
        .bind(config.year)
        .bind(&config.prefix)
        .bind(config.pad_width)
        .bind(config.last_number)
        .bind(config.min_value)
        .bind(config.max_value)
        .bind(config.increment_by)
        .bind(config.auto_reset)
        .bind(config.cycle)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts the configuration unless a row already exists.
    ///
    /// ## Returns
    /// `true` when a row was created.
    pub async fn ensure_configured(&self, config: &SequenceConfig) -> DbResult<bool> {
        config.validate()?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO sequences (entity_type, year, prefix, pad_width, last_number, \
             min_value, max_value, increment_by, auto_reset, cycle, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(config.entity_type)
        .bind(config.year)
        .bind(&config.prefix)
        .bind(config.pad_width)
        .bind(config.last_number)
        .bind(config.min_value)
        .bind(config.max_value)
        .bind(config.increment_by)
        .bind(config.auto_reset)
        .bind(config.cycle)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            info!(entity_type = %config.entity_type, year = config.year, prefix = %config.prefix, "Sequence created");
        }
        Ok(inserted)
    }

    /// Creates the `year` row from the latest earlier year, in its own
    /// transaction. Returns the existing row when `year` is already there.
    pub async fn roll_over(&self, entity_type: EntityType, year: i32) -> DbResult<SequenceConfig> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = self.lock(&mut tx, entity_type, year).await? {
            return Ok(existing);
        }

        let previous = sqlx::query_as::<_, SequenceConfig>(
            "SELECT * FROM sequences WHERE entity_type = ?1 AND year < ?2 \
             ORDER BY year DESC LIMIT 1",
        )
        .bind(entity_type)
        .bind(year)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::SequenceNotConfigured {
            entity_type: entity_type.to_string(),
            year,
        })?;

        let config = previous.roll_over(year);
        self.insert(&mut tx, &config).await?;
        tx.commit().await?;

        info!(entity_type = %entity_type, year, "Sequence rolled over");
        Ok(config)
    }

    // =========================================================================
    // Read-only queries
    // =========================================================================

    /// Current configuration of (entity_type, year).
    pub async fn config(&self, entity_type: EntityType, year: i32) -> DbResult<SequenceConfig> {
        sqlx::query_as::<_, SequenceConfig>(
            "SELECT * FROM sequences WHERE entity_type = ?1 AND year = ?2",
        )
        .bind(entity_type)
        .bind(year)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("Sequence", format!("{}/{}", entity_type, year)))
    }

    /// Last number issued in (entity_type, year), without allocating.
    pub async fn current(&self, entity_type: EntityType, year: i32) -> DbResult<Option<DocumentNumber>> {
        let number = sqlx::query_as::<_, DocumentNumber>(
            "SELECT * FROM issued_numbers WHERE entity_type = ?1 AND year = ?2 \
             ORDER BY rowid DESC LIMIT 1",
        )
        .bind(entity_type)
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;

        Ok(number)
    }

    /// Whether `value` lies in the configured range.
    pub async fn validate_range(&self, entity_type: EntityType, year: i32, value: i64) -> DbResult<bool> {
        Ok(self.config(entity_type, year).await?.contains(value))
    }

    /// Every number issued in (entity_type, year), in issue order.
    pub async fn issued(&self, entity_type: EntityType, year: i32) -> DbResult<Vec<DocumentNumber>> {
        let numbers = sqlx::query_as::<_, DocumentNumber>(
            "SELECT * FROM issued_numbers WHERE entity_type = ?1 AND year = ?2 ORDER BY rowid",
        )
        .bind(entity_type)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{TimeZone, Utc};
    use depot_core::clock::FixedClock;

    async fn setup() -> Database {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        Database::with_clock(DbConfig::in_memory(), Arc::new(clock))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_next_formats_and_advances() {
        let db = setup().await;
        let seq = db.sequences();
        seq.ensure_configured(&SequenceConfig::default_for(EntityType::IssueVouchers, 2025))
            .await
            .unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        let first = seq.next(&mut tx, EntityType::IssueVouchers, 2025).await.unwrap();
        let second = seq.next(&mut tx, EntityType::IssueVouchers, 2025).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.formatted, "ISS-00001");
        assert_eq!(second.formatted, "ISS-00002");
        assert_eq!(seq.config(EntityType::IssueVouchers, 2025).await.unwrap().last_number, 2);
        assert_eq!(seq.issued(EntityType::IssueVouchers, 2025).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_returns_number() {
        let db = setup().await;
        let seq = db.sequences();
        seq.ensure_configured(&SequenceConfig::default_for(EntityType::Payments, 2025))
            .await
            .unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        seq.next(&mut tx, EntityType::Payments, 2025).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        let number = seq.next(&mut tx, EntityType::Payments, 2025).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(number.formatted, "PAY-00001");
    }

    #[tokio::test]
    async fn test_unconfigured_sequence() {
        let db = setup().await;
        let mut tx = db.pool().begin().await.unwrap();
        let err = db
            .sequences()
            .next(&mut tx, EntityType::ReturnVouchers, 2025)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::SequenceNotConfigured { year: 2025, .. })));
    }

    #[tokio::test]
    async fn test_exhausted_without_auto_reset() {
        let db = setup().await;
        let seq = db.sequences();
        let mut config = SequenceConfig::default_for(EntityType::IssueVouchers, 2025);
        config.max_value = 1;
        config.auto_reset = false;
        seq.configure(&config).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        seq.next(&mut tx, EntityType::IssueVouchers, 2025).await.unwrap();
        let err = seq.next(&mut tx, EntityType::IssueVouchers, 2025).await.unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::SequenceExhausted { .. })));
    }

    #[tokio::test]
    async fn test_wrap_increments_cycle() {
        let db = setup().await;
        let seq = db.sequences();
        let mut config = SequenceConfig::default_for(EntityType::TransferVouchers, 2025);
        config.max_value = 2;
        seq.configure(&config).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        let mut values = Vec::new();
        for _ in 0..3 {
            let n = seq.next(&mut tx, EntityType::TransferVouchers, 2025).await.unwrap();
            values.push((n.cycle, n.value));
        }
        tx.commit().await.unwrap();

        assert_eq!(values, vec![(0, 1), (0, 2), (1, 1)]);
    }

    #[tokio::test]
    async fn test_new_year_derives_from_previous() {
        let db = setup().await;
        let seq = db.sequences();
        let mut config = SequenceConfig::default_for(EntityType::IssueVouchers, 2024);
        config.prefix = "IV-".to_string();
        seq.configure(&config).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        seq.next(&mut tx, EntityType::IssueVouchers, 2024).await.unwrap();
        let n = seq.next(&mut tx, EntityType::IssueVouchers, 2025).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(n.formatted, "IV-00001");
        assert_eq!(n.year, 2025);
    }

    #[tokio::test]
    async fn test_configure_keeps_counter() {
        let db = setup().await;
        let seq = db.sequences();
        let mut config = SequenceConfig::default_for(EntityType::Payments, 2025);
        seq.configure(&config).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        seq.next(&mut tx, EntityType::Payments, 2025).await.unwrap();
        tx.commit().await.unwrap();

        config.prefix = "RCPT-".to_string();
        seq.configure(&config).await.unwrap();
        assert!(!seq.ensure_configured(&config).await.unwrap());

        let stored = seq.config(EntityType::Payments, 2025).await.unwrap();
        assert_eq!(stored.prefix, "RCPT-");
        assert_eq!(stored.last_number, 1);
        assert_eq!(
            seq.current(EntityType::Payments, 2025).await.unwrap().map(|n| n.formatted),
            Some("PAY-00001".to_string())
        );
        assert!(seq.validate_range(EntityType::Payments, 2025, 42).await.unwrap());
        assert!(!seq.validate_range(EntityType::Payments, 2025, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_roll_over() {
        let db = setup().await;
        let seq = db.sequences();
        seq.configure(&SequenceConfig::default_for(EntityType::ReturnVouchers, 2024))
            .await
            .unwrap();

        let config = seq.roll_over(EntityType::ReturnVouchers, 2025).await.unwrap();
        assert_eq!(config.year, 2025);
        assert_eq!(config.last_number, 0);
        assert!(matches!(
            seq.roll_over(EntityType::Payments, 2025).await,
            Err(DbError::Rule(CoreError::SequenceNotConfigured { .. }))
        ));
    }
}
