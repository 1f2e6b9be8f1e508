//! # Branch Repository
//!
//! Warehouse locations. Deactivated branches keep their stock rows but are
//! rejected as voucher endpoints and never suggested as an alternative.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use depot_core::types::Branch;
use depot_core::validation::{validate_code, validate_name};

use crate::error::{DbError, DbResult};

/// Repository for branch database operations.
#[derive(Debug, Clone)]
pub struct BranchRepository {
    pool: SqlitePool,
}

impl BranchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        BranchRepository { pool }
    }

    /// Inserts a new branch.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - code already exists
    pub async fn insert(&self, branch: &Branch) -> DbResult<Branch> {
        validate_code(&branch.code)?;
        validate_name(&branch.name)?;
        debug!(code = %branch.code, "Inserting branch");

        sqlx::query(
            "INSERT INTO branches (id, code, name, is_active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&branch.id)
        .bind(branch.code.trim())
        .bind(branch.name.trim())
        .bind(branch.is_active)
        .bind(branch.created_at)
        .bind(branch.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, branch.code.trim()),
            other => other,
        })?;

        Ok(branch.clone())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(branch)
    }

    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE code = ?1")
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(branch)
    }

    pub async fn list_active(&self) -> DbResult<Vec<Branch>> {
        let branches = sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE is_active = 1 ORDER BY code")
            .fetch_all(&self.pool)
            .await?;

        Ok(branches)
    }

    /// Activates or deactivates a branch.
    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        debug!(id = %id, active, "Setting branch active flag");

        let result = sqlx::query("UPDATE branches SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Branch", id));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_branch_crud() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.branches();

        let main = repo.insert(&Branch::new("MAIN", "Main Warehouse", Utc::now())).await.unwrap();
        repo.insert(&Branch::new("EAST", "East Yard", Utc::now())).await.unwrap();

        let err = repo.insert(&Branch::new("MAIN", "Again", Utc::now())).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        assert_eq!(repo.get_by_code("MAIN").await.unwrap().unwrap().id, main.id);
        assert_eq!(repo.list_active().await.unwrap().len(), 2);

        repo.set_active(&main.id, false).await.unwrap();
        assert!(!repo.get_by_id(&main.id).await.unwrap().unwrap().is_active);
        assert_eq!(repo.list_active().await.unwrap().len(), 1);

        assert!(matches!(
            repo.set_active("missing", true).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
