//! Read-only existence checks used by request validators. Not authoritative:
//! the Ledger Store re-reads fresh state when it actually writes.

use sqlx::{PgPool, Row};

use crate::models::User;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("lookup failed")]
    Internal(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct UserLookup {
    pool: PgPool,
}

impl UserLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Hydrates the full user row, not just its existence. The request-
    /// boundary validators below only need the boolean, but this is the
    /// read path a richer caller (an admin endpoint, a future profile
    /// route) would use to get at `balance`/`account` together.
    pub async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, LookupError> {
        let row = sqlx::query("SELECT id, balance, account FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            balance: r.get("balance"),
            account: r.get("account"),
        }))
    }

    pub async fn exists_by_id(&self, user_id: &str) -> Result<bool, LookupError> {
        Ok(self.get_by_id(user_id).await?.is_some())
    }
}

#[derive(Clone)]
pub struct SourceLookup {
    pool: PgPool,
}

impl SourceLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Looks up a source type by name, compared case-insensitively.
    pub async fn exists_by_name(&self, name: &str) -> Result<Option<i64>, LookupError> {
        let row = sqlx::query("SELECT id FROM sources WHERE lower(name) = lower($1)")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("id")))
    }
}
