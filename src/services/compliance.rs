//! Compliance checks for RWA-token-scoped operations.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ComplianceRecord;

#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("user {user_id} is not cleared for token operations")]
    NotCleared { user_id: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct ComplianceService {
    pool: PgPool,
}

impl ComplianceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A token-scoped record takes precedence over the user's global record.
    pub async fn record_for(
        &self,
        user_id: &str,
        token_id: Uuid,
    ) -> Result<Option<ComplianceRecord>, sqlx::Error> {
        sqlx::query_as::<_, ComplianceRecord>(
            r#"
            SELECT * FROM compliance_records
            WHERE user_id = $1 AND (token_id = $2 OR token_id IS NULL)
            ORDER BY token_id NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Enforce the RWA clearance invariant: approved KYC, whitelisted, and
    /// unexpired.
    pub async fn require_cleared(
        &self,
        user_id: &str,
        token_id: Uuid,
    ) -> Result<(), ComplianceError> {
        let record = self.record_for(user_id, token_id).await?;
        match record {
            Some(record) if record.is_cleared(Utc::now()) => Ok(()),
            _ => Err(ComplianceError::NotCleared {
                user_id: user_id.to_string(),
            }),
        }
    }
}
