//! Processed-event ledger.
//!
//! Idempotency record for every externally-originated event. The first
//! `record` for an event_id wins the row; later calls only update status and
//! timestamp. Callers check `is_processed` before side effects and record
//! success/failed/skipped after.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ProcessedEvent, ProcessingStatus};

pub struct ProcessedEventLedger {
    pool: PgPool,
}

impl ProcessedEventLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn is_processed(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT event_id FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Upsert on event_id. The insert half freezes event_type, source,
    /// payload and context; the update half only moves status, error and
    /// processed_at.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        event_id: &str,
        event_type: &str,
        source: &str,
        payload: &Value,
        context: &Value,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO processed_events
                (id, event_id, event_type, source, payload, context, processing_status, processing_error, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                processing_status = $7,
                processing_error = $8,
                processed_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(event_type)
        .bind(source)
        .bind(payload)
        .bind(context)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recent failed events, newest first. Feeds the failure dashboard.
    pub async fn failed_events(&self, limit: i64) -> Result<Vec<ProcessedEvent>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM processed_events
            WHERE processing_status = 'failed'
            ORDER BY processed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
