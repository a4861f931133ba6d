//! Trade settlement worker.
//!
//! Consumes settlement jobs produced by trade execution, submits the
//! settlement to the chain and records the tx hash. The fabric retries
//! transient chain failures; the final failed attempt marks the trade
//! FAILED and emits the failure event.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::jobs::{JobContext, JobError, JobHandler};
use crate::models::{SettlementStatus, Trade};
use crate::services::bus::{DomainEvent, EventBus};
use crate::services::chain::ChainClient;

pub struct SettlementJobHandler {
    pool: PgPool,
    chain: Arc<dyn ChainClient>,
    bus: EventBus,
}

impl SettlementJobHandler {
    pub fn new(pool: PgPool, chain: Arc<dyn ChainClient>, bus: EventBus) -> Self {
        Self { pool, chain, bus }
    }

    async fn load_trade(&self, trade_id: Uuid) -> Result<Option<Trade>, sqlx::Error> {
        sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = $1")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn mark_settled(&self, trade_id: Uuid, tx_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE trades
            SET settlement_status = 'SETTLED', settlement_tx_hash = $2, settled_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(trade_id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, trade_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE trades SET settlement_status = 'FAILED' WHERE id = $1")
            .bind(trade_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn payload_uuid(payload: &Value, field: &str) -> Result<Uuid, JobError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| JobError::terminal(anyhow::anyhow!("payload missing {field}")))
}

#[async_trait]
impl JobHandler for SettlementJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), JobError> {
        let trade_id = payload_uuid(&job.payload, "trade_id")?;
        let pair_id = payload_uuid(&job.payload, "trading_pair_id")?;

        let trade = self
            .load_trade(trade_id)
            .await
            .map_err(JobError::transient)?;
        let trade = match trade {
            Some(trade) => trade,
            None => {
                tracing::warn!(%trade_id, "settlement job for unknown trade");
                return Ok(());
            }
        };
        if trade.settlement_status != SettlementStatus::Pending {
            return Ok(());
        }

        match self.chain.settle_trade(trade_id, pair_id).await {
            Ok(tx_hash) => {
                self.mark_settled(trade_id, &tx_hash)
                    .await
                    .map_err(JobError::transient)?;
                tracing::info!(%trade_id, tx_hash, "trade settled");
                self.bus.publish(DomainEvent::TradeSettled {
                    trade_id,
                    tx_hash,
                });
                Ok(())
            }
            Err(err) => {
                if job.is_final_attempt() {
                    self.mark_failed(trade_id)
                        .await
                        .map_err(JobError::transient)?;
                    self.bus.publish(DomainEvent::TradeSettlementFailed {
                        trade_id,
                        error: err.to_string(),
                    });
                    Err(JobError::terminal(err))
                } else {
                    Err(JobError::transient(err))
                }
            }
        }
    }
}
