//! Periodic reconciliation against on-chain truth.
//!
//! Three sweeps per run: token supply (flag only), user balances
//! (authoritative overwrite from chain), and pending settlements older than
//! five minutes (confirm when the tx is final). The run summary is logged
//! at WARN whenever discrepancies were found.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::jobs::{JobContext, JobError, JobHandler};
use crate::services::balance::BalanceBook;
use crate::services::bus::{DomainEvent, EventBus};
use crate::services::chain::ChainClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscrepancyAction {
    Updated,
    Flagged,
}

#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    pub subject: String,
    pub expected: String,
    pub observed: String,
    pub action: DiscrepancyAction,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconciliationSummary {
    pub tokens_checked: usize,
    pub balances_checked: usize,
    pub settlements_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

pub struct ReconciliationWorker {
    pool: PgPool,
    chain: Arc<dyn ChainClient>,
    balances: Arc<BalanceBook>,
    bus: EventBus,
}

impl ReconciliationWorker {
    pub fn new(
        pool: PgPool,
        chain: Arc<dyn ChainClient>,
        balances: Arc<BalanceBook>,
        bus: EventBus,
    ) -> Self {
        Self {
            pool,
            chain,
            balances,
            bus,
        }
    }

    pub async fn run(&self) -> Result<ReconciliationSummary, sqlx::Error> {
        let started = Utc::now();
        let mut summary = ReconciliationSummary::default();

        self.check_token_supplies(&mut summary).await?;
        self.check_balances(&mut summary).await?;
        self.check_pending_settlements(&mut summary).await?;

        let elapsed_ms = (Utc::now() - started).num_milliseconds();
        if summary.discrepancies.is_empty() {
            tracing::info!(
                tokens = summary.tokens_checked,
                balances = summary.balances_checked,
                settlements = summary.settlements_checked,
                elapsed_ms,
                "reconciliation clean"
            );
        } else {
            tracing::warn!(
                tokens = summary.tokens_checked,
                balances = summary.balances_checked,
                settlements = summary.settlements_checked,
                discrepancies = summary.discrepancies.len(),
                detail = %serde_json::to_string(&summary.discrepancies).unwrap_or_default(),
                elapsed_ms,
                "reconciliation found discrepancies"
            );
        }
        Ok(summary)
    }

    /// Supply mismatches are flagged, never auto-corrected.
    async fn check_token_supplies(
        &self,
        summary: &mut ReconciliationSummary,
    ) -> Result<(), sqlx::Error> {
        let tokens: Vec<(Uuid, String, String, Option<BigDecimal>)> = sqlx::query_as(
            r#"
            SELECT id, symbol, contract_address, total_supply
            FROM tokens
            WHERE is_active AND contract_address IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (_, symbol, contract, stored_supply) in tokens {
            summary.tokens_checked += 1;
            let onchain = match self.chain.total_supply(&contract).await {
                Ok(supply) => supply,
                Err(e) => {
                    tracing::warn!(token = %symbol, "supply read failed: {e}");
                    continue;
                }
            };
            let stored = stored_supply.unwrap_or_else(BigDecimal::zero);
            if stored != onchain {
                summary.discrepancies.push(Discrepancy {
                    subject: format!("token:{symbol}:supply"),
                    expected: stored.to_string(),
                    observed: onchain.to_string(),
                    action: DiscrepancyAction::Flagged,
                });
            }
        }
        Ok(())
    }

    /// The chain is authoritative for balances: a mismatch overwrites the
    /// local row as (available = on-chain, locked = 0).
    async fn check_balances(&self, summary: &mut ReconciliationSummary) -> Result<(), sqlx::Error> {
        let rows: Vec<(String, Uuid, String, BigDecimal, BigDecimal)> = sqlx::query_as(
            r#"
            SELECT b.user_id, b.token_id, t.contract_address, b.available, b.locked
            FROM user_balances b
            JOIN tokens t ON t.id = b.token_id
            WHERE t.contract_address IS NOT NULL AND (b.available + b.locked) > 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (user_id, token_id, contract, available, locked) in rows {
            summary.balances_checked += 1;
            let onchain = match self.chain.balance_of(&contract, &user_id).await {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, "balance read failed: {e}");
                    continue;
                }
            };
            let local_total = &available + &locked;
            if local_total != onchain {
                if let Err(e) = self
                    .balances
                    .upsert(&user_id, token_id, &onchain, &BigDecimal::zero())
                    .await
                {
                    tracing::error!(user_id = %user_id, "balance overwrite failed: {e}");
                    continue;
                }
                summary.discrepancies.push(Discrepancy {
                    subject: format!("balance:{user_id}:{token_id}"),
                    expected: local_total.to_string(),
                    observed: onchain.to_string(),
                    action: DiscrepancyAction::Updated,
                });
            }
        }
        Ok(())
    }

    /// Confirm stale pending settlements that already carry a tx hash; the
    /// ones without a hash are only flagged.
    async fn check_pending_settlements(
        &self,
        summary: &mut ReconciliationSummary,
    ) -> Result<(), sqlx::Error> {
        let trades: Vec<(Uuid, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, settlement_tx_hash FROM trades
            WHERE settlement_status = 'PENDING'
              AND executed_at < NOW() - INTERVAL '5 minutes'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (trade_id, tx_hash) in trades {
            summary.settlements_checked += 1;
            match tx_hash {
                Some(tx_hash) => {
                    let confirmed = match self.chain.tx_confirmed(&tx_hash).await {
                        Ok(confirmed) => confirmed,
                        Err(e) => {
                            tracing::warn!(%trade_id, "settlement check failed: {e}");
                            continue;
                        }
                    };
                    if confirmed {
                        sqlx::query(
                            "UPDATE trades SET settlement_status = 'SETTLED', settled_at = NOW() WHERE id = $1",
                        )
                        .bind(trade_id)
                        .execute(&self.pool)
                        .await?;
                        self.bus.publish(DomainEvent::TradeSettled {
                            trade_id,
                            tx_hash: tx_hash.clone(),
                        });
                        summary.discrepancies.push(Discrepancy {
                            subject: format!("trade:{trade_id}:settlement"),
                            expected: "PENDING".to_string(),
                            observed: "SETTLED".to_string(),
                            action: DiscrepancyAction::Updated,
                        });
                    }
                }
                None => {
                    summary.discrepancies.push(Discrepancy {
                        subject: format!("trade:{trade_id}:settlement"),
                        expected: "tx hash".to_string(),
                        observed: "none".to_string(),
                        action: DiscrepancyAction::Flagged,
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ReconciliationWorker {
    async fn handle(&self, _job: &JobContext) -> Result<(), JobError> {
        self.run().await.map(|_| ()).map_err(JobError::transient)
    }
}
