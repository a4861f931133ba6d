//! Market lifecycle engine.
//!
//! Drives the market state machine from registration through approval and
//! token deployment to live trading. Approval decisions arrive from the
//! entity-permissions service (webhook or poller); admin actions come from
//! the HTTP surface. Every transition is recorded as an approval event, and
//! deployment runs as a retryable background job.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::jobs::{queues, BackoffPolicy, JobFabric, JobOptions};
use crate::models::{
    AssetCategory, Market, MarketApprovalEvent, MarketAsset, MarketStatus, Token, TradingPair,
};
use crate::services::bus::{DomainEvent, EventBus};
use crate::services::chain::{ChainClient, ChainError};
use crate::services::permissions::{EntityPermissionsClient, PermissionsError};
use crate::utils::amounts;

/// Decimals minted for every deployed RWA token.
const RWA_TOKEN_DECIMALS: u8 = 18;
/// Price precision for auto-created pairs; quantity precision follows the
/// base token's decimals.
const PAIR_PRICE_PRECISION: i32 = 6;

const DEPLOY_ATTEMPTS: u32 = 5;
const DEPLOY_BACKOFF_BASE_MS: u64 = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("market not found: {0}")]
    MarketNotFound(Uuid),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: MarketStatus, to: MarketStatus },

    #[error("permission denied: {reasons:?}")]
    Forbidden { reasons: Vec<String> },

    #[error("{0}")]
    Validation(String),

    #[error("no active stable quote token configured")]
    NoStableToken,

    #[error("permissions service error: {0}")]
    Permissions(#[from] PermissionsError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(#[from] redis::RedisError),
}

/// Caller identity for a lifecycle action.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub actor_id: String,
    pub roles: Vec<String>,
}

impl ActorContext {
    pub fn admin(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles: vec!["admin".to_string()],
        }
    }

    fn as_context(&self) -> Value {
        json!({ "actorId": self.actor_id, "roles": self.roles })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMarketRequest {
    pub name: String,
    pub owner_id: String,
    pub issuer_id: Option<String>,
    pub asset_category: AssetCategory,
    pub token_symbol: String,
    pub token_name: String,
    pub total_supply: String,
    pub asset: RegisterAssetInput,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAssetInput {
    pub valuation: String,
    pub currency: String,
    pub description: Option<String>,
    #[serde(default)]
    pub compliance_document_ids: Vec<String>,
    #[serde(default)]
    pub regulatory_info: Value,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketQuery {
    pub status: Option<MarketStatus>,
    pub owner_id: Option<String>,
    pub created_after: Option<chrono::DateTime<Utc>>,
    pub created_before: Option<chrono::DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub struct MarketLifecycleEngine {
    pool: PgPool,
    permissions: Arc<EntityPermissionsClient>,
    fabric: Arc<JobFabric>,
    chain: Arc<dyn ChainClient>,
    bus: EventBus,
}

impl MarketLifecycleEngine {
    pub fn new(
        pool: PgPool,
        permissions: Arc<EntityPermissionsClient>,
        fabric: Arc<JobFabric>,
        chain: Arc<dyn ChainClient>,
        bus: EventBus,
    ) -> Self {
        Self {
            pool,
            permissions,
            fabric,
            chain,
            bus,
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Create a market in `draft` and immediately submit it for approval.
    pub async fn register_market(
        &self,
        req: RegisterMarketRequest,
        actor: &ActorContext,
    ) -> Result<(Market, MarketAsset), LifecycleError> {
        let total_supply = amounts::parse_amount(&req.total_supply)
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;
        let valuation = amounts::parse_amount(&req.asset.valuation)
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;
        if req.token_symbol.trim().is_empty() || req.name.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "name and token symbol are required".into(),
            ));
        }

        self.authorize(actor, "markets", "register").await?;

        let market_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        let market = sqlx::query_as::<_, Market>(
            r#"
            INSERT INTO markets
                (id, name, owner_id, issuer_id, asset_category, status,
                 token_symbol, token_name, total_supply, metadata)
            VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(market_id)
        .bind(&req.name)
        .bind(&req.owner_id)
        .bind(&req.issuer_id)
        .bind(req.asset_category)
        .bind(req.token_symbol.to_uppercase())
        .bind(&req.token_name)
        .bind(&total_supply)
        .bind(&req.metadata)
        .fetch_one(&mut *tx)
        .await?;

        let asset = sqlx::query_as::<_, MarketAsset>(
            r#"
            INSERT INTO market_assets
                (id, market_id, valuation, currency, description,
                 compliance_document_ids, regulatory_info, attributes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(market_id)
        .bind(&valuation)
        .bind(&req.asset.currency)
        .bind(&req.asset.description)
        .bind(&req.asset.compliance_document_ids)
        .bind(&req.asset.regulatory_info)
        .bind(&req.asset.attributes)
        .fetch_one(&mut *tx)
        .await?;

        Self::record_transition(
            &mut tx,
            market_id,
            &actor.actor_id,
            "submitted",
            MarketStatus::Draft,
            MarketStatus::PendingApproval,
            None,
        )
        .await?;
        sqlx::query("UPDATE markets SET status = 'pending_approval', updated_at = NOW() WHERE id = $1")
            .bind(market_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.bus
            .publish(DomainEvent::MarketRegistered { market_id });

        let mut market = market;
        market.status = MarketStatus::PendingApproval;
        Ok((market, asset))
    }

    // ========================================================================
    // Approval decisions
    // ========================================================================

    /// Apply an external approval decision. On approval the deployment job
    /// is submitted and the market moves straight to `activating`.
    pub async fn process_approval_decision(
        &self,
        market_id: Uuid,
        decision: ApprovalDecision,
        actor: &ActorContext,
        reason: Option<&str>,
    ) -> Result<Market, LifecycleError> {
        let market = self.load_market(market_id).await?;
        let target = match decision {
            ApprovalDecision::Approved => MarketStatus::Approved,
            ApprovalDecision::Rejected => MarketStatus::Rejected,
        };
        Self::check_transition(market.status, target)?;
        self.authorize(actor, &market_id.to_string(), "approve").await?;

        let decision_str = match decision {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
        };

        let mut tx = self.pool.begin().await?;
        Self::record_transition(
            &mut tx,
            market_id,
            &actor.actor_id,
            decision_str,
            market.status,
            target,
            reason,
        )
        .await?;

        match decision {
            ApprovalDecision::Approved => {
                sqlx::query(
                    r#"
                    UPDATE markets
                    SET status = 'approved', approved_by = $2, approved_at = NOW(), updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(market_id)
                .bind(&actor.actor_id)
                .execute(&mut *tx)
                .await?;
            }
            ApprovalDecision::Rejected => {
                sqlx::query("UPDATE markets SET status = 'rejected', updated_at = NOW() WHERE id = $1")
                    .bind(market_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        match decision {
            ApprovalDecision::Approved => {
                self.bus.publish(DomainEvent::MarketApproved {
                    market_id,
                    actor_id: actor.actor_id.clone(),
                });
                self.begin_activation(market_id, &actor.actor_id).await?;
            }
            ApprovalDecision::Rejected => {
                self.bus.publish(DomainEvent::MarketRejected {
                    market_id,
                    actor_id: actor.actor_id.clone(),
                });
            }
        }

        self.load_market(market_id).await
    }

    /// `approved -> activating` plus the deployment job. Also the retry
    /// entry point for markets rolled back by a failed deployment.
    pub async fn begin_activation(
        &self,
        market_id: Uuid,
        actor_id: &str,
    ) -> Result<Market, LifecycleError> {
        let market = self.load_market(market_id).await?;
        Self::check_transition(market.status, MarketStatus::Activating)?;

        let mut tx = self.pool.begin().await?;
        Self::record_transition(
            &mut tx,
            market_id,
            actor_id,
            "activation_started",
            market.status,
            MarketStatus::Activating,
            None,
        )
        .await?;
        sqlx::query("UPDATE markets SET status = 'activating', updated_at = NOW() WHERE id = $1")
            .bind(market_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.fabric
            .submit(
                queues::DEPLOYMENT,
                json!({ "market_id": market_id }),
                JobOptions::default()
                    .with_job_id(queues::deploy_job_id(market_id))
                    .with_attempts(DEPLOY_ATTEMPTS)
                    .with_backoff(BackoffPolicy::exponential(DEPLOY_BACKOFF_BASE_MS)),
            )
            .await?;

        self.load_market(market_id).await
    }

    // ========================================================================
    // Admin actions
    // ========================================================================

    pub async fn activate(
        &self,
        market_id: Uuid,
        actor: &ActorContext,
    ) -> Result<Market, LifecycleError> {
        let market = self.load_market(market_id).await?;
        self.authorize(actor, &market_id.to_string(), "activate").await?;
        match market.status {
            MarketStatus::Approved => self.begin_activation(market_id, &actor.actor_id).await,
            MarketStatus::Paused => {
                let market = self
                    .admin_transition(market_id, actor, MarketStatus::Active, "resumed")
                    .await?;
                self.bus.publish(DomainEvent::MarketResumed { market_id });
                Ok(market)
            }
            other => Err(LifecycleError::IllegalTransition {
                from: other,
                to: MarketStatus::Active,
            }),
        }
    }

    pub async fn pause(
        &self,
        market_id: Uuid,
        actor: &ActorContext,
    ) -> Result<Market, LifecycleError> {
        self.authorize(actor, &market_id.to_string(), "pause").await?;
        let market = self
            .admin_transition(market_id, actor, MarketStatus::Paused, "paused")
            .await?;
        self.bus.publish(DomainEvent::MarketPaused { market_id });
        Ok(market)
    }

    pub async fn archive(
        &self,
        market_id: Uuid,
        actor: &ActorContext,
    ) -> Result<Market, LifecycleError> {
        self.authorize(actor, &market_id.to_string(), "archive").await?;
        let market = self
            .admin_transition(market_id, actor, MarketStatus::Archived, "archived")
            .await?;
        self.bus.publish(DomainEvent::MarketArchived { market_id });
        Ok(market)
    }

    async fn admin_transition(
        &self,
        market_id: Uuid,
        actor: &ActorContext,
        target: MarketStatus,
        decision: &str,
    ) -> Result<Market, LifecycleError> {
        let market = self.load_market(market_id).await?;
        Self::check_transition(market.status, target)?;

        let mut tx = self.pool.begin().await?;
        Self::record_transition(
            &mut tx,
            market_id,
            &actor.actor_id,
            decision,
            market.status,
            target,
            None,
        )
        .await?;
        sqlx::query("UPDATE markets SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(market_id)
            .bind(target)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.load_market(market_id).await
    }

    // ========================================================================
    // Deployment job
    // ========================================================================

    /// Deployment job body. Idempotent: anything but `activating` returns
    /// without effect, so re-deliveries and duplicate submissions are safe.
    pub async fn run_deploy_job(&self, market_id: Uuid) -> Result<(), LifecycleError> {
        let market = self.load_market(market_id).await?;
        if market.status != MarketStatus::Activating {
            tracing::debug!(%market_id, status = %market.status, "deploy job is a no-op");
            return Ok(());
        }

        let deployed = self
            .chain
            .deploy_asset_token(
                &market.token_symbol,
                &market.token_name,
                &market.total_supply,
                RWA_TOKEN_DECIMALS,
            )
            .await;

        match deployed {
            Ok(deployed) => {
                self.complete_activation(&market, &deployed.contract_address, &deployed.tx_hash)
                    .await?;
                Ok(())
            }
            Err(err) => {
                self.roll_back_activation(&market, &err).await?;
                // Re-raise so the fabric applies the retry/backoff policy.
                Err(err.into())
            }
        }
    }

    async fn complete_activation(
        &self,
        market: &Market,
        contract_address: &str,
        tx_hash: &str,
    ) -> Result<(), LifecycleError> {
        let mut tx = self.pool.begin().await?;

        Self::record_transition(
            &mut tx,
            market.id,
            "system",
            "activated",
            MarketStatus::Activating,
            MarketStatus::Active,
            None,
        )
        .await?;
        sqlx::query(
            r#"
            UPDATE markets
            SET status = 'active', contract_address = $2, deployment_tx_hash = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(market.id)
        .bind(contract_address)
        .bind(tx_hash)
        .execute(&mut *tx)
        .await?;

        // Token row, keyed by symbol; collision means a prior attempt
        // already created it.
        sqlx::query(
            r#"
            INSERT INTO tokens
                (id, symbol, name, token_type, contract_address, blockchain, decimals, total_supply)
            VALUES ($1, $2, $3, 'RWA', $4, 'sapphire', $5, $6)
            ON CONFLICT (symbol) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&market.token_symbol)
        .bind(&market.token_name)
        .bind(contract_address)
        .bind(RWA_TOKEN_DECIMALS as i32)
        .bind(&market.total_supply)
        .execute(&mut *tx)
        .await?;

        let token = sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE symbol = $1")
            .bind(&market.token_symbol)
            .fetch_one(&mut *tx)
            .await?;

        let stable = sqlx::query_as::<_, Token>(
            "SELECT * FROM tokens WHERE token_type = 'STABLE' AND is_active ORDER BY created_at LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LifecycleError::NoStableToken)?;

        let pair_symbol = format!("{}/{}", token.symbol, stable.symbol);
        sqlx::query(
            r#"
            INSERT INTO trading_pairs
                (id, symbol, base_token_id, quote_token_id, market_id, is_active,
                 min_order_size, max_order_size, price_precision, quantity_precision)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $8, $9)
            ON CONFLICT (symbol) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&pair_symbol)
        .bind(token.id)
        .bind(stable.id)
        .bind(market.id)
        .bind(BigDecimal::from(1))
        .bind(&market.total_supply)
        .bind(PAIR_PRICE_PRECISION)
        .bind(token.decimals)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            market_id = %market.id,
            contract = contract_address,
            pair = %pair_symbol,
            "market activated"
        );
        self.bus.publish(DomainEvent::MarketActivated {
            market_id: market.id,
            contract_address: contract_address.to_string(),
        });
        Ok(())
    }

    async fn roll_back_activation(
        &self,
        market: &Market,
        err: &ChainError,
    ) -> Result<(), LifecycleError> {
        let mut tx = self.pool.begin().await?;
        Self::record_transition(
            &mut tx,
            market.id,
            "system",
            "activation_failed",
            MarketStatus::Activating,
            MarketStatus::Approved,
            Some(&err.to_string()),
        )
        .await?;
        sqlx::query(
            r#"
            UPDATE markets
            SET status = 'approved',
                metadata = metadata || jsonb_build_object('activationError', $2::text),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(market.id)
        .bind(err.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::warn!(market_id = %market.id, "token deployment failed: {err}");
        self.bus.publish(DomainEvent::MarketActivationFailed {
            market_id: market.id,
            error: err.to_string(),
        });
        Ok(())
    }

    /// A deployment retry re-enters through `activating`; the fabric calls
    /// this before re-running the handler after a rollback.
    pub async fn reenter_activation(&self, market_id: Uuid) -> Result<(), LifecycleError> {
        let market = self.load_market(market_id).await?;
        if market.status == MarketStatus::Approved {
            let mut tx = self.pool.begin().await?;
            Self::record_transition(
                &mut tx,
                market_id,
                "system",
                "activation_retried",
                MarketStatus::Approved,
                MarketStatus::Activating,
                None,
            )
            .await?;
            sqlx::query("UPDATE markets SET status = 'activating', updated_at = NOW() WHERE id = $1")
                .bind(market_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn load_market(&self, market_id: Uuid) -> Result<Market, LifecycleError> {
        sqlx::query_as::<_, Market>("SELECT * FROM markets WHERE id = $1")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LifecycleError::MarketNotFound(market_id))
    }

    pub async fn load_asset(&self, market_id: Uuid) -> Result<Option<MarketAsset>, LifecycleError> {
        Ok(
            sqlx::query_as::<_, MarketAsset>("SELECT * FROM market_assets WHERE market_id = $1")
                .bind(market_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_markets(&self, query: &MarketQuery) -> Result<Vec<Market>, LifecycleError> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) as i64 * page_size as i64;

        let rows = sqlx::query_as::<_, Market>(
            r#"
            SELECT * FROM markets
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR owner_id = $2)
              AND ($3::timestamptz IS NULL OR created_at > $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(query.status.map(|s| s.to_string()))
        .bind(&query.owner_id)
        .bind(query.created_after)
        .bind(query.created_before)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn approval_history(
        &self,
        market_id: Uuid,
    ) -> Result<Vec<MarketApprovalEvent>, LifecycleError> {
        Ok(sqlx::query_as::<_, MarketApprovalEvent>(
            "SELECT * FROM market_approval_events WHERE market_id = $1 ORDER BY created_at",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn pair_for_market(
        &self,
        market_id: Uuid,
    ) -> Result<Option<TradingPair>, LifecycleError> {
        Ok(
            sqlx::query_as::<_, TradingPair>("SELECT * FROM trading_pairs WHERE market_id = $1")
                .bind(market_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_transition(from: MarketStatus, to: MarketStatus) -> Result<(), LifecycleError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(LifecycleError::IllegalTransition { from, to })
        }
    }

    async fn authorize(
        &self,
        actor: &ActorContext,
        entity_id: &str,
        action: &str,
    ) -> Result<(), LifecycleError> {
        let decision = self
            .permissions
            .authorize(&actor.actor_id, entity_id, action, &actor.as_context())
            .await?;
        if decision.allowed {
            Ok(())
        } else {
            Err(LifecycleError::Forbidden {
                reasons: decision.reasons,
            })
        }
    }

    async fn record_transition(
        tx: &mut sqlx::PgConnection,
        market_id: Uuid,
        actor_id: &str,
        decision: &str,
        from: MarketStatus,
        to: MarketStatus,
        reason: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO market_approval_events
                (id, market_id, actor_id, decision, from_status, to_status, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(market_id)
        .bind(actor_id)
        .bind(decision)
        .bind(from)
        .bind(to)
        .bind(reason)
        .execute(tx)
        .await?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_targets_require_pending_state() {
        assert!(MarketLifecycleEngine::check_transition(
            MarketStatus::PendingApproval,
            MarketStatus::Approved
        )
        .is_ok());
        assert!(MarketLifecycleEngine::check_transition(
            MarketStatus::Draft,
            MarketStatus::Approved
        )
        .is_err());
        assert!(MarketLifecycleEngine::check_transition(
            MarketStatus::Active,
            MarketStatus::Approved
        )
        .is_err());
    }

    #[test]
    fn actor_context_serializes_for_authorization() {
        let actor = ActorContext::admin("ops-1");
        let ctx = actor.as_context();
        assert_eq!(ctx["actorId"], "ops-1");
        assert_eq!(ctx["roles"][0], "admin");
    }
}
