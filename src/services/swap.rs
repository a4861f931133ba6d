//! Cross-chain swap processor.
//!
//! Quotes are pure math; a requested swap locks the source balance, records
//! the swap and runs the bridge call as a fabric job. Terminal failure on
//! the final attempt releases the source lock so the user ends where they
//! started.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Zero};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::jobs::{queues, BackoffPolicy, JobFabric, JobOptions};
use crate::models::{
    CreateSwapRequest, SwapQuote, SwapRecord, SwapStatus, Token, TokenType,
};
use crate::services::balance::{BalanceBook, BalanceError};
use crate::services::bus::{DomainEvent, EventBus};
use crate::services::chain::{ChainClient, ChainError};
use crate::services::compliance::ComplianceService;
use crate::utils::amounts;

const PLATFORM_FEE_BPS: u32 = 25;
const BRIDGE_FEE_BPS: u32 = 15;
/// Flat network fee in the source token's smallest unit.
const NETWORK_FEE: u64 = 1_000;
const QUOTE_TTL_MINUTES: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("{0}")]
    Validation(String),

    #[error("token not found: {0}")]
    TokenNotFound(Uuid),

    #[error("swap not found: {0}")]
    SwapNotFound(Uuid),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

impl From<BalanceError> for SwapError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::Database(e) => SwapError::Database(e),
            _ => SwapError::InsufficientBalance,
        }
    }
}

pub struct SwapService {
    pool: PgPool,
    balances: Arc<BalanceBook>,
    compliance: Arc<ComplianceService>,
    chain: Arc<dyn ChainClient>,
    fabric: Arc<JobFabric>,
    bus: EventBus,
    worker_attempts: u32,
    retry_backoff_ms: u64,
}

impl SwapService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        balances: Arc<BalanceBook>,
        compliance: Arc<ComplianceService>,
        chain: Arc<dyn ChainClient>,
        fabric: Arc<JobFabric>,
        bus: EventBus,
        worker_attempts: u32,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            pool,
            balances,
            compliance,
            chain,
            fabric,
            bus,
            worker_attempts: worker_attempts.max(1),
            retry_backoff_ms,
        }
    }

    // ========================================================================
    // Quoting
    // ========================================================================

    /// Pure quote: fees, conversion rate and decimals adjustment, no state
    /// effect.
    pub async fn quote(
        &self,
        source_token_id: Uuid,
        target_token_id: Uuid,
        source_amount_raw: &str,
    ) -> Result<SwapQuote, SwapError> {
        let source_amount = amounts::parse_amount(source_amount_raw)
            .map_err(|e| SwapError::Validation(e.to_string()))?;
        if !amounts::is_positive_amount(&source_amount) {
            return Err(SwapError::Validation("amount must be positive".into()));
        }
        if source_token_id == target_token_id {
            return Err(SwapError::Validation("tokens must be distinct".into()));
        }

        let source = self.load_token(source_token_id).await?;
        let target = self.load_token(target_token_id).await?;

        compute_quote(&source, &target, &source_amount)
    }

    // ========================================================================
    // Requesting
    // ========================================================================

    /// Lock the source amount, persist the swap and enqueue the bridge job.
    pub async fn request_swap(&self, req: CreateSwapRequest) -> Result<SwapRecord, SwapError> {
        let source_amount = amounts::parse_amount(&req.source_amount)
            .map_err(|e| SwapError::Validation(e.to_string()))?;
        if !amounts::is_positive_amount(&source_amount) {
            return Err(SwapError::Validation("amount must be positive".into()));
        }
        if req.source_token_id == req.target_token_id {
            return Err(SwapError::Validation("tokens must be distinct".into()));
        }
        if req.destination_address.trim().is_empty() {
            return Err(SwapError::Validation("destination address is required".into()));
        }

        let source = self.load_token(req.source_token_id).await?;
        let target = self.load_token(req.target_token_id).await?;

        // Compliance is best-effort for swaps: failures are logged, not
        // fatal.
        for token in [&source, &target] {
            if token.token_type == TokenType::Rwa {
                if let Err(e) = self.compliance.require_cleared(&req.user_id, token.id).await {
                    tracing::warn!(
                        user_id = %req.user_id,
                        token = %token.symbol,
                        "swap compliance check failed: {e}"
                    );
                }
            }
        }

        let quote = compute_quote(&source, &target, &source_amount)?;
        let expected_target = amounts::parse_amount(&quote.expected_target_amount)
            .map_err(|e| SwapError::Validation(e.to_string()))?;

        self.balances
            .lock(&req.user_id, source.id, &source_amount)
            .await?;

        let swap = match self
            .insert_swap(&req, &source, &target, &source_amount, &expected_target)
            .await
        {
            Ok(swap) => swap,
            Err(e) => {
                if let Err(unlock_err) = self
                    .balances
                    .unlock(&req.user_id, source.id, &source_amount)
                    .await
                {
                    tracing::error!(user_id = %req.user_id, "failed to roll back swap lock: {unlock_err}");
                }
                return Err(e.into());
            }
        };

        self.fabric
            .submit(
                queues::SWAPS,
                json!({ "swap_id": swap.id }),
                JobOptions::default()
                    .with_job_id(queues::swap_job_id(swap.id))
                    .with_attempts(self.worker_attempts)
                    .with_backoff(BackoffPolicy::exponential(self.retry_backoff_ms)),
            )
            .await?;

        self.set_status(swap.id, SwapStatus::Queued, None).await?;
        self.bus.publish(DomainEvent::SwapRequested { swap_id: swap.id });

        self.load_swap(swap.id).await
    }

    // ========================================================================
    // Job handler
    // ========================================================================

    /// Bridge job body. `attempts_made`/`attempts` drive the final-attempt
    /// refund: a non-final failure re-queues, the last one releases the
    /// source lock and marks the swap FAILED.
    pub async fn run_swap_job(
        &self,
        swap_id: Uuid,
        attempts_made: u32,
        attempts: u32,
    ) -> Result<(), SwapError> {
        let swap = self.load_swap(swap_id).await?;
        if swap.status.is_terminal() {
            return Ok(());
        }

        self.set_status(swap_id, SwapStatus::Processing, None).await?;
        self.bus.publish(DomainEvent::SwapProcessing { swap_id });

        let source = self.load_token(swap.source_token_id).await?;
        let target = self.load_token(swap.target_token_id).await?;

        let receipt = self
            .chain
            .bridge_swap(
                swap.id,
                &source.symbol,
                &target.symbol,
                &swap.source_amount,
                &swap.destination_address,
            )
            .await;

        match receipt {
            Ok(receipt) => {
                // Consume the lock and credit the target leg.
                self.balances
                    .credit(
                        &swap.user_id,
                        source.id,
                        &BigDecimal::zero(),
                        &-swap.source_amount.clone(),
                    )
                    .await?;
                self.balances
                    .credit(
                        &swap.user_id,
                        target.id,
                        &swap.expected_target_amount,
                        &BigDecimal::zero(),
                    )
                    .await?;

                sqlx::query(
                    r#"
                    UPDATE swaps
                    SET status = 'COMPLETED', bridge_swap_id = $2, source_tx_hash = $3,
                        completed_at = NOW(), updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(swap_id)
                .bind(&receipt.bridge_swap_id)
                .bind(&receipt.source_tx_hash)
                .execute(&self.pool)
                .await?;

                self.bus.publish(DomainEvent::SwapCompleted { swap_id });
                Ok(())
            }
            Err(err) => {
                if attempts_made + 1 < attempts {
                    self.set_status(swap_id, SwapStatus::Queued, None).await?;
                    self.bus.publish(DomainEvent::SwapQueued { swap_id });
                    Err(err.into())
                } else {
                    // Final attempt: refund and settle into FAILED.
                    self.balances
                        .unlock(&swap.user_id, source.id, &swap.source_amount)
                        .await?;
                    self.set_status(swap_id, SwapStatus::Failed, Some(&err.to_string()))
                        .await?;
                    self.bus.publish(DomainEvent::SwapFailed {
                        swap_id,
                        reason: err.to_string(),
                    });
                    Err(err.into())
                }
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn load_swap(&self, swap_id: Uuid) -> Result<SwapRecord, SwapError> {
        sqlx::query_as::<_, SwapRecord>("SELECT * FROM swaps WHERE id = $1")
            .bind(swap_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SwapError::SwapNotFound(swap_id))
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<SwapRecord>, SwapError> {
        Ok(sqlx::query_as::<_, SwapRecord>(
            "SELECT * FROM swaps WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn insert_swap(
        &self,
        req: &CreateSwapRequest,
        source: &Token,
        target: &Token,
        source_amount: &BigDecimal,
        expected_target: &BigDecimal,
    ) -> Result<SwapRecord, sqlx::Error> {
        sqlx::query_as::<_, SwapRecord>(
            r#"
            INSERT INTO swaps
                (id, user_id, source_token_id, target_token_id, source_chain, target_chain,
                 source_amount, expected_target_amount, destination_address, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.user_id)
        .bind(source.id)
        .bind(target.id)
        .bind(&source.blockchain)
        .bind(&target.blockchain)
        .bind(source_amount)
        .bind(expected_target)
        .bind(&req.destination_address)
        .fetch_one(&self.pool)
        .await
    }

    async fn set_status(
        &self,
        swap_id: Uuid,
        status: SwapStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE swaps
            SET status = $2, failure_reason = COALESCE($3, failure_reason), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(swap_id)
        .bind(status)
        .bind(failure_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_token(&self, token_id: Uuid) -> Result<Token, SwapError> {
        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SwapError::TokenNotFound(token_id))
    }
}

/// Quote math. Fees come off the source amount; the net is converted across
/// the decimals differential and the pair's conversion rate.
fn compute_quote(
    source: &Token,
    target: &Token,
    source_amount: &BigDecimal,
) -> Result<SwapQuote, SwapError> {
    let platform_fee = amounts::fee_bps(source_amount, PLATFORM_FEE_BPS);
    let bridge_fee = amounts::fee_bps(source_amount, BRIDGE_FEE_BPS);
    let network_fee = BigDecimal::from(NETWORK_FEE);
    let total_fee = &platform_fee + &bridge_fee + &network_fee;

    if total_fee >= *source_amount {
        return Err(SwapError::Validation(
            "fees meet or exceed the swap amount".into(),
        ));
    }

    let net = source_amount - &total_fee;

    // Decimals differential between the two tokens.
    let scaled = match target.decimals - source.decimals {
        0 => net,
        diff if diff > 0 => net * amounts::pow10(diff as u32),
        diff => amounts::truncate(&(net * BigDecimal::new(BigInt::from(1), (-diff) as i64))),
    };

    let rate = conversion_rate(source, target);
    let expected = amounts::truncate(&(&scaled * &rate));

    Ok(SwapQuote {
        source_token_id: source.id,
        target_token_id: target.id,
        source_amount: source_amount.to_string(),
        platform_fee: platform_fee.to_string(),
        bridge_fee: bridge_fee.to_string(),
        network_fee: network_fee.to_string(),
        total_fee: total_fee.to_string(),
        expected_target_amount: expected.to_string(),
        rate: rate.to_string(),
        expires_at: Utc::now() + Duration::minutes(QUOTE_TTL_MINUTES),
    })
}

/// 1.0 within one chain; 0.999 when either side is the stable token; 1.02
/// otherwise.
fn conversion_rate(source: &Token, target: &Token) -> BigDecimal {
    if source.blockchain == target.blockchain {
        BigDecimal::from(1)
    } else if source.token_type == TokenType::Stable || target.token_type == TokenType::Stable {
        BigDecimal::new(BigInt::from(999), 3)
    } else {
        BigDecimal::new(BigInt::from(102), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn token(token_type: TokenType, blockchain: &str, decimals: i32) -> Token {
        let now = Utc::now();
        Token {
            id: Uuid::new_v4(),
            symbol: "TKN".to_string(),
            name: "Token".to_string(),
            token_type,
            contract_address: None,
            blockchain: blockchain.to_string(),
            decimals,
            total_supply: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn bd(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn quote_fees_are_25_15_bps_plus_flat() {
        let source = token(TokenType::Crypto, "sapphire", 18);
        let target = token(TokenType::Crypto, "sapphire", 18);
        let amount = bd("1000000");

        let quote = compute_quote(&source, &target, &amount).unwrap();
        assert_eq!(quote.platform_fee, "2500");
        assert_eq!(quote.bridge_fee, "1500");
        assert_eq!(quote.network_fee, "1000");
        assert_eq!(quote.total_fee, "5000");
        // Same chain: rate 1.0, no decimals shift.
        assert_eq!(quote.expected_target_amount, "995000");
    }

    #[test]
    fn quote_rejects_amounts_consumed_by_fees() {
        let source = token(TokenType::Crypto, "sapphire", 18);
        let target = token(TokenType::Crypto, "ethereum", 18);
        // 25 + 15 bps on 1000 is 4; the flat 1000 network fee dominates.
        let err = compute_quote(&source, &target, &bd("1000")).unwrap_err();
        assert!(matches!(err, SwapError::Validation(_)));
    }

    #[test]
    fn stable_leg_gets_999_rate_cross_chain() {
        let source = token(TokenType::Stable, "sapphire", 6);
        let target = token(TokenType::Crypto, "ethereum", 6);
        let quote = compute_quote(&source, &target, &bd("1000000")).unwrap();
        // net = 1000000 - 2500 - 1500 - 1000 = 995000; x0.999 = 994005
        assert_eq!(quote.expected_target_amount, "994005");
        assert_eq!(quote.rate, "0.999");
    }

    #[test]
    fn non_stable_cross_chain_uses_102_rate() {
        let source = token(TokenType::Crypto, "sapphire", 6);
        let target = token(TokenType::Rwa, "ethereum", 6);
        let quote = compute_quote(&source, &target, &bd("1000000")).unwrap();
        // net 995000 x 1.02 = 1014900
        assert_eq!(quote.expected_target_amount, "1014900");
    }

    #[test]
    fn decimals_differential_scales_the_net() {
        let source = token(TokenType::Crypto, "sapphire", 6);
        let target = token(TokenType::Crypto, "sapphire", 18);
        let quote = compute_quote(&source, &target, &bd("1000000")).unwrap();
        // net 995000 shifted up 12 decimals.
        assert_eq!(quote.expected_target_amount, "995000000000000000");

        let source18 = token(TokenType::Crypto, "sapphire", 18);
        let target6 = token(TokenType::Crypto, "sapphire", 6);
        let quote = compute_quote(&source18, &target6, &bd("1000000000000000000")).unwrap();
        // net = 1e18 - 2.5e15 - 1.5e15 - 1000 = 995999999999999000;
        // the 12-digit down-shift truncates toward zero.
        assert_eq!(quote.expected_target_amount, "995999");
    }

    #[test]
    fn quote_expiry_is_five_minutes_out() {
        let source = token(TokenType::Crypto, "sapphire", 18);
        let target = token(TokenType::Crypto, "sapphire", 18);
        let quote = compute_quote(&source, &target, &bd("1000000")).unwrap();
        let delta = quote.expires_at - Utc::now();
        assert!(delta.num_seconds() > 290 && delta.num_seconds() <= 300);
    }
}
