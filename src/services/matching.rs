//! Matching engine.
//!
//! Order ingress validates, verifies the signature, reserves the nonce,
//! locks the funding balance and enqueues a matching job keyed by the order
//! id. The job handler crosses the order against the opposing side of the
//! book in price-time priority, executing each fill as one database
//! transaction, and fans out a bounded set of re-match jobs for resting
//! orders.

use bigdecimal::{BigDecimal, Zero};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::eip712::{OrderMessage, SignatureError, SignatureVerifier, TypedMessage};
use crate::cache::{ttl, BookEntry, CacheKey, CacheManager};
use crate::jobs::{queues, BackoffPolicy, JobFabric, JobOptions};
use crate::models::{
    CreateOrderRequest, Market, MarketStatus, Order, OrderKind, OrderSide, OrderStatus,
    TimeInForce, Token, TokenType, Trade, TradingPair,
};
use crate::services::balance::{BalanceBook, BalanceDelta, BalanceError};
use crate::services::bus::{DomainEvent, EventBus};
use crate::services::compliance::{ComplianceError, ComplianceService};
use crate::services::nonce::{NonceError, NonceLedger};
use crate::utils::amounts;

/// Opposing orders examined per matching pass.
const BOOK_BATCH: usize = 50;
/// Bounded re-match fan-out for resting orders.
const REMATCH_FANOUT: usize = 10;
/// Small delay on re-match jobs so bursts batch in the queue.
const REMATCH_DELAY_MS: u64 = 100;
/// Trade fee, basis points per side.
const TRADE_FEE_BPS: u32 = 25;

#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("{0}")]
    Validation(String),

    #[error("signature expiry has passed")]
    SignatureExpired,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("nonce has already been used")]
    NonceReused,

    #[error("trading pair not found: {0}")]
    PairNotFound(Uuid),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("market is not active: {0}")]
    MarketNotActive(Uuid),

    #[error("user is not cleared for this asset")]
    ComplianceFailed,

    #[error("order does not belong to the caller")]
    Forbidden,

    #[error("order cannot be cancelled in status {0:?}")]
    InvalidStatus(OrderStatus),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

impl From<SignatureError> for MatchingError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Expired => MatchingError::SignatureExpired,
            SignatureError::Malformed(_) | SignatureError::Mismatch => {
                MatchingError::InvalidSignature
            }
        }
    }
}

impl From<NonceError> for MatchingError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::NonceReused => MatchingError::NonceReused,
            NonceError::Store(e) => MatchingError::Cache(e),
        }
    }
}

impl From<BalanceError> for MatchingError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InsufficientBalance { .. } => MatchingError::InsufficientBalance,
            BalanceError::InsufficientLocked { .. } | BalanceError::NegativeResult { .. } => {
                MatchingError::InsufficientBalance
            }
            BalanceError::Database(e) => MatchingError::Database(e),
        }
    }
}

impl From<ComplianceError> for MatchingError {
    fn from(err: ComplianceError) -> Self {
        match err {
            ComplianceError::NotCleared { .. } => MatchingError::ComplianceFailed,
            ComplianceError::Database(e) => MatchingError::Database(e),
        }
    }
}

/// Pair plus its resolved legs, loaded once per operation.
struct PairContext {
    pair: TradingPair,
    base: Token,
    quote: Token,
    market: Option<Market>,
}

pub struct MatchingEngine {
    pool: PgPool,
    balances: Arc<BalanceBook>,
    nonces: Arc<NonceLedger>,
    verifier: Arc<SignatureVerifier>,
    compliance: Arc<ComplianceService>,
    cache: Arc<CacheManager>,
    fabric: Arc<JobFabric>,
    bus: EventBus,
}

impl MatchingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        balances: Arc<BalanceBook>,
        nonces: Arc<NonceLedger>,
        verifier: Arc<SignatureVerifier>,
        compliance: Arc<ComplianceService>,
        cache: Arc<CacheManager>,
        fabric: Arc<JobFabric>,
        bus: EventBus,
    ) -> Self {
        Self {
            pool,
            balances,
            nonces,
            verifier,
            compliance,
            cache,
            fabric,
            bus,
        }
    }

    // ========================================================================
    // Order ingress
    // ========================================================================

    /// Validate, authorize and persist a new order, then hand it to the
    /// matching queue. Replay protection: the nonce is reserved before any
    /// state change.
    pub async fn submit_order(&self, req: CreateOrderRequest) -> Result<Order, MatchingError> {
        let quantity = amounts::parse_amount(&req.quantity)
            .map_err(|e| MatchingError::Validation(e.to_string()))?;
        if !amounts::is_positive_amount(&quantity) {
            return Err(MatchingError::Validation("quantity must be positive".into()));
        }

        let price = match &req.price {
            Some(raw) => {
                let price = amounts::parse_amount(raw)
                    .map_err(|e| MatchingError::Validation(e.to_string()))?;
                if !amounts::is_positive_amount(&price) {
                    return Err(MatchingError::Validation("price must be positive".into()));
                }
                Some(price)
            }
            None => None,
        };

        if req.order_kind.requires_price() && price.is_none() {
            return Err(MatchingError::Validation(format!(
                "{} orders require a price",
                req.order_kind
            )));
        }
        if req.order_kind == OrderKind::Market && price.is_some() {
            return Err(MatchingError::Validation(
                "market orders must not carry a price".into(),
            ));
        }

        // 1. Signature and expiry.
        let message = TypedMessage::Order(OrderMessage {
            market_id: req.trading_pair_id.to_string(),
            side: req.side.to_string(),
            order_kind: req.order_kind.to_string(),
            quantity: req.quantity.clone(),
            price: req.price.clone().unwrap_or_else(|| "0".to_string()),
            nonce: req.nonce.clone(),
            expiry: req.expiry,
        });
        self.verifier
            .verify(&message, &req.signature, &req.user_address)?;

        // 2. Nonce: single-use per address; the only replay barrier.
        self.nonces.reserve(&req.user_address, &req.nonce).await?;

        // 3. Pair, market and compliance gates.
        let ctx = self.load_pair_context(req.trading_pair_id).await?;
        if !ctx.pair.is_active {
            return Err(MatchingError::Validation("trading pair is inactive".into()));
        }
        if let Some(market) = &ctx.market {
            if market.status != MarketStatus::Active {
                return Err(MatchingError::MarketNotActive(market.id));
            }
        }
        if ctx.base.token_type == TokenType::Rwa {
            self.compliance
                .require_cleared(&req.user_id, ctx.base.id)
                .await?;
        }

        // 4. Size bounds.
        if quantity < ctx.pair.min_order_size || quantity > ctx.pair.max_order_size {
            return Err(MatchingError::Validation(format!(
                "quantity outside [{}, {}]",
                ctx.pair.min_order_size, ctx.pair.max_order_size
            )));
        }

        // 5. Funding lock.
        let base_decimals = ctx.base.decimals as u32;
        let (lock_token, lock_amount) = match req.side {
            OrderSide::Sell => (ctx.base.id, quantity.clone()),
            OrderSide::Buy => {
                let pricing = match &price {
                    Some(price) => price.clone(),
                    // Market buys are funded at the best resting ask.
                    None => self
                        .best_opposing_price(&ctx, OrderSide::Sell)
                        .await?
                        .ok_or_else(|| {
                            MatchingError::Validation(
                                "no liquidity to price a market buy".into(),
                            )
                        })?,
                };
                (ctx.quote.id, amounts::quote_amount(&quantity, &pricing, base_decimals))
            }
        };
        self.balances
            .lock(&req.user_id, lock_token, &lock_amount)
            .await?;

        // 6. Persist and enqueue.
        let order = match self.insert_order(&req, &quantity, price.as_ref(), &lock_amount).await {
            Ok(order) => order,
            Err(e) => {
                // Lock must not outlive a failed insert.
                if let Err(unlock_err) = self
                    .balances
                    .unlock(&req.user_id, lock_token, &lock_amount)
                    .await
                {
                    tracing::error!(
                        user_id = %req.user_id,
                        "failed to roll back balance lock: {unlock_err}"
                    );
                }
                return Err(e.into());
            }
        };

        let priority = match order.order_kind {
            OrderKind::Market => queues::PRIORITY_MARKET_ORDER,
            _ => queues::PRIORITY_LIMIT_ORDER,
        };
        self.fabric
            .submit(
                queues::MATCHING,
                json!({ "order_id": order.id }),
                JobOptions::default()
                    .with_job_id(queues::match_job_id(order.id))
                    .with_priority(priority)
                    .with_attempts(3)
                    .with_backoff(BackoffPolicy::exponential(1_000)),
            )
            .await?;

        self.bus.publish(DomainEvent::OrderAccepted {
            order_id: order.id,
            user_id: order.user_id.clone(),
        });

        Ok(order)
    }

    /// Cancel a resting order and release its unconsumed lock.
    pub async fn cancel_order(&self, order_id: Uuid, user_id: &str) -> Result<Order, MatchingError> {
        let mut tx = self.pool.begin().await?;

        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MatchingError::OrderNotFound(order_id))?;

        if order.user_id != user_id {
            return Err(MatchingError::Forbidden);
        }
        if !order.status.is_cancellable() {
            return Err(MatchingError::InvalidStatus(order.status));
        }

        let ctx = self.load_pair_context(order.trading_pair_id).await?;
        let release_token = match order.side {
            OrderSide::Buy => ctx.quote.id,
            OrderSide::Sell => ctx.base.id,
        };
        let release_amount = order.locked_remaining.clone();

        if !release_amount.is_zero() {
            let delta = BalanceDelta {
                user_id: order.user_id.clone(),
                token_id: release_token,
                available: release_amount.clone(),
                locked: -release_amount.clone(),
            };
            BalanceBook::apply_deltas(&mut tx, vec![delta]).await?;
        }

        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'CANCELLED', locked_remaining = 0, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        Self::append_audit(
            &mut tx,
            order_id,
            None,
            "cancel",
            json!({ "released": release_amount.to_string() }),
        )
        .await?;

        tx.commit().await?;

        if let Some(price) = &order.price {
            let _ = self
                .cache
                .orderbook()
                .remove(order.trading_pair_id, order.side, price, order.sequence, order.id)
                .await;
        }

        self.bus.publish(DomainEvent::OrderCancelled {
            order_id,
            user_id: user_id.to_string(),
        });

        self.load_order(order_id).await
    }

    // ========================================================================
    // Matching job
    // ========================================================================

    /// Matching job body. Idempotent on re-delivery: a terminal order is a
    /// no-op.
    pub async fn run_match_job(&self, order_id: Uuid) -> Result<(), MatchingError> {
        let order = match self.try_load_order(order_id).await? {
            Some(order) => order,
            None => {
                tracing::warn!(%order_id, "matching job for unknown order");
                return Ok(());
            }
        };
        if !order.status.is_matchable() {
            return Ok(());
        }

        let ctx = self.load_pair_context(order.trading_pair_id).await?;
        if !ctx.pair.is_active {
            tracing::warn!(%order_id, pair = %ctx.pair.symbol, "pair inactive, cancelling order");
            self.cancel_internal(order.id).await?;
            return Ok(());
        }

        if order.status == OrderStatus::PendingMatch {
            sqlx::query("UPDATE orders SET status = 'OPEN', updated_at = NOW() WHERE id = $1 AND status = 'PENDING_MATCH'")
                .bind(order.id)
                .execute(&self.pool)
                .await?;
        }

        let mut executed_any = false;
        let mut order = self.load_order(order.id).await?;

        'matching: while order.remaining_quantity() > BigDecimal::zero() {
            let candidates = self.opposing_candidates(&ctx, order.side.opposite()).await?;
            if candidates.is_empty() {
                break;
            }

            let mut progressed = false;
            for candidate in &candidates {
                if order.remaining_quantity() <= BigDecimal::zero() {
                    break 'matching;
                }
                if !Self::crosses(&order, &candidate.price) {
                    // Book is sorted; nothing further can cross.
                    break 'matching;
                }
                match self.execute_trade(&ctx, &order, candidate).await {
                    Ok(Some(trade)) => {
                        executed_any = true;
                        progressed = true;
                        self.after_trade(&ctx, &trade).await;
                        order = self.load_order(order.id).await?;
                    }
                    Ok(None) => {
                        // Maker vanished between book read and lock; drop it
                        // from the mirror and move on.
                        progressed = true;
                        let _ = self
                            .cache
                            .orderbook()
                            .remove(
                                ctx.pair.id,
                                order.side.opposite(),
                                &candidate.price,
                                candidate.sequence,
                                candidate.order_id,
                            )
                            .await;
                    }
                    Err(e) => {
                        // Per-trade failure skips this maker, not the batch.
                        tracing::error!(
                            taker = %order.id,
                            maker = %candidate.order_id,
                            "trade execution failed: {e}"
                        );
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        order = self.load_order(order.id).await?;
        self.finalize_after_matching(&ctx, &order, executed_any).await?;
        Ok(())
    }

    /// Post-loop disposition: filled orders leave the book, unfilled
    /// market-priced remainders are returned, priced remainders rest.
    async fn finalize_after_matching(
        &self,
        ctx: &PairContext,
        order: &Order,
        executed_any: bool,
    ) -> Result<(), MatchingError> {
        if order.status == OrderStatus::Filled || !order.status.is_matchable() {
            return Ok(());
        }

        let must_return = order.order_kind == OrderKind::Market
            || matches!(order.time_in_force, TimeInForce::Ioc | TimeInForce::Fok);
        if must_return {
            self.cancel_internal(order.id).await?;
            return Ok(());
        }

        let status = if executed_any || order.status == OrderStatus::Partial {
            OrderStatus::Partial
        } else {
            OrderStatus::Open
        };
        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(order.id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        if let Some(price) = &order.price {
            self.cache
                .orderbook()
                .add(ctx.pair.id, order.side, price, order.sequence, order.id)
                .await?;
        }

        self.schedule_rematches(ctx, order).await?;
        Ok(())
    }

    /// Bounded fan-out: enqueue match jobs for opposing resting orders that
    /// can cross this newly rested order. Deterministic job ids collapse
    /// duplicate triggers.
    async fn schedule_rematches(&self, ctx: &PairContext, order: &Order) -> Result<(), MatchingError> {
        let price = match &order.price {
            Some(price) => price,
            None => return Ok(()),
        };

        let (comparison, ordering) = match order.side {
            // A resting BUY at p can be crossed by SELLs priced <= p.
            OrderSide::Buy => ("price <= $3", "price ASC, created_at ASC"),
            OrderSide::Sell => ("price >= $3", "price DESC, created_at ASC"),
        };
        let sql = format!(
            r#"
            SELECT id FROM orders
            WHERE trading_pair_id = $1 AND side = $2
              AND status IN ('OPEN', 'PARTIAL')
              AND {comparison}
            ORDER BY {ordering}
            LIMIT {REMATCH_FANOUT}
            "#
        );
        let opposing: Vec<(Uuid,)> = sqlx::query_as(&sql)
            .bind(ctx.pair.id)
            .bind(order.side.opposite())
            .bind(price)
            .fetch_all(&self.pool)
            .await?;

        for (opp_id,) in opposing {
            self.fabric
                .submit(
                    queues::MATCHING,
                    json!({ "order_id": opp_id }),
                    JobOptions::default()
                        .with_job_id(queues::rematch_job_id(opp_id, order.id))
                        .with_priority(queues::PRIORITY_LIMIT_ORDER)
                        .with_delay_ms(REMATCH_DELAY_MS)
                        .with_attempts(3),
                )
                .await?;
        }
        Ok(())
    }

    fn crosses(taker: &Order, maker_price: &BigDecimal) -> bool {
        match (taker.order_kind, &taker.price) {
            (OrderKind::Market, _) => true,
            (_, Some(price)) => match taker.side {
                OrderSide::Buy => price >= maker_price,
                OrderSide::Sell => price <= maker_price,
            },
            (_, None) => false,
        }
    }

    // ========================================================================
    // Trade execution
    // ========================================================================

    /// Execute one fill between the taker and a resting maker as a single
    /// transaction. Returns Ok(None) when the maker is no longer matchable.
    async fn execute_trade(
        &self,
        ctx: &PairContext,
        taker: &Order,
        candidate: &BookEntry,
    ) -> Result<Option<Trade>, MatchingError> {
        let mut tx = self.pool.begin().await?;

        // Deterministic order-row lock order prevents ABBA between
        // concurrent matchers.
        let (first, second) = if taker.id <= candidate.order_id {
            (taker.id, candidate.order_id)
        } else {
            (candidate.order_id, taker.id)
        };
        let lock_order = |id: Uuid| {
            sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE").bind(id)
        };
        let first_row = lock_order(first).fetch_optional(&mut *tx).await?;
        let second_row = lock_order(second).fetch_optional(&mut *tx).await?;

        let (taker_row, maker_row) = if first == taker.id {
            (first_row, second_row)
        } else {
            (second_row, first_row)
        };
        let taker_row = taker_row.ok_or(MatchingError::OrderNotFound(taker.id))?;
        let maker_row = match maker_row {
            Some(row) => row,
            None => return Ok(None),
        };

        if !taker_row.status.is_matchable() || !maker_row.status.is_matchable() {
            return Ok(None);
        }
        let maker_price = match &maker_row.price {
            Some(price) => price.clone(),
            None => return Ok(None),
        };
        if !Self::crosses(&taker_row, &maker_price) {
            return Ok(None);
        }

        let quantity = taker_row
            .remaining_quantity()
            .min(maker_row.remaining_quantity());
        if quantity <= BigDecimal::zero() {
            return Ok(None);
        }

        let base_decimals = ctx.base.decimals as u32;
        // Maker is the resting side; trades print at the maker's price.
        let quote = amounts::quote_amount(&quantity, &maker_price, base_decimals);
        let fee = amounts::fee_bps(&quote, TRADE_FEE_BPS);
        let buyer_fee = fee.clone();
        let seller_fee = fee;

        let (buyer, seller) = match taker_row.side {
            OrderSide::Buy => (&taker_row, &maker_row),
            OrderSide::Sell => (&maker_row, &taker_row),
        };

        let trade_id = Uuid::new_v4();
        let trade = sqlx::query_as::<_, Trade>(
            r#"
            INSERT INTO trades
                (id, trading_pair_id, buyer_order_id, seller_order_id,
                 buyer_user_id, seller_user_id, price, quantity,
                 buyer_fee, seller_fee, settlement_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'PENDING')
            RETURNING *
            "#,
        )
        .bind(trade_id)
        .bind(ctx.pair.id)
        .bind(buyer.id)
        .bind(seller.id)
        .bind(&buyer.user_id)
        .bind(&seller.user_id)
        .bind(&maker_price)
        .bind(&quantity)
        .bind(&buyer_fee)
        .bind(&seller_fee)
        .fetch_one(&mut *tx)
        .await?;

        // Seller's base leaves its lock and the quote proceeds (net of fee)
        // land in seller available; buyer's quote leaves its lock and the
        // base (net of fee) lands in buyer available.
        let mut deltas = vec![
            BalanceDelta {
                user_id: seller.user_id.clone(),
                token_id: ctx.base.id,
                available: BigDecimal::zero(),
                locked: -quantity.clone(),
            },
            BalanceDelta {
                user_id: seller.user_id.clone(),
                token_id: ctx.quote.id,
                available: &quote - &seller_fee,
                locked: BigDecimal::zero(),
            },
            BalanceDelta {
                user_id: buyer.user_id.clone(),
                token_id: ctx.quote.id,
                available: BigDecimal::zero(),
                locked: -quote.clone(),
            },
            BalanceDelta {
                user_id: buyer.user_id.clone(),
                token_id: ctx.base.id,
                available: &quantity - &buyer_fee,
                locked: BigDecimal::zero(),
            },
        ];

        // Fill bookkeeping; a fully-filled BUY releases any surplus lock
        // left by executing below its limit price.
        for row in [&taker_row, &maker_row] {
            let consumed = match row.side {
                OrderSide::Sell => quantity.clone(),
                OrderSide::Buy => quote.clone(),
            };
            let surplus =
                Self::update_filled_order(&mut tx, row, &quantity, &maker_price, &consumed).await?;
            if !surplus.is_zero() {
                let token_id = match row.side {
                    OrderSide::Buy => ctx.quote.id,
                    OrderSide::Sell => ctx.base.id,
                };
                deltas.push(BalanceDelta {
                    user_id: row.user_id.clone(),
                    token_id,
                    available: surplus.clone(),
                    locked: -surplus,
                });
            }
        }

        BalanceBook::apply_deltas(&mut tx, deltas).await?;

        Self::append_audit(
            &mut tx,
            taker_row.id,
            Some(trade_id),
            "trade",
            json!({ "role": "taker", "quantity": quantity.to_string(), "price": maker_price.to_string() }),
        )
        .await?;
        Self::append_audit(
            &mut tx,
            maker_row.id,
            Some(trade_id),
            "trade",
            json!({ "role": "maker", "quantity": quantity.to_string(), "price": maker_price.to_string() }),
        )
        .await?;

        tx.commit().await?;
        Ok(Some(trade))
    }

    /// Advance one order's fill state inside the trade transaction. Returns
    /// the surplus lock to release (non-zero only on full fill).
    async fn update_filled_order(
        tx: &mut PgConnection,
        row: &Order,
        quantity: &BigDecimal,
        price: &BigDecimal,
        consumed: &BigDecimal,
    ) -> Result<BigDecimal, MatchingError> {
        let new_filled = &row.filled_quantity + quantity;
        let filled_now = new_filled >= row.quantity;

        // Quantity-weighted average fill price, truncated to an integer.
        let prior_avg = row.average_fill_price.clone().unwrap_or_else(BigDecimal::zero);
        let weighted = &prior_avg * &row.filled_quantity + price * quantity;
        let new_avg = amounts::truncate(&(weighted / &new_filled));

        let mut locked_remaining = &row.locked_remaining - consumed;
        if locked_remaining < BigDecimal::zero() {
            locked_remaining = BigDecimal::zero();
        }
        let surplus = if filled_now {
            std::mem::take(&mut locked_remaining)
        } else {
            BigDecimal::zero()
        };

        let status = if filled_now {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };

        sqlx::query(
            r#"
            UPDATE orders
            SET filled_quantity = $2,
                average_fill_price = $3,
                locked_remaining = $4,
                status = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(row.id)
        .bind(&new_filled)
        .bind(&new_avg)
        .bind(&locked_remaining)
        .bind(status)
        .execute(tx)
        .await?;

        Ok(surplus)
    }

    /// Post-commit side effects of a trade: cache invalidation, events, and
    /// the settlement / stats / notification jobs.
    async fn after_trade(&self, ctx: &PairContext, trade: &Trade) {
        if let Err(e) = self.cache.orderbook().invalidate(ctx.pair.id).await {
            tracing::warn!(pair = %ctx.pair.symbol, "failed to invalidate book cache: {e}");
        }

        self.bus.publish(DomainEvent::TradeExecuted {
            trade_id: trade.id,
            trading_pair_id: ctx.pair.id,
        });
        self.bus
            .publish(DomainEvent::TradeSettlementPending { trade_id: trade.id });

        let settlement = self
            .fabric
            .submit(
                queues::SETTLEMENT,
                json!({ "trade_id": trade.id, "trading_pair_id": ctx.pair.id }),
                JobOptions::default()
                    .with_job_id(queues::settle_job_id(trade.id))
                    .with_attempts(5)
                    .with_backoff(BackoffPolicy::exponential(2_000)),
            )
            .await;
        if let Err(e) = settlement {
            tracing::error!(trade_id = %trade.id, "failed to enqueue settlement: {e}");
        }

        let stats = self
            .fabric
            .submit(
                queues::STATS,
                json!({ "trading_pair_id": ctx.pair.id }),
                JobOptions::default()
                    .with_job_id(queues::stats_job_id(ctx.pair.id))
                    .with_delay_ms(500)
                    .with_attempts(2),
            )
            .await;
        if let Err(e) = stats {
            tracing::warn!(pair = %ctx.pair.symbol, "failed to enqueue stats refresh: {e}");
        }

        let notification = self
            .fabric
            .submit(
                queues::NOTIFICATIONS,
                json!({
                    "kind": "trade.executed",
                    "trade_id": trade.id,
                    "buyer_user_id": trade.buyer_user_id,
                    "seller_user_id": trade.seller_user_id,
                }),
                self.fabric.default_options(),
            )
            .await;
        if let Err(e) = notification {
            tracing::warn!(trade_id = %trade.id, "failed to enqueue notification: {e}");
        }
    }

    // ========================================================================
    // Book access
    // ========================================================================

    /// Opposing side of the book in price-time order; cache first, then the
    /// authoritative store with a cache refill.
    async fn opposing_candidates(
        &self,
        ctx: &PairContext,
        side: OrderSide,
    ) -> Result<Vec<BookEntry>, MatchingError> {
        let cached = self.cache.orderbook().top(ctx.pair.id, side, BOOK_BATCH).await;
        match cached {
            Ok(entries) if !entries.is_empty() => return Ok(entries),
            Ok(_) => {}
            Err(e) => tracing::warn!(pair = %ctx.pair.symbol, "book cache read failed: {e}"),
        }

        let entries = self.book_from_store(ctx.pair.id, side, BOOK_BATCH).await?;
        if !entries.is_empty() {
            if let Err(e) = self.cache.orderbook().refill(ctx.pair.id, side, &entries).await {
                tracing::warn!(pair = %ctx.pair.symbol, "book cache refill failed: {e}");
            }
        }
        Ok(entries)
    }

    async fn book_from_store(
        &self,
        pair_id: Uuid,
        side: OrderSide,
        limit: usize,
    ) -> Result<Vec<BookEntry>, MatchingError> {
        let ordering = match side {
            OrderSide::Buy => "price DESC, created_at ASC",
            OrderSide::Sell => "price ASC, created_at ASC",
        };
        let sql = format!(
            r#"
            SELECT id, sequence, price FROM orders
            WHERE trading_pair_id = $1 AND side = $2
              AND status IN ('OPEN', 'PARTIAL') AND price IS NOT NULL
            ORDER BY {ordering}
            LIMIT {limit}
            "#
        );
        let rows: Vec<(Uuid, i64, BigDecimal)> = sqlx::query_as(&sql)
            .bind(pair_id)
            .bind(side)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(order_id, sequence, price)| BookEntry {
                order_id,
                sequence,
                price,
            })
            .collect())
    }

    async fn best_opposing_price(
        &self,
        ctx: &PairContext,
        side: OrderSide,
    ) -> Result<Option<BigDecimal>, MatchingError> {
        let entries = self.opposing_candidates(ctx, side).await?;
        Ok(entries.into_iter().next().map(|e| e.price))
    }

    // ========================================================================
    // Persistence helpers
    // ========================================================================

    async fn insert_order(
        &self,
        req: &CreateOrderRequest,
        quantity: &BigDecimal,
        price: Option<&BigDecimal>,
        locked: &BigDecimal,
    ) -> Result<Order, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders
                (id, user_id, user_address, trading_pair_id, side, order_kind,
                 status, price, quantity, locked_remaining, time_in_force, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING_MATCH', $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.user_id)
        .bind(req.user_address.to_lowercase())
        .bind(req.trading_pair_id)
        .bind(req.side)
        .bind(req.order_kind)
        .bind(price)
        .bind(quantity)
        .bind(locked)
        .bind(req.time_in_force.unwrap_or(TimeInForce::Gtc))
        .bind(req.metadata.clone().unwrap_or_else(|| json!({})))
        .fetch_one(&self.pool)
        .await
    }

    pub async fn load_order(&self, order_id: Uuid) -> Result<Order, MatchingError> {
        self.try_load_order(order_id)
            .await?
            .ok_or(MatchingError::OrderNotFound(order_id))
    }

    async fn try_load_order(&self, order_id: Uuid) -> Result<Option<Order>, MatchingError> {
        Ok(sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Pair and token rows are read-through cached (they change rarely);
    /// market status is always read fresh because the active gate depends
    /// on it.
    async fn load_pair_context(&self, pair_id: Uuid) -> Result<PairContext, MatchingError> {
        let pair = match self.cached_pair(pair_id).await {
            Some(pair) => pair,
            None => {
                let pair =
                    sqlx::query_as::<_, TradingPair>("SELECT * FROM trading_pairs WHERE id = $1")
                        .bind(pair_id)
                        .fetch_optional(&self.pool)
                        .await?
                        .ok_or(MatchingError::PairNotFound(pair_id))?;
                self.store_cached(&CacheKey::trading_pair(pair_id), &pair, ttl::TRADING_PAIR_SECS)
                    .await;
                pair
            }
        };

        let base = self.load_token(pair.base_token_id).await?;
        let quote = self.load_token(pair.quote_token_id).await?;

        let market = match pair.market_id {
            Some(market_id) => {
                sqlx::query_as::<_, Market>("SELECT * FROM markets WHERE id = $1")
                    .bind(market_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };

        Ok(PairContext {
            pair,
            base,
            quote,
            market,
        })
    }

    async fn load_token(&self, token_id: Uuid) -> Result<Token, MatchingError> {
        let key = CacheKey::token_metadata(token_id);
        if let Ok(Some(raw)) = self.cache.redis().get::<String>(&key).await {
            if let Ok(token) = serde_json::from_str::<Token>(&raw) {
                return Ok(token);
            }
        }
        let token = sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE id = $1")
            .bind(token_id)
            .fetch_one(&self.pool)
            .await?;
        self.store_cached(&key, &token, ttl::TOKEN_METADATA_SECS).await;
        Ok(token)
    }

    async fn cached_pair(&self, pair_id: Uuid) -> Option<TradingPair> {
        let raw: String = self
            .cache
            .redis()
            .get(&CacheKey::trading_pair(pair_id))
            .await
            .ok()??;
        serde_json::from_str(&raw).ok()
    }

    async fn store_cached<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Ok(raw) = serde_json::to_string(value) {
            if let Err(e) = self.cache.redis().set_ex(key, raw, ttl_secs).await {
                tracing::debug!(key, "cache store failed: {e}");
            }
        }
    }

    /// Engine-initiated cancel (inactive pair, market-order remainder).
    async fn cancel_internal(&self, order_id: Uuid) -> Result<(), MatchingError> {
        let order = self.load_order(order_id).await?;
        if !order.status.is_matchable() {
            return Ok(());
        }
        match self.cancel_order(order_id, &order.user_id.clone()).await {
            Ok(_) => Ok(()),
            // A PENDING_MATCH order is not user-cancellable but the engine
            // may still return it.
            Err(MatchingError::InvalidStatus(_)) => {
                let ctx = self.load_pair_context(order.trading_pair_id).await?;
                let release_token = match order.side {
                    OrderSide::Buy => ctx.quote.id,
                    OrderSide::Sell => ctx.base.id,
                };
                if !order.locked_remaining.is_zero() {
                    self.balances
                        .unlock(&order.user_id, release_token, &order.locked_remaining)
                        .await?;
                }
                sqlx::query(
                    "UPDATE orders SET status = 'CANCELLED', locked_remaining = 0, updated_at = NOW() WHERE id = $1",
                )
                .bind(order_id)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn append_audit(
        tx: &mut PgConnection,
        order_id: Uuid,
        trade_id: Option<Uuid>,
        action: &str,
        detail: serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO order_audits (id, order_id, trade_id, action, detail)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(trade_id)
        .bind(action)
        .bind(detail)
        .execute(tx)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Read surface
    // ========================================================================

    pub async fn orders_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Order>, MatchingError> {
        Ok(sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Trades that filled a given order; used to serve order detail and in
    /// fill-consistency checks.
    pub async fn trades_for_order(&self, order_id: Uuid) -> Result<Vec<Trade>, MatchingError> {
        Ok(sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE buyer_order_id = $1 OR seller_order_id = $1 ORDER BY sequence",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn bd(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn order(side: OrderSide, kind: OrderKind, price: Option<&str>) -> Order {
        let now = chrono::Utc::now();
        Order {
            id: Uuid::new_v4(),
            sequence: 1,
            user_id: "u1".to_string(),
            user_address: "0xabc".to_string(),
            trading_pair_id: Uuid::new_v4(),
            side,
            order_kind: kind,
            status: OrderStatus::Open,
            price: price.map(bd),
            quantity: bd("10"),
            filled_quantity: bd("0"),
            average_fill_price: None,
            locked_remaining: bd("10"),
            time_in_force: TimeInForce::Gtc,
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn market_orders_always_cross() {
        let taker = order(OrderSide::Buy, OrderKind::Market, None);
        assert!(MatchingEngine::crosses(&taker, &bd("999999")));
    }

    #[test]
    fn limit_buy_crosses_at_or_below_its_price() {
        let taker = order(OrderSide::Buy, OrderKind::Limit, Some("100"));
        assert!(MatchingEngine::crosses(&taker, &bd("99")));
        assert!(MatchingEngine::crosses(&taker, &bd("100")));
        assert!(!MatchingEngine::crosses(&taker, &bd("101")));
    }

    #[test]
    fn limit_sell_crosses_at_or_above_its_price() {
        let taker = order(OrderSide::Sell, OrderKind::Limit, Some("100"));
        assert!(MatchingEngine::crosses(&taker, &bd("101")));
        assert!(MatchingEngine::crosses(&taker, &bd("100")));
        assert!(!MatchingEngine::crosses(&taker, &bd("99")));
    }

    #[test]
    fn stop_limit_crosses_like_limit() {
        let taker = order(OrderSide::Buy, OrderKind::StopLimit, Some("100"));
        assert!(MatchingEngine::crosses(&taker, &bd("100")));
        assert!(!MatchingEngine::crosses(&taker, &bd("101")));
    }

    #[test]
    fn scenario_fee_math_matches_quarter_percent() {
        // qty = 4e18 at price 2e18 with 18 base decimals: value 8e18,
        // per-side fee 0.02e18.
        let qty = bd("4000000000000000000");
        let price = bd("2000000000000000000");
        let quote = amounts::quote_amount(&qty, &price, 18);
        assert_eq!(quote, bd("8000000000000000000"));
        let fee = amounts::fee_bps(&quote, TRADE_FEE_BPS);
        assert_eq!(fee, bd("20000000000000000"));
    }
}
