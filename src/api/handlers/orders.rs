//! Trading HTTP handlers: orders, the aggregated book and pair stats.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{ttl, CacheKey};
use crate::models::{
    BalanceResponse, CancelOrderRequest, CreateOrderRequest, OrderResponse, OrderSide,
    TradeResponse, TradingPair,
};
use crate::services::stats::MarketStats;
use crate::utils::response::ApiError;
use crate::AppState;

const DEPTH_LEVELS: usize = 50;

/// POST /trading/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state.matching.submit_order(req).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// DELETE /trading/orders/:id
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.matching.cancel_order(order_id, &req.user_id).await?;
    Ok(Json(order.into()))
}

/// GET /trading/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.matching.load_order(order_id).await?;
    Ok(Json(order.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    pub user_id: String,
    pub limit: Option<i64>,
}

/// GET /trading/orders?userId=
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let orders = state.matching.orders_for_user(&query.user_id, limit).await?;
    Ok(Json(orders.into_iter().map(Into::into).collect()))
}

/// GET /trading/orders/:id/trades
pub async fn get_order_trades(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<TradeResponse>>, ApiError> {
    // 404 before listing so an unknown id is distinguishable from an
    // unfilled order.
    state.matching.load_order(order_id).await?;
    let trades = state.matching.trades_for_order(order_id).await?;
    Ok(Json(trades.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub user_id: String,
    pub token_id: Option<Uuid>,
}

/// GET /trading/balances?userId=[&tokenId=]
pub async fn get_balances(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<Vec<BalanceResponse>>, ApiError> {
    match query.token_id {
        Some(token_id) => {
            // Single-token reads go through the short-lived balance cache.
            let cache_key = CacheKey::token_balance(&query.user_id, token_id);
            if let Ok(Some(raw)) = state.cache.redis().get::<String>(&cache_key).await {
                if let Ok(cached) = serde_json::from_str::<BalanceResponse>(&raw) {
                    return Ok(Json(vec![cached]));
                }
            }

            let (available, locked) = state
                .balances
                .get(&query.user_id, token_id)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            let total = &available + &locked;
            let response = BalanceResponse {
                token_id,
                available: available.to_string(),
                locked: locked.to_string(),
                total: total.to_string(),
            };
            if let Ok(raw) = serde_json::to_string(&response) {
                let _ = state
                    .cache
                    .redis()
                    .set_ex(&cache_key, raw, ttl::TOKEN_BALANCE_SECS)
                    .await;
            }
            Ok(Json(vec![response]))
        }
        None => {
            let balances = state
                .balances
                .list_for_user(&query.user_id)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            Ok(Json(balances.into_iter().map(Into::into).collect()))
        }
    }
}

/// GET /trading/pairs
pub async fn list_pairs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TradingPair>>, ApiError> {
    let pairs = sqlx::query_as::<_, TradingPair>(
        "SELECT * FROM trading_pairs WHERE is_active ORDER BY symbol",
    )
    .fetch_all(&state.db.pool)
    .await?;
    Ok(Json(pairs))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthLevel {
    pub price: String,
    pub quantity: String,
    pub order_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderbookDepth {
    pub trading_pair_id: Uuid,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub last_update: DateTime<Utc>,
}

/// GET /trading/pairs/:id/orderbook
///
/// Aggregated per-price depth, cached briefly since every trade invalidates
/// the underlying book.
pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Path(pair_id): Path<Uuid>,
) -> Result<Json<OrderbookDepth>, ApiError> {
    let cache_key = CacheKey::market_depth(pair_id);
    if let Ok(Some(raw)) = state.cache.redis().get::<String>(&cache_key).await {
        if let Ok(depth) = serde_json::from_str::<OrderbookDepth>(&raw) {
            return Ok(Json(depth));
        }
    }

    // 404 for unknown pairs rather than an empty book.
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM trading_pairs WHERE id = $1")
        .bind(pair_id)
        .fetch_optional(&state.db.pool)
        .await?;
    if exists.is_none() {
        return Err(ApiError::pair_not_found(pair_id));
    }

    let bids = depth_levels(&state, pair_id, OrderSide::Buy).await?;
    let asks = depth_levels(&state, pair_id, OrderSide::Sell).await?;

    let depth = OrderbookDepth {
        trading_pair_id: pair_id,
        bids,
        asks,
        last_update: Utc::now(),
    };

    if let Ok(raw) = serde_json::to_string(&depth) {
        let _ = state
            .cache
            .redis()
            .set_ex(&cache_key, raw, ttl::MARKET_DEPTH_SECS)
            .await;
    }

    Ok(Json(depth))
}

async fn depth_levels(
    state: &AppState,
    pair_id: Uuid,
    side: OrderSide,
) -> Result<Vec<DepthLevel>, ApiError> {
    let ordering = match side {
        OrderSide::Buy => "price DESC",
        OrderSide::Sell => "price ASC",
    };
    let sql = format!(
        r#"
        SELECT price, SUM(quantity - filled_quantity) AS quantity, COUNT(*) AS order_count
        FROM orders
        WHERE trading_pair_id = $1 AND side = $2
          AND status IN ('OPEN', 'PARTIAL') AND price IS NOT NULL
        GROUP BY price
        ORDER BY {ordering}
        LIMIT {DEPTH_LEVELS}
        "#
    );
    let rows: Vec<(BigDecimal, BigDecimal, i64)> = sqlx::query_as(&sql)
        .bind(pair_id)
        .bind(side)
        .fetch_all(&state.db.pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(price, quantity, order_count)| DepthLevel {
            price: price.to_string(),
            quantity: quantity.to_string(),
            order_count,
        })
        .collect())
}

/// GET /trading/pairs/:id/stats
pub async fn get_pair_stats(
    State(state): State<Arc<AppState>>,
    Path(pair_id): Path<Uuid>,
) -> Result<Json<MarketStats>, ApiError> {
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM trading_pairs WHERE id = $1")
        .bind(pair_id)
        .fetch_optional(&state.db.pool)
        .await?;
    if exists.is_none() {
        return Err(ApiError::pair_not_found(pair_id));
    }
    let stats = state.stats.get(pair_id).await?;
    Ok(Json(stats))
}
