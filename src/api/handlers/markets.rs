//! Market lifecycle HTTP handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::admin::AdminIdentity;
use crate::models::{Market, MarketApprovalEvent, MarketAsset, TradingPair};
use crate::services::lifecycle::{
    ActorContext, ApprovalDecision, MarketQuery, RegisterMarketRequest,
};
use crate::utils::response::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RegisterMarketResponse {
    pub market: Market,
    pub asset: MarketAsset,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    pub reason: Option<String>,
}

/// POST /markets/register
///
/// Issuer authorization happens inside the engine via the
/// entity-permissions service, keyed by the owner principal.
pub async fn register_market(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterMarketRequest>,
) -> Result<(StatusCode, Json<RegisterMarketResponse>), ApiError> {
    let actor = ActorContext {
        actor_id: req.owner_id.clone(),
        roles: vec!["issuer".to_string()],
    };
    let (market, asset) = state.lifecycle.register_market(req, &actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterMarketResponse { market, asset }),
    ))
}

/// POST /markets/:id/approve (admin)
pub async fn approve_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Extension(admin): Extension<AdminIdentity>,
    body: Option<Json<DecisionBody>>,
) -> Result<Json<Market>, ApiError> {
    let reason = body.as_ref().and_then(|b| b.reason.clone());
    let actor = ActorContext::admin(&admin.actor_id);
    let market = state
        .lifecycle
        .process_approval_decision(market_id, ApprovalDecision::Approved, &actor, reason.as_deref())
        .await?;
    Ok(Json(market))
}

/// POST /markets/:id/activate (admin)
pub async fn activate_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Extension(admin): Extension<AdminIdentity>,
) -> Result<Json<Market>, ApiError> {
    let actor = ActorContext::admin(&admin.actor_id);
    let market = state.lifecycle.activate(market_id, &actor).await?;
    Ok(Json(market))
}

/// POST /markets/:id/pause (admin)
pub async fn pause_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Extension(admin): Extension<AdminIdentity>,
) -> Result<Json<Market>, ApiError> {
    let actor = ActorContext::admin(&admin.actor_id);
    let market = state.lifecycle.pause(market_id, &actor).await?;
    Ok(Json(market))
}

/// POST /markets/:id/archive (admin)
pub async fn archive_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Extension(admin): Extension<AdminIdentity>,
) -> Result<Json<Market>, ApiError> {
    let actor = ActorContext::admin(&admin.actor_id);
    let market = state.lifecycle.archive(market_id, &actor).await?;
    Ok(Json(market))
}

#[derive(Debug, Serialize)]
pub struct MarketListResponse {
    pub markets: Vec<Market>,
    pub page: u32,
    pub page_size: u32,
}

/// GET /markets
pub async fn list_markets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<MarketListResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20).clamp(1, 100);
    let markets = state.lifecycle.list_markets(&query).await?;
    Ok(Json(MarketListResponse {
        markets,
        page,
        page_size,
    }))
}

#[derive(Debug, Serialize)]
pub struct MarketDetailResponse {
    pub market: Market,
    pub asset: Option<MarketAsset>,
    pub trading_pair: Option<TradingPair>,
    pub approval_history: Vec<MarketApprovalEvent>,
}

/// GET /markets/:id
pub async fn get_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
) -> Result<Json<MarketDetailResponse>, ApiError> {
    let market = state.lifecycle.load_market(market_id).await?;
    let asset = state.lifecycle.load_asset(market_id).await?;
    let trading_pair = state.lifecycle.pair_for_market(market_id).await?;
    let approval_history = state.lifecycle.approval_history(market_id).await?;
    Ok(Json(MarketDetailResponse {
        market,
        asset,
        trading_pair,
        approval_history,
    }))
}
