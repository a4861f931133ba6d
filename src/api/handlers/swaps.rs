//! Swap HTTP handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{CreateSwapRequest, SwapQuote, SwapQuoteRequest, SwapResponse};
use crate::utils::response::ApiError;
use crate::AppState;

/// POST /swaps/quote
pub async fn quote_swap(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SwapQuoteRequest>,
) -> Result<Json<SwapQuote>, ApiError> {
    let quote = state
        .swaps
        .quote(req.source_token_id, req.target_token_id, &req.source_amount)
        .await?;
    Ok(Json(quote))
}

/// POST /swaps — accepted for asynchronous processing.
pub async fn create_swap(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSwapRequest>,
) -> Result<(StatusCode, Json<SwapResponse>), ApiError> {
    let swap = state.swaps.request_swap(req).await?;
    Ok((StatusCode::ACCEPTED, Json(swap.into())))
}

/// GET /swaps/:id
pub async fn get_swap(
    State(state): State<Arc<AppState>>,
    Path(swap_id): Path<Uuid>,
) -> Result<Json<SwapResponse>, ApiError> {
    let swap = state.swaps.load_swap(swap_id).await?;
    Ok(Json(swap.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapListQuery {
    pub user_id: String,
    pub limit: Option<i64>,
}

/// GET /swaps?userId=&limit=
pub async fn list_swaps(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SwapListQuery>,
) -> Result<Json<Vec<SwapResponse>>, ApiError> {
    let swaps = state
        .swaps
        .list_for_user(&query.user_id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(swaps.into_iter().map(Into::into).collect()))
}
