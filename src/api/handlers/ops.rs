//! Operational read surface (admin): failed external events and per-queue
//! dead letters.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::jobs::JobRecord;
use crate::models::ProcessedEvent;
use crate::utils::response::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// GET /ops/events/failed (admin)
pub async fn list_failed_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ProcessedEvent>>, ApiError> {
    let events = state
        .events
        .failed_events(query.limit.unwrap_or(50).clamp(1, 200))
        .await?;
    Ok(Json(events))
}

/// GET /ops/queues/:queue/dead-letters (admin)
pub async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<JobRecord>>, ApiError> {
    let records = state
        .fabric
        .dead_letters(&queue, query.limit.unwrap_or(50).clamp(1, 200) as isize)
        .await?;
    Ok(Json(records))
}
