//! Job-handler adapters binding the fabric to the domain services.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::jobs::{JobContext, JobError, JobHandler};
use crate::services::chain::ChainError;
use crate::services::lifecycle::{LifecycleError, MarketLifecycleEngine};
use crate::services::matching::{MatchingEngine, MatchingError};
use crate::services::stats::MarketStatsService;
use crate::services::swap::{SwapError, SwapService};

fn payload_uuid(payload: &Value, field: &str) -> Result<Uuid, JobError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| JobError::terminal(anyhow::anyhow!("payload missing {field}")))
}

// ============================================================================
// Matching
// ============================================================================

pub struct MatchJobHandler {
    engine: Arc<MatchingEngine>,
}

impl MatchJobHandler {
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for MatchJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), JobError> {
        let order_id = payload_uuid(&job.payload, "order_id")?;
        self.engine.run_match_job(order_id).await.map_err(|err| match err {
            // Storage hiccups are worth another delivery; everything else
            // will not improve on retry.
            MatchingError::Database(_) | MatchingError::Cache(_) => JobError::transient(err),
            other => JobError::terminal(other),
        })
    }
}

// ============================================================================
// Swaps
// ============================================================================

pub struct SwapJobHandler {
    swaps: Arc<SwapService>,
}

impl SwapJobHandler {
    pub fn new(swaps: Arc<SwapService>) -> Self {
        Self { swaps }
    }
}

#[async_trait]
impl JobHandler for SwapJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), JobError> {
        let swap_id = payload_uuid(&job.payload, "swap_id")?;
        self.swaps
            .run_swap_job(swap_id, job.attempts_made, job.attempts)
            .await
            .map_err(|err| match err {
                SwapError::Chain(ChainError::Rpc(_)) | SwapError::Database(_) | SwapError::Queue(_) => {
                    JobError::transient(err)
                }
                other => JobError::terminal(other),
            })
    }
}

// ============================================================================
// Market deployment
// ============================================================================

pub struct DeployJobHandler {
    lifecycle: Arc<MarketLifecycleEngine>,
}

impl DeployJobHandler {
    pub fn new(lifecycle: Arc<MarketLifecycleEngine>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl JobHandler for DeployJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), JobError> {
        let market_id = payload_uuid(&job.payload, "market_id")?;

        // A prior failed attempt rolled the market back to `approved`;
        // re-enter `activating` before redeploying.
        if job.attempts_made > 0 {
            self.lifecycle
                .reenter_activation(market_id)
                .await
                .map_err(JobError::transient)?;
        }

        self.lifecycle
            .run_deploy_job(market_id)
            .await
            .map_err(|err| match err {
                LifecycleError::Chain(ChainError::Rpc(_)) | LifecycleError::Database(_) => {
                    JobError::transient(err)
                }
                other => JobError::terminal(other),
            })
    }
}

// ============================================================================
// Stats
// ============================================================================

pub struct StatsJobHandler {
    stats: Arc<MarketStatsService>,
}

impl StatsJobHandler {
    pub fn new(stats: Arc<MarketStatsService>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl JobHandler for StatsJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), JobError> {
        let pair_id = payload_uuid(&job.payload, "trading_pair_id")?;
        self.stats
            .refresh(pair_id)
            .await
            .map(|_| ())
            .map_err(JobError::transient)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Delivery to external notification channels is out of scope; the handler
/// records the notification and keeps the queue contract.
pub struct NotificationJobHandler;

#[async_trait]
impl JobHandler for NotificationJobHandler {
    async fn handle(&self, job: &JobContext) -> Result<(), JobError> {
        let kind = job
            .payload
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(kind, payload = %job.payload, "notification dispatched");
        metrics::counter!("notifications_dispatched_total", "kind" => kind.to_string()).increment(1);
        Ok(())
    }
}
