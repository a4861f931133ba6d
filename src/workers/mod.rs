//! Worker wiring: one pool per queue, the reconciliation schedule and the
//! approval poller, with a single stop path for graceful shutdown.

pub mod handlers;
pub mod poller;
pub mod reconciliation;
pub mod settlement;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::jobs::{queues, JobFabric, ScheduleHandle, WorkerHandle};
use crate::services::ingress::EventIngress;
use crate::services::lifecycle::MarketLifecycleEngine;
use crate::services::matching::MatchingEngine;
use crate::services::permissions::EntityPermissionsClient;
use crate::services::stats::MarketStatsService;
use crate::services::swap::SwapService;

use handlers::{
    DeployJobHandler, MatchJobHandler, NotificationJobHandler, StatsJobHandler, SwapJobHandler,
};
use poller::PollerHandle;
use reconciliation::ReconciliationWorker;
use settlement::SettlementJobHandler;

const RECONCILIATION_INTERVAL: Duration = Duration::from_secs(15 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct WorkerSet {
    workers: Vec<WorkerHandle>,
    schedules: Vec<ScheduleHandle>,
    poller: Option<PollerHandle>,
}

pub struct WorkerDeps {
    pub fabric: Arc<JobFabric>,
    pub matching: Arc<MatchingEngine>,
    pub swaps: Arc<SwapService>,
    pub lifecycle: Arc<MarketLifecycleEngine>,
    pub stats: Arc<MarketStatsService>,
    pub settlement: SettlementJobHandler,
    pub reconciliation: ReconciliationWorker,
    pub permissions: Arc<EntityPermissionsClient>,
    pub ingress: Arc<EventIngress>,
    pub swap_concurrency: usize,
}

impl WorkerSet {
    /// Start every worker pool, the reconciliation schedule and the event
    /// poller.
    pub fn spawn(deps: WorkerDeps) -> Self {
        let fabric = deps.fabric;
        fabric.set_rate_limit(queues::MATCHING, queues::MATCHING_RATE_PER_SEC);

        let workers = vec![
            fabric.run_worker(
                queues::MATCHING,
                Arc::new(MatchJobHandler::new(deps.matching)),
                queues::MATCHING_CONCURRENCY,
            ),
            fabric.run_worker(
                queues::SETTLEMENT,
                Arc::new(deps.settlement),
                queues::SETTLEMENT_CONCURRENCY,
            ),
            fabric.run_worker(
                queues::RECONCILIATION,
                Arc::new(deps.reconciliation),
                queues::RECONCILIATION_CONCURRENCY,
            ),
            fabric.run_worker(
                queues::SWAPS,
                Arc::new(SwapJobHandler::new(deps.swaps)),
                deps.swap_concurrency.max(1),
            ),
            fabric.run_worker(
                queues::DEPLOYMENT,
                Arc::new(DeployJobHandler::new(deps.lifecycle)),
                queues::DEPLOYMENT_CONCURRENCY,
            ),
            fabric.run_worker(
                queues::STATS,
                Arc::new(StatsJobHandler::new(deps.stats)),
                queues::STATS_CONCURRENCY,
            ),
            fabric.run_worker(
                queues::NOTIFICATIONS,
                Arc::new(NotificationJobHandler),
                queues::NOTIFICATIONS_CONCURRENCY,
            ),
        ];

        let schedules = vec![fabric.schedule(
            queues::RECONCILIATION,
            json!({}),
            RECONCILIATION_INTERVAL,
            "reconciliation-sweep",
        )];

        let poller = Some(poller::spawn(deps.permissions, deps.ingress, POLL_INTERVAL));

        tracing::info!("worker set started");
        Self {
            workers,
            schedules,
            poller,
        }
    }

    /// Stop schedules first (no new jobs), then drain the pools.
    pub async fn shutdown(self) {
        for schedule in self.schedules {
            schedule.stop().await;
        }
        if let Some(poller) = self.poller {
            poller.stop().await;
        }
        for worker in self.workers {
            worker.stop(SHUTDOWN_GRACE).await;
        }
        tracing::info!("worker set stopped");
    }
}
