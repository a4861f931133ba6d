//! Approval-event pull poller.
//!
//! Safety net behind the webhook: on a fixed interval, pull pending
//! approval decisions from the entity-permissions service and run each
//! through the same idempotent ingress pipeline. Events already seen via
//! the webhook are no-ops at the ledger.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::services::ingress::{EventIngress, IngressOutcome, DEFAULT_EVENT_SOURCE};
use crate::services::permissions::EntityPermissionsClient;

const POLLED_EVENT_TYPES: &str = "market.approved,market.rejected";
const POLL_BATCH: u32 = 10;

pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

pub fn spawn(
    permissions: Arc<EntityPermissionsClient>,
    ingress: Arc<EventIngress>,
    interval: Duration,
) -> PollerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "approval event poller started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() { break }
                    continue;
                }
            }

            let events = match permissions
                .fetch_events(POLLED_EVENT_TYPES, DEFAULT_EVENT_SOURCE, POLL_BATCH)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("event poll failed: {e}");
                    continue;
                }
            };

            for event in events {
                let event_id = event.event_id.clone();
                match ingress.process(event).await {
                    Ok(IngressOutcome::Processed) => {
                        tracing::info!(%event_id, "polled event processed");
                    }
                    Ok(IngressOutcome::AlreadyProcessed) | Ok(IngressOutcome::Skipped) => {}
                    Err(e) => {
                        tracing::error!(%event_id, "polled event failed: {e}");
                    }
                }
            }
        }
        tracing::info!("approval event poller stopped");
    });

    PollerHandle { stop_tx, handle }
}
