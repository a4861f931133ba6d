//! External event ingress pipeline.
//!
//! One idempotent path for both delivery channels (webhook push and the
//! pull poller): check the processed-event ledger, dispatch on event type,
//! record the outcome. A repeated event_id is acknowledged without effect.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{ExternalEvent, ProcessingStatus};
use crate::services::events::ProcessedEventLedger;
use crate::services::lifecycle::{ActorContext, ApprovalDecision, LifecycleError, MarketLifecycleEngine};

pub const DEFAULT_EVENT_SOURCE: &str = "entity_permissions_core";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    AlreadyProcessed,
    Processed,
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("{0}")]
    Validation(String),

    #[error("event handler failed: {0}")]
    Handler(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct EventIngress {
    ledger: Arc<ProcessedEventLedger>,
    lifecycle: Arc<MarketLifecycleEngine>,
}

impl EventIngress {
    pub fn new(ledger: Arc<ProcessedEventLedger>, lifecycle: Arc<MarketLifecycleEngine>) -> Self {
        Self { ledger, lifecycle }
    }

    /// Run one external event through the pipeline.
    pub async fn process(&self, event: ExternalEvent) -> Result<IngressOutcome, IngressError> {
        if event.event_id.trim().is_empty() || event.event_type.trim().is_empty() {
            return Err(IngressError::Validation(
                "event_id and event_type are required".into(),
            ));
        }

        if self.ledger.is_processed(&event.event_id).await? {
            tracing::debug!(event_id = %event.event_id, "event already processed");
            return Ok(IngressOutcome::AlreadyProcessed);
        }

        let source = event
            .source
            .clone()
            .unwrap_or_else(|| DEFAULT_EVENT_SOURCE.to_string());

        let dispatched = match event.event_type.as_str() {
            "market.approved" => Some(self.apply_decision(&event, ApprovalDecision::Approved).await),
            "market.rejected" => Some(self.apply_decision(&event, ApprovalDecision::Rejected).await),
            _ => None,
        };

        match dispatched {
            None => {
                self.ledger
                    .record(
                        &event.event_id,
                        &event.event_type,
                        &source,
                        &event.payload,
                        &event.context,
                        ProcessingStatus::Skipped,
                        None,
                    )
                    .await?;
                tracing::info!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "unhandled event type, recorded as skipped"
                );
                Ok(IngressOutcome::Skipped)
            }
            Some(Ok(())) => {
                self.ledger
                    .record(
                        &event.event_id,
                        &event.event_type,
                        &source,
                        &event.payload,
                        &event.context,
                        ProcessingStatus::Success,
                        None,
                    )
                    .await?;
                Ok(IngressOutcome::Processed)
            }
            Some(Err(err)) => {
                self.ledger
                    .record(
                        &event.event_id,
                        &event.event_type,
                        &source,
                        &event.payload,
                        &event.context,
                        ProcessingStatus::Failed,
                        Some(&err.to_string()),
                    )
                    .await?;
                Err(IngressError::Handler(err.to_string()))
            }
        }
    }

    async fn apply_decision(
        &self,
        event: &ExternalEvent,
        decision: ApprovalDecision,
    ) -> Result<(), LifecycleError> {
        let market_id = event
            .payload
            .get("market_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| {
                LifecycleError::Validation("event payload carries no valid market_id".into())
            })?;

        let actor = synthesized_actor(&event.context);
        let reason = event.payload.get("reason").and_then(Value::as_str);

        self.lifecycle
            .process_approval_decision(market_id, decision, &actor, reason)
            .await?;
        Ok(())
    }
}

/// Admin context synthesized from the event: actor from the sender's
/// context when present, "system" otherwise.
fn synthesized_actor(context: &Value) -> ActorContext {
    let actor_id = context
        .get("actor_id")
        .and_then(Value::as_str)
        .unwrap_or("system");
    ActorContext::admin(actor_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actor_defaults_to_system() {
        let actor = synthesized_actor(&json!({}));
        assert_eq!(actor.actor_id, "system");
        assert_eq!(actor.roles, vec!["admin".to_string()]);

        let actor = synthesized_actor(&json!({"actor_id": "ops-7"}));
        assert_eq!(actor.actor_id, "ops-7");
    }
}
