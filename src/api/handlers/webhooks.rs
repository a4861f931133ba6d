//! Entity-permissions webhook.
//!
//! Accepts either the event object directly or an envelope wrapping it as a
//! JSON string. Responds 200 for processed, already-processed and skipped
//! events (retry storms die here); 400 only for malformed envelopes; 5xx
//! when the handler failed and the sender should retry.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::models::{EventEnvelope, ExternalEvent};
use crate::services::ingress::{IngressError, IngressOutcome};
use crate::utils::response::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub event_id: String,
}

/// POST /webhooks/entity-permissions
pub async fn entity_permissions_webhook(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    let event = parse_event(&body).ok_or_else(|| {
        ApiError::validation("body is neither an event nor an event envelope")
    })?;
    let event_id = event.event_id.clone();

    match state.ingress.process(event).await {
        Ok(IngressOutcome::AlreadyProcessed) => Ok((
            StatusCode::OK,
            Json(WebhookAck {
                status: "already_processed",
                event_id,
            }),
        )),
        Ok(IngressOutcome::Processed) => Ok((
            StatusCode::OK,
            Json(WebhookAck {
                status: "processed",
                event_id,
            }),
        )),
        Ok(IngressOutcome::Skipped) => Ok((
            StatusCode::OK,
            Json(WebhookAck {
                status: "skipped",
                event_id,
            }),
        )),
        Err(IngressError::Validation(msg)) => Err(ApiError::validation(msg)),
        Err(IngressError::Handler(msg)) => {
            // Recorded as failed in the ledger; the sender retries.
            Err(ApiError::internal(msg))
        }
        Err(IngressError::Database(e)) => Err(e.into()),
    }
}

/// Direct event, or an envelope whose `event` field is a JSON string.
fn parse_event(body: &Value) -> Option<ExternalEvent> {
    if let Ok(event) = serde_json::from_value::<ExternalEvent>(body.clone()) {
        if !event.event_id.is_empty() {
            return Some(event);
        }
    }
    let envelope: EventEnvelope = serde_json::from_value(body.clone()).ok()?;
    serde_json::from_str::<ExternalEvent>(&envelope.event).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_direct_event() {
        let body = json!({
            "event_id": "e1",
            "event_type": "market.approved",
            "payload": { "market_id": "00000000-0000-0000-0000-000000000000" }
        });
        let event = parse_event(&body).unwrap();
        assert_eq!(event.event_id, "e1");
    }

    #[test]
    fn parses_enveloped_event() {
        let inner = json!({ "event_id": "e2", "event_type": "market.rejected" }).to_string();
        let body = json!({ "event": inner });
        let event = parse_event(&body).unwrap();
        assert_eq!(event.event_id, "e2");
        assert_eq!(event.event_type, "market.rejected");
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(parse_event(&json!({ "event": 42 })).is_none());
        assert!(parse_event(&json!("just a string")).is_none());
        assert!(parse_event(&json!({ "event": "not json" })).is_none());
    }
}
