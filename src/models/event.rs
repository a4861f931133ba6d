use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Failed,
    Skipped,
}

/// One row per externally-originated event, keyed by the sender's event id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessedEvent {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub payload: Value,
    pub context: Value,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Wire shape of an inbound external event, either posted directly to the
/// webhook or returned by the pull poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub context: Value,
}

/// Some senders wrap the event as a JSON string inside an envelope.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_event_deserializes() {
        let raw = r#"{"event_id":"e1","event_type":"market.approved","payload":{"market_id":"m1"}}"#;
        let event: ExternalEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_id, "e1");
        assert_eq!(event.event_type, "market.approved");
        assert_eq!(event.payload["market_id"], "m1");
        assert!(event.source.is_none());
    }

    #[test]
    fn envelope_carries_event_as_json_string() {
        let raw = r#"{"event":"{\"event_id\":\"e2\",\"event_type\":\"market.rejected\"}"}"#;
        let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
        let event: ExternalEvent = serde_json::from_str(&envelope.event).unwrap();
        assert_eq!(event.event_id, "e2");
    }
}
