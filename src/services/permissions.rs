//! Entity-permissions service client.
//!
//! Every lifecycle transition is authorized by the external permissions
//! service. Decisions are cached for five minutes keyed by
//! (principal, entity, action, context-hash); the poller also pulls missed
//! approval events from the same service.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{ttl, CacheKey, RedisClient};
use crate::config::EntityPermissionsConfig;
use crate::models::ExternalEvent;

#[derive(Debug, thiserror::Error)]
pub enum PermissionsError {
    #[error("permissions service request failed: {0}")]
    Request(String),

    #[error("permissions service returned {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeRequest<'a> {
    principal_id: &'a str,
    entity_id: &'a str,
    action: &'a str,
    context: &'a Value,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<ExternalEvent>,
}

pub struct EntityPermissionsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    redis: Arc<RedisClient>,
}

impl EntityPermissionsClient {
    pub fn new(
        config: &EntityPermissionsConfig,
        redis: Arc<RedisClient>,
    ) -> Result<Self, PermissionsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PermissionsError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            redis,
        })
    }

    /// Authorize an action on an entity. Cached decisions are returned
    /// without a network round trip.
    pub async fn authorize(
        &self,
        principal_id: &str,
        entity_id: &str,
        action: &str,
        context: &Value,
    ) -> Result<AuthorizationDecision, PermissionsError> {
        let cache_key = CacheKey::auth(principal_id, entity_id, action, &context_hash(context));

        if let Ok(Some(cached)) = self.redis.get::<String>(&cache_key).await {
            if let Ok(decision) = serde_json::from_str::<AuthorizationDecision>(&cached) {
                return Ok(decision);
            }
        }

        let body = AuthorizeRequest {
            principal_id,
            entity_id,
            action,
            context,
        };
        let response = self
            .http
            .post(format!("{}/authorize", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PermissionsError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PermissionsError::Status(response.status().as_u16()));
        }

        let decision: AuthorizationDecision = response
            .json()
            .await
            .map_err(|e| PermissionsError::Request(e.to_string()))?;

        if let Ok(raw) = serde_json::to_string(&decision) {
            let _ = self.redis.set_ex(&cache_key, raw, ttl::AUTH_SECS).await;
        }

        Ok(decision)
    }

    /// Pull pending approval events; the safety net behind the webhook.
    pub async fn fetch_events(
        &self,
        event_types: &str,
        source: &str,
        limit: u32,
    ) -> Result<Vec<ExternalEvent>, PermissionsError> {
        let response = self
            .http
            .get(format!("{}/events", self.base_url))
            .header("x-api-key", &self.api_key)
            .query(&[
                ("event_type", event_types),
                ("source", source),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| PermissionsError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PermissionsError::Status(response.status().as_u16()));
        }

        let page: EventsPage = response
            .json()
            .await
            .map_err(|e| PermissionsError::Request(e.to_string()))?;
        Ok(page.events)
    }
}

/// Stable hash of the authorization context for the cache key.
fn context_hash(context: &Value) -> String {
    let canonical = serde_json::to_string(context).unwrap_or_default();
    let digest = Keccak256::digest(canonical.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_hash_is_stable_and_sensitive() {
        let a = context_hash(&json!({"roles": ["admin"]}));
        let b = context_hash(&json!({"roles": ["admin"]}));
        let c = context_hash(&json!({"roles": ["issuer"]}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn decision_deserializes_with_missing_reasons() {
        let decision: AuthorizationDecision = serde_json::from_str(r#"{"allowed": true}"#).unwrap();
        assert!(decision.allowed);
        assert!(decision.reasons.is_empty());
    }
}
