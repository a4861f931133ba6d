use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

/// Application error type. Every handler and service failure converges here
/// before leaving the process as `{error: {code, message, details}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn signature_expired() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "signature_expired", "signature expiry has passed")
    }

    pub fn invalid_signature() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_signature", "signature verification failed")
    }

    pub fn nonce_reused() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "nonce_reused", "nonce has already been used")
    }

    pub fn insufficient_balance(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "insufficient_balance", message)
    }

    pub fn market_not_found(id: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, "market_not_found", format!("market not found: {id}"))
    }

    pub fn pair_not_found(id: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, "pair_not_found", format!("trading pair not found: {id}"))
    }

    pub fn order_not_found(id: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, "order_not_found", format!("order not found: {id}"))
    }

    pub fn not_found(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn invalid_status(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_status", message)
    }

    pub fn market_not_active(id: impl std::fmt::Display) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "market_not_active",
            format!("market is not active: {id}"),
        )
    }

    pub fn compliance_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "compliance_failed", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn rate_limited() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "too many requests")
    }

    pub fn chain_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "chain_unavailable", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.code, message = %self.message, "request failed");
        }
        let body = ApiErrorEnvelope {
            error: ApiErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("database error: {}", err);
        Self::internal("database error")
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("redis error: {}", err);
        Self::internal("cache error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_expected_status() {
        assert_eq!(ApiError::validation("x").status, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::invalid_signature().status, StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::nonce_reused().status, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::compliance_failed("x").status, StatusCode::FORBIDDEN);
        assert_eq!(ApiError::rate_limited().status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::chain_unavailable("x").status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn envelope_omits_empty_details() {
        let err = ApiError::pair_not_found("P1");
        let body = ApiErrorEnvelope {
            error: ApiErrorBody {
                code: err.code,
                message: err.message,
                details: None,
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("pair_not_found"));
        assert!(!json.contains("details"));
    }
}
