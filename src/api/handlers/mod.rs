pub mod markets;
pub mod ops;
pub mod orders;
pub mod swaps;
pub mod webhooks;

use crate::services::lifecycle::LifecycleError;
use crate::services::matching::MatchingError;
use crate::services::swap::SwapError;
use crate::utils::response::ApiError;

impl From<MatchingError> for ApiError {
    fn from(err: MatchingError) -> Self {
        match err {
            MatchingError::Validation(msg) => ApiError::validation(msg),
            MatchingError::SignatureExpired => ApiError::signature_expired(),
            MatchingError::InvalidSignature => ApiError::invalid_signature(),
            MatchingError::NonceReused => ApiError::nonce_reused(),
            MatchingError::PairNotFound(id) => ApiError::pair_not_found(id),
            MatchingError::OrderNotFound(id) => ApiError::order_not_found(id),
            MatchingError::MarketNotActive(id) => ApiError::market_not_active(id),
            MatchingError::ComplianceFailed => {
                ApiError::compliance_failed("user is not cleared for this asset")
            }
            MatchingError::Forbidden => ApiError::forbidden("order does not belong to the caller"),
            MatchingError::InvalidStatus(status) => {
                ApiError::invalid_status(format!("order is {status:?}"))
            }
            MatchingError::InsufficientBalance => {
                ApiError::insufficient_balance("insufficient available balance")
            }
            MatchingError::Database(e) => e.into(),
            MatchingError::Cache(e) => e.into(),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::MarketNotFound(id) => ApiError::market_not_found(id),
            LifecycleError::IllegalTransition { from, to } => {
                ApiError::invalid_status(format!("cannot transition from {from} to {to}"))
            }
            LifecycleError::Forbidden { reasons } => ApiError::forbidden("permission denied")
                .with_details(serde_json::json!({ "reasons": reasons })),
            LifecycleError::Validation(msg) => ApiError::validation(msg),
            LifecycleError::NoStableToken => {
                ApiError::internal("no active stable quote token configured")
            }
            LifecycleError::Permissions(e) => {
                tracing::error!("permissions service error: {e}");
                ApiError::internal("authorization backend unavailable")
            }
            LifecycleError::Chain(e) => ApiError::chain_unavailable(e.to_string()),
            LifecycleError::Database(e) => e.into(),
            LifecycleError::Queue(e) => e.into(),
        }
    }
}

impl From<SwapError> for ApiError {
    fn from(err: SwapError) -> Self {
        match err {
            SwapError::Validation(msg) => ApiError::validation(msg),
            SwapError::TokenNotFound(id) => {
                ApiError::not_found("token_not_found", format!("token not found: {id}"))
            }
            SwapError::SwapNotFound(id) => {
                ApiError::not_found("swap_not_found", format!("swap not found: {id}"))
            }
            SwapError::InsufficientBalance => {
                ApiError::insufficient_balance("insufficient available balance")
            }
            SwapError::Chain(e) => ApiError::chain_unavailable(e.to_string()),
            SwapError::Database(e) => e.into(),
            SwapError::Queue(e) => e.into(),
        }
    }
}
