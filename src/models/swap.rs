use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SwapStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Cancelled
        )
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::Queued => "QUEUED",
            SwapStatus::Processing => "PROCESSING",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Failed => "FAILED",
            SwapStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SwapRecord {
    pub id: Uuid,
    pub user_id: String,
    pub source_token_id: Uuid,
    pub target_token_id: Uuid,
    pub source_chain: String,
    pub target_chain: String,
    pub source_amount: BigDecimal,
    pub expected_target_amount: BigDecimal,
    pub destination_address: String,
    pub bridge_contract: Option<String>,
    pub status: SwapStatus,
    pub bridge_swap_id: Option<String>,
    pub source_tx_hash: Option<String>,
    pub target_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuoteRequest {
    pub source_token_id: Uuid,
    pub target_token_id: Uuid,
    pub source_amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub source_token_id: Uuid,
    pub target_token_id: Uuid,
    pub source_amount: String,
    pub platform_fee: String,
    pub bridge_fee: String,
    pub network_fee: String,
    pub total_fee: String,
    pub expected_target_amount: String,
    pub rate: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSwapRequest {
    pub user_id: String,
    pub source_token_id: Uuid,
    pub target_token_id: Uuid,
    pub source_amount: String,
    pub destination_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub swap_id: Uuid,
    pub status: SwapStatus,
    pub source_token_id: Uuid,
    pub target_token_id: Uuid,
    pub source_amount: String,
    pub expected_target_amount: String,
    pub bridge_swap_id: Option<String>,
    pub source_tx_hash: Option<String>,
    pub target_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<SwapRecord> for SwapResponse {
    fn from(swap: SwapRecord) -> Self {
        Self {
            swap_id: swap.id,
            status: swap.status,
            source_token_id: swap.source_token_id,
            target_token_id: swap.target_token_id,
            source_amount: swap.source_amount.to_string(),
            expected_target_amount: swap.expected_target_amount.to_string(),
            bridge_swap_id: swap.bridge_swap_id,
            source_tx_hash: swap.source_tx_hash,
            target_tx_hash: swap.target_tx_hash,
            failure_reason: swap.failure_reason,
            created_at: swap.created_at,
            completed_at: swap.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SwapStatus::Completed.is_terminal());
        assert!(SwapStatus::Failed.is_terminal());
        assert!(SwapStatus::Cancelled.is_terminal());
        assert!(!SwapStatus::Queued.is_terminal());
        assert!(!SwapStatus::Processing.is_terminal());
    }
}
