use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementStatus {
    Pending,
    Settled,
    Failed,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStatus::Pending => write!(f, "PENDING"),
            SettlementStatus::Settled => write!(f, "SETTLED"),
            SettlementStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Immutable execution record; only the settlement fields mutate after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub sequence: i64,
    pub trading_pair_id: Uuid,
    pub buyer_order_id: Uuid,
    pub seller_order_id: Uuid,
    pub buyer_user_id: String,
    pub seller_user_id: String,
    pub price: BigDecimal,
    pub quantity: BigDecimal,
    pub buyer_fee: BigDecimal,
    pub seller_fee: BigDecimal,
    pub settlement_status: SettlementStatus,
    pub settlement_tx_hash: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub trade_id: Uuid,
    pub trading_pair_id: Uuid,
    pub price: String,
    pub quantity: String,
    pub buyer_fee: String,
    pub seller_fee: String,
    pub settlement_status: SettlementStatus,
    pub settlement_tx_hash: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl From<Trade> for TradeResponse {
    fn from(trade: Trade) -> Self {
        Self {
            trade_id: trade.id,
            trading_pair_id: trade.trading_pair_id,
            price: trade.price.to_string(),
            quantity: trade.quantity.to_string(),
            buyer_fee: trade.buyer_fee.to_string(),
            seller_fee: trade.seller_fee.to_string(),
            settlement_status: trade.settlement_status,
            settlement_tx_hash: trade.settlement_tx_hash,
            executed_at: trade.executed_at,
        }
    }
}
