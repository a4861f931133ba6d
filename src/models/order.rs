use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Limit,
    Market,
    StopLimit,
}

impl OrderKind {
    /// Limit and stop-limit orders carry a price; market orders never do.
    pub fn requires_price(self) -> bool {
        matches!(self, OrderKind::Limit | OrderKind::StopLimit)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Limit => write!(f, "LIMIT"),
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingMatch,
    Open,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// An order participates in matching while in one of these states.
    pub fn is_matchable(self) -> bool {
        matches!(
            self,
            OrderStatus::PendingMatch | OrderStatus::Open | OrderStatus::Partial
        )
    }

    /// Resting orders are the only cancellable ones.
    pub fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::Partial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub sequence: i64,
    pub user_id: String,
    pub user_address: String,
    pub trading_pair_id: Uuid,
    pub side: OrderSide,
    pub order_kind: OrderKind,
    pub status: OrderStatus,
    pub price: Option<BigDecimal>,
    pub quantity: BigDecimal,
    pub filled_quantity: BigDecimal,
    pub average_fill_price: Option<BigDecimal>,
    /// Portion of the original balance lock not yet consumed by fills.
    /// Quote units for BUY orders, base units for SELL orders.
    pub locked_remaining: BigDecimal,
    pub time_in_force: TimeInForce,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining_quantity(&self) -> BigDecimal {
        &self.quantity - &self.filled_quantity
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub user_address: String,
    pub trading_pair_id: Uuid,
    pub side: OrderSide,
    pub order_kind: OrderKind,
    pub quantity: String,
    pub price: Option<String>,
    pub signature: String,
    pub nonce: String,
    pub expiry: u64,
    pub time_in_force: Option<TimeInForce>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub sequence: i64,
    pub trading_pair_id: Uuid,
    pub side: OrderSide,
    pub order_kind: OrderKind,
    pub status: OrderStatus,
    pub price: Option<String>,
    pub quantity: String,
    pub filled_quantity: String,
    pub remaining_quantity: String,
    pub average_fill_price: Option<String>,
    pub time_in_force: TimeInForce,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let remaining = order.remaining_quantity();
        Self {
            order_id: order.id,
            sequence: order.sequence,
            trading_pair_id: order.trading_pair_id,
            side: order.side,
            order_kind: order.order_kind,
            status: order.status,
            price: order.price.map(|p| p.to_string()),
            quantity: order.quantity.to_string(),
            filled_quantity: order.filled_quantity.to_string(),
            remaining_quantity: remaining.to_string(),
            average_fill_price: order.average_fill_price.map(|p| p.to_string()),
            time_in_force: order.time_in_force,
            created_at: order.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_kind_price_requirements() {
        assert!(OrderKind::Limit.requires_price());
        assert!(OrderKind::StopLimit.requires_price());
        assert!(!OrderKind::Market.requires_price());
    }

    #[test]
    fn status_predicates() {
        assert!(OrderStatus::PendingMatch.is_matchable());
        assert!(OrderStatus::Partial.is_matchable());
        assert!(!OrderStatus::Filled.is_matchable());
        assert!(OrderStatus::Open.is_cancellable());
        assert!(!OrderStatus::PendingMatch.is_cancellable());
        assert!(!OrderStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn serde_uses_wire_casing() {
        assert_eq!(serde_json::to_string(&OrderSide::Buy).unwrap(), "\"BUY\"");
        assert_eq!(serde_json::to_string(&OrderKind::StopLimit).unwrap(), "\"STOP_LIMIT\"");
        assert_eq!(
            serde_json::to_string(&OrderStatus::PendingMatch).unwrap(),
            "\"PENDING_MATCH\""
        );
        assert_eq!(serde_json::to_string(&TimeInForce::Gtc).unwrap(), "\"GTC\"");
    }
}
