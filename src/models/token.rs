use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    Rwa,
    Crypto,
    Stable,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Rwa => write!(f, "RWA"),
            TokenType::Crypto => write!(f, "CRYPTO"),
            TokenType::Stable => write!(f, "STABLE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub id: Uuid,
    pub symbol: String,
    pub name: String,
    pub token_type: TokenType,
    pub contract_address: Option<String>,
    pub blockchain: String,
    pub decimals: i32,
    pub total_supply: Option<BigDecimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradingPair {
    pub id: Uuid,
    pub symbol: String,
    pub base_token_id: Uuid,
    pub quote_token_id: Uuid,
    pub market_id: Option<Uuid>,
    pub is_active: bool,
    pub min_order_size: BigDecimal,
    pub max_order_size: BigDecimal,
    pub price_precision: i32,
    pub quantity_precision: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_type_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TokenType::Rwa).unwrap(), "\"RWA\"");
        assert_eq!(serde_json::to_string(&TokenType::Stable).unwrap(), "\"STABLE\"");
        assert_eq!(format!("{}", TokenType::Crypto), "CRYPTO");
    }
}
