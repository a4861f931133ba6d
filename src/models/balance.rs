use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserBalance {
    pub id: Uuid,
    pub user_id: String,
    pub token_id: Uuid,
    pub available: BigDecimal,
    pub locked: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub token_id: Uuid,
    pub available: String,
    pub locked: String,
    pub total: String,
}

impl From<UserBalance> for BalanceResponse {
    fn from(balance: UserBalance) -> Self {
        let total = &balance.available + &balance.locked;
        Self {
            token_id: balance.token_id,
            available: balance.available.to_string(),
            locked: balance.locked.to_string(),
            total: total.to_string(),
        }
    }
}
