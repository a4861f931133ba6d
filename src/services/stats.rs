//! Rolling 24 h market statistics.
//!
//! Recomputed from the trades table by a stats job on every executed trade
//! (deduped per pair in the queue) and cached in Redis for the read surface.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{CacheKey, RedisClient};

const STATS_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStats {
    pub trading_pair_id: Uuid,
    pub last_price: Option<String>,
    pub high_24h: Option<String>,
    pub low_24h: Option<String>,
    pub volume_24h: String,
    pub quote_volume_24h: String,
    pub trade_count_24h: i64,
    pub updated_at: DateTime<Utc>,
}

pub struct MarketStatsService {
    pool: PgPool,
    redis: Arc<RedisClient>,
}

impl MarketStatsService {
    pub fn new(pool: PgPool, redis: Arc<RedisClient>) -> Self {
        Self { pool, redis }
    }

    /// Recompute the 24 h window for one pair and refresh the cache.
    pub async fn refresh(&self, pair_id: Uuid) -> Result<MarketStats, sqlx::Error> {
        let row: (Option<BigDecimal>, Option<BigDecimal>, Option<BigDecimal>, Option<BigDecimal>, i64) =
            sqlx::query_as(
                r#"
                SELECT MAX(price), MIN(price), SUM(quantity), SUM(price * quantity), COUNT(*)
                FROM trades
                WHERE trading_pair_id = $1 AND executed_at > NOW() - INTERVAL '24 hours'
                "#,
            )
            .bind(pair_id)
            .fetch_one(&self.pool)
            .await?;

        let last: Option<(BigDecimal,)> = sqlx::query_as(
            r#"
            SELECT price FROM trades
            WHERE trading_pair_id = $1
            ORDER BY executed_at DESC
            LIMIT 1
            "#,
        )
        .bind(pair_id)
        .fetch_optional(&self.pool)
        .await?;

        let (high, low, volume, quote_volume, count) = row;
        let stats = MarketStats {
            trading_pair_id: pair_id,
            last_price: last.map(|(p,)| p.to_string()),
            high_24h: high.map(|p| p.to_string()),
            low_24h: low.map(|p| p.to_string()),
            volume_24h: volume.unwrap_or_default().to_string(),
            quote_volume_24h: quote_volume.unwrap_or_default().to_string(),
            trade_count_24h: count,
            updated_at: Utc::now(),
        };

        if let Ok(raw) = serde_json::to_string(&stats) {
            let key = CacheKey::market_stats(pair_id);
            if let Err(e) = self.redis.set_ex(&key, raw, STATS_TTL_SECS).await {
                tracing::warn!(%pair_id, "failed to cache market stats: {e}");
            }
        }

        Ok(stats)
    }

    /// Cached read; recomputes on miss.
    pub async fn get(&self, pair_id: Uuid) -> Result<MarketStats, sqlx::Error> {
        let key = CacheKey::market_stats(pair_id);
        if let Ok(Some(raw)) = self.redis.get::<String>(&key).await {
            if let Ok(stats) = serde_json::from_str::<MarketStats>(&raw) {
                return Ok(stats);
            }
        }
        self.refresh(pair_id).await
    }
}
