pub mod keys;
pub mod orderbook_cache;
pub mod redis_client;

use std::sync::Arc;

pub use keys::{ttl, CacheKey};
pub use orderbook_cache::{BookEntry, OrderbookCache};
pub use redis_client::{RedisClient, RedisConfig};

use crate::config::AppConfig;

/// Owner of the shared Redis client and the typed caches above it.
pub struct CacheManager {
    redis: Arc<RedisClient>,
    orderbook: OrderbookCache,
}

impl CacheManager {
    pub async fn new(config: &AppConfig) -> Result<Self, redis::RedisError> {
        let url = redis_url(
            &config.redis_url,
            config.redis_password.as_deref(),
            config.redis_tls,
        );
        let redis = Arc::new(RedisClient::from_url(&url).await?);
        let orderbook = OrderbookCache::new(redis.clone());
        Ok(Self { redis, orderbook })
    }

    pub fn redis(&self) -> Arc<RedisClient> {
        self.redis.clone()
    }

    pub fn orderbook(&self) -> &OrderbookCache {
        &self.orderbook
    }

    pub async fn is_available(&self) -> bool {
        self.redis.is_available().await
    }
}

/// Fold the optional password and TLS flag into the connection URL.
fn redis_url(base: &str, password: Option<&str>, tls: bool) -> String {
    let mut url = base.to_string();
    if tls && url.starts_with("redis://") {
        url = url.replacen("redis://", "rediss://", 1);
    }
    if let Some(password) = password {
        if !url.contains('@') {
            let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
            url.insert_str(scheme_end, &format!(":{password}@"));
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_applies_tls_and_password() {
        assert_eq!(
            redis_url("redis://localhost:6379", None, false),
            "redis://localhost:6379"
        );
        assert_eq!(
            redis_url("redis://localhost:6379", None, true),
            "rediss://localhost:6379"
        );
        assert_eq!(
            redis_url("redis://localhost:6379", Some("pw"), false),
            "redis://:pw@localhost:6379"
        );
        // An URL that already carries credentials is left alone.
        assert_eq!(
            redis_url("redis://:x@localhost:6379", Some("pw"), false),
            "redis://:x@localhost:6379"
        );
    }
}
