//! Redis connection management.
//!
//! Connection-manager wrapper with bounded retry and reconnect on failure.
//! Queue state, nonces, permission decisions and the order book mirror all
//! share this client.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

pub struct RedisClient {
    config: RedisConfig,
    connection: Arc<RwLock<Option<ConnectionManager>>>,
    client: Client,
}

impl RedisClient {
    pub async fn new(config: RedisConfig) -> Result<Self, RedisError> {
        let client = Client::open(config.url.as_str())?;

        let redis_client = Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            client,
        };

        redis_client.ensure_connected().await?;

        Ok(redis_client)
    }

    pub async fn from_url(url: &str) -> Result<Self, RedisError> {
        Self::new(RedisConfig {
            url: url.to_string(),
            ..Default::default()
        })
        .await
    }

    async fn ensure_connected(&self) -> Result<(), RedisError> {
        let mut conn = self.connection.write().await;
        if conn.is_none() {
            tracing::info!("establishing Redis connection to {}", self.config.url);
            let manager = ConnectionManager::new(self.client.clone()).await?;
            *conn = Some(manager);
        }
        Ok(())
    }

    pub async fn get_connection(&self) -> Result<ConnectionManager, RedisError> {
        self.ensure_connected().await?;
        let conn = self.connection.read().await;
        conn.clone()
            .ok_or_else(|| RedisError::from((redis::ErrorKind::IoError, "connection not available")))
    }

    /// Execute an operation with retry; the connection is dropped and
    /// re-established between attempts.
    pub async fn with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, RedisError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            match self.get_connection().await {
                Ok(conn) => match operation(conn).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        tracing::warn!(
                            "redis operation failed (attempt {}/{}): {}",
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        last_error = Some(e);
                        if attempt < self.config.max_retries - 1 {
                            let mut conn = self.connection.write().await;
                            *conn = None;
                            tokio::time::sleep(Duration::from_millis(
                                self.config.retry_delay_ms * (attempt as u64 + 1),
                            ))
                            .await;
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "redis connection failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.config.max_retries,
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries - 1 {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.retry_delay_ms * (attempt as u64 + 1),
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| RedisError::from((redis::ErrorKind::IoError, "max retries exceeded"))))
    }

    // ==================== Basic Operations ====================

    pub async fn get<T: redis::FromRedisValue>(&self, key: &str) -> Result<Option<T>, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.get(&key).await }
        })
        .await
    }

    pub async fn set_ex<T: redis::ToRedisArgs + Send + Sync + Clone>(
        &self,
        key: &str,
        value: T,
        ttl_secs: u64,
    ) -> Result<(), RedisError> {
        let value = value.clone();
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let value = value.clone();
            async move { conn.set_ex(&key, value, ttl_secs).await }
        })
        .await
    }

    /// SET NX EX: returns true iff the key was newly created. This is the
    /// unique-key mutual exclusion primitive behind nonce reservation and
    /// schedule deduplication.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let value = value.to_string();
            async move {
                let result: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async(&mut conn)
                    .await?;
                Ok(result.is_some())
            }
        })
        .await
    }

    pub async fn del(&self, key: &str) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move {
                let count: i32 = conn.del(&key).await?;
                Ok(count > 0)
            }
        })
        .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.exists(&key).await }
        })
        .await
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.expire(&key, ttl_secs as i64).await }
        })
        .await
    }

    // ==================== Sorted Set Operations ====================

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move {
                let _: i32 = conn.zadd(&key, member, score).await?;
                Ok(())
            }
        })
        .await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move {
                let count: i32 = conn.zrem(&key, member).await?;
                Ok(count > 0)
            }
        })
        .await
    }

    /// Ascending lexicographic range over a zero-score sorted set.
    pub async fn zrangebylex_limit(
        &self,
        key: &str,
        limit: isize,
    ) -> Result<Vec<String>, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.zrangebylex_limit(&key, "-", "+", 0, limit).await }
        })
        .await
    }

    pub async fn zcard(&self, key: &str) -> Result<usize, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.zcard(&key).await }
        })
        .await
    }

    // ==================== Utility Operations ====================

    pub async fn ping(&self) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| async move {
            let result: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(result == "PONG")
        })
        .await
    }

    pub async fn is_available(&self) -> bool {
        self.ping().await.unwrap_or(false)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.max_retries, 3);
    }
}
