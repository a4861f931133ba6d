//! Per-address single-use nonce reservation.
//!
//! The only replay-protection point in the system: every signed write path
//! must reserve its nonce before any state change. Reservation is a single
//! `SET NX EX`, so mutual exclusion comes from the key itself.

use std::sync::Arc;

use crate::cache::{ttl, CacheKey, RedisClient};

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("nonce has already been used")]
    NonceReused,

    #[error("nonce store unavailable: {0}")]
    Store(#[from] redis::RedisError),
}

pub struct NonceLedger {
    redis: Arc<RedisClient>,
    ttl_secs: u64,
}

impl NonceLedger {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self {
            redis,
            ttl_secs: ttl::NONCE_SECS,
        }
    }

    #[cfg(test)]
    pub fn with_ttl(redis: Arc<RedisClient>, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    /// Atomically reserve `(address, nonce)`. Only a successful reserve
    /// consumes the nonce; a failed request later in the pipeline does not
    /// free it.
    pub async fn reserve(&self, address: &str, nonce: &str) -> Result<(), NonceError> {
        let key = CacheKey::nonce(address, nonce);
        let created = self.redis.set_nx_ex(&key, "1", self.ttl_secs).await?;
        if created {
            Ok(())
        } else {
            Err(NonceError::NonceReused)
        }
    }
}
