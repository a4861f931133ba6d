//! Central registry of key-value key shapes.
//!
//! Every Redis key used by the system is built here so the layout stays in
//! one place.

use uuid::Uuid;

pub struct CacheKey;

impl CacheKey {
    /// Sorted set of resting orders for one side of a pair's book.
    pub fn orderbook(pair_id: Uuid, side_plural: &str) -> String {
        format!("orderbook:{pair_id}:{side_plural}")
    }

    /// Aggregated depth snapshot, 10 s TTL.
    pub fn market_depth(pair_id: Uuid) -> String {
        format!("market:{pair_id}:depth")
    }

    /// Rolling 24 h statistics per pair.
    pub fn market_stats(pair_id: Uuid) -> String {
        format!("market:{pair_id}:stats")
    }

    /// Single-use nonce reservation, 3600 s TTL.
    pub fn nonce(address: &str, nonce: &str) -> String {
        format!("nonce:{}:{}", address.to_lowercase(), nonce)
    }

    /// Entity-permissions decision cache, 300 s TTL.
    pub fn auth(principal: &str, entity: &str, action: &str, context_hash: &str) -> String {
        format!("auth:{principal}:{entity}:{action}:{context_hash}")
    }

    /// Token metadata cache, 3600 s TTL.
    pub fn token_metadata(token_id: Uuid) -> String {
        format!("token:metadata:{token_id}")
    }

    /// Balance read-through cache, 300 s TTL.
    pub fn token_balance(user_id: &str, token_id: Uuid) -> String {
        format!("token:balance:{user_id}:{token_id}")
    }

    /// Trading pair cache, 3600 s TTL.
    pub fn trading_pair(pair_id: Uuid) -> String {
        format!("trading-pair:{pair_id}")
    }
}

pub mod ttl {
    pub const ORDERBOOK_SECS: u64 = 300;
    pub const MARKET_DEPTH_SECS: u64 = 10;
    pub const NONCE_SECS: u64 = 3_600;
    pub const AUTH_SECS: u64 = 300;
    pub const TOKEN_METADATA_SECS: u64 = 3_600;
    pub const TOKEN_BALANCE_SECS: u64 = 300;
    pub const TRADING_PAIR_SECS: u64 = 3_600;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        let id = Uuid::nil();
        assert_eq!(
            CacheKey::orderbook(id, "buys"),
            format!("orderbook:{id}:buys")
        );
        assert_eq!(CacheKey::market_depth(id), format!("market:{id}:depth"));
        assert_eq!(CacheKey::nonce("0xAbC", "42"), "nonce:0xabc:42");
        assert_eq!(
            CacheKey::auth("p", "e", "a", "h"),
            "auth:p:e:a:h"
        );
    }
}
