//! Order book mirror.
//!
//! For each (pair, side) a Redis sorted set holds the resting OPEN/PARTIAL
//! orders in price-time priority order. Prices are uint256-scale integers,
//! far beyond what a float score can carry, so ordering is encoded
//! lexicographically: every member is
//!
//!   `{sort_price:078}:{sequence:020}:{order_id}`
//!
//! where `sort_price` is the raw price for SELL sets and the 78-digit
//! nines-complement for BUY sets. A plain ascending ZRANGEBYLEX then yields
//! best-price-first, oldest-first on both sides.
//!
//! The mirror is advisory: it expires after five minutes and the matching
//! engine refills it from the relational store on a miss.

use bigdecimal::BigDecimal;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::keys::{ttl, CacheKey};
use super::redis_client::RedisClient;
use crate::models::OrderSide;

const PRICE_WIDTH: usize = 78;
const SEQ_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub order_id: Uuid,
    pub sequence: i64,
    pub price: BigDecimal,
}

pub struct OrderbookCache {
    redis: Arc<RedisClient>,
}

impl OrderbookCache {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    fn side_key(pair_id: Uuid, side: OrderSide) -> String {
        let plural = match side {
            OrderSide::Buy => "buys",
            OrderSide::Sell => "sells",
        };
        CacheKey::orderbook(pair_id, plural)
    }

    fn encode_member(side: OrderSide, price: &BigDecimal, sequence: i64, order_id: Uuid) -> String {
        let sort_price = sort_price(side, price);
        format!("{sort_price}:{sequence:0width$}:{order_id}", width = SEQ_WIDTH)
    }

    fn decode_member(side: OrderSide, member: &str) -> Option<BookEntry> {
        let mut parts = member.splitn(3, ':');
        let price_part = parts.next()?;
        let seq_part = parts.next()?;
        let id_part = parts.next()?;

        let sort_price = BigDecimal::from_str(price_part.trim_start_matches('0')).or_else(|_| {
            // All-zero price field.
            BigDecimal::from_str("0")
        });
        let sort_price = sort_price.ok()?;
        let price = match side {
            OrderSide::Sell => sort_price,
            OrderSide::Buy => max_price() - sort_price,
        };

        Some(BookEntry {
            order_id: Uuid::from_str(id_part).ok()?,
            sequence: i64::from_str(seq_part.trim_start_matches('0')).unwrap_or(0),
            price,
        })
    }

    /// Add a resting order to its side of the book.
    pub async fn add(
        &self,
        pair_id: Uuid,
        side: OrderSide,
        price: &BigDecimal,
        sequence: i64,
        order_id: Uuid,
    ) -> Result<(), redis::RedisError> {
        let key = Self::side_key(pair_id, side);
        let member = Self::encode_member(side, price, sequence, order_id);
        self.redis.zadd(&key, 0.0, &member).await?;
        self.redis.expire(&key, ttl::ORDERBOOK_SECS).await?;
        Ok(())
    }

    /// Remove an order from the book.
    pub async fn remove(
        &self,
        pair_id: Uuid,
        side: OrderSide,
        price: &BigDecimal,
        sequence: i64,
        order_id: Uuid,
    ) -> Result<(), redis::RedisError> {
        let key = Self::side_key(pair_id, side);
        let member = Self::encode_member(side, price, sequence, order_id);
        self.redis.zrem(&key, &member).await?;
        Ok(())
    }

    /// Top-of-book entries in price-time priority order. Empty result may
    /// mean an expired mirror; callers fall back to the relational store.
    pub async fn top(
        &self,
        pair_id: Uuid,
        side: OrderSide,
        limit: usize,
    ) -> Result<Vec<BookEntry>, redis::RedisError> {
        let key = Self::side_key(pair_id, side);
        let members = self.redis.zrangebylex_limit(&key, limit as isize).await?;
        Ok(members
            .iter()
            .filter_map(|m| Self::decode_member(side, m))
            .collect())
    }

    /// Replace one side of the mirror from the authoritative store.
    pub async fn refill(
        &self,
        pair_id: Uuid,
        side: OrderSide,
        entries: &[BookEntry],
    ) -> Result<(), redis::RedisError> {
        let key = Self::side_key(pair_id, side);
        self.redis.del(&key).await?;
        for entry in entries {
            let member = Self::encode_member(side, &entry.price, entry.sequence, entry.order_id);
            self.redis.zadd(&key, 0.0, &member).await?;
        }
        if !entries.is_empty() {
            self.redis.expire(&key, ttl::ORDERBOOK_SECS).await?;
        }
        Ok(())
    }

    /// Drop both sides for a pair, forcing the next read to refill.
    pub async fn invalidate(&self, pair_id: Uuid) -> Result<(), redis::RedisError> {
        self.redis
            .del(&Self::side_key(pair_id, OrderSide::Buy))
            .await?;
        self.redis
            .del(&Self::side_key(pair_id, OrderSide::Sell))
            .await?;
        Ok(())
    }
}

fn max_price() -> BigDecimal {
    BigDecimal::from_str(&"9".repeat(PRICE_WIDTH)).expect("static literal")
}

/// 78-digit zero-padded sort field; nines-complement on the BUY side so
/// ascending lexicographic order is descending price order.
fn sort_price(side: OrderSide, price: &BigDecimal) -> String {
    let effective = match side {
        OrderSide::Sell => price.clone(),
        OrderSide::Buy => max_price() - price,
    };
    let digits = effective.with_scale(0).to_string();
    format!("{digits:0>width$}", width = PRICE_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn sell_members_sort_ascending_by_price_then_sequence() {
        let a = OrderbookCache::encode_member(OrderSide::Sell, &price("1000"), 5, Uuid::nil());
        let b = OrderbookCache::encode_member(OrderSide::Sell, &price("2000"), 1, Uuid::nil());
        let c = OrderbookCache::encode_member(OrderSide::Sell, &price("1000"), 9, Uuid::nil());
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn buy_members_sort_descending_by_price_then_oldest_first() {
        let high = OrderbookCache::encode_member(OrderSide::Buy, &price("2000"), 7, Uuid::nil());
        let low = OrderbookCache::encode_member(OrderSide::Buy, &price("1000"), 1, Uuid::nil());
        // Highest bid must come first in ascending lex order.
        assert!(high < low);

        let older = OrderbookCache::encode_member(OrderSide::Buy, &price("2000"), 3, Uuid::nil());
        let newer = OrderbookCache::encode_member(OrderSide::Buy, &price("2000"), 8, Uuid::nil());
        assert!(older < newer);
    }

    #[test]
    fn member_round_trips_through_decode() {
        let id = Uuid::new_v4();
        let p = price("2000000000000000000");
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let member = OrderbookCache::encode_member(side, &p, 42, id);
            let entry = OrderbookCache::decode_member(side, &member).unwrap();
            assert_eq!(entry.order_id, id);
            assert_eq!(entry.sequence, 42);
            assert_eq!(entry.price, p);
        }
    }

    #[test]
    fn zero_price_decodes() {
        let member = OrderbookCache::encode_member(OrderSide::Sell, &price("0"), 1, Uuid::nil());
        let entry = OrderbookCache::decode_member(OrderSide::Sell, &member).unwrap();
        assert_eq!(entry.price, price("0"));
    }
}
