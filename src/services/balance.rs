//! Balance book: the sole authority over (user, token) balances.
//!
//! Single-row operations are one conditional UPDATE each, so concurrent
//! writers serialize at the storage row lock. Multi-row writes (trade
//! settlement) run inside one transaction and take their row locks in
//! lexicographic (user_id, token_id) order.

use bigdecimal::{BigDecimal, Signed, Zero};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::UserBalance;

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("insufficient available balance for user {user_id} token {token_id}")]
    InsufficientBalance { user_id: String, token_id: Uuid },

    #[error("insufficient locked balance for user {user_id} token {token_id}")]
    InsufficientLocked { user_id: String, token_id: Uuid },

    #[error("balance delta would go negative for user {user_id} token {token_id}")]
    NegativeResult { user_id: String, token_id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Signed change to one balance row, applied inside a settlement
/// transaction.
#[derive(Debug, Clone)]
pub struct BalanceDelta {
    pub user_id: String,
    pub token_id: Uuid,
    pub available: BigDecimal,
    pub locked: BigDecimal,
}

impl BalanceDelta {
    pub fn new(user_id: impl Into<String>, token_id: Uuid) -> Self {
        Self {
            user_id: user_id.into(),
            token_id,
            available: BigDecimal::zero(),
            locked: BigDecimal::zero(),
        }
    }
}

/// Merge duplicate (user, token) entries and order the rest
/// lexicographically. Lock acquisition in this canonical order is what keeps
/// concurrent settlements deadlock-free, including buyer == seller.
pub fn merge_and_order(deltas: Vec<BalanceDelta>) -> Vec<BalanceDelta> {
    let mut merged: Vec<BalanceDelta> = Vec::with_capacity(deltas.len());
    for delta in deltas {
        match merged
            .iter_mut()
            .find(|d| d.user_id == delta.user_id && d.token_id == delta.token_id)
        {
            Some(existing) => {
                existing.available += delta.available;
                existing.locked += delta.locked;
            }
            None => merged.push(delta),
        }
    }
    merged.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then_with(|| a.token_id.cmp(&b.token_id))
    });
    merged
}

pub struct BalanceBook {
    pool: PgPool,
}

impl BalanceBook {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Absent rows read as (0, 0).
    pub async fn get(
        &self,
        user_id: &str,
        token_id: Uuid,
    ) -> Result<(BigDecimal, BigDecimal), BalanceError> {
        let row: Option<(BigDecimal, BigDecimal)> = sqlx::query_as(
            "SELECT available, locked FROM user_balances WHERE user_id = $1 AND token_id = $2",
        )
        .bind(user_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or((BigDecimal::zero(), BigDecimal::zero())))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserBalance>, BalanceError> {
        let rows = sqlx::query_as::<_, UserBalance>(
            "SELECT * FROM user_balances WHERE user_id = $1 ORDER BY token_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn ensure_row(
        conn: &mut PgConnection,
        user_id: &str,
        token_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO user_balances (id, user_id, token_id, available, locked)
            VALUES ($1, $2, $3, 0, 0)
            ON CONFLICT (user_id, token_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Move `amount` from available to locked, failing if available is
    /// short. The guard lives in the UPDATE's WHERE clause, so the check
    /// and the move are one atomic statement.
    pub async fn lock(
        &self,
        user_id: &str,
        token_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), BalanceError> {
        let mut conn = self.pool.acquire().await?;
        Self::ensure_row(&mut conn, user_id, token_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE user_balances
            SET available = available - $3, locked = locked + $3, updated_at = NOW()
            WHERE user_id = $1 AND token_id = $2 AND available >= $3
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BalanceError::InsufficientBalance {
                user_id: user_id.to_string(),
                token_id,
            });
        }
        Ok(())
    }

    /// Inverse of `lock`.
    pub async fn unlock(
        &self,
        user_id: &str,
        token_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), BalanceError> {
        let mut conn = self.pool.acquire().await?;
        Self::ensure_row(&mut conn, user_id, token_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE user_balances
            SET available = available + $3, locked = locked - $3, updated_at = NOW()
            WHERE user_id = $1 AND token_id = $2 AND locked >= $3
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BalanceError::InsufficientLocked {
                user_id: user_id.to_string(),
                token_id,
            });
        }
        Ok(())
    }

    /// Apply signed deltas to both columns; the WHERE clause rejects any
    /// update that would leave either column negative.
    pub async fn credit(
        &self,
        user_id: &str,
        token_id: Uuid,
        available_delta: &BigDecimal,
        locked_delta: &BigDecimal,
    ) -> Result<(), BalanceError> {
        let mut conn = self.pool.acquire().await?;
        Self::ensure_row(&mut conn, user_id, token_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE user_balances
            SET available = available + $3, locked = locked + $4, updated_at = NOW()
            WHERE user_id = $1 AND token_id = $2
              AND available + $3 >= 0 AND locked + $4 >= 0
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .bind(available_delta)
        .bind(locked_delta)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BalanceError::NegativeResult {
                user_id: user_id.to_string(),
                token_id,
            });
        }
        Ok(())
    }

    /// Full replacement. Reserved for the reconciliation worker, which is
    /// authoritative over on-chain truth.
    pub async fn upsert(
        &self,
        user_id: &str,
        token_id: Uuid,
        available: &BigDecimal,
        locked: &BigDecimal,
    ) -> Result<(), BalanceError> {
        sqlx::query(
            r#"
            INSERT INTO user_balances (id, user_id, token_id, available, locked)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, token_id) DO UPDATE SET
                available = $4, locked = $5, updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token_id)
        .bind(available)
        .bind(locked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a set of deltas inside an open transaction: rows are created if
    /// absent, then locked FOR UPDATE in canonical order, then mutated with
    /// non-negativity enforced. Any violation aborts the caller's
    /// transaction.
    pub async fn apply_deltas(
        conn: &mut PgConnection,
        deltas: Vec<BalanceDelta>,
    ) -> Result<(), BalanceError> {
        let ordered = merge_and_order(deltas);

        for delta in &ordered {
            Self::ensure_row(conn, &delta.user_id, delta.token_id).await?;
        }

        for delta in &ordered {
            let (available, locked): (BigDecimal, BigDecimal) = sqlx::query_as(
                r#"
                SELECT available, locked FROM user_balances
                WHERE user_id = $1 AND token_id = $2
                FOR UPDATE
                "#,
            )
            .bind(&delta.user_id)
            .bind(delta.token_id)
            .fetch_one(&mut *conn)
            .await?;

            let new_available = available + &delta.available;
            let new_locked = locked + &delta.locked;
            if new_available.is_negative() {
                return Err(BalanceError::NegativeResult {
                    user_id: delta.user_id.clone(),
                    token_id: delta.token_id,
                });
            }
            if new_locked.is_negative() {
                return Err(BalanceError::NegativeResult {
                    user_id: delta.user_id.clone(),
                    token_id: delta.token_id,
                });
            }

            sqlx::query(
                r#"
                UPDATE user_balances
                SET available = $3, locked = $4, updated_at = NOW()
                WHERE user_id = $1 AND token_id = $2
                "#,
            )
            .bind(&delta.user_id)
            .bind(delta.token_id)
            .bind(&new_available)
            .bind(&new_locked)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn bd(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn merge_collapses_duplicate_rows() {
        let token = Uuid::nil();
        let mut a = BalanceDelta::new("alice", token);
        a.available = bd("10");
        let mut b = BalanceDelta::new("alice", token);
        b.available = bd("-4");
        b.locked = bd("2");

        let merged = merge_and_order(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].available, bd("6"));
        assert_eq!(merged[0].locked, bd("2"));
    }

    #[test]
    fn ordering_is_lexicographic_on_user_then_token() {
        let t1 = Uuid::from_u128(1);
        let t2 = Uuid::from_u128(2);
        let deltas = vec![
            BalanceDelta::new("bob", t1),
            BalanceDelta::new("alice", t2),
            BalanceDelta::new("alice", t1),
        ];
        let ordered = merge_and_order(deltas);
        assert_eq!(ordered[0].user_id, "alice");
        assert_eq!(ordered[0].token_id, t1);
        assert_eq!(ordered[1].user_id, "alice");
        assert_eq!(ordered[1].token_id, t2);
        assert_eq!(ordered[2].user_id, "bob");
    }

    #[test]
    fn self_trade_deltas_merge_to_net_effect() {
        // Buyer == seller: base out of locked and into available for the
        // same account must not deadlock and must net correctly.
        let base = Uuid::from_u128(7);
        let mut seller_side = BalanceDelta::new("carol", base);
        seller_side.locked = bd("-10");
        let mut buyer_side = BalanceDelta::new("carol", base);
        buyer_side.available = bd("10");

        let merged = merge_and_order(vec![seller_side, buyer_side]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].available, bd("10"));
        assert_eq!(merged[0].locked, bd("-10"));
    }
}
