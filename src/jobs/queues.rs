//! Queue names, concurrency caps and deterministic job id shapes.

use uuid::Uuid;

pub const MATCHING: &str = "matching";
pub const SETTLEMENT: &str = "settlement";
pub const RECONCILIATION: &str = "reconciliation";
pub const SWAPS: &str = "swaps";
pub const DEPLOYMENT: &str = "deployment";
pub const STATS: &str = "stats";
pub const NOTIFICATIONS: &str = "notifications";

pub const MATCHING_CONCURRENCY: usize = 10;
pub const SETTLEMENT_CONCURRENCY: usize = 3;
pub const RECONCILIATION_CONCURRENCY: usize = 1;
pub const DEPLOYMENT_CONCURRENCY: usize = 2;
pub const STATS_CONCURRENCY: usize = 2;
pub const NOTIFICATIONS_CONCURRENCY: usize = 10;

/// Matching queue dispatch cap, jobs per second.
pub const MATCHING_RATE_PER_SEC: u32 = 100;

/// Priorities: lower runs first. Market orders jump ahead of limit orders.
pub const PRIORITY_MARKET_ORDER: u32 = 1;
pub const PRIORITY_LIMIT_ORDER: u32 = 5;

pub fn match_job_id(order_id: Uuid) -> String {
    format!("match-{order_id}")
}

/// Re-match fan-out id: deterministic per (resting order, trigger order) so
/// duplicate fan-outs collapse in the queue.
pub fn rematch_job_id(opposing_order_id: Uuid, trigger_order_id: Uuid) -> String {
    format!("match-{opposing_order_id}-trigger-{trigger_order_id}")
}

pub fn settle_job_id(trade_id: Uuid) -> String {
    format!("settle-{trade_id}")
}

pub fn deploy_job_id(market_id: Uuid) -> String {
    format!("deploy-{market_id}")
}

pub fn swap_job_id(swap_id: Uuid) -> String {
    format!("swap-{swap_id}")
}

pub fn stats_job_id(pair_id: Uuid) -> String {
    format!("stats-{pair_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_deterministic() {
        let a = Uuid::nil();
        let b = Uuid::new_v4();
        assert_eq!(match_job_id(a), format!("match-{a}"));
        assert_eq!(
            rematch_job_id(a, b),
            format!("match-{a}-trigger-{b}")
        );
        assert_eq!(deploy_job_id(a), format!("deploy-{a}"));
    }
}
