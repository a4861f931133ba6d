//! Typed in-process event bus.
//!
//! A fixed enum of domain events over a broadcast channel; subscribers get
//! their own receiver and lag independently.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    MarketRegistered { market_id: Uuid },
    MarketApproved { market_id: Uuid, actor_id: String },
    MarketRejected { market_id: Uuid, actor_id: String },
    MarketActivated { market_id: Uuid, contract_address: String },
    MarketActivationFailed { market_id: Uuid, error: String },
    MarketPaused { market_id: Uuid },
    MarketResumed { market_id: Uuid },
    MarketArchived { market_id: Uuid },

    OrderAccepted { order_id: Uuid, user_id: String },
    OrderCancelled { order_id: Uuid, user_id: String },

    TradeExecuted { trade_id: Uuid, trading_pair_id: Uuid },
    TradeSettlementPending { trade_id: Uuid },
    TradeSettled { trade_id: Uuid, tx_hash: String },
    TradeSettlementFailed { trade_id: Uuid, error: String },

    SwapRequested { swap_id: Uuid },
    SwapQueued { swap_id: Uuid },
    SwapProcessing { swap_id: Uuid },
    SwapCompleted { swap_id: Uuid },
    SwapFailed { swap_id: Uuid, reason: String },
}

impl DomainEvent {
    /// Wire name, used in logs and notification payloads.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::MarketRegistered { .. } => "market.registered",
            DomainEvent::MarketApproved { .. } => "market.approved",
            DomainEvent::MarketRejected { .. } => "market.rejected",
            DomainEvent::MarketActivated { .. } => "market.activated",
            DomainEvent::MarketActivationFailed { .. } => "market.activation_failed",
            DomainEvent::MarketPaused { .. } => "market.paused",
            DomainEvent::MarketResumed { .. } => "market.resumed",
            DomainEvent::MarketArchived { .. } => "market.archived",
            DomainEvent::OrderAccepted { .. } => "order.accepted",
            DomainEvent::OrderCancelled { .. } => "order.cancelled",
            DomainEvent::TradeExecuted { .. } => "trade.executed",
            DomainEvent::TradeSettlementPending { .. } => "trade.settlement_pending",
            DomainEvent::TradeSettled { .. } => "trade.settled",
            DomainEvent::TradeSettlementFailed { .. } => "trade.settlement_failed",
            DomainEvent::SwapRequested { .. } => "swap.requested",
            DomainEvent::SwapQueued { .. } => "swap.queued",
            DomainEvent::SwapProcessing { .. } => "swap.processing",
            DomainEvent::SwapCompleted { .. } => "swap.completed",
            DomainEvent::SwapFailed { .. } => "swap.failed",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        tracing::debug!(event = event.name(), "publishing domain event");
        // Zero receivers is fine; events are advisory in-process signals.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(DomainEvent::SwapQueued { swap_id: id });
        match rx.recv().await.unwrap() {
            DomainEvent::SwapQueued { swap_id } => assert_eq!(swap_id, id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn event_names_are_stable() {
        let e = DomainEvent::TradeSettlementPending { trade_id: Uuid::nil() };
        assert_eq!(e.name(), "trade.settlement_pending");
        let e = DomainEvent::MarketActivationFailed {
            market_id: Uuid::nil(),
            error: "x".into(),
        };
        assert_eq!(e.name(), "market.activation_failed");
    }
}
