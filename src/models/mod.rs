pub mod balance;
pub mod compliance;
pub mod event;
pub mod market;
pub mod order;
pub mod swap;
pub mod token;
pub mod trade;

pub use balance::{BalanceResponse, UserBalance};
pub use compliance::{ComplianceRecord, KycStatus};
pub use event::{EventEnvelope, ExternalEvent, ProcessedEvent, ProcessingStatus};
pub use market::{AssetCategory, Market, MarketApprovalEvent, MarketAsset, MarketStatus};
pub use order::{
    CancelOrderRequest, CreateOrderRequest, Order, OrderKind, OrderResponse, OrderSide,
    OrderStatus, TimeInForce,
};
pub use swap::{
    CreateSwapRequest, SwapQuote, SwapQuoteRequest, SwapRecord, SwapResponse, SwapStatus,
};
pub use token::{Token, TokenType, TradingPair};
pub use trade::{SettlementStatus, Trade, TradeResponse};
