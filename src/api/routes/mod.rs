use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::auth::admin::admin_middleware;
use crate::auth::rate_limit::rate_limit_middleware;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Admin-only lifecycle actions and the operational read surface.
    let admin_routes = Router::new()
        .route("/markets/:id/approve", post(handlers::markets::approve_market))
        .route("/markets/:id/activate", post(handlers::markets::activate_market))
        .route("/markets/:id/pause", post(handlers::markets::pause_market))
        .route("/markets/:id/archive", post(handlers::markets::archive_market))
        .route("/ops/events/failed", get(handlers::ops::list_failed_events))
        .route("/ops/queues/:queue/dead-letters", get(handlers::ops::list_dead_letters))
        .layer(axum_middleware::from_fn_with_state(state.clone(), admin_middleware));

    // Webhooks carry their own idempotency; no auth, no rate limit so the
    // sender's retries always land.
    let webhook_routes = Router::new().route(
        "/webhooks/entity-permissions",
        post(handlers::webhooks::entity_permissions_webhook),
    );

    let public_routes = Router::new()
        // Markets
        .route("/markets/register", post(handlers::markets::register_market))
        .route("/markets", get(handlers::markets::list_markets))
        .route("/markets/:id", get(handlers::markets::get_market))
        // Trading
        .route("/trading/orders", post(handlers::orders::create_order))
        .route("/trading/orders", get(handlers::orders::list_orders))
        .route("/trading/orders/:id", get(handlers::orders::get_order))
        .route("/trading/orders/:id", delete(handlers::orders::cancel_order))
        .route("/trading/orders/:id/trades", get(handlers::orders::get_order_trades))
        .route("/trading/balances", get(handlers::orders::get_balances))
        .route("/trading/pairs", get(handlers::orders::list_pairs))
        .route("/trading/pairs/:id/orderbook", get(handlers::orders::get_orderbook))
        .route("/trading/pairs/:id/stats", get(handlers::orders::get_pair_stats))
        // Swaps
        .route("/swaps", post(handlers::swaps::create_swap))
        .route("/swaps", get(handlers::swaps::list_swaps))
        .route("/swaps/quote", post(handlers::swaps::quote_swap))
        .route("/swaps/:id", get(handlers::swaps::get_swap))
        .layer(axum_middleware::from_fn_with_state(state, rate_limit_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(webhook_routes)
}
