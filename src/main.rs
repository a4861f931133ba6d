use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod cache;
mod config;
mod db;
mod jobs;
mod models;
mod services;
mod utils;
mod workers;

use crate::auth::eip712::{Eip712Domain, SignatureVerifier};
use crate::auth::rate_limit::{RateLimitConfig, RateLimiter};
use crate::cache::CacheManager;
use crate::config::AppConfig;
use crate::db::Database;
use crate::jobs::{JobFabric, JobFabricConfig};
use crate::services::balance::BalanceBook;
use crate::services::bus::EventBus;
use crate::services::chain::{ChainClient, MockChainClient, SapphireChainClient, VenueContracts};
use crate::services::compliance::ComplianceService;
use crate::services::events::ProcessedEventLedger;
use crate::services::ingress::EventIngress;
use crate::services::lifecycle::MarketLifecycleEngine;
use crate::services::matching::MatchingEngine;
use crate::services::nonce::NonceLedger;
use crate::services::permissions::EntityPermissionsClient;
use crate::services::stats::MarketStatsService;
use crate::services::swap::SwapService;
use crate::workers::reconciliation::ReconciliationWorker;
use crate::workers::settlement::SettlementJobHandler;
use crate::workers::{WorkerDeps, WorkerSet};

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub cache: Arc<CacheManager>,
    pub fabric: Arc<JobFabric>,
    pub matching: Arc<MatchingEngine>,
    pub lifecycle: Arc<MarketLifecycleEngine>,
    pub swaps: Arc<SwapService>,
    pub stats: Arc<MarketStatsService>,
    pub balances: Arc<BalanceBook>,
    pub events: Arc<ProcessedEventLedger>,
    pub ingress: Arc<EventIngress>,
    pub rate_limiter: RateLimiter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("omen_market_backend={},tower_http=info", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting omen-market-backend v{}", env!("CARGO_PKG_VERSION"));

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    // Storage.
    let db = Database::connect(&config).await?;
    db.run_migrations().await?;
    tracing::info!("database connected, migrations applied");

    let cache = Arc::new(CacheManager::new(&config).await?);
    if cache.is_available().await {
        tracing::info!("redis connected at {}", config.redis_url);
    } else {
        tracing::warn!("redis unavailable at boot; queue and cache operations will retry");
    }

    // Job fabric.
    let fabric = Arc::new(JobFabric::new(
        cache.redis(),
        JobFabricConfig {
            dlq_suffix: config.dlq_queue_name.clone(),
            default_attempts: config.max_retry_attempts,
            default_backoff_ms: config.retry_backoff_ms,
            ..JobFabricConfig::default()
        },
    ));
    tracing::info!(
        transaction_queue = %config.transaction_queue_name,
        dlq = %config.dlq_queue_name,
        attempts = config.max_retry_attempts,
        backoff_ms = config.retry_backoff_ms,
        "job fabric initialized"
    );

    // Chain adapter. `SAPPHIRE_RPC_URL=mock` runs against the in-memory
    // fake for local development.
    let chain: Arc<dyn ChainClient> = if config.sapphire.rpc_url == "mock" {
        tracing::warn!("using in-memory mock chain client");
        Arc::new(MockChainClient::new())
    } else {
        let contracts = VenueContracts {
            token_factory: parse_address(config.sapphire.token_factory_address.as_deref())?,
            settlement: parse_address(config.sapphire.settlement_address.as_deref())?,
            bridge: parse_address(config.sapphire.bridge_address.as_deref())?,
        };
        let sapphire = SapphireChainClient::from_config(&config, contracts)?;
        tracing::info!(
            rpc = %config.sapphire.rpc_url,
            chain_id = config.sapphire.chain_id,
            signer = %format!("{:#x}", sapphire.signer_address()),
            "sapphire chain client initialized"
        );
        Arc::new(sapphire)
    };

    // Domain services.
    let bus = EventBus::default();
    let balances = Arc::new(BalanceBook::new(db.pool.clone()));
    let nonces = Arc::new(NonceLedger::new(cache.redis()));
    let verifier = Arc::new(SignatureVerifier::new(Eip712Domain::for_chain(
        config.sapphire.chain_id,
        None,
    )));
    let compliance = Arc::new(ComplianceService::new(db.pool.clone()));
    let permissions = Arc::new(EntityPermissionsClient::new(
        &config.entity_permissions,
        cache.redis(),
    )?);
    let events = Arc::new(ProcessedEventLedger::new(db.pool.clone()));

    let matching = Arc::new(MatchingEngine::new(
        db.pool.clone(),
        balances.clone(),
        nonces,
        verifier,
        compliance.clone(),
        cache.clone(),
        fabric.clone(),
        bus.clone(),
    ));
    let lifecycle = Arc::new(MarketLifecycleEngine::new(
        db.pool.clone(),
        permissions.clone(),
        fabric.clone(),
        chain.clone(),
        bus.clone(),
    ));
    let swaps = Arc::new(SwapService::new(
        db.pool.clone(),
        balances.clone(),
        compliance,
        chain.clone(),
        fabric.clone(),
        bus.clone(),
        config.max_retry_attempts,
        config.retry_backoff_ms,
    ));
    let stats = Arc::new(MarketStatsService::new(db.pool.clone(), cache.redis()));
    let ingress = Arc::new(EventIngress::new(events.clone(), lifecycle.clone()));

    // Workers.
    let worker_set = WorkerSet::spawn(WorkerDeps {
        fabric: fabric.clone(),
        matching: matching.clone(),
        swaps: swaps.clone(),
        lifecycle: lifecycle.clone(),
        stats: stats.clone(),
        settlement: SettlementJobHandler::new(db.pool.clone(), chain.clone(), bus.clone()),
        reconciliation: ReconciliationWorker::new(
            db.pool.clone(),
            chain.clone(),
            balances.clone(),
            bus.clone(),
        ),
        permissions,
        ingress: ingress.clone(),
        swap_concurrency: config.worker_concurrency,
    });

    // Domain-event observer: structured log line and a counter per event.
    let mut bus_rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(event) => {
                    tracing::info!(event = event.name(), "domain event");
                    metrics::counter!("domain_events_total", "kind" => event.name()).increment(1);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("domain event observer lagged {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let rate_limiter = RateLimiter::new(RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window: Duration::from_millis(config.rate_limit_window_ms),
    });

    let port = config.port;
    if config.enable_websockets {
        tracing::warn!("ENABLE_WEBSOCKETS is set but no websocket surface is built in");
    }

    let state = Arc::new(AppState {
        config,
        db,
        cache,
        fabric,
        matching,
        lifecycle,
        swaps,
        stats,
        balances,
        events,
        ingress,
        rate_limiter,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(move || async move { prometheus.render() }))
        .nest("/api/v1", api::routes::create_router(state.clone()))
        .layer(axum::middleware::from_fn(api::middleware::metrics_middleware))
        .layer(axum::middleware::from_fn(api::middleware::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Resources unwind in reverse order of construction: workers drain
    // before the pools drop.
    worker_set.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutdown signal received");
}

fn parse_address(raw: Option<&str>) -> anyhow::Result<Option<ethers::types::Address>> {
    match raw {
        None => Ok(None),
        Some(raw) => ethers::types::Address::from_str(raw)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid contract address {raw}: {e}")),
    }
}
