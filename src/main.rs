// LMSR prediction market server - main entry point.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use lmsr_market::app_state::{AppState, SharedState};
use lmsr_market::config::Config;
use lmsr_market::handlers::*;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    let port = config.port;
    let state: SharedState = Arc::new(AppState::new(config));

    match state.load_from_disk() {
        Ok(()) => info!("loaded persisted state from disk"),
        Err(e) => info!("starting fresh: {}", e),
    }

    // One worker drains the trade queue; the watchdog restarts it if it dies.
    state.pipeline.ensure_worker_running();
    state.pipeline.clone().spawn_watchdog();

    let shutdown_state = state.clone();

    let app = Router::new()
        // ===== MARKET ENDPOINTS =====
        .route("/markets", get(get_markets))
        .route("/markets", post(create_market))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/price", get(get_market_price))
        // ===== TRADE ENDPOINTS =====
        .route("/markets/:id/bet", post(place_bet))
        .route("/markets/:id/sell", post(sell_shares))
        .route("/markets/:id/undo", post(undo_bet))
        .route("/bet/status/:request_id", get(get_bet_status))
        // ===== RESOLUTION =====
        .route("/markets/:id/resolve", post(resolve_market))
        // ===== LEDGER ENDPOINTS =====
        .route("/balance/:wallet", get(get_balance))
        .route("/bets/:wallet", get(get_user_bets))
        .route("/admin/credit/:wallet", post(credit_wallet))
        // ===== HEALTH =====
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, "failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    // Save state on CTRL+C before exiting.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, saving state");
            if let Err(e) = shutdown_state.save_to_disk() {
                error!("failed to save state: {}", e);
            }
            std::process::exit(0);
        }
    });

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {}", e);
    }
}
