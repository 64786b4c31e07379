//! Backend for The Sports Dugout referral contest.
//!
//! One paid entry per email. Every entry gets a shareable `TSD` referral
//! code; each new entry naming that code credits its owner with one
//! referral, and the first entry to reach 1000 referrals wins the $1,000
//! prize.
//!
//!
//!
//! # General Infrastructure
//!
//! - Stateless axum handlers, one process, no background jobs
//! - All contest state lives in Redis; the process can be restarted or
//!   scaled horizontally without coordination
//! - Payments are authorized by the gateway before this API is called; the
//!   entry endpoint only receives the confirmation id
//! - Without `REDIS_URL` the service falls back to an in-memory store, for
//!   local development only
//!
//!
//!
//! # Endpoints
//!
//! - `POST /api/contest/entries` - record a paid entry
//! - `GET /api/contest/email-check?email=` - has this email entered
//! - `GET /api/referral/validate?code=` - referral code pre-check
//! - `GET /api/stats` - aggregate contest numbers
//! - `GET /api/leaderboard?limit=` - top referrers
//! - `GET /api/health` - liveness
//!
//! Emails never leave the system unmasked; stats and leaderboard rows show
//! the first 3 characters plus `***`.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod entry;
pub mod error;
pub mod ledger;
pub mod routes;
pub mod state;
pub mod store;

use routes::{
    create_entry_handler, email_check_handler, health_handler, leaderboard_handler, stats_handler,
    validate_referral_handler,
};
use state::State;

pub fn app(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/contest/entries", post(create_entry_handler))
        .route("/api/contest/email-check", get(email_check_handler))
        .route("/api/referral/validate", get(validate_referral_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting server...");
    let app = app(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
