//! openpenpal-server — REST server for the OpenPenPal backbone.
//!
//! Reads config from env vars (see `config.rs`), notably:
//!   OPENPENPAL_STORE        — "memory" (default) or "postgres"
//!   OPENPENPAL_DATABASE_URL — Postgres connection string
//!   OPENPENPAL_JWT_SECRET   — token HMAC secret
//!   OPENPENPAL_BIND_ADDR    — listen address (default 0.0.0.0:8080)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use openpenpal::api::state::AppState;
use openpenpal::api::build_router;
use openpenpal::config::{AppConfig, StoreKind};
use openpenpal::store::memory::MemoryStore;
use openpenpal::store::Stores;
use openpenpal_core::clock::{Clock, SystemClock};
use openpenpal_postgres::PgStores;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,openpenpal=debug".into()),
        )
        .init();

    let config = AppConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let stores = match config.store {
        StoreKind::Memory => {
            tracing::warn!("running on the in-memory store; state dies with the process");
            Stores::from_store(Arc::new(MemoryStore::new(Arc::clone(&clock))))
        }
        StoreKind::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await
                .expect("failed to connect to database");
            tracing::info!("connected to database");
            PgStores::new(pool).into_stores()
        }
    };

    let state = AppState::build(config.clone(), stores, clock);

    let shutdown = Arc::new(AtomicBool::new(false));
    let handles = state.spawn_background(Arc::clone(&shutdown));
    tracing::info!("{} background loops running", handles.len());

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind listen address");
    tracing::info!("openpenpal-server listening on {}", config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .expect("server error");

    shutdown.store(true, Ordering::Relaxed);
}
