//! REST edge. Thin axum handlers over the engines, JWT-gated, wrapped in
//! the standard envelope, base path `/api/v1`.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod state;

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post, put},
    Extension, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::middleware::auth_middleware;
use crate::api::state::AppState;

/// Build the full router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/me", get(handlers::auth::me))
        .route(
            "/letters",
            post(handlers::letters::create).get(handlers::letters::list),
        )
        .route("/letters/:id", get(handlers::letters::get_letter))
        .route("/barcode/bind", post(handlers::barcode::bind))
        .route("/barcode/scan", post(handlers::barcode::scan))
        .route("/barcode/:code", get(handlers::barcode::get_barcode))
        .route("/barcode/:code/timeline", get(handlers::barcode::timeline))
        .route("/envelopes", post(handlers::barcode::provision_envelope))
        .route("/courier/tasks", get(handlers::courier::tasks))
        .route("/courier/tasks/:id/accept", put(handlers::courier::accept))
        .route("/courier/tasks/:id/reject", put(handlers::courier::reject))
        .route("/courier/tasks/:id/collect", put(handlers::courier::collect))
        .route("/courier/tasks/:id/deliver", put(handlers::courier::deliver))
        .route("/courier/subordinates", get(handlers::courier::subordinates))
        .route("/courier/stats", get(handlers::courier::stats))
        .route("/courier/register", post(handlers::courier::register))
        .route("/courier/approve/:id", post(handlers::courier::approve))
        .route("/credit/balance", get(handlers::credit::balance))
        .route("/credit/transactions", get(handlers::credit::transactions))
        .route("/credit/tasks", get(handlers::credit::tasks))
        .layer(axum_mw::from_fn(auth_middleware));

    // Public routes (no auth)
    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login));

    Router::new()
        .nest("/api/v1", public.merge(protected))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
