//! HTTP surface — §6.
//!
//! `/api/v1` REST endpoints for the dashboard and the AI/resolution
//! ingresses, plus the `/ws-fraud` push endpoint and a `/health` liveness
//! probe. Handlers are thin: they translate `CaseStoreError` into the
//! status codes in §7 and otherwise delegate straight to the `CaseStore`.

mod handlers;
mod ws;

use crate::middleware::request_logging;
use crate::push::PushBus;
use crate::store::CaseStore;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct ApiState {
    pub case_store: Arc<CaseStore>,
    pub push_bus: PushBus,
    /// Most recently broadcast TPS figure, for `/dashboard/stats` to read
    /// without taking a dependency on the Traffic Meter directly.
    pub last_tps: Arc<parking_lot::Mutex<f64>>,
}

pub fn router(state: ApiState) -> Router {
    let api_v1 = Router::new()
        .route("/dashboard/stats", get(handlers::dashboard_stats))
        .route("/dashboard/queue", get(handlers::dashboard_queue))
        .route("/dashboard/cases/:case_id", get(handlers::get_dashboard_case))
        .route(
            "/dashboard/cases/:case_id/resolve",
            post(handlers::resolve_case),
        )
        .route("/fraud-cases/ai-update", post(handlers::ai_update))
        .route("/fraud-cases/:case_id", get(handlers::get_case));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws-fraud", get(ws::ws_handler))
        .nest("/api/v1", api_v1)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
