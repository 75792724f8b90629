use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use rotation_core::health::healthz;

use crate::handlers::outbox::{outbox_metrics, readyz};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Monitoring sink
        .route("/metrics/outbox", get(outbox_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
