use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use rotation_core::health::HealthStatus;

use crate::error::CoordinatorError;
use crate::state::AppState;
use crate::worker::monitor::Anomaly;

#[derive(Serialize)]
pub struct OutboxMetricsResponse {
    pub health: HealthStatus,
    pub metrics: BTreeMap<String, f64>,
    pub anomalies: Vec<Anomaly>,
}

/// `GET /metrics/outbox`: flat metrics for the monitoring sink.
/// Responds 503 while the outbox is unhealthy.
pub async fn outbox_metrics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CoordinatorError> {
    let report = state.monitor.collect().await?;
    let status = report.health.status_code();
    Ok((
        status,
        Json(OutboxMetricsResponse {
            health: report.health,
            metrics: report.flatten(),
            anomalies: report.anomalies,
        }),
    ))
}

/// `GET /readyz`: ready once the relational store answers.
pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    match state.db.ping().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
