use axum::http::StatusCode;
use serde::Serialize;

/// Coarse health classification derived from the number of open issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl HealthStatus {
    /// 0 issues → healthy, exactly 1 → warning, 2 or more → unhealthy.
    pub fn from_issue_count(issues: usize) -> Self {
        match issues {
            0 => Self::Healthy,
            1 => Self::Warning,
            _ => Self::Unhealthy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Numeric gauge value for flat metric sinks.
    pub fn as_gauge(self) -> f64 {
        match self {
            Self::Healthy => 0.0,
            Self::Warning => 1.0,
            Self::Unhealthy => 2.0,
        }
    }

    /// A warning still serves traffic; only unhealthy reports 503.
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Warning => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Handler for `GET /healthz`: liveness only.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
