#![allow(async_fn_in_trait)]

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use rotation_core::health::HealthStatus;
use rotation_domain::outbox::OutboxStatus;

use crate::domain::repository::OutboxRepository;
use crate::domain::types::{OutboxSnapshot, SnapshotCutoffs};
use crate::error::CoordinatorError;
use crate::worker::relay::to_chrono;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighLatency,
    DeadLetterGrowth,
    DeadLetterBacklog,
    StuckProcessing,
    RelayStalled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub stuck_after: Duration,
    pub throughput_window: Duration,
    /// Dead letters created within this window count as queue growth.
    pub growth_window: Duration,
    pub latency_warning_secs: f64,
    pub latency_critical_secs: f64,
    pub dead_letter_warning: u64,
    /// Backlog age after which zero throughput counts as a relay outage.
    pub stall_grace_secs: f64,
    /// Minimum severity forwarded by `collect_and_alert`.
    pub alert_severity: Severity,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            stuck_after: Duration::from_secs(5 * 60),
            throughput_window: Duration::from_secs(60 * 60),
            growth_window: Duration::from_secs(15 * 60),
            latency_warning_secs: 5.0 * 60.0,
            latency_critical_secs: 30.0 * 60.0,
            dead_letter_warning: 10,
            stall_grace_secs: 2.0 * 60.0,
            alert_severity: Severity::Warning,
        }
    }
}

/// Point-in-time view of outbox health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxReport {
    pub generated_at: DateTime<Utc>,
    pub health: HealthStatus,
    pub counts: BTreeMap<OutboxStatus, u64>,
    pub pending_age_avg_secs: f64,
    pub pending_age_max_secs: f64,
    pub retryable_pending: u64,
    pub dead_letters: u64,
    pub dead_lettered_in_window: u64,
    pub stuck_processing: u64,
    pub published_in_window: u64,
    pub window_secs: u64,
    pub by_event_type: BTreeMap<String, BTreeMap<OutboxStatus, u64>>,
    pub by_aggregate_type: BTreeMap<String, BTreeMap<OutboxStatus, u64>>,
    pub anomalies: Vec<Anomaly>,
}

impl OutboxReport {
    /// Issues are anomalies at warning level or above.
    pub fn issue_count(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| a.severity >= Severity::Warning)
            .count()
    }

    /// Flat `name → value` view for metric sinks.
    pub fn flatten(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (status, count) in &self.counts {
            out.insert(
                format!("outbox.status.{}", status.as_str().to_ascii_lowercase()),
                *count as f64,
            );
        }
        out.insert("outbox.pending.age_avg_seconds".into(), self.pending_age_avg_secs);
        out.insert("outbox.pending.age_max_seconds".into(), self.pending_age_max_secs);
        out.insert("outbox.retryable_pending".into(), self.retryable_pending as f64);
        out.insert("outbox.dead_letters".into(), self.dead_letters as f64);
        out.insert(
            "outbox.dead_letters.recent".into(),
            self.dead_lettered_in_window as f64,
        );
        out.insert("outbox.stuck_processing".into(), self.stuck_processing as f64);
        out.insert(
            "outbox.throughput.published".into(),
            self.published_in_window as f64,
        );
        let per_minute = if self.window_secs == 0 {
            0.0
        } else {
            self.published_in_window as f64 * 60.0 / self.window_secs as f64
        };
        out.insert("outbox.throughput.per_minute".into(), per_minute);
        out.insert("outbox.health".into(), self.health.as_gauge());
        out.insert("outbox.anomalies".into(), self.anomalies.len() as f64);
        for (prefix, breakdown) in [
            ("event_type", &self.by_event_type),
            ("aggregate_type", &self.by_aggregate_type),
        ] {
            for (name, counts) in breakdown {
                for (status, count) in counts {
                    out.insert(
                        format!(
                            "outbox.{prefix}.{name}.{}",
                            status.as_str().to_ascii_lowercase()
                        ),
                        *count as f64,
                    );
                }
            }
        }
        out
    }
}

/// Destination for anomalies that cross the alert threshold.
pub trait AlertSink: Send + Sync {
    async fn alert(&self, anomaly: &Anomaly);
}

/// Default sink: emits anomalies as `warn`/`error` events.
#[derive(Clone, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    async fn alert(&self, anomaly: &Anomaly) {
        match anomaly.severity {
            Severity::Critical => error!(
                kind = ?anomaly.kind,
                value = anomaly.value,
                "{}",
                anomaly.message
            ),
            Severity::Warning => warn!(
                kind = ?anomaly.kind,
                value = anomaly.value,
                "{}",
                anomaly.message
            ),
            Severity::Info => info!(
                kind = ?anomaly.kind,
                value = anomaly.value,
                "{}",
                anomaly.message
            ),
        }
    }
}

/// Reads outbox health from the store. Holds no state between collects, so
/// one-shot runs and concurrent scrapes see the same picture.
pub struct OutboxMonitor<R>
where
    R: OutboxRepository,
{
    pub repo: R,
    pub settings: MonitorSettings,
}

impl<R> OutboxMonitor<R>
where
    R: OutboxRepository,
{
    pub fn new(repo: R, settings: MonitorSettings) -> Self {
        Self { repo, settings }
    }

    pub async fn collect(&self) -> Result<OutboxReport, CoordinatorError> {
        let now = Utc::now();
        let snapshot = self
            .repo
            .snapshot(SnapshotCutoffs {
                now,
                stuck_before: now - to_chrono(self.settings.stuck_after),
                published_since: now - to_chrono(self.settings.throughput_window),
                failed_since: now - to_chrono(self.settings.growth_window),
            })
            .await?;

        let dead_letters = snapshot.count(OutboxStatus::Failed);
        let anomalies = detect_anomalies(&snapshot, &self.settings);

        let mut report = OutboxReport {
            generated_at: now,
            health: HealthStatus::Healthy,
            counts: snapshot.by_status.clone(),
            pending_age_avg_secs: snapshot.pending_age_avg_secs,
            pending_age_max_secs: snapshot.pending_age_max_secs,
            retryable_pending: snapshot.retryable_pending,
            dead_letters,
            dead_lettered_in_window: snapshot.dead_lettered_in_window,
            stuck_processing: snapshot.stuck_processing,
            published_in_window: snapshot.published_in_window,
            window_secs: self.settings.throughput_window.as_secs(),
            by_event_type: snapshot.by_event_type,
            by_aggregate_type: snapshot.by_aggregate_type,
            anomalies,
        };
        report.health = HealthStatus::from_issue_count(report.issue_count());
        Ok(report)
    }

    pub async fn collect_and_alert<S: AlertSink>(
        &self,
        sink: &S,
    ) -> Result<OutboxReport, CoordinatorError> {
        let report = self.collect().await?;
        for anomaly in report
            .anomalies
            .iter()
            .filter(|a| a.severity >= self.settings.alert_severity)
        {
            sink.alert(anomaly).await;
        }
        info!(
            health = report.health.as_str(),
            pending = report.counts.get(&OutboxStatus::Pending).copied().unwrap_or(0),
            dead_letters = report.dead_letters,
            anomalies = report.anomalies.len(),
            "outbox health collected"
        );
        Ok(report)
    }
}

pub fn detect_anomalies(snapshot: &OutboxSnapshot, settings: &MonitorSettings) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let pending = snapshot.count(OutboxStatus::Pending);
    let dead_letters = snapshot.count(OutboxStatus::Failed);
    let max_age = snapshot.pending_age_max_secs;

    if max_age >= settings.latency_critical_secs {
        anomalies.push(Anomaly {
            kind: AnomalyKind::HighLatency,
            severity: Severity::Critical,
            message: format!("oldest pending outbox message is {max_age:.0}s old"),
            value: max_age,
        });
    } else if max_age >= settings.latency_warning_secs {
        anomalies.push(Anomaly {
            kind: AnomalyKind::HighLatency,
            severity: Severity::Warning,
            message: format!("oldest pending outbox message is {max_age:.0}s old"),
            value: max_age,
        });
    }

    let recent = snapshot.dead_lettered_in_window;
    if recent > 0 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::DeadLetterGrowth,
            severity: Severity::Warning,
            message: format!(
                "{recent} outbox messages dead-lettered in the last {}s",
                settings.growth_window.as_secs()
            ),
            value: recent as f64,
        });
    }

    if dead_letters >= settings.dead_letter_warning && settings.dead_letter_warning > 0 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::DeadLetterBacklog,
            severity: Severity::Warning,
            message: format!("{dead_letters} dead-lettered outbox messages"),
            value: dead_letters as f64,
        });
    } else if dead_letters > 0 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::DeadLetterBacklog,
            severity: Severity::Info,
            message: format!("{dead_letters} dead-lettered outbox messages"),
            value: dead_letters as f64,
        });
    }

    if snapshot.stuck_processing > 0 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::StuckProcessing,
            severity: Severity::Warning,
            message: format!(
                "{} outbox messages stuck in PROCESSING",
                snapshot.stuck_processing
            ),
            value: snapshot.stuck_processing as f64,
        });
    }

    if snapshot.published_in_window == 0 && pending > 0 && max_age >= settings.stall_grace_secs {
        anomalies.push(Anomaly {
            kind: AnomalyKind::RelayStalled,
            severity: Severity::Critical,
            message: format!("{pending} pending outbox messages and nothing published recently"),
            value: pending as f64,
        });
    }

    anomalies
}
