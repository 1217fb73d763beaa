use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::AppError;
use crate::state::AppState;

/// Gauges refreshed from the dispatcher and monitor on every scrape.
pub struct Metrics {
    registry: Registry,
    notifications: IntGaugeVec,
    last_scan: IntGaugeVec,
    monitor_running: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let notifications = IntGaugeVec::new(
            Opts::new(
                "mercato_notifications_total",
                "Notification jobs by outcome since process start",
            ),
            &["outcome"],
        )?;
        let last_scan = IntGaugeVec::new(
            Opts::new(
                "mercato_monitor_last_scan_orders",
                "Orders handled by the most recent timeout scan, by outcome",
            ),
            &["outcome"],
        )?;
        let monitor_running = IntGauge::new(
            "mercato_monitor_running",
            "1 while the timeout monitor loop is running",
        )?;

        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(last_scan.clone()))?;
        registry.register(Box::new(monitor_running.clone()))?;

        Ok(Self {
            registry,
            notifications,
            last_scan,
            monitor_running,
        })
    }

    async fn refresh(&self, state: &AppState) {
        let stats = state.dispatcher.stats();
        for (outcome, value) in [
            ("enqueued", stats.enqueued),
            ("delivered", stats.delivered),
            ("failed", stats.failed),
            ("dropped", stats.dropped),
        ] {
            self.notifications
                .with_label_values(&[outcome])
                .set(value as i64);
        }

        if let Some(report) = state.monitor.last_report() {
            for (outcome, value) in [
                ("scanned", report.scanned),
                ("cancelled", report.cancelled),
                ("completed", report.completed),
                ("warned", report.warned),
                ("failed", report.failed),
            ] {
                self.last_scan.with_label_values(&[outcome]).set(value as i64);
            }
        }

        self.monitor_running
            .set(i64::from(state.monitor.is_running().await));
    }

    pub async fn render(&self, state: &AppState) -> Result<String, AppError> {
        self.refresh(state).await;

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::Anyhow(e.into()))?;
        String::from_utf8(buffer).map_err(|e| AppError::Anyhow(e.into()))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}

/// GET /metrics
async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render(&state).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
