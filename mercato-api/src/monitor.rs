use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use mercato_core::TenantContext;
use mercato_order::ScanReport;
use serde::Serialize;

use crate::error::AppError;
use crate::middleware::require_staff;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MonitorStatusResponse {
    pub running: bool,
    pub holder_id: String,
    pub last_report: Option<ScanReport>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/monitor/status", get(status))
        .route("/monitor/start", post(start))
        .route("/monitor/stop", post(stop))
}

async fn snapshot(state: &AppState) -> MonitorStatusResponse {
    MonitorStatusResponse {
        running: state.monitor.is_running().await,
        holder_id: state.monitor.holder_id().to_string(),
        last_report: state.monitor.last_report(),
    }
}

/// GET /monitor/status
async fn status(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<MonitorStatusResponse>, AppError> {
    require_staff(&ctx)?;
    Ok(Json(snapshot(&state).await))
}

/// POST /monitor/start
async fn start(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<MonitorStatusResponse>, AppError> {
    require_staff(&ctx)?;
    state.monitor.start().await?;
    tracing::info!(tenant_id = %ctx.tenant_id(), actor = ?ctx.actor_id(), "timeout monitor started via api");
    Ok(Json(snapshot(&state).await))
}

/// POST /monitor/stop
async fn stop(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<MonitorStatusResponse>, AppError> {
    require_staff(&ctx)?;
    state.monitor.stop().await?;
    tracing::info!(tenant_id = %ctx.tenant_id(), actor = ?ctx.actor_id(), "timeout monitor stopped via api");
    Ok(Json(snapshot(&state).await))
}
