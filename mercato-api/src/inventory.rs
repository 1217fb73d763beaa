use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use mercato_catalog::{
    AdjustmentOutcome, Availability, InventoryReservation, ReserveRequest, StockAdjustment,
};
use mercato_core::TenantContext;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::require_staff;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub reservation_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub stock_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub adjustments: Vec<StockAdjustment>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/inventory/reserve", post(reserve))
        .route("/inventory/release", post(release))
        .route("/inventory/adjust", post(adjust))
        .route("/inventory/{product_id}/availability", get(availability))
        .route("/inventory/{product_id}/stock", put(set_stock))
}

/// POST /inventory/reserve
async fn reserve(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<InventoryReservation>), AppError> {
    let reservation = state.inventory.reserve(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// POST /inventory/release
async fn release(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<InventoryReservation>, AppError> {
    Ok(Json(state.inventory.release(&ctx, req.reservation_id).await?))
}

/// POST /inventory/adjust
async fn adjust(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<Vec<AdjustmentOutcome>>, AppError> {
    require_staff(&ctx)?;
    Ok(Json(state.inventory.adjust(&ctx, req.adjustments).await?))
}

/// GET /inventory/{product_id}/availability
async fn availability(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<Availability>, AppError> {
    Ok(Json(state.inventory.available(&ctx, product_id).await?))
}

/// PUT /inventory/{product_id}/stock
async fn set_stock(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<Availability>, AppError> {
    require_staff(&ctx)?;
    Ok(Json(state.inventory.set_stock(&ctx, product_id, req.stock_quantity).await?))
}
