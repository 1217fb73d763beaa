use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use mercato_core::{CoreError, OperatorType, OrderStatus, TenantContext};
use mercato_order::{
    BatchResult, NewOrder, Order, OrderStatusHistory, OrderTimeoutConfig, PayOrder, StatusChange,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::require_staff;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub reason: String,
    /// Must agree with the token when given.
    pub operator_type: Option<OperatorType>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct BatchUpdateStatusRequest {
    pub order_ids: Vec<Uuid>,
    pub target_status: OrderStatus,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TimeoutConfigRequest {
    pub merchant_id: Option<Uuid>,
    pub payment_timeout_minutes: i64,
    pub processing_timeout_hours: i64,
    #[serde(default)]
    pub auto_complete_enabled: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/batch-update-status", post(batch_update_status))
        .route("/orders/timeout-configs", get(list_timeout_configs).put(put_timeout_config))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/status", put(update_status))
        .route("/orders/{id}/status-history", get(status_history))
        .route("/orders/{id}/pay", post(pay_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/refund", post(refund_order))
}

// ============================================================================
// Handlers
// ============================================================================

/// Customers see only their own orders; anyone else's reads as missing.
async fn authorize_order(
    state: &AppState,
    ctx: &TenantContext,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let order = state.lifecycle.get_order(ctx, order_id).await?;
    if ctx.operator_type() == OperatorType::Customer && !is_customer(ctx, order.customer_id) {
        return Err(CoreError::OrderNotFound(order_id).into());
    }
    Ok(order)
}

fn is_customer(ctx: &TenantContext, customer_id: Uuid) -> bool {
    ctx.actor_id() == Some(customer_id.to_string().as_str())
}

/// POST /orders
async fn create_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    if ctx.operator_type() == OperatorType::Customer && !is_customer(&ctx, req.customer_id) {
        return Err(AppError::Forbidden(
            "customers can only place orders for themselves".to_string(),
        ));
    }
    let order = state.lifecycle.create_order(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(authorize_order(&state, &ctx, order_id).await?))
}

/// PUT /orders/{id}/status
async fn update_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    if let Some(claimed) = req.operator_type {
        if claimed != ctx.operator_type() {
            return Err(AppError::BadRequest(format!(
                "operator_type {} does not match the authenticated {}",
                claimed,
                ctx.operator_type()
            )));
        }
    }
    if req.status != OrderStatus::Cancelled {
        require_staff(&ctx)?;
    }
    authorize_order(&state, &ctx, order_id).await?;

    let mut change = StatusChange::new(req.status, req.reason);
    if let Some(metadata) = req.metadata {
        change = change.with_metadata(metadata);
    }
    Ok(Json(state.lifecycle.transition(&ctx, order_id, change).await?))
}

/// POST /orders/batch-update-status
async fn batch_update_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<BatchUpdateStatusRequest>,
) -> Result<Json<BatchResult>, AppError> {
    require_staff(&ctx)?;
    let result = state
        .lifecycle
        .batch_transition(&ctx, &req.order_ids, req.target_status, &req.reason)
        .await?;
    Ok(Json(result))
}

/// GET /orders/{id}/status-history
async fn status_history(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<OrderStatusHistory>>, AppError> {
    authorize_order(&state, &ctx, order_id).await?;
    let history = state.lifecycle.state_machine().history(&ctx, order_id).await?;
    Ok(Json(history))
}

/// POST /orders/{id}/pay
async fn pay_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<PayOrder>,
) -> Result<Json<Order>, AppError> {
    authorize_order(&state, &ctx, order_id).await?;
    Ok(Json(state.lifecycle.pay_order(&ctx, order_id, req).await?))
}

/// POST /orders/{id}/cancel
async fn cancel_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Order>, AppError> {
    authorize_order(&state, &ctx, order_id).await?;
    Ok(Json(state.lifecycle.cancel_order(&ctx, order_id, &req.reason).await?))
}

/// POST /orders/{id}/refund
async fn refund_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Order>, AppError> {
    require_staff(&ctx)?;
    Ok(Json(state.lifecycle.refund_order(&ctx, order_id, &req.reason).await?))
}

/// GET /orders/timeout-configs
async fn list_timeout_configs(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<Vec<OrderTimeoutConfig>>, AppError> {
    Ok(Json(state.timeout_configs.list(&ctx).await?))
}

/// PUT /orders/timeout-configs
async fn put_timeout_config(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<TimeoutConfigRequest>,
) -> Result<Json<OrderTimeoutConfig>, AppError> {
    require_staff(&ctx)?;
    let config = OrderTimeoutConfig {
        tenant_id: ctx.tenant_id(),
        merchant_id: req.merchant_id,
        payment_timeout_minutes: req.payment_timeout_minutes,
        processing_timeout_hours: req.processing_timeout_hours,
        auto_complete_enabled: req.auto_complete_enabled,
    };
    state.timeout_configs.upsert(&ctx, &config).await?;
    tracing::info!(tenant_id = %ctx.tenant_id(), merchant_id = ?config.merchant_id, "timeout config updated");
    Ok(Json(config))
}
