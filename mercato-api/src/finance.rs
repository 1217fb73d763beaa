use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use mercato_core::TenantContext;
use mercato_finance::{
    BatchDepositResult, DepositLine, Fund, FundTransaction, NewFund, Page, TransactionFilter,
    TransactionType,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::require_staff;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub fund_id: Uuid,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchDepositRequest {
    pub deposits: Vec<DepositLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub fund_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub operator_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/funds", post(open_fund))
        .route("/funds/deposit", post(deposit))
        .route("/funds/batch-deposit", post(batch_deposit))
        .route("/funds/transactions", get(list_transactions))
        .route("/funds/{id}", get(get_fund))
}

/// POST /funds
async fn open_fund(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<NewFund>,
) -> Result<(StatusCode, Json<Fund>), AppError> {
    require_staff(&ctx)?;
    let fund = state.ledger.open_fund(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(fund)))
}

/// GET /funds/{id}
async fn get_fund(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(fund_id): Path<Uuid>,
) -> Result<Json<Fund>, AppError> {
    Ok(Json(state.ledger.get_fund(&ctx, fund_id).await?))
}

/// POST /funds/deposit
async fn deposit(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<FundTransaction>, AppError> {
    require_staff(&ctx)?;
    let tx = state
        .ledger
        .deposit(&ctx, req.fund_id, req.amount, req.description)
        .await?;
    Ok(Json(tx))
}

/// POST /funds/batch-deposit
async fn batch_deposit(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<BatchDepositRequest>,
) -> Result<Json<BatchDepositResult>, AppError> {
    require_staff(&ctx)?;
    Ok(Json(state.ledger.batch_deposit(&ctx, req.deposits).await?))
}

/// GET /funds/transactions?fund_id=&type=&operator_id=&from=&to=&page=&page_size=
async fn list_transactions(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Page<FundTransaction>>, AppError> {
    let filter = TransactionFilter {
        fund_id: query.fund_id,
        transaction_type: query.transaction_type,
        operator_id: query.operator_id,
        from: query.from,
        to: query.to,
    };
    let page = state
        .ledger
        .list_transactions(&ctx, filter, query.page, query.page_size)
        .await?;
    Ok(Json(page))
}
