use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use mercato_api::{
    app, middleware::TenantClaims, AppState, AuthConfig, Collaborators, Repositories,
};
use mercato_core::{Clock, FixedClock};
use mercato_order::MonitorSettings;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-secret";

struct Harness {
    app: Router,
    state: AppState,
    clock: Arc<FixedClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let collaborators = Collaborators {
        clock: clock.clone(),
        ..Collaborators::default()
    };
    let state = AppState::build(
        Repositories::in_memory(),
        collaborators,
        MonitorSettings::default(),
        64,
        2,
        AuthConfig {
            secret: SECRET.to_string(),
        },
    )
    .unwrap();

    Harness {
        app: app(state.clone()),
        state,
        clock,
    }
}

fn token(tenant_id: Uuid, role: &str) -> String {
    token_as(tenant_id, role, &format!("{}-1", role))
}

fn token_as(tenant_id: Uuid, role: &str, sub: &str) -> String {
    let claims = TenantClaims {
        sub: sub.to_string(),
        tenant_id,
        role: role.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Stock, a funded rights account and a pending order for `tenant`.
async fn seed_order(h: &Harness, merchant: &str, product_id: Uuid) -> (Uuid, Uuid) {
    let merchant_id = Uuid::new_v4();

    let (status, _) = send(
        &h.app,
        "PUT",
        &format!("/inventory/{}/stock", product_id),
        Some(merchant),
        Some(json!({ "stock_quantity": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, fund) = send(
        &h.app,
        "POST",
        "/funds",
        Some(merchant),
        Some(json!({ "merchant_id": merchant_id, "fund_type": "allocation" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let fund_id: Uuid = serde_json::from_value(fund["id"].clone()).unwrap();

    let (status, _) = send(
        &h.app,
        "POST",
        "/funds/deposit",
        Some(merchant),
        Some(json!({ "fund_id": fund_id, "amount": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, order) = send(
        &h.app,
        "POST",
        "/orders",
        Some(merchant),
        Some(json!({
            "merchant_id": merchant_id,
            "customer_id": Uuid::new_v4(),
            "items": [{
                "product_id": product_id,
                "quantity": 2,
                "unit_price": 500,
                "unit_rights_cost": 30
            }],
            "reservation_ttl_minutes": null
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_amount"], 1000);
    let order_id: Uuid = serde_json::from_value(order["id"].clone()).unwrap();

    (order_id, fund_id)
}

#[tokio::test]
async fn test_health_is_public() {
    let h = harness();
    let (status, body) = send(&h.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_forged_token_is_rejected() {
    let h = harness();
    let order_uri = format!("/orders/{}", Uuid::new_v4());

    let (status, body) = send(&h.app, "GET", &order_uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TENANT_CONTEXT");

    let (status, body) = send(&h.app, "GET", &order_uri, Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TENANT_CONTEXT");

    let nil_tenant = token(Uuid::nil(), "merchant");
    let (status, _) = send(&h.app, "GET", &order_uri, Some(&nil_tenant), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_order_lifecycle_over_http() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let merchant = token(tenant, "merchant");
    let product_id = Uuid::new_v4();
    let (order_id, fund_id) = seed_order(&h, &merchant, product_id).await;

    let (_, availability) = send(
        &h.app,
        "GET",
        &format!("/inventory/{}/availability", product_id),
        Some(&merchant),
        None,
    )
    .await;
    assert_eq!(availability["available_quantity"], 8);

    let (status, paid) = send(
        &h.app,
        "POST",
        &format!("/orders/{}/pay", order_id),
        Some(&merchant),
        Some(json!({ "method": "wechat", "paid_amount": 1000, "fund_id": fund_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "paid");

    let (_, fund) = send(&h.app, "GET", &format!("/funds/{}", fund_id), Some(&merchant), None).await;
    assert_eq!(fund["balance"], 940);

    let (status, processing) = send(
        &h.app,
        "PUT",
        &format!("/orders/{}/status", order_id),
        Some(&merchant),
        Some(json!({ "status": "processing", "reason": "picked", "operator_type": "merchant" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(processing["status"], "processing");

    let (status, body) = send(
        &h.app,
        "PUT",
        &format!("/orders/{}/status", order_id),
        Some(&merchant),
        Some(json!({ "status": "pending", "reason": "undo" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");

    let (status, history) = send(
        &h.app,
        "GET",
        &format!("/orders/{}/status-history", order_id),
        Some(&merchant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let to: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["to_status"].as_str().unwrap())
        .collect();
    assert_eq!(to, vec!["pending", "paid", "processing"]);
    assert_eq!(history[2]["operator_type"], "merchant");
    assert_eq!(history[2]["operator_id"], "merchant-1");
}

#[tokio::test]
async fn test_cancel_after_payment_returns_stock_and_rights() {
    let h = harness();
    let merchant = token(Uuid::new_v4(), "merchant");
    let product_id = Uuid::new_v4();
    let (order_id, fund_id) = seed_order(&h, &merchant, product_id).await;

    send(
        &h.app,
        "POST",
        &format!("/orders/{}/pay", order_id),
        Some(&merchant),
        Some(json!({ "method": "card", "paid_amount": 1000, "fund_id": fund_id })),
    )
    .await;

    let (status, cancelled) = send(
        &h.app,
        "POST",
        &format!("/orders/{}/cancel", order_id),
        Some(&merchant),
        Some(json!({ "reason": "customer changed mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (_, fund) = send(&h.app, "GET", &format!("/funds/{}", fund_id), Some(&merchant), None).await;
    assert_eq!(fund["balance"], 1000);

    let (_, availability) = send(
        &h.app,
        "GET",
        &format!("/inventory/{}/availability", product_id),
        Some(&merchant),
        None,
    )
    .await;
    assert_eq!(availability["available_quantity"], 10);

    let (status, body) = send(
        &h.app,
        "POST",
        &format!("/orders/{}/refund", order_id),
        Some(&merchant),
        Some(json!({ "reason": "too late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_operator_type_must_match_token() {
    let h = harness();
    let merchant = token(Uuid::new_v4(), "merchant");
    let (order_id, _) = seed_order(&h, &merchant, Uuid::new_v4()).await;

    let (status, body) = send(
        &h.app,
        "PUT",
        &format!("/orders/{}/status", order_id),
        Some(&merchant),
        Some(json!({ "status": "cancelled", "reason": "x", "operator_type": "system" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_orders_are_invisible_across_tenants() {
    let h = harness();
    let merchant_a = token(Uuid::new_v4(), "merchant");
    let merchant_b = token(Uuid::new_v4(), "merchant");
    let (order_id, _) = seed_order(&h, &merchant_a, Uuid::new_v4()).await;

    let (status, body) = send(&h.app, "GET", &format!("/orders/{}", order_id), Some(&merchant_b), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ORDER_NOT_FOUND");

    let (status, _) = send(
        &h.app,
        "PUT",
        &format!("/orders/{}/status", order_id),
        Some(&merchant_b),
        Some(json!({ "status": "cancelled", "reason": "hijack" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_update_reports_partial_success() {
    let h = harness();
    let merchant = token(Uuid::new_v4(), "merchant");
    let (order_id, _) = seed_order(&h, &merchant, Uuid::new_v4()).await;
    let missing = Uuid::new_v4();

    let (status, result) = send(
        &h.app,
        "POST",
        "/orders/batch-update-status",
        Some(&merchant),
        Some(json!({
            "order_ids": [order_id, missing],
            "target_status": "cancelled",
            "reason": "bulk close"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success_count"], 1);
    assert_eq!(result["fail_count"], 1);

    let too_many: Vec<Uuid> = (0..101).map(|_| Uuid::new_v4()).collect();
    let (status, body) = send(
        &h.app,
        "POST",
        "/orders/batch-update-status",
        Some(&merchant),
        Some(json!({ "order_ids": too_many, "target_status": "cancelled", "reason": "bulk" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BATCH_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_fund_transactions_are_filtered_and_paged() {
    let h = harness();
    let merchant = token(Uuid::new_v4(), "merchant");

    let (_, fund) = send(
        &h.app,
        "POST",
        "/funds",
        Some(&merchant),
        Some(json!({ "merchant_id": Uuid::new_v4(), "fund_type": "deposit" })),
    )
    .await;
    let fund_id = fund["id"].as_str().unwrap().to_string();

    let deposits: Vec<Value> = (1..=3)
        .map(|i| json!({ "fund_id": fund_id, "amount": i * 100 }))
        .chain(std::iter::once(json!({ "fund_id": fund_id, "amount": 0 })))
        .collect();
    let (status, result) = send(
        &h.app,
        "POST",
        "/funds/batch-deposit",
        Some(&merchant),
        Some(json!({ "deposits": deposits })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success_count"], 3);
    assert_eq!(result["fail_count"], 1);

    let (status, page) = send(
        &h.app,
        "GET",
        &format!("/funds/transactions?fund_id={}&type=credit&page=1&page_size=2", fund_id),
        Some(&merchant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    let (_, debits) = send(
        &h.app,
        "GET",
        &format!("/funds/transactions?fund_id={}&type=debit", fund_id),
        Some(&merchant),
        None,
    )
    .await;
    assert_eq!(debits["total"], 0);
}

#[tokio::test]
async fn test_customers_cannot_deposit() {
    let h = harness();
    let customer = token(Uuid::new_v4(), "customer");
    let (status, body) = send(
        &h.app,
        "POST",
        "/funds/deposit",
        Some(&customer),
        Some(json!({ "fund_id": Uuid::new_v4(), "amount": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_reserve_beyond_stock_is_unprocessable() {
    let h = harness();
    let merchant = token(Uuid::new_v4(), "merchant");
    let product_id = Uuid::new_v4();
    send(
        &h.app,
        "PUT",
        &format!("/inventory/{}/stock", product_id),
        Some(&merchant),
        Some(json!({ "stock_quantity": 3 })),
    )
    .await;

    let (status, reservation) = send(
        &h.app,
        "POST",
        "/inventory/reserve",
        Some(&merchant),
        Some(json!({
            "product_id": product_id,
            "quantity": 2,
            "reference_type": "cart",
            "reference_id": Uuid::new_v4(),
            "expires_at": null
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &h.app,
        "POST",
        "/inventory/reserve",
        Some(&merchant),
        Some(json!({
            "product_id": product_id,
            "quantity": 2,
            "reference_type": "cart",
            "reference_id": Uuid::new_v4(),
            "expires_at": null
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INSUFFICIENT_STOCK");

    let (status, released) = send(
        &h.app,
        "POST",
        "/inventory/release",
        Some(&merchant),
        Some(json!({ "reservation_id": reservation["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["status"], "released");

    let (status, body) = send(
        &h.app,
        "POST",
        "/inventory/release",
        Some(&merchant),
        Some(json!({ "reservation_id": reservation["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_RESERVATION_STATE");
}

#[tokio::test]
async fn test_monitor_start_stop_states() {
    let h = harness();
    let merchant = token(Uuid::new_v4(), "merchant");

    let (status, body) = send(&h.app, "POST", "/monitor/stop", Some(&merchant), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NOT_RUNNING");

    let (status, body) = send(&h.app, "POST", "/monitor/start", Some(&merchant), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);

    let (status, body) = send(&h.app, "POST", "/monitor/start", Some(&merchant), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_RUNNING");

    let (status, body) = send(&h.app, "POST", "/monitor/stop", Some(&merchant), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);

    let customer = token(Uuid::new_v4(), "customer");
    let (status, _) = send(&h.app, "GET", "/monitor/status", Some(&customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_stalled_order_is_cancelled_and_reported_in_metrics() {
    let h = harness();
    let merchant = token(Uuid::new_v4(), "merchant");
    let (order_id, _) = seed_order(&h, &merchant, Uuid::new_v4()).await;

    h.clock.advance(Duration::minutes(31));
    let report = h
        .state
        .monitor
        .process_timeout_orders(h.clock.now())
        .await
        .unwrap();
    assert_eq!(report.cancelled, 1);

    let (_, order) = send(&h.app, "GET", &format!("/orders/{}", order_id), Some(&merchant), None).await;
    assert_eq!(order["status"], "cancelled");

    let (_, history) = send(
        &h.app,
        "GET",
        &format!("/orders/{}/status-history", order_id),
        Some(&merchant),
        None,
    )
    .await;
    assert_eq!(history[1]["operator_type"], "system");
    assert_eq!(history[1]["reason"], "订单支付超时自动取消");

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("mercato_monitor_last_scan_orders{outcome=\"cancelled\"} 1"));
    assert!(text.contains("mercato_monitor_running 0"));
}

#[tokio::test]
async fn test_customers_only_reach_their_own_orders() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let merchant = token(tenant, "merchant");
    let owner_id = Uuid::new_v4();
    let owner = token_as(tenant, "customer", &owner_id.to_string());
    let stranger = token_as(tenant, "customer", &Uuid::new_v4().to_string());
    let product_id = Uuid::new_v4();

    let (status, _) = send(
        &h.app,
        "PUT",
        &format!("/inventory/{}/stock", product_id),
        Some(&merchant),
        Some(json!({ "stock_quantity": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let order_body = |customer_id: Uuid| {
        json!({
            "merchant_id": Uuid::new_v4(),
            "customer_id": customer_id,
            "items": [{
                "product_id": product_id,
                "quantity": 1,
                "unit_price": 500,
                "unit_rights_cost": 0
            }],
            "reservation_ttl_minutes": null
        })
    };

    let (status, _) = send(
        &h.app,
        "POST",
        "/orders",
        Some(&owner),
        Some(order_body(Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, order) = send(
        &h.app,
        "POST",
        "/orders",
        Some(&owner),
        Some(order_body(owner_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id: Uuid = serde_json::from_value(order["id"].clone()).unwrap();
    let order_uri = format!("/orders/{}", order_id);

    let (status, _) = send(&h.app, "GET", &order_uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&h.app, "GET", &order_uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ORDER_NOT_FOUND");
    let (status, _) = send(
        &h.app,
        "POST",
        &format!("{}/cancel", order_uri),
        Some(&stranger),
        Some(json!({ "reason": "not mine" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &h.app,
        "PUT",
        &format!("{}/status", order_uri),
        Some(&owner),
        Some(json!({ "status": "processing", "reason": "skip payment" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &h.app,
        "POST",
        &format!("{}/refund", order_uri),
        Some(&owner),
        Some(json!({ "reason": "free money" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &h.app,
        "POST",
        "/orders/batch-update-status",
        Some(&owner),
        Some(json!({
            "order_ids": [order_id],
            "target_status": "completed",
            "reason": "bulk"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = send(
        &h.app,
        "POST",
        &format!("{}/cancel", order_uri),
        Some(&owner),
        Some(json!({ "reason": "changed my mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, order) = send(&h.app, "GET", &order_uri, Some(&merchant), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "cancelled");
}
