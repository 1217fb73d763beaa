use axum::{http::Method, routing::get, Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod finance;
pub mod inventory;
pub mod metrics;
pub mod middleware;
pub mod monitor;
pub mod orders;
pub mod state;

pub use state::{AppState, AuthConfig, Collaborators, Repositories};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Everything below requires a tenant-scoped bearer token.
    let tenant_routes = Router::new()
        .merge(orders::routes())
        .merge(finance::routes())
        .merge(inventory::routes())
        .merge(monitor::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::tenant_context_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(metrics::routes())
        .merge(tenant_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
