use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mercato_core::CoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "INVALID_TENANT_CONTEXT"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            AppError::Core(err) => {
                let status = match err {
                    CoreError::InvalidTransition { .. }
                    | CoreError::InvalidReservationState { .. }
                    | CoreError::ConcurrentModification(_)
                    | CoreError::AlreadyRunning
                    | CoreError::NotRunning => StatusCode::CONFLICT,
                    CoreError::OrderNotFound(_)
                    | CoreError::FundNotFound(_)
                    | CoreError::ProductNotFound(_)
                    | CoreError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
                    CoreError::InvalidTenantContext(_) => StatusCode::UNAUTHORIZED,
                    CoreError::InsufficientBalance { .. } | CoreError::InsufficientStock { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    CoreError::OperatorRequired
                    | CoreError::InvalidAmount(_)
                    | CoreError::BatchLimitExceeded(_)
                    | CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal Server Error: {}", self);
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
