use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use mercato_core::{OperatorType, TenantContext};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// Claims issued by the identity service. `role` is the operator type.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TenantClaims {
    pub sub: String,
    pub tenant_id: Uuid,
    pub role: String,
    pub exp: usize,
}

impl TenantClaims {
    pub fn into_context(self) -> Result<TenantContext, AppError> {
        let operator_type = self
            .role
            .parse::<OperatorType>()
            .map_err(|_| AppError::Unauthorized(format!("unknown role: {}", self.role)))?;
        let actor_id = match operator_type {
            OperatorType::System => None,
            _ => Some(self.sub),
        };
        TenantContext::new(self.tenant_id, operator_type, actor_id)
            .map_err(|e| AppError::Unauthorized(e.to_string()))
    }
}

// ============================================================================
// Tenant Context Middleware
// ============================================================================

/// Verifies the bearer token and puts a `TenantContext` into the request extensions.
pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    let token_data = decode::<TenantClaims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {}", e)))?;

    let ctx = token_data.claims.into_context()?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Process-wide operations are not open to customers.
pub fn require_staff(ctx: &TenantContext) -> Result<(), AppError> {
    if ctx.operator_type() == OperatorType::Customer {
        return Err(AppError::Forbidden("customers cannot perform this operation".to_string()));
    }
    Ok(())
}
