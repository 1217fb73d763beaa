pub mod tenant;

pub use tenant::{require_staff, tenant_context_middleware, TenantClaims};
