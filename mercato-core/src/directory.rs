use async_trait::async_trait;
use uuid::Uuid;

use crate::CoreResult;

/// Tenants the background monitor should visit. Backed by durable storage so the list
/// survives restarts.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn active_tenants(&self) -> CoreResult<Vec<Uuid>>;
}
