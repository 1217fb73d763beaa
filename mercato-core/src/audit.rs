use async_trait::async_trait;
use uuid::Uuid;

use crate::CoreResult;

/// Receives tenant access records. Failures are logged by callers and never fail the
/// operation being audited.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_tenant_access(
        &self,
        tenant_id: Uuid,
        resource: &str,
        action: &str,
        details: serde_json::Value,
    ) -> CoreResult<()>;
}

/// Writes audit records as `tracing` events under the `audit` target.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_tenant_access(
        &self,
        tenant_id: Uuid,
        resource: &str,
        action: &str,
        details: serde_json::Value,
    ) -> CoreResult<()> {
        tracing::info!(
            target: "audit",
            %tenant_id,
            resource,
            action,
            details = %details,
            "tenant access"
        );
        Ok(())
    }
}

/// Fire an audit record and swallow the failure.
pub async fn record(
    sink: &dyn AuditSink,
    tenant_id: Uuid,
    resource: &str,
    action: &str,
    details: serde_json::Value,
) {
    if let Err(e) = sink.log_tenant_access(tenant_id, resource, action, details).await {
        tracing::warn!(%tenant_id, resource, action, "audit sink failed: {}", e);
    }
}
