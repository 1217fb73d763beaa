use mercato_shared::OperatorType;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Explicit per-call identity. Every repository and service call takes one; nothing is
/// inferred from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Uuid,
    actor_id: Option<String>,
    operator_type: OperatorType,
}

impl TenantContext {
    pub fn new(
        tenant_id: Uuid,
        operator_type: OperatorType,
        actor_id: Option<String>,
    ) -> CoreResult<Self> {
        if tenant_id.is_nil() {
            return Err(CoreError::InvalidTenantContext("tenant id is missing".to_string()));
        }
        let actor_id = actor_id.filter(|id| !id.trim().is_empty());
        Ok(Self {
            tenant_id,
            actor_id,
            operator_type,
        })
    }

    /// Context for background work (timeout monitor, compensations).
    pub fn system(tenant_id: Uuid) -> CoreResult<Self> {
        Self::new(tenant_id, OperatorType::System, None)
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn operator_type(&self) -> OperatorType {
        self.operator_type
    }

    /// Same tenant, system operator. Used for compensating writes.
    pub fn as_system(&self) -> Self {
        Self {
            tenant_id: self.tenant_id,
            actor_id: None,
            operator_type: OperatorType::System,
        }
    }

    /// Fails closed. Repositories call this before touching storage.
    pub fn ensure_valid(&self) -> CoreResult<()> {
        if self.tenant_id.is_nil() {
            return Err(CoreError::InvalidTenantContext("tenant id is missing".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_tenant_is_rejected() {
        let result = TenantContext::new(Uuid::nil(), OperatorType::Merchant, Some("m-1".into()));
        assert!(matches!(result, Err(CoreError::InvalidTenantContext(_))));
        assert!(TenantContext::system(Uuid::nil()).is_err());
    }

    #[test]
    fn test_blank_actor_is_dropped() {
        let ctx = TenantContext::new(Uuid::new_v4(), OperatorType::Customer, Some("  ".into())).unwrap();
        assert_eq!(ctx.actor_id(), None);
    }
}
