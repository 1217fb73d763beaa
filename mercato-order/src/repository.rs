use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mercato_core::{CoreResult, OrderStatus, TenantContext};
use uuid::Uuid;

use crate::models::{Order, OrderStatusHistory, OrderTimeoutConfig};

/// Tenant-scoped order storage. A row of another tenant is reported as missing.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order together with its creation history row.
    async fn insert(
        &self,
        ctx: &TenantContext,
        order: &Order,
        history: &OrderStatusHistory,
    ) -> CoreResult<()>;

    async fn get_by_id(&self, ctx: &TenantContext, order_id: Uuid) -> CoreResult<Order>;

    /// Replaces the stored order only while its status is still `expected`, appending
    /// `history` in the same unit. Returns `false` when the status moved.
    async fn update_status_with_history(
        &self,
        ctx: &TenantContext,
        expected: OrderStatus,
        order: &Order,
        history: &OrderStatusHistory,
    ) -> CoreResult<bool>;

    /// Oldest first.
    async fn list_history(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> CoreResult<Vec<OrderStatusHistory>>;

    /// Orders matching `query`, oldest status change first.
    async fn find_stale(&self, ctx: &TenantContext, query: &StaleQuery) -> CoreResult<Vec<Order>>;

    /// Records that the stall which began at `stalled_since` has been warned about.
    /// `false` when the order changed status since, or the stall was already recorded.
    async fn mark_timeout_warned(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        stalled_since: DateTime<Utc>,
    ) -> CoreResult<bool>;
}

/// Which merchants a stale-order query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerchantScope {
    Only(Uuid),
    Except(Vec<Uuid>),
}

impl MerchantScope {
    pub fn contains(&self, merchant_id: Uuid) -> bool {
        match self {
            MerchantScope::Only(id) => *id == merchant_id,
            MerchantScope::Except(ids) => !ids.contains(&merchant_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaleQuery {
    pub status: OrderStatus,
    /// Inclusive bound on `status_changed_at`.
    pub changed_before: DateTime<Utc>,
    pub merchants: MerchantScope,
    /// Skip orders whose current stall was already warned about.
    pub unwarned_only: bool,
    pub limit: usize,
}

#[async_trait]
pub trait TimeoutConfigRepository: Send + Sync {
    /// Every row of the tenant, tenant default included.
    async fn list(&self, ctx: &TenantContext) -> CoreResult<Vec<OrderTimeoutConfig>>;

    async fn upsert(&self, ctx: &TenantContext, config: &OrderTimeoutConfig) -> CoreResult<()>;
}
