use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mercato_core::{CoreError, CoreResult, OrderStatus, TenantContext, TenantDirectory};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Order, OrderStatusHistory, OrderTimeoutConfig};
use crate::repository::{OrderRepository, StaleQuery, TimeoutConfigRepository};

#[derive(Default)]
struct OrderState {
    orders: HashMap<Uuid, Order>,
    history: Vec<OrderStatusHistory>,
    /// Order id to the start of the stall last warned about.
    warned: HashMap<Uuid, DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    state: RwLock<OrderState>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(
        &self,
        ctx: &TenantContext,
        order: &Order,
        history: &OrderStatusHistory,
    ) -> CoreResult<()> {
        ctx.ensure_valid()?;
        if order.tenant_id != ctx.tenant_id() || history.tenant_id != ctx.tenant_id() {
            return Err(CoreError::InvalidTenantContext("order tenant mismatch".to_string()));
        }
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id) {
            return Err(CoreError::Validation(format!("order {} already exists", order.id)));
        }
        state.orders.insert(order.id, order.clone());
        state.history.push(history.clone());
        Ok(())
    }

    async fn get_by_id(&self, ctx: &TenantContext, order_id: Uuid) -> CoreResult<Order> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        state
            .orders
            .get(&order_id)
            .filter(|o| o.tenant_id == ctx.tenant_id())
            .cloned()
            .ok_or(CoreError::OrderNotFound(order_id))
    }

    async fn update_status_with_history(
        &self,
        ctx: &TenantContext,
        expected: OrderStatus,
        order: &Order,
        history: &OrderStatusHistory,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let stored = state
            .orders
            .get_mut(&order.id)
            .filter(|o| o.tenant_id == ctx.tenant_id())
            .ok_or(CoreError::OrderNotFound(order.id))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = order.clone();
        state.history.push(history.clone());
        Ok(true)
    }

    async fn list_history(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> CoreResult<Vec<OrderStatusHistory>> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        if !state
            .orders
            .get(&order_id)
            .is_some_and(|o| o.tenant_id == ctx.tenant_id())
        {
            return Err(CoreError::OrderNotFound(order_id));
        }
        Ok(state
            .history
            .iter()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn find_stale(&self, ctx: &TenantContext, query: &StaleQuery) -> CoreResult<Vec<Order>> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                o.tenant_id == ctx.tenant_id()
                    && o.status == query.status
                    && o.status_changed_at <= query.changed_before
                    && query.merchants.contains(o.merchant_id)
                    && !(query.unwarned_only
                        && state.warned.get(&o.id) == Some(&o.status_changed_at))
            })
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.status_changed_at);
        stale.truncate(query.limit);
        Ok(stale)
    }

    async fn mark_timeout_warned(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        stalled_since: DateTime<Utc>,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get(&order_id)
            .filter(|o| o.tenant_id == ctx.tenant_id())
            .ok_or(CoreError::OrderNotFound(order_id))?;
        if order.status_changed_at != stalled_since
            || state.warned.get(&order_id) == Some(&stalled_since)
        {
            return Ok(false);
        }
        state.warned.insert(order_id, stalled_since);
        Ok(true)
    }
}

/// Tenants holding orders the timeout monitor may still act on.
#[async_trait]
impl TenantDirectory for InMemoryOrderRepository {
    async fn active_tenants(&self) -> CoreResult<Vec<Uuid>> {
        let state = self.state.read().await;
        let tenants: BTreeSet<Uuid> = state
            .orders
            .values()
            .filter(|o| matches!(o.status, OrderStatus::Pending | OrderStatus::Processing))
            .map(|o| o.tenant_id)
            .collect();
        Ok(tenants.into_iter().collect())
    }
}

#[derive(Default)]
pub struct InMemoryTimeoutConfigRepository {
    configs: RwLock<HashMap<(Uuid, Option<Uuid>), OrderTimeoutConfig>>,
}

impl InMemoryTimeoutConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeoutConfigRepository for InMemoryTimeoutConfigRepository {
    async fn list(&self, ctx: &TenantContext) -> CoreResult<Vec<OrderTimeoutConfig>> {
        ctx.ensure_valid()?;
        let configs = self.configs.read().await;
        Ok(configs
            .values()
            .filter(|c| c.tenant_id == ctx.tenant_id())
            .cloned()
            .collect())
    }

    async fn upsert(&self, ctx: &TenantContext, config: &OrderTimeoutConfig) -> CoreResult<()> {
        ctx.ensure_valid()?;
        if config.tenant_id != ctx.tenant_id() {
            return Err(CoreError::InvalidTenantContext("config tenant mismatch".to_string()));
        }
        if config.payment_timeout_minutes <= 0 || config.processing_timeout_hours <= 0 {
            return Err(CoreError::Validation("timeouts must be positive".to_string()));
        }
        self.configs
            .write()
            .await
            .insert((config.tenant_id, config.merchant_id), config.clone());
        Ok(())
    }
}
