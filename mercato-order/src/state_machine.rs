use mercato_core::audit::{self, AuditSink};
use mercato_core::{
    Clock, CoreError, CoreResult, OperatorType, OrderStatus, TenantContext, MAX_CAS_RETRIES,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{BatchResult, Order, OrderStatusHistory, StatusChange};
use crate::notify::{NotificationDispatcher, NotificationJob};
use crate::repository::OrderRepository;

pub const MAX_BATCH_ORDERS: usize = 100;

/// Successors reachable from `status`. Cancelled and Refunded are terminal; Completed only
/// leads to Refunded.
pub fn allowed_successors(status: OrderStatus) -> &'static [OrderStatus] {
    match status {
        OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
        OrderStatus::Paid => &[
            OrderStatus::Processing,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ],
        OrderStatus::Processing => &[OrderStatus::Completed, OrderStatus::Cancelled],
        OrderStatus::Completed => &[OrderStatus::Refunded],
        OrderStatus::Cancelled | OrderStatus::Refunded => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_successors(from).contains(&to)
}

/// Validates and applies transitions on single orders.
///
/// Writes are conditional on the status that was read, so of two concurrent callers
/// only one can move an order out of a given status; the other re-reads and is judged
/// against the new status.
pub struct OrderStatusStateMachine {
    repo: Arc<dyn OrderRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl OrderStatusStateMachine {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        dispatcher: Arc<NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            audit,
            clock,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Persist a freshly built Pending order with its creation history row.
    pub async fn create(&self, ctx: &TenantContext, order: Order) -> CoreResult<Order> {
        ctx.ensure_valid()?;
        if order.status != OrderStatus::Pending {
            return Err(CoreError::Validation("new orders start as pending".to_string()));
        }
        let entry = OrderStatusHistory::record(
            ctx,
            order.id,
            None,
            OrderStatus::Pending,
            "order created",
            serde_json::Value::Null,
            order.created_at,
        );
        self.repo.insert(ctx, &order, &entry).await?;

        tracing::info!(
            tenant_id = %ctx.tenant_id(),
            order_id = %order.id,
            merchant_id = %order.merchant_id,
            total_amount = order.total_amount,
            "order created"
        );
        self.after_change(ctx, &order, entry).await;
        Ok(order)
    }

    pub async fn get(&self, ctx: &TenantContext, order_id: Uuid) -> CoreResult<Order> {
        self.repo.get_by_id(ctx, order_id).await
    }

    pub async fn history(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> CoreResult<Vec<OrderStatusHistory>> {
        self.repo.list_history(ctx, order_id).await
    }

    /// Move one order to `change.target`.
    ///
    /// Re-entering the current status is rejected like any other edge outside the table.
    pub async fn update_status(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        change: StatusChange,
    ) -> CoreResult<Order> {
        ctx.ensure_valid()?;
        if ctx.operator_type() != OperatorType::System && ctx.actor_id().is_none() {
            return Err(CoreError::OperatorRequired);
        }
        if change.reason.trim().is_empty() {
            return Err(CoreError::Validation("a reason is required".to_string()));
        }
        if change.payment.is_some() && change.target != OrderStatus::Paid {
            return Err(CoreError::Validation(
                "payment details only accompany a transition to paid".to_string(),
            ));
        }

        for _ in 0..MAX_CAS_RETRIES {
            let current = self.repo.get_by_id(ctx, order_id).await?;
            if !can_transition(current.status, change.target) {
                return Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: change.target,
                });
            }

            let now = self.clock.now();
            let mut updated = current.clone();
            updated.status = change.target;
            updated.status_changed_at = now;
            updated.updated_at = now;
            if let Some(payment) = &change.payment {
                updated.payment = Some(payment.clone());
            }

            let entry = OrderStatusHistory::record(
                ctx,
                order_id,
                Some(current.status),
                change.target,
                &change.reason,
                change.metadata.clone(),
                now,
            );

            if self
                .repo
                .update_status_with_history(ctx, current.status, &updated, &entry)
                .await?
            {
                tracing::info!(
                    tenant_id = %ctx.tenant_id(),
                    order_id = %order_id,
                    from = %current.status,
                    to = %change.target,
                    operator_type = %ctx.operator_type(),
                    "order status changed"
                );
                self.after_change(ctx, &updated, entry).await;
                return Ok(updated);
            }

            tracing::debug!(order_id = %order_id, "order status moved underneath us, re-reading");
        }

        Err(CoreError::ConcurrentModification(format!(
            "order {} kept changing",
            order_id
        )))
    }

    /// Applies the same change to each id independently.
    pub async fn batch_update_status(
        &self,
        ctx: &TenantContext,
        order_ids: &[Uuid],
        change: StatusChange,
    ) -> CoreResult<BatchResult> {
        check_batch(order_ids)?;
        let mut result = BatchResult::default();
        for order_id in order_ids {
            let outcome = self.update_status(ctx, *order_id, change.clone()).await;
            result.record(*order_id, outcome);
        }
        Ok(result)
    }

    async fn after_change(&self, ctx: &TenantContext, order: &Order, entry: OrderStatusHistory) {
        audit::record(
            self.audit.as_ref(),
            ctx.tenant_id(),
            "order",
            "status_change",
            serde_json::json!({
                "order_id": order.id,
                "from": entry.from_status,
                "to": entry.to_status,
                "reason": entry.reason,
                "operator_type": entry.operator_type,
                "operator_id": entry.operator_id,
            }),
        )
        .await;

        self.dispatcher.dispatch(NotificationJob::StatusChanged {
            ctx: ctx.clone(),
            order: order.clone(),
            entry,
        });
    }
}

pub(crate) fn check_batch(order_ids: &[Uuid]) -> CoreResult<()> {
    if order_ids.is_empty() {
        return Err(CoreError::Validation("no order ids given".to_string()));
    }
    if order_ids.len() > MAX_BATCH_ORDERS {
        return Err(CoreError::BatchLimitExceeded(format!(
            "{} orders exceeds the limit of {}",
            order_ids.len(),
            MAX_BATCH_ORDERS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOrderRepository;
    use crate::models::OrderItem;
    use crate::notify::TracingNotificationGateway;
    use chrono::Utc;
    use mercato_core::{FixedClock, TracingAuditSink};

    struct Fixture {
        machine: Arc<OrderStatusStateMachine>,
        dispatcher: Arc<NotificationDispatcher>,
        ctx: TenantContext,
    }

    fn fixture() -> Fixture {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(TracingNotificationGateway),
            64,
            1,
        ));
        let machine = Arc::new(OrderStatusStateMachine::new(
            Arc::new(InMemoryOrderRepository::new()),
            dispatcher.clone(),
            Arc::new(TracingAuditSink),
            Arc::new(FixedClock::new(Utc::now())),
        ));
        let ctx = TenantContext::new(Uuid::new_v4(), OperatorType::Merchant, Some("m-1".into()))
            .unwrap();
        Fixture {
            machine,
            dispatcher,
            ctx,
        }
    }

    async fn pending_order(f: &Fixture) -> Order {
        let order = Order::new(
            f.ctx.tenant_id(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![OrderItem {
                product_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: 1000,
                unit_rights_cost: 0,
            }],
            f.machine.clock().now(),
        )
        .unwrap();
        f.machine.create(&f.ctx, order).await.unwrap()
    }

    async fn order_in(f: &Fixture, path: &[OrderStatus]) -> Order {
        let mut order = pending_order(f).await;
        for status in path {
            order = f
                .machine
                .update_status(&f.ctx, order.id, StatusChange::new(*status, "setup"))
                .await
                .unwrap();
        }
        order
    }

    fn path_to(status: OrderStatus) -> Vec<OrderStatus> {
        use OrderStatus::*;
        match status {
            Pending => vec![],
            Paid => vec![Paid],
            Processing => vec![Paid, Processing],
            Completed => vec![Paid, Processing, Completed],
            Cancelled => vec![Cancelled],
            Refunded => vec![Paid, Refunded],
        }
    }

    #[tokio::test]
    async fn test_every_edge_succeeds_once() {
        let f = fixture();
        for from in OrderStatus::ALL {
            for to in allowed_successors(from) {
                let order = order_in(&f, &path_to(from)).await;
                let change = StatusChange::new(*to, "edge");

                let updated = f.machine.update_status(&f.ctx, order.id, change.clone()).await.unwrap();
                assert_eq!(updated.status, *to);

                let again = f.machine.update_status(&f.ctx, order.id, change).await;
                assert_eq!(
                    again.unwrap_err(),
                    CoreError::InvalidTransition { from: *to, to: *to },
                    "{} -> {} replay",
                    from,
                    to
                );
            }
        }
    }

    #[tokio::test]
    async fn test_edges_outside_table_are_rejected() {
        let f = fixture();
        let order = pending_order(&f).await;
        for target in [OrderStatus::Processing, OrderStatus::Completed, OrderStatus::Refunded] {
            let err = f
                .machine
                .update_status(&f.ctx, order.id, StatusChange::new(target, "skip ahead"))
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidTransition { .. }));
        }
        assert!(!can_transition(OrderStatus::Cancelled, OrderStatus::Pending));
        assert!(allowed_successors(OrderStatus::Refunded).is_empty());
    }

    #[tokio::test]
    async fn test_history_rows_track_transitions() {
        let f = fixture();
        let order = order_in(&f, &[OrderStatus::Paid, OrderStatus::Processing]).await;

        let history = f.machine.history(&f.ctx, order.id).await.unwrap();
        let steps: Vec<_> = history.iter().map(|h| (h.from_status, h.to_status)).collect();
        assert_eq!(
            steps,
            vec![
                (None, OrderStatus::Pending),
                (Some(OrderStatus::Pending), OrderStatus::Paid),
                (Some(OrderStatus::Paid), OrderStatus::Processing),
            ]
        );
        assert!(history.iter().all(|h| h.operator_id.as_deref() == Some("m-1")));
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_non_system_operator_requires_id() {
        let f = fixture();
        let order = pending_order(&f).await;
        let anonymous = TenantContext::new(f.ctx.tenant_id(), OperatorType::Customer, None).unwrap();

        let err = f
            .machine
            .update_status(&anonymous, order.id, StatusChange::new(OrderStatus::Cancelled, "bye"))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::OperatorRequired);

        let system = f.ctx.as_system();
        let updated = f
            .machine
            .update_status(&system, order.id, StatusChange::new(OrderStatus::Cancelled, "bye"))
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let f = fixture();
        let order = pending_order(&f).await;
        let stranger = TenantContext::new(Uuid::new_v4(), OperatorType::Merchant, Some("m-2".into()))
            .unwrap();
        let err = f
            .machine
            .update_status(&stranger, order.id, StatusChange::new(OrderStatus::Cancelled, "x"))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::OrderNotFound(order.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_transition_has_one_winner() {
        let f = fixture();
        let order = order_in(&f, &[OrderStatus::Paid]).await;

        let a = {
            let machine = f.machine.clone();
            let ctx = f.ctx.clone();
            tokio::spawn(async move {
                machine
                    .update_status(&ctx, order.id, StatusChange::new(OrderStatus::Processing, "a"))
                    .await
            })
        };
        let b = {
            let machine = f.machine.clone();
            let ctx = f.ctx.clone();
            tokio::spawn(async move {
                machine
                    .update_status(&ctx, order.id, StatusChange::new(OrderStatus::Processing, "b"))
                    .await
            })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.into_iter().find_map(|r| r.err()).unwrap();
        assert_eq!(
            loser,
            CoreError::InvalidTransition {
                from: OrderStatus::Processing,
                to: OrderStatus::Processing
            }
        );

        let history = f.machine.history(&f.ctx, order.id).await.unwrap();
        let to_processing = history
            .iter()
            .filter(|h| h.to_status == OrderStatus::Processing)
            .count();
        assert_eq!(to_processing, 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let f = fixture();
        let pending = pending_order(&f).await;
        let cancelled = order_in(&f, &[OrderStatus::Cancelled]).await;
        let ids = vec![pending.id, cancelled.id, Uuid::new_v4()];

        let result = f
            .machine
            .batch_update_status(&f.ctx, &ids, StatusChange::new(OrderStatus::Cancelled, "bulk"))
            .await
            .unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.fail_count, 2);
        let codes: Vec<_> = result.failures.iter().map(|failure| failure.code).collect();
        assert_eq!(codes, vec!["INVALID_TRANSITION", "ORDER_NOT_FOUND"]);
    }

    #[tokio::test]
    async fn test_batch_over_limit_is_rejected() {
        let f = fixture();
        let ids: Vec<Uuid> = (0..=MAX_BATCH_ORDERS).map(|_| Uuid::new_v4()).collect();
        let err = f
            .machine
            .batch_update_status(&f.ctx, &ids, StatusChange::new(OrderStatus::Cancelled, "bulk"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BatchLimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_each_change_is_notified() {
        let f = fixture();
        order_in(&f, &[OrderStatus::Paid, OrderStatus::Processing]).await;
        f.dispatcher.shutdown().await;
        let stats = f.dispatcher.stats();
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.delivered, 3);
    }
}
