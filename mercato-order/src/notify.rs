use async_trait::async_trait;
use mercato_core::{CoreResult, TenantContext};
use mercato_shared::models::events::{OrderStatusChangedEvent, OrderTimeoutWarningEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{Order, OrderStatusHistory};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_WORKERS: usize = 4;

/// Outbound notifications. Owned by the messaging service; called, never awaited by the
/// code path that changed the order.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send_order_status_changed_notification(
        &self,
        ctx: &TenantContext,
        order: &Order,
        entry: &OrderStatusHistory,
    ) -> CoreResult<()>;

    async fn send_order_timeout_warning(
        &self,
        ctx: &TenantContext,
        warning: &OrderTimeoutWarningEvent,
    ) -> CoreResult<()>;
}

/// Builds the integration event for a history row.
pub fn status_changed_event(order: &Order, entry: &OrderStatusHistory) -> OrderStatusChangedEvent {
    OrderStatusChangedEvent {
        tenant_id: order.tenant_id,
        order_id: order.id,
        merchant_id: order.merchant_id,
        customer_id: order.customer_id,
        from_status: entry.from_status,
        to_status: entry.to_status,
        reason: entry.reason.clone(),
        operator_type: entry.operator_type,
        operator_id: entry.operator_id.clone(),
        changed_at: entry.created_at,
    }
}

pub struct TracingNotificationGateway;

#[async_trait]
impl NotificationGateway for TracingNotificationGateway {
    async fn send_order_status_changed_notification(
        &self,
        ctx: &TenantContext,
        order: &Order,
        entry: &OrderStatusHistory,
    ) -> CoreResult<()> {
        let event = status_changed_event(order, entry);
        tracing::info!(
            target: "notifications",
            tenant_id = %ctx.tenant_id(),
            order_id = %event.order_id,
            to = %event.to_status,
            payload = %serde_json::to_string(&event).unwrap_or_default(),
            "order status changed"
        );
        Ok(())
    }

    async fn send_order_timeout_warning(
        &self,
        ctx: &TenantContext,
        warning: &OrderTimeoutWarningEvent,
    ) -> CoreResult<()> {
        tracing::warn!(
            target: "notifications",
            tenant_id = %ctx.tenant_id(),
            order_id = %warning.order_id,
            merchant_id = %warning.merchant_id,
            stalled_since = %warning.stalled_since,
            "order exceeded its processing timeout"
        );
        Ok(())
    }
}

/// A queued notification. Carries its own tenant context so it outlives the request.
#[derive(Debug, Clone)]
pub enum NotificationJob {
    StatusChanged {
        ctx: TenantContext,
        order: Order,
        entry: OrderStatusHistory,
    },
    TimeoutWarning {
        ctx: TenantContext,
        warning: OrderTimeoutWarningEvent,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Bounded queue in front of a `NotificationGateway`, drained by a fixed worker pool.
///
/// `dispatch` never waits. When the queue is full the job is counted as dropped.
pub struct NotificationDispatcher {
    sender: Mutex<Option<mpsc::Sender<NotificationJob>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Spawns the workers; must be called inside a tokio runtime.
    pub fn new(gateway: Arc<dyn NotificationGateway>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let gateway = gateway.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        deliver(gateway.as_ref(), &counters, job).await;
                    }
                    tracing::debug!(worker, "notification worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: tokio::sync::Mutex::new(handles),
            counters,
        }
    }

    pub fn with_defaults(gateway: Arc<dyn NotificationGateway>) -> Self {
        Self::new(gateway, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS)
    }

    pub fn dispatch(&self, job: NotificationJob) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(sender) = sender else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("notification dropped: dispatcher is shut down");
            return;
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("notification dropped: queue is full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("notification dropped: queue is closed");
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue and waits until every queued job has been handled.
    pub async fn shutdown(&self) {
        match self.sender.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("notification worker panicked: {}", e);
            }
        }
    }
}

async fn deliver(gateway: &dyn NotificationGateway, counters: &Counters, job: NotificationJob) {
    let result = match &job {
        NotificationJob::StatusChanged { ctx, order, entry } => {
            gateway
                .send_order_status_changed_notification(ctx, order, entry)
                .await
        }
        NotificationJob::TimeoutWarning { ctx, warning } => {
            gateway.send_order_timeout_warning(ctx, warning).await
        }
    };

    match result {
        Ok(()) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            let (tenant_id, order_id) = match &job {
                NotificationJob::StatusChanged { ctx, order, .. } => (ctx.tenant_id(), order.id),
                NotificationJob::TimeoutWarning { ctx, warning } => (ctx.tenant_id(), warning.order_id),
            };
            tracing::warn!(%tenant_id, %order_id, "notification delivery failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mercato_core::{CoreError, OrderStatus};
    use uuid::Uuid;

    struct FailingGateway;

    #[async_trait]
    impl NotificationGateway for FailingGateway {
        async fn send_order_status_changed_notification(
            &self,
            _ctx: &TenantContext,
            _order: &Order,
            _entry: &OrderStatusHistory,
        ) -> CoreResult<()> {
            Err(CoreError::Storage("smtp down".to_string()))
        }

        async fn send_order_timeout_warning(
            &self,
            _ctx: &TenantContext,
            _warning: &OrderTimeoutWarningEvent,
        ) -> CoreResult<()> {
            Err(CoreError::Storage("smtp down".to_string()))
        }
    }

    fn warning_job() -> NotificationJob {
        let tenant_id = Uuid::new_v4();
        NotificationJob::TimeoutWarning {
            ctx: TenantContext::system(tenant_id).unwrap(),
            warning: OrderTimeoutWarningEvent {
                tenant_id,
                order_id: Uuid::new_v4(),
                merchant_id: Uuid::new_v4(),
                status: OrderStatus::Processing,
                stalled_since: Utc::now(),
                timeout_hours: 72,
            },
        }
    }

    #[tokio::test]
    async fn test_jobs_are_delivered_before_shutdown_returns() {
        let dispatcher = NotificationDispatcher::new(Arc::new(TracingNotificationGateway), 16, 2);
        for _ in 0..5 {
            dispatcher.dispatch(warning_job());
        }
        dispatcher.shutdown().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.enqueued, 5);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_gateway_failures_are_counted() {
        let dispatcher = NotificationDispatcher::new(Arc::new(FailingGateway), 16, 1);
        dispatcher.dispatch(warning_job());
        dispatcher.shutdown().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        // Single-threaded runtime: the worker cannot drain until this test yields.
        let dispatcher = NotificationDispatcher::new(Arc::new(TracingNotificationGateway), 1, 1);
        for _ in 0..5 {
            dispatcher.dispatch(warning_job());
        }
        let stats = dispatcher.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dropped, 4);

        dispatcher.shutdown().await;
        assert_eq!(dispatcher.stats().delivered, 1);

        dispatcher.dispatch(warning_job());
        assert_eq!(dispatcher.stats().dropped, 5);
    }
}
