use chrono::{DateTime, Utc};
use mercato_core::{
    Clock, CoreError, CoreResult, MonitorLease, OrderStatus, TenantContext, TenantDirectory,
};
use mercato_shared::models::events::OrderTimeoutWarningEvent;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::lifecycle::OrderLifecycle;
use crate::models::{Order, StatusChange, TimeoutDefaults};
use crate::notify::{NotificationDispatcher, NotificationJob};
use crate::repository::{MerchantScope, OrderRepository, StaleQuery, TimeoutConfigRepository};

pub const PAYMENT_TIMEOUT_REASON: &str = "订单支付超时自动取消";
pub const PROCESSING_TIMEOUT_REASON: &str = "订单处理超时自动完成";

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub lease_ttl: Duration,
    /// Per tenant, per merchant policy, per status, per pass.
    pub scan_limit: usize,
    pub defaults: TimeoutDefaults,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(120),
            scan_limit: 500,
            defaults: TimeoutDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub cancelled: usize,
    pub completed: usize,
    pub warned: usize,
    pub failed: usize,
}

impl ScanReport {
    pub fn transitions(&self) -> usize {
        self.cancelled + self.completed
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives stalled orders through the state machine.
///
/// A pass is idempotent: an order it moves no longer matches the stale query, and an order
/// moved concurrently by someone else fails the state machine's transition check.
pub struct OrderTimeoutMonitor {
    lifecycle: Arc<OrderLifecycle>,
    orders: Arc<dyn OrderRepository>,
    configs: Arc<dyn TimeoutConfigRepository>,
    tenants: Arc<dyn TenantDirectory>,
    lease: Arc<dyn MonitorLease>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    holder_id: String,
    running: Mutex<Option<Running>>,
    last_report: RwLock<Option<ScanReport>>,
}

impl OrderTimeoutMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lifecycle: Arc<OrderLifecycle>,
        orders: Arc<dyn OrderRepository>,
        configs: Arc<dyn TimeoutConfigRepository>,
        tenants: Arc<dyn TenantDirectory>,
        lease: Arc<dyn MonitorLease>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            lifecycle,
            orders,
            configs,
            tenants,
            lease,
            dispatcher,
            clock,
            settings,
            holder_id: format!("monitor-{}", Uuid::new_v4()),
            running: Mutex::new(None),
            last_report: RwLock::new(None),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn last_report(&self) -> Option<ScanReport> {
        self.last_report.read().ok().and_then(|guard| *guard)
    }

    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoreError::AlreadyRunning);
        }

        let (shutdown, mut stop_rx) = watch::channel(false);
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.tick().await,
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = monitor.lease.release(&monitor.holder_id).await {
                tracing::warn!("failed to release monitor lease: {}", e);
            }
            tracing::info!("order timeout monitor stopped");
        });

        *running = Some(Running { shutdown, handle });
        tracing::info!(
            holder_id = %self.holder_id,
            interval_secs = self.settings.interval.as_secs(),
            "order timeout monitor started"
        );
        Ok(())
    }

    pub async fn stop(&self) -> CoreResult<()> {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            return Err(CoreError::NotRunning);
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!("order timeout monitor task failed: {}", e);
        }
        Ok(())
    }

    async fn tick(&self) {
        match self
            .lease
            .try_acquire(&self.holder_id, self.settings.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("monitor lease held elsewhere, skipping pass");
                return;
            }
            Err(e) => {
                tracing::warn!("monitor lease check failed, skipping pass: {}", e);
                return;
            }
        }

        if let Err(e) = self.process_timeout_orders(self.clock.now()).await {
            tracing::error!("timeout scan failed: {}", e);
        }
    }

    /// One pass over every active tenant.
    pub async fn process_timeout_orders(&self, now: DateTime<Utc>) -> CoreResult<ScanReport> {
        let mut report = ScanReport::default();
        for tenant_id in self.tenants.active_tenants().await? {
            let ctx = match TenantContext::system(tenant_id) {
                Ok(ctx) => ctx,
                Err(e) => {
                    tracing::error!(%tenant_id, "skipping tenant: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.scan_tenant(&ctx, now, &mut report).await {
                tracing::error!(%tenant_id, "timeout scan for tenant failed: {}", e);
            }
        }

        if let Ok(mut last) = self.last_report.write() {
            *last = Some(report);
        }
        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                cancelled = report.cancelled,
                completed = report.completed,
                warned = report.warned,
                failed = report.failed,
                "timeout scan finished"
            );
        }
        Ok(report)
    }

    async fn scan_tenant(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> CoreResult<()> {
        let configs = self.configs.list(ctx).await?;
        let defaults = self.settings.defaults;

        // Each policy gets its own exact cutoff so the limit never cuts off orders that are
        // already overdue under another merchant's policy.
        let overridden: Vec<Uuid> = configs.iter().filter_map(|c| c.merchant_id).collect();
        let mut groups: Vec<(MerchantScope, TimeoutDefaults)> = overridden
            .iter()
            .map(|&m| (MerchantScope::Only(m), defaults.resolve(&configs, m)))
            .collect();
        groups.push((
            MerchantScope::Except(overridden),
            defaults.tenant_default(&configs),
        ));

        for (scope, policy) in groups {
            if let Err(e) = self.scan_group(ctx, now, &scope, policy, report).await {
                tracing::error!(
                    tenant_id = %ctx.tenant_id(),
                    scope = ?scope,
                    "timeout scan for merchant group failed: {}",
                    e
                );
            }
        }
        Ok(())
    }

    async fn scan_group(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
        scope: &MerchantScope,
        policy: TimeoutDefaults,
        report: &mut ScanReport,
    ) -> CoreResult<()> {
        let pending = self
            .orders
            .find_stale(
                ctx,
                &StaleQuery {
                    status: OrderStatus::Pending,
                    changed_before: now - policy.payment_timeout(),
                    merchants: scope.clone(),
                    unwarned_only: false,
                    limit: self.settings.scan_limit,
                },
            )
            .await?;
        for order in pending {
            report.scanned += 1;
            self.cancel_unpaid(ctx, &order, report).await;
        }

        let processing = self
            .orders
            .find_stale(
                ctx,
                &StaleQuery {
                    status: OrderStatus::Processing,
                    changed_before: now - policy.processing_timeout(),
                    merchants: scope.clone(),
                    unwarned_only: !policy.auto_complete_enabled,
                    limit: self.settings.scan_limit,
                },
            )
            .await?;
        for order in processing {
            report.scanned += 1;
            if policy.auto_complete_enabled {
                self.complete_stalled(ctx, &order, report).await;
            } else {
                self.warn_stalled(ctx, &order, policy, report).await;
            }
        }
        Ok(())
    }

    /// Warns once per stall.
    async fn warn_stalled(
        &self,
        ctx: &TenantContext,
        order: &Order,
        policy: TimeoutDefaults,
        report: &mut ScanReport,
    ) {
        match self
            .orders
            .mark_timeout_warned(ctx, order.id, order.status_changed_at)
            .await
        {
            Ok(true) => {
                self.dispatcher.dispatch(NotificationJob::TimeoutWarning {
                    ctx: ctx.clone(),
                    warning: OrderTimeoutWarningEvent {
                        tenant_id: ctx.tenant_id(),
                        order_id: order.id,
                        merchant_id: order.merchant_id,
                        status: order.status,
                        stalled_since: order.status_changed_at,
                        timeout_hours: policy.processing_timeout_hours,
                    },
                });
                report.warned += 1;
            }
            Ok(false) => {}
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    tenant_id = %ctx.tenant_id(),
                    order_id = %order.id,
                    "failed to record timeout warning: {}",
                    e
                );
            }
        }
    }

    async fn cancel_unpaid(&self, ctx: &TenantContext, order: &Order, report: &mut ScanReport) {
        let change = StatusChange::new(OrderStatus::Cancelled, PAYMENT_TIMEOUT_REASON)
            .with_metadata(serde_json::json!({ "trigger": "payment_timeout" }));
        match self.lifecycle.transition(ctx, order.id, change).await {
            Ok(_) => report.cancelled += 1,
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    tenant_id = %ctx.tenant_id(),
                    order_id = %order.id,
                    "failed to cancel unpaid order: {}",
                    e
                );
            }
        }
    }

    async fn complete_stalled(&self, ctx: &TenantContext, order: &Order, report: &mut ScanReport) {
        let change = StatusChange::new(OrderStatus::Completed, PROCESSING_TIMEOUT_REASON)
            .with_metadata(serde_json::json!({ "trigger": "processing_timeout" }));
        match self.lifecycle.transition(ctx, order.id, change).await {
            Ok(_) => report.completed += 1,
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    tenant_id = %ctx.tenant_id(),
                    order_id = %order.id,
                    "failed to auto-complete order: {}",
                    e
                );
            }
        }
    }
}
