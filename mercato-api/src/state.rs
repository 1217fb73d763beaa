use std::sync::Arc;

use mercato_catalog::{InMemoryInventoryRepository, InventoryRepository, InventoryReservationManager};
use mercato_core::{
    AuditSink, Clock, LocalLease, MonitorLease, SystemClock, TenantDirectory, TracingAuditSink,
};
use mercato_finance::{FundLedger, FundRepository, InMemoryFundRepository};
use mercato_order::{
    InMemoryOrderRepository, InMemoryTimeoutConfigRepository, MonitorSettings,
    NotificationDispatcher, NotificationGateway, OrderLifecycle, OrderRepository,
    OrderStatusStateMachine, OrderTimeoutMonitor, TimeoutConfigRepository,
    TracingNotificationGateway,
};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

/// Storage behind the services; Postgres or in-memory.
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    /// Usually the order store itself.
    pub tenants: Arc<dyn TenantDirectory>,
    pub timeout_configs: Arc<dyn TimeoutConfigRepository>,
    pub funds: Arc<dyn FundRepository>,
    pub inventory: Arc<dyn InventoryRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        let orders = Arc::new(InMemoryOrderRepository::new());
        Self {
            orders: orders.clone(),
            tenants: orders,
            timeout_configs: Arc::new(InMemoryTimeoutConfigRepository::new()),
            funds: Arc::new(InMemoryFundRepository::new()),
            inventory: Arc::new(InMemoryInventoryRepository::new()),
        }
    }
}

/// Outbound collaborators the services call.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn NotificationGateway>,
    pub lease: Arc<dyn MonitorLease>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            gateway: Arc::new(TracingNotificationGateway),
            lease: Arc::new(LocalLease),
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
    pub ledger: Arc<FundLedger>,
    pub inventory: Arc<InventoryReservationManager>,
    pub monitor: Arc<OrderTimeoutMonitor>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub timeout_configs: Arc<dyn TimeoutConfigRepository>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
}

impl AppState {
    /// Wires the services. Spawns the notification workers, so it needs a running runtime.
    pub fn build(
        repos: Repositories,
        collaborators: Collaborators,
        settings: MonitorSettings,
        queue_capacity: usize,
        workers: usize,
        auth: AuthConfig,
    ) -> Result<Self, prometheus::Error> {
        let Collaborators {
            gateway,
            lease,
            audit,
            clock,
        } = collaborators;

        let dispatcher = Arc::new(NotificationDispatcher::new(gateway, queue_capacity, workers));
        let inventory = Arc::new(InventoryReservationManager::new(
            repos.inventory,
            clock.clone(),
            audit.clone(),
        ));
        let ledger = Arc::new(FundLedger::new(repos.funds, clock.clone(), audit.clone()));
        let machine = Arc::new(OrderStatusStateMachine::new(
            repos.orders.clone(),
            dispatcher.clone(),
            audit,
            clock.clone(),
        ));
        let lifecycle = Arc::new(OrderLifecycle::new(machine, inventory.clone(), ledger.clone()));

        let monitor = Arc::new(OrderTimeoutMonitor::new(
            lifecycle.clone(),
            repos.orders,
            repos.timeout_configs.clone(),
            repos.tenants,
            lease,
            dispatcher.clone(),
            clock,
            settings,
        ));

        Ok(Self {
            lifecycle,
            ledger,
            inventory,
            monitor,
            dispatcher,
            timeout_configs: repos.timeout_configs,
            metrics: Arc::new(Metrics::new()?),
            auth,
        })
    }
}
