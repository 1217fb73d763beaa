pub mod models;
pub mod repository;
pub mod memory;
pub mod notify;
pub mod state_machine;
pub mod lifecycle;
pub mod monitor;

pub use models::{
    BatchFailure, BatchResult, NewOrder, Order, OrderItem, OrderStatusHistory, OrderTimeoutConfig,
    PayOrder, PaymentInfo, StatusChange, TimeoutDefaults,
};
pub use repository::{MerchantScope, OrderRepository, StaleQuery, TimeoutConfigRepository};
pub use memory::{InMemoryOrderRepository, InMemoryTimeoutConfigRepository};
pub use notify::{
    DispatcherStats, NotificationDispatcher, NotificationGateway, NotificationJob,
    TracingNotificationGateway,
};
pub use state_machine::{OrderStatusStateMachine, MAX_BATCH_ORDERS};
pub use lifecycle::OrderLifecycle;
pub use monitor::{MonitorSettings, OrderTimeoutMonitor, ScanReport};
