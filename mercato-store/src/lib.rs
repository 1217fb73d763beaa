pub mod app_config;
pub mod database;
pub mod order_repo;
pub mod fund_repo;
pub mod inventory_repo;
pub mod redis_repo;
#[cfg(feature = "kafka")]
pub mod events;

pub use app_config::Config;
pub use database::DbClient;
pub use order_repo::{PgOrderRepository, PgTimeoutConfigRepository};
pub use fund_repo::PgFundRepository;
pub use inventory_repo::PgInventoryRepository;
pub use redis_repo::RedisMonitorLease;
#[cfg(feature = "kafka")]
pub use events::{EventProducer, KafkaNotificationGateway};
