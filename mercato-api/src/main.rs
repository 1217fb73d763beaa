use std::net::SocketAddr;
use std::sync::Arc;

use mercato_api::{app, AppState, AuthConfig, Collaborators, Repositories};
use mercato_core::MonitorLease;
use mercato_order::NotificationGateway;
use mercato_store::{
    Config, DbClient, PgFundRepository, PgInventoryRepository, PgOrderRepository,
    PgTimeoutConfigRepository, RedisMonitorLease,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mercato_api=debug,mercato_order=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting Mercato API on port {}", config.server.port);

    let repos = match config.database.url.as_deref() {
        Some(url) => {
            let db = DbClient::new(url).await?;
            db.migrate().await?;
            let orders = Arc::new(PgOrderRepository::new(db.pool.clone()));
            Repositories {
                orders: orders.clone(),
                tenants: orders,
                timeout_configs: Arc::new(PgTimeoutConfigRepository::new(db.pool.clone())),
                funds: Arc::new(PgFundRepository::new(db.pool.clone())),
                inventory: Arc::new(PgInventoryRepository::new(db.pool.clone())),
            }
        }
        None => {
            tracing::warn!("No database configured, using in-memory repositories");
            Repositories::in_memory()
        }
    };

    let mut collaborators = Collaborators::default();
    if let Some(url) = config.redis.url.as_deref() {
        let lease: Arc<dyn MonitorLease> = Arc::new(RedisMonitorLease::new(url)?);
        collaborators.lease = lease;
    } else {
        tracing::warn!("No redis configured, timeout monitor lease is process-local");
    }
    if let Some(gateway) = notification_gateway(&config)? {
        collaborators.gateway = gateway;
    }

    let state = AppState::build(
        repos,
        collaborators,
        config.monitor.settings(),
        config.notifications.queue_capacity,
        config.notifications.workers,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    )?;

    state.monitor.start().await?;

    let monitor = state.monitor.clone();
    let dispatcher = state.dispatcher.clone();
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = monitor.stop().await {
        tracing::debug!("monitor already stopped: {}", e);
    }
    dispatcher.shutdown().await;
    tracing::info!("Mercato API stopped");
    Ok(())
}

#[cfg(feature = "kafka")]
fn notification_gateway(config: &Config) -> anyhow::Result<Option<Arc<dyn NotificationGateway>>> {
    let Some(brokers) = config.kafka.brokers.as_deref() else {
        return Ok(None);
    };
    let producer = mercato_store::EventProducer::new(brokers)?;
    Ok(Some(Arc::new(mercato_store::KafkaNotificationGateway::new(producer))))
}

#[cfg(not(feature = "kafka"))]
fn notification_gateway(_config: &Config) -> anyhow::Result<Option<Arc<dyn NotificationGateway>>> {
    Ok(None)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
