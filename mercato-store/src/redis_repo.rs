use async_trait::async_trait;
use mercato_core::{CoreError, CoreResult, MonitorLease};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_LEASE_KEY: &str = "mercato:monitor:order-timeout";

/// Monitor lease shared through Redis so only one instance scans at a time.
#[derive(Clone)]
pub struct RedisMonitorLease {
    client: redis::Client,
    key: String,
}

fn lease_error(e: redis::RedisError) -> CoreError {
    tracing::error!("redis lease error: {}", e);
    CoreError::Storage(e.to_string())
}

impl RedisMonitorLease {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        Self::with_key(connection_string, DEFAULT_LEASE_KEY)
    }

    pub fn with_key(connection_string: &str, key: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl MonitorLease for RedisMonitorLease {
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> CoreResult<bool> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(lease_error)?;

        // Renew when we already hold it, otherwise SET NX.
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                redis.call("PEXPIRE", KEYS[1], ARGV[2])
                return 1
            end
            if redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2]) then
                return 1
            end
            return 0
        "#,
        );

        let ttl_ms = ttl.as_millis().max(1) as u64;
        let granted: i64 = script
            .key(&self.key)
            .arg(holder)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(lease_error)?;

        debug!(key = %self.key, holder, granted = granted == 1, "monitor lease attempt");
        Ok(granted == 1)
    }

    async fn release(&self, holder: &str) -> CoreResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(lease_error)?;

        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            end
            return 0
        "#,
        );

        let removed: i64 = script
            .key(&self.key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(lease_error)?;

        if removed == 1 {
            info!(key = %self.key, holder, "monitor lease released");
        }
        Ok(())
    }
}
