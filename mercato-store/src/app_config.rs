use mercato_order::{MonitorSettings, TimeoutDefaults};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// No url means in-memory repositories.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

/// No url means a process-local monitor lease.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
    #[serde(default = "default_payment_timeout_minutes")]
    pub default_payment_timeout_minutes: i64,
    #[serde(default = "default_processing_timeout_hours")]
    pub default_processing_timeout_hours: i64,
    #[serde(default)]
    pub default_auto_complete_enabled: bool,
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

fn default_interval_seconds() -> u64 { 60 }
fn default_lease_ttl_seconds() -> u64 { 120 }
fn default_payment_timeout_minutes() -> i64 { 30 }
fn default_processing_timeout_hours() -> i64 { 72 }
fn default_scan_limit() -> usize { 500 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            lease_ttl_seconds: default_lease_ttl_seconds(),
            default_payment_timeout_minutes: default_payment_timeout_minutes(),
            default_processing_timeout_hours: default_processing_timeout_hours(),
            default_auto_complete_enabled: false,
            scan_limit: default_scan_limit(),
        }
    }
}

impl MonitorConfig {
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.interval_seconds.max(1)),
            lease_ttl: Duration::from_secs(self.lease_ttl_seconds.max(1)),
            scan_limit: self.scan_limit.max(1),
            defaults: TimeoutDefaults {
                payment_timeout_minutes: self.default_payment_timeout_minutes,
                processing_timeout_hours: self.default_processing_timeout_hours,
                auto_complete_enabled: self.default_auto_complete_enabled,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_queue_capacity() -> usize { 1024 }
fn default_workers() -> usize { 4 }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Untracked developer overrides
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `MERCATO__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("MERCATO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_optional_sections_fall_back_to_defaults() {
        let config = parse(
            r#"
            [server]
            port = 8080

            [auth]
            jwt_secret = "secret"
            "#,
        );
        assert!(config.database.url.is_none());
        assert!(config.redis.url.is_none());
        assert_eq!(config.notifications.queue_capacity, 1024);

        let settings = config.monitor.settings();
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert_eq!(settings.scan_limit, 500);
        assert_eq!(settings.defaults, TimeoutDefaults::default());
    }

    #[test]
    fn test_monitor_overrides() {
        let config = parse(
            r#"
            [server]
            port = 8080

            [auth]
            jwt_secret = "secret"

            [monitor]
            interval_seconds = 5
            default_auto_complete_enabled = true
            "#,
        );
        let settings = config.monitor.settings();
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert!(settings.defaults.auto_complete_enabled);
        assert_eq!(settings.defaults.payment_timeout_minutes, 30);
    }
}
