use async_trait::async_trait;
use mercato_core::{CoreError, CoreResult, TenantContext};
use mercato_order::notify::status_changed_event;
use mercato_order::{NotificationGateway, Order, OrderStatusHistory};
use mercato_shared::models::events::OrderTimeoutWarningEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

pub const ORDER_STATUS_CHANGED_TOPIC: &str = "order.status_changed";
pub const ORDER_TIMEOUT_WARNING_TOPIC: &str = "order.timeout_warning";

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Publishes order notifications as JSON integration events keyed by order id.
pub struct KafkaNotificationGateway {
    producer: EventProducer,
}

impl KafkaNotificationGateway {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }

    async fn send<T: serde::Serialize>(&self, topic: &str, key: &str, event: &T) -> CoreResult<()> {
        let payload = serde_json::to_string(event).map_err(|e| CoreError::Validation(e.to_string()))?;
        self.producer
            .publish(topic, key, &payload)
            .await
            .map_err(|e| CoreError::Storage(format!("publish to {} failed: {}", topic, e)))
    }
}

#[async_trait]
impl NotificationGateway for KafkaNotificationGateway {
    async fn send_order_status_changed_notification(
        &self,
        _ctx: &TenantContext,
        order: &Order,
        entry: &OrderStatusHistory,
    ) -> CoreResult<()> {
        let event = status_changed_event(order, entry);
        self.send(ORDER_STATUS_CHANGED_TOPIC, &order.id.to_string(), &event).await
    }

    async fn send_order_timeout_warning(
        &self,
        _ctx: &TenantContext,
        warning: &OrderTimeoutWarningEvent,
    ) -> CoreResult<()> {
        self.send(ORDER_TIMEOUT_WARNING_TOPIC, &warning.order_id.to_string(), warning).await
    }
}
