use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::status::{OperatorType, OrderStatus};

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderStatusChangedEvent {
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub reason: String,
    pub operator_type: OperatorType,
    pub operator_id: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderTimeoutWarningEvent {
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub merchant_id: Uuid,
    pub status: OrderStatus,
    pub stalled_since: DateTime<Utc>,
    pub timeout_hours: i64,
}
