use chrono::{DateTime, Duration, Utc};
use mercato_core::{CoreError, CoreResult, OperatorType, OrderStatus, TenantContext};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The tenant-scoped order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    /// Minor units.
    pub total_amount: i64,
    pub total_rights_cost: i64,
    pub payment: Option<PaymentInfo>,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a Pending order with totals computed from `items`.
    pub fn new(
        tenant_id: Uuid,
        merchant_id: Uuid,
        customer_id: Uuid,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        if items.is_empty() {
            return Err(CoreError::Validation("order has no items".to_string()));
        }
        for item in &items {
            item.validate()?;
        }

        let mut total_amount = 0i64;
        let mut total_rights_cost = 0i64;
        for item in &items {
            total_amount = total_amount
                .checked_add(item.subtotal()?)
                .ok_or_else(|| CoreError::Validation("order total overflows".to_string()))?;
            total_rights_cost = total_rights_cost
                .checked_add(item.rights_subtotal()?)
                .ok_or_else(|| CoreError::Validation("order rights total overflows".to_string()))?;
        }

        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            merchant_id,
            customer_id,
            status: OrderStatus::Pending,
            items,
            total_amount,
            total_rights_cost,
            payment: None,
            created_at: now,
            status_changed_at: now,
            updated_at: now,
        })
    }

    /// Whether the stored totals still match the items.
    pub fn totals_consistent(&self) -> bool {
        let amount: Option<i64> = self
            .items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.subtotal().ok()?));
        let rights: Option<i64> = self
            .items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.rights_subtotal().ok()?));
        amount == Some(self.total_amount) && rights == Some(self.total_rights_cost)
    }

    /// Rights debited at payment time, with the fund they came from.
    pub fn paid_rights(&self) -> Option<(Uuid, i64)> {
        let payment = self.payment.as_ref()?;
        match payment.fund_id {
            Some(fund_id) if payment.paid_rights > 0 => Some((fund_id, payment.paid_rights)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: i64,
    pub unit_rights_cost: i64,
}

impl OrderItem {
    pub fn validate(&self) -> CoreResult<()> {
        if self.quantity <= 0 {
            return Err(CoreError::Validation(format!(
                "quantity for product {} must be positive",
                self.product_id
            )));
        }
        if self.unit_price < 0 || self.unit_rights_cost < 0 {
            return Err(CoreError::Validation(format!(
                "prices for product {} cannot be negative",
                self.product_id
            )));
        }
        Ok(())
    }

    pub fn subtotal(&self) -> CoreResult<i64> {
        self.unit_price
            .checked_mul(self.quantity)
            .ok_or_else(|| CoreError::Validation("item subtotal overflows".to_string()))
    }

    pub fn rights_subtotal(&self) -> CoreResult<i64> {
        self.unit_rights_cost
            .checked_mul(self.quantity)
            .ok_or_else(|| CoreError::Validation("item rights subtotal overflows".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentInfo {
    pub method: String,
    pub paid_amount: i64,
    pub paid_rights: i64,
    pub fund_id: Option<Uuid>,
    pub paid_at: DateTime<Utc>,
}

/// One row per transition. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderStatusHistory {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    /// `None` only for the row written at creation.
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub reason: String,
    pub operator_type: OperatorType,
    pub operator_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OrderStatusHistory {
    pub fn record(
        ctx: &TenantContext,
        order_id: Uuid,
        from_status: Option<OrderStatus>,
        to_status: OrderStatus,
        reason: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id(),
            order_id,
            from_status,
            to_status,
            reason: reason.to_string(),
            operator_type: ctx.operator_type(),
            operator_id: ctx.actor_id().map(str::to_string),
            metadata,
            created_at: now,
        }
    }
}

/// A requested transition. The operator comes from the `TenantContext` it is applied with.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub target: OrderStatus,
    pub reason: String,
    pub metadata: serde_json::Value,
    pub payment: Option<PaymentInfo>,
}

impl StatusChange {
    pub fn new(target: OrderStatus, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
            metadata: serde_json::Value::Null,
            payment: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_payment(mut self, payment: PaymentInfo) -> Self {
        self.payment = Some(payment);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    /// Reservations expire after this long when set.
    pub reservation_ttl_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayOrder {
    pub method: String,
    pub paid_amount: i64,
    /// Fund debited for the order's rights cost.
    pub fund_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub order_id: Uuid,
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub success_count: usize,
    pub fail_count: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchResult {
    pub fn record<T>(&mut self, order_id: Uuid, result: CoreResult<T>) {
        match result {
            Ok(_) => self.success_count += 1,
            Err(e) => {
                self.fail_count += 1;
                self.failures.push(BatchFailure {
                    order_id,
                    code: e.code(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Per-merchant timeout policy. `merchant_id = None` is the tenant default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderTimeoutConfig {
    pub tenant_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub payment_timeout_minutes: i64,
    pub processing_timeout_hours: i64,
    pub auto_complete_enabled: bool,
}

/// System-wide fallback when neither a merchant nor a tenant row exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutDefaults {
    pub payment_timeout_minutes: i64,
    pub processing_timeout_hours: i64,
    pub auto_complete_enabled: bool,
}

impl Default for TimeoutDefaults {
    fn default() -> Self {
        Self {
            payment_timeout_minutes: 30,
            processing_timeout_hours: 72,
            auto_complete_enabled: false,
        }
    }
}

impl From<&OrderTimeoutConfig> for TimeoutDefaults {
    fn from(c: &OrderTimeoutConfig) -> Self {
        Self {
            payment_timeout_minutes: c.payment_timeout_minutes,
            processing_timeout_hours: c.processing_timeout_hours,
            auto_complete_enabled: c.auto_complete_enabled,
        }
    }
}

impl TimeoutDefaults {
    /// Merchant row, then tenant row, then `self`.
    pub fn resolve(&self, configs: &[OrderTimeoutConfig], merchant_id: Uuid) -> TimeoutDefaults {
        configs
            .iter()
            .find(|c| c.merchant_id == Some(merchant_id))
            .map(TimeoutDefaults::from)
            .unwrap_or_else(|| self.tenant_default(configs))
    }

    /// Policy for merchants without their own row.
    pub fn tenant_default(&self, configs: &[OrderTimeoutConfig]) -> TimeoutDefaults {
        configs
            .iter()
            .find(|c| c.merchant_id.is_none())
            .map(TimeoutDefaults::from)
            .unwrap_or(*self)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::minutes(self.payment_timeout_minutes)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::hours(self.processing_timeout_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i64, unit_price: i64, unit_rights_cost: i64) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            unit_rights_cost,
        }
    }

    #[test]
    fn test_totals_are_sum_of_subtotals() {
        let order = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![item(2, 1500, 10), item(1, 990, 0)],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, 3990);
        assert_eq!(order.total_rights_cost, 20);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_invalid_items_are_rejected() {
        let now = Utc::now();
        let ids = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(Order::new(ids.0, ids.1, ids.2, vec![], now).is_err());
        assert!(Order::new(ids.0, ids.1, ids.2, vec![item(0, 100, 0)], now).is_err());
        assert!(Order::new(ids.0, ids.1, ids.2, vec![item(1, -1, 0)], now).is_err());
        assert!(Order::new(ids.0, ids.1, ids.2, vec![item(i64::MAX, 2, 0)], now).is_err());
    }

    #[test]
    fn test_timeout_resolution_order() {
        let tenant_id = Uuid::new_v4();
        let merchant = Uuid::new_v4();
        let defaults = TimeoutDefaults::default();

        assert_eq!(defaults.resolve(&[], merchant), defaults);

        let tenant_row = OrderTimeoutConfig {
            tenant_id,
            merchant_id: None,
            payment_timeout_minutes: 15,
            processing_timeout_hours: 48,
            auto_complete_enabled: false,
        };
        let merchant_row = OrderTimeoutConfig {
            merchant_id: Some(merchant),
            payment_timeout_minutes: 5,
            auto_complete_enabled: true,
            ..tenant_row.clone()
        };

        let resolved = defaults.resolve(&[tenant_row.clone()], merchant);
        assert_eq!(resolved.payment_timeout_minutes, 15);

        let resolved = defaults.resolve(&[tenant_row.clone(), merchant_row], merchant);
        assert_eq!(resolved.payment_timeout_minutes, 5);
        assert!(resolved.auto_complete_enabled);

        let other = defaults.resolve(&[tenant_row], Uuid::new_v4());
        assert_eq!(other.processing_timeout_hours, 48);
    }
}
