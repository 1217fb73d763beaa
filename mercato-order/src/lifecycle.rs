use chrono::Duration;
use mercato_catalog::{InventoryReservation, InventoryReservationManager, ReserveRequest};
use mercato_core::{CoreError, CoreResult, OrderStatus, TenantContext};
use mercato_finance::{FundLedger, TransactionRequest};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{BatchResult, NewOrder, Order, PayOrder, PaymentInfo, StatusChange};
use crate::state_machine::{check_batch, OrderStatusStateMachine};

/// Reference type used for reservations and ledger rows tied to an order.
pub const ORDER_REFERENCE: &str = "order";
pub const ORDER_REFUND_REFERENCE: &str = "order_refund";

/// Client-facing order operations: each one is a state machine transition plus the stock and
/// ledger side effects its target implies.
pub struct OrderLifecycle {
    machine: Arc<OrderStatusStateMachine>,
    inventory: Arc<InventoryReservationManager>,
    ledger: Arc<FundLedger>,
}

impl OrderLifecycle {
    pub fn new(
        machine: Arc<OrderStatusStateMachine>,
        inventory: Arc<InventoryReservationManager>,
        ledger: Arc<FundLedger>,
    ) -> Self {
        Self {
            machine,
            inventory,
            ledger,
        }
    }

    pub fn state_machine(&self) -> &OrderStatusStateMachine {
        &self.machine
    }

    /// Reserves stock for every item, then stores the order as Pending. Any failure releases
    /// the reservations already taken.
    pub async fn create_order(&self, ctx: &TenantContext, new_order: NewOrder) -> CoreResult<Order> {
        ctx.ensure_valid()?;
        let now = self.machine.clock().now();
        let order = Order::new(
            ctx.tenant_id(),
            new_order.merchant_id,
            new_order.customer_id,
            new_order.items,
            now,
        )?;
        let expires_at = match new_order.reservation_ttl_minutes {
            Some(minutes) if minutes <= 0 => {
                return Err(CoreError::Validation(
                    "reservation ttl must be positive".to_string(),
                ))
            }
            Some(minutes) => Some(now + Duration::minutes(minutes)),
            None => None,
        };

        let mut taken: Vec<InventoryReservation> = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let request = ReserveRequest {
                product_id: item.product_id,
                quantity: item.quantity,
                reference_type: ORDER_REFERENCE.to_string(),
                reference_id: order.id,
                expires_at,
            };
            match self.inventory.reserve(ctx, request).await {
                Ok(reservation) => taken.push(reservation),
                Err(e) => {
                    self.roll_back_reservations(ctx, &taken).await;
                    return Err(e);
                }
            }
        }

        match self.machine.create(ctx, order).await {
            Ok(order) => Ok(order),
            Err(e) => {
                self.roll_back_reservations(ctx, &taken).await;
                Err(e)
            }
        }
    }

    pub async fn get_order(&self, ctx: &TenantContext, order_id: Uuid) -> CoreResult<Order> {
        self.machine.get(ctx, order_id).await
    }

    /// Pending -> Paid. The order's stock holds lose their expiry, then the rights cost is
    /// debited and credited back if the order has moved on by the time the transition is
    /// written.
    pub async fn pay_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        payment: PayOrder,
    ) -> CoreResult<Order> {
        let order = self.machine.get(ctx, order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(CoreError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Paid,
            });
        }
        if payment.paid_amount != order.total_amount {
            return Err(CoreError::Validation(format!(
                "paid amount {} does not match order total {}",
                payment.paid_amount, order.total_amount
            )));
        }

        self.inventory
            .pin_for_reference(ctx, ORDER_REFERENCE, order.id)
            .await?;

        let debited_fund = if order.total_rights_cost > 0 {
            let fund_id = payment.fund_id.ok_or_else(|| {
                CoreError::Validation("a fund is required to pay the rights cost".to_string())
            })?;
            self.ledger
                .apply_transaction(
                    ctx,
                    fund_id,
                    TransactionRequest::debit(order.total_rights_cost, "order rights payment")
                        .with_reference(ORDER_REFERENCE, order.id),
                )
                .await?;
            Some(fund_id)
        } else {
            None
        };

        let info = PaymentInfo {
            method: payment.method,
            paid_amount: payment.paid_amount,
            paid_rights: order.total_rights_cost,
            fund_id: debited_fund.or(payment.fund_id),
            paid_at: self.machine.clock().now(),
        };
        let change = StatusChange::new(OrderStatus::Paid, "order paid").with_payment(info);

        match self.machine.update_status(ctx, order_id, change).await {
            Ok(paid) => Ok(paid),
            Err(e) => {
                if let Some(fund_id) = debited_fund {
                    self.credit_back(ctx, order_id, fund_id, order.total_rights_cost).await;
                }
                Err(e)
            }
        }
    }

    /// Generic transition with the side effects its target implies. Stock holds are pinned
    /// before an order is paid or completed, so a lapsed hold whose units went elsewhere
    /// fails the transition. The other side effects run after the status is committed;
    /// their failures are logged, the transition stands.
    pub async fn transition(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        change: StatusChange,
    ) -> CoreResult<Order> {
        let target = change.target;
        if matches!(target, OrderStatus::Paid | OrderStatus::Completed) {
            self.inventory
                .pin_for_reference(ctx, ORDER_REFERENCE, order_id)
                .await?;
        }
        let order = self.machine.update_status(ctx, order_id, change).await?;

        match target {
            OrderStatus::Cancelled | OrderStatus::Refunded => {
                if let Err(e) = self
                    .inventory
                    .release_for_reference(ctx, ORDER_REFERENCE, order.id)
                    .await
                {
                    tracing::error!(order_id = %order.id, "failed to release reservations: {}", e);
                }
                if let Some((fund_id, rights)) = order.paid_rights() {
                    self.credit_back(ctx, order.id, fund_id, rights).await;
                }
            }
            OrderStatus::Completed => {
                if let Err(e) = self
                    .inventory
                    .confirm_for_reference(ctx, ORDER_REFERENCE, order.id)
                    .await
                {
                    tracing::error!(order_id = %order.id, "failed to confirm reservations: {}", e);
                }
            }
            _ => {}
        }

        Ok(order)
    }

    pub async fn start_processing(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        reason: &str,
    ) -> CoreResult<Order> {
        self.transition(ctx, order_id, StatusChange::new(OrderStatus::Processing, reason))
            .await
    }

    pub async fn complete_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        reason: &str,
    ) -> CoreResult<Order> {
        self.transition(ctx, order_id, StatusChange::new(OrderStatus::Completed, reason))
            .await
    }

    pub async fn cancel_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        reason: &str,
    ) -> CoreResult<Order> {
        self.transition(ctx, order_id, StatusChange::new(OrderStatus::Cancelled, reason))
            .await
    }

    pub async fn refund_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        reason: &str,
    ) -> CoreResult<Order> {
        self.transition(ctx, order_id, StatusChange::new(OrderStatus::Refunded, reason))
            .await
    }

    pub async fn batch_transition(
        &self,
        ctx: &TenantContext,
        order_ids: &[Uuid],
        target: OrderStatus,
        reason: &str,
    ) -> CoreResult<BatchResult> {
        check_batch(order_ids)?;
        let mut result = BatchResult::default();
        for order_id in order_ids {
            let outcome = self
                .transition(ctx, *order_id, StatusChange::new(target, reason))
                .await;
            result.record(*order_id, outcome);
        }
        tracing::info!(
            tenant_id = %ctx.tenant_id(),
            target = %target,
            success_count = result.success_count,
            fail_count = result.fail_count,
            "batch transition finished"
        );
        Ok(result)
    }

    async fn roll_back_reservations(&self, ctx: &TenantContext, taken: &[InventoryReservation]) {
        for reservation in taken {
            if let Err(e) = self.inventory.release(ctx, reservation.id).await {
                tracing::error!(
                    reservation_id = %reservation.id,
                    "failed to roll back reservation: {}",
                    e
                );
            }
        }
    }

    async fn credit_back(&self, ctx: &TenantContext, order_id: Uuid, fund_id: Uuid, rights: i64) {
        let request = TransactionRequest::credit(rights, "order rights refund")
            .with_reference(ORDER_REFUND_REFERENCE, order_id);
        if let Err(e) = self
            .ledger
            .apply_transaction(&ctx.as_system(), fund_id, request)
            .await
        {
            tracing::error!(%order_id, %fund_id, rights, "failed to credit rights back: {}", e);
        }
    }
}
