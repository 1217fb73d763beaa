use mercato_core::audit::{self, AuditSink};
use mercato_core::{Clock, CoreError, CoreResult, TenantContext, MAX_CAS_RETRIES};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    reserved_quantity, AdjustmentOutcome, Availability, InventoryReservation, ReservationStatus,
    ReserveRequest, StockAdjustment,
};
use crate::repository::InventoryRepository;

pub const MAX_ADJUSTMENT_BATCH: usize = 1000;

/// Holds and releases stock against references (orders).
///
/// Invariant kept by every operation:
/// `available = stock_quantity - sum(active, unexpired reservations)` and never negative.
pub struct InventoryReservationManager {
    repo: Arc<dyn InventoryRepository>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl InventoryReservationManager {
    pub fn new(
        repo: Arc<dyn InventoryRepository>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repo, clock, audit }
    }

    /// Register a product or overwrite its stock level. The new level may not drop below
    /// what live reservations hold.
    pub async fn set_stock(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
        stock_quantity: i64,
    ) -> CoreResult<Availability> {
        if stock_quantity < 0 {
            return Err(CoreError::Validation("stock quantity cannot be negative".to_string()));
        }

        for _ in 0..MAX_CAS_RETRIES {
            let stock = match self.repo.get_stock(ctx, product_id).await {
                Ok(stock) => stock,
                Err(CoreError::ProductNotFound(_)) => {
                    if self.repo.create_stock(ctx, product_id, stock_quantity).await? {
                        self.record_stock_level(ctx, product_id, stock_quantity).await;
                        return self.available(ctx, product_id).await;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let active = self.repo.list_active_reservations(ctx, product_id).await?;
            let reserved = reserved_quantity(&active, self.clock.now());
            if stock_quantity < reserved {
                return Err(CoreError::InsufficientStock {
                    product_id,
                    available: stock.stock_quantity - reserved,
                    requested: stock.stock_quantity - stock_quantity,
                });
            }

            let delta = stock_quantity - stock.stock_quantity;
            if self
                .repo
                .adjust_stock(ctx, product_id, stock.version, delta)
                .await?
            {
                self.record_stock_level(ctx, product_id, stock_quantity).await;
                return self.available(ctx, product_id).await;
            }
        }

        Err(CoreError::ConcurrentModification(format!(
            "product {} changed while setting stock",
            product_id
        )))
    }

    async fn record_stock_level(&self, ctx: &TenantContext, product_id: Uuid, stock_quantity: i64) {
        tracing::info!(tenant_id = %ctx.tenant_id(), %product_id, stock_quantity, "stock level set");
        audit::record(
            self.audit.as_ref(),
            ctx.tenant_id(),
            "product_stock",
            "set",
            serde_json::json!({
                "product_id": product_id,
                "stock_quantity": stock_quantity,
            }),
        )
        .await;
    }

    pub async fn available(&self, ctx: &TenantContext, product_id: Uuid) -> CoreResult<Availability> {
        let stock = self.repo.get_stock(ctx, product_id).await?;
        let active = self.repo.list_active_reservations(ctx, product_id).await?;
        let reserved = reserved_quantity(&active, self.clock.now());
        Ok(Availability {
            product_id,
            stock_quantity: stock.stock_quantity,
            reserved_quantity: reserved,
            available_quantity: stock.stock_quantity - reserved,
        })
    }

    pub async fn reserve(
        &self,
        ctx: &TenantContext,
        request: ReserveRequest,
    ) -> CoreResult<InventoryReservation> {
        if request.quantity <= 0 {
            return Err(CoreError::Validation("reservation quantity must be positive".to_string()));
        }
        if request.reference_type.trim().is_empty() {
            return Err(CoreError::Validation("reference type is required".to_string()));
        }

        for _ in 0..MAX_CAS_RETRIES {
            let now = self.clock.now();
            if matches!(request.expires_at, Some(expires_at) if expires_at <= now) {
                return Err(CoreError::Validation("reservation expiry is in the past".to_string()));
            }

            let stock = self.repo.get_stock(ctx, request.product_id).await?;
            let active = self.repo.list_active_reservations(ctx, request.product_id).await?;
            let available = stock.stock_quantity - reserved_quantity(&active, now);

            if available < request.quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: request.product_id,
                    available,
                    requested: request.quantity,
                });
            }

            let reservation = InventoryReservation::new(ctx.tenant_id(), &request, now);
            if self.repo.insert_reservation(ctx, stock.version, &reservation).await? {
                tracing::info!(
                    tenant_id = %ctx.tenant_id(),
                    product_id = %reservation.product_id,
                    reservation_id = %reservation.id,
                    quantity = reservation.quantity,
                    "stock reserved"
                );
                audit::record(
                    self.audit.as_ref(),
                    ctx.tenant_id(),
                    "inventory_reservation",
                    "reserve",
                    serde_json::json!({
                        "reservation_id": reservation.id,
                        "product_id": reservation.product_id,
                        "quantity": reservation.quantity,
                        "reference_type": reservation.reference_type,
                        "reference_id": reservation.reference_id,
                    }),
                )
                .await;
                return Ok(reservation);
            }
        }

        Err(CoreError::ConcurrentModification(format!(
            "product {} changed during reservation",
            request.product_id
        )))
    }

    /// Active -> Confirmed; the reserved quantity leaves real stock.
    pub async fn confirm(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> CoreResult<InventoryReservation> {
        self.finish(ctx, reservation_id, ReservationStatus::Confirmed).await
    }

    /// Active -> Released; the quantity returns to the available pool.
    pub async fn release(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> CoreResult<InventoryReservation> {
        self.finish(ctx, reservation_id, ReservationStatus::Released).await
    }

    /// Release every live reservation held by a reference. A reservation that cannot be
    /// released is logged and skipped; returns how many were released.
    pub async fn release_for_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
    ) -> CoreResult<usize> {
        self.finish_for_reference(ctx, reference_type, reference_id, ReservationStatus::Released)
            .await
    }

    /// Confirm every live reservation held by a reference. Returns how many were confirmed.
    /// Lapsed holds are skipped; pin them first to keep them.
    pub async fn confirm_for_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
    ) -> CoreResult<usize> {
        self.finish_for_reference(ctx, reference_type, reference_id, ReservationStatus::Confirmed)
            .await
    }

    /// Drops the expiry of every reservation the reference still has stored as active.
    /// A hold that already lapsed is taken again from current stock, and fails with
    /// `InsufficientStock` when those units have since been reserved elsewhere.
    /// Returns how many reservations were pinned.
    pub async fn pin_for_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
    ) -> CoreResult<usize> {
        let reservations = self
            .repo
            .find_by_reference(ctx, reference_type, reference_id)
            .await?;

        let mut pinned = 0;
        for reservation in reservations
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Active && r.expires_at.is_some())
        {
            self.pin(ctx, reservation.id).await?;
            pinned += 1;
        }
        Ok(pinned)
    }

    /// Every reservation a reference ever took, with expiry applied to the status.
    pub async fn reservations_for_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
    ) -> CoreResult<Vec<InventoryReservation>> {
        let now = self.clock.now();
        let mut reservations = self
            .repo
            .find_by_reference(ctx, reference_type, reference_id)
            .await?;
        for reservation in &mut reservations {
            reservation.status = reservation.effective_status(now);
        }
        Ok(reservations)
    }

    /// Apply signed stock deltas. Lines succeed or fail independently.
    pub async fn adjust(
        &self,
        ctx: &TenantContext,
        adjustments: Vec<StockAdjustment>,
    ) -> CoreResult<Vec<AdjustmentOutcome>> {
        ctx.ensure_valid()?;
        if adjustments.len() > MAX_ADJUSTMENT_BATCH {
            return Err(CoreError::BatchLimitExceeded(format!(
                "{} adjustments exceeds the limit of {}",
                adjustments.len(),
                MAX_ADJUSTMENT_BATCH
            )));
        }

        let mut outcomes = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            let outcome = match self.adjust_one(ctx, &adjustment).await {
                Ok(stock_quantity) => AdjustmentOutcome {
                    product_id: adjustment.product_id,
                    success: true,
                    stock_quantity: Some(stock_quantity),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(product_id = %adjustment.product_id, "stock adjustment failed: {}", e);
                    AdjustmentOutcome {
                        product_id: adjustment.product_id,
                        success: false,
                        stock_quantity: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn adjust_one(&self, ctx: &TenantContext, adjustment: &StockAdjustment) -> CoreResult<i64> {
        if adjustment.delta == 0 {
            return Err(CoreError::Validation("adjustment delta cannot be zero".to_string()));
        }

        for _ in 0..MAX_CAS_RETRIES {
            let stock = self.repo.get_stock(ctx, adjustment.product_id).await?;
            let active = self.repo.list_active_reservations(ctx, adjustment.product_id).await?;
            let reserved = reserved_quantity(&active, self.clock.now());
            let new_stock = stock.stock_quantity + adjustment.delta;

            if new_stock < reserved {
                return Err(CoreError::InsufficientStock {
                    product_id: adjustment.product_id,
                    available: stock.stock_quantity - reserved,
                    requested: -adjustment.delta,
                });
            }

            if self
                .repo
                .adjust_stock(ctx, adjustment.product_id, stock.version, adjustment.delta)
                .await?
            {
                audit::record(
                    self.audit.as_ref(),
                    ctx.tenant_id(),
                    "product_stock",
                    "adjust",
                    serde_json::json!({
                        "product_id": adjustment.product_id,
                        "delta": adjustment.delta,
                        "reason": adjustment.reason,
                        "stock_quantity": new_stock,
                    }),
                )
                .await;
                return Ok(new_stock);
            }
        }

        Err(CoreError::ConcurrentModification(format!(
            "product {} changed during adjustment",
            adjustment.product_id
        )))
    }

    async fn finish_for_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
        target: ReservationStatus,
    ) -> CoreResult<usize> {
        let now = self.clock.now();
        let reservations = self
            .repo
            .find_by_reference(ctx, reference_type, reference_id)
            .await?;

        let mut changed = 0;
        for reservation in reservations.into_iter().filter(|r| r.holds_stock(now)) {
            match self.finish(ctx, reservation.id, target).await {
                Ok(_) => changed += 1,
                Err(e) => tracing::warn!(
                    tenant_id = %ctx.tenant_id(),
                    reservation_id = %reservation.id,
                    %reference_id,
                    status = %target,
                    "failed to finish reservation: {}",
                    e
                ),
            }
        }
        Ok(changed)
    }

    async fn pin(&self, ctx: &TenantContext, reservation_id: Uuid) -> CoreResult<()> {
        for _ in 0..MAX_CAS_RETRIES {
            let now = self.clock.now();
            let reservation = self.repo.get_reservation(ctx, reservation_id).await?;
            if reservation.status != ReservationStatus::Active {
                return Err(CoreError::InvalidReservationState {
                    reservation_id,
                    status: reservation.status.to_string(),
                });
            }
            if reservation.expires_at.is_none() {
                return Ok(());
            }

            let stock = self.repo.get_stock(ctx, reservation.product_id).await?;
            if !reservation.holds_stock(now) {
                let active = self.repo.list_active_reservations(ctx, reservation.product_id).await?;
                let available = stock.stock_quantity - reserved_quantity(&active, now);
                if available < reservation.quantity {
                    return Err(CoreError::InsufficientStock {
                        product_id: reservation.product_id,
                        available,
                        requested: reservation.quantity,
                    });
                }
            }

            if self
                .repo
                .renew_reservation(ctx, stock.version, reservation_id, None)
                .await?
            {
                tracing::info!(
                    tenant_id = %ctx.tenant_id(),
                    %reservation_id,
                    lapsed = !reservation.holds_stock(now),
                    "reservation pinned"
                );
                audit::record(
                    self.audit.as_ref(),
                    ctx.tenant_id(),
                    "inventory_reservation",
                    "pin",
                    serde_json::json!({
                        "reservation_id": reservation_id,
                        "product_id": reservation.product_id,
                        "quantity": reservation.quantity,
                    }),
                )
                .await;
                return Ok(());
            }
        }

        Err(CoreError::ConcurrentModification(format!(
            "reservation {} changed while pinning",
            reservation_id
        )))
    }

    async fn finish(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
        target: ReservationStatus,
    ) -> CoreResult<InventoryReservation> {
        for _ in 0..MAX_CAS_RETRIES {
            let mut reservation = self.repo.get_reservation(ctx, reservation_id).await?;
            let current = reservation.effective_status(self.clock.now());
            if current != ReservationStatus::Active {
                return Err(CoreError::InvalidReservationState {
                    reservation_id,
                    status: current.to_string(),
                });
            }

            let stock = self.repo.get_stock(ctx, reservation.product_id).await?;
            let stock_delta = match target {
                ReservationStatus::Confirmed => -reservation.quantity,
                _ => 0,
            };

            if self
                .repo
                .update_reservation(
                    ctx,
                    stock.version,
                    reservation_id,
                    ReservationStatus::Active,
                    target,
                    stock_delta,
                )
                .await?
            {
                reservation.status = target;
                reservation.updated_at = self.clock.now();
                tracing::info!(
                    tenant_id = %ctx.tenant_id(),
                    reservation_id = %reservation_id,
                    status = %target,
                    "reservation finished"
                );
                audit::record(
                    self.audit.as_ref(),
                    ctx.tenant_id(),
                    "inventory_reservation",
                    target.as_str(),
                    serde_json::json!({
                        "reservation_id": reservation_id,
                        "product_id": reservation.product_id,
                        "quantity": reservation.quantity,
                    }),
                )
                .await;
                return Ok(reservation);
            }
        }

        Err(CoreError::ConcurrentModification(format!(
            "reservation {} changed concurrently",
            reservation_id
        )))
    }
}
