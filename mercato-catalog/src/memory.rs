use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mercato_core::{CoreError, CoreResult, TenantContext};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{InventoryReservation, ProductStock, ReservationStatus};
use crate::repository::InventoryRepository;

#[derive(Default)]
struct InventoryState {
    stock: HashMap<(Uuid, Uuid), ProductStock>,
    reservations: HashMap<Uuid, InventoryReservation>,
}

/// Process-local inventory storage. One lock guards stock and reservations so every
/// conditional write is a single atomic step.
#[derive(Default)]
pub struct InMemoryInventoryRepository {
    state: RwLock<InventoryState>,
}

impl InMemoryInventoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn get_stock(&self, ctx: &TenantContext, product_id: Uuid) -> CoreResult<ProductStock> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        state
            .stock
            .get(&(ctx.tenant_id(), product_id))
            .cloned()
            .ok_or(CoreError::ProductNotFound(product_id))
    }

    async fn create_stock(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
        stock_quantity: i64,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let key = (ctx.tenant_id(), product_id);
        if state.stock.contains_key(&key) {
            return Ok(false);
        }
        state.stock.insert(
            key,
            ProductStock {
                tenant_id: ctx.tenant_id(),
                product_id,
                stock_quantity,
                version: 1,
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn list_active_reservations(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
    ) -> CoreResult<Vec<InventoryReservation>> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        Ok(state
            .reservations
            .values()
            .filter(|r| {
                r.tenant_id == ctx.tenant_id()
                    && r.product_id == product_id
                    && r.status == ReservationStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn get_reservation(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> CoreResult<InventoryReservation> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        state
            .reservations
            .get(&reservation_id)
            .filter(|r| r.tenant_id == ctx.tenant_id())
            .cloned()
            .ok_or(CoreError::ReservationNotFound(reservation_id))
    }

    async fn find_by_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
    ) -> CoreResult<Vec<InventoryReservation>> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        let mut found: Vec<InventoryReservation> = state
            .reservations
            .values()
            .filter(|r| {
                r.tenant_id == ctx.tenant_id()
                    && r.reference_type == reference_type
                    && r.reference_id == reference_id
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn insert_reservation(
        &self,
        ctx: &TenantContext,
        expected_version: i64,
        reservation: &InventoryReservation,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let stock = state
            .stock
            .get_mut(&(ctx.tenant_id(), reservation.product_id))
            .ok_or(CoreError::ProductNotFound(reservation.product_id))?;
        if stock.version != expected_version {
            return Ok(false);
        }
        stock.version += 1;
        stock.updated_at = Utc::now();
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(true)
    }

    async fn update_reservation(
        &self,
        ctx: &TenantContext,
        expected_version: i64,
        reservation_id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        stock_delta: i64,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let InventoryState { stock, reservations } = &mut *state;

        let reservation = match reservations.get_mut(&reservation_id) {
            Some(r) if r.tenant_id == ctx.tenant_id() => r,
            _ => return Err(CoreError::ReservationNotFound(reservation_id)),
        };
        let product = stock
            .get_mut(&(ctx.tenant_id(), reservation.product_id))
            .ok_or(CoreError::ProductNotFound(reservation.product_id))?;

        if product.version != expected_version || reservation.status != from {
            return Ok(false);
        }

        product.stock_quantity += stock_delta;
        product.version += 1;
        product.updated_at = Utc::now();
        reservation.status = to;
        reservation.updated_at = Utc::now();
        Ok(true)
    }

    async fn renew_reservation(
        &self,
        ctx: &TenantContext,
        expected_version: i64,
        reservation_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let InventoryState { stock, reservations } = &mut *state;

        let reservation = match reservations.get_mut(&reservation_id) {
            Some(r) if r.tenant_id == ctx.tenant_id() => r,
            _ => return Err(CoreError::ReservationNotFound(reservation_id)),
        };
        let product = stock
            .get_mut(&(ctx.tenant_id(), reservation.product_id))
            .ok_or(CoreError::ProductNotFound(reservation.product_id))?;

        if product.version != expected_version || reservation.status != ReservationStatus::Active {
            return Ok(false);
        }

        product.version += 1;
        product.updated_at = Utc::now();
        reservation.expires_at = expires_at;
        reservation.updated_at = Utc::now();
        Ok(true)
    }

    async fn adjust_stock(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
        expected_version: i64,
        delta: i64,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let stock = state
            .stock
            .get_mut(&(ctx.tenant_id(), product_id))
            .ok_or(CoreError::ProductNotFound(product_id))?;
        if stock.version != expected_version {
            return Ok(false);
        }
        stock.stock_quantity += delta;
        stock.version += 1;
        stock.updated_at = Utc::now();
        Ok(true)
    }
}
