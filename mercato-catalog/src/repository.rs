use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mercato_core::{CoreResult, TenantContext};
use uuid::Uuid;

use crate::models::{InventoryReservation, ProductStock, ReservationStatus};

/// Tenant-scoped stock storage.
///
/// Every write is conditional on the product's `version`; a `false` return means another
/// writer got there first and the caller must re-read.
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn get_stock(&self, ctx: &TenantContext, product_id: Uuid) -> CoreResult<ProductStock>;

    /// Creates a product's stock row. `false` when the product already has one.
    async fn create_stock(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
        stock_quantity: i64,
    ) -> CoreResult<bool>;

    /// Reservations stored as active, including ones whose expiry has passed.
    async fn list_active_reservations(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
    ) -> CoreResult<Vec<InventoryReservation>>;

    async fn get_reservation(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> CoreResult<InventoryReservation>;

    async fn find_by_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
    ) -> CoreResult<Vec<InventoryReservation>>;

    async fn insert_reservation(
        &self,
        ctx: &TenantContext,
        expected_version: i64,
        reservation: &InventoryReservation,
    ) -> CoreResult<bool>;

    /// Moves a reservation `from -> to` and applies `stock_delta` to the product in one unit.
    async fn update_reservation(
        &self,
        ctx: &TenantContext,
        expected_version: i64,
        reservation_id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        stock_delta: i64,
    ) -> CoreResult<bool>;

    /// Sets the expiry of a reservation that is still stored as active.
    async fn renew_reservation(
        &self,
        ctx: &TenantContext,
        expected_version: i64,
        reservation_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<bool>;

    async fn adjust_stock(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
        expected_version: i64,
        delta: i64,
    ) -> CoreResult<bool>;
}
