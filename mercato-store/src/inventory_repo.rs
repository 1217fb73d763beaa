use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mercato_catalog::{InventoryRepository, InventoryReservation, ProductStock, ReservationStatus};
use mercato_core::{CoreError, CoreResult, TenantContext};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{corrupt, storage_error};

pub struct PgInventoryRepository {
    pool: PgPool,
}

impl PgInventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn product_exists(&self, ctx: &TenantContext, product_id: Uuid) -> CoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM product_stock WHERE tenant_id = $1 AND product_id = $2)",
        )
        .bind(ctx.tenant_id())
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)
    }
}

#[derive(sqlx::FromRow)]
struct StockRow {
    tenant_id: Uuid,
    product_id: Uuid,
    stock_quantity: i64,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl From<StockRow> for ProductStock {
    fn from(row: StockRow) -> Self {
        ProductStock {
            tenant_id: row.tenant_id,
            product_id: row.product_id,
            stock_quantity: row.stock_quantity,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: Uuid,
    quantity: i64,
    reference_type: String,
    reference_id: Uuid,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for InventoryReservation {
    type Error = CoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(InventoryReservation {
            id: row.id,
            tenant_id: row.tenant_id,
            product_id: row.product_id,
            quantity: row.quantity,
            reference_type: row.reference_type,
            reference_id: row.reference_id,
            status: row
                .status
                .parse::<ReservationStatus>()
                .map_err(|_| corrupt("reservation status", &row.status))?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RESERVATION_COLUMNS: &str = "id, tenant_id, product_id, quantity, reference_type, \
     reference_id, status, expires_at, created_at, updated_at";

#[async_trait]
impl InventoryRepository for PgInventoryRepository {
    async fn get_stock(&self, ctx: &TenantContext, product_id: Uuid) -> CoreResult<ProductStock> {
        ctx.ensure_valid()?;
        let row = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT tenant_id, product_id, stock_quantity, version, updated_at
            FROM product_stock WHERE tenant_id = $1 AND product_id = $2
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(Into::into).ok_or(CoreError::ProductNotFound(product_id))
    }

    async fn create_stock(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
        stock_quantity: i64,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO product_stock (tenant_id, product_id, stock_quantity, version, updated_at)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (tenant_id, product_id) DO NOTHING
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(product_id)
        .bind(stock_quantity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn list_active_reservations(
        &self,
        ctx: &TenantContext,
        product_id: Uuid,
    ) -> CoreResult<Vec<InventoryReservation>> {
        ctx.ensure_valid()?;
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM inventory_reservations \
             WHERE tenant_id = $1 AND product_id = $2 AND status = 'active'",
            RESERVATION_COLUMNS
        ))
        .bind(ctx.tenant_id())
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_reservation(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> CoreResult<InventoryReservation> {
        ctx.ensure_valid()?;
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM inventory_reservations WHERE tenant_id = $1 AND id = $2",
            RESERVATION_COLUMNS
        ))
        .bind(ctx.tenant_id())
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.ok_or(CoreError::ReservationNotFound(reservation_id))?
            .try_into()
    }

    async fn find_by_reference(
        &self,
        ctx: &TenantContext,
        reference_type: &str,
        reference_id: Uuid,
    ) -> CoreResult<Vec<InventoryReservation>> {
        ctx.ensure_valid()?;
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM inventory_reservations \
             WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3 \
             ORDER BY created_at ASC",
            RESERVATION_COLUMNS
        ))
        .bind(ctx.tenant_id())
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_reservation(
        &self,
        ctx: &TenantContext,
        expected_version: i64,
        reservation: &InventoryReservation,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let bumped = sqlx::query(
            r#"
            UPDATE product_stock SET version = version + 1, updated_at = $4
            WHERE tenant_id = $1 AND product_id = $2 AND version = $3
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(reservation.product_id)
        .bind(expected_version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if bumped.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_error)?;
            if !self.product_exists(ctx, reservation.product_id).await? {
                return Err(CoreError::ProductNotFound(reservation.product_id));
            }
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO inventory_reservations
                (id, tenant_id, product_id, quantity, reference_type, reference_id, status,
                 expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(reservation.id)
        .bind(ctx.tenant_id())
        .bind(reservation.product_id)
        .bind(reservation.quantity)
        .bind(&reservation.reference_type)
        .bind(reservation.reference_id)
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
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
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let now = Utc::now();

        let product_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE inventory_reservations SET status = $3, updated_at = $4
            WHERE tenant_id = $1 AND id = $2 AND status = $5
            RETURNING product_id
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(reservation_id)
        .bind(to.as_str())
        .bind(now)
        .bind(from.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let Some(product_id) = product_id else {
            tx.rollback().await.map_err(storage_error)?;
            // Not found surfaces from the lookup; a status mismatch is a lost race.
            self.get_reservation(ctx, reservation_id).await?;
            return Ok(false);
        };

        let moved = sqlx::query(
            r#"
            UPDATE product_stock
            SET stock_quantity = stock_quantity + $4, version = version + 1, updated_at = $5
            WHERE tenant_id = $1 AND product_id = $2 AND version = $3
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(product_id)
        .bind(expected_version)
        .bind(stock_delta)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if moved.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_error)?;
            return Ok(false);
        }

        tx.commit().await.map_err(storage_error)?;
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
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let now = Utc::now();

        let product_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE inventory_reservations SET expires_at = $3, updated_at = $4
            WHERE tenant_id = $1 AND id = $2 AND status = 'active'
            RETURNING product_id
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(reservation_id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let Some(product_id) = product_id else {
            tx.rollback().await.map_err(storage_error)?;
            self.get_reservation(ctx, reservation_id).await?;
            return Ok(false);
        };

        let bumped = sqlx::query(
            r#"
            UPDATE product_stock SET version = version + 1, updated_at = $4
            WHERE tenant_id = $1 AND product_id = $2 AND version = $3
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(product_id)
        .bind(expected_version)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if bumped.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_error)?;
            return Ok(false);
        }

        tx.commit().await.map_err(storage_error)?;
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
        let moved = sqlx::query(
            r#"
            UPDATE product_stock
            SET stock_quantity = stock_quantity + $4, version = version + 1, updated_at = $5
            WHERE tenant_id = $1 AND product_id = $2 AND version = $3
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(product_id)
        .bind(expected_version)
        .bind(delta)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if moved.rows_affected() == 0 {
            if !self.product_exists(ctx, product_id).await? {
                return Err(CoreError::ProductNotFound(product_id));
            }
            return Ok(false);
        }
        Ok(true)
    }
}
