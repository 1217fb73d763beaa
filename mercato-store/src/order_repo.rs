use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mercato_core::{
    CoreError, CoreResult, OperatorType, OrderStatus, TenantContext, TenantDirectory,
};
use mercato_order::{
    MerchantScope, Order, OrderItem, OrderRepository, OrderStatusHistory, OrderTimeoutConfig,
    PaymentInfo, StaleQuery, TimeoutConfigRepository,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::{corrupt, storage_error};

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, ctx: &TenantContext, order_id: Uuid) -> CoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM orders WHERE tenant_id = $1 AND id = $2)",
        )
        .bind(ctx.tenant_id())
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    tenant_id: Uuid,
    merchant_id: Uuid,
    customer_id: Uuid,
    status: String,
    items: Json<Vec<OrderItem>>,
    total_amount: i64,
    total_rights_cost: i64,
    payment: Option<Json<PaymentInfo>>,
    created_at: DateTime<Utc>,
    status_changed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = CoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|_| corrupt("order status", &row.status))?;
        Ok(Order {
            id: row.id,
            tenant_id: row.tenant_id,
            merchant_id: row.merchant_id,
            customer_id: row.customer_id,
            status,
            items: row.items.0,
            total_amount: row.total_amount,
            total_rights_cost: row.total_rights_cost,
            payment: row.payment.map(|p| p.0),
            created_at: row.created_at,
            status_changed_at: row.status_changed_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    tenant_id: Uuid,
    order_id: Uuid,
    from_status: Option<String>,
    to_status: String,
    reason: String,
    operator_type: String,
    operator_id: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for OrderStatusHistory {
    type Error = CoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let from_status = match row.from_status.as_deref() {
            Some(s) => Some(s.parse::<OrderStatus>().map_err(|_| corrupt("from_status", s))?),
            None => None,
        };
        Ok(OrderStatusHistory {
            id: row.id,
            tenant_id: row.tenant_id,
            order_id: row.order_id,
            from_status,
            to_status: row
                .to_status
                .parse()
                .map_err(|_| corrupt("to_status", &row.to_status))?,
            reason: row.reason,
            operator_type: row
                .operator_type
                .parse::<OperatorType>()
                .map_err(|_| corrupt("operator_type", &row.operator_type))?,
            operator_id: row.operator_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, tenant_id, merchant_id, customer_id, status, items, total_amount, \
     total_rights_cost, payment, created_at, status_changed_at, updated_at";

async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    history: &OrderStatusHistory,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO order_status_history
            (id, tenant_id, order_id, from_status, to_status, reason, operator_type, operator_id, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(history.id)
    .bind(history.tenant_id)
    .bind(history.order_id)
    .bind(history.from_status.map(|s| s.as_str()))
    .bind(history.to_status.as_str())
    .bind(&history.reason)
    .bind(history.operator_type.as_str())
    .bind(&history.operator_id)
    .bind(&history.metadata)
    .bind(history.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(
        &self,
        ctx: &TenantContext,
        order: &Order,
        history: &OrderStatusHistory,
    ) -> CoreResult<()> {
        ctx.ensure_valid()?;
        if order.tenant_id != ctx.tenant_id() {
            return Err(CoreError::InvalidTenantContext("order tenant mismatch".to_string()));
        }

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, tenant_id, merchant_id, customer_id, status, items, total_amount,
                 total_rights_cost, payment, created_at, status_changed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.tenant_id)
        .bind(order.merchant_id)
        .bind(order.customer_id)
        .bind(order.status.as_str())
        .bind(Json(&order.items))
        .bind(order.total_amount)
        .bind(order.total_rights_cost)
        .bind(order.payment.as_ref().map(Json))
        .bind(order.created_at)
        .bind(order.status_changed_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        insert_history(&mut tx, history).await.map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)
    }

    async fn get_by_id(&self, ctx: &TenantContext, order_id: Uuid) -> CoreResult<Order> {
        ctx.ensure_valid()?;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE tenant_id = $1 AND id = $2",
            ORDER_COLUMNS
        ))
        .bind(ctx.tenant_id())
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.ok_or(CoreError::OrderNotFound(order_id))?.try_into()
    }

    async fn update_status_with_history(
        &self,
        ctx: &TenantContext,
        expected: OrderStatus,
        order: &Order,
        history: &OrderStatusHistory,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment = $4, status_changed_at = $5, updated_at = $6
            WHERE tenant_id = $1 AND id = $2 AND status = $7
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment.as_ref().map(Json))
        .bind(order.status_changed_at)
        .bind(order.updated_at)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_error)?;
            if !self.exists(ctx, order.id).await? {
                return Err(CoreError::OrderNotFound(order.id));
            }
            return Ok(false);
        }

        insert_history(&mut tx, history).await.map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;
        Ok(true)
    }

    async fn list_history(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> CoreResult<Vec<OrderStatusHistory>> {
        ctx.ensure_valid()?;
        if !self.exists(ctx, order_id).await? {
            return Err(CoreError::OrderNotFound(order_id));
        }
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, tenant_id, order_id, from_status, to_status, reason, operator_type,
                   operator_id, metadata, created_at
            FROM order_status_history
            WHERE tenant_id = $1 AND order_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_stale(&self, ctx: &TenantContext, query: &StaleQuery) -> CoreResult<Vec<Order>> {
        ctx.ensure_valid()?;
        let mut select = QueryBuilder::new(format!("SELECT {} FROM orders", ORDER_COLUMNS));
        select
            .push(" WHERE tenant_id = ")
            .push_bind(ctx.tenant_id())
            .push(" AND status = ")
            .push_bind(query.status.as_str())
            .push(" AND status_changed_at <= ")
            .push_bind(query.changed_before);
        match &query.merchants {
            MerchantScope::Only(merchant_id) => {
                select.push(" AND merchant_id = ").push_bind(*merchant_id);
            }
            MerchantScope::Except(merchant_ids) if !merchant_ids.is_empty() => {
                select
                    .push(" AND merchant_id <> ALL(")
                    .push_bind(merchant_ids.clone())
                    .push(")");
            }
            MerchantScope::Except(_) => {}
        }
        if query.unwarned_only {
            select.push(" AND timeout_warned_for IS DISTINCT FROM status_changed_at");
        }
        select
            .push(" ORDER BY status_changed_at ASC LIMIT ")
            .push_bind(query.limit as i64);

        let rows: Vec<OrderRow> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_timeout_warned(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        stalled_since: DateTime<Utc>,
    ) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        let updated = sqlx::query(
            r#"
            UPDATE orders SET timeout_warned_for = $3
            WHERE tenant_id = $1 AND id = $2 AND status_changed_at = $3
              AND timeout_warned_for IS DISTINCT FROM $3
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(order_id)
        .bind(stalled_since)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if updated.rows_affected() == 0 {
            if !self.exists(ctx, order_id).await? {
                return Err(CoreError::OrderNotFound(order_id));
            }
            return Ok(false);
        }
        Ok(true)
    }
}

/// Tenants holding orders the timeout monitor may still act on.
#[async_trait]
impl TenantDirectory for PgOrderRepository {
    async fn active_tenants(&self) -> CoreResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT tenant_id FROM orders WHERE status IN ($1, $2)",
        )
        .bind(OrderStatus::Pending.as_str())
        .bind(OrderStatus::Processing.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)
    }
}

pub struct PgTimeoutConfigRepository {
    pool: PgPool,
}

impl PgTimeoutConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TimeoutConfigRow {
    tenant_id: Uuid,
    merchant_id: Option<Uuid>,
    payment_timeout_minutes: i64,
    processing_timeout_hours: i64,
    auto_complete_enabled: bool,
}

impl From<TimeoutConfigRow> for OrderTimeoutConfig {
    fn from(row: TimeoutConfigRow) -> Self {
        OrderTimeoutConfig {
            tenant_id: row.tenant_id,
            merchant_id: row.merchant_id,
            payment_timeout_minutes: row.payment_timeout_minutes,
            processing_timeout_hours: row.processing_timeout_hours,
            auto_complete_enabled: row.auto_complete_enabled,
        }
    }
}

#[async_trait]
impl TimeoutConfigRepository for PgTimeoutConfigRepository {
    async fn list(&self, ctx: &TenantContext) -> CoreResult<Vec<OrderTimeoutConfig>> {
        ctx.ensure_valid()?;
        let rows = sqlx::query_as::<_, TimeoutConfigRow>(
            r#"
            SELECT tenant_id, merchant_id, payment_timeout_minutes, processing_timeout_hours,
                   auto_complete_enabled
            FROM order_timeout_configs
            WHERE tenant_id = $1
            "#,
        )
        .bind(ctx.tenant_id())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert(&self, ctx: &TenantContext, config: &OrderTimeoutConfig) -> CoreResult<()> {
        ctx.ensure_valid()?;
        if config.tenant_id != ctx.tenant_id() {
            return Err(CoreError::InvalidTenantContext("config tenant mismatch".to_string()));
        }
        if config.payment_timeout_minutes <= 0 || config.processing_timeout_hours <= 0 {
            return Err(CoreError::Validation("timeouts must be positive".to_string()));
        }

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query(
            "DELETE FROM order_timeout_configs WHERE tenant_id = $1 AND merchant_id IS NOT DISTINCT FROM $2",
        )
        .bind(config.tenant_id)
        .bind(config.merchant_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;
        sqlx::query(
            r#"
            INSERT INTO order_timeout_configs
                (tenant_id, merchant_id, payment_timeout_minutes, processing_timeout_hours, auto_complete_enabled)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(config.tenant_id)
        .bind(config.merchant_id)
        .bind(config.payment_timeout_minutes)
        .bind(config.processing_timeout_hours)
        .bind(config.auto_complete_enabled)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)
    }
}
