use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mercato_core::{CoreError, CoreResult, TenantContext};
use mercato_finance::{
    Fund, FundRepository, FundStatus, FundTransaction, Page, TransactionFilter, TransactionType,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::{corrupt, storage_error};

pub struct PgFundRepository {
    pool: PgPool,
}

impl PgFundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FundRow {
    id: Uuid,
    tenant_id: Uuid,
    merchant_id: Uuid,
    fund_type: String,
    balance: i64,
    currency: String,
    status: String,
    warning_threshold: Option<i64>,
    critical_threshold: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FundRow> for Fund {
    type Error = CoreError;

    fn try_from(row: FundRow) -> Result<Self, Self::Error> {
        Ok(Fund {
            id: row.id,
            tenant_id: row.tenant_id,
            merchant_id: row.merchant_id,
            fund_type: row
                .fund_type
                .parse()
                .map_err(|_| corrupt("fund_type", &row.fund_type))?,
            balance: row.balance,
            currency: row.currency,
            status: row.status.parse().map_err(|_| corrupt("fund status", &row.status))?,
            warning_threshold: row.warning_threshold,
            critical_threshold: row.critical_threshold,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    tenant_id: Uuid,
    fund_id: Uuid,
    transaction_type: String,
    amount: i64,
    balance_before: i64,
    balance_after: i64,
    operator_id: Option<String>,
    description: Option<String>,
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for FundTransaction {
    type Error = CoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(FundTransaction {
            id: row.id,
            tenant_id: row.tenant_id,
            fund_id: row.fund_id,
            transaction_type: row
                .transaction_type
                .parse::<TransactionType>()
                .map_err(|_| corrupt("transaction_type", &row.transaction_type))?,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            operator_id: row.operator_id,
            description: row.description,
            reference_type: row.reference_type,
            reference_id: row.reference_id,
            created_at: row.created_at,
        })
    }
}

const FUND_COLUMNS: &str = "id, tenant_id, merchant_id, fund_type, balance, currency, status, \
     warning_threshold, critical_threshold, created_at, updated_at";

fn push_filters<'a>(
    qb: &mut QueryBuilder<'a, Postgres>,
    ctx: &TenantContext,
    filter: &'a TransactionFilter,
) {
    qb.push(" WHERE tenant_id = ").push_bind(ctx.tenant_id());
    if let Some(fund_id) = filter.fund_id {
        qb.push(" AND fund_id = ").push_bind(fund_id);
    }
    if let Some(transaction_type) = filter.transaction_type {
        qb.push(" AND transaction_type = ").push_bind(transaction_type.as_str());
    }
    if let Some(operator_id) = filter.operator_id.as_deref() {
        qb.push(" AND operator_id = ").push_bind(operator_id);
    }
    if let Some(from) = filter.from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

#[async_trait]
impl FundRepository for PgFundRepository {
    async fn create_fund(&self, ctx: &TenantContext, fund: &Fund) -> CoreResult<()> {
        ctx.ensure_valid()?;
        if fund.tenant_id != ctx.tenant_id() {
            return Err(CoreError::InvalidTenantContext("fund tenant mismatch".to_string()));
        }
        sqlx::query(
            r#"
            INSERT INTO funds
                (id, tenant_id, merchant_id, fund_type, balance, currency, status,
                 warning_threshold, critical_threshold, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(fund.id)
        .bind(fund.tenant_id)
        .bind(fund.merchant_id)
        .bind(fund.fund_type.as_str())
        .bind(fund.balance)
        .bind(&fund.currency)
        .bind(fund.status.as_str())
        .bind(fund.warning_threshold)
        .bind(fund.critical_threshold)
        .bind(fund.created_at)
        .bind(fund.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get_fund(&self, ctx: &TenantContext, fund_id: Uuid) -> CoreResult<Fund> {
        ctx.ensure_valid()?;
        let row = sqlx::query_as::<_, FundRow>(&format!(
            "SELECT {} FROM funds WHERE tenant_id = $1 AND id = $2",
            FUND_COLUMNS
        ))
        .bind(ctx.tenant_id())
        .bind(fund_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.ok_or(CoreError::FundNotFound(fund_id))?.try_into()
    }

    async fn set_status(&self, ctx: &TenantContext, fund_id: Uuid, status: FundStatus) -> CoreResult<Fund> {
        ctx.ensure_valid()?;
        let row = sqlx::query_as::<_, FundRow>(&format!(
            "UPDATE funds SET status = $3, updated_at = $4 WHERE tenant_id = $1 AND id = $2 RETURNING {}",
            FUND_COLUMNS
        ))
        .bind(ctx.tenant_id())
        .bind(fund_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.ok_or(CoreError::FundNotFound(fund_id))?.try_into()
    }

    async fn append_transaction(&self, ctx: &TenantContext, tx: &FundTransaction) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        tx.verify()?;
        let mut db_tx = self.pool.begin().await.map_err(storage_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE funds SET balance = $3, updated_at = $4
            WHERE tenant_id = $1 AND id = $2 AND balance = $5
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(tx.fund_id)
        .bind(tx.balance_after)
        .bind(tx.created_at)
        .bind(tx.balance_before)
        .execute(&mut *db_tx)
        .await
        .map_err(storage_error)?;

        if updated.rows_affected() == 0 {
            db_tx.rollback().await.map_err(storage_error)?;
            // Either gone or moved; a missing fund surfaces as not found.
            self.get_fund(ctx, tx.fund_id).await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO fund_transactions
                (id, tenant_id, fund_id, transaction_type, amount, balance_before, balance_after,
                 operator_id, description, reference_type, reference_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(tx.id)
        .bind(ctx.tenant_id())
        .bind(tx.fund_id)
        .bind(tx.transaction_type.as_str())
        .bind(tx.amount)
        .bind(tx.balance_before)
        .bind(tx.balance_after)
        .bind(&tx.operator_id)
        .bind(&tx.description)
        .bind(&tx.reference_type)
        .bind(tx.reference_id)
        .bind(tx.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(storage_error)?;

        db_tx.commit().await.map_err(storage_error)?;
        Ok(true)
    }

    async fn list_transactions(
        &self,
        ctx: &TenantContext,
        filter: &TransactionFilter,
        page: u32,
        page_size: u32,
    ) -> CoreResult<Page<FundTransaction>> {
        ctx.ensure_valid()?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM fund_transactions");
        push_filters(&mut count, ctx, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut select = QueryBuilder::new(
            "SELECT id, tenant_id, fund_id, transaction_type, amount, balance_before, balance_after, \
             operator_id, description, reference_type, reference_id, created_at FROM fund_transactions",
        );
        push_filters(&mut select, ctx, filter);
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<TransactionRow> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(TryInto::try_into)
                .collect::<CoreResult<Vec<_>>>()?,
            total: total.max(0) as u64,
            page,
            page_size,
        })
    }
}
