use async_trait::async_trait;
use mercato_core::{CoreResult, TenantContext};
use uuid::Uuid;

use crate::models::{Fund, FundStatus, FundTransaction, Page, TransactionFilter};

/// Tenant-scoped fund storage.
#[async_trait]
pub trait FundRepository: Send + Sync {
    async fn create_fund(&self, ctx: &TenantContext, fund: &Fund) -> CoreResult<()>;

    async fn get_fund(&self, ctx: &TenantContext, fund_id: Uuid) -> CoreResult<Fund>;

    async fn set_status(&self, ctx: &TenantContext, fund_id: Uuid, status: FundStatus) -> CoreResult<Fund>;

    /// Inserts `tx` and sets the fund balance to `tx.balance_after` in one unit, but only if the
    /// stored balance still equals `tx.balance_before`. Returns `false` when it does not.
    async fn append_transaction(&self, ctx: &TenantContext, tx: &FundTransaction) -> CoreResult<bool>;

    /// Newest first. `page` is 1-based.
    async fn list_transactions(
        &self,
        ctx: &TenantContext,
        filter: &TransactionFilter,
        page: u32,
        page_size: u32,
    ) -> CoreResult<Page<FundTransaction>>;
}
