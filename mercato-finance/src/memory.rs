use async_trait::async_trait;
use chrono::Utc;
use mercato_core::{CoreError, CoreResult, TenantContext};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Fund, FundStatus, FundTransaction, Page, TransactionFilter};
use crate::repository::FundRepository;

#[derive(Default)]
struct LedgerState {
    funds: HashMap<Uuid, Fund>,
    transactions: Vec<FundTransaction>,
}

#[derive(Default)]
pub struct InMemoryFundRepository {
    state: RwLock<LedgerState>,
}

impl InMemoryFundRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FundRepository for InMemoryFundRepository {
    async fn create_fund(&self, ctx: &TenantContext, fund: &Fund) -> CoreResult<()> {
        ctx.ensure_valid()?;
        if fund.tenant_id != ctx.tenant_id() {
            return Err(CoreError::InvalidTenantContext("fund tenant mismatch".to_string()));
        }
        let mut state = self.state.write().await;
        state.funds.insert(fund.id, fund.clone());
        Ok(())
    }

    async fn get_fund(&self, ctx: &TenantContext, fund_id: Uuid) -> CoreResult<Fund> {
        ctx.ensure_valid()?;
        let state = self.state.read().await;
        state
            .funds
            .get(&fund_id)
            .filter(|f| f.tenant_id == ctx.tenant_id())
            .cloned()
            .ok_or(CoreError::FundNotFound(fund_id))
    }

    async fn set_status(&self, ctx: &TenantContext, fund_id: Uuid, status: FundStatus) -> CoreResult<Fund> {
        ctx.ensure_valid()?;
        let mut state = self.state.write().await;
        let fund = state
            .funds
            .get_mut(&fund_id)
            .filter(|f| f.tenant_id == ctx.tenant_id())
            .ok_or(CoreError::FundNotFound(fund_id))?;
        fund.status = status;
        fund.updated_at = Utc::now();
        Ok(fund.clone())
    }

    async fn append_transaction(&self, ctx: &TenantContext, tx: &FundTransaction) -> CoreResult<bool> {
        ctx.ensure_valid()?;
        tx.verify()?;
        let mut state = self.state.write().await;
        let fund = state
            .funds
            .get_mut(&tx.fund_id)
            .filter(|f| f.tenant_id == ctx.tenant_id())
            .ok_or(CoreError::FundNotFound(tx.fund_id))?;
        if fund.balance != tx.balance_before {
            return Ok(false);
        }
        fund.balance = tx.balance_after;
        fund.updated_at = tx.created_at;
        state.transactions.push(tx.clone());
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
        let state = self.state.read().await;
        let matching: Vec<&FundTransaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.tenant_id == ctx.tenant_id() && filter.matches(tx))
            .collect();

        let offset = (page.saturating_sub(1) as usize) * page_size as usize;
        Ok(Page {
            total: matching.len() as u64,
            items: matching
                .into_iter()
                .skip(offset)
                .take(page_size as usize)
                .cloned()
                .collect(),
            page,
            page_size,
        })
    }
}
