use mercato_core::audit::{self, AuditSink};
use mercato_core::{Clock, CoreError, CoreResult, TenantContext, MAX_CAS_RETRIES};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    AlertLevel, BatchDepositResult, DepositLine, DepositOutcome, Fund, FundStatus,
    FundTransaction, NewFund, Page, TransactionFilter, TransactionRequest, TransactionType,
};
use crate::repository::FundRepository;

/// 1,000,000.00 in minor units.
pub const MAX_SINGLE_DEPOSIT: i64 = 100_000_000;
pub const MAX_BATCH_DEPOSIT_ITEMS: usize = 100;
/// 10,000,000.00 in minor units.
pub const MAX_BATCH_DEPOSIT_TOTAL: i64 = 1_000_000_000;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Append-only transaction log over merchant funds.
pub struct FundLedger {
    repo: Arc<dyn FundRepository>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl FundLedger {
    pub fn new(repo: Arc<dyn FundRepository>, clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>) -> Self {
        Self { repo, clock, audit }
    }

    pub async fn open_fund(&self, ctx: &TenantContext, new_fund: NewFund) -> CoreResult<Fund> {
        if let (Some(warning), Some(critical)) = (new_fund.warning_threshold, new_fund.critical_threshold) {
            if critical > warning {
                return Err(CoreError::Validation(
                    "critical threshold must not exceed warning threshold".to_string(),
                ));
            }
        }

        let now = self.clock.now();
        let fund = Fund {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id(),
            merchant_id: new_fund.merchant_id,
            fund_type: new_fund.fund_type,
            balance: 0,
            currency: new_fund.currency,
            status: FundStatus::Active,
            warning_threshold: new_fund.warning_threshold,
            critical_threshold: new_fund.critical_threshold,
            created_at: now,
            updated_at: now,
        };
        self.repo.create_fund(ctx, &fund).await?;
        audit::record(
            self.audit.as_ref(),
            ctx.tenant_id(),
            "fund",
            "open",
            serde_json::json!({ "fund_id": fund.id, "merchant_id": fund.merchant_id }),
        )
        .await;
        Ok(fund)
    }

    pub async fn get_fund(&self, ctx: &TenantContext, fund_id: Uuid) -> CoreResult<Fund> {
        self.repo.get_fund(ctx, fund_id).await
    }

    pub async fn set_status(&self, ctx: &TenantContext, fund_id: Uuid, status: FundStatus) -> CoreResult<Fund> {
        let fund = self.repo.set_status(ctx, fund_id, status).await?;
        audit::record(
            self.audit.as_ref(),
            ctx.tenant_id(),
            "fund",
            "set_status",
            serde_json::json!({ "fund_id": fund_id, "status": status.as_str() }),
        )
        .await;
        Ok(fund)
    }

    /// Reads the balance, computes the movement and writes row plus balance as one unit.
    /// A stale read is retried; the written `balance_before` always equals the balance that
    /// was current at write time.
    pub async fn apply_transaction(
        &self,
        ctx: &TenantContext,
        fund_id: Uuid,
        request: TransactionRequest,
    ) -> CoreResult<FundTransaction> {
        if request.amount <= 0 {
            return Err(CoreError::InvalidAmount(request.amount));
        }

        for _ in 0..MAX_CAS_RETRIES {
            let fund = self.repo.get_fund(ctx, fund_id).await?;
            if fund.status == FundStatus::Frozen {
                return Err(CoreError::Validation(format!("fund {} is frozen", fund_id)));
            }

            let tx = FundTransaction::next(
                &fund,
                &request,
                ctx.actor_id().map(str::to_string),
                self.clock.now(),
            )?;

            if self.repo.append_transaction(ctx, &tx).await? {
                tracing::info!(
                    tenant_id = %ctx.tenant_id(),
                    fund_id = %fund_id,
                    transaction_type = %tx.transaction_type,
                    amount = tx.amount,
                    balance_after = tx.balance_after,
                    "fund transaction applied"
                );
                audit::record(
                    self.audit.as_ref(),
                    ctx.tenant_id(),
                    "fund_transaction",
                    tx.transaction_type.as_str(),
                    serde_json::json!({
                        "fund_id": fund_id,
                        "transaction_id": tx.id,
                        "amount": tx.amount,
                        "balance_before": tx.balance_before,
                        "balance_after": tx.balance_after,
                    }),
                )
                .await;

                if tx.transaction_type == TransactionType::Debit {
                    self.check_balance_alert(ctx, &fund, tx.balance_after).await;
                }
                return Ok(tx);
            }

            tracing::debug!(fund_id = %fund_id, "fund balance moved underneath us, retrying");
        }

        Err(CoreError::ConcurrentModification(format!(
            "fund {} balance changed concurrently",
            fund_id
        )))
    }

    pub async fn credit(
        &self,
        ctx: &TenantContext,
        fund_id: Uuid,
        amount: i64,
        description: &str,
    ) -> CoreResult<FundTransaction> {
        self.apply_transaction(ctx, fund_id, TransactionRequest::credit(amount, description))
            .await
    }

    pub async fn debit(
        &self,
        ctx: &TenantContext,
        fund_id: Uuid,
        amount: i64,
        description: &str,
    ) -> CoreResult<FundTransaction> {
        self.apply_transaction(ctx, fund_id, TransactionRequest::debit(amount, description))
            .await
    }

    /// A credit bounded by the single-deposit cap.
    pub async fn deposit(
        &self,
        ctx: &TenantContext,
        fund_id: Uuid,
        amount: i64,
        description: Option<String>,
    ) -> CoreResult<FundTransaction> {
        validate_deposit_amount(amount)?;
        self.apply_transaction(
            ctx,
            fund_id,
            TransactionRequest {
                transaction_type: TransactionType::Credit,
                amount,
                description: description.or_else(|| Some("deposit".to_string())),
                reference_type: None,
                reference_id: None,
            },
        )
        .await
    }

    /// Batch limits are checked before any line is applied; after that each line stands alone.
    pub async fn batch_deposit(
        &self,
        ctx: &TenantContext,
        lines: Vec<DepositLine>,
    ) -> CoreResult<BatchDepositResult> {
        ctx.ensure_valid()?;
        if lines.is_empty() {
            return Err(CoreError::Validation("batch deposit has no lines".to_string()));
        }
        if lines.len() > MAX_BATCH_DEPOSIT_ITEMS {
            return Err(CoreError::BatchLimitExceeded(format!(
                "{} deposit lines exceeds the limit of {}",
                lines.len(),
                MAX_BATCH_DEPOSIT_ITEMS
            )));
        }
        let total = lines
            .iter()
            .try_fold(0i64, |acc, line| acc.checked_add(line.amount.max(0)));
        match total {
            Some(total) if total <= MAX_BATCH_DEPOSIT_TOTAL => {}
            _ => {
                return Err(CoreError::BatchLimitExceeded(format!(
                    "batch deposit total exceeds {}",
                    MAX_BATCH_DEPOSIT_TOTAL
                )))
            }
        }

        let mut results = Vec::with_capacity(lines.len());
        for line in lines {
            let outcome = match self
                .deposit(ctx, line.fund_id, line.amount, line.description.clone())
                .await
            {
                Ok(tx) => DepositOutcome {
                    fund_id: line.fund_id,
                    success: true,
                    transaction_id: Some(tx.id),
                    balance_after: Some(tx.balance_after),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(fund_id = %line.fund_id, "batch deposit line failed: {}", e);
                    DepositOutcome {
                        fund_id: line.fund_id,
                        success: false,
                        transaction_id: None,
                        balance_after: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(outcome);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        Ok(BatchDepositResult {
            success_count,
            fail_count: results.len() - success_count,
            results,
        })
    }

    pub async fn list_transactions(
        &self,
        ctx: &TenantContext,
        filter: TransactionFilter,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> CoreResult<Page<FundTransaction>> {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(CoreError::Validation("time range start is after its end".to_string()));
            }
        }
        self.repo.list_transactions(ctx, &filter, page, page_size).await
    }

    async fn check_balance_alert(&self, ctx: &TenantContext, fund: &Fund, balance: i64) {
        let Some((level, threshold)) =
            AlertLevel::evaluate(balance, fund.warning_threshold, fund.critical_threshold)
        else {
            return;
        };

        tracing::warn!(
            tenant_id = %ctx.tenant_id(),
            fund_id = %fund.id,
            merchant_id = %fund.merchant_id,
            level = level.as_str(),
            balance,
            threshold,
            "fund balance below threshold"
        );
        audit::record(
            self.audit.as_ref(),
            ctx.tenant_id(),
            "fund",
            "balance_alert",
            serde_json::json!({
                "fund_id": fund.id,
                "merchant_id": fund.merchant_id,
                "level": level.as_str(),
                "balance": balance,
                "threshold": threshold,
            }),
        )
        .await;
    }
}

fn validate_deposit_amount(amount: i64) -> CoreResult<()> {
    if amount <= 0 {
        return Err(CoreError::InvalidAmount(amount));
    }
    if amount > MAX_SINGLE_DEPOSIT {
        return Err(CoreError::InvalidAmount(amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryFundRepository;
    use crate::models::FundType;
    use async_trait::async_trait;
    use chrono::Utc;
    use mercato_core::{FixedClock, OperatorType, TracingAuditSink};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAudit {
        actions: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl AuditSink for RecordingAudit {
        async fn log_tenant_access(
            &self,
            _tenant_id: Uuid,
            _resource: &str,
            action: &str,
            details: serde_json::Value,
        ) -> CoreResult<()> {
            self.actions.lock().unwrap().push((action.to_string(), details));
            Ok(())
        }
    }

    fn ledger_with(audit: Arc<dyn AuditSink>) -> (Arc<FundLedger>, Arc<InMemoryFundRepository>) {
        let repo = Arc::new(InMemoryFundRepository::new());
        let ledger = FundLedger::new(repo.clone(), Arc::new(FixedClock::new(Utc::now())), audit);
        (Arc::new(ledger), repo)
    }

    fn merchant_ctx() -> TenantContext {
        TenantContext::new(Uuid::new_v4(), OperatorType::Merchant, Some("merchant-7".to_string()))
            .unwrap()
    }

    async fn open(ledger: &FundLedger, ctx: &TenantContext) -> Fund {
        ledger
            .open_fund(
                ctx,
                NewFund {
                    merchant_id: Uuid::new_v4(),
                    fund_type: FundType::Deposit,
                    currency: "CNY".to_string(),
                    warning_threshold: None,
                    critical_threshold: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_credit_then_debits() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;
        ledger.deposit(&ctx, fund.id, 200, None).await.unwrap();

        let credit = ledger.credit(&ctx, fund.id, 100, "top up").await.unwrap();
        assert_eq!((credit.balance_before, credit.balance_after), (200, 300));
        assert_eq!(credit.operator_id.as_deref(), Some("merchant-7"));

        let err = ledger.debit(&ctx, fund.id, 350, "order").await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientBalance { .. }));
        assert_eq!(ledger.get_fund(&ctx, fund.id).await.unwrap().balance, 300);

        let debit = ledger.debit(&ctx, fund.id, 250, "order").await.unwrap();
        assert_eq!(debit.balance_after, 50);
        assert_eq!(ledger.get_fund(&ctx, fund.id).await.unwrap().balance, 50);
    }

    #[tokio::test]
    async fn test_invalid_amount() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;
        assert_eq!(ledger.credit(&ctx, fund.id, 0, "x").await.unwrap_err(), CoreError::InvalidAmount(0));
        assert_eq!(
            ledger.deposit(&ctx, fund.id, MAX_SINGLE_DEPOSIT + 1, None).await.unwrap_err(),
            CoreError::InvalidAmount(MAX_SINGLE_DEPOSIT + 1)
        );
        ledger.deposit(&ctx, fund.id, MAX_SINGLE_DEPOSIT, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_deposit_over_item_limit_writes_nothing() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;

        let lines: Vec<DepositLine> = (0..101)
            .map(|_| DepositLine { fund_id: fund.id, amount: 10, description: None })
            .collect();
        assert!(matches!(
            ledger.batch_deposit(&ctx, lines).await,
            Err(CoreError::BatchLimitExceeded(_))
        ));

        let page = ledger
            .list_transactions(&ctx, TransactionFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(ledger.get_fund(&ctx, fund.id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_batch_deposit_over_total_limit_writes_nothing() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;

        let lines: Vec<DepositLine> = (0..11)
            .map(|_| DepositLine { fund_id: fund.id, amount: MAX_SINGLE_DEPOSIT, description: None })
            .collect();
        assert!(matches!(
            ledger.batch_deposit(&ctx, lines).await,
            Err(CoreError::BatchLimitExceeded(_))
        ));
        assert_eq!(ledger.get_fund(&ctx, fund.id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_batch_deposit_isolates_bad_lines() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;

        let result = ledger
            .batch_deposit(
                &ctx,
                vec![
                    DepositLine { fund_id: fund.id, amount: 500, description: None },
                    DepositLine { fund_id: Uuid::new_v4(), amount: 500, description: None },
                    DepositLine { fund_id: fund.id, amount: -1, description: None },
                    DepositLine { fund_id: fund.id, amount: 250, description: Some("bonus".into()) },
                ],
            )
            .await
            .unwrap();

        assert_eq!((result.success_count, result.fail_count), (2, 2));
        assert_eq!(ledger.get_fund(&ctx, fund.id).await.unwrap().balance, 750);
    }

    #[tokio::test]
    async fn test_list_transactions_filters_and_pages() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;
        for _ in 0..5 {
            ledger.credit(&ctx, fund.id, 10, "credit").await.unwrap();
        }
        ledger.debit(&ctx, fund.id, 5, "debit").await.unwrap();

        let debits = ledger
            .list_transactions(
                &ctx,
                TransactionFilter {
                    transaction_type: Some(TransactionType::Debit),
                    ..Default::default()
                },
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(debits.total, 1);

        let page = ledger
            .list_transactions(&ctx, TransactionFilter::default(), Some(2), Some(4))
            .await
            .unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.items.len(), 2);

        let other = TenantContext::system(Uuid::new_v4()).unwrap();
        let foreign = ledger
            .list_transactions(&other, TransactionFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(foreign.total, 0);
        assert_eq!(ledger.get_fund(&other, fund.id).await.unwrap_err(), CoreError::FundNotFound(fund.id));
    }

    #[tokio::test]
    async fn test_frozen_fund_rejects_movements() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;
        ledger.set_status(&ctx, fund.id, FundStatus::Frozen).await.unwrap();
        assert!(matches!(
            ledger.credit(&ctx, fund.id, 10, "x").await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_debit_raises_critical_alert() {
        let audit = Arc::new(RecordingAudit::default());
        let (ledger, _) = ledger_with(audit.clone());
        let ctx = merchant_ctx();
        let fund = ledger
            .open_fund(
                &ctx,
                NewFund {
                    merchant_id: Uuid::new_v4(),
                    fund_type: FundType::Allocation,
                    currency: "CNY".to_string(),
                    warning_threshold: Some(500),
                    critical_threshold: Some(100),
                },
            )
            .await
            .unwrap();
        ledger.credit(&ctx, fund.id, 1000, "seed").await.unwrap();
        ledger.debit(&ctx, fund.id, 950, "big order").await.unwrap();

        let actions = audit.actions.lock().unwrap();
        let (_, details) = actions
            .iter()
            .find(|(action, _)| action == "balance_alert")
            .expect("alert recorded");
        assert_eq!(details["level"], "critical");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_lose_updates() {
        let (ledger, _) = ledger_with(Arc::new(TracingAuditSink));
        let ctx = merchant_ctx();
        let fund = open(&ledger, &ctx).await;
        ledger.credit(&ctx, fund.id, 1000, "seed").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(&ctx, fund.id, 100, "order").await.is_ok()
            }));
        }
        let mut succeeded = 0i64;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        let balance = ledger.get_fund(&ctx, fund.id).await.unwrap().balance;
        assert!(balance >= 0);
        assert_eq!(balance, 1000 - 100 * succeeded);

        let history = ledger
            .list_transactions(&ctx, TransactionFilter::default(), None, Some(100))
            .await
            .unwrap();
        for tx in &history.items {
            tx.verify().unwrap();
        }
        // Newest first: each row starts where the previous one ended.
        for pair in history.items.windows(2) {
            assert_eq!(pair[0].balance_before, pair[1].balance_after);
        }
    }
}
