use chrono::{DateTime, Utc};
use mercato_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FundType {
    Deposit,
    Allocation,
    Consumption,
    Refund,
}

impl FundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundType::Deposit => "deposit",
            FundType::Allocation => "allocation",
            FundType::Consumption => "consumption",
            FundType::Refund => "refund",
        }
    }
}

impl FromStr for FundType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(FundType::Deposit),
            "allocation" => Ok(FundType::Allocation),
            "consumption" => Ok(FundType::Consumption),
            "refund" => Ok(FundType::Refund),
            other => Err(format!("unknown fund type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FundStatus {
    Active,
    Frozen,
}

impl FundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundStatus::Active => "active",
            FundStatus::Frozen => "frozen",
        }
    }
}

impl FromStr for FundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FundStatus::Active),
            "frozen" => Ok(FundStatus::Frozen),
            other => Err(format!("unknown fund status: {}", other)),
        }
    }
}

/// A merchant's balance-bearing record. `balance` is denormalized from the transaction log
/// and only ever written together with a transaction row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fund {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub merchant_id: Uuid,
    pub fund_type: FundType,
    /// Minor units.
    pub balance: i64,
    pub currency: String,
    pub status: FundStatus,
    pub warning_threshold: Option<i64>,
    pub critical_threshold: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFund {
    pub merchant_id: Uuid,
    pub fund_type: FundType,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub warning_threshold: Option<i64>,
    pub critical_threshold: Option<i64>,
}

fn default_currency() -> String {
    "CNY".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// One ledger movement. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FundTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub fund_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub operator_id: Option<String>,
    pub description: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl FundTransaction {
    /// Builds the next movement for `fund`, computing `balance_after` from the fund's current
    /// balance.
    pub fn next(
        fund: &Fund,
        request: &TransactionRequest,
        operator_id: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        if request.amount <= 0 {
            return Err(CoreError::InvalidAmount(request.amount));
        }

        let balance_before = fund.balance;
        let balance_after = match request.transaction_type {
            TransactionType::Credit => balance_before
                .checked_add(request.amount)
                .ok_or(CoreError::InvalidAmount(request.amount))?,
            TransactionType::Debit => balance_before - request.amount,
        };

        if balance_after < 0 {
            return Err(CoreError::InsufficientBalance {
                fund_id: fund.id,
                balance: balance_before,
                requested: request.amount,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: fund.tenant_id,
            fund_id: fund.id,
            transaction_type: request.transaction_type,
            amount: request.amount,
            balance_before,
            balance_after,
            operator_id,
            description: request.description.clone(),
            reference_type: request.reference_type.clone(),
            reference_id: request.reference_id,
            created_at: now,
        })
    }

    /// The write-time check every repository runs before persisting a row.
    pub fn verify(&self) -> CoreResult<()> {
        if self.amount <= 0 {
            return Err(CoreError::InvalidAmount(self.amount));
        }
        if self.balance_before < 0 || self.balance_after < 0 {
            return Err(CoreError::InsufficientBalance {
                fund_id: self.fund_id,
                balance: self.balance_before,
                requested: self.amount,
            });
        }
        let expected = match self.transaction_type {
            TransactionType::Credit => self.balance_before + self.amount,
            TransactionType::Debit => self.balance_before - self.amount,
        };
        if expected != self.balance_after {
            return Err(CoreError::Validation(format!(
                "ledger formula violated: {} {} {} != {}",
                self.balance_before, self.transaction_type, self.amount, self.balance_after
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub description: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
}

impl TransactionRequest {
    pub fn credit(amount: i64, description: impl Into<String>) -> Self {
        Self {
            transaction_type: TransactionType::Credit,
            amount,
            description: Some(description.into()),
            reference_type: None,
            reference_id: None,
        }
    }

    pub fn debit(amount: i64, description: impl Into<String>) -> Self {
        Self {
            transaction_type: TransactionType::Debit,
            amount,
            description: Some(description.into()),
            reference_type: None,
            reference_id: None,
        }
    }

    pub fn with_reference(mut self, reference_type: impl Into<String>, reference_id: Uuid) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(reference_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositLine {
    pub fund_id: Uuid,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositOutcome {
    pub fund_id: Uuid,
    pub success: bool,
    pub transaction_id: Option<Uuid>,
    pub balance_after: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDepositResult {
    pub success_count: usize,
    pub fail_count: usize,
    pub results: Vec<DepositOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub fund_id: Option<Uuid>,
    pub transaction_type: Option<TransactionType>,
    pub operator_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &FundTransaction) -> bool {
        self.fund_id.map_or(true, |id| tx.fund_id == id)
            && self.transaction_type.map_or(true, |t| tx.transaction_type == t)
            && self
                .operator_id
                .as_deref()
                .map_or(true, |op| tx.operator_id.as_deref() == Some(op))
            && self.from.map_or(true, |from| tx.created_at >= from)
            && self.to.map_or(true, |to| tx.created_at <= to)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Balance alert raised after a debit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    /// Critical is checked first, so a balance past both thresholds reports critical.
    pub fn evaluate(
        balance: i64,
        warning: Option<i64>,
        critical: Option<i64>,
    ) -> Option<(AlertLevel, i64)> {
        if let Some(threshold) = critical.filter(|t| balance <= *t) {
            return Some((AlertLevel::Critical, threshold));
        }
        warning
            .filter(|t| balance <= *t)
            .map(|threshold| (AlertLevel::Warning, threshold))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}
