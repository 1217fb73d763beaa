pub mod models;
pub mod repository;
pub mod ledger;
pub mod memory;

pub use models::{
    AlertLevel, BatchDepositResult, DepositLine, DepositOutcome, Fund, FundStatus, FundTransaction,
    FundType, NewFund, Page, TransactionFilter, TransactionRequest, TransactionType,
};
pub use repository::FundRepository;
pub use ledger::{
    FundLedger, MAX_BATCH_DEPOSIT_ITEMS, MAX_BATCH_DEPOSIT_TOTAL, MAX_SINGLE_DEPOSIT,
};
pub use memory::InMemoryFundRepository;
