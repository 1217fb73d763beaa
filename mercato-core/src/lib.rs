pub mod audit;
pub mod clock;
pub mod directory;
pub mod lease;
pub mod tenant;

use uuid::Uuid;

pub use mercato_shared::{OperatorType, OrderStatus};

pub use audit::{AuditSink, TracingAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use directory::TenantDirectory;
pub use lease::{LocalLease, MonitorLease};
pub use tenant::TenantContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Operator id is required for non-system transitions")]
    OperatorRequired,
    #[error("Insufficient balance on fund {fund_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        fund_id: Uuid,
        balance: i64,
        requested: i64,
    },
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("Batch limit exceeded: {0}")]
    BatchLimitExceeded(String),
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: Uuid,
        available: i64,
        requested: i64,
    },
    #[error("Reservation {reservation_id} is {status}, expected active")]
    InvalidReservationState { reservation_id: Uuid, status: String },
    #[error("Invalid tenant context: {0}")]
    InvalidTenantContext(String),
    #[error("Timeout monitor is already running")]
    AlreadyRunning,
    #[error("Timeout monitor is not running")]
    NotRunning,
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),
    #[error("Fund not found: {0}")]
    FundNotFound(Uuid),
    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),
    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CoreError::OperatorRequired => "OPERATOR_REQUIRED",
            CoreError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            CoreError::InvalidAmount(_) => "INVALID_AMOUNT",
            CoreError::BatchLimitExceeded(_) => "BATCH_LIMIT_EXCEEDED",
            CoreError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            CoreError::InvalidReservationState { .. } => "INVALID_RESERVATION_STATE",
            CoreError::InvalidTenantContext(_) => "INVALID_TENANT_CONTEXT",
            CoreError::AlreadyRunning => "ALREADY_RUNNING",
            CoreError::NotRunning => "NOT_RUNNING",
            CoreError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            CoreError::FundNotFound(_) => "FUND_NOT_FOUND",
            CoreError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            CoreError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            CoreError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Bounded retries for compare-and-swap writes before giving up with `ConcurrentModification`.
pub const MAX_CAS_RETRIES: usize = 3;
