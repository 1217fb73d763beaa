pub mod models;

pub use models::status::{OperatorType, OrderStatus, UnknownStatus};
