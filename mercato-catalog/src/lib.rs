pub mod models;
pub mod repository;
pub mod inventory;
pub mod memory;

pub use models::{
    AdjustmentOutcome, Availability, InventoryReservation, ProductStock, ReservationStatus,
    ReserveRequest, StockAdjustment,
};
pub use repository::InventoryRepository;
pub use inventory::{InventoryReservationManager, MAX_ADJUSTMENT_BATCH};
pub use memory::InMemoryInventoryRepository;
