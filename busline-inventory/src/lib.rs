pub mod coordinator;

pub use coordinator::{CommitResult, InventoryError, SeatInventoryCoordinator};
