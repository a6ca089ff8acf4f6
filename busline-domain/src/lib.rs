pub mod booking;
pub mod inventory;
pub mod repository;

pub use booking::{Booking, BookingStatus, NewBooking, PaymentStatus};
pub use inventory::{AvailabilitySnapshot, HoldRecord, ScheduleInventory, SeatNumber};
pub use repository::{AvailabilityCache, BookingStore, InventoryStore, StoreResult};
