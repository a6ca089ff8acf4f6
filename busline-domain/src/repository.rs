use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::error::Error;
use uuid::Uuid;

use crate::booking::Booking;
use crate::inventory::{AvailabilitySnapshot, HoldRecord, ScheduleInventory, SeatNumber};

pub type StoreResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Persistence behind the seat inventory coordinator. The coordinator is the
/// single writer; the store only has to apply each step durably, not to
/// re-check conflicts.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn create_schedule(&self, inventory: &ScheduleInventory) -> StoreResult<()>;

    /// Full inventory state, loaded once at coordinator start-up.
    async fn load_all_schedules(&self) -> StoreResult<Vec<ScheduleInventory>>;

    async fn insert_hold(&self, schedule_id: Uuid, hold: &HoldRecord) -> StoreResult<()>;

    async fn remove_hold(&self, schedule_id: Uuid, booking_id: Uuid) -> StoreResult<()>;

    /// Move a hold's seats into the booked set and drop the hold, as one
    /// durable step.
    async fn commit_seats(
        &self,
        schedule_id: Uuid,
        booking_id: Uuid,
        seats: &BTreeSet<SeatNumber>,
    ) -> StoreResult<()>;

    /// Remove a booking's seats from the booked set (cancellation after
    /// confirmation).
    async fn release_seats(
        &self,
        schedule_id: Uuid,
        booking_id: Uuid,
        seats: &BTreeSet<SeatNumber>,
    ) -> StoreResult<()>;
}

/// Persistence behind the booking ledger.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: &Booking) -> StoreResult<()>;

    async fn update(&self, booking: &Booking) -> StoreResult<()>;

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<Booking>>;

    /// Bookings whose payment is in flight (processing or redirected) and
    /// whose payment was initiated before `cutoff`.
    async fn list_stale_in_flight(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Booking>>;
}

/// Best-effort availability read-cache for the schedule-browsing side.
/// The engine publishes after every inventory mutation and never reads back.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    async fn publish_availability(&self, snapshot: &AvailabilitySnapshot) -> StoreResult<()>;
}
