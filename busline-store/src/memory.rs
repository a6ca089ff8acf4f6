use async_trait::async_trait;
use busline_domain::booking::{Booking, PaymentStatus};
use busline_domain::inventory::{HoldRecord, ScheduleInventory, SeatNumber};
use busline_domain::repository::{BookingStore, InventoryStore, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory inventory store: the injected fake the test suite runs on, and
/// the default wiring when no database is configured.
#[derive(Default)]
pub struct MemoryInventoryStore {
    schedules: Mutex<HashMap<Uuid, ScheduleInventory>>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn create_schedule(&self, inventory: &ScheduleInventory) -> StoreResult<()> {
        let mut schedules = self.schedules.lock().await;
        if schedules.contains_key(&inventory.schedule_id) {
            return Err(format!("schedule {} already exists", inventory.schedule_id).into());
        }
        schedules.insert(inventory.schedule_id, inventory.clone());
        Ok(())
    }

    async fn load_all_schedules(&self) -> StoreResult<Vec<ScheduleInventory>> {
        Ok(self.schedules.lock().await.values().cloned().collect())
    }

    async fn insert_hold(&self, schedule_id: Uuid, hold: &HoldRecord) -> StoreResult<()> {
        let mut schedules = self.schedules.lock().await;
        let inv = schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| format!("schedule {schedule_id} not found"))?;
        inv.holds.insert(hold.booking_id, hold.clone());
        Ok(())
    }

    async fn remove_hold(&self, schedule_id: Uuid, booking_id: Uuid) -> StoreResult<()> {
        let mut schedules = self.schedules.lock().await;
        let inv = schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| format!("schedule {schedule_id} not found"))?;
        inv.holds.remove(&booking_id);
        Ok(())
    }

    async fn commit_seats(
        &self,
        schedule_id: Uuid,
        booking_id: Uuid,
        seats: &BTreeSet<SeatNumber>,
    ) -> StoreResult<()> {
        let mut schedules = self.schedules.lock().await;
        let inv = schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| format!("schedule {schedule_id} not found"))?;
        inv.holds.remove(&booking_id);
        for seat in seats {
            inv.booked.insert(*seat, booking_id);
        }
        Ok(())
    }

    async fn release_seats(
        &self,
        schedule_id: Uuid,
        _booking_id: Uuid,
        seats: &BTreeSet<SeatNumber>,
    ) -> StoreResult<()> {
        let mut schedules = self.schedules.lock().await;
        let inv = schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| format!("schedule {schedule_id} not found"))?;
        for seat in seats {
            inv.booked.remove(seat);
        }
        Ok(())
    }
}

/// In-memory booking store; same role as [`MemoryInventoryStore`].
#[derive(Default)]
pub struct MemoryBookingStore {
    bookings: Mutex<HashMap<Uuid, Booking>>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn insert(&self, booking: &Booking) -> StoreResult<()> {
        let mut bookings = self.bookings.lock().await;
        if bookings.contains_key(&booking.id) {
            return Err(format!("booking {} already exists", booking.id).into());
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update(&self, booking: &Booking) -> StoreResult<()> {
        let mut bookings = self.bookings.lock().await;
        if !bookings.contains_key(&booking.id) {
            return Err(format!("booking {} not found", booking.id).into());
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.bookings.lock().await.get(&booking_id).cloned())
    }

    async fn list_stale_in_flight(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let bookings = self.bookings.lock().await;
        let mut stale: Vec<Booking> = bookings
            .values()
            .filter(|b| {
                matches!(
                    b.payment_status,
                    PaymentStatus::Processing | PaymentStatus::Redirected
                ) && b.payment_initiated_at < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.payment_initiated_at);
        Ok(stale)
    }
}
