use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Seats are numbered 1..=capacity and compared by exact equality.
pub type SeatNumber = u32;

/// A time-limited, non-final reservation of seats pending payment resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldRecord {
    pub booking_id: Uuid,
    pub seats: BTreeSet<SeatNumber>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl HoldRecord {
    pub fn new(booking_id: Uuid, seats: BTreeSet<SeatNumber>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            booking_id,
            seats,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Per-schedule seat state: the permanently booked set plus the short-lived
/// hold table. Mutated only by the seat inventory coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleInventory {
    pub schedule_id: Uuid,
    pub capacity: u32,
    /// Seat -> owning booking. The owner index is what makes
    /// release-after-commit possible.
    pub booked: BTreeMap<SeatNumber, Uuid>,
    /// Booking -> active hold.
    pub holds: HashMap<Uuid, HoldRecord>,
}

impl ScheduleInventory {
    pub fn new(schedule_id: Uuid, capacity: u32) -> Self {
        Self {
            schedule_id,
            capacity,
            booked: BTreeMap::new(),
            holds: HashMap::new(),
        }
    }

    /// Seats covered by holds that have not yet expired.
    pub fn held_seats(&self, now: DateTime<Utc>) -> BTreeSet<SeatNumber> {
        self.holds
            .values()
            .filter(|h| !h.is_expired(now))
            .flat_map(|h| h.seats.iter().copied())
            .collect()
    }

    /// Seats a new hold could still take: capacity minus booked minus actively held.
    pub fn available(&self, now: DateTime<Utc>) -> u32 {
        self.capacity
            .saturating_sub(self.booked.len() as u32)
            .saturating_sub(self.held_seats(now).len() as u32)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AvailabilitySnapshot {
        AvailabilitySnapshot {
            schedule_id: self.schedule_id,
            capacity: self.capacity,
            available: self.available(now),
            booked_seats: self.booked.keys().copied().collect(),
        }
    }
}

/// Read model published for schedule browsing. Other subsystems read this,
/// never write it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    pub schedule_id: Uuid,
    pub capacity: u32,
    pub available: u32,
    pub booked_seats: Vec<SeatNumber>,
}
