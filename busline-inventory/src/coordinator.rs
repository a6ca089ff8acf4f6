use busline_domain::inventory::{AvailabilitySnapshot, HoldRecord, ScheduleInventory, SeatNumber};
use busline_domain::repository::{AvailabilityCache, InventoryStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a commit. A retried commit reports `already_committed` and has
/// no inventory effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResult {
    pub already_committed: bool,
}

/// The sole writer of schedule inventory state.
///
/// Each schedule's seat state lives behind its own async mutex, so the
/// conflict check and hold insertion of `reserve` are one atomic step per
/// schedule while unrelated schedules proceed in parallel. Every mutation is
/// written through the injected store before the schedule lock is dropped.
pub struct SeatInventoryCoordinator {
    store: Arc<dyn InventoryStore>,
    cache: Option<Arc<dyn AvailabilityCache>>,
    schedules: RwLock<HashMap<Uuid, Arc<Mutex<ScheduleInventory>>>>,
    /// Booking -> schedule, kept from reserve until the booking no longer
    /// occupies any seat (released or swept). Survives commit so that a
    /// later cancellation can find the seats to give back.
    bookings: RwLock<HashMap<Uuid, Uuid>>,
}

impl SeatInventoryCoordinator {
    /// Hydrate the coordinator from the store.
    pub async fn load(
        store: Arc<dyn InventoryStore>,
        cache: Option<Arc<dyn AvailabilityCache>>,
    ) -> Result<Self, InventoryError> {
        let all = store
            .load_all_schedules()
            .await
            .map_err(InventoryError::store)?;

        let mut schedules = HashMap::new();
        let mut bookings = HashMap::new();
        for inv in all {
            for booking_id in inv.holds.keys() {
                bookings.insert(*booking_id, inv.schedule_id);
            }
            for booking_id in inv.booked.values() {
                bookings.insert(*booking_id, inv.schedule_id);
            }
            schedules.insert(inv.schedule_id, Arc::new(Mutex::new(inv)));
        }

        info!("Inventory loaded: {} schedules", schedules.len());
        Ok(Self {
            store,
            cache,
            schedules: RwLock::new(schedules),
            bookings: RwLock::new(bookings),
        })
    }

    /// Create the inventory record for a newly published schedule.
    pub async fn publish_schedule(
        &self,
        schedule_id: Uuid,
        capacity: u32,
    ) -> Result<(), InventoryError> {
        if self.schedules.read().await.contains_key(&schedule_id) {
            return Err(InventoryError::ScheduleExists(schedule_id));
        }

        let inventory = ScheduleInventory::new(schedule_id, capacity);
        self.store
            .create_schedule(&inventory)
            .await
            .map_err(InventoryError::store)?;

        let snapshot = inventory.snapshot(Utc::now());
        self.schedules
            .write()
            .await
            .insert(schedule_id, Arc::new(Mutex::new(inventory)));
        self.publish(snapshot).await;
        Ok(())
    }

    /// Place a hold on `seats` for `booking_id`, expiring after `ttl`.
    ///
    /// The conflict check runs against the booked set plus every active hold;
    /// on conflict nothing is mutated and the contested seats are reported.
    pub async fn reserve(
        &self,
        schedule_id: Uuid,
        seats: &BTreeSet<SeatNumber>,
        booking_id: Uuid,
        ttl: Duration,
    ) -> Result<HoldRecord, InventoryError> {
        let handle = self.schedule_handle(schedule_id).await?;
        let mut inv = handle.lock().await;

        if seats.is_empty() {
            return Err(InventoryError::InvalidSeats(
                "empty seat selection".to_string(),
            ));
        }
        let out_of_range: Vec<SeatNumber> = seats
            .iter()
            .copied()
            .filter(|s| *s == 0 || *s > inv.capacity)
            .collect();
        if !out_of_range.is_empty() {
            return Err(InventoryError::InvalidSeats(format!(
                "seats out of range 1..={}: {:?}",
                inv.capacity, out_of_range
            )));
        }

        let now = Utc::now();
        let mut taken: BTreeSet<SeatNumber> = inv.booked.keys().copied().collect();
        taken.extend(inv.held_seats(now));

        let conflicting_seats: Vec<SeatNumber> =
            seats.iter().copied().filter(|s| taken.contains(s)).collect();
        if !conflicting_seats.is_empty() {
            return Err(InventoryError::SeatConflict { conflicting_seats });
        }

        let hold = HoldRecord::new(booking_id, seats.clone(), now, ttl);
        self.store
            .insert_hold(schedule_id, &hold)
            .await
            .map_err(InventoryError::store)?;
        inv.holds.insert(booking_id, hold.clone());
        self.bookings.write().await.insert(booking_id, schedule_id);

        self.publish(inv.snapshot(now)).await;
        Ok(hold)
    }

    /// Move a held booking's seats into the booked set. Idempotent: a second
    /// commit for the same booking reports `already_committed` and performs
    /// no mutation. A missing or expired hold is `HoldNotFound`; the caller
    /// must re-run conflict detection before treating the booking as payable.
    pub async fn commit(&self, booking_id: Uuid) -> Result<CommitResult, InventoryError> {
        let schedule_id = self
            .booking_schedule(booking_id)
            .await
            .ok_or(InventoryError::HoldNotFound(booking_id))?;
        let handle = self.schedule_handle(schedule_id).await?;
        let mut inv = handle.lock().await;

        if inv.booked.values().any(|owner| *owner == booking_id) {
            return Ok(CommitResult {
                already_committed: true,
            });
        }

        let now = Utc::now();
        let hold = match inv.holds.get(&booking_id) {
            None => return Err(InventoryError::HoldNotFound(booking_id)),
            Some(hold) => hold.clone(),
        };

        if hold.is_expired(now) {
            // Lapsed but not yet swept; reclaim it here rather than
            // committing seats the hold no longer protects.
            if let Err(e) = self.store.remove_hold(schedule_id, booking_id).await {
                warn!("Failed to drop expired hold for {}: {}", booking_id, e);
            }
            inv.holds.remove(&booking_id);
            self.bookings.write().await.remove(&booking_id);
            self.publish(inv.snapshot(now)).await;
            return Err(InventoryError::HoldNotFound(booking_id));
        }

        self.store
            .commit_seats(schedule_id, booking_id, &hold.seats)
            .await
            .map_err(InventoryError::store)?;
        inv.holds.remove(&booking_id);
        for seat in &hold.seats {
            inv.booked.insert(*seat, booking_id);
        }

        self.publish(inv.snapshot(now)).await;
        Ok(CommitResult {
            already_committed: false,
        })
    }

    /// Return a booking's seats to the pool. Idempotent: with no hold and no
    /// committed seats this is a no-op. For a committed booking this is the
    /// inverse of commit (cancellation after confirmation).
    pub async fn release(&self, booking_id: Uuid) -> Result<(), InventoryError> {
        let Some(schedule_id) = self.booking_schedule(booking_id).await else {
            return Ok(());
        };
        let handle = self.schedule_handle(schedule_id).await?;
        let mut inv = handle.lock().await;

        if let Some(hold) = inv.holds.remove(&booking_id) {
            if let Err(e) = self.store.remove_hold(schedule_id, booking_id).await {
                inv.holds.insert(booking_id, hold);
                return Err(InventoryError::store(e));
            }
            self.bookings.write().await.remove(&booking_id);
            self.publish(inv.snapshot(Utc::now())).await;
            return Ok(());
        }

        let seats: BTreeSet<SeatNumber> = inv
            .booked
            .iter()
            .filter(|(_, owner)| **owner == booking_id)
            .map(|(seat, _)| *seat)
            .collect();
        if !seats.is_empty() {
            self.store
                .release_seats(schedule_id, booking_id, &seats)
                .await
                .map_err(InventoryError::store)?;
            for seat in &seats {
                inv.booked.remove(seat);
            }
            self.publish(inv.snapshot(Utc::now())).await;
        }
        self.bookings.write().await.remove(&booking_id);
        Ok(())
    }

    /// Release every hold past its expiry and return the affected bookings so
    /// the ledger can drive them to a terminal state. Safe to run alongside
    /// reserve/commit; a store failure keeps the hold for the next sweep.
    pub async fn sweep_expired_holds(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let handles: Vec<Arc<Mutex<ScheduleInventory>>> =
            self.schedules.read().await.values().cloned().collect();

        let mut released = Vec::new();
        for handle in handles {
            let mut inv = handle.lock().await;
            let expired: Vec<Uuid> = inv
                .holds
                .values()
                .filter(|h| h.is_expired(now))
                .map(|h| h.booking_id)
                .collect();
            if expired.is_empty() {
                continue;
            }

            for booking_id in expired {
                if let Err(e) = self.store.remove_hold(inv.schedule_id, booking_id).await {
                    warn!("Failed to sweep hold for {}: {}", booking_id, e);
                    continue;
                }
                inv.holds.remove(&booking_id);
                self.bookings.write().await.remove(&booking_id);
                released.push(booking_id);
            }
            self.publish(inv.snapshot(now)).await;
        }

        if !released.is_empty() {
            info!("Swept {} expired holds", released.len());
        }
        released
    }

    /// Read-only availability view for the browsing side.
    pub async fn availability(
        &self,
        schedule_id: Uuid,
    ) -> Result<AvailabilitySnapshot, InventoryError> {
        let handle = self.schedule_handle(schedule_id).await?;
        let inv = handle.lock().await;
        Ok(inv.snapshot(Utc::now()))
    }

    async fn schedule_handle(
        &self,
        schedule_id: Uuid,
    ) -> Result<Arc<Mutex<ScheduleInventory>>, InventoryError> {
        self.schedules
            .read()
            .await
            .get(&schedule_id)
            .cloned()
            .ok_or(InventoryError::UnknownSchedule(schedule_id))
    }

    async fn booking_schedule(&self, booking_id: Uuid) -> Option<Uuid> {
        self.bookings.read().await.get(&booking_id).copied()
    }

    async fn publish(&self, snapshot: AvailabilitySnapshot) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.publish_availability(&snapshot).await {
                warn!(
                    "Availability cache publish failed for {}: {}",
                    snapshot.schedule_id, e
                );
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Schedule not found: {0}")]
    UnknownSchedule(Uuid),

    #[error("Schedule already published: {0}")]
    ScheduleExists(Uuid),

    #[error("Invalid seat selection: {0}")]
    InvalidSeats(String),

    #[error("Seats unavailable: {conflicting_seats:?}")]
    SeatConflict { conflicting_seats: Vec<SeatNumber> },

    #[error("No active hold for booking: {0}")]
    HoldNotFound(Uuid),

    #[error("Inventory store error: {0}")]
    Store(String),
}

impl InventoryError {
    fn store(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        InventoryError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busline_store::memory::MemoryInventoryStore;

    async fn coordinator_with_schedule(capacity: u32) -> (SeatInventoryCoordinator, Uuid) {
        let store = Arc::new(MemoryInventoryStore::new());
        let coordinator = SeatInventoryCoordinator::load(store, None).await.unwrap();
        let schedule_id = Uuid::new_v4();
        coordinator
            .publish_schedule(schedule_id, capacity)
            .await
            .unwrap();
        (coordinator, schedule_id)
    }

    fn seats(numbers: &[SeatNumber]) -> BTreeSet<SeatNumber> {
        numbers.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_reserve_places_hold_and_drops_availability() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let booking = Uuid::new_v4();

        let hold = coordinator
            .reserve(schedule_id, &seats(&[12, 13]), booking, Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(hold.seats, seats(&[12, 13]));

        let snapshot = coordinator.availability(schedule_id).await.unwrap();
        assert_eq!(snapshot.available, 38);
        assert!(snapshot.booked_seats.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_reserve_reports_conflicting_seats() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        coordinator
            .reserve(
                schedule_id,
                &seats(&[12, 13]),
                Uuid::new_v4(),
                Duration::minutes(15),
            )
            .await
            .unwrap();

        let err = coordinator
            .reserve(
                schedule_id,
                &seats(&[12, 14]),
                Uuid::new_v4(),
                Duration::minutes(15),
            )
            .await
            .unwrap_err();
        match err {
            InventoryError::SeatConflict { conflicting_seats } => {
                assert_eq!(conflicting_seats, vec![12]);
            }
            other => panic!("expected seat conflict, got {other:?}"),
        }

        // failed reserve must not change availability
        let snapshot = coordinator.availability(schedule_id).await.unwrap();
        assert_eq!(snapshot.available, 38);
    }

    #[tokio::test]
    async fn test_concurrent_reserves_cannot_both_win() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let coordinator = Arc::new(coordinator);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator
                    .reserve(
                        schedule_id,
                        &seats(&[7]),
                        Uuid::new_v4(),
                        Duration::minutes(15),
                    )
                    .await
            }));
        }

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let booking = Uuid::new_v4();
        coordinator
            .reserve(schedule_id, &seats(&[12, 13]), booking, Duration::minutes(15))
            .await
            .unwrap();

        let first = coordinator.commit(booking).await.unwrap();
        assert!(!first.already_committed);

        let second = coordinator.commit(booking).await.unwrap();
        assert!(second.already_committed);

        let snapshot = coordinator.availability(schedule_id).await.unwrap();
        assert_eq!(snapshot.booked_seats, vec![12, 13]);
        assert_eq!(snapshot.available, 38);
    }

    #[tokio::test]
    async fn test_commit_without_hold_fails() {
        let (coordinator, _schedule_id) = coordinator_with_schedule(40).await;
        let err = coordinator.commit(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, InventoryError::HoldNotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_of_expired_hold_fails_and_frees_seats() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let booking = Uuid::new_v4();
        coordinator
            .reserve(schedule_id, &seats(&[20]), booking, Duration::seconds(-1))
            .await
            .unwrap();

        let err = coordinator.commit(booking).await.unwrap_err();
        assert!(matches!(err, InventoryError::HoldNotFound(_)));

        // the lapsed hold is gone, so the seat is reservable again
        coordinator
            .reserve(
                schedule_id,
                &seats(&[20]),
                Uuid::new_v4(),
                Duration::minutes(15),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_of_hold_returns_seats() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let booking = Uuid::new_v4();
        coordinator
            .reserve(schedule_id, &seats(&[5, 6]), booking, Duration::minutes(15))
            .await
            .unwrap();

        coordinator.release(booking).await.unwrap();
        let snapshot = coordinator.availability(schedule_id).await.unwrap();
        assert_eq!(snapshot.available, 40);

        // releasing again is a no-op
        coordinator.release(booking).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_after_commit_unbooks_seats() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let booking = Uuid::new_v4();
        coordinator
            .reserve(schedule_id, &seats(&[5, 6]), booking, Duration::minutes(15))
            .await
            .unwrap();
        coordinator.commit(booking).await.unwrap();

        coordinator.release(booking).await.unwrap();
        let snapshot = coordinator.availability(schedule_id).await.unwrap();
        assert!(snapshot.booked_seats.is_empty());
        assert_eq!(snapshot.available, 40);
    }

    #[tokio::test]
    async fn test_sweep_releases_only_expired_holds() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        coordinator
            .reserve(schedule_id, &seats(&[1]), stale, Duration::seconds(-1))
            .await
            .unwrap();
        coordinator
            .reserve(schedule_id, &seats(&[2]), fresh, Duration::minutes(15))
            .await
            .unwrap();

        let swept = coordinator.sweep_expired_holds(Utc::now()).await;
        assert_eq!(swept, vec![stale]);

        let snapshot = coordinator.availability(schedule_id).await.unwrap();
        assert_eq!(snapshot.available, 39);
    }

    #[tokio::test]
    async fn test_reserve_rejects_invalid_seats() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;

        let err = coordinator
            .reserve(schedule_id, &seats(&[]), Uuid::new_v4(), Duration::minutes(15))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidSeats(_)));

        let err = coordinator
            .reserve(schedule_id, &seats(&[41]), Uuid::new_v4(), Duration::minutes(15))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidSeats(_)));
    }

    #[tokio::test]
    async fn test_publish_schedule_rejects_duplicates() {
        let (coordinator, schedule_id) = coordinator_with_schedule(40).await;
        let err = coordinator
            .publish_schedule(schedule_id, 40)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::ScheduleExists(_)));
    }
}
