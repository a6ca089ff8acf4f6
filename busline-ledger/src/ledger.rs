use busline_domain::booking::{Booking, BookingStatus, NewBooking, PaymentStatus};
use busline_domain::repository::BookingStore;
use busline_inventory::{InventoryError, SeatInventoryCoordinator};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of resolving a payment to a terminal state. A repeat resolution
/// with the same outcome reports `already_resolved` and mutates nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentResolution {
    pub already_resolved: bool,
    pub booking_status: BookingStatus,
}

/// Owner of the booking state machine. Translates payment observations into
/// booking-status transitions and drives the seat inventory coordinator.
///
/// Mutations for one booking are serialized through a per-booking mutex;
/// different bookings proceed in parallel. Only this type mutates booking
/// records.
pub struct BookingLedger {
    store: Arc<dyn BookingStore>,
    inventory: Arc<SeatInventoryCoordinator>,
    hold_ttl: Duration,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl BookingLedger {
    pub fn new(
        store: Arc<dyn BookingStore>,
        inventory: Arc<SeatInventoryCoordinator>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            store,
            inventory,
            hold_ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a booking: reserve first, persist only on a successful hold.
    /// A seat conflict surfaces unchanged and leaves no booking record.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, LedgerError> {
        let booking = Booking::create(&req);
        self.inventory
            .reserve(req.schedule_id, &req.seats, booking.id, self.hold_ttl)
            .await?;

        if let Err(e) = self.store.insert(&booking).await {
            // give the hold back; the booking was never recorded
            if let Err(release_err) = self.inventory.release(booking.id).await {
                error!(
                    "Failed to release hold after store error for {}: {}",
                    booking.id, release_err
                );
            }
            return Err(LedgerError::store(e));
        }

        info!(
            "Booking {} created on schedule {} for seats {:?}",
            booking.id, booking.schedule_id, booking.seats
        );
        Ok(booking)
    }

    /// Record the gateway correlation id once payment is initiated.
    /// Re-attaching the same reference is a no-op; a different one is rejected.
    pub async fn attach_transaction(
        &self,
        booking_id: Uuid,
        reference: &str,
    ) -> Result<(), LedgerError> {
        let lock = self.booking_lock(booking_id).await;
        let _guard = lock.lock().await;

        let mut booking = self.load(booking_id).await?;
        match &booking.transaction_reference {
            Some(existing) if existing == reference => Ok(()),
            Some(existing) => {
                error!(
                    "Booking {} already correlated to {}, refusing {}",
                    booking_id, existing, reference
                );
                Err(LedgerError::InconsistentState(format!(
                    "transaction reference already set for booking {booking_id}"
                )))
            }
            None => {
                booking.attach_transaction_reference(reference.to_string());
                self.store.update(&booking).await.map_err(LedgerError::store)
            }
        }
    }

    /// Apply a non-final payment observation (processing/redirected). A
    /// terminal observation is delegated to `resolve_payment`. Backward
    /// transitions are rejected without mutation: the payment status is
    /// monotonic.
    pub async fn record_payment_observation(
        &self,
        booking_id: Uuid,
        observed: PaymentStatus,
        transaction_id: &str,
    ) -> Result<(), LedgerError> {
        if observed.is_terminal() {
            return self
                .resolve_payment(booking_id, observed, transaction_id)
                .await
                .map(|_| ());
        }

        let lock = self.booking_lock(booking_id).await;
        let _guard = lock.lock().await;

        let mut booking = self.load(booking_id).await?;
        if !booking.payment_status.accepts(observed) {
            warn!(
                "Rejected payment transition {:?} -> {:?} for booking {}",
                booking.payment_status, observed, booking_id
            );
            return Err(LedgerError::InconsistentState(format!(
                "payment status {:?} does not accept {:?}",
                booking.payment_status, observed
            )));
        }
        self.note_transaction_id(&mut booking, transaction_id);
        if booking.payment_status != observed {
            booking.set_payment_status(observed);
        }
        self.store.update(&booking).await.map_err(LedgerError::store)
    }

    /// Drive a booking to its terminal state from a verified payment outcome.
    /// Used by both the synchronous callback path and the reconciliation
    /// scheduler; safe to call repeatedly with the same outcome.
    pub async fn resolve_payment(
        &self,
        booking_id: Uuid,
        verified: PaymentStatus,
        transaction_id: &str,
    ) -> Result<PaymentResolution, LedgerError> {
        if !verified.is_terminal() {
            return Err(LedgerError::InconsistentState(format!(
                "cannot resolve payment to non-terminal {verified:?}"
            )));
        }

        let lock = self.booking_lock(booking_id).await;
        let _guard = lock.lock().await;

        let mut booking = self.load(booking_id).await?;
        if booking.payment_status.is_terminal() {
            if booking.payment_status == verified {
                return Ok(PaymentResolution {
                    already_resolved: true,
                    booking_status: booking.status,
                });
            }
            error!(
                "Conflicting terminal outcome for booking {}: recorded {:?}, verified {:?}",
                booking_id, booking.payment_status, verified
            );
            return Err(LedgerError::InconsistentState(format!(
                "booking {booking_id} already resolved to {:?}",
                booking.payment_status
            )));
        }

        self.note_transaction_id(&mut booking, transaction_id);

        if verified == PaymentStatus::Paid {
            match self.inventory.commit(booking_id).await {
                Ok(_) => {
                    booking.set_payment_status(PaymentStatus::Paid);
                    booking.mark_committed();
                    booking.set_status(BookingStatus::Confirmed);
                    self.store.update(&booking).await.map_err(LedgerError::store)?;
                    info!("Booking {} confirmed", booking_id);
                    Ok(PaymentResolution {
                        already_resolved: false,
                        booking_status: BookingStatus::Confirmed,
                    })
                }
                Err(InventoryError::HoldNotFound(_)) => {
                    // Paid, but the hold lapsed and the seats may be gone.
                    // Never confirm a booking without seats; the payment is
                    // recorded and must be refunded out-of-band.
                    booking.set_payment_status(PaymentStatus::Paid);
                    booking.set_status(BookingStatus::Cancelled);
                    self.store.update(&booking).await.map_err(LedgerError::store)?;
                    error!(
                        "Booking {} paid after its hold expired; cancelled, refund required",
                        booking_id
                    );
                    Err(LedgerError::HoldExpired(booking_id))
                }
                Err(e) => Err(e.into()),
            }
        } else {
            self.inventory.release(booking_id).await?;
            booking.set_payment_status(PaymentStatus::Failed);
            booking.set_status(BookingStatus::Cancelled);
            self.store.update(&booking).await.map_err(LedgerError::store)?;
            info!("Booking {} cancelled after failed payment", booking_id);
            Ok(PaymentResolution {
                already_resolved: false,
                booking_status: BookingStatus::Cancelled,
            })
        }
    }

    /// Cancellation of a confirmed booking (user/operator action): the
    /// inverse of commit, then the terminal status.
    pub async fn cancel_confirmed(&self, booking_id: Uuid) -> Result<Booking, LedgerError> {
        let lock = self.booking_lock(booking_id).await;
        let _guard = lock.lock().await;

        let mut booking = self.load(booking_id).await?;
        if booking.status != BookingStatus::Confirmed {
            return Err(LedgerError::InconsistentState(format!(
                "cannot cancel booking in {:?}",
                booking.status
            )));
        }

        self.inventory.release(booking_id).await?;
        booking.set_status(BookingStatus::Cancelled);
        self.store.update(&booking).await.map_err(LedgerError::store)?;
        info!("Booking {} cancelled after confirmation", booking_id);
        Ok(booking)
    }

    /// Post-travel outcome, only reachable from a confirmed booking.
    pub async fn mark_travel_outcome(
        &self,
        booking_id: Uuid,
        outcome: BookingStatus,
    ) -> Result<(), LedgerError> {
        if !matches!(outcome, BookingStatus::Completed | BookingStatus::NoShow) {
            return Err(LedgerError::InconsistentState(format!(
                "{outcome:?} is not a travel outcome"
            )));
        }

        let lock = self.booking_lock(booking_id).await;
        let _guard = lock.lock().await;

        let mut booking = self.load(booking_id).await?;
        if booking.status != BookingStatus::Confirmed {
            return Err(LedgerError::InconsistentState(format!(
                "travel outcome requires a confirmed booking, found {:?}",
                booking.status
            )));
        }
        booking.set_status(outcome);
        self.store.update(&booking).await.map_err(LedgerError::store)
    }

    /// Mark a booking whose hold was swept before payment ever started
    /// moving. Returns whether anything changed.
    pub async fn expire_unpaid(&self, booking_id: Uuid) -> Result<bool, LedgerError> {
        let lock = self.booking_lock(booking_id).await;
        let _guard = lock.lock().await;

        let mut booking = self.load(booking_id).await?;
        if booking.payment_status != PaymentStatus::Initiated
            || booking.status != BookingStatus::Pending
        {
            return Ok(false);
        }
        booking.set_payment_status(PaymentStatus::Failed);
        booking.set_status(BookingStatus::Cancelled);
        self.store.update(&booking).await.map_err(LedgerError::store)?;
        info!("Booking {} expired before payment started", booking_id);
        Ok(true)
    }

    /// Bookings stuck in flight (processing/redirected) longer than
    /// `older_than`. Pure pull; this is the reconciliation scheduler's feed.
    pub async fn list_stale_in_flight(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, LedgerError> {
        self.store
            .list_stale_in_flight(now - older_than)
            .await
            .map_err(LedgerError::store)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, LedgerError> {
        self.store.get(booking_id).await.map_err(LedgerError::store)
    }

    async fn load(&self, booking_id: Uuid) -> Result<Booking, LedgerError> {
        self.store
            .get(booking_id)
            .await
            .map_err(LedgerError::store)?
            .ok_or(LedgerError::NotFound(booking_id))
    }

    fn note_transaction_id(&self, booking: &mut Booking, transaction_id: &str) {
        if transaction_id.is_empty() {
            return;
        }
        match &booking.transaction_reference {
            None => booking.attach_transaction_reference(transaction_id.to_string()),
            Some(existing) if existing != transaction_id => {
                // keep the established correlation; the observation still applies
                warn!(
                    "Booking {} observation carried transaction {} but is correlated to {}",
                    booking.id, transaction_id, existing
                );
            }
            Some(_) => {}
        }
    }

    async fn booking_lock(&self, booking_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(booking_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Hold expired before commit for booking: {0}")]
    HoldExpired(Uuid),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Booking store error: {0}")]
    Store(String),
}

impl LedgerError {
    fn store(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        LedgerError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busline_store::memory::{MemoryBookingStore, MemoryInventoryStore};
    use std::collections::BTreeSet;

    struct Fixture {
        ledger: BookingLedger,
        inventory: Arc<SeatInventoryCoordinator>,
        bookings: Arc<MemoryBookingStore>,
        schedule_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let inventory_store = Arc::new(MemoryInventoryStore::new());
        let inventory = Arc::new(
            SeatInventoryCoordinator::load(inventory_store, None)
                .await
                .unwrap(),
        );
        let schedule_id = Uuid::new_v4();
        inventory.publish_schedule(schedule_id, 40).await.unwrap();

        let bookings = Arc::new(MemoryBookingStore::new());
        let ledger = BookingLedger::new(
            bookings.clone(),
            inventory.clone(),
            Duration::minutes(15),
        );
        Fixture {
            ledger,
            inventory,
            bookings,
            schedule_id,
        }
    }

    fn new_booking(schedule_id: Uuid, seats: &[u32]) -> NewBooking {
        NewBooking {
            schedule_id,
            seats: seats.iter().copied().collect::<BTreeSet<u32>>(),
            passenger_name: "Rafiq Islam".to_string(),
            passenger_phone: "+8801800000000".to_string(),
            amount_cents: 90_000,
        }
    }

    #[tokio::test]
    async fn test_create_booking_reserves_and_persists() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[12, 13]))
            .await
            .unwrap();

        assert_eq!(booking.payment_status, PaymentStatus::Initiated);
        assert_eq!(booking.status, BookingStatus::Pending);

        let snapshot = fx.inventory.availability(fx.schedule_id).await.unwrap();
        assert_eq!(snapshot.available, 38);
        assert!(fx.ledger.get_booking(booking.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_booking_surfaces_seat_conflict_without_record() {
        let fx = fixture().await;
        fx.ledger
            .create_booking(new_booking(fx.schedule_id, &[12, 13]))
            .await
            .unwrap();

        let err = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[12, 14]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Inventory(InventoryError::SeatConflict { .. })
        ));

        let snapshot = fx.inventory.availability(fx.schedule_id).await.unwrap();
        assert_eq!(snapshot.available, 38);
    }

    #[tokio::test]
    async fn test_resolve_paid_confirms_and_is_idempotent() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[12, 13]))
            .await
            .unwrap();

        let first = fx
            .ledger
            .resolve_payment(booking.id, PaymentStatus::Paid, "tx-001")
            .await
            .unwrap();
        assert!(!first.already_resolved);
        assert_eq!(first.booking_status, BookingStatus::Confirmed);

        let second = fx
            .ledger
            .resolve_payment(booking.id, PaymentStatus::Paid, "tx-001")
            .await
            .unwrap();
        assert!(second.already_resolved);

        let stored = fx.ledger.get_booking(booking.id).await.unwrap().unwrap();
        assert!(stored.committed);
        assert_eq!(stored.status, BookingStatus::Confirmed);

        let snapshot = fx.inventory.availability(fx.schedule_id).await.unwrap();
        assert_eq!(snapshot.booked_seats, vec![12, 13]);
        assert_eq!(snapshot.available, 38);
    }

    #[tokio::test]
    async fn test_resolve_failed_releases_and_cancels() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[20]))
            .await
            .unwrap();

        let resolution = fx
            .ledger
            .resolve_payment(booking.id, PaymentStatus::Failed, "tx-002")
            .await
            .unwrap();
        assert_eq!(resolution.booking_status, BookingStatus::Cancelled);

        let stored = fx.ledger.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert!(!stored.committed);

        let snapshot = fx.inventory.availability(fx.schedule_id).await.unwrap();
        assert_eq!(snapshot.available, 40);
    }

    #[tokio::test]
    async fn test_conflicting_terminal_outcomes_are_rejected() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[3]))
            .await
            .unwrap();
        fx.ledger
            .resolve_payment(booking.id, PaymentStatus::Paid, "tx-003")
            .await
            .unwrap();

        let err = fx
            .ledger
            .resolve_payment(booking.id, PaymentStatus::Failed, "tx-003")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InconsistentState(_)));
    }

    #[tokio::test]
    async fn test_backward_observation_is_rejected_without_mutation() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[4]))
            .await
            .unwrap();
        fx.ledger
            .record_payment_observation(booking.id, PaymentStatus::Redirected, "tx-004")
            .await
            .unwrap();

        let err = fx
            .ledger
            .record_payment_observation(booking.id, PaymentStatus::Processing, "tx-004")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InconsistentState(_)));

        let stored = fx.ledger.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Redirected);
    }

    #[tokio::test]
    async fn test_paid_after_expired_hold_cancels_with_refund_signal() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[9]))
            .await
            .unwrap();

        // the hold lapses and the sweeper reclaims the seat before payment settles
        fx.inventory.release(booking.id).await.unwrap();

        let err = fx
            .ledger
            .resolve_payment(booking.id, PaymentStatus::Paid, "tx-005")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::HoldExpired(_)));

        let stored = fx.ledger.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert!(!stored.committed);
    }

    #[tokio::test]
    async fn test_cancel_confirmed_returns_seats() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[15, 16]))
            .await
            .unwrap();
        fx.ledger
            .resolve_payment(booking.id, PaymentStatus::Paid, "tx-006")
            .await
            .unwrap();

        fx.ledger.cancel_confirmed(booking.id).await.unwrap();

        let snapshot = fx.inventory.availability(fx.schedule_id).await.unwrap();
        assert!(snapshot.booked_seats.is_empty());
        assert_eq!(snapshot.available, 40);
    }

    #[tokio::test]
    async fn test_attach_transaction_rejects_rebinding() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[30]))
            .await
            .unwrap();

        fx.ledger
            .attach_transaction(booking.id, "tx-007")
            .await
            .unwrap();
        // same reference again is fine
        fx.ledger
            .attach_transaction(booking.id, "tx-007")
            .await
            .unwrap();

        let err = fx
            .ledger
            .attach_transaction(booking.id, "tx-008")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InconsistentState(_)));
    }

    #[tokio::test]
    async fn test_list_stale_in_flight_filters_by_status_and_age() {
        let fx = fixture().await;
        let now = Utc::now();

        let stale = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[1]))
            .await
            .unwrap();
        let fresh = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[2]))
            .await
            .unwrap();
        let untouched = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[5]))
            .await
            .unwrap();

        for (id, age_minutes) in [(stale.id, 20), (fresh.id, 2)] {
            let mut booking = fx.bookings.get(id).await.unwrap().unwrap();
            booking.payment_status = PaymentStatus::Processing;
            booking.payment_initiated_at = now - Duration::minutes(age_minutes);
            fx.bookings.update(&booking).await.unwrap();
        }

        let found = fx
            .ledger
            .list_stale_in_flight(Duration::minutes(15), now)
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![stale.id]);
        assert!(!ids.contains(&fresh.id));
        assert!(!ids.contains(&untouched.id));
    }

    #[tokio::test]
    async fn test_travel_outcome_requires_confirmed_booking() {
        let fx = fixture().await;
        let booking = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[17]))
            .await
            .unwrap();

        // not confirmed yet
        let err = fx
            .ledger
            .mark_travel_outcome(booking.id, BookingStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InconsistentState(_)));

        fx.ledger
            .resolve_payment(booking.id, PaymentStatus::Paid, "tx-010")
            .await
            .unwrap();
        fx.ledger
            .mark_travel_outcome(booking.id, BookingStatus::Completed)
            .await
            .unwrap();

        let stored = fx.ledger.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Completed);

        // cancelled is not a travel outcome
        let err = fx
            .ledger
            .mark_travel_outcome(booking.id, BookingStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InconsistentState(_)));
    }

    #[tokio::test]
    async fn test_expire_unpaid_only_touches_initiated_bookings() {
        let fx = fixture().await;
        let idle = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[21]))
            .await
            .unwrap();
        let paying = fx
            .ledger
            .create_booking(new_booking(fx.schedule_id, &[22]))
            .await
            .unwrap();
        fx.ledger
            .record_payment_observation(paying.id, PaymentStatus::Processing, "tx-009")
            .await
            .unwrap();

        assert!(fx.ledger.expire_unpaid(idle.id).await.unwrap());
        assert!(!fx.ledger.expire_unpaid(paying.id).await.unwrap());

        let stored = fx.ledger.get_booking(idle.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
    }
}
