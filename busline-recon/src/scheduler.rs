use busline_domain::booking::Booking;
use busline_inventory::SeatInventoryCoordinator;
use busline_ledger::{BookingLedger, LedgerError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::gateway::{map_gateway_status, GatewayError, PaymentGateway};

/// Timing knobs for the reconciliation loop. The gateway timeout bounds a
/// single verification call and is deliberately much shorter than the hold
/// TTL: a slow provider is a transient error, not a booking failure.
#[derive(Debug, Clone, Copy)]
pub struct ReconRules {
    /// How long a payment may sit in processing/redirected before we poll.
    pub stale_after: chrono::Duration,
    /// Pause between cycles.
    pub cycle_interval: Duration,
    /// Per-call bound on gateway verification.
    pub gateway_timeout: Duration,
}

impl Default for ReconRules {
    fn default() -> Self {
        Self {
            stale_after: chrono::Duration::minutes(15),
            cycle_interval: Duration::from_secs(300),
            gateway_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-cycle accounting, logged after every run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub examined: usize,
    pub resolved: usize,
    pub still_pending: usize,
    pub errors: usize,
    pub swept: usize,
}

enum Reconciled {
    Resolved,
    StillPending,
}

#[derive(Debug, thiserror::Error)]
enum ReconcileError {
    #[error("booking has no transaction reference")]
    MissingReference,

    #[error("{0}")]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    Ledger(#[from] LedgerError),
}

/// Closes the gap when an asynchronous payment callback never arrives: finds
/// bookings stuck in flight, actively re-verifies them against the gateway,
/// and drives ledger and inventory to a terminal state. Holds no state of its
/// own; a crash mid-cycle is safe because every step it takes is idempotent.
pub struct ReconciliationScheduler {
    ledger: Arc<BookingLedger>,
    inventory: Arc<SeatInventoryCoordinator>,
    gateway: Arc<dyn PaymentGateway>,
    rules: ReconRules,
}

impl ReconciliationScheduler {
    pub fn new(
        ledger: Arc<BookingLedger>,
        inventory: Arc<SeatInventoryCoordinator>,
        gateway: Arc<dyn PaymentGateway>,
        rules: ReconRules,
    ) -> Self {
        Self {
            ledger,
            inventory,
            gateway,
            rules,
        }
    }

    /// Fixed-interval loop. The first tick fires immediately, which is fine:
    /// the cycle is idempotent.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Reconciliation scheduler started: every {:?}, staleness threshold {} min",
            self.rules.cycle_interval,
            self.rules.stale_after.num_minutes()
        );
        let mut ticker = tokio::time::interval(self.rules.cycle_interval);
        loop {
            ticker.tick().await;
            let stats = self.run_cycle(Utc::now()).await;
            info!(
                "Reconciliation cycle done: {} examined, {} resolved, {} still pending, {} errors, {} holds swept",
                stats.examined, stats.resolved, stats.still_pending, stats.errors, stats.swept
            );
        }
    }

    /// One reconciliation pass. Every per-booking failure is isolated: it is
    /// logged, the booking keeps its `payment_initiated_at`, and the next
    /// cycle picks it up again.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleStats {
        let mut stats = CycleStats::default();

        let stale = match self.ledger.list_stale_in_flight(self.rules.stale_after, now).await {
            Ok(list) => list,
            Err(e) => {
                error!("Failed to list stale in-flight bookings: {}", e);
                Vec::new()
            }
        };
        stats.examined = stale.len();

        for booking in &stale {
            match self.reconcile_one(booking).await {
                Ok(Reconciled::Resolved) => stats.resolved += 1,
                Ok(Reconciled::StillPending) => stats.still_pending += 1,
                Err(e) => {
                    warn!("Reconciliation skipped booking {}: {}", booking.id, e);
                    stats.errors += 1;
                }
            }
        }

        // reclaim holds that timed out without a payment decision
        let swept = self.inventory.sweep_expired_holds(now).await;
        stats.swept = swept.len();
        for booking_id in swept {
            match self.ledger.expire_unpaid(booking_id).await {
                Ok(_) => {}
                Err(LedgerError::NotFound(_)) => {}
                Err(e) => warn!("Failed to expire swept booking {}: {}", booking_id, e),
            }
        }

        stats
    }

    async fn reconcile_one(&self, booking: &Booking) -> Result<Reconciled, ReconcileError> {
        let reference = booking
            .transaction_reference
            .as_deref()
            .ok_or(ReconcileError::MissingReference)?;

        let verification =
            match tokio::time::timeout(self.rules.gateway_timeout, self.gateway.verify(reference))
                .await
            {
                Ok(Ok(verification)) => verification,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(GatewayError::Transient(format!(
                        "verification of {reference} timed out"
                    ))
                    .into())
                }
            };

        if verification.amount_cents != booking.total_amount_cents {
            warn!(
                "Booking {} amount mismatch: gateway reports {}, ledger has {}",
                booking.id, verification.amount_cents, booking.total_amount_cents
            );
        }

        match map_gateway_status(&verification.status) {
            None => Ok(Reconciled::StillPending),
            Some(outcome) => {
                match self
                    .ledger
                    .resolve_payment(booking.id, outcome, &verification.transaction_id)
                    .await
                {
                    Ok(_) => Ok(Reconciled::Resolved),
                    // terminal now; the ledger already flagged the refund
                    Err(LedgerError::HoldExpired(_)) => Ok(Reconciled::Resolved),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}
