use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::inventory::SeatNumber;

/// Payment lifecycle as observed from the gateway side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Initiated,
    Processing,
    Redirected,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed)
    }

    /// Position in the forward-only lifecycle; both terminal states share the top rank.
    fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Initiated => 0,
            PaymentStatus::Processing => 1,
            PaymentStatus::Redirected => 2,
            PaymentStatus::Paid | PaymentStatus::Failed => 3,
        }
    }

    /// Whether `next` is an acceptable observation after `self`.
    /// Terminal states accept nothing; otherwise only same-or-forward moves.
    pub fn accepts(&self, next: PaymentStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "INITIATED",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Redirected => "REDIRECTED",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(PaymentStatus::Initiated),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "REDIRECTED" => Ok(PaymentStatus::Redirected),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "COMPLETED" => Ok(BookingStatus::Completed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "NO_SHOW" => Ok(BookingStatus::NoShow),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// The authoritative booking record. Never deleted; failed and cancelled
/// bookings are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub seats: BTreeSet<SeatNumber>,
    /// Gateway-side correlation id; unique per booking, used as the commit
    /// idempotency key.
    pub transaction_reference: Option<String>,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub payment_initiated_at: DateTime<Utc>,
    /// Flips false -> true exactly once, when the hold is committed.
    pub committed: bool,
    pub total_amount_cents: i64,
    pub passenger_name: String,
    pub passenger_phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn create(req: &NewBooking) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            schedule_id: req.schedule_id,
            seats: req.seats.clone(),
            transaction_reference: None,
            payment_status: PaymentStatus::Initiated,
            status: BookingStatus::Pending,
            payment_initiated_at: now,
            committed: false,
            total_amount_cents: req.amount_cents,
            passenger_name: req.passenger_name.clone(),
            passenger_phone: req.passenger_phone.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_payment_status(&mut self, status: PaymentStatus) {
        self.payment_status = status;
        self.touch();
    }

    pub fn set_status(&mut self, status: BookingStatus) {
        self.status = status;
        self.touch();
    }

    pub fn mark_committed(&mut self) {
        self.committed = true;
        self.touch();
    }

    pub fn attach_transaction_reference(&mut self, reference: String) {
        self.transaction_reference = Some(reference);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Checkout-side payload for creating a booking.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub schedule_id: Uuid,
    pub seats: BTreeSet<SeatNumber>,
    pub passenger_name: String,
    pub passenger_phone: String,
    pub amount_cents: i64,
}
