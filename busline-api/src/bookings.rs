use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use busline_domain::booking::{Booking, BookingStatus, NewBooking, PaymentStatus};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct BookingResponse {
    booking_id: Uuid,
    status: BookingStatus,
    payment_status: PaymentStatus,
}

impl From<&Booking> for BookingResponse {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id,
            status: booking.status,
            payment_status: booking.payment_status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AttachTransactionRequest {
    transaction_reference: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/transaction", post(attach_transaction))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
}

/// Checkout entry point: a booking only comes into existence together with a
/// successful seat hold.
async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<NewBooking>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let booking = state.ledger.create_booking(req).await?;
    info!("Booking {} accepted", booking.id);
    Ok((StatusCode::CREATED, Json(BookingResponse::from(&booking))))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .ledger
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
    Ok(Json(booking))
}

/// Called by the checkout flow once payment has been initiated with the
/// provider, to record the correlation id.
async fn attach_transaction(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<AttachTransactionRequest>,
) -> Result<StatusCode, AppError> {
    state
        .ledger
        .attach_transaction(booking_id, &req.transaction_reference)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// User/operator cancellation of a confirmed booking.
async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.ledger.cancel_confirmed(booking_id).await?;
    Ok(Json(BookingResponse::from(&booking)))
}
