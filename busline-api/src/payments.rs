use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use busline_domain::booking::PaymentStatus;
use busline_recon::map_gateway_status;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    pub booking_id: Uuid,
    /// Provider status word, e.g. "processing", "redirected", "success",
    /// "failed".
    pub status: String,
    pub transaction_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/payments/callback", post(handle_payment_callback))
}

/// POST /v1/payments/callback
/// Synchronous payment status notification from the provider. The same
/// transitions also run from the reconciliation scheduler, so a callback that
/// arrives late or twice is harmless.
async fn handle_payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<PaymentCallback>,
) -> Result<StatusCode, AppError> {
    info!(
        "Payment callback: booking {} reported {}",
        payload.booking_id, payload.status
    );

    let lowered = payload.status.to_ascii_lowercase();
    let observed = match lowered.as_str() {
        "processing" => PaymentStatus::Processing,
        "redirected" => PaymentStatus::Redirected,
        // "pending" maps to None: nothing has been decided, treat it as
        // processing so the booking becomes visible to reconciliation
        other => map_gateway_status(other).unwrap_or(PaymentStatus::Processing),
    };

    state
        .ledger
        .record_payment_observation(payload.booking_id, observed, &payload.transaction_id)
        .await?;
    Ok(StatusCode::OK)
}
