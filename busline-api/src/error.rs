use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use busline_domain::inventory::SeatNumber;
use busline_inventory::InventoryError;
use busline_ledger::LedgerError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    /// Requested seats are taken; callers get the contested seats back so the
    /// user can pick different ones.
    SeatConflict { conflicting_seats: Vec<SeatNumber> },
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(msg) => reply(StatusCode::BAD_REQUEST, &msg),
            AppError::NotFound(msg) => reply(StatusCode::NOT_FOUND, &msg),
            AppError::Conflict(msg) => reply(StatusCode::CONFLICT, &msg),
            AppError::SeatConflict { conflicting_seats } => {
                let body = Json(json!({
                    "error": "requested seats are unavailable",
                    "conflicting_seats": conflicting_seats,
                }));
                (StatusCode::CONFLICT, body).into_response()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

fn reply(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::SeatConflict { conflicting_seats } => {
                AppError::SeatConflict { conflicting_seats }
            }
            InventoryError::UnknownSchedule(id) => {
                AppError::NotFound(format!("schedule {id} not found"))
            }
            InventoryError::ScheduleExists(id) => {
                AppError::Conflict(format!("schedule {id} already published"))
            }
            InventoryError::InvalidSeats(msg) => AppError::Validation(msg),
            InventoryError::HoldNotFound(id) => {
                AppError::Conflict(format!("no active hold for booking {id}"))
            }
            InventoryError::Store(msg) => AppError::Internal(msg),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => AppError::NotFound(format!("booking {id} not found")),
            LedgerError::InconsistentState(msg) => AppError::Conflict(msg),
            LedgerError::HoldExpired(id) => AppError::Conflict(format!(
                "hold expired before payment confirmation for booking {id}"
            )),
            LedgerError::Inventory(inner) => inner.into(),
            LedgerError::Store(msg) => AppError::Internal(msg),
        }
    }
}
