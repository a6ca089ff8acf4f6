use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use busline_domain::inventory::AvailabilitySnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct PublishScheduleRequest {
    /// Caller-assigned id (the schedule already exists upstream); generated
    /// when omitted.
    schedule_id: Option<Uuid>,
    capacity: u32,
}

#[derive(Debug, Serialize)]
struct PublishScheduleResponse {
    schedule_id: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/schedules", post(publish_schedule))
        .route("/v1/schedules/{id}/availability", get(availability))
}

async fn publish_schedule(
    State(state): State<AppState>,
    Json(req): Json<PublishScheduleRequest>,
) -> Result<(StatusCode, Json<PublishScheduleResponse>), AppError> {
    if req.capacity == 0 {
        return Err(AppError::Validation("capacity must be positive".to_string()));
    }

    let schedule_id = req.schedule_id.unwrap_or_else(Uuid::new_v4);
    state.inventory.publish_schedule(schedule_id, req.capacity).await?;
    Ok((
        StatusCode::CREATED,
        Json(PublishScheduleResponse { schedule_id }),
    ))
}

/// Read-only view for schedule browsing; other subsystems must never write
/// inventory directly.
async fn availability(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<AvailabilitySnapshot>, AppError> {
    let snapshot = state.inventory.availability(schedule_id).await?;
    Ok(Json(snapshot))
}
