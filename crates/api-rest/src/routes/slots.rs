//! Slot inventory endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use caresched_core::slots::NewSlot;
use caresched_types::{Pool, SlotState};

use crate::auth::Caller;
use crate::dto::SlotRes;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateSlotReq {
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    /// `consult`, `work` or `control`.
    pub slot_purpose: String,
    pub location_site: Option<String>,
    pub location_room: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct ListSlotsQuery {
    pub slot_purpose: Option<String>,
    pub state: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct MoveSlotReq {
    pub start_time: DateTime<Utc>,
}

fn parse_pool(value: &str) -> ApiResult<Pool> {
    value
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown slot pool: {value}")))
}

#[utoipa::path(
    post,
    path = "/slots",
    request_body = CreateSlotReq,
    responses(
        (status = 201, description = "Slot created", body = SlotRes),
        (status = 400, description = "Invalid slot"),
        (status = 403, description = "Role not permitted")
    )
)]
pub async fn create_slot(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<CreateSlotReq>,
) -> ApiResult<(StatusCode, Json<SlotRes>)> {
    let slot = state
        .slots
        .create_slot(
            &ctx,
            NewSlot {
                provider_id: req.provider_id,
                start_time: req.start_time,
                duration_minutes: req.duration_minutes,
                slot_purpose: parse_pool(&req.slot_purpose)?,
                location_site: req.location_site,
                location_room: req.location_room,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(slot.into())))
}

#[utoipa::path(
    get,
    path = "/slots",
    params(ListSlotsQuery),
    responses((status = 200, description = "Slots, soonest first", body = [SlotRes]))
)]
pub async fn list_slots(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Query(query): Query<ListSlotsQuery>,
) -> ApiResult<Json<Vec<SlotRes>>> {
    let purpose = query.slot_purpose.as_deref().map(parse_pool).transpose()?;
    let slot_state: Option<SlotState> = query
        .state
        .as_deref()
        .map(|s| {
            s.parse()
                .map_err(|_| ApiError::validation(format!("unknown slot state: {s}")))
        })
        .transpose()?;

    let slots = state.slots.list_slots(purpose, slot_state).await?;
    Ok(Json(slots.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/slots/{id}",
    responses(
        (status = 200, description = "Slot", body = SlotRes),
        (status = 404, description = "No such slot")
    )
)]
pub async fn get_slot(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SlotRes>> {
    Ok(Json(state.slots.get_slot(id).await?.into()))
}

#[utoipa::path(
    put,
    path = "/slots/{id}/start-time",
    request_body = MoveSlotReq,
    responses(
        (status = 200, description = "Slot moved", body = SlotRes),
        (status = 400, description = "New time not in the future"),
        (status = 404, description = "No such slot")
    )
)]
pub async fn move_slot(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveSlotReq>,
) -> ApiResult<Json<SlotRes>> {
    let slot = state.slots.update_start_time(&ctx, id, req.start_time).await?;
    Ok(Json(slot.into()))
}

#[utoipa::path(
    post,
    path = "/slots/{id}/hold",
    responses(
        (status = 200, description = "Slot held", body = SlotRes),
        (status = 404, description = "No such slot"),
        (status = 422, description = "Slot not free")
    )
)]
pub async fn hold_slot(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SlotRes>> {
    Ok(Json(state.slots.hold_slot(&ctx, id).await?.into()))
}

#[utoipa::path(
    delete,
    path = "/slots/{id}",
    responses(
        (status = 204, description = "Slot deleted"),
        (status = 404, description = "No such slot"),
        (status = 422, description = "Slot has a live booking")
    )
)]
pub async fn delete_slot(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.slots.delete_slot(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
