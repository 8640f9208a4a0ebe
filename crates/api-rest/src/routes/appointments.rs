//! Booking and appointment-status endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use caresched_core::booking::StatusUpdate;
use caresched_types::AppointmentStatus;

use crate::auth::Caller;
use crate::dto::{AppointmentRes, StatusEventRes};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct MatchAndBookReq {
    pub intent_id: Uuid,
    pub slot_id: Uuid,
    /// Marks the booking as a pre-commitment (surgery dates and the like),
    /// exempt from the one-hard-next limit.
    #[serde(default)]
    pub requires_precommit: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct ManualBookReq {
    pub patient_id: Uuid,
    pub slot_id: Uuid,
    pub appointment_type: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct StatusUpdateReq {
    /// `completed`, `no_show`, `cancelled_by_doctor` or
    /// `cancelled_by_patient`; omit to change only the other fields.
    pub appointment_status: Option<String>,
    pub completion_notes: Option<String>,
    pub is_late: Option<bool>,
    pub appointment_type: Option<String>,
}

#[utoipa::path(
    post,
    path = "/appointments/match",
    request_body = MatchAndBookReq,
    responses(
        (status = 201, description = "Intent booked into the slot", body = AppointmentRes),
        (status = 400, description = "Mismatch or one-hard-next violation"),
        (status = 409, description = "Lost a concurrent booking race"),
        (status = 422, description = "Slot or intent not bookable")
    )
)]
pub async fn match_and_book(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<MatchAndBookReq>,
) -> ApiResult<(StatusCode, Json<AppointmentRes>)> {
    let appointment = state
        .booking
        .match_and_book(&ctx, req.intent_id, req.slot_id, req.requires_precommit)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment.into())))
}

#[utoipa::path(
    post,
    path = "/appointments",
    request_body = ManualBookReq,
    responses(
        (status = 201, description = "Appointment booked", body = AppointmentRes),
        (status = 422, description = "Slot not bookable")
    )
)]
pub async fn book_manual(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<ManualBookReq>,
) -> ApiResult<(StatusCode, Json<AppointmentRes>)> {
    let appointment = state
        .booking
        .book_manual(&ctx, req.patient_id, req.slot_id, req.appointment_type)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment.into())))
}

#[utoipa::path(
    get,
    path = "/appointments/{id}",
    responses(
        (status = 200, description = "Appointment", body = AppointmentRes),
        (status = 404, description = "No such appointment")
    )
)]
pub async fn get_appointment(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AppointmentRes>> {
    Ok(Json(state.booking.get_appointment(id).await?.into()))
}

#[utoipa::path(
    patch,
    path = "/appointments/{id}/status",
    request_body = StatusUpdateReq,
    responses(
        (status = 200, description = "Appointment updated", body = AppointmentRes),
        (status = 400, description = "Completion without notes"),
        (status = 422, description = "Status already final")
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdateReq>,
) -> ApiResult<Json<AppointmentRes>> {
    let status: Option<AppointmentStatus> = req
        .appointment_status
        .as_deref()
        .map(|s| {
            s.parse()
                .map_err(|_| ApiError::validation(format!("unknown appointment status: {s}")))
        })
        .transpose()?;

    let appointment = state
        .booking
        .update_status(
            &ctx,
            id,
            StatusUpdate {
                appointment_status: status,
                completion_notes: req.completion_notes,
                is_late: req.is_late,
                appointment_type: req.appointment_type,
            },
        )
        .await?;
    Ok(Json(appointment.into()))
}

#[utoipa::path(
    get,
    path = "/appointments/{id}/status-events",
    responses((status = 200, description = "Status audit trail", body = [StatusEventRes]))
)]
pub async fn status_events(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<StatusEventRes>>> {
    let events = state.booking.status_events(id).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}
