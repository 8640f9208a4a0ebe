//! Episode lifecycle and stage-transition endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use caresched_types::{EpisodeReason, NonEmptyText};

use crate::auth::Caller;
use crate::dto::{EpisodeRes, RemainingVisitsRes, StageEventRes};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateEpisodeReq {
    pub patient_id: Uuid,
    /// `trauma`, `congenital` or `oncologic`.
    pub reason: String,
    pub chief_complaint: String,
    pub trigger_type: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct TransitionReq {
    pub stage_code: String,
    pub note: Option<String>,
    /// When present, the transition only applies if the episode is still at
    /// this stage version.
    pub expected_stage_version: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct SuggestReq {
    pub stage_code: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CorrectEventReq {
    pub at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/episodes",
    request_body = CreateEpisodeReq,
    responses(
        (status = 201, description = "Episode opened", body = EpisodeRes),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Role not permitted")
    )
)]
pub async fn create_episode(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<CreateEpisodeReq>,
) -> ApiResult<(StatusCode, Json<EpisodeRes>)> {
    let reason: EpisodeReason = req
        .reason
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown episode reason: {}", req.reason)))?;
    let complaint = NonEmptyText::new(&req.chief_complaint)
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let episode = state
        .episodes
        .create_episode(&ctx, req.patient_id, reason, complaint, req.trigger_type)
        .await?;
    Ok((StatusCode::CREATED, Json(episode.into())))
}

#[utoipa::path(
    get,
    path = "/episodes/{id}",
    responses(
        (status = 200, description = "Episode", body = EpisodeRes),
        (status = 404, description = "No such episode")
    )
)]
pub async fn get_episode(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EpisodeRes>> {
    Ok(Json(state.episodes.get_episode(id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/episodes/{id}/transitions",
    request_body = TransitionReq,
    responses(
        (status = 201, description = "Stage recorded", body = StageEventRes),
        (status = 400, description = "Transition not legal"),
        (status = 409, description = "Stage version conflict"),
        (status = 422, description = "Episode closed")
    )
)]
pub async fn transition_stage(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionReq>,
) -> ApiResult<(StatusCode, Json<StageEventRes>)> {
    let event = state
        .episodes
        .transition_stage(&ctx, id, &req.stage_code, req.note, req.expected_stage_version)
        .await?;
    Ok((StatusCode::CREATED, Json(event.into())))
}

#[utoipa::path(
    get,
    path = "/episodes/{id}/stages",
    responses((status = 200, description = "Stage history, oldest first", body = [StageEventRes]))
)]
pub async fn stage_history(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<StageEventRes>>> {
    let events = state.episodes.stage_history(id).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    put,
    path = "/episodes/{id}/suggested-next",
    request_body = SuggestReq,
    responses(
        (status = 200, description = "Hint recorded", body = EpisodeRes),
        (status = 400, description = "Stage not in catalog")
    )
)]
pub async fn suggest_next_stage(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<SuggestReq>,
) -> ApiResult<Json<EpisodeRes>> {
    state
        .episodes
        .suggest_next_stage(&ctx, id, &req.stage_code)
        .await?;
    let episode = state.episodes.get_episode(id).await?;
    Ok(Json(episode.into()))
}

#[utoipa::path(
    post,
    path = "/episodes/{id}/close",
    responses(
        (status = 200, description = "Episode closed", body = EpisodeRes),
        (status = 404, description = "No such episode")
    )
)]
pub async fn close_episode(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EpisodeRes>> {
    Ok(Json(state.episodes.close_episode(&ctx, id).await?.into()))
}

#[utoipa::path(
    put,
    path = "/stage-events/{id}/at",
    request_body = CorrectEventReq,
    responses(
        (status = 200, description = "Timestamp corrected", body = StageEventRes),
        (status = 403, description = "Admin only")
    )
)]
pub async fn correct_stage_event(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<CorrectEventReq>,
) -> ApiResult<Json<StageEventRes>> {
    let event = state.episodes.correct_stage_event_at(&ctx, id, req.at).await?;
    Ok(Json(event.into()))
}

#[utoipa::path(
    get,
    path = "/episodes/{id}/remaining-visits",
    responses(
        (status = 200, description = "Remaining-visit estimate", body = RemainingVisitsRes),
        (status = 422, description = "Episode closed")
    )
)]
pub async fn remaining_visits(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RemainingVisitsRes>> {
    Ok(Json(state.forecast.remaining_visits(id).await?.into()))
}
