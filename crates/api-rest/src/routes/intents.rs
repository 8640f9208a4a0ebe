//! Slot-intent ledger endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use caresched_core::intents::NewIntent;
use caresched_types::Pool;

use crate::auth::Caller;
use crate::dto::IntentRes;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateIntentReq {
    pub episode_id: Uuid,
    pub step_code: String,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    /// `consult`, `work` or `control`.
    pub pool: String,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Deserialize, IntoParams)]
pub struct ListIntentsQuery {
    pub episode_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/intents",
    request_body = CreateIntentReq,
    responses(
        (status = 201, description = "Intent recorded", body = IntentRes),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Role not permitted"),
        (status = 422, description = "Episode closed")
    )
)]
pub async fn create_intent(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<CreateIntentReq>,
) -> ApiResult<(StatusCode, Json<IntentRes>)> {
    let pool: Pool = req
        .pool
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown pool: {}", req.pool)))?;

    let intent = state
        .intents
        .create_intent(
            &ctx,
            NewIntent {
                episode_id: req.episode_id,
                step_code: req.step_code,
                window_start: req.window_start,
                window_end: req.window_end,
                duration_minutes: req.duration_minutes,
                pool,
                priority: req.priority,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(intent.into())))
}

#[utoipa::path(
    get,
    path = "/intents",
    params(ListIntentsQuery),
    responses((status = 200, description = "Intents for an episode", body = [IntentRes]))
)]
pub async fn list_intents(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Query(query): Query<ListIntentsQuery>,
) -> ApiResult<Json<Vec<IntentRes>>> {
    let intents = state.intents.list_intents(query.episode_id).await?;
    Ok(Json(intents.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/intents/{id}",
    responses(
        (status = 200, description = "Intent", body = IntentRes),
        (status = 404, description = "No such intent")
    )
)]
pub async fn get_intent(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IntentRes>> {
    Ok(Json(state.intents.get_intent(id).await?.into()))
}
