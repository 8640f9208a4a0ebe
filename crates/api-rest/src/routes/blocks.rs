//! Episode-block endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use caresched_core::blocks::NewBlock;
use caresched_types::BlockKey;

use crate::auth::Caller;
use crate::dto::BlockRes;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateBlockReq {
    pub episode_id: Uuid,
    /// `WAIT_HEALING`, `WAIT_LAB`, `WAIT_SURGERY`, `WAIT_OR`,
    /// `WAIT_IMPLANT`, `PATIENT_DELAY` or `OTHER`.
    pub key: String,
    pub ttl_days: Option<i64>,
    pub expected_unblock_date: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct RenewBlockReq {
    pub ttl_days: Option<i64>,
}

#[derive(Deserialize, IntoParams)]
pub struct ListBlocksQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[utoipa::path(
    post,
    path = "/blocks",
    request_body = CreateBlockReq,
    responses(
        (status = 201, description = "Block created", body = BlockRes),
        (status = 403, description = "Role not permitted"),
        (status = 422, description = "Episode closed")
    )
)]
pub async fn create_block(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<CreateBlockReq>,
) -> ApiResult<(StatusCode, Json<BlockRes>)> {
    let key: BlockKey = req
        .key
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown block key: {}", req.key)))?;

    let block = state
        .blocks
        .create_block(
            &ctx,
            NewBlock {
                episode_id: req.episode_id,
                key,
                ttl_days: req.ttl_days,
                expected_unblock_date: req.expected_unblock_date,
                note: req.note,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(block.into())))
}

#[utoipa::path(
    get,
    path = "/episodes/{id}/blocks",
    params(ListBlocksQuery),
    responses((status = 200, description = "Blocks on the episode", body = [BlockRes]))
)]
pub async fn list_blocks(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
    Query(query): Query<ListBlocksQuery>,
) -> ApiResult<Json<Vec<BlockRes>>> {
    let blocks = state.blocks.list_blocks(id, query.active_only).await?;
    Ok(Json(blocks.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/blocks/{id}/renew",
    request_body = RenewBlockReq,
    responses(
        (status = 200, description = "Block renewed", body = BlockRes),
        (status = 422, description = "Block no longer active")
    )
)]
pub async fn renew_block(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<RenewBlockReq>,
) -> ApiResult<Json<BlockRes>> {
    let block = state.blocks.renew_block(&ctx, id, req.ttl_days).await?;
    Ok(Json(block.into()))
}

#[utoipa::path(
    post,
    path = "/blocks/{id}/resolve",
    responses(
        (status = 200, description = "Block resolved", body = BlockRes),
        (status = 404, description = "No such block")
    )
)]
pub async fn resolve_block(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BlockRes>> {
    Ok(Json(state.blocks.resolve_block(&ctx, id).await?.into()))
}
