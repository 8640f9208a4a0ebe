//! Administrative endpoints: feature flags, integrity checks, maintenance
//! sweeps and the capacity forecast.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use caresched_core::flags::{
    FLAG_AUTO_CONVERT_INTENTS, FLAG_AUTO_REBALANCE, FLAG_OVERBOOKING, FLAG_STRICT_ONE_HARD_NEXT,
};
use caresched_types::Pool;

use crate::auth::Caller;
use crate::dto::{IntegrityRes, WeekBucketRes};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const KNOWN_FLAGS: &[&str] = &[
    FLAG_OVERBOOKING,
    FLAG_AUTO_CONVERT_INTENTS,
    FLAG_AUTO_REBALANCE,
    FLAG_STRICT_ONE_HARD_NEXT,
];

#[derive(Serialize, ToSchema)]
pub struct FlagRes {
    pub name: String,
    pub enabled: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct SetFlagReq {
    pub enabled: bool,
}

#[derive(Serialize, ToSchema)]
pub struct SweepRes {
    pub expired_intents: u64,
    pub expired_blocks: u64,
}

#[derive(Deserialize, IntoParams)]
pub struct ForecastQuery {
    pub pool: Option<String>,
}

#[utoipa::path(
    get,
    path = "/admin/flags",
    responses((status = 200, description = "All known feature flags", body = [FlagRes]))
)]
pub async fn list_flags(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
) -> ApiResult<Json<Vec<FlagRes>>> {
    let mut out = Vec::with_capacity(KNOWN_FLAGS.len());
    for name in KNOWN_FLAGS {
        out.push(FlagRes {
            name: name.to_string(),
            enabled: state.flags.get(name).await?,
        });
    }
    Ok(Json(out))
}

#[utoipa::path(
    put,
    path = "/admin/flags/{name}",
    request_body = SetFlagReq,
    responses(
        (status = 200, description = "Flag updated", body = FlagRes),
        (status = 400, description = "Unknown flag"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn set_flag(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(name): Path<String>,
    Json(req): Json<SetFlagReq>,
) -> ApiResult<Json<FlagRes>> {
    if !KNOWN_FLAGS.contains(&name.as_str()) {
        return Err(ApiError::validation(format!("unknown feature flag: {name}")));
    }
    state.flags.set(&ctx, &name, req.enabled).await?;
    Ok(Json(FlagRes {
        name,
        enabled: req.enabled,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/integrity",
    responses((status = 200, description = "Integrity report", body = IntegrityRes))
)]
pub async fn run_integrity(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
) -> ApiResult<Json<IntegrityRes>> {
    Ok(Json(state.integrity.run_checks().await?.into()))
}

#[utoipa::path(
    post,
    path = "/admin/sweeps",
    responses((status = 200, description = "TTL sweeps executed", body = SweepRes))
)]
pub async fn run_sweeps(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
) -> ApiResult<Json<SweepRes>> {
    let now = Utc::now();
    let expired_intents = state.intents.expire_due_intents(now).await?;
    let expired_blocks = state.blocks.expire_due_blocks(now).await?;
    Ok(Json(SweepRes {
        expired_intents,
        expired_blocks,
    }))
}

#[utoipa::path(
    get,
    path = "/forecast/weekly",
    params(ForecastQuery),
    responses((status = 200, description = "Weekly supply/demand buckets", body = [WeekBucketRes]))
)]
pub async fn weekly_forecast(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<Json<Vec<WeekBucketRes>>> {
    let pool: Option<Pool> = query
        .pool
        .as_deref()
        .map(|p| {
            p.parse()
                .map_err(|_| ApiError::validation(format!("unknown pool: {p}")))
        })
        .transpose()?;

    let buckets = state.forecast.weekly_buckets(Utc::now(), pool).await?;
    Ok(Json(buckets.into_iter().map(Into::into).collect()))
}
