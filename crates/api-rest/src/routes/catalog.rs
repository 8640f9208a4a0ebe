//! Stage catalog and transition-ruleset endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use caresched_core::catalog::{StageCatalogEntry, TransitionRule};
use caresched_types::EpisodeReason;

use crate::auth::Caller;
use crate::dto::{CatalogEntryRes, RulesetRes};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct PutEntryReq {
    pub code: String,
    /// `trauma`, `congenital` or `oncologic`.
    pub reason: String,
    pub label_hu: String,
    pub order_index: i64,
    #[serde(default)]
    pub is_terminal: bool,
    #[serde(default)]
    pub default_duration_days: i64,
}

#[derive(Deserialize, IntoParams)]
pub struct ListCatalogQuery {
    pub reason: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct TransitionRuleReq {
    pub from: Option<String>,
    pub to: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateDraftReq {
    pub rules: Vec<TransitionRuleReq>,
}

fn parse_reason(value: &str) -> ApiResult<EpisodeReason> {
    value
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown episode reason: {value}")))
}

#[utoipa::path(
    put,
    path = "/catalog",
    request_body = PutEntryReq,
    responses(
        (status = 204, description = "Entry stored"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn put_entry(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<PutEntryReq>,
) -> ApiResult<StatusCode> {
    state
        .catalog
        .put_entry(
            &ctx,
            StageCatalogEntry {
                code: req.code,
                reason: parse_reason(&req.reason)?,
                label_hu: req.label_hu,
                order_index: req.order_index,
                is_terminal: req.is_terminal,
                default_duration_days: req.default_duration_days,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/catalog",
    params(ListCatalogQuery),
    responses((status = 200, description = "Catalog entries in order", body = [CatalogEntryRes]))
)]
pub async fn list_catalog(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Query(query): Query<ListCatalogQuery>,
) -> ApiResult<Json<Vec<CatalogEntryRes>>> {
    let reason = query.reason.as_deref().map(parse_reason).transpose()?;
    let entries = state.catalog.list_catalog(reason).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/rulesets",
    request_body = CreateDraftReq,
    responses(
        (status = 201, description = "Draft created", body = RulesetRes),
        (status = 400, description = "Empty rule list"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn create_draft(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<CreateDraftReq>,
) -> ApiResult<(StatusCode, Json<RulesetRes>)> {
    let rules = req
        .rules
        .into_iter()
        .map(|TransitionRuleReq { from, to }| TransitionRule { from, to })
        .collect();
    let draft = state.catalog.create_draft(&ctx, rules).await?;
    Ok((StatusCode::CREATED, Json(draft.into())))
}

#[utoipa::path(
    get,
    path = "/rulesets/published",
    responses(
        (status = 200, description = "Currently published ruleset", body = RulesetRes),
        (status = 404, description = "Nothing published yet")
    )
)]
pub async fn get_published(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
) -> ApiResult<Json<RulesetRes>> {
    match state.catalog.published().await? {
        Some(ruleset) => Ok(Json(ruleset.into())),
        None => Err(ApiError(caresched_core::SchedulingError::NotFound {
            entity: "published ruleset",
            id: Uuid::nil(),
        })),
    }
}

#[utoipa::path(
    get,
    path = "/rulesets/{id}",
    responses(
        (status = 200, description = "Ruleset", body = RulesetRes),
        (status = 404, description = "No such ruleset")
    )
)]
pub async fn get_ruleset(
    State(state): State<AppState>,
    Caller(_ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RulesetRes>> {
    Ok(Json(state.catalog.get_ruleset(id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/rulesets/{id}/publish",
    responses(
        (status = 200, description = "Ruleset published", body = RulesetRes),
        (status = 403, description = "Admin only"),
        (status = 422, description = "Not a draft")
    )
)]
pub async fn publish_ruleset(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RulesetRes>> {
    Ok(Json(state.catalog.publish(&ctx, id).await?.into()))
}
