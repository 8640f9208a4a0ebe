//! # API REST
//!
//! REST surface of the scheduling engine.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, identity headers)
//!
//! Uses `api-shared` for the caller identity model and `caresched-core` for
//! every piece of business logic; no invariants are enforced here.

#![warn(rust_2018_idioms)]

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use sqlx::sqlite::SqlitePool;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use api_shared::health::HealthRes;
use api_shared::HealthService;
use caresched_core::blocks::BlockService;
use caresched_core::booking::BookingService;
use caresched_core::catalog::CatalogService;
use caresched_core::episodes::EpisodeService;
use caresched_core::flags::FeatureFlags;
use caresched_core::forecast::ForecastService;
use caresched_core::integrity::IntegrityService;
use caresched_core::intents::IntentService;
use caresched_core::slots::SlotService;
use caresched_core::CoreConfig;

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub slots: SlotService,
    pub catalog: CatalogService,
    pub episodes: EpisodeService,
    pub intents: IntentService,
    pub blocks: BlockService,
    pub booking: BookingService,
    pub integrity: IntegrityService,
    pub forecast: ForecastService,
    pub flags: FeatureFlags,
}

impl AppState {
    /// Wires every service onto one pool and configuration.
    pub fn new(pool: SqlitePool, cfg: Arc<CoreConfig>) -> Self {
        let catalog = CatalogService::new(pool.clone());
        let flags = FeatureFlags::new(pool.clone());
        Self {
            slots: SlotService::new(pool.clone()),
            episodes: EpisodeService::new(pool.clone(), catalog.clone(), cfg.clone()),
            intents: IntentService::new(pool.clone(), cfg.clone()),
            blocks: BlockService::new(pool.clone(), cfg.clone()),
            booking: BookingService::new(pool.clone(), flags.clone()),
            integrity: IntegrityService::new(pool.clone()),
            forecast: ForecastService::new(pool, cfg),
            catalog,
            flags,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        routes::slots::create_slot,
        routes::slots::list_slots,
        routes::slots::get_slot,
        routes::slots::move_slot,
        routes::slots::hold_slot,
        routes::slots::delete_slot,
        routes::catalog::put_entry,
        routes::catalog::list_catalog,
        routes::catalog::create_draft,
        routes::catalog::get_published,
        routes::catalog::get_ruleset,
        routes::catalog::publish_ruleset,
        routes::episodes::create_episode,
        routes::episodes::get_episode,
        routes::episodes::transition_stage,
        routes::episodes::stage_history,
        routes::episodes::suggest_next_stage,
        routes::episodes::close_episode,
        routes::episodes::correct_stage_event,
        routes::episodes::remaining_visits,
        routes::intents::create_intent,
        routes::intents::list_intents,
        routes::intents::get_intent,
        routes::appointments::match_and_book,
        routes::appointments::book_manual,
        routes::appointments::get_appointment,
        routes::appointments::update_status,
        routes::appointments::status_events,
        routes::blocks::create_block,
        routes::blocks::list_blocks,
        routes::blocks::renew_block,
        routes::blocks::resolve_block,
        routes::admin::list_flags,
        routes::admin::set_flag,
        routes::admin::run_integrity,
        routes::admin::run_sweeps,
        routes::admin::weekly_forecast,
    ),
    components(schemas(
        HealthRes,
        error::ErrorBody,
        dto::SlotRes,
        dto::EpisodeRes,
        dto::StageEventRes,
        dto::IntentRes,
        dto::AppointmentRes,
        dto::StatusEventRes,
        dto::BlockRes,
        dto::CatalogEntryRes,
        dto::TransitionRuleRes,
        dto::RulesetRes,
        dto::ViolationRes,
        dto::IntegrityRes,
        dto::WeekBucketRes,
        dto::RemainingVisitsRes,
        routes::slots::CreateSlotReq,
        routes::slots::MoveSlotReq,
        routes::catalog::PutEntryReq,
        routes::catalog::TransitionRuleReq,
        routes::catalog::CreateDraftReq,
        routes::episodes::CreateEpisodeReq,
        routes::episodes::TransitionReq,
        routes::episodes::SuggestReq,
        routes::episodes::CorrectEventReq,
        routes::intents::CreateIntentReq,
        routes::appointments::MatchAndBookReq,
        routes::appointments::ManualBookReq,
        routes::appointments::StatusUpdateReq,
        routes::blocks::CreateBlockReq,
        routes::blocks::RenewBlockReq,
        routes::admin::FlagRes,
        routes::admin::SetFlagReq,
        routes::admin::SweepRes,
    ))
)]
pub struct ApiDoc;

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Health check response", body = HealthRes))
)]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

/// Builds the full application router, Swagger UI included.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/slots", post(routes::slots::create_slot))
        .route("/slots", get(routes::slots::list_slots))
        .route("/slots/:id", get(routes::slots::get_slot))
        .route("/slots/:id", delete(routes::slots::delete_slot))
        .route("/slots/:id/start-time", put(routes::slots::move_slot))
        .route("/slots/:id/hold", post(routes::slots::hold_slot))
        .route("/catalog", put(routes::catalog::put_entry))
        .route("/catalog", get(routes::catalog::list_catalog))
        .route("/rulesets", post(routes::catalog::create_draft))
        .route("/rulesets/published", get(routes::catalog::get_published))
        .route("/rulesets/:id", get(routes::catalog::get_ruleset))
        .route("/rulesets/:id/publish", post(routes::catalog::publish_ruleset))
        .route("/episodes", post(routes::episodes::create_episode))
        .route("/episodes/:id", get(routes::episodes::get_episode))
        .route("/episodes/:id/transitions", post(routes::episodes::transition_stage))
        .route("/episodes/:id/stages", get(routes::episodes::stage_history))
        .route("/episodes/:id/suggested-next", put(routes::episodes::suggest_next_stage))
        .route("/episodes/:id/close", post(routes::episodes::close_episode))
        .route("/episodes/:id/remaining-visits", get(routes::episodes::remaining_visits))
        .route("/episodes/:id/blocks", get(routes::blocks::list_blocks))
        .route("/stage-events/:id/at", put(routes::episodes::correct_stage_event))
        .route("/intents", post(routes::intents::create_intent))
        .route("/intents", get(routes::intents::list_intents))
        .route("/intents/:id", get(routes::intents::get_intent))
        .route("/appointments/match", post(routes::appointments::match_and_book))
        .route("/appointments", post(routes::appointments::book_manual))
        .route("/appointments/:id", get(routes::appointments::get_appointment))
        .route("/appointments/:id/status", patch(routes::appointments::update_status))
        .route("/appointments/:id/status-events", get(routes::appointments::status_events))
        .route("/blocks", post(routes::blocks::create_block))
        .route("/blocks/:id/renew", post(routes::blocks::renew_block))
        .route("/blocks/:id/resolve", post(routes::blocks::resolve_block))
        .route("/admin/flags", get(routes::admin::list_flags))
        .route("/admin/flags/:name", put(routes::admin::set_flag))
        .route("/admin/integrity", get(routes::admin::run_integrity))
        .route("/admin/sweeps", post(routes::admin::run_sweeps))
        .route("/forecast/weekly", get(routes::admin::weekly_forecast))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
