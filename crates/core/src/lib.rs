//! # CareSched Core
//!
//! Scheduling and stage-transition engine for prosthetic rehabilitation
//! episodes:
//! - slot inventory and the slot-intent ledger
//! - stage catalog, versioned transition rulesets and the episode state
//!   machine with optimistic concurrency
//! - the booking reconciler and its one-hard-next invariant
//! - episode blocks, integrity checks and capacity forecasting
//!
//! **No API concerns**: authentication and HTTP surfaces belong in
//! `api-rest` and `api-shared`; this crate speaks services and errors only.

pub mod blocks;
pub mod booking;
pub mod catalog;
pub mod config;
pub mod db;
pub mod episodes;
pub mod error;
pub mod events;
pub mod flags;
pub mod forecast;
pub mod integrity;
pub mod intents;
pub mod slots;

mod rows;

pub use config::CoreConfig;
pub use error::{SchedResult, SchedulingError};

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for the service test modules. Everything runs against
    //! an in-memory database on a single connection so concurrent test tasks
    //! serialise the way concurrent requests do against one writer.

    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
    use uuid::Uuid;

    use api_shared::{AuthContext, Role};
    use caresched_types::{EpisodeReason, NonEmptyText, Pool};

    use crate::catalog::{CatalogService, StageCatalogEntry, TransitionRule};
    use crate::config::CoreConfig;
    use crate::episodes::{Episode, EpisodeService};
    use crate::slots::NewSlot;

    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::ensure_schema(&pool).await.unwrap();
        pool
    }

    pub fn test_config() -> Arc<CoreConfig> {
        Arc::new(CoreConfig::new("sqlite::memory:").unwrap())
    }

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            email: format!("{role:?}@clinic.test").to_lowercase(),
            role,
        }
    }

    pub fn admin_ctx() -> AuthContext {
        ctx(Role::Admin)
    }

    pub fn surgeon_ctx() -> AuthContext {
        ctx(Role::Surgeon)
    }

    pub fn assistant_ctx() -> AuthContext {
        ctx(Role::Assistant)
    }

    pub fn future(days: i64) -> DateTime<Utc> {
        Utc::now() + Duration::days(days)
    }

    pub fn new_slot(purpose: Pool, start_time: DateTime<Utc>, minutes: i64) -> NewSlot {
        NewSlot {
            provider_id: Uuid::new_v4(),
            start_time,
            duration_minutes: minutes,
            slot_purpose: purpose,
            location_site: Some("main".into()),
            location_room: None,
        }
    }

    /// Three-step oncologic path (STAGE_1, STAGE_2, terminal DELIVERY) plus
    /// one trauma entry so scope filters have something to exclude.
    pub async fn seed_catalog(pool: &SqlitePool) {
        let catalog = CatalogService::new(pool.clone());
        let admin = admin_ctx();

        let entries = [
            ("STAGE_1", EpisodeReason::Oncologic, "lenyomatvétel", 1, false),
            ("STAGE_2", EpisodeReason::Oncologic, "próba", 2, false),
            ("DELIVERY", EpisodeReason::Oncologic, "átadás", 3, true),
            ("STAGE_1", EpisodeReason::Trauma, "lenyomatvétel", 1, false),
        ];
        for (code, reason, label, order_index, is_terminal) in entries {
            catalog
                .put_entry(
                    &admin,
                    StageCatalogEntry {
                        code: code.into(),
                        reason,
                        label_hu: label.into(),
                        order_index,
                        is_terminal,
                        default_duration_days: 21,
                    },
                )
                .await
                .unwrap();
        }
    }

    /// Publishes a strictly linear ruleset over the seeded oncologic path.
    pub async fn publish_linear_ruleset(pool: &SqlitePool) {
        let catalog = CatalogService::new(pool.clone());
        let admin = admin_ctx();

        let rules = vec![
            TransitionRule {
                from: None,
                to: "STAGE_1".into(),
            },
            TransitionRule {
                from: Some("STAGE_1".into()),
                to: "STAGE_2".into(),
            },
            TransitionRule {
                from: Some("STAGE_2".into()),
                to: "DELIVERY".into(),
            },
        ];
        let draft = catalog.create_draft(&admin, rules).await.unwrap();
        catalog.publish(&admin, draft.id).await.unwrap();
    }

    /// Opens a fresh oncologic episode owned by a new synthetic patient.
    pub async fn open_test_episode(pool: &SqlitePool) -> Episode {
        let episodes = EpisodeService::new(
            pool.clone(),
            CatalogService::new(pool.clone()),
            test_config(),
        );
        episodes
            .create_episode(
                &surgeon_ctx(),
                Uuid::new_v4(),
                EpisodeReason::Oncologic,
                NonEmptyText::new("obturator needed after maxillectomy").unwrap(),
                None,
            )
            .await
            .unwrap()
    }
}
