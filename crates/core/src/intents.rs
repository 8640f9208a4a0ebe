//! Slot-intent ledger: soft demand that precedes a real booking.
//!
//! An intent records that an episode will need a visit of some kind, in some
//! pool, within a time window. `open` intents either convert when the
//! reconciler matches them to a slot, or expire: by TTL lapse, by episode
//! closure, or by a booked appointment being cancelled (the conversion rolls
//! back to `expired`, never back to `open`; persisting demand needs a fresh
//! intent).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use api_shared::AuthContext;
use caresched_types::{EpisodeStatus, IntentState, Pool};

use crate::config::CoreConfig;
use crate::rows::{parse_enum, parse_uuid};
use crate::{SchedResult, SchedulingError};

/// Soft future demand for a visit.
#[derive(Clone, Debug)]
pub struct SlotIntent {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub step_code: String,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub pool: Pool,
    pub state: IntentState,
    pub priority: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating an intent.
#[derive(Clone, Debug)]
pub struct NewIntent {
    pub episode_id: Uuid,
    pub step_code: String,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub pool: Pool,
    pub priority: i64,
}

pub(crate) fn intent_from_row(row: &SqliteRow) -> SchedResult<SlotIntent> {
    Ok(SlotIntent {
        id: parse_uuid(row.try_get("id")?)?,
        episode_id: parse_uuid(row.try_get("episode_id")?)?,
        step_code: row.try_get::<String, _>("step_code")?,
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
        duration_minutes: row.try_get("duration_minutes")?,
        pool: parse_enum(row.try_get("pool")?)?,
        state: parse_enum(row.try_get("state")?)?,
        priority: row.try_get("priority")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) const INTENT_COLUMNS: &str = "id, episode_id, step_code, window_start, window_end, \
                                         duration_minutes, pool, state, priority, expires_at, created_at";

/// Expires every `open` intent of an episode on the given connection.
///
/// Runs inside the episode-closure transaction so closure and intent expiry
/// commit together.
pub(crate) async fn expire_open_for_episode(
    conn: &mut SqliteConnection,
    episode_id: Uuid,
) -> SchedResult<u64> {
    let result = sqlx::query("UPDATE slot_intents SET state = ? WHERE episode_id = ? AND state = ?")
        .bind(IntentState::Expired.as_str())
        .bind(episode_id.to_string())
        .bind(IntentState::Open.as_str())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Service owning the intent ledger.
#[derive(Clone)]
pub struct IntentService {
    pool: SqlitePool,
    cfg: Arc<CoreConfig>,
}

impl IntentService {
    pub fn new(pool: SqlitePool, cfg: Arc<CoreConfig>) -> Self {
        Self { pool, cfg }
    }

    /// Records soft demand for a future visit on an open episode.
    pub async fn create_intent(&self, ctx: &AuthContext, new: NewIntent) -> SchedResult<SlotIntent> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "create slot intents",
            });
        }
        if new.duration_minutes <= 0 {
            return Err(SchedulingError::Validation(
                "intent duration must be positive".into(),
            ));
        }
        if let (Some(start), Some(end)) = (new.window_start, new.window_end) {
            if end < start {
                return Err(SchedulingError::Validation(
                    "intent window end precedes window start".into(),
                ));
            }
        }

        let episode_row = sqlx::query("SELECT status FROM patient_episodes WHERE id = ?")
            .bind(new.episode_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SchedulingError::NotFound {
                entity: "episode",
                id: new.episode_id,
            })?;
        let status: EpisodeStatus = parse_enum(episode_row.try_get("status")?)?;
        if status != EpisodeStatus::Open {
            return Err(SchedulingError::InvalidState(format!(
                "episode {} is closed; intents require an open episode",
                new.episode_id
            )));
        }

        let now = Utc::now();
        let intent = SlotIntent {
            id: Uuid::new_v4(),
            episode_id: new.episode_id,
            step_code: new.step_code,
            window_start: new.window_start,
            window_end: new.window_end,
            duration_minutes: new.duration_minutes,
            pool: new.pool,
            state: IntentState::Open,
            priority: new.priority,
            expires_at: now + Duration::days(self.cfg.intent_ttl_days()),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO slot_intents
             (id, episode_id, step_code, window_start, window_end, duration_minutes, pool, state,
              priority, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(intent.id.to_string())
        .bind(intent.episode_id.to_string())
        .bind(&intent.step_code)
        .bind(intent.window_start)
        .bind(intent.window_end)
        .bind(intent.duration_minutes)
        .bind(intent.pool.as_str())
        .bind(intent.state.as_str())
        .bind(intent.priority)
        .bind(intent.expires_at)
        .bind(intent.created_at)
        .execute(&self.pool)
        .await?;

        Ok(intent)
    }

    pub async fn get_intent(&self, intent_id: Uuid) -> SchedResult<SlotIntent> {
        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM slot_intents WHERE id = ?"
        ))
        .bind(intent_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "slot intent",
            id: intent_id,
        })?;

        intent_from_row(&row)
    }

    /// Intents of an episode, newest first.
    pub async fn list_intents(&self, episode_id: Uuid) -> SchedResult<Vec<SlotIntent>> {
        let rows = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM slot_intents
             WHERE episode_id = ?
             ORDER BY created_at DESC"
        ))
        .bind(episode_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(intent_from_row).collect()
    }

    /// TTL sweep, invoked by the external scheduler. State-guarded, so
    /// running it twice produces exactly the state of running it once.
    pub async fn expire_due_intents(&self, now: DateTime<Utc>) -> SchedResult<u64> {
        let result =
            sqlx::query("UPDATE slot_intents SET state = ? WHERE state = ? AND expires_at < ?")
                .bind(IntentState::Expired.as_str())
                .bind(IntentState::Open.as_str())
                .bind(now)
                .execute(&self.pool)
                .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            tracing::info!(swept, "intent expiry sweep");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        open_test_episode, memory_pool, seed_catalog, surgeon_ctx, test_config,
    };
    use crate::catalog::CatalogService;
    use crate::episodes::EpisodeService;

    fn work_intent(episode_id: Uuid) -> NewIntent {
        NewIntent {
            episode_id,
            step_code: "IMPRESSION".into(),
            window_start: None,
            window_end: None,
            duration_minutes: 30,
            pool: Pool::Work,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn creates_open_intent_with_ttl() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let cfg = test_config();
        let intents = IntentService::new(pool.clone(), cfg.clone());
        let episode = open_test_episode(&pool).await;

        let intent = intents
            .create_intent(&surgeon_ctx(), work_intent(episode.id))
            .await
            .unwrap();
        assert_eq!(intent.state, IntentState::Open);

        let days_out = (intent.expires_at - Utc::now()).num_days();
        assert!((29..=30).contains(&days_out));
    }

    #[tokio::test]
    async fn rejects_bad_duration_and_window() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let intents = IntentService::new(pool.clone(), test_config());
        let episode = open_test_episode(&pool).await;

        let mut bad = work_intent(episode.id);
        bad.duration_minutes = 0;
        assert_eq!(
            intents
                .create_intent(&surgeon_ctx(), bad)
                .await
                .unwrap_err()
                .code(),
            "VALIDATION"
        );

        let mut inverted = work_intent(episode.id);
        inverted.window_start = Some(Utc::now() + Duration::days(10));
        inverted.window_end = Some(Utc::now() + Duration::days(5));
        assert_eq!(
            intents
                .create_intent(&surgeon_ctx(), inverted)
                .await
                .unwrap_err()
                .code(),
            "VALIDATION"
        );
    }

    #[tokio::test]
    async fn closed_episode_rejects_new_intents() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let cfg = test_config();
        let intents = IntentService::new(pool.clone(), cfg.clone());
        let episodes =
            EpisodeService::new(pool.clone(), CatalogService::new(pool.clone()), cfg);
        let episode = open_test_episode(&pool).await;

        episodes
            .close_episode(&surgeon_ctx(), episode.id)
            .await
            .unwrap();

        let err = intents
            .create_intent(&surgeon_ctx(), work_intent(episode.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn closure_expires_open_intents() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let cfg = test_config();
        let intents = IntentService::new(pool.clone(), cfg.clone());
        let episodes =
            EpisodeService::new(pool.clone(), CatalogService::new(pool.clone()), cfg);
        let episode = open_test_episode(&pool).await;

        let intent = intents
            .create_intent(&surgeon_ctx(), work_intent(episode.id))
            .await
            .unwrap();

        episodes
            .close_episode(&surgeon_ctx(), episode.id)
            .await
            .unwrap();

        let after = intents.get_intent(intent.id).await.unwrap();
        assert_eq!(after.state, IntentState::Expired);
    }

    #[tokio::test]
    async fn expiry_sweep_is_idempotent() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let intents = IntentService::new(pool.clone(), test_config());
        let episode = open_test_episode(&pool).await;

        let intent = intents
            .create_intent(&surgeon_ctx(), work_intent(episode.id))
            .await
            .unwrap();

        // Not yet due.
        assert_eq!(intents.expire_due_intents(Utc::now()).await.unwrap(), 0);

        let far_future = Utc::now() + Duration::days(60);
        assert_eq!(intents.expire_due_intents(far_future).await.unwrap(), 1);
        // Second run sweeps nothing and leaves the same end state.
        assert_eq!(intents.expire_due_intents(far_future).await.unwrap(), 0);

        let after = intents.get_intent(intent.id).await.unwrap();
        assert_eq!(after.state, IntentState::Expired);
    }
}
