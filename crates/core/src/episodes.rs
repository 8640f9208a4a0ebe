//! Episode lifecycle and the stage-transition state machine.
//!
//! An episode is one continuous care journey for a patient under a single
//! clinical reason. Its effective stage is defined by the append-only
//! `stage_events` history (the event with the latest `at` wins), and the only
//! path that appends to that history is [`EpisodeService::transition_stage`].
//! Every accepted transition bumps the episode's `stage_version`, the
//! optimistic-lock token concurrent writers race on: a conditional UPDATE
//! that matches zero rows means another writer won, and the loser gets a
//! CONFLICT instead of silently overwriting.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use api_shared::AuthContext;
use caresched_types::{EpisodeReason, EpisodeStatus, NonEmptyText};

use crate::catalog::CatalogService;
use crate::config::CoreConfig;
use crate::events::{
    self, best_effort, EVENT_EPISODE_CLOSED, EVENT_STAGE_ADVANCED, ENTITY_EPISODE,
};
use crate::intents;
use crate::rows::{parse_enum, parse_uuid};
use crate::{SchedResult, SchedulingError};

/// One continuous care journey for a patient for a given clinical reason.
#[derive(Clone, Debug)]
pub struct Episode {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub reason: EpisodeReason,
    pub chief_complaint: String,
    pub trigger_type: Option<String>,
    pub status: EpisodeStatus,
    pub stage_version: i64,
    pub suggested_next_code: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// An immutable append-only fact: "episode E entered stage S at time T".
#[derive(Clone, Debug)]
pub struct StageEvent {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub episode_id: Uuid,
    pub stage_code: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn episode_from_row(row: &SqliteRow) -> SchedResult<Episode> {
    Ok(Episode {
        id: parse_uuid(row.try_get("id")?)?,
        patient_id: parse_uuid(row.try_get("patient_id")?)?,
        reason: parse_enum(row.try_get("reason")?)?,
        chief_complaint: row.try_get::<String, _>("chief_complaint")?,
        trigger_type: row.try_get("trigger_type")?,
        status: parse_enum(row.try_get("status")?)?,
        stage_version: row.try_get("stage_version")?,
        suggested_next_code: row.try_get("suggested_next_code")?,
        opened_at: row.try_get("opened_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn stage_event_from_row(row: &SqliteRow) -> SchedResult<StageEvent> {
    Ok(StageEvent {
        id: parse_uuid(row.try_get("id")?)?,
        patient_id: parse_uuid(row.try_get("patient_id")?)?,
        episode_id: parse_uuid(row.try_get("episode_id")?)?,
        stage_code: row.try_get::<String, _>("stage_code")?,
        at: row.try_get("at")?,
        note: row.try_get("note")?,
        created_by: parse_uuid(row.try_get("created_by")?)?,
        created_at: row.try_get("created_at")?,
    })
}

const EPISODE_COLUMNS: &str = "id, patient_id, reason, chief_complaint, trigger_type, status, \
                               stage_version, suggested_next_code, opened_at, closed_at";
const STAGE_EVENT_COLUMNS: &str =
    "id, patient_id, episode_id, stage_code, at, note, created_by, created_at";

/// Service owning episode state and the stage-transition operation.
#[derive(Clone)]
pub struct EpisodeService {
    pool: SqlitePool,
    catalog: CatalogService,
    cfg: Arc<CoreConfig>,
}

impl EpisodeService {
    pub fn new(pool: SqlitePool, catalog: CatalogService, cfg: Arc<CoreConfig>) -> Self {
        Self { pool, catalog, cfg }
    }

    /// Opens a new episode at stage version zero.
    pub async fn create_episode(
        &self,
        ctx: &AuthContext,
        patient_id: Uuid,
        reason: EpisodeReason,
        chief_complaint: NonEmptyText,
        trigger_type: Option<String>,
    ) -> SchedResult<Episode> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "open episodes",
            });
        }

        let episode = Episode {
            id: Uuid::new_v4(),
            patient_id,
            reason,
            chief_complaint: chief_complaint.into_inner(),
            trigger_type,
            status: EpisodeStatus::Open,
            stage_version: 0,
            suggested_next_code: None,
            opened_at: Utc::now(),
            closed_at: None,
        };

        sqlx::query(
            "INSERT INTO patient_episodes
             (id, patient_id, reason, chief_complaint, trigger_type, status, stage_version,
              suggested_next_code, opened_at, closed_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, NULL, ?, NULL)",
        )
        .bind(episode.id.to_string())
        .bind(episode.patient_id.to_string())
        .bind(episode.reason.as_str())
        .bind(&episode.chief_complaint)
        .bind(&episode.trigger_type)
        .bind(episode.status.as_str())
        .bind(episode.opened_at)
        .execute(&self.pool)
        .await?;

        Ok(episode)
    }

    pub async fn get_episode(&self, episode_id: Uuid) -> SchedResult<Episode> {
        let row = sqlx::query(&format!(
            "SELECT {EPISODE_COLUMNS} FROM patient_episodes WHERE id = ?"
        ))
        .bind(episode_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "episode",
            id: episode_id,
        })?;

        episode_from_row(&row)
    }

    /// The episode's current stage: the stage event with the latest `at`.
    pub async fn current_stage(&self, episode_id: Uuid) -> SchedResult<Option<StageEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {STAGE_EVENT_COLUMNS} FROM stage_events
             WHERE episode_id = ?
             ORDER BY at DESC, created_at DESC
             LIMIT 1"
        ))
        .bind(episode_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stage_event_from_row).transpose()
    }

    /// Full stage history, ordered by `at`.
    pub async fn stage_history(&self, episode_id: Uuid) -> SchedResult<Vec<StageEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {STAGE_EVENT_COLUMNS} FROM stage_events
             WHERE episode_id = ?
             ORDER BY at, created_at"
        ))
        .bind(episode_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stage_event_from_row).collect()
    }

    /// Advances an episode to a new clinical stage.
    ///
    /// The only path by which an episode's effective stage changes. The
    /// caller may supply `expected_stage_version` as a fast optimistic
    /// pre-check; the transactional compare-and-swap inside repeats the
    /// check authoritatively, so a concurrent writer is detected either way.
    ///
    /// Side effects after the commit are best-effort: the suggested-next
    /// hint is cleared, recall follow-up tasks are scheduled when the target
    /// stage is terminal, and a stage-advanced event is emitted. Their
    /// failure is logged and never surfaced to the caller.
    pub async fn transition_stage(
        &self,
        ctx: &AuthContext,
        episode_id: Uuid,
        stage_code: &str,
        note: Option<String>,
        expected_stage_version: Option<i64>,
    ) -> SchedResult<StageEvent> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "transition episode stages",
            });
        }

        let episode = self.get_episode(episode_id).await?;
        if episode.status != EpisodeStatus::Open {
            return Err(SchedulingError::InvalidState(format!(
                "episode {episode_id} is closed; stages can only change on open episodes"
            )));
        }

        if let Some(expected) = expected_stage_version {
            if expected != episode.stage_version {
                return Err(SchedulingError::VersionConflict {
                    expected,
                    current: episode.stage_version,
                });
            }
        }

        let current = self.current_stage(episode_id).await?;
        let valid = self
            .catalog
            .is_valid_transition(
                episode.reason,
                current.as_ref().map(|e| e.stage_code.as_str()),
                stage_code,
            )
            .await?;
        if !valid {
            return Err(SchedulingError::Validation(format!(
                "stage {stage_code} is not a legal transition for reason {} from {:?}",
                episode.reason,
                current.as_ref().map(|e| e.stage_code.as_str())
            )));
        }

        let now = Utc::now();
        let event = StageEvent {
            id: Uuid::new_v4(),
            patient_id: episode.patient_id,
            episode_id,
            stage_code: stage_code.to_owned(),
            at: now,
            note,
            created_by: ctx.user_id,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;

        // Compare-and-swap on the version the episode was loaded with. Zero
        // rows updated means a concurrent writer advanced the episode first.
        let cas = sqlx::query(
            "UPDATE patient_episodes
             SET stage_version = stage_version + 1
             WHERE id = ? AND stage_version = ?",
        )
        .bind(episode_id.to_string())
        .bind(episode.stage_version)
        .execute(&mut *tx)
        .await?;

        if cas.rows_affected() == 0 {
            tx.rollback().await?;
            let fresh = self.get_episode(episode_id).await?;
            return Err(SchedulingError::VersionConflict {
                expected: episode.stage_version,
                current: fresh.stage_version,
            });
        }

        sqlx::query(
            "INSERT INTO stage_events
             (id, patient_id, episode_id, stage_code, at, note, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.patient_id.to_string())
        .bind(event.episode_id.to_string())
        .bind(&event.stage_code)
        .bind(event.at)
        .bind(&event.note)
        .bind(event.created_by.to_string())
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.post_transition_side_effects(&episode, stage_code).await;

        Ok(event)
    }

    async fn post_transition_side_effects(&self, episode: &Episode, stage_code: &str) {
        best_effort("clear suggested next stage", async {
            sqlx::query("UPDATE patient_episodes SET suggested_next_code = NULL WHERE id = ?")
                .bind(episode.id.to_string())
                .execute(&self.pool)
                .await
        })
        .await;

        match self.catalog.entry(stage_code, episode.reason).await {
            Ok(Some(entry)) if entry.is_terminal => {
                best_effort("schedule recall follow-ups", self.schedule_recalls(episode.id)).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(episode_id = %episode.id, error = %e, "could not re-read catalog entry after transition");
            }
        }

        events::emit_best_effort(&self.pool, ENTITY_EPISODE, episode.id, EVENT_STAGE_ADVANCED)
            .await;

        // Activity audit is an external fire-and-forget collaborator; the
        // structured log line is its feed.
        tracing::info!(episode_id = %episode.id, stage = stage_code, "episode stage advanced");
    }

    async fn schedule_recalls(&self, episode_id: Uuid) -> SchedResult<()> {
        let now = Utc::now();
        for offset in self.cfg.recall_offsets_days() {
            sqlx::query(
                "INSERT INTO episode_tasks (id, episode_id, kind, due_at, status, created_at)
                 VALUES (?, ?, 'recall_follow_up', ?, 'pending', ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(episode_id.to_string())
            .bind(now + Duration::days(*offset))
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Records a suggested next stage hint on the episode. The hint is
    /// advisory and cleared by the next accepted transition.
    pub async fn suggest_next_stage(
        &self,
        ctx: &AuthContext,
        episode_id: Uuid,
        stage_code: &str,
    ) -> SchedResult<()> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "suggest stages",
            });
        }

        let episode = self.get_episode(episode_id).await?;
        if self
            .catalog
            .entry(stage_code, episode.reason)
            .await?
            .is_none()
        {
            return Err(SchedulingError::Validation(format!(
                "stage {stage_code} does not exist for reason {}",
                episode.reason
            )));
        }

        sqlx::query("UPDATE patient_episodes SET suggested_next_code = ? WHERE id = ?")
            .bind(stage_code)
            .bind(episode_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Admin correction of a stage event's clinical timestamp. Only the `at`
    /// field moves; the stage code is immutable and `stage_version` is not
    /// touched.
    pub async fn correct_stage_event_at(
        &self,
        ctx: &AuthContext,
        event_id: Uuid,
        new_at: DateTime<Utc>,
    ) -> SchedResult<StageEvent> {
        if !ctx.is_admin() {
            return Err(SchedulingError::Forbidden {
                action: "correct stage event timestamps",
            });
        }

        let updated = sqlx::query("UPDATE stage_events SET at = ? WHERE id = ?")
            .bind(new_at)
            .bind(event_id.to_string())
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(SchedulingError::NotFound {
                entity: "stage event",
                id: event_id,
            });
        }

        let row = sqlx::query(&format!(
            "SELECT {STAGE_EVENT_COLUMNS} FROM stage_events WHERE id = ?"
        ))
        .bind(event_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        stage_event_from_row(&row)
    }

    /// Closes an episode, expiring every open intent for it in the same
    /// transaction so no open demand survives a closed episode.
    pub async fn close_episode(&self, ctx: &AuthContext, episode_id: Uuid) -> SchedResult<Episode> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "close episodes",
            });
        }

        let episode = self.get_episode(episode_id).await?;
        if episode.status == EpisodeStatus::Closed {
            return Err(SchedulingError::InvalidState(format!(
                "episode {episode_id} is already closed"
            )));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE patient_episodes SET status = ?, closed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(EpisodeStatus::Closed.as_str())
        .bind(now)
        .bind(episode_id.to_string())
        .bind(EpisodeStatus::Open.as_str())
        .execute(&mut *tx)
        .await?;

        let expired = intents::expire_open_for_episode(&mut *tx, episode_id).await?;

        tx.commit().await?;

        if expired > 0 {
            tracing::info!(%episode_id, expired, "expired open intents on episode closure");
        }
        events::emit_best_effort(&self.pool, ENTITY_EPISODE, episode_id, EVENT_EPISODE_CLOSED)
            .await;

        self.get_episode(episode_id).await
    }
}
