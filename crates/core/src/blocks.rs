//! Episode blocks: externally imposed waiting states.
//!
//! A block says "this episode cannot progress until X" where X is healing,
//! a lab result, an operating-room date, or the patient's own availability.
//! Blocks carry a TTL so that forgotten ones surface instead of silently
//! parking an episode forever, and repeated renewals escalate to a durable
//! event the clinic lead reviews.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use api_shared::AuthContext;
use caresched_types::{BlockKey, EpisodeStatus};

use crate::config::CoreConfig;
use crate::events::{emit_on, ENTITY_BLOCK, EVENT_BLOCK_ESCALATION};
use crate::rows::{parse_enum, parse_uuid};
use crate::{SchedResult, SchedulingError};

#[derive(Clone, Debug)]
pub struct EpisodeBlock {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub key: BlockKey,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub renewal_count: i64,
    pub expected_unblock_date: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewBlock {
    pub episode_id: Uuid,
    pub key: BlockKey,
    /// Overrides the key's default TTL when set.
    pub ttl_days: Option<i64>,
    pub expected_unblock_date: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

const BLOCK_COLUMNS: &str =
    "id, episode_id, key, active, expires_at, renewal_count, expected_unblock_date, note, created_at";

fn block_from_row(row: &SqliteRow) -> SchedResult<EpisodeBlock> {
    Ok(EpisodeBlock {
        id: parse_uuid(row.try_get("id")?)?,
        episode_id: parse_uuid(row.try_get("episode_id")?)?,
        key: parse_enum(row.try_get("key")?)?,
        active: row.try_get("active")?,
        expires_at: row.try_get("expires_at")?,
        renewal_count: row.try_get("renewal_count")?,
        expected_unblock_date: row.try_get("expected_unblock_date")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Clone)]
pub struct BlockService {
    pool: SqlitePool,
    cfg: Arc<CoreConfig>,
}

impl BlockService {
    pub fn new(pool: SqlitePool, cfg: Arc<CoreConfig>) -> Self {
        Self { pool, cfg }
    }

    pub async fn create_block(&self, ctx: &AuthContext, input: NewBlock) -> SchedResult<EpisodeBlock> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "create episode blocks",
            });
        }

        let ttl_days = match input.ttl_days {
            Some(days) if days <= 0 => {
                return Err(SchedulingError::Validation(format!(
                    "block ttl must be positive, got {days}"
                )));
            }
            Some(days) => days,
            None => input.key.default_ttl_days(),
        };

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM patient_episodes WHERE id = ?")
                .bind(input.episode_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        let status = status.ok_or(SchedulingError::NotFound {
            entity: "episode",
            id: input.episode_id,
        })?;
        if status != EpisodeStatus::Open.as_str() {
            return Err(SchedulingError::InvalidState(format!(
                "episode {} is closed and cannot be blocked",
                input.episode_id
            )));
        }

        let now = Utc::now();
        let block = EpisodeBlock {
            id: Uuid::new_v4(),
            episode_id: input.episode_id,
            key: input.key,
            active: true,
            expires_at: now + Duration::days(ttl_days),
            renewal_count: 0,
            expected_unblock_date: input.expected_unblock_date,
            note: input.note,
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO episode_blocks
             (id, episode_id, key, active, expires_at, renewal_count, expected_unblock_date, note, created_at)
             VALUES (?, ?, ?, 1, ?, 0, ?, ?, ?)",
        )
        .bind(block.id.to_string())
        .bind(block.episode_id.to_string())
        .bind(block.key.as_str())
        .bind(block.expires_at)
        .bind(block.expected_unblock_date)
        .bind(&block.note)
        .bind(block.created_at)
        .execute(&self.pool)
        .await?;

        Ok(block)
    }

    pub async fn get_block(&self, block_id: Uuid) -> SchedResult<EpisodeBlock> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM episode_blocks WHERE id = ?"
        ))
        .bind(block_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "block",
            id: block_id,
        })?;

        block_from_row(&row)
    }

    /// Extends an active block by its key's default TTL (or an explicit
    /// override) and bumps the renewal count. Crossing the escalation
    /// threshold writes a durable event so the renewal habit gets reviewed
    /// instead of repeating quietly.
    pub async fn renew_block(
        &self,
        ctx: &AuthContext,
        block_id: Uuid,
        ttl_days: Option<i64>,
    ) -> SchedResult<EpisodeBlock> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "renew episode blocks",
            });
        }
        if let Some(days) = ttl_days {
            if days <= 0 {
                return Err(SchedulingError::Validation(format!(
                    "block ttl must be positive, got {days}"
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM episode_blocks WHERE id = ?"
        ))
        .bind(block_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "block",
            id: block_id,
        })?;
        let block = block_from_row(&row)?;

        if !block.active {
            return Err(SchedulingError::InvalidState(format!(
                "block {block_id} is no longer active and cannot be renewed"
            )));
        }

        let extend_days = ttl_days.unwrap_or_else(|| block.key.default_ttl_days());
        let new_expiry = Utc::now() + Duration::days(extend_days);
        let new_count = block.renewal_count + 1;

        sqlx::query("UPDATE episode_blocks SET expires_at = ?, renewal_count = ? WHERE id = ?")
            .bind(new_expiry)
            .bind(new_count)
            .bind(block_id.to_string())
            .execute(&mut *tx)
            .await?;

        if new_count >= self.cfg.block_escalation_threshold() {
            emit_on(&mut *tx, ENTITY_BLOCK, block_id, EVENT_BLOCK_ESCALATION).await?;
            tracing::warn!(
                %block_id,
                episode_id = %block.episode_id,
                renewal_count = new_count,
                key = %block.key,
                "block renewed past escalation threshold"
            );
        }

        tx.commit().await?;

        self.get_block(block_id).await
    }

    /// Clears a block. Deliberately idempotent: resolving an already
    /// resolved block is a no-op, not an error.
    pub async fn resolve_block(&self, ctx: &AuthContext, block_id: Uuid) -> SchedResult<EpisodeBlock> {
        if !ctx.is_treating_clinician() {
            return Err(SchedulingError::Forbidden {
                action: "resolve episode blocks",
            });
        }

        let updated = sqlx::query("UPDATE episode_blocks SET active = 0 WHERE id = ? AND active = 1")
            .bind(block_id.to_string())
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            // Distinguish missing from already resolved.
            let _ = self.get_block(block_id).await?;
        }

        self.get_block(block_id).await
    }

    /// Deactivates blocks whose TTL has passed. Run from the periodic
    /// sweeper; safe to call repeatedly.
    pub async fn expire_due_blocks(&self, now: DateTime<Utc>) -> SchedResult<u64> {
        let result =
            sqlx::query("UPDATE episode_blocks SET active = 0 WHERE active = 1 AND expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await?;

        let expired = result.rows_affected();
        if expired > 0 {
            tracing::info!(count = expired, "expired overdue episode blocks");
        }
        Ok(expired)
    }

    pub async fn list_blocks(
        &self,
        episode_id: Uuid,
        active_only: bool,
    ) -> SchedResult<Vec<EpisodeBlock>> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM episode_blocks
             WHERE episode_id = ? AND (?2 = 0 OR active = 1)
             ORDER BY created_at, id"
        ))
        .bind(episode_id.to_string())
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    /// An episode with any active block is parked; stage advances are a
    /// clinical judgement call, but boards and forecasts treat it as
    /// not schedulable.
    pub async fn has_active_block(&self, episode_id: Uuid) -> SchedResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM episode_blocks WHERE episode_id = ? AND active = 1",
        )
        .bind(episode_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}
