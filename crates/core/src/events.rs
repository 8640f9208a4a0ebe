//! Scheduling domain events and the best-effort emission helper.
//!
//! `scheduling_events` is an append-only outbox: the core's obligation ends
//! at durably inserting a row, an external worker polls and consumes them for
//! cache invalidation and downstream reprojection. Emissions that happen
//! after a commit are best-effort by contract: their failure is logged and
//! never unwinds the committed state change.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::rows::parse_uuid;
use crate::SchedResult;

pub const ENTITY_EPISODE: &str = "episode";
pub const ENTITY_APPOINTMENT: &str = "appointment";
pub const ENTITY_BLOCK: &str = "episode_block";

/// Downstream forecasting must recompute the episode's projected demand.
pub const EVENT_REPROJECT_INTENTS: &str = "REPROJECT_INTENTS";
pub const EVENT_APPOINTMENT_BOOKED: &str = "APPOINTMENT_BOOKED";
pub const EVENT_APPOINTMENT_STATUS_CHANGED: &str = "APPOINTMENT_STATUS_CHANGED";
pub const EVENT_STAGE_ADVANCED: &str = "STAGE_ADVANCED";
pub const EVENT_EPISODE_CLOSED: &str = "EPISODE_CLOSED";
/// A block crossed its renewal escalation threshold; operational signal only,
/// no automatic action is taken.
pub const EVENT_BLOCK_ESCALATION: &str = "BLOCK_RENEWAL_ESCALATION";

/// An append-only domain event row.
#[derive(Clone, Debug)]
pub struct SchedulingEvent {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

/// Durably inserts an event row on an existing connection or transaction.
///
/// Used when the event is part of the operation's correctness contract (for
/// example the REPROJECT_INTENTS signal written inside the status-change
/// transaction).
pub async fn emit_on(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: Uuid,
    event_type: &str,
) -> SchedResult<()> {
    sqlx::query(
        "INSERT INTO scheduling_events (id, entity_type, entity_id, event_type, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entity_type)
    .bind(entity_id.to_string())
    .bind(event_type)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

/// Fire-and-forget emission for post-commit signals.
///
/// Failure is swallowed after logging; callers must never treat it as the
/// operation's failure.
pub async fn emit_best_effort(pool: &SqlitePool, entity_type: &str, entity_id: Uuid, event_type: &str) {
    let result = async {
        let mut conn = pool.acquire().await?;
        emit_on(&mut conn, entity_type, entity_id, event_type).await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(
            entity_type,
            %entity_id,
            event_type,
            error = %e,
            "failed to emit scheduling event; continuing"
        );
    }
}

/// Runs a post-commit side effect, logging and swallowing its failure.
///
/// This is the single place the "emit after commit, catch and log, never
/// propagate" policy lives, so call sites read as intent rather than as
/// scattered error plumbing.
pub async fn best_effort<F, T, E>(label: &str, fut: F)
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    if let Err(e) = fut.await {
        tracing::warn!(side_effect = label, error = %e, "post-commit side effect failed; continuing");
    }
}

/// Events recorded for an entity, oldest first. Read path for the external
/// consumer and for operational inspection.
pub async fn events_for_entity(
    pool: &SqlitePool,
    entity_type: &str,
    entity_id: Uuid,
) -> SchedResult<Vec<SchedulingEvent>> {
    let rows = sqlx::query(
        "SELECT id, entity_type, entity_id, event_type, created_at
         FROM scheduling_events
         WHERE entity_type = ? AND entity_id = ?
         ORDER BY created_at, id",
    )
    .bind(entity_type)
    .bind(entity_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(SchedulingEvent {
                id: parse_uuid(row.try_get("id")?)?,
                entity_type: row.try_get::<String, _>("entity_type")?,
                entity_id: parse_uuid(row.try_get("entity_id")?)?,
                event_type: row.try_get::<String, _>("event_type")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn emits_and_reads_back() {
        let pool = memory_pool().await;
        let episode_id = Uuid::new_v4();

        emit_best_effort(&pool, ENTITY_EPISODE, episode_id, EVENT_REPROJECT_INTENTS).await;

        let events = events_for_entity(&pool, ENTITY_EPISODE, episode_id)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EVENT_REPROJECT_INTENTS);
    }

    #[tokio::test]
    async fn best_effort_swallows_failure() {
        // A closed pool makes the insert fail; the helper must not panic or
        // propagate.
        let pool = memory_pool().await;
        pool.close().await;
        emit_best_effort(&pool, ENTITY_EPISODE, Uuid::new_v4(), EVENT_REPROJECT_INTENTS).await;
    }
}
