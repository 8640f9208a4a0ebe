//! Database pool construction and schema management.
//!
//! All core state lives in a single relational store; concurrency correctness
//! comes from the database's transactional guarantees rather than application
//! locks. The schema is created programmatically at startup so a fresh
//! deployment (or an in-memory test database) needs no migration tooling.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::CoreConfig;
use crate::SchedResult;

/// Opens the pool described by the configuration, creating the database file
/// if it does not exist yet.
pub async fn connect(cfg: &CoreConfig) -> SchedResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(cfg.database_url())?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Creates every table the engine persists into, if absent.
///
/// Table set per the scheduling data model: episodes and their stage history,
/// the stage catalog and transition rulesets, blocks and follow-up tasks, the
/// intent ledger, the slot inventory, appointments with their status audit
/// trail, the domain-event outbox and the feature-flag store.
pub async fn ensure_schema(pool: &SqlitePool) -> SchedResult<()> {
    const STATEMENTS: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS patient_episodes (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            chief_complaint TEXT NOT NULL,
            trigger_type TEXT,
            status TEXT NOT NULL,
            stage_version INTEGER NOT NULL DEFAULT 0,
            suggested_next_code TEXT,
            opened_at TEXT NOT NULL,
            closed_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS stage_events (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            episode_id TEXT NOT NULL,
            stage_code TEXT NOT NULL,
            at TEXT NOT NULL,
            note TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_stage_events_episode ON stage_events (episode_id, at)",
        "CREATE TABLE IF NOT EXISTS stage_catalog (
            code TEXT NOT NULL,
            reason TEXT NOT NULL,
            label_hu TEXT NOT NULL,
            order_index INTEGER NOT NULL,
            is_terminal INTEGER NOT NULL DEFAULT 0,
            default_duration_days INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (code, reason)
        )",
        "CREATE TABLE IF NOT EXISTS stage_transition_rulesets (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            rules TEXT NOT NULL,
            created_at TEXT NOT NULL,
            published_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS episode_blocks (
            id TEXT PRIMARY KEY,
            episode_id TEXT NOT NULL,
            key TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            expires_at TEXT NOT NULL,
            renewal_count INTEGER NOT NULL DEFAULT 0,
            expected_unblock_date TEXT,
            note TEXT,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS episode_tasks (
            id TEXT PRIMARY KEY,
            episode_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            due_at TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS slot_intents (
            id TEXT PRIMARY KEY,
            episode_id TEXT NOT NULL,
            step_code TEXT NOT NULL,
            window_start TEXT,
            window_end TEXT,
            duration_minutes INTEGER NOT NULL,
            pool TEXT NOT NULL,
            state TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_slot_intents_episode ON slot_intents (episode_id, state)",
        "CREATE TABLE IF NOT EXISTS available_time_slots (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            state TEXT NOT NULL,
            slot_purpose TEXT NOT NULL,
            location_site TEXT,
            location_room TEXT
        )",
        "CREATE TABLE IF NOT EXISTS appointments (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            time_slot_id TEXT NOT NULL,
            episode_id TEXT,
            slot_intent_id TEXT,
            start_time TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            appointment_status TEXT,
            completion_notes TEXT,
            is_late INTEGER NOT NULL DEFAULT 0,
            appointment_type TEXT,
            approval_status TEXT,
            pool TEXT NOT NULL,
            requires_precommit INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_appointments_episode ON appointments (episode_id, pool)",
        "CREATE INDEX IF NOT EXISTS idx_appointments_slot ON appointments (time_slot_id)",
        "CREATE TABLE IF NOT EXISTS appointment_status_events (
            id TEXT PRIMARY KEY,
            appointment_id TEXT NOT NULL,
            old_status TEXT,
            new_status TEXT,
            created_by TEXT NOT NULL,
            at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS scheduling_events (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS scheduling_feature_flags (
            flag TEXT PRIMARY KEY,
            enabled INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )",
    ];

    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        // Spot-check a table exists.
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patient_episodes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }
}
