//! Read-only data integrity checks.
//!
//! Every write path already defends the invariants; this module re-derives
//! them from raw rows so drift introduced by manual fixes, migrations, or a
//! bug elsewhere is caught instead of compounding. Run periodically and on
//! demand from the admin surface.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use crate::rows::parse_uuid;
use crate::SchedResult;

pub const ONE_HARD_NEXT_VIOLATION: &str = "ONE_HARD_NEXT_VIOLATION";
pub const INTENT_OPEN_EPISODE_CLOSED: &str = "INTENT_OPEN_EPISODE_CLOSED";
pub const APPOINTMENT_NO_SLOT: &str = "APPOINTMENT_NO_SLOT";
pub const SLOT_DOUBLE_BOOKED: &str = "SLOT_DOUBLE_BOOKED";

/// One detected inconsistency. `entity_id` is the episode, intent,
/// appointment, or slot the finding is anchored to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub check: &'static str,
    pub entity_id: Uuid,
    pub detail: String,
}

#[derive(Clone, Debug)]
pub struct IntegrityReport {
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    pub fn ok(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Clone)]
pub struct IntegrityService {
    pool: SqlitePool,
}

impl IntegrityService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_checks(&self) -> SchedResult<IntegrityReport> {
        let mut violations = Vec::new();
        self.check_one_hard_next(&mut violations).await?;
        self.check_orphaned_intents(&mut violations).await?;
        self.check_appointment_slots(&mut violations).await?;
        self.check_double_booked_slots(&mut violations).await?;

        if !violations.is_empty() {
            tracing::warn!(count = violations.len(), "integrity check found violations");
        }

        Ok(IntegrityReport { violations })
    }

    /// Open episodes holding more than one active future hard work
    /// appointment.
    async fn check_one_hard_next(&self, out: &mut Vec<Violation>) -> SchedResult<()> {
        let rows = sqlx::query(
            "SELECT a.episode_id AS episode_id, COUNT(*) AS hard_count
             FROM appointments a
             JOIN patient_episodes e ON e.id = a.episode_id
             WHERE e.status = 'open'
               AND a.pool = 'work'
               AND a.requires_precommit = 0
               AND a.start_time > ?
               AND (a.appointment_status IS NULL OR a.appointment_status = 'completed')
             GROUP BY a.episode_id
             HAVING COUNT(*) > 1",
        )
        .bind(chrono::Utc::now())
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let count: i64 = row.try_get("hard_count")?;
            out.push(Violation {
                check: ONE_HARD_NEXT_VIOLATION,
                entity_id: parse_uuid(row.try_get("episode_id")?)?,
                detail: format!("{count} active future hard work appointments"),
            });
        }
        Ok(())
    }

    /// Open intents whose episode has been closed. Closure expires intents
    /// in the same transaction, so any survivor was written around the
    /// service layer.
    async fn check_orphaned_intents(&self, out: &mut Vec<Violation>) -> SchedResult<()> {
        let rows = sqlx::query(
            "SELECT i.id AS intent_id, i.episode_id AS episode_id
             FROM slot_intents i
             JOIN patient_episodes e ON e.id = i.episode_id
             WHERE i.state = 'open' AND e.status != 'open'",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let episode: Uuid = parse_uuid(row.try_get("episode_id")?)?;
            out.push(Violation {
                check: INTENT_OPEN_EPISODE_CLOSED,
                entity_id: parse_uuid(row.try_get("intent_id")?)?,
                detail: format!("intent is open but episode {episode} is closed"),
            });
        }
        Ok(())
    }

    /// Live appointments pointing at a slot row that does not exist. A
    /// cancelled or no-show appointment may legitimately outlive its slot:
    /// cancellation frees the slot, and a free slot can be deleted.
    async fn check_appointment_slots(&self, out: &mut Vec<Violation>) -> SchedResult<()> {
        let rows = sqlx::query(
            "SELECT a.id AS appointment_id, a.time_slot_id AS slot_id
             FROM appointments a
             LEFT JOIN available_time_slots s ON s.id = a.time_slot_id
             WHERE s.id IS NULL
               AND (a.appointment_status IS NULL OR a.appointment_status = 'completed')",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let slot: &str = row.try_get("slot_id")?;
            out.push(Violation {
                check: APPOINTMENT_NO_SLOT,
                entity_id: parse_uuid(row.try_get("appointment_id")?)?,
                detail: format!("references missing slot {slot}"),
            });
        }
        Ok(())
    }

    /// Slots carrying more than one live appointment. Cancelled and no-show
    /// appointments do not count against the slot.
    async fn check_double_booked_slots(&self, out: &mut Vec<Violation>) -> SchedResult<()> {
        let rows = sqlx::query(
            "SELECT a.time_slot_id AS slot_id, COUNT(*) AS live_count
             FROM appointments a
             WHERE a.appointment_status IS NULL OR a.appointment_status = 'completed'
             GROUP BY a.time_slot_id
             HAVING COUNT(*) > 1",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let count: i64 = row.try_get("live_count")?;
            out.push(Violation {
                check: SLOT_DOUBLE_BOOKED,
                entity_id: parse_uuid(row.try_get("slot_id")?)?,
                detail: format!("{count} live appointments on one slot"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use caresched_types::{AppointmentStatus, Pool};

    use crate::booking::{BookingService, StatusUpdate};
    use crate::flags::FeatureFlags;
    use crate::intents::{IntentService, NewIntent};
    use crate::slots::SlotService;
    use crate::test_support::{
        assistant_ctx, future, memory_pool, new_slot, open_test_episode, seed_catalog,
        surgeon_ctx, test_config,
    };

    async fn seed_booked_appointment(pool: &SqlitePool) -> (Uuid, Uuid) {
        let cfg = test_config();
        let intents = IntentService::new(pool.clone(), cfg);
        let slots = SlotService::new(pool.clone());
        let booking = BookingService::new(pool.clone(), FeatureFlags::new(pool.clone()));

        let episode = open_test_episode(pool).await;
        let intent = intents
            .create_intent(
                &surgeon_ctx(),
                NewIntent {
                    episode_id: episode.id,
                    step_code: "IMPRESSION".into(),
                    window_start: None,
                    window_end: None,
                    duration_minutes: 30,
                    pool: Pool::Work,
                    priority: 0,
                },
            )
            .await
            .unwrap();
        let slot = slots
            .create_slot(&assistant_ctx(), new_slot(Pool::Work, future(7), 30))
            .await
            .unwrap();
        let appointment = booking
            .match_and_book(&assistant_ctx(), intent.id, slot.id, false)
            .await
            .unwrap();

        (episode.id, appointment.id)
    }

    #[tokio::test]
    async fn clean_database_passes_all_checks() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        seed_booked_appointment(&pool).await;

        let report = IntegrityService::new(pool).run_checks().await.unwrap();
        assert!(report.ok(), "unexpected violations: {:?}", report.violations);
    }

    #[tokio::test]
    async fn cancelled_appointment_may_outlive_its_slot() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;

        let cfg = test_config();
        let intents = IntentService::new(pool.clone(), cfg);
        let slots = SlotService::new(pool.clone());
        let booking = BookingService::new(pool.clone(), FeatureFlags::new(pool.clone()));

        let episode = open_test_episode(&pool).await;
        let intent = intents
            .create_intent(
                &surgeon_ctx(),
                NewIntent {
                    episode_id: episode.id,
                    step_code: "IMPRESSION".into(),
                    window_start: None,
                    window_end: None,
                    duration_minutes: 30,
                    pool: Pool::Work,
                    priority: 0,
                },
            )
            .await
            .unwrap();
        let slot = slots
            .create_slot(&assistant_ctx(), new_slot(Pool::Work, future(7), 30))
            .await
            .unwrap();
        let appointment = booking
            .match_and_book(&assistant_ctx(), intent.id, slot.id, false)
            .await
            .unwrap();

        // The patient cancels, which returns the slot to the pool, and the
        // now-free slot is removed from the inventory.
        booking
            .update_status(
                &assistant_ctx(),
                appointment.id,
                StatusUpdate {
                    appointment_status: Some(AppointmentStatus::CancelledByPatient),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        slots.delete_slot(&assistant_ctx(), slot.id).await.unwrap();

        let report = IntegrityService::new(pool).run_checks().await.unwrap();
        assert!(report.ok(), "unexpected violations: {:?}", report.violations);
    }

    #[tokio::test]
    async fn detects_second_hard_appointment() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let (episode_id, _) = seed_booked_appointment(&pool).await;

        // Forge a second hard work appointment directly, bypassing the
        // booking path.
        sqlx::query(
            "INSERT INTO appointments
             (id, patient_id, time_slot_id, episode_id, slot_intent_id, start_time,
              duration_minutes, is_late, pool, requires_precommit, created_at)
             VALUES (?, ?, ?, ?, NULL, ?, 30, 0, 'work', 0, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Uuid::new_v4().to_string())
        .bind(Uuid::new_v4().to_string())
        .bind(episode_id.to_string())
        .bind(future(10))
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let report = IntegrityService::new(pool).run_checks().await.unwrap();
        assert!(report
            .violations
            .iter()
            .any(|v| v.check == ONE_HARD_NEXT_VIOLATION && v.entity_id == episode_id));
        // The forged row also points at a non-existent slot.
        assert!(report
            .violations
            .iter()
            .any(|v| v.check == APPOINTMENT_NO_SLOT));
    }

    #[tokio::test]
    async fn detects_orphaned_open_intent() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let episode = open_test_episode(&pool).await;

        sqlx::query(
            "INSERT INTO slot_intents
             (id, episode_id, step_code, duration_minutes, pool, state, priority, expires_at, created_at)
             VALUES (?, ?, 'IMPRESSION', 30, 'work', 'open', 0, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(episode.id.to_string())
        .bind(future(30))
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        // Close the episode around the service layer so the intent survives.
        sqlx::query("UPDATE patient_episodes SET status = 'closed' WHERE id = ?")
            .bind(episode.id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let report = IntegrityService::new(pool).run_checks().await.unwrap();
        assert!(report
            .violations
            .iter()
            .any(|v| v.check == INTENT_OPEN_EPISODE_CLOSED));
    }

    #[tokio::test]
    async fn detects_double_booked_slot() {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;

        let slots = SlotService::new(pool.clone());
        let slot = slots
            .create_slot(&assistant_ctx(), new_slot(Pool::Consult, future(5), 30))
            .await
            .unwrap();

        for _ in 0..2 {
            sqlx::query(
                "INSERT INTO appointments
                 (id, patient_id, time_slot_id, episode_id, slot_intent_id, start_time,
                  duration_minutes, is_late, pool, requires_precommit, created_at)
                 VALUES (?, ?, ?, NULL, NULL, ?, 30, 0, 'consult', 0, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(Uuid::new_v4().to_string())
            .bind(slot.id.to_string())
            .bind(future(5))
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        }

        let report = IntegrityService::new(pool).run_checks().await.unwrap();
        assert!(report
            .violations
            .iter()
            .any(|v| v.check == SLOT_DOUBLE_BOOKED && v.entity_id == slot.id));
    }
}
