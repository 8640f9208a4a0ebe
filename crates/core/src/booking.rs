//! Appointment/booking reconciler.
//!
//! Converts soft demand (an open intent) plus supply (a consumable slot)
//! into a hard booking, and owns every appointment status change thereafter.
//! Two invariants are enforced here rather than trusted to callers:
//!
//! - at most one active future non-precommit work appointment per open
//!   episode (one-hard-next), rejected with a named violation so clinical
//!   staff understand why the booking was refused;
//! - at most one live appointment per slot, guaranteed by a state-guarded
//!   UPDATE on the slot row inside the booking transaction, so concurrent
//!   attempts against the same slot serialise in the database and the losers
//!   fail instead of double-booking.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use api_shared::AuthContext;
use caresched_types::{
    AppointmentStatus, EpisodeStatus, IntentState, NonEmptyText, Pool, SlotState,
};

use crate::events::{
    self, emit_on, EVENT_APPOINTMENT_BOOKED, EVENT_APPOINTMENT_STATUS_CHANGED,
    EVENT_REPROJECT_INTENTS, ENTITY_APPOINTMENT, ENTITY_EPISODE,
};
use crate::flags::{FeatureFlags, FLAG_OVERBOOKING, FLAG_STRICT_ONE_HARD_NEXT};
use crate::rows::{parse_enum, parse_opt_enum, parse_opt_uuid, parse_uuid};
use crate::slots::can_consume_slot;
use crate::{SchedResult, SchedulingError};

/// A hard booking linking a patient, a slot, and (when scheduling-aware) an
/// episode and the intent it fulfilled. `appointment_status` of `None` means
/// pending/active.
#[derive(Clone, Debug)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub time_slot_id: Uuid,
    pub episode_id: Option<Uuid>,
    pub slot_intent_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub appointment_status: Option<AppointmentStatus>,
    pub completion_notes: Option<String>,
    pub is_late: bool,
    pub appointment_type: Option<String>,
    pub approval_status: Option<String>,
    pub pool: Pool,
    pub requires_precommit: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row for a status change.
#[derive(Clone, Debug)]
pub struct AppointmentStatusEvent {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub old_status: Option<AppointmentStatus>,
    pub new_status: Option<AppointmentStatus>,
    pub created_by: Uuid,
    pub at: DateTime<Utc>,
}

/// Partial update applied by `update_status`; only supplied fields change.
#[derive(Clone, Debug, Default)]
pub struct StatusUpdate {
    pub appointment_status: Option<AppointmentStatus>,
    pub completion_notes: Option<String>,
    pub is_late: Option<bool>,
    pub appointment_type: Option<String>,
}

pub(crate) fn appointment_from_row(row: &SqliteRow) -> SchedResult<Appointment> {
    Ok(Appointment {
        id: parse_uuid(row.try_get("id")?)?,
        patient_id: parse_uuid(row.try_get("patient_id")?)?,
        time_slot_id: parse_uuid(row.try_get("time_slot_id")?)?,
        episode_id: parse_opt_uuid(row.try_get("episode_id")?)?,
        slot_intent_id: parse_opt_uuid(row.try_get("slot_intent_id")?)?,
        start_time: row.try_get("start_time")?,
        duration_minutes: row.try_get("duration_minutes")?,
        appointment_status: parse_opt_enum(row.try_get("appointment_status")?)?,
        completion_notes: row.try_get("completion_notes")?,
        is_late: row.try_get("is_late")?,
        appointment_type: row.try_get("appointment_type")?,
        approval_status: row.try_get("approval_status")?,
        pool: parse_enum(row.try_get("pool")?)?,
        requires_precommit: row.try_get("requires_precommit")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) const APPOINTMENT_COLUMNS: &str =
    "id, patient_id, time_slot_id, episode_id, slot_intent_id, start_time, duration_minutes, \
     appointment_status, completion_notes, is_late, appointment_type, approval_status, pool, \
     requires_precommit, created_at";

/// Service converting intents into bookings and applying status changes.
#[derive(Clone)]
pub struct BookingService {
    pool: SqlitePool,
    flags: FeatureFlags,
}

impl BookingService {
    pub fn new(pool: SqlitePool, flags: FeatureFlags) -> Self {
        Self { pool, flags }
    }

    /// Books an open intent into a consumable slot.
    ///
    /// Flags are read through the eventually-consistent cache before the
    /// transaction; the slot-state compare-and-swap inside the transaction
    /// is what makes concurrent attempts safe, not the pre-checks.
    pub async fn match_and_book(
        &self,
        ctx: &AuthContext,
        intent_id: Uuid,
        slot_id: Uuid,
        requires_precommit: bool,
    ) -> SchedResult<Appointment> {
        if !ctx.can_manage_scheduling() {
            return Err(SchedulingError::Forbidden {
                action: "book appointments",
            });
        }

        let overbooking = self.flags.get(FLAG_OVERBOOKING).await?;
        let strict_one_hard_next = self.flags.get(FLAG_STRICT_ONE_HARD_NEXT).await?;

        let mut tx = self.pool.begin().await?;

        let intent_row = sqlx::query(&format!(
            "SELECT {} FROM slot_intents WHERE id = ?",
            crate::intents::INTENT_COLUMNS
        ))
        .bind(intent_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "slot intent",
            id: intent_id,
        })?;
        let intent = crate::intents::intent_from_row(&intent_row)?;

        if intent.state != IntentState::Open {
            return Err(SchedulingError::InvalidState(format!(
                "intent {intent_id} is {}; only open intents can be booked",
                intent.state
            )));
        }

        let episode_row = sqlx::query("SELECT patient_id, status FROM patient_episodes WHERE id = ?")
            .bind(intent.episode_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(SchedulingError::NotFound {
                entity: "episode",
                id: intent.episode_id,
            })?;
        let patient_id = parse_uuid(episode_row.try_get("patient_id")?)?;
        let episode_status: EpisodeStatus = parse_enum(episode_row.try_get("status")?)?;
        if episode_status != EpisodeStatus::Open {
            return Err(SchedulingError::InvalidState(format!(
                "episode {} is closed; its intents cannot be booked",
                intent.episode_id
            )));
        }

        let slot_row = sqlx::query(
            "SELECT start_time, duration_minutes, state, slot_purpose
             FROM available_time_slots WHERE id = ?",
        )
        .bind(slot_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "slot",
            id: slot_id,
        })?;
        let slot_start: DateTime<Utc> = slot_row.try_get("start_time")?;
        let slot_duration: i64 = slot_row.try_get("duration_minutes")?;
        let slot_state: SlotState = parse_enum(slot_row.try_get("state")?)?;
        let slot_purpose: Pool = parse_enum(slot_row.try_get("slot_purpose")?)?;

        if !can_consume_slot(slot_state, overbooking) {
            return Err(SchedulingError::InvalidState(format!(
                "slot {slot_id} is {slot_state} and cannot be booked"
            )));
        }
        if slot_purpose != intent.pool {
            return Err(SchedulingError::Validation(format!(
                "slot pool {slot_purpose} does not match intent pool {}",
                intent.pool
            )));
        }
        if slot_duration < intent.duration_minutes {
            return Err(SchedulingError::Validation(format!(
                "slot provides {slot_duration} minutes, intent needs {}",
                intent.duration_minutes
            )));
        }

        if intent.pool == Pool::Work && !requires_precommit && strict_one_hard_next {
            let existing: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM appointments a
                 JOIN patient_episodes e ON e.id = a.episode_id
                 WHERE a.episode_id = ?
                   AND a.pool = 'work'
                   AND a.requires_precommit = 0
                   AND a.start_time > ?
                   AND (a.appointment_status IS NULL OR a.appointment_status = 'completed')
                   AND e.status = 'open'",
            )
            .bind(intent.episode_id.to_string())
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

            if existing > 0 {
                return Err(SchedulingError::OneHardNext {
                    episode_id: intent.episode_id,
                });
            }
        }

        // The serialisation point: only one booking can flip the slot out of
        // a consumable state.
        claim_slot(&mut tx, slot_id, overbooking).await?;

        let converted = sqlx::query("UPDATE slot_intents SET state = ? WHERE id = ? AND state = ?")
            .bind(IntentState::Converted.as_str())
            .bind(intent_id.to_string())
            .bind(IntentState::Open.as_str())
            .execute(&mut *tx)
            .await?;
        if converted.rows_affected() == 0 {
            return Err(SchedulingError::Conflict(format!(
                "intent {intent_id} was converted concurrently"
            )));
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            time_slot_id: slot_id,
            episode_id: Some(intent.episode_id),
            slot_intent_id: Some(intent_id),
            start_time: slot_start,
            duration_minutes: intent.duration_minutes,
            appointment_status: None,
            completion_notes: None,
            is_late: false,
            appointment_type: None,
            approval_status: None,
            pool: intent.pool,
            requires_precommit,
            created_at: now,
        };

        insert_appointment(&mut tx, &appointment).await?;
        insert_status_event(&mut tx, appointment.id, None, None, ctx.user_id, now).await?;

        tx.commit().await?;

        events::emit_best_effort(
            &self.pool,
            ENTITY_APPOINTMENT,
            appointment.id,
            EVENT_APPOINTMENT_BOOKED,
        )
        .await;

        tracing::info!(
            appointment_id = %appointment.id,
            episode_id = %intent.episode_id,
            slot_id = %slot_id,
            "intent matched and booked"
        );

        Ok(appointment)
    }

    /// Books a patient into a slot directly, without an intent. Kept for
    /// legacy front-desk bookings; such appointments carry no episode link
    /// and never participate in the one-hard-next check.
    pub async fn book_manual(
        &self,
        ctx: &AuthContext,
        patient_id: Uuid,
        slot_id: Uuid,
        appointment_type: Option<String>,
    ) -> SchedResult<Appointment> {
        if !ctx.can_manage_scheduling() {
            return Err(SchedulingError::Forbidden {
                action: "book appointments",
            });
        }

        let overbooking = self.flags.get(FLAG_OVERBOOKING).await?;
        let mut tx = self.pool.begin().await?;

        let slot_row = sqlx::query(
            "SELECT start_time, duration_minutes, state, slot_purpose
             FROM available_time_slots WHERE id = ?",
        )
        .bind(slot_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "slot",
            id: slot_id,
        })?;
        let slot_state: SlotState = parse_enum(slot_row.try_get("state")?)?;
        if !can_consume_slot(slot_state, overbooking) {
            return Err(SchedulingError::InvalidState(format!(
                "slot {slot_id} is {slot_state} and cannot be booked"
            )));
        }

        claim_slot(&mut tx, slot_id, overbooking).await?;

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            time_slot_id: slot_id,
            episode_id: None,
            slot_intent_id: None,
            start_time: slot_row.try_get("start_time")?,
            duration_minutes: slot_row.try_get("duration_minutes")?,
            appointment_status: None,
            completion_notes: None,
            is_late: false,
            appointment_type,
            approval_status: None,
            pool: parse_enum(slot_row.try_get("slot_purpose")?)?,
            requires_precommit: false,
            created_at: now,
        };

        insert_appointment(&mut tx, &appointment).await?;
        insert_status_event(&mut tx, appointment.id, None, None, ctx.user_id, now).await?;
        tx.commit().await?;

        events::emit_best_effort(
            &self.pool,
            ENTITY_APPOINTMENT,
            appointment.id,
            EVENT_APPOINTMENT_BOOKED,
        )
        .await;

        Ok(appointment)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> SchedResult<Appointment> {
        let row = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(appointment_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "appointment",
            id: appointment_id,
        })?;

        appointment_from_row(&row)
    }

    /// Applies a partial status update to an appointment.
    ///
    /// The whole read-then-write sequence runs in one transaction: the
    /// appointment is re-read inside it, dependent rows (intents, the slot,
    /// the reprojection signal) are mutated with it, and the audit row is
    /// written before commit. A status, once set, is final.
    pub async fn update_status(
        &self,
        ctx: &AuthContext,
        appointment_id: Uuid,
        update: StatusUpdate,
    ) -> SchedResult<Appointment> {
        if !ctx.can_manage_scheduling() {
            return Err(SchedulingError::Forbidden {
                action: "update appointments",
            });
        }

        if update.appointment_status == Some(AppointmentStatus::Completed) {
            // Completion must say what happened.
            NonEmptyText::new(update.completion_notes.as_deref().unwrap_or(""))?;
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(appointment_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "appointment",
            id: appointment_id,
        })?;
        let existing = appointment_from_row(&row)?;

        if let Some(new_status) = update.appointment_status {
            if let Some(current) = existing.appointment_status {
                return Err(SchedulingError::InvalidState(format!(
                    "appointment {appointment_id} is already {current}; status changes are one-way"
                )));
            }

            let now = Utc::now();
            insert_status_event(
                &mut tx,
                appointment_id,
                existing.appointment_status,
                Some(new_status),
                ctx.user_id,
                now,
            )
            .await?;

            if new_status.releases_booking() {
                // Roll the conversion back: the demand is dropped, not
                // reopened. Fresh demand needs a fresh intent.
                if let Some(episode_id) = existing.episode_id {
                    sqlx::query(
                        "UPDATE slot_intents SET state = ? WHERE episode_id = ? AND state = ?",
                    )
                    .bind(IntentState::Expired.as_str())
                    .bind(episode_id.to_string())
                    .bind(IntentState::Converted.as_str())
                    .execute(&mut *tx)
                    .await?;

                    emit_on(&mut *tx, ENTITY_EPISODE, episode_id, EVENT_REPROJECT_INTENTS).await?;
                }

                // A cancelled visit returns its slot to the pool; a no-show
                // does not, the time has already passed unused.
                if matches!(
                    new_status,
                    AppointmentStatus::CancelledByDoctor | AppointmentStatus::CancelledByPatient
                ) {
                    sqlx::query(
                        "UPDATE available_time_slots SET state = ? WHERE id = ? AND state = ?",
                    )
                    .bind(SlotState::Free.as_str())
                    .bind(existing.time_slot_id.to_string())
                    .bind(SlotState::Booked.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        sqlx::query(
            "UPDATE appointments SET
                 appointment_status = COALESCE(?, appointment_status),
                 completion_notes = COALESCE(?, completion_notes),
                 is_late = COALESCE(?, is_late),
                 appointment_type = COALESCE(?, appointment_type)
             WHERE id = ?",
        )
        .bind(update.appointment_status.map(|s| s.as_str()))
        .bind(&update.completion_notes)
        .bind(update.is_late)
        .bind(&update.appointment_type)
        .bind(appointment_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some(new_status) = update.appointment_status {
            events::emit_best_effort(
                &self.pool,
                ENTITY_APPOINTMENT,
                appointment_id,
                EVENT_APPOINTMENT_STATUS_CHANGED,
            )
            .await;
            tracing::info!(%appointment_id, status = %new_status, "appointment status changed");
        }

        self.get_appointment(appointment_id).await
    }

    /// Status audit trail for an appointment, oldest first.
    pub async fn status_events(
        &self,
        appointment_id: Uuid,
    ) -> SchedResult<Vec<AppointmentStatusEvent>> {
        let rows = sqlx::query(
            "SELECT id, appointment_id, old_status, new_status, created_by, at
             FROM appointment_status_events
             WHERE appointment_id = ?
             ORDER BY at, id",
        )
        .bind(appointment_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AppointmentStatusEvent {
                    id: parse_uuid(row.try_get("id")?)?,
                    appointment_id: parse_uuid(row.try_get("appointment_id")?)?,
                    old_status: parse_opt_enum(row.try_get("old_status")?)?,
                    new_status: parse_opt_enum(row.try_get("new_status")?)?,
                    created_by: parse_uuid(row.try_get("created_by")?)?,
                    at: row.try_get("at")?,
                })
            })
            .collect()
    }
}

/// Flips the slot to `booked` if and only if it is still in a state
/// `can_consume_slot` accepts. Zero rows updated means a concurrent booking
/// got there first (or the slot left the consumable set since the pre-check).
async fn claim_slot(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    slot_id: Uuid,
    overbooking: bool,
) -> SchedResult<()> {
    let consumable: Vec<String> = [
        SlotState::Free,
        SlotState::Held,
        SlotState::Booked,
        SlotState::Cancelled,
    ]
    .into_iter()
    .filter(|s| can_consume_slot(*s, overbooking))
    .map(|s| format!("'{}'", s.as_str()))
    .collect();

    let claimed = sqlx::query(&format!(
        "UPDATE available_time_slots SET state = ? WHERE id = ? AND state IN ({})",
        consumable.join(", ")
    ))
    .bind(SlotState::Booked.as_str())
    .bind(slot_id.to_string())
    .execute(&mut **tx)
    .await?;
    if claimed.rows_affected() == 0 {
        return Err(SchedulingError::Conflict(format!(
            "slot {slot_id} was booked concurrently"
        )));
    }

    Ok(())
}

async fn insert_appointment(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    a: &Appointment,
) -> SchedResult<()> {
    sqlx::query(
        "INSERT INTO appointments
         (id, patient_id, time_slot_id, episode_id, slot_intent_id, start_time, duration_minutes,
          appointment_status, completion_notes, is_late, appointment_type, approval_status, pool,
          requires_precommit, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, NULL, ?, ?, ?)",
    )
    .bind(a.id.to_string())
    .bind(a.patient_id.to_string())
    .bind(a.time_slot_id.to_string())
    .bind(a.episode_id.map(|id| id.to_string()))
    .bind(a.slot_intent_id.map(|id| id.to_string()))
    .bind(a.start_time)
    .bind(a.duration_minutes)
    .bind(a.is_late)
    .bind(&a.appointment_type)
    .bind(a.pool.as_str())
    .bind(a.requires_precommit)
    .bind(a.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_status_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    appointment_id: Uuid,
    old_status: Option<AppointmentStatus>,
    new_status: Option<AppointmentStatus>,
    created_by: Uuid,
    at: DateTime<Utc>,
) -> SchedResult<()> {
    sqlx::query(
        "INSERT INTO appointment_status_events (id, appointment_id, old_status, new_status, created_by, at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(appointment_id.to_string())
    .bind(old_status.map(|s| s.as_str()))
    .bind(new_status.map(|s| s.as_str()))
    .bind(created_by.to_string())
    .bind(at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::events_for_entity;
    use crate::intents::{IntentService, NewIntent};
    use crate::slots::SlotService;
    use crate::test_support::{
        admin_ctx, assistant_ctx, future, memory_pool, new_slot, open_test_episode, seed_catalog,
        surgeon_ctx, test_config,
    };

    struct Fixture {
        pool: SqlitePool,
        booking: BookingService,
        intents: IntentService,
        slots: SlotService,
    }

    async fn fixture() -> Fixture {
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let cfg = test_config();
        let flags = FeatureFlags::new(pool.clone());
        Fixture {
            booking: BookingService::new(pool.clone(), flags),
            intents: IntentService::new(pool.clone(), cfg),
            slots: SlotService::new(pool.clone()),
            pool,
        }
    }

    fn intent_input(episode_id: Uuid, pool: Pool, minutes: i64) -> NewIntent {
        NewIntent {
            episode_id,
            step_code: "IMPRESSION".into(),
            window_start: None,
            window_end: None,
            duration_minutes: minutes,
            pool,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn scenario_match_and_book_then_one_hard_next() {
        let f = fixture().await;
        let episode = open_test_episode(&f.pool).await;
        let clinician = surgeon_ctx();
        let desk = assistant_ctx();

        let intent = f
            .intents
            .create_intent(&clinician, intent_input(episode.id, Pool::Work, 30))
            .await
            .unwrap();
        let slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Work, future(7), 60))
            .await
            .unwrap();

        let appointment = f
            .booking
            .match_and_book(&desk, intent.id, slot.id, false)
            .await
            .unwrap();
        assert_eq!(appointment.pool, Pool::Work);
        assert_eq!(appointment.episode_id, Some(episode.id));

        assert_eq!(
            f.slots.get_slot(slot.id).await.unwrap().state,
            SlotState::Booked
        );
        assert_eq!(
            f.intents.get_intent(intent.id).await.unwrap().state,
            IntentState::Converted
        );

        // A second hard work booking for the same episode violates
        // one-hard-next.
        let intent2 = f
            .intents
            .create_intent(&clinician, intent_input(episode.id, Pool::Work, 30))
            .await
            .unwrap();
        let slot2 = f
            .slots
            .create_slot(&desk, new_slot(Pool::Work, future(14), 60))
            .await
            .unwrap();

        let err = f
            .booking
            .match_and_book(&desk, intent2.id, slot2.id, false)
            .await
            .unwrap_err();
        assert_eq!(err.detail_code(), Some("ONE_HARD_NEXT_VIOLATION"));
        assert_eq!(err.code(), "VALIDATION");

        // Precommit bookings are exempt from the invariant.
        f.booking
            .match_and_book(&desk, intent2.id, slot2.id, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn relaxed_flag_disables_one_hard_next() {
        let f = fixture().await;
        let episode = open_test_episode(&f.pool).await;
        let clinician = surgeon_ctx();
        let desk = assistant_ctx();

        let flags = FeatureFlags::new(f.pool.clone());
        flags
            .set(&admin_ctx(), FLAG_STRICT_ONE_HARD_NEXT, false)
            .await
            .unwrap();

        for _ in 0..2 {
            let intent = f
                .intents
                .create_intent(&clinician, intent_input(episode.id, Pool::Work, 30))
                .await
                .unwrap();
            let slot = f
                .slots
                .create_slot(&desk, new_slot(Pool::Work, future(7), 60))
                .await
                .unwrap();
            f.booking
                .match_and_book(&desk, intent.id, slot.id, false)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn pool_and_duration_mismatches_are_rejected() {
        let f = fixture().await;
        let episode = open_test_episode(&f.pool).await;
        let clinician = surgeon_ctx();
        let desk = assistant_ctx();

        let intent = f
            .intents
            .create_intent(&clinician, intent_input(episode.id, Pool::Work, 45))
            .await
            .unwrap();

        let consult_slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Consult, future(7), 60))
            .await
            .unwrap();
        let err = f
            .booking
            .match_and_book(&desk, intent.id, consult_slot.id, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let short_slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Work, future(7), 30))
            .await
            .unwrap();
        let err = f
            .booking
            .match_and_book(&desk, intent.id, short_slot.id, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[tokio::test]
    async fn concurrent_bookings_one_slot_one_winner() {
        let f = fixture().await;
        let desk = assistant_ctx();
        let clinician = surgeon_ctx();

        let slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Consult, future(7), 30))
            .await
            .unwrap();

        // Four episodes racing for the same consult slot.
        let mut handles = Vec::new();
        for _ in 0..4 {
            let episode = open_test_episode(&f.pool).await;
            let intent = f
                .intents
                .create_intent(&clinician, intent_input(episode.id, Pool::Consult, 30))
                .await
                .unwrap();
            let booking = f.booking.clone();
            let desk = desk.clone();
            let slot_id = slot.id;
            handles.push(tokio::spawn(async move {
                booking.match_and_book(&desk, intent.id, slot_id, false).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM appointments WHERE time_slot_id = ?
             AND (appointment_status IS NULL OR appointment_status = 'completed')",
        )
        .bind(slot.id.to_string())
        .fetch_one(&f.pool)
        .await
        .unwrap();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn scenario_completion_requires_notes() {
        let f = fixture().await;
        let episode = open_test_episode(&f.pool).await;
        let clinician = surgeon_ctx();
        let desk = assistant_ctx();

        let intent = f
            .intents
            .create_intent(&clinician, intent_input(episode.id, Pool::Work, 30))
            .await
            .unwrap();
        let slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Work, future(7), 30))
            .await
            .unwrap();
        let appointment = f
            .booking
            .match_and_book(&desk, intent.id, slot.id, false)
            .await
            .unwrap();

        let err = f
            .booking
            .update_status(
                &desk,
                appointment.id,
                StatusUpdate {
                    appointment_status: Some(AppointmentStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let updated = f
            .booking
            .update_status(
                &desk,
                appointment.id,
                StatusUpdate {
                    appointment_status: Some(AppointmentStatus::Completed),
                    completion_notes: Some("obturator fitted, occlusion adjusted".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            updated.appointment_status,
            Some(AppointmentStatus::Completed)
        );

        let trail = f.booking.status_events(appointment.id).await.unwrap();
        // Creation row plus the completion row.
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].old_status, None);
        assert_eq!(trail[1].new_status, Some(AppointmentStatus::Completed));
    }

    #[tokio::test]
    async fn scenario_cancellation_rolls_back_intent_and_reprojects() {
        let f = fixture().await;
        let episode = open_test_episode(&f.pool).await;
        let clinician = surgeon_ctx();
        let desk = assistant_ctx();

        let intent = f
            .intents
            .create_intent(&clinician, intent_input(episode.id, Pool::Work, 30))
            .await
            .unwrap();
        let slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Work, future(7), 30))
            .await
            .unwrap();
        let appointment = f
            .booking
            .match_and_book(&desk, intent.id, slot.id, false)
            .await
            .unwrap();

        f.booking
            .update_status(
                &desk,
                appointment.id,
                StatusUpdate {
                    appointment_status: Some(AppointmentStatus::CancelledByPatient),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Converted intent rolled back to expired, never to open.
        assert_eq!(
            f.intents.get_intent(intent.id).await.unwrap().state,
            IntentState::Expired
        );

        // Reprojection signal written for the episode.
        let signals = events_for_entity(&f.pool, ENTITY_EPISODE, episode.id)
            .await
            .unwrap();
        assert!(signals
            .iter()
            .any(|e| e.event_type == EVENT_REPROJECT_INTENTS));

        // Cancellation returns the slot to the pool.
        assert_eq!(
            f.slots.get_slot(slot.id).await.unwrap().state,
            SlotState::Free
        );
    }

    #[tokio::test]
    async fn status_is_one_way_once_set() {
        let f = fixture().await;
        let episode = open_test_episode(&f.pool).await;
        let clinician = surgeon_ctx();
        let desk = assistant_ctx();

        let intent = f
            .intents
            .create_intent(&clinician, intent_input(episode.id, Pool::Control, 20))
            .await
            .unwrap();
        let slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Control, future(3), 20))
            .await
            .unwrap();
        let appointment = f
            .booking
            .match_and_book(&desk, intent.id, slot.id, false)
            .await
            .unwrap();

        f.booking
            .update_status(
                &desk,
                appointment.id,
                StatusUpdate {
                    appointment_status: Some(AppointmentStatus::NoShow),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = f
            .booking
            .update_status(
                &desk,
                appointment.id,
                StatusUpdate {
                    appointment_status: Some(AppointmentStatus::Completed),
                    completion_notes: Some("late arrival".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        // No-show does not free the slot; the time passed unused.
        assert_eq!(
            f.slots.get_slot(slot.id).await.unwrap().state,
            SlotState::Booked
        );
    }

    #[tokio::test]
    async fn claim_rejects_non_consumable_states() {
        let f = fixture().await;
        let desk = assistant_ctx();

        let slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Consult, future(4), 30))
            .await
            .unwrap();

        // Cancelled slots are never consumable, overbooking or not.
        sqlx::query("UPDATE available_time_slots SET state = 'cancelled' WHERE id = ?")
            .bind(slot.id.to_string())
            .execute(&f.pool)
            .await
            .unwrap();
        let mut tx = f.pool.begin().await.unwrap();
        let err = claim_slot(&mut tx, slot.id, true).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        tx.rollback().await.unwrap();

        // Held slots are consumable only under the overbooking flag.
        sqlx::query("UPDATE available_time_slots SET state = 'held' WHERE id = ?")
            .bind(slot.id.to_string())
            .execute(&f.pool)
            .await
            .unwrap();
        let mut tx = f.pool.begin().await.unwrap();
        assert!(claim_slot(&mut tx, slot.id, false).await.is_err());
        tx.rollback().await.unwrap();

        let mut tx = f.pool.begin().await.unwrap();
        claim_slot(&mut tx, slot.id, true).await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn manual_booking_claims_the_slot() {
        let f = fixture().await;
        let desk = assistant_ctx();

        let slot = f
            .slots
            .create_slot(&desk, new_slot(Pool::Consult, future(4), 30))
            .await
            .unwrap();
        let appointment = f
            .booking
            .book_manual(&desk, Uuid::new_v4(), slot.id, Some("first_visit".into()))
            .await
            .unwrap();
        assert!(appointment.episode_id.is_none());
        assert_eq!(
            f.slots.get_slot(slot.id).await.unwrap().state,
            SlotState::Booked
        );

        let err = f
            .booking
            .book_manual(&desk, Uuid::new_v4(), slot.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }
}
