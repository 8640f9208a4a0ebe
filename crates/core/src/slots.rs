//! Slot inventory: bookable units of provider time.
//!
//! A slot moves free -> held -> booked through the booking flows and back to
//! free (or to cancelled) when a booking is released. Whether a slot can be
//! turned into a booking is a pure function of its state and the overbooking
//! flag; the booking transaction re-checks it with a state-guarded UPDATE so
//! concurrent attempts against the same slot serialise in the database.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use api_shared::AuthContext;
use caresched_types::{Pool, SlotState};

use crate::rows::{parse_enum, parse_uuid};
use crate::{SchedResult, SchedulingError};

/// A bookable unit of provider time.
#[derive(Clone, Debug)]
pub struct Slot {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub state: SlotState,
    pub slot_purpose: Pool,
    pub location_site: Option<String>,
    pub location_room: Option<String>,
}

/// Input for creating a slot.
#[derive(Clone, Debug)]
pub struct NewSlot {
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub slot_purpose: Pool,
    pub location_site: Option<String>,
    pub location_room: Option<String>,
}

/// True only for states eligible to be turned into a booking. Overbooking,
/// when enabled, additionally admits held slots; booked and cancelled are
/// never consumable.
pub fn can_consume_slot(state: SlotState, overbooking_enabled: bool) -> bool {
    match state {
        SlotState::Free => true,
        SlotState::Held => overbooking_enabled,
        SlotState::Booked | SlotState::Cancelled => false,
    }
}

pub(crate) fn slot_from_row(row: &SqliteRow) -> SchedResult<Slot> {
    Ok(Slot {
        id: parse_uuid(row.try_get("id")?)?,
        provider_id: parse_uuid(row.try_get("provider_id")?)?,
        start_time: row.try_get("start_time")?,
        duration_minutes: row.try_get("duration_minutes")?,
        state: parse_enum(row.try_get("state")?)?,
        slot_purpose: parse_enum(row.try_get("slot_purpose")?)?,
        location_site: row.try_get("location_site")?,
        location_room: row.try_get("location_room")?,
    })
}

const SLOT_COLUMNS: &str = "id, provider_id, start_time, duration_minutes, state, slot_purpose, \
                            location_site, location_room";

/// Service for slot inventory operations.
#[derive(Clone)]
pub struct SlotService {
    pool: SqlitePool,
}

impl SlotService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_slot(&self, ctx: &AuthContext, new: NewSlot) -> SchedResult<Slot> {
        if !ctx.can_manage_scheduling() {
            return Err(SchedulingError::Forbidden {
                action: "create slots",
            });
        }
        if new.duration_minutes <= 0 {
            return Err(SchedulingError::Validation(
                "slot duration must be positive".into(),
            ));
        }

        let slot = Slot {
            id: Uuid::new_v4(),
            provider_id: new.provider_id,
            start_time: new.start_time,
            duration_minutes: new.duration_minutes,
            state: SlotState::Free,
            slot_purpose: new.slot_purpose,
            location_site: new.location_site,
            location_room: new.location_room,
        };

        sqlx::query(
            "INSERT INTO available_time_slots
             (id, provider_id, start_time, duration_minutes, state, slot_purpose, location_site, location_room)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(slot.id.to_string())
        .bind(slot.provider_id.to_string())
        .bind(slot.start_time)
        .bind(slot.duration_minutes)
        .bind(slot.state.as_str())
        .bind(slot.slot_purpose.as_str())
        .bind(&slot.location_site)
        .bind(&slot.location_room)
        .execute(&self.pool)
        .await?;

        Ok(slot)
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> SchedResult<Slot> {
        let row = sqlx::query(&format!(
            "SELECT {SLOT_COLUMNS} FROM available_time_slots WHERE id = ?"
        ))
        .bind(slot_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "slot",
            id: slot_id,
        })?;

        slot_from_row(&row)
    }

    /// Slots of a pool, optionally restricted to a single state, ordered by
    /// start time.
    pub async fn list_slots(
        &self,
        purpose: Option<Pool>,
        state: Option<SlotState>,
    ) -> SchedResult<Vec<Slot>> {
        let rows = sqlx::query(&format!(
            "SELECT {SLOT_COLUMNS} FROM available_time_slots
             WHERE (?1 IS NULL OR slot_purpose = ?1)
               AND (?2 IS NULL OR state = ?2)
             ORDER BY start_time"
        ))
        .bind(purpose.map(|p| p.as_str()))
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(slot_from_row).collect()
    }

    /// Moves a slot's start time. The new time must be strictly in the
    /// future; slots cannot be rescheduled into the past.
    pub async fn update_start_time(
        &self,
        ctx: &AuthContext,
        slot_id: Uuid,
        new_start: DateTime<Utc>,
    ) -> SchedResult<Slot> {
        if !ctx.can_manage_scheduling() {
            return Err(SchedulingError::Forbidden {
                action: "reschedule slots",
            });
        }
        if new_start <= Utc::now() {
            return Err(SchedulingError::Validation(
                "slot start time must be strictly in the future".into(),
            ));
        }

        let updated = sqlx::query(
            "UPDATE available_time_slots SET start_time = ? WHERE id = ?",
        )
        .bind(new_start)
        .bind(slot_id.to_string())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(SchedulingError::NotFound {
                entity: "slot",
                id: slot_id,
            });
        }

        self.get_slot(slot_id).await
    }

    /// Deletes a slot. Booked slots cannot be deleted; the booking must be
    /// released first.
    pub async fn delete_slot(&self, ctx: &AuthContext, slot_id: Uuid) -> SchedResult<()> {
        if !ctx.can_manage_scheduling() {
            return Err(SchedulingError::Forbidden {
                action: "delete slots",
            });
        }

        let slot = self.get_slot(slot_id).await?;
        if slot.state == SlotState::Booked {
            return Err(SchedulingError::InvalidState(
                "cannot delete a booked slot".into(),
            ));
        }

        sqlx::query("DELETE FROM available_time_slots WHERE id = ?")
            .bind(slot_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Places an administrative hold on a free slot.
    pub async fn hold_slot(&self, ctx: &AuthContext, slot_id: Uuid) -> SchedResult<Slot> {
        if !ctx.can_manage_scheduling() {
            return Err(SchedulingError::Forbidden {
                action: "hold slots",
            });
        }

        let updated = sqlx::query(
            "UPDATE available_time_slots SET state = ? WHERE id = ? AND state = ?",
        )
        .bind(SlotState::Held.as_str())
        .bind(slot_id.to_string())
        .bind(SlotState::Free.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let slot = self.get_slot(slot_id).await?;
            return Err(SchedulingError::InvalidState(format!(
                "cannot hold a slot in state {}",
                slot.state
            )));
        }

        self.get_slot(slot_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assistant_ctx, future, memory_pool, new_slot};

    #[test]
    fn consumability_table() {
        assert!(can_consume_slot(SlotState::Free, false));
        assert!(!can_consume_slot(SlotState::Held, false));
        assert!(can_consume_slot(SlotState::Held, true));
        assert!(!can_consume_slot(SlotState::Booked, true));
        assert!(!can_consume_slot(SlotState::Cancelled, true));
    }

    #[tokio::test]
    async fn create_and_fetch_slot() {
        let pool = memory_pool().await;
        let slots = SlotService::new(pool);
        let ctx = assistant_ctx();

        let created = slots
            .create_slot(&ctx, new_slot(Pool::Work, future(7), 60))
            .await
            .unwrap();
        let fetched = slots.get_slot(created.id).await.unwrap();
        assert_eq!(fetched.state, SlotState::Free);
        assert_eq!(fetched.duration_minutes, 60);
        assert_eq!(fetched.slot_purpose, Pool::Work);
    }

    #[tokio::test]
    async fn start_time_must_move_into_the_future() {
        let pool = memory_pool().await;
        let slots = SlotService::new(pool);
        let ctx = assistant_ctx();

        let slot = slots
            .create_slot(&ctx, new_slot(Pool::Consult, future(3), 30))
            .await
            .unwrap();

        let err = slots
            .update_start_time(&ctx, slot.id, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let moved = slots
            .update_start_time(&ctx, slot.id, future(10))
            .await
            .unwrap();
        assert!(moved.start_time > Utc::now());
    }

    #[tokio::test]
    async fn booked_slots_cannot_be_deleted() {
        let pool = memory_pool().await;
        let slots = SlotService::new(pool.clone());
        let ctx = assistant_ctx();

        let slot = slots
            .create_slot(&ctx, new_slot(Pool::Work, future(5), 45))
            .await
            .unwrap();

        sqlx::query("UPDATE available_time_slots SET state = 'booked' WHERE id = ?")
            .bind(slot.id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let err = slots.delete_slot(&ctx, slot.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn hold_requires_a_free_slot() {
        let pool = memory_pool().await;
        let slots = SlotService::new(pool);
        let ctx = assistant_ctx();

        let slot = slots
            .create_slot(&ctx, new_slot(Pool::Control, future(2), 20))
            .await
            .unwrap();
        let held = slots.hold_slot(&ctx, slot.id).await.unwrap();
        assert_eq!(held.state, SlotState::Held);

        let err = slots.hold_slot(&ctx, slot.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }
}
