//! Wire representations of the core domain types.
//!
//! Enumerations travel as their canonical lowercase strings so clients never
//! depend on Rust enum shapes; timestamps are RFC 3339.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use caresched_core::blocks::EpisodeBlock;
use caresched_core::booking::{Appointment, AppointmentStatusEvent};
use caresched_core::catalog::{Ruleset, StageCatalogEntry, TransitionRule};
use caresched_core::episodes::{Episode, StageEvent};
use caresched_core::forecast::{RemainingVisits, WeekBucket};
use caresched_core::integrity::{IntegrityReport, Violation};
use caresched_core::intents::SlotIntent;
use caresched_core::slots::Slot;

#[derive(Serialize, ToSchema)]
pub struct SlotRes {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub state: String,
    pub slot_purpose: String,
    pub location_site: Option<String>,
    pub location_room: Option<String>,
}

impl From<Slot> for SlotRes {
    fn from(s: Slot) -> Self {
        Self {
            id: s.id,
            provider_id: s.provider_id,
            start_time: s.start_time,
            duration_minutes: s.duration_minutes,
            state: s.state.to_string(),
            slot_purpose: s.slot_purpose.to_string(),
            location_site: s.location_site,
            location_room: s.location_room,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct EpisodeRes {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub reason: String,
    pub chief_complaint: String,
    pub trigger_type: Option<String>,
    pub status: String,
    pub stage_version: i64,
    pub suggested_next_code: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<Episode> for EpisodeRes {
    fn from(e: Episode) -> Self {
        Self {
            id: e.id,
            patient_id: e.patient_id,
            reason: e.reason.to_string(),
            chief_complaint: e.chief_complaint,
            trigger_type: e.trigger_type,
            status: e.status.to_string(),
            stage_version: e.stage_version,
            suggested_next_code: e.suggested_next_code,
            opened_at: e.opened_at,
            closed_at: e.closed_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct StageEventRes {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub stage_code: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
    pub created_by: Uuid,
}

impl From<StageEvent> for StageEventRes {
    fn from(e: StageEvent) -> Self {
        Self {
            id: e.id,
            episode_id: e.episode_id,
            stage_code: e.stage_code,
            at: e.at,
            note: e.note,
            created_by: e.created_by,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct IntentRes {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub step_code: String,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub pool: String,
    pub state: String,
    pub priority: i64,
    pub expires_at: DateTime<Utc>,
}

impl From<SlotIntent> for IntentRes {
    fn from(i: SlotIntent) -> Self {
        Self {
            id: i.id,
            episode_id: i.episode_id,
            step_code: i.step_code,
            window_start: i.window_start,
            window_end: i.window_end,
            duration_minutes: i.duration_minutes,
            pool: i.pool.to_string(),
            state: i.state.to_string(),
            priority: i.priority,
            expires_at: i.expires_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AppointmentRes {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub time_slot_id: Uuid,
    pub episode_id: Option<Uuid>,
    pub slot_intent_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub appointment_status: Option<String>,
    pub completion_notes: Option<String>,
    pub is_late: bool,
    pub appointment_type: Option<String>,
    pub pool: String,
    pub requires_precommit: bool,
}

impl From<Appointment> for AppointmentRes {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            patient_id: a.patient_id,
            time_slot_id: a.time_slot_id,
            episode_id: a.episode_id,
            slot_intent_id: a.slot_intent_id,
            start_time: a.start_time,
            duration_minutes: a.duration_minutes,
            appointment_status: a.appointment_status.map(|s| s.to_string()),
            completion_notes: a.completion_notes,
            is_late: a.is_late,
            appointment_type: a.appointment_type,
            pool: a.pool.to_string(),
            requires_precommit: a.requires_precommit,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct StatusEventRes {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub created_by: Uuid,
    pub at: DateTime<Utc>,
}

impl From<AppointmentStatusEvent> for StatusEventRes {
    fn from(e: AppointmentStatusEvent) -> Self {
        Self {
            id: e.id,
            appointment_id: e.appointment_id,
            old_status: e.old_status.map(|s| s.to_string()),
            new_status: e.new_status.map(|s| s.to_string()),
            created_by: e.created_by,
            at: e.at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct BlockRes {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub key: String,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub renewal_count: i64,
    pub expected_unblock_date: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl From<EpisodeBlock> for BlockRes {
    fn from(b: EpisodeBlock) -> Self {
        Self {
            id: b.id,
            episode_id: b.episode_id,
            key: b.key.to_string(),
            active: b.active,
            expires_at: b.expires_at,
            renewal_count: b.renewal_count,
            expected_unblock_date: b.expected_unblock_date,
            note: b.note,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CatalogEntryRes {
    pub code: String,
    pub reason: String,
    pub label_hu: String,
    pub order_index: i64,
    pub is_terminal: bool,
    pub default_duration_days: i64,
}

impl From<StageCatalogEntry> for CatalogEntryRes {
    fn from(e: StageCatalogEntry) -> Self {
        Self {
            code: e.code,
            reason: e.reason.to_string(),
            label_hu: e.label_hu,
            order_index: e.order_index,
            is_terminal: e.is_terminal,
            default_duration_days: e.default_duration_days,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TransitionRuleRes {
    pub from: Option<String>,
    pub to: String,
}

#[derive(Serialize, ToSchema)]
pub struct RulesetRes {
    pub id: Uuid,
    pub status: String,
    pub rules: Vec<TransitionRuleRes>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<Ruleset> for RulesetRes {
    fn from(r: Ruleset) -> Self {
        Self {
            id: r.id,
            status: r.status.to_string(),
            rules: r
                .rules
                .into_iter()
                .map(|TransitionRule { from, to }| TransitionRuleRes { from, to })
                .collect(),
            created_at: r.created_at,
            published_at: r.published_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ViolationRes {
    pub check: String,
    pub entity_id: Uuid,
    pub detail: String,
}

#[derive(Serialize, ToSchema)]
pub struct IntegrityRes {
    pub ok: bool,
    pub violations: Vec<ViolationRes>,
}

impl From<IntegrityReport> for IntegrityRes {
    fn from(r: IntegrityReport) -> Self {
        Self {
            ok: r.ok(),
            violations: r
                .violations
                .into_iter()
                .map(|Violation { check, entity_id, detail }| ViolationRes {
                    check: check.to_string(),
                    entity_id,
                    detail,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct WeekBucketRes {
    pub week_start: DateTime<Utc>,
    pub supply_minutes: i64,
    pub hard_demand_minutes: i64,
    pub soft_demand_minutes: i64,
}

impl From<WeekBucket> for WeekBucketRes {
    fn from(b: WeekBucket) -> Self {
        Self {
            week_start: b.week_start,
            supply_minutes: b.supply_minutes,
            hard_demand_minutes: b.hard_demand_minutes,
            soft_demand_minutes: b.soft_demand_minutes,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct RemainingVisitsRes {
    pub episode_id: Uuid,
    pub remaining_steps: i64,
    pub p50_visits: i64,
    pub p80_visits: i64,
    pub p50_completion: DateTime<Utc>,
    pub p80_completion: DateTime<Utc>,
}

impl From<RemainingVisits> for RemainingVisitsRes {
    fn from(r: RemainingVisits) -> Self {
        Self {
            episode_id: r.episode_id,
            remaining_steps: r.remaining_steps,
            p50_visits: r.p50_visits,
            p80_visits: r.p80_visits,
            p50_completion: r.p50_completion,
            p80_completion: r.p80_completion,
        }
    }
}
