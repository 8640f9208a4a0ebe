//! Capacity forecasting: supply and demand in weekly buckets, plus a
//! remaining-visit estimate per episode.
//!
//! All figures are minutes, aggregated over Monday-started weeks. Supply is
//! free slot time; hard demand is live booked appointments; soft demand is
//! open intents that have not been matched yet. The numbers are planning
//! aids, not commitments, so estimates round up.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use caresched_types::Pool;

use crate::config::CoreConfig;
use crate::rows::parse_enum;
use crate::{SchedResult, SchedulingError};

/// One week of the forecast, zero-filled when nothing falls into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeekBucket {
    pub week_start: DateTime<Utc>,
    pub supply_minutes: i64,
    pub hard_demand_minutes: i64,
    pub soft_demand_minutes: i64,
}

/// Remaining-visit estimate for one episode, derived from the stage catalog
/// position and the historical work-step cadence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemainingVisits {
    pub episode_id: Uuid,
    pub remaining_steps: i64,
    /// Median scenario: some steps merge into one visit.
    pub p50_visits: i64,
    /// Pessimistic scenario: most steps need their own visit.
    pub p80_visits: i64,
    pub p50_completion: DateTime<Utc>,
    pub p80_completion: DateTime<Utc>,
}

/// Monday 00:00 UTC of the week containing `at`.
pub fn week_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let date = at.date_naive();
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    debug_assert_eq!(monday.weekday(), Weekday::Mon);
    Utc.from_utc_datetime(&monday.and_hms_opt(0, 0, 0).unwrap_or_default())
}

#[derive(Clone)]
pub struct ForecastService {
    pool: SqlitePool,
    cfg: Arc<CoreConfig>,
}

impl ForecastService {
    pub fn new(pool: SqlitePool, cfg: Arc<CoreConfig>) -> Self {
        Self { pool, cfg }
    }

    /// Weekly supply/demand buckets from the week containing `from`, over
    /// the configured horizon. Optionally restricted to one pool.
    pub async fn weekly_buckets(
        &self,
        from: DateTime<Utc>,
        pool_filter: Option<Pool>,
    ) -> SchedResult<Vec<WeekBucket>> {
        let horizon_weeks = self.cfg.forecast_horizon_weeks() as i64;
        let start = week_start(from);
        let end = start + Duration::weeks(horizon_weeks);

        let mut buckets: Vec<WeekBucket> = (0..horizon_weeks)
            .map(|w| WeekBucket {
                week_start: start + Duration::weeks(w),
                supply_minutes: 0,
                hard_demand_minutes: 0,
                soft_demand_minutes: 0,
            })
            .collect();

        let bucket_index = |at: DateTime<Utc>| -> Option<usize> {
            if at < start || at >= end {
                return None;
            }
            let idx = (week_start(at) - start).num_weeks();
            usize::try_from(idx).ok()
        };

        let filter = pool_filter.map(|p| p.as_str().to_owned());

        // Supply: free slots in the horizon.
        let slot_rows = sqlx::query(
            "SELECT start_time, duration_minutes, slot_purpose
             FROM available_time_slots
             WHERE state = 'free' AND start_time >= ? AND start_time < ?
               AND (?3 IS NULL OR slot_purpose = ?3)",
        )
        .bind(start)
        .bind(end)
        .bind(&filter)
        .fetch_all(&self.pool)
        .await?;
        for row in &slot_rows {
            let at: DateTime<Utc> = row.try_get("start_time")?;
            let minutes: i64 = row.try_get("duration_minutes")?;
            if let Some(idx) = bucket_index(at) {
                buckets[idx].supply_minutes += minutes;
            }
        }

        // Hard demand: live appointments in the horizon.
        let appointment_rows = sqlx::query(
            "SELECT start_time, duration_minutes, pool
             FROM appointments
             WHERE (appointment_status IS NULL OR appointment_status = 'completed')
               AND start_time >= ? AND start_time < ?
               AND (?3 IS NULL OR pool = ?3)",
        )
        .bind(start)
        .bind(end)
        .bind(&filter)
        .fetch_all(&self.pool)
        .await?;
        for row in &appointment_rows {
            let at: DateTime<Utc> = row.try_get("start_time")?;
            let minutes: i64 = row.try_get("duration_minutes")?;
            if let Some(idx) = bucket_index(at) {
                buckets[idx].hard_demand_minutes += minutes;
            }
        }

        // Soft demand: open intents. A windowed intent lands in the week of
        // its window start; an unwindowed one is demand for the current
        // week.
        let intent_rows = sqlx::query(
            "SELECT window_start, duration_minutes, pool
             FROM slot_intents
             WHERE state = 'open' AND (?1 IS NULL OR pool = ?1)",
        )
        .bind(&filter)
        .fetch_all(&self.pool)
        .await?;
        for row in &intent_rows {
            let window_start: Option<DateTime<Utc>> = row.try_get("window_start")?;
            let minutes: i64 = row.try_get("duration_minutes")?;
            let at = window_start.unwrap_or(from).max(from);
            if let Some(idx) = bucket_index(at) {
                buckets[idx].soft_demand_minutes += minutes;
            }
        }

        Ok(buckets)
    }

    /// Estimates how many more visits an open episode needs and when it is
    /// likely to finish. Steps remaining come from the catalog position;
    /// the calendar window assumes the configured work-step cadence.
    pub async fn remaining_visits(&self, episode_id: Uuid) -> SchedResult<RemainingVisits> {
        let episode_row = sqlx::query("SELECT reason, status FROM patient_episodes WHERE id = ?")
            .bind(episode_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SchedulingError::NotFound {
                entity: "episode",
                id: episode_id,
            })?;
        let reason: caresched_types::EpisodeReason = parse_enum(episode_row.try_get("reason")?)?;
        let status: &str = episode_row.try_get("status")?;
        if status != "open" {
            return Err(SchedulingError::InvalidState(format!(
                "episode {episode_id} is closed; nothing remains to forecast"
            )));
        }

        let current_stage: Option<String> = sqlx::query_scalar(
            "SELECT stage_code FROM stage_events WHERE episode_id = ?
             ORDER BY at DESC, id DESC LIMIT 1",
        )
        .bind(episode_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT code FROM stage_catalog WHERE reason = ? ORDER BY order_index",
        )
        .bind(reason.as_str())
        .fetch_all(&self.pool)
        .await?;

        let remaining_steps = match current_stage {
            Some(code) => match codes.iter().position(|c| *c == code) {
                Some(idx) => (codes.len() - idx - 1) as i64,
                // Stage no longer in the catalog; assume the full path.
                None => codes.len() as i64,
            },
            None => codes.len() as i64,
        };

        let p50_visits = mul_ceil(remaining_steps, 6, 10);
        let p80_visits = mul_ceil(remaining_steps, 9, 10);
        let cadence = Duration::days(self.cfg.work_step_cadence_days());
        let now = Utc::now();

        Ok(RemainingVisits {
            episode_id,
            remaining_steps,
            p50_visits,
            p80_visits,
            p50_completion: now + cadence * p50_visits as i32,
            p80_completion: now + cadence * p80_visits as i32,
        })
    }
}

/// `ceil(steps * num / den)` in integer arithmetic.
fn mul_ceil(steps: i64, num: i64, den: i64) -> i64 {
    (steps * num + den - 1) / den
}
