//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the
//! core services. The intent is to avoid reading process-wide environment
//! variables during request handling, which can lead to inconsistent
//! behaviour in multi-threaded runtimes and test harnesses.

use crate::{SchedResult, SchedulingError};

/// How many times a block may be renewed before an operational escalation
/// signal is emitted.
const DEFAULT_BLOCK_ESCALATION_THRESHOLD: i64 = 3;

/// Days a freshly created slot intent stays open before the expiry sweep
/// claims it.
const DEFAULT_INTENT_TTL_DAYS: i64 = 30;

/// Default forecast horizon, in calendar weeks.
const DEFAULT_FORECAST_HORIZON_WEEKS: u32 = 12;

/// Recall follow-up offsets scheduled when an episode reaches the terminal
/// delivery stage.
const DEFAULT_RECALL_OFFSETS_DAYS: [i64; 3] = [90, 180, 365];

/// Assumed days between consecutive work-pool visits, used by the
/// remaining-visits estimate.
const DEFAULT_WORK_STEP_CADENCE_DAYS: i64 = 21;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_url: String,
    intent_ttl_days: i64,
    block_escalation_threshold: i64,
    forecast_horizon_weeks: u32,
    recall_offsets_days: Vec<i64>,
    work_step_cadence_days: i64,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with default policy values.
    pub fn new(database_url: impl Into<String>) -> SchedResult<Self> {
        let database_url = database_url.into();
        if database_url.trim().is_empty() {
            return Err(SchedulingError::Validation(
                "database_url cannot be empty".into(),
            ));
        }

        Ok(Self {
            database_url,
            intent_ttl_days: DEFAULT_INTENT_TTL_DAYS,
            block_escalation_threshold: DEFAULT_BLOCK_ESCALATION_THRESHOLD,
            forecast_horizon_weeks: DEFAULT_FORECAST_HORIZON_WEEKS,
            recall_offsets_days: DEFAULT_RECALL_OFFSETS_DAYS.to_vec(),
            work_step_cadence_days: DEFAULT_WORK_STEP_CADENCE_DAYS,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn intent_ttl_days(&self) -> i64 {
        self.intent_ttl_days
    }

    pub fn block_escalation_threshold(&self) -> i64 {
        self.block_escalation_threshold
    }

    pub fn forecast_horizon_weeks(&self) -> u32 {
        self.forecast_horizon_weeks
    }

    pub fn recall_offsets_days(&self) -> &[i64] {
        &self.recall_offsets_days
    }

    pub fn work_step_cadence_days(&self) -> i64 {
        self.work_step_cadence_days
    }

    /// Override the intent TTL. Exists for operational tuning; the 30-day
    /// default matches clinic policy.
    pub fn with_intent_ttl_days(mut self, days: i64) -> SchedResult<Self> {
        if days <= 0 {
            return Err(SchedulingError::Validation(
                "intent TTL must be positive".into(),
            ));
        }
        self.intent_ttl_days = days;
        Ok(self)
    }

    pub fn with_forecast_horizon_weeks(mut self, weeks: u32) -> SchedResult<Self> {
        if weeks == 0 {
            return Err(SchedulingError::Validation(
                "forecast horizon must be at least one week".into(),
            ));
        }
        self.forecast_horizon_weeks = weeks;
        Ok(self)
    }
}
