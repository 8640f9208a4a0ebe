//! Feature-flag store with an explicit read-through cache.
//!
//! Flags live in `scheduling_feature_flags` and are read through a
//! process-wide cache with a defined lifecycle: populated lazily on the first
//! read, cleared by the admin write path's invalidation hook. The cache is
//! eventually consistent by contract; booking decisions tolerate a stale
//! flag for the cache's lifetime. The cache object is passed into services as
//! a constructor dependency so tests can flip flags deliberately.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tokio::sync::RwLock;

use api_shared::AuthContext;

use crate::{SchedResult, SchedulingError};

pub const FLAG_OVERBOOKING: &str = "overbooking";
pub const FLAG_AUTO_CONVERT_INTENTS: &str = "auto_convert_intents";
pub const FLAG_AUTO_REBALANCE: &str = "auto_rebalance";
pub const FLAG_STRICT_ONE_HARD_NEXT: &str = "strict_one_hard_next";

/// Default for a flag with no stored row. Strict one-hard-next enforcement
/// is on unless an admin explicitly disables it; everything else is opt-in.
fn default_for(flag: &str) -> bool {
    flag == FLAG_STRICT_ONE_HARD_NEXT
}

fn is_known(flag: &str) -> bool {
    matches!(
        flag,
        FLAG_OVERBOOKING | FLAG_AUTO_CONVERT_INTENTS | FLAG_AUTO_REBALANCE
            | FLAG_STRICT_ONE_HARD_NEXT
    )
}

/// Cached view over the feature-flag table.
#[derive(Clone)]
pub struct FeatureFlags {
    pool: SqlitePool,
    cache: Arc<RwLock<Option<HashMap<String, bool>>>>,
}

impl FeatureFlags {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Reads a flag through the cache, filling it from the store on first
    /// use.
    pub async fn get(&self, flag: &str) -> SchedResult<bool> {
        if !is_known(flag) {
            return Err(SchedulingError::Validation(format!(
                "unknown feature flag: {flag}"
            )));
        }

        {
            let cache = self.cache.read().await;
            if let Some(map) = cache.as_ref() {
                return Ok(map.get(flag).copied().unwrap_or_else(|| default_for(flag)));
            }
        }

        let map = self.load_all().await?;
        let value = map.get(flag).copied().unwrap_or_else(|| default_for(flag));
        *self.cache.write().await = Some(map);
        Ok(value)
    }

    /// Admin write path: persists the flag and invalidates the cache.
    pub async fn set(&self, ctx: &AuthContext, flag: &str, enabled: bool) -> SchedResult<()> {
        if !ctx.is_admin() {
            return Err(SchedulingError::Forbidden {
                action: "update feature flags",
            });
        }
        if !is_known(flag) {
            return Err(SchedulingError::Validation(format!(
                "unknown feature flag: {flag}"
            )));
        }

        sqlx::query(
            "INSERT INTO scheduling_feature_flags (flag, enabled, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (flag) DO UPDATE SET enabled = excluded.enabled,
                                              updated_at = excluded.updated_at",
        )
        .bind(flag)
        .bind(enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.invalidate().await;
        Ok(())
    }

    /// Drops the cached view; the next read repopulates it.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn load_all(&self) -> SchedResult<HashMap<String, bool>> {
        let rows = sqlx::query("SELECT flag, enabled FROM scheduling_feature_flags")
            .fetch_all(&self.pool)
            .await?;

        let mut map = HashMap::new();
        for row in &rows {
            map.insert(
                row.try_get::<String, _>("flag")?,
                row.try_get::<bool, _>("enabled")?,
            );
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin_ctx, assistant_ctx, memory_pool};

    #[tokio::test]
    async fn defaults_without_stored_rows() {
        let flags = FeatureFlags::new(memory_pool().await);
        assert!(!flags.get(FLAG_OVERBOOKING).await.unwrap());
        assert!(flags.get(FLAG_STRICT_ONE_HARD_NEXT).await.unwrap());
    }

    #[tokio::test]
    async fn set_invalidates_the_cache() {
        let flags = FeatureFlags::new(memory_pool().await);
        // Warm the cache with the default.
        assert!(!flags.get(FLAG_OVERBOOKING).await.unwrap());

        flags
            .set(&admin_ctx(), FLAG_OVERBOOKING, true)
            .await
            .unwrap();
        assert!(flags.get(FLAG_OVERBOOKING).await.unwrap());
    }

    #[tokio::test]
    async fn only_admins_write_flags() {
        let flags = FeatureFlags::new(memory_pool().await);
        let err = flags
            .set(&assistant_ctx(), FLAG_OVERBOOKING, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn unknown_flag_is_rejected() {
        let flags = FeatureFlags::new(memory_pool().await);
        assert_eq!(
            flags.get("telepathy").await.unwrap_err().code(),
            "VALIDATION"
        );
    }
}
