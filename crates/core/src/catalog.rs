//! Stage catalog and transition ruleset store.
//!
//! The catalog is the legal stage vocabulary, scoped per clinical reason. A
//! ruleset is a versioned, immutable-once-published set of transition rules;
//! exactly one ruleset is PUBLISHED at any time, enforced by performing the
//! demote/promote pair inside a single transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use api_shared::AuthContext;
use caresched_types::{EpisodeReason, RulesetStatus};

use crate::rows::{parse_enum, parse_uuid};
use crate::{SchedResult, SchedulingError};

/// One entry of the legal stage vocabulary for a clinical reason.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageCatalogEntry {
    pub code: String,
    pub reason: EpisodeReason,
    pub label_hu: String,
    pub order_index: i64,
    pub is_terminal: bool,
    pub default_duration_days: i64,
}

/// A single legal transition. `from: None` admits the target as an entry
/// stage for an episode that has no stage history yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: Option<String>,
    pub to: String,
}

/// A versioned set of transition rules with a publication lifecycle.
#[derive(Clone, Debug)]
pub struct Ruleset {
    pub id: Uuid,
    pub status: RulesetStatus,
    pub rules: Vec<TransitionRule>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Ruleset {
    /// Whether this ruleset permits the given transition.
    pub fn allows(&self, from: Option<&str>, to: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.from.as_deref() == from && r.to == to)
    }
}

fn ruleset_from_row(row: &SqliteRow) -> SchedResult<Ruleset> {
    let rules: Vec<TransitionRule> = serde_json::from_str(row.try_get("rules")?)?;
    Ok(Ruleset {
        id: parse_uuid(row.try_get("id")?)?,
        status: parse_enum(row.try_get("status")?)?,
        rules,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> SchedResult<StageCatalogEntry> {
    Ok(StageCatalogEntry {
        code: row.try_get::<String, _>("code")?,
        reason: parse_enum(row.try_get("reason")?)?,
        label_hu: row.try_get::<String, _>("label_hu")?,
        order_index: row.try_get("order_index")?,
        is_terminal: row.try_get("is_terminal")?,
        default_duration_days: row.try_get("default_duration_days")?,
    })
}

/// Service for catalog lookups and ruleset lifecycle operations.
#[derive(Clone)]
pub struct CatalogService {
    pool: SqlitePool,
}

impl CatalogService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a catalog entry. Stage vocabularies are
    /// clinic-curated, so writes are admin-only.
    pub async fn put_entry(&self, ctx: &AuthContext, entry: StageCatalogEntry) -> SchedResult<()> {
        if !ctx.is_admin() {
            return Err(SchedulingError::Forbidden {
                action: "edit the stage catalog",
            });
        }
        if entry.code.trim().is_empty() {
            return Err(SchedulingError::Validation(
                "stage code cannot be empty".into(),
            ));
        }

        sqlx::query(
            "INSERT INTO stage_catalog
             (code, reason, label_hu, order_index, is_terminal, default_duration_days)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (code, reason) DO UPDATE SET
                 label_hu = excluded.label_hu,
                 order_index = excluded.order_index,
                 is_terminal = excluded.is_terminal,
                 default_duration_days = excluded.default_duration_days",
        )
        .bind(&entry.code)
        .bind(entry.reason.as_str())
        .bind(&entry.label_hu)
        .bind(entry.order_index)
        .bind(entry.is_terminal)
        .bind(entry.default_duration_days)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Catalog entries, optionally narrowed to one reason, ordered by
    /// `order_index`.
    pub async fn list_catalog(
        &self,
        reason: Option<EpisodeReason>,
    ) -> SchedResult<Vec<StageCatalogEntry>> {
        let rows = sqlx::query(
            "SELECT code, reason, label_hu, order_index, is_terminal, default_duration_days
             FROM stage_catalog
             WHERE (?1 IS NULL OR reason = ?1)
             ORDER BY order_index",
        )
        .bind(reason.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// The catalog entry for a stage code under a reason, if any.
    pub async fn entry(
        &self,
        code: &str,
        reason: EpisodeReason,
    ) -> SchedResult<Option<StageCatalogEntry>> {
        let row = sqlx::query(
            "SELECT code, reason, label_hu, order_index, is_terminal, default_duration_days
             FROM stage_catalog WHERE code = ? AND reason = ?",
        )
        .bind(code)
        .bind(reason.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Creates a new DRAFT ruleset.
    pub async fn create_draft(
        &self,
        ctx: &AuthContext,
        rules: Vec<TransitionRule>,
    ) -> SchedResult<Ruleset> {
        if !ctx.is_admin() {
            return Err(SchedulingError::Forbidden {
                action: "create rulesets",
            });
        }
        if rules.is_empty() {
            return Err(SchedulingError::Validation(
                "a ruleset must contain at least one rule".into(),
            ));
        }

        let ruleset = Ruleset {
            id: Uuid::new_v4(),
            status: RulesetStatus::Draft,
            rules,
            created_at: Utc::now(),
            published_at: None,
        };

        sqlx::query(
            "INSERT INTO stage_transition_rulesets (id, status, rules, created_at, published_at)
             VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(ruleset.id.to_string())
        .bind(ruleset.status.as_str())
        .bind(serde_json::to_string(&ruleset.rules)?)
        .bind(ruleset.created_at)
        .execute(&self.pool)
        .await?;

        Ok(ruleset)
    }

    pub async fn get_ruleset(&self, ruleset_id: Uuid) -> SchedResult<Ruleset> {
        let row = sqlx::query(
            "SELECT id, status, rules, created_at, published_at
             FROM stage_transition_rulesets WHERE id = ?",
        )
        .bind(ruleset_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulingError::NotFound {
            entity: "ruleset",
            id: ruleset_id,
        })?;

        ruleset_from_row(&row)
    }

    /// The currently PUBLISHED ruleset, if any has been published yet.
    pub async fn published(&self) -> SchedResult<Option<Ruleset>> {
        let row = sqlx::query(
            "SELECT id, status, rules, created_at, published_at
             FROM stage_transition_rulesets WHERE status = ?",
        )
        .bind(RulesetStatus::Published.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(ruleset_from_row).transpose()
    }

    /// Publishes a DRAFT ruleset.
    ///
    /// The previously published ruleset (if any) is demoted to DEPRECATED and
    /// the target promoted to PUBLISHED in one transaction, so a crash
    /// between the two writes can never leave zero or two published rows.
    pub async fn publish(&self, ctx: &AuthContext, ruleset_id: Uuid) -> SchedResult<Ruleset> {
        if !ctx.is_admin() {
            return Err(SchedulingError::Forbidden {
                action: "publish rulesets",
            });
        }

        let target = self.get_ruleset(ruleset_id).await?;
        if target.status != RulesetStatus::Draft {
            return Err(SchedulingError::InvalidState(format!(
                "only DRAFT rulesets can be published; ruleset {ruleset_id} is {}",
                target.status
            )));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE stage_transition_rulesets SET status = ? WHERE status = ?")
            .bind(RulesetStatus::Deprecated.as_str())
            .bind(RulesetStatus::Published.as_str())
            .execute(&mut *tx)
            .await?;

        // Guard against a concurrent publish of the same draft: the status
        // check in the WHERE clause makes the promotion a CAS.
        let promoted = sqlx::query(
            "UPDATE stage_transition_rulesets
             SET status = ?, published_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(RulesetStatus::Published.as_str())
        .bind(now)
        .bind(ruleset_id.to_string())
        .bind(RulesetStatus::Draft.as_str())
        .execute(&mut *tx)
        .await?;

        if promoted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(SchedulingError::Conflict(format!(
                "ruleset {ruleset_id} was published concurrently"
            )));
        }

        tx.commit().await?;

        tracing::info!(%ruleset_id, "published stage transition ruleset");
        self.get_ruleset(ruleset_id).await
    }

    /// Whether the transition is legal under the published ruleset. Absence
    /// of the target code in the catalog for the reason is always invalid
    /// regardless of ruleset; with no published ruleset only the catalog
    /// check applies (bootstrap state).
    pub async fn is_valid_transition(
        &self,
        reason: EpisodeReason,
        from: Option<&str>,
        to: &str,
    ) -> SchedResult<bool> {
        if self.entry(to, reason).await?.is_none() {
            return Ok(false);
        }

        match self.published().await? {
            Some(ruleset) => Ok(ruleset.allows(from, to)),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin_ctx, assistant_ctx, memory_pool, seed_catalog};

    fn rules_v1() -> Vec<TransitionRule> {
        vec![
            TransitionRule {
                from: None,
                to: "STAGE_1".into(),
            },
            TransitionRule {
                from: Some("STAGE_1".into()),
                to: "STAGE_2".into(),
            },
        ]
    }

    #[tokio::test]
    async fn catalog_is_ordered_and_scoped() {
        let pool = memory_pool().await;
        let catalog = CatalogService::new(pool.clone());
        seed_catalog(&pool).await;

        let all = catalog.list_catalog(None).await.unwrap();
        assert!(!all.is_empty());
        let indices: Vec<i64> = all.iter().map(|e| e.order_index).collect();
        let mut sorted = indices.clone();
        sorted.sort();
        assert_eq!(indices, sorted);

        let onco = catalog
            .list_catalog(Some(EpisodeReason::Oncologic))
            .await
            .unwrap();
        assert!(onco.iter().all(|e| e.reason == EpisodeReason::Oncologic));
    }

    #[tokio::test]
    async fn publish_swaps_atomically() {
        let pool = memory_pool().await;
        let catalog = CatalogService::new(pool.clone());
        let admin = admin_ctx();

        let a = catalog.create_draft(&admin, rules_v1()).await.unwrap();
        let b = catalog.create_draft(&admin, rules_v1()).await.unwrap();

        catalog.publish(&admin, a.id).await.unwrap();
        catalog.publish(&admin, b.id).await.unwrap();

        // Exactly one PUBLISHED row, namely b; a is DEPRECATED.
        let published = catalog.published().await.unwrap().unwrap();
        assert_eq!(published.id, b.id);

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stage_transition_rulesets WHERE status = 'PUBLISHED'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);

        let a_after = catalog.get_ruleset(a.id).await.unwrap();
        assert_eq!(a_after.status, RulesetStatus::Deprecated);

        // Republishing a deprecated ruleset is not legal.
        let err = catalog.publish(&admin, a.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn publish_requires_admin() {
        let pool = memory_pool().await;
        let catalog = CatalogService::new(pool);
        let draft = catalog
            .create_draft(&admin_ctx(), rules_v1())
            .await
            .unwrap();

        let err = catalog
            .publish(&assistant_ctx(), draft.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn transition_validity_consults_catalog_and_ruleset() {
        let pool = memory_pool().await;
        let catalog = CatalogService::new(pool.clone());
        let admin = admin_ctx();
        seed_catalog(&pool).await;

        // No published ruleset yet: catalog membership is the only gate.
        assert!(catalog
            .is_valid_transition(EpisodeReason::Oncologic, None, "STAGE_1")
            .await
            .unwrap());
        assert!(!catalog
            .is_valid_transition(EpisodeReason::Oncologic, None, "NO_SUCH_STAGE")
            .await
            .unwrap());

        let draft = catalog.create_draft(&admin, rules_v1()).await.unwrap();
        catalog.publish(&admin, draft.id).await.unwrap();

        assert!(catalog
            .is_valid_transition(EpisodeReason::Oncologic, Some("STAGE_1"), "STAGE_2")
            .await
            .unwrap());
        // Legal in the catalog but not in the ruleset.
        assert!(!catalog
            .is_valid_transition(EpisodeReason::Oncologic, Some("STAGE_2"), "STAGE_1")
            .await
            .unwrap());
    }
}
