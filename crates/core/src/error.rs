//! Error taxonomy of the scheduling engine.
//!
//! Every rejected operation names the invariant or precondition that failed,
//! with enough structured detail for the caller to resolve the situation
//! without guessing (current vs expected version on conflicts, the offending
//! episode on one-hard-next rejections). The coarse taxonomy codes map
//! one-to-one onto the API layer's status codes.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(
        "one-hard-next violation: episode {episode_id} already has an active future work appointment"
    )]
    OneHardNext { episode_id: Uuid },

    #[error("forbidden: role is not permitted to {action}")]
    Forbidden { action: &'static str },

    #[error("stage version conflict: expected {expected}, current {current}; reload and retry")]
    VersionConflict { expected: i64, current: i64 },

    #[error("concurrent update lost: {0}")]
    Conflict(String),

    #[error("operation not legal in current state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("corrupt stored value: {0}")]
    Decode(String),

    #[error("failed to serialize ruleset rules: {0}")]
    RuleSerialization(#[from] serde_json::Error),
}

impl SchedulingError {
    /// Coarse taxonomy code surfaced to API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) | Self::OneHardNext { .. } => "VALIDATION",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::VersionConflict { .. } | Self::Conflict(_) => "CONFLICT",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Database(_) | Self::Decode(_) | Self::RuleSerialization(_) => "INTERNAL",
        }
    }

    /// Fine-grained detail code where one exists beyond the taxonomy.
    pub fn detail_code(&self) -> Option<&'static str> {
        match self {
            Self::OneHardNext { .. } => Some("ONE_HARD_NEXT_VIOLATION"),
            Self::VersionConflict { .. } => Some("STAGE_VERSION_CONFLICT"),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for SchedulingError {
    fn from(err: sqlx::Error) -> Self {
        // SQLite primary result codes 5 (BUSY) and 6 (LOCKED) mean another
        // writer holds the database: the caller lost a race, not hit an
        // internal fault. The extended code carries the primary code in its
        // low byte.
        if let sqlx::Error::Database(db) = &err {
            let busy = db
                .code()
                .and_then(|c| c.parse::<i64>().ok())
                .is_some_and(|c| matches!(c & 0xff, 5 | 6));
            if busy {
                return Self::Conflict("concurrent update in progress; retry".into());
            }
        }
        Self::Database(err)
    }
}

impl From<caresched_types::ParseEnumError> for SchedulingError {
    fn from(err: caresched_types::ParseEnumError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<caresched_types::TextError> for SchedulingError {
    fn from(err: caresched_types::TextError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type SchedResult<T> = std::result::Result<T, SchedulingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StubDbError(&'static str);

    impl std::fmt::Display for StubDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "database is locked")
        }
    }

    impl std::error::Error for StubDbError {}

    impl sqlx::error::DatabaseError for StubDbError {
        fn message(&self) -> &str {
            "database is locked"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(self.0.into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    #[test]
    fn busy_database_surfaces_as_conflict() {
        // 5 = SQLITE_BUSY, 517 = SQLITE_BUSY_SNAPSHOT, 6 = SQLITE_LOCKED.
        for code in ["5", "517", "6"] {
            let err: SchedulingError = sqlx::Error::Database(Box::new(StubDbError(code))).into();
            assert_eq!(err.code(), "CONFLICT", "sqlite code {code}");
        }

        // 1 = SQLITE_ERROR stays internal.
        let err: SchedulingError = sqlx::Error::Database(Box::new(StubDbError("1"))).into();
        assert_eq!(err.code(), "INTERNAL");
    }

    #[test]
    fn taxonomy_codes() {
        let err = SchedulingError::VersionConflict {
            expected: 3,
            current: 4,
        };
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.to_string().contains("expected 3"));

        let err = SchedulingError::OneHardNext {
            episode_id: Uuid::nil(),
        };
        assert_eq!(err.code(), "VALIDATION");
        assert_eq!(err.detail_code(), Some("ONE_HARD_NEXT_VIOLATION"));
    }
}
