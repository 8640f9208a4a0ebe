//! Mapping from core errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use utoipa::ToSchema;

use caresched_core::SchedulingError;

/// JSON error body returned on every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Coarse taxonomy code, stable across releases.
    pub code: String,
    /// Finer-grained code where one exists (for example
    /// `ONE_HARD_NEXT_VIOLATION`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_code: Option<String>,
    pub message: String,
}

/// Wrapper turning a [`SchedulingError`] into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SchedulingError);

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(SchedulingError::Validation(message.into()))
    }
}

impl From<SchedulingError> for ApiError {
    fn from(err: SchedulingError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION" => StatusCode::BAD_REQUEST,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "CONFLICT" => StatusCode::CONFLICT,
            "INVALID_STATE" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error while handling request");
        }

        let body = ErrorBody {
            code: self.0.code().to_string(),
            detail_code: self.0.detail_code().map(str::to_string),
            // Internal detail stays in the logs.
            message: if status == StatusCode::INTERNAL_SERVER_ERROR {
                "internal error".to_string()
            } else {
                self.0.to_string()
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn conflict_maps_to_409() {
        let err = ApiError(SchedulingError::VersionConflict {
            expected: 1,
            current: 2,
        });
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn one_hard_next_maps_to_400() {
        let err = ApiError(SchedulingError::OneHardNext {
            episode_id: Uuid::new_v4(),
        });
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
