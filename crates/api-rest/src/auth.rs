//! Caller identity extraction.
//!
//! Authentication happens upstream (the gateway verifies the session and
//! injects identity headers); this extractor only turns those headers into
//! the [`AuthContext`] the core services authorise against.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use api_shared::{AuthContext, Role};

use crate::error::ErrorBody;

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_EMAIL: &str = "x-user-email";
pub const HEADER_USER_ROLE: &str = "x-user-role";

/// Wrapper so the extractor implementation lives in this crate.
pub struct Caller(pub AuthContext);

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            code: "UNAUTHORIZED".to_string(),
            detail_code: None,
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, HEADER_USER_ID)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| unauthorized("missing or invalid x-user-id header"))?;
        let email = header(parts, HEADER_USER_EMAIL)
            .ok_or_else(|| unauthorized("missing x-user-email header"))?
            .to_string();
        let role: Role = header(parts, HEADER_USER_ROLE)
            .and_then(|v| serde_json::from_value(serde_json::Value::String(v.to_string())).ok())
            .ok_or_else(|| unauthorized("missing or unknown x-user-role header"))?;

        Ok(Caller(AuthContext::new(user_id, email, role)))
    }
}
