//! Row-decoding helpers shared by the persistence modules.
//!
//! UUIDs are stored as hyphenated text and enums as their stable string
//! discriminants; these helpers turn the raw columns back into domain types,
//! surfacing corrupt stored values as `Decode` errors instead of panics.

use std::str::FromStr;

use uuid::Uuid;

use crate::{SchedResult, SchedulingError};

pub(crate) fn parse_uuid(value: &str) -> SchedResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| SchedulingError::Decode(format!("invalid uuid {value:?}: {e}")))
}

pub(crate) fn parse_opt_uuid(value: Option<&str>) -> SchedResult<Option<Uuid>> {
    value.map(parse_uuid).transpose()
}

pub(crate) fn parse_enum<T>(value: &str) -> SchedResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| SchedulingError::Decode(e.to_string()))
}

pub(crate) fn parse_opt_enum<T>(value: Option<&str>) -> SchedResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map(parse_enum).transpose()
}
