//! Request handlers, grouped by resource.

pub mod admin;
pub mod appointments;
pub mod blocks;
pub mod catalog;
pub mod episodes;
pub mod intents;
pub mod slots;
