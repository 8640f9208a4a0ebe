//! # API Shared
//!
//! Shared utilities and definitions for the scheduling APIs.
//!
//! Contains:
//! - The verified authentication context handed to every core operation
//! - Role definitions and permission gates
//! - Shared services like `HealthService`
//!
//! Authentication itself (JWT verification, session handling) happens
//! upstream of this workspace; by the time an `AuthContext` exists here it
//! has already been verified.

pub mod auth;
pub mod health;

pub use auth::{AuthContext, Role};
pub use health::HealthService;
