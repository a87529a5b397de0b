//! Core data models for the client portal.
//!
//! Row types map to SQLite tables via `sqlx::FromRow`; everything serializes
//! as camelCase JSON via `serde`.

pub mod batch;
pub mod conversation;
pub mod multipart;
pub mod reference;
