//! Shared domain model for the ladder workspace.
//!
//! `models` holds the records the engine mutates and the store persists,
//! `events` the notification side-channel, `api` the request and projection
//! payloads exchanged with the presentation layer.

pub mod api;
pub mod events;
pub mod models;

pub use models::*;
