//! Shared types for the kindred messaging core: domain models, gateway
//! events, REST payloads and the error taxonomy.

pub mod api;
pub mod error;
pub mod events;
pub mod models;

pub use error::{ChatError, ErrorKind};
