//! Data models shared by the pool, executor and repository layers.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    DatabaseType, escape_like, is_plain_identifier, mask_connection_string,
};
pub use query::{JsonRow, QueryParam, WriteOutcome};
