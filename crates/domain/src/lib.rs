//! Shared domain types for the turn-context engine.
//!
//! Everything the other crates agree on lives here: the error type, the
//! message and turn-item model, rule/cache entries, extraction result
//! envelopes and commands, typed configuration, and trace events.

pub mod config;
pub mod error;
pub mod extraction;
pub mod message;
pub mod rules;
pub mod trace;

pub use error::{Error, Result};
