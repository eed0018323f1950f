//! The assembled turn-context engine.
//!
//! [`Engine`] wires the turn manager, the context builders, the
//! rules-query tool, and the state-extraction orchestrator together
//! behind the public session API. Construct one with [`EngineBuilder`],
//! passing implementations of the `gm-agents` traits.

pub mod engine;
pub mod orchestrator;

pub use engine::{Engine, EngineBuilder, EngineStats};
pub use orchestrator::StateExtractionOrchestrator;
