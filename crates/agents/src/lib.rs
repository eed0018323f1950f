//! Contracts for the engine's external collaborators.
//!
//! The engine never talks to an LLM or a vector database directly; it
//! sees the narrator's helpers and the rule store only through these
//! traits. Implementations live with the caller (and in the test suites
//! as deterministic fakes).

pub mod traits;

pub use traits::{
    CombatExtractor, EffectExtractor, EventDetector, HistorySummarizer, ResourceExtractor,
    RuleStore, TurnSummarizer,
};
