use gm_domain::error::Result;
use gm_domain::extraction::{
    CombatResult, EffectResult, EventDetection, GameContext, ResourceResult,
};
use gm_domain::rules::RuleEntry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extraction agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap classifier that reads a narrative and flags which classes of
/// state change occurred.
///
/// Implementations should be permissive: a false positive only triggers
/// a no-op specialist run, a false negative silently loses updates.
#[async_trait::async_trait]
pub trait EventDetector: Send + Sync {
    async fn detect_events(
        &self,
        narrative: &str,
        game_context: Option<&GameContext>,
    ) -> Result<EventDetection>;
}

/// Specialist for combat-critical changes: HP, conditions, death saves,
/// combat-stat modifiers.
#[async_trait::async_trait]
pub trait CombatExtractor: Send + Sync {
    async fn extract(
        &self,
        narrative: &str,
        game_context: Option<&GameContext>,
    ) -> Result<CombatResult>;
}

/// Specialist for resource consumption: spell slots, inventory, hit
/// dice, ability modifiers, and newly-introduced characters.
#[async_trait::async_trait]
pub trait ResourceExtractor: Send + Sync {
    async fn extract(
        &self,
        narrative: &str,
        game_context: Option<&GameContext>,
    ) -> Result<ResourceResult>;
}

/// Specialist for effect application/removal. Receives the pre-built
/// effect context (narrative + known cached effects + game metadata)
/// rather than the bare narrative.
#[async_trait::async_trait]
pub trait EffectExtractor: Send + Sync {
    async fn extract(&self, effect_context: &str) -> Result<EffectResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Condenses a closing sub-turn's log into a single `<turn>` element
/// embedding its `<action>`, nested `<reaction>`s (verbatim), and
/// `<resolution>`.
///
/// A failure or empty return never blocks the close: the engine
/// substitutes a fallback condensate.
#[async_trait::async_trait]
pub trait TurnSummarizer: Send + Sync {
    async fn condense(&self, prompt: &str) -> Result<String>;
}

/// Condenses a span of narrator conversation history into one integrated
/// summary block, folding any previous summary into the new one.
#[async_trait::async_trait]
pub trait HistorySummarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The opaque rules corpus. Two methods are all the engine requires.
#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    /// Hybrid (vector + full-text) retrieval; returns up to `limit`
    /// entries ranked best-first. `filter_type` restricts by entry kind.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter_type: Option<&str>,
    ) -> Result<Vec<RuleEntry>>;

    /// Exact name lookup with optional type disambiguation.
    async fn get_by_name(
        &self,
        name: &str,
        entry_type: Option<&str>,
    ) -> Result<Option<RuleEntry>>;
}
