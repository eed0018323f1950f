//! Engine facade: the session API described in the external-interface
//! contract, backed by a single-writer turn manager.
//!
//! Locking discipline: the manager mutex guards every tree mutation and
//! is never held across an `.await`. Closing a turn therefore runs in
//! two locked phases around the (lock-free) summarizer call; the
//! engine is single-writer per session, so nothing can slip between
//! them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use gm_agents::{
    CombatExtractor, EffectExtractor, EventDetector, ResourceExtractor, RuleStore, TurnSummarizer,
};
use gm_context::{DmContext, DmContextBuilder, ExtractorContextBuilder, SummarizerContextBuilder};
use gm_domain::config::EngineConfig;
use gm_domain::extraction::{ExtractionResult, GameContext};
use gm_domain::message::{ActionDeclaration, MessageDraft};
use gm_domain::trace::TraceEvent;
use gm_domain::{Error, Result};
use gm_tools::RulesQueryTool;
use gm_turns::manager::{EndResult, EndStage, Snapshot};
use gm_turns::{TurnContext, TurnManager};

use crate::orchestrator::StateExtractionOrchestrator;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One session's turn-context engine.
pub struct Engine {
    manager: Mutex<TurnManager>,
    orchestrator: StateExtractionOrchestrator,
    summarizer: Arc<dyn TurnSummarizer>,
    rules_tool: RulesQueryTool,
    dm_builder: DmContextBuilder,
    extractor_builder: ExtractorContextBuilder,
    summarizer_builder: SummarizerContextBuilder,
    extractions_run: AtomicU64,
}

impl Engine {
    /// Start configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    // ── turn lifecycle ─────────────────────────────────────────────

    /// Open one child turn per declaration under the current leaf; the
    /// last declared becomes the active leaf. Returns ids in
    /// declaration order.
    pub fn start_and_queue_turns(
        &self,
        declarations: Vec<ActionDeclaration>,
    ) -> Result<Vec<String>> {
        self.manager.lock().start_and_queue_turns(declarations)
    }

    /// Append messages to the active leaf; multi-message live batches
    /// become one group flagged new to the narrator.
    pub fn append_messages(&self, drafts: Vec<MessageDraft>) -> Result<()> {
        self.manager.lock().append_messages(drafts)
    }

    /// Close the active leaf.
    ///
    /// Entering a queued sibling and closing the root are synchronous.
    /// Otherwise the leaf is condensed by the summarizer and folded into
    /// its parent; summarizer failures substitute a fallback condensate,
    /// so this never fails for agent-level reasons.
    pub async fn end_turn(&self) -> Result<EndResult> {
        let stage = self.manager.lock().prepare_end_turn()?;
        let leaf = match stage {
            EndStage::Done(result) => return Ok(result),
            EndStage::NeedsCondensation { leaf } => leaf,
        };

        let prompt = self.summarizer_builder.build_prompt(&leaf, None);
        let condensate = match self.summarizer.condense(&prompt).await {
            Ok(output) if !output.trim().is_empty() => output,
            Ok(_) => {
                TraceEvent::SummarizerFallback {
                    turn_id: leaf.turn_id.clone(),
                    error: "empty output".into(),
                }
                .emit();
                fallback_condensate(&leaf, "summarizer returned empty output")
            }
            Err(err) => {
                tracing::warn!(
                    turn_id = %leaf.turn_id,
                    error = %err,
                    "summarizer failed; substituting fallback condensate"
                );
                TraceEvent::SummarizerFallback {
                    turn_id: leaf.turn_id.clone(),
                    error: err.to_string(),
                }
                .emit();
                fallback_condensate(&leaf, &err.to_string())
            }
        };

        self.manager.lock().commit_end_turn(condensate)
    }

    // ── reads ──────────────────────────────────────────────────────

    /// Owned copy of the active leaf, if any.
    pub fn get_current_turn(&self) -> Option<TurnContext> {
        self.manager.lock().get_current_turn().cloned()
    }

    /// Point-in-time copy of the active path for the context builders.
    pub fn snapshot(&self) -> Snapshot {
        self.manager.lock().snapshot()
    }

    /// The narrator's projection of the current tree.
    pub fn dm_context(&self) -> DmContext {
        self.dm_builder.build(&self.snapshot())
    }

    /// The extractor's projection of the active leaf.
    pub fn extractor_context(&self) -> String {
        self.extractor_builder.build_from_snapshot(&self.snapshot())
    }

    // ── mark operations ────────────────────────────────────────────

    /// Clear the new-to-narrator flags on the active leaf after the
    /// narrator consumed a projection that rendered them as new.
    pub fn mark_dm_saw_new_messages(&self) -> Result<()> {
        self.manager.lock().mark_dm_saw_new_messages()
    }

    /// Mark the active leaf's live messages as consumed by extraction.
    pub fn mark_extraction_processed(&self) -> Result<usize> {
        self.manager.lock().mark_extraction_processed()
    }

    // ── extraction & tools ─────────────────────────────────────────

    /// Run the two-phase extraction pipeline over a narrative
    /// projection. Total: failures land in the result's `notes`.
    pub async fn extract_state_changes(
        &self,
        narrative_xml: &str,
        game_context: Option<&GameContext>,
        snapshot: Option<&Snapshot>,
    ) -> ExtractionResult {
        self.extractions_run.fetch_add(1, Ordering::Relaxed);
        self.orchestrator
            .extract_state_changes(narrative_xml, game_context, snapshot)
            .await
    }

    /// The narrator's rules-lookup tool; caches hits on the active
    /// leaf and reports problems as strings.
    pub async fn query_rules_database(&self, query: &str, limit: Option<usize>) -> String {
        self.rules_tool
            .query_rules_database(&self.manager, query, limit)
            .await
    }

    // ── stats ──────────────────────────────────────────────────────

    pub fn stats(&self) -> EngineStats {
        let manager = self.manager.lock();
        let (open_turns, total_turns) = manager.turn_counts();
        EngineStats {
            active_turn_id: manager.current_turn_id(),
            open_turns,
            total_turns,
            extractions_run: self.extractions_run.load(Ordering::Relaxed),
        }
    }
}

/// The condensate used when the summarizer fails or returns nothing.
fn fallback_condensate(leaf: &TurnContext, error: &str) -> String {
    format!(
        "<turn id=\"{}\" level=\"{}\"><action>Failed to condense: {error}</action>\
         <resolution>Turn processing encountered an error</resolution></turn>",
        leaf.turn_id, leaf.turn_level
    )
}

/// Counts for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub active_turn_id: Option<String>,
    pub open_turns: usize,
    pub total_turns: usize,
    pub extractions_run: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Explicit wiring of every collaborator; nothing is constructed at
/// import time and nothing is global.
#[derive(Default)]
pub struct EngineBuilder {
    detector: Option<Arc<dyn EventDetector>>,
    combat: Option<Arc<dyn CombatExtractor>>,
    resource: Option<Arc<dyn ResourceExtractor>>,
    effect: Option<Arc<dyn EffectExtractor>>,
    summarizer: Option<Arc<dyn TurnSummarizer>>,
    rule_store: Option<Arc<dyn RuleStore>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn event_detector(mut self, detector: Arc<dyn EventDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn combat_extractor(mut self, combat: Arc<dyn CombatExtractor>) -> Self {
        self.combat = Some(combat);
        self
    }

    pub fn resource_extractor(mut self, resource: Arc<dyn ResourceExtractor>) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn effect_extractor(mut self, effect: Arc<dyn EffectExtractor>) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn TurnSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.rule_store = Some(store);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the engine. Every collaborator is required.
    pub fn build(self) -> Result<Engine> {
        let detector = self.detector.ok_or_else(|| missing("event detector"))?;
        let combat = self.combat.ok_or_else(|| missing("combat extractor"))?;
        let resource = self.resource.ok_or_else(|| missing("resource extractor"))?;
        let effect = self.effect.ok_or_else(|| missing("effect extractor"))?;
        let summarizer = self.summarizer.ok_or_else(|| missing("summarizer"))?;
        let rule_store = self.rule_store.ok_or_else(|| missing("rule store"))?;

        let orchestrator = StateExtractionOrchestrator::new(
            detector,
            combat,
            resource,
            effect,
            self.config.extraction.clone(),
        );
        let rules_tool = RulesQueryTool::new(rule_store, self.config.rules_tool.clone());

        Ok(Engine {
            manager: Mutex::new(TurnManager::new()),
            orchestrator,
            summarizer,
            rules_tool,
            dm_builder: DmContextBuilder::new(),
            extractor_builder: ExtractorContextBuilder::new(),
            summarizer_builder: SummarizerContextBuilder::new(),
            extractions_run: AtomicU64::new(0),
        })
    }
}

fn missing(component: &str) -> Error {
    Error::Other(format!("engine builder: {component} not provided"))
}
