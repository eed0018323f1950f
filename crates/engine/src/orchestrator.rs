//! Two-phase multi-agent state extraction.
//!
//! Phase 1 runs the cheap event detector over the narrative. Phase 2
//! schedules only the specialists the detected classes call for and
//! runs them concurrently, each under its own deadline; a failed or
//! timed-out specialist contributes nothing but a note while the others
//! still land. Phase 3 merges per-character updates and flattens them
//! into the ordered command list.
//!
//! The orchestrator is total: it never returns an error, only an
//! [`ExtractionResult`] whose `notes` records what went wrong.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use gm_agents::{CombatExtractor, EffectExtractor, EventDetector, ResourceExtractor};
use gm_context::EffectContextBuilder;
use gm_domain::config::ExtractionConfig;
use gm_domain::extraction::{
    flatten_commands, CharacterUpdate, CombatResult, EffectResult, EventClass, EventDetection,
    ExtractionResult, GameContext, ResourceResult,
};
use gm_domain::trace::TraceEvent;
use gm_domain::{Error, Result};
use gm_turns::manager::Snapshot;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specialist plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum SpecialistOutcome {
    Combat(CombatResult),
    Resource(ResourceResult),
    Effect(EffectResult),
}

type SpecialistFuture<'a> =
    Pin<Box<dyn Future<Output = (&'static str, Result<SpecialistOutcome>)> + Send + 'a>>;

async fn with_deadline<F>(
    name: &'static str,
    deadline: Duration,
    fut: F,
) -> (&'static str, Result<SpecialistOutcome>)
where
    F: Future<Output = Result<SpecialistOutcome>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(outcome) => (name, outcome),
        Err(_) => (name, Err(Error::Timeout(name.to_owned()))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs detection, the specialist fan-out, and the merge.
pub struct StateExtractionOrchestrator {
    detector: Arc<dyn EventDetector>,
    combat: Arc<dyn CombatExtractor>,
    resource: Arc<dyn ResourceExtractor>,
    effect: Arc<dyn EffectExtractor>,
    effect_context: EffectContextBuilder,
    config: ExtractionConfig,
}

impl StateExtractionOrchestrator {
    pub fn new(
        detector: Arc<dyn EventDetector>,
        combat: Arc<dyn CombatExtractor>,
        resource: Arc<dyn ResourceExtractor>,
        effect: Arc<dyn EffectExtractor>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            detector,
            combat,
            resource,
            effect,
            effect_context: EffectContextBuilder::new(),
            config,
        }
    }

    /// Extract structured state changes from a narrative projection.
    ///
    /// `snapshot` is required for effect extraction (the effect agent
    /// reads the lineage's rules cache); without one, a detected
    /// `effect_applied` event is skipped and noted.
    pub async fn extract_state_changes(
        &self,
        narrative_xml: &str,
        game_context: Option<&GameContext>,
        snapshot: Option<&Snapshot>,
    ) -> ExtractionResult {
        let mut notes = Vec::new();

        // Phase 1: which classes of change does the narrative contain?
        let detection = self.detect(narrative_xml, game_context, &mut notes).await;

        // Phase 2: schedule only the specialists those classes call for.
        // The effect input is built up front so the task below can
        // borrow it for the whole fan-out.
        let effect_input = if detection.contains(EventClass::EffectApplied) {
            match snapshot {
                Some(snapshot) => Some(self.effect_context.build(
                    narrative_xml,
                    &snapshot.active_turns_by_level,
                    game_context,
                )),
                None => {
                    notes.push("effect extraction skipped: no snapshot available".to_owned());
                    None
                }
            }
        } else {
            None
        };

        let deadline = Duration::from_millis(self.config.specialist_timeout_ms);
        let mut tasks: Vec<SpecialistFuture<'_>> = Vec::new();

        if detection.contains(EventClass::HpChange) || detection.contains(EventClass::StateChange)
        {
            let fut = async {
                self.combat
                    .extract(narrative_xml, game_context)
                    .await
                    .map(SpecialistOutcome::Combat)
            };
            tasks.push(Box::pin(with_deadline("combat", deadline, fut)));
        }

        if detection.contains(EventClass::ResourceUsage) {
            let fut = async {
                self.resource
                    .extract(narrative_xml, game_context)
                    .await
                    .map(SpecialistOutcome::Resource)
            };
            tasks.push(Box::pin(with_deadline("resource", deadline, fut)));
        }

        if let Some(effect_input) = &effect_input {
            let fut = async move {
                self.effect
                    .extract(effect_input)
                    .await
                    .map(SpecialistOutcome::Effect)
            };
            tasks.push(Box::pin(with_deadline("effect", deadline, fut)));
        }

        let head = if detection.detected_events.is_empty() {
            format!("No events detected. Confidence: {:.2}", detection.confidence)
        } else {
            format!("Events detected: {}", join_events(&detection))
        };
        notes.insert(0, head);

        if tasks.is_empty() {
            return ExtractionResult::empty(notes.join(" | "));
        }

        // All specialists run concurrently and are awaited together; a
        // timeout cancels only its own future.
        let outcomes = join_all(tasks).await;

        // Phase 3: merge.
        self.merge(outcomes, notes)
    }

    async fn detect(
        &self,
        narrative_xml: &str,
        game_context: Option<&GameContext>,
        notes: &mut Vec<String>,
    ) -> EventDetection {
        let deadline = Duration::from_millis(self.config.detector_timeout_ms);
        let detection = match tokio::time::timeout(
            deadline,
            self.detector.detect_events(narrative_xml, game_context),
        )
        .await
        {
            Ok(Ok(detection)) => detection,
            Ok(Err(err)) => {
                notes.push(format!("event detection failed: {err}"));
                EventDetection::empty()
            }
            Err(_) => {
                notes.push("event detection timed out".to_owned());
                EventDetection::empty()
            }
        };

        TraceEvent::EventsDetected {
            events: detection
                .detected_events
                .iter()
                .map(|e| e.to_string())
                .collect(),
            confidence: detection.confidence,
        }
        .emit();

        detection
    }

    fn merge(
        &self,
        outcomes: Vec<(&'static str, Result<SpecialistOutcome>)>,
        mut notes: Vec<String>,
    ) -> ExtractionResult {
        let mut updates: Vec<CharacterUpdate> = Vec::new();
        let mut new_characters = Vec::new();
        let mut combat_info = std::collections::BTreeMap::new();

        for (name, outcome) in outcomes {
            match outcome {
                Err(err) => {
                    TraceEvent::ExtractorFailed {
                        extractor: name.to_owned(),
                        error: err.to_string(),
                    }
                    .emit();
                    notes.push(format!("{name} extractor failed: {err}"));
                }
                Ok(SpecialistOutcome::Combat(result)) => {
                    for update in result.character_updates {
                        entry_for(&mut updates, &update.character_id).merge_combat(update);
                    }
                    combat_info.extend(result.combat_info);
                    if let Some(note) = result.notes {
                        notes.push(format!("Combat: {note}"));
                    }
                }
                Ok(SpecialistOutcome::Resource(result)) => {
                    for update in result.character_updates {
                        entry_for(&mut updates, &update.character_id).merge_resource(update);
                    }
                    new_characters.extend(result.new_characters);
                    if let Some(note) = result.notes {
                        notes.push(format!("Resource: {note}"));
                    }
                }
                Ok(SpecialistOutcome::Effect(result)) => {
                    for update in result.character_updates {
                        entry_for(&mut updates, &update.character_id).merge_effect(update);
                    }
                    if let Some(note) = result.notes {
                        notes.push(format!("Effect: {note}"));
                    }
                }
            }
        }

        let commands = flatten_commands(&updates, &new_characters);

        TraceEvent::ExtractionMerged {
            commands: commands.len(),
            new_characters: new_characters.len(),
        }
        .emit();

        ExtractionResult {
            commands,
            new_characters,
            combat_info,
            notes: notes.join(" | "),
        }
    }
}

/// Dedup point: one merged update per character, first-seen order.
fn entry_for<'a>(updates: &'a mut Vec<CharacterUpdate>, character_id: &str) -> &'a mut CharacterUpdate {
    if let Some(pos) = updates.iter().position(|u| u.character_id == character_id) {
        return &mut updates[pos];
    }
    updates.push(CharacterUpdate::for_character(character_id));
    updates.last_mut().expect("just pushed")
}

fn join_events(detection: &EventDetection) -> String {
    detection
        .detected_events
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
