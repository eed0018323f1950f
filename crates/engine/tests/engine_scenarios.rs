//! End-to-end scenarios through the full engine surface, with
//! deterministic fake agents standing in for the LLM collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gm_agents::{
    CombatExtractor, EffectExtractor, EventDetector, ResourceExtractor, RuleStore, TurnSummarizer,
};
use gm_domain::config::EngineConfig;
use gm_domain::error::{Error, Result};
use gm_domain::extraction::{
    CombatResult, CombatUpdate, ConditionAction, DeathSaveDelta, EffectResult, EventClass,
    EventDetection, ExtractionCommand, GameContext, ItemAction, ItemDelta, ResourceResult,
    ResourceUpdate, SpellSlotDelta,
};
use gm_domain::message::{ActionDeclaration, MessageDraft};
use gm_domain::rules::RuleEntry;
use gm_engine::Engine;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fakes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Detects event classes from obvious keywords in the narrative.
#[derive(Default)]
struct KeywordDetector {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl EventDetector for KeywordDetector {
    async fn detect_events(
        &self,
        narrative: &str,
        _game_context: Option<&GameContext>,
    ) -> Result<EventDetection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut detected = std::collections::BTreeSet::new();
        if narrative.contains("damage") {
            detected.insert(EventClass::HpChange);
        }
        if narrative.contains("casts") {
            detected.insert(EventClass::EffectApplied);
        }
        if narrative.contains("slot") || narrative.contains("drinks") {
            detected.insert(EventClass::ResourceUsage);
        }
        if narrative.contains("death save") {
            detected.insert(EventClass::StateChange);
        }
        Ok(EventDetection {
            detected_events: detected,
            confidence: 0.9,
            reasoning: Some("keyword scan".into()),
        })
    }
}

/// Reads the one damage sentence the scenarios use.
#[derive(Default)]
struct ScriptedCombat {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl CombatExtractor for ScriptedCombat {
    async fn extract(
        &self,
        narrative: &str,
        _game_context: Option<&GameContext>,
    ) -> Result<CombatResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut result = CombatResult {
            notes: Some("scripted combat read".into()),
            ..Default::default()
        };
        if narrative.contains("8 slashing damage") {
            result.character_updates.push(CombatUpdate {
                character_id: "orc".into(),
                hp_delta: Some(-8),
                damage_type: Some("slashing".into()),
                ..Default::default()
            });
        }
        Ok(result)
    }
}

#[derive(Default)]
struct ScriptedResource {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ResourceExtractor for ScriptedResource {
    async fn extract(
        &self,
        _narrative: &str,
        _game_context: Option<&GameContext>,
    ) -> Result<ResourceResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResourceResult::default())
    }
}

#[derive(Default)]
struct ScriptedEffect {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl EffectExtractor for ScriptedEffect {
    async fn extract(&self, _effect_context: &str) -> Result<EffectResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EffectResult::default())
    }
}

/// Produces a well-formed condensate echoing the turn metadata it finds
/// in the prompt.
struct TemplateSummarizer;

#[async_trait::async_trait]
impl TurnSummarizer for TemplateSummarizer {
    async fn condense(&self, prompt: &str) -> Result<String> {
        let find = |prefix: &str| {
            prompt
                .lines()
                .find_map(|line| line.strip_prefix(prefix))
                .unwrap_or("?")
                .trim()
                .to_owned()
        };
        let id = find("- Turn ID:");
        let level = find("- Turn Level:");
        Ok(format!(
            "<turn id=\"{id}\" level=\"{level}\"><action>Condensed action</action><resolution>Resolved</resolution></turn>"
        ))
    }
}

/// Always raises, for the fallback path.
struct ExplodingSummarizer;

#[async_trait::async_trait]
impl TurnSummarizer for ExplodingSummarizer {
    async fn condense(&self, _prompt: &str) -> Result<String> {
        Err(Error::Summarizer("model exploded".into()))
    }
}

/// Serves a couple of named spells and a fixed search list.
#[derive(Default)]
struct ScriptedStore {
    search_calls: AtomicUsize,
    name_calls: AtomicUsize,
}

fn spell(name: &str) -> RuleEntry {
    RuleEntry {
        name: name.into(),
        source: "PHB".into(),
        entry_type: "spell".into(),
        content: format!("{name} rules text"),
        references: vec![],
        level: Some(1),
        school: Some("enchantment".into()),
        rarity: None,
        duration: Some("Concentration, up to 1 minute".into()),
        damage: None,
    }
}

#[async_trait::async_trait]
impl RuleStore for ScriptedStore {
    async fn search(
        &self,
        _query: &str,
        limit: usize,
        _filter_type: Option<&str>,
    ) -> Result<Vec<RuleEntry>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![spell("Bless"), spell("Bane"), spell("Shield")]
            .into_iter()
            .take(limit)
            .collect())
    }

    async fn get_by_name(&self, name: &str, _entry_type: Option<&str>) -> Result<Option<RuleEntry>> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        let known = ["Bless", "Haste"];
        Ok(known
            .iter()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(|k| spell(k)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Rig {
    engine: Engine,
    combat: Arc<ScriptedCombat>,
    resource: Arc<ScriptedResource>,
    effect: Arc<ScriptedEffect>,
    store: Arc<ScriptedStore>,
}

fn rig_with_summarizer(summarizer: Arc<dyn TurnSummarizer>) -> Rig {
    let combat = Arc::new(ScriptedCombat::default());
    let resource = Arc::new(ScriptedResource::default());
    let effect = Arc::new(ScriptedEffect::default());
    let store = Arc::new(ScriptedStore::default());
    let engine = Engine::builder()
        .event_detector(Arc::new(KeywordDetector::default()))
        .combat_extractor(combat.clone())
        .resource_extractor(resource.clone())
        .effect_extractor(effect.clone())
        .summarizer(summarizer)
        .rule_store(store.clone())
        .config(EngineConfig::default())
        .build()
        .expect("engine builds");
    Rig {
        engine,
        combat,
        resource,
        effect,
        store,
    }
}

fn rig() -> Rig {
    rig_with_summarizer(Arc::new(TemplateSummarizer))
}

/// S1 opening: root turn plus the narrator's damage line.
fn attack_scene(rig: &Rig) {
    rig.engine
        .start_and_queue_turns(vec![ActionDeclaration::new("player", "I attack the orc")])
        .unwrap();
    rig.engine
        .append_messages(vec![MessageDraft::new(
            "Roll a 15, that hits; 8 slashing damage.",
            "dm",
        )])
        .unwrap();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_single_damage_extraction() {
    let rig = rig();
    attack_scene(&rig);

    let narrative = rig.engine.extractor_context();
    let snapshot = rig.engine.snapshot();
    let game = GameContext {
        turn_id: Some("1".into()),
        active_character: None,
        combat_round: None,
    };

    let result = rig
        .engine
        .extract_state_changes(&narrative, Some(&game), Some(&snapshot))
        .await;

    assert_eq!(
        result.commands,
        vec![ExtractionCommand::HpChange {
            character_id: "orc".into(),
            delta: -8,
            damage_type: Some("slashing".into()),
            is_temp_hp: false,
        }]
    );
    assert!(!result.notes.is_empty());

    rig.engine.mark_extraction_processed().unwrap();
    let leaf = rig.engine.get_current_turn().unwrap();
    assert!(leaf.unprocessed_live_in_self().is_empty());
}

#[tokio::test]
async fn s1_follow_up_extraction_is_empty() {
    let rig = rig();
    attack_scene(&rig);

    let first = rig.engine.extractor_context();
    rig.engine
        .extract_state_changes(&first, None, None)
        .await;
    rig.engine.mark_extraction_processed().unwrap();

    // No intervening appends: the projection is empty and nothing is
    // detected or extracted.
    let second = rig.engine.extractor_context();
    assert!(!second.contains("damage"));
    let result = rig.engine.extract_state_changes(&second, None, None).await;
    assert!(result.commands.is_empty());
    assert_eq!(rig.combat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s2_reaction_folds_into_parent() {
    let rig = rig();
    attack_scene(&rig);

    let ids = rig
        .engine
        .start_and_queue_turns(vec![ActionDeclaration::new("orc", "Shield!")])
        .unwrap();
    assert_eq!(ids, vec!["1.1"]);
    rig.engine
        .append_messages(vec![MessageDraft::new("AC +5 until next turn.", "dm")])
        .unwrap();

    let result = rig.engine.end_turn().await.unwrap();
    assert!(result.embedded_in_parent);
    assert_eq!(result.turn_id, "1.1");
    assert_eq!(result.turn_level, 1);

    let leaf = rig.engine.get_current_turn().unwrap();
    assert_eq!(leaf.turn_id, "1");

    let folded: Vec<_> = leaf
        .messages
        .iter()
        .flat_map(|item| item.messages())
        .filter(|m| m.is_subturn_result())
        .collect();
    assert_eq!(folded.len(), 1);
    assert!(folded[0].content.contains("id=\"1.1\""));
    assert!(folded[0].content.contains("level=\"1\""));
    assert!(folded[0].processed_for_extraction);
}

#[tokio::test]
async fn s3_sibling_cache_isolation() {
    let rig = rig();
    rig.engine
        .start_and_queue_turns(vec![ActionDeclaration::new("player", "We split up")])
        .unwrap();
    let ids = rig
        .engine
        .start_and_queue_turns(vec![
            ActionDeclaration::new("alice", "I hold the line"),
            ActionDeclaration::new("bob", "I quaff haste"),
        ])
        .unwrap();
    assert_eq!(ids, vec!["1.1", "1.2"]);
    assert_eq!(rig.engine.get_current_turn().unwrap().turn_id, "1.2");

    // Tool call from within "1.2" caches haste there.
    let out = rig.engine.query_rules_database("Haste", Some(3)).await;
    assert!(out.starts_with("Haste (Spell"));

    // "1.2" ends; the queued sibling "1.1" is entered.
    let result = rig.engine.end_turn().await.unwrap();
    assert!(result.advanced_to_sibling);
    assert_eq!(rig.engine.get_current_turn().unwrap().turn_id, "1.1");

    // The merged cache seen from "1.1" must not contain the sibling's
    // lookup.
    let snapshot = rig.engine.snapshot();
    let merged = gm_turns::cache::merge_along_path(&snapshot.active_turns_by_level);
    assert!(!merged.contains_key("haste"));
}

#[tokio::test]
async fn s4_event_gated_dispatch() {
    let rig = rig();
    attack_scene(&rig);

    let narrative = rig.engine.extractor_context();
    assert!(narrative.contains("damage"));
    let snapshot = rig.engine.snapshot();
    rig.engine
        .extract_state_changes(&narrative, None, Some(&snapshot))
        .await;

    assert_eq!(rig.combat.calls.load(Ordering::SeqCst), 1);
    assert_eq!(rig.resource.calls.load(Ordering::SeqCst), 0);
    assert_eq!(rig.effect.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn s5_summarizer_failure_still_folds() {
    let rig = rig_with_summarizer(Arc::new(ExplodingSummarizer));
    attack_scene(&rig);
    rig.engine
        .start_and_queue_turns(vec![ActionDeclaration::new("orc", "Shield!")])
        .unwrap();

    let result = rig.engine.end_turn().await.unwrap();
    assert!(result.embedded_in_parent);

    let leaf = rig.engine.get_current_turn().unwrap();
    let folded: Vec<_> = leaf
        .messages
        .iter()
        .flat_map(|item| item.messages())
        .filter(|m| m.is_subturn_result())
        .collect();
    assert_eq!(folded.len(), 1);
    assert!(folded[0]
        .content
        .starts_with("<turn id=\"1.1\" level=\"1\"><action>Failed to condense"));
}

#[tokio::test]
async fn s6_short_query_tool_path() {
    let rig = rig();
    attack_scene(&rig);

    let out = rig.engine.query_rules_database("Bless", Some(3)).await;
    assert!(out.starts_with("Bless (Spell, Level 1)"));
    assert!(!out.contains("---"));
    assert_eq!(rig.store.name_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rig.store.search_calls.load(Ordering::SeqCst), 0);

    let leaf = rig.engine.get_current_turn().unwrap();
    assert!(leaf.rules_cache.contains_key("bless"));

    // A long query goes through hybrid search and may cache several
    // entries.
    let long_query =
        "what happens when a blessed creature that is concentrating on a spell takes damage during combat";
    assert!(long_query.split_whitespace().count() >= 15);
    let out = rig.engine.query_rules_database(long_query, Some(3)).await;
    assert_eq!(rig.store.search_calls.load(Ordering::SeqCst), 1);
    assert!(out.contains("\n\n---\n\n"));

    let leaf = rig.engine.get_current_turn().unwrap();
    assert!(leaf.rules_cache.len() > 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Property checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Command-ordering bands, mirrored from the contract.
fn band(command: &ExtractionCommand) -> u8 {
    match command {
        ExtractionCommand::HpChange { .. } => 0,
        ExtractionCommand::ConditionChange { .. }
        | ExtractionCommand::EffectChange { .. }
        | ExtractionCommand::CombatStatChange { .. } => 1,
        ExtractionCommand::SpellSlotChange { .. }
        | ExtractionCommand::ItemChange { .. }
        | ExtractionCommand::HitDiceChange { .. }
        | ExtractionCommand::AbilityChange { .. } => 2,
        ExtractionCommand::DeathSaveChange { .. } => 3,
        ExtractionCommand::NewCharacter { .. } => 4,
    }
}

#[tokio::test]
async fn command_ordering_across_characters() {
    // A richer pair of extractors producing every band for two
    // characters.
    struct FullCombat;

    #[async_trait::async_trait]
    impl CombatExtractor for FullCombat {
        async fn extract(
            &self,
            _narrative: &str,
            _game_context: Option<&GameContext>,
        ) -> Result<CombatResult> {
            Ok(CombatResult {
                character_updates: vec![
                    CombatUpdate {
                        character_id: "bob".into(),
                        hp_delta: Some(-12),
                        add_conditions: vec!["unconscious".into()],
                        death_saves: Some(DeathSaveDelta {
                            failures: 1,
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    CombatUpdate {
                        character_id: "alice".into(),
                        hp_delta: Some(-3),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            })
        }
    }

    struct FullResource;

    #[async_trait::async_trait]
    impl ResourceExtractor for FullResource {
        async fn extract(
            &self,
            _narrative: &str,
            _game_context: Option<&GameContext>,
        ) -> Result<ResourceResult> {
            Ok(ResourceResult {
                character_updates: vec![ResourceUpdate {
                    character_id: "bob".into(),
                    spell_slot_changes: vec![SpellSlotDelta {
                        level: 2,
                        action: gm_domain::extraction::ExpendAction::Use,
                        count: 1,
                    }],
                    inventory_changes: vec![ItemDelta {
                        name: "healing potion".into(),
                        action: ItemAction::Use,
                        quantity: 1,
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            })
        }
    }

    let engine = Engine::builder()
        .event_detector(Arc::new(KeywordDetector::default()))
        .combat_extractor(Arc::new(FullCombat))
        .resource_extractor(Arc::new(FullResource))
        .effect_extractor(Arc::new(ScriptedEffect::default()))
        .summarizer(Arc::new(TemplateSummarizer))
        .rule_store(Arc::new(ScriptedStore::default()))
        .build()
        .unwrap();

    let result = engine
        .extract_state_changes("everyone takes damage, bob drinks a slot potion", None, None)
        .await;

    // Bands never decrease, and within a band character ids ascend.
    let bands: Vec<u8> = result.commands.iter().map(band).collect();
    let mut sorted = bands.clone();
    sorted.sort();
    assert_eq!(bands, sorted, "bands must be monotonic: {bands:?}");

    for window in result.commands.windows(2) {
        if band(&window[0]) == band(&window[1]) {
            assert!(
                window[0].character_id() <= window[1].character_id(),
                "character order within band"
            );
        }
    }

    // Per character: HP precedes conditions precedes resources precedes
    // death saves.
    let bob_bands: Vec<u8> = result
        .commands
        .iter()
        .filter(|c| c.character_id() == "bob")
        .map(band)
        .collect();
    assert_eq!(bob_bands, vec![0, 1, 2, 2, 3]);

    // Condition commands carry the expected payloads.
    assert!(result.commands.iter().any(|c| matches!(
        c,
        ExtractionCommand::ConditionChange {
            action: ConditionAction::Add,
            condition_name,
            ..
        } if condition_name == "unconscious"
    )));
}

#[tokio::test]
async fn new_messages_highlighting_round_trip() {
    let rig = rig();
    attack_scene(&rig);

    rig.engine
        .append_messages(vec![
            MessageDraft::new("I dodge behind the pillar", "player"),
            MessageDraft::new("I ready my bow", "player"),
        ])
        .unwrap();

    let ctx = rig.engine.dm_context();
    let new_block = ctx.new_messages_xml.as_deref().expect("new group listed");
    assert!(new_block.contains("I dodge behind the pillar"));
    assert!(!ctx.context_xml.contains("I dodge behind the pillar"));

    rig.engine.mark_dm_saw_new_messages().unwrap();
    let ctx = rig.engine.dm_context();
    assert!(ctx.new_messages_xml.is_none());
    assert!(ctx.context_xml.contains("I dodge behind the pillar"));
}

#[tokio::test]
async fn stats_track_turn_lifecycle() {
    let rig = rig();
    attack_scene(&rig);
    rig.engine
        .start_and_queue_turns(vec![ActionDeclaration::new("orc", "Shield!")])
        .unwrap();

    let stats = rig.engine.stats();
    assert_eq!(stats.active_turn_id.as_deref(), Some("1.1"));
    assert_eq!(stats.open_turns, 2);
    assert_eq!(stats.total_turns, 2);
    assert_eq!(stats.extractions_run, 0);

    rig.engine.end_turn().await.unwrap();
    rig.engine
        .extract_state_changes("<turn_log/>", None, None)
        .await;

    let stats = rig.engine.stats();
    assert_eq!(stats.active_turn_id.as_deref(), Some("1"));
    assert_eq!(stats.open_turns, 1);
    assert_eq!(stats.extractions_run, 1);
}

#[tokio::test]
async fn end_turn_without_active_turn_is_an_error() {
    let rig = rig();
    let err = rig.engine.end_turn().await.unwrap_err();
    assert!(matches!(err, Error::NoActiveTurn));
}
