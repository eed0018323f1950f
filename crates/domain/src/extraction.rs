//! State-extraction data model.
//!
//! The orchestrator's world: event classes detected by the cheap
//! classifier, the typed envelopes each specialist extractor returns,
//! the merged per-character update, and the flat [`ExtractionCommand`]
//! list handed to whoever applies changes to the character store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classes of state change the detector can flag in a narrative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    /// Damage, healing, temporary HP.
    HpChange,
    /// Conditions, buffs, debuffs, spell effects.
    EffectApplied,
    /// Spell slots, items, hit dice.
    ResourceUsage,
    /// Death saves, rests, other status transitions.
    StateChange,
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventClass::HpChange => "hp_change",
            EventClass::EffectApplied => "effect_applied",
            EventClass::ResourceUsage => "resource_usage",
            EventClass::StateChange => "state_change",
        };
        f.write_str(name)
    }
}

/// Result of the detection phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDetection {
    #[serde(default)]
    pub detected_events: std::collections::BTreeSet<EventClass>,
    /// Detector self-confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl EventDetection {
    /// The fallback used when the detector itself fails: detect nothing.
    pub fn empty() -> Self {
        Self {
            detected_events: Default::default(),
            confidence: 0.0,
            reasoning: None,
        }
    }

    pub fn contains(&self, class: EventClass) -> bool {
        self.detected_events.contains(&class)
    }
}

/// Optional per-extraction metadata passed through to the agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combat_round: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared action tags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectAction {
    Add,
    Remove,
}

/// Spending or regaining a countable resource (slots, hit dice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpendAction {
    Use,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Add,
    Remove,
    Use,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathSaveResult {
    Success,
    Failure,
    Reset,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specialist result envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Death-save tally delta within a combat update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathSaveDelta {
    #[serde(default)]
    pub successes: u8,
    #[serde(default)]
    pub failures: u8,
    #[serde(default)]
    pub reset: bool,
}

/// A temporary combat-stat modifier (AC, speed, initiative, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatStatDelta {
    pub stat: String,
    pub value: i32,
    #[serde(default = "d_true")]
    pub temporary: bool,
}

/// Per-character output of the combat extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombatUpdate {
    pub character_id: String,
    /// Signed HP change: negative for damage, positive for healing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp_delta: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_hp: Option<i32>,
    #[serde(default)]
    pub add_conditions: Vec<String>,
    #[serde(default)]
    pub remove_conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_saves: Option<DeathSaveDelta>,
    #[serde(default)]
    pub combat_stat_changes: Vec<CombatStatDelta>,
}

/// Envelope returned by the combat extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombatResult {
    #[serde(default)]
    pub character_updates: Vec<CombatUpdate>,
    #[serde(default)]
    pub combat_info: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellSlotDelta {
    /// Slot level, 1–9.
    pub level: u8,
    pub action: ExpendAction,
    #[serde(default = "d_one_u8")]
    pub count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDelta {
    pub name: String,
    pub action: ItemAction,
    #[serde(default = "d_one_u32")]
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitDiceDelta {
    pub action: ExpendAction,
    pub count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityDelta {
    pub ability: String,
    pub modifier: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Per-character output of the resource extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub character_id: String,
    #[serde(default)]
    pub spell_slot_changes: Vec<SpellSlotDelta>,
    #[serde(default)]
    pub inventory_changes: Vec<ItemDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_dice_changes: Option<HitDiceDelta>,
    #[serde(default)]
    pub ability_changes: Vec<AbilityDelta>,
}

/// A character first mentioned in the narrative (summoned wolf, named
/// bandit, …) that the character store does not know yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCharacter {
    pub identifier: String,
    /// Creature kind (humanoid, beast, undead, …).
    pub kind: String,
    #[serde(default)]
    pub basic_stats: BTreeMap<String, serde_json::Value>,
}

/// Envelope returned by the resource extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceResult {
    #[serde(default)]
    pub character_updates: Vec<ResourceUpdate>,
    #[serde(default)]
    pub new_characters: Vec<NewCharacter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectApplication {
    pub effect_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Per-character output of the effect extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectUpdate {
    pub character_id: String,
    #[serde(default)]
    pub add_effects: Vec<EffectApplication>,
    #[serde(default)]
    pub remove_effects: Vec<EffectApplication>,
}

/// Envelope returned by the effect extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectResult {
    #[serde(default)]
    pub character_updates: Vec<EffectUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merged character update
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All changes to one character, merged across extractors.
///
/// Extractors are partitioned by field group (HP from combat, slots and
/// inventory from resource, effects from the effect agent) so in
/// practice merging never conflicts; when it does, later non-nil values
/// overwrite and list fields extend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterUpdate {
    pub character_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp_delta: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_hp: Option<i32>,
    #[serde(default)]
    pub add_conditions: Vec<String>,
    #[serde(default)]
    pub remove_conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_saves: Option<DeathSaveDelta>,
    #[serde(default)]
    pub combat_stat_changes: Vec<CombatStatDelta>,
    #[serde(default)]
    pub spell_slot_changes: Vec<SpellSlotDelta>,
    #[serde(default)]
    pub inventory_changes: Vec<ItemDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_dice_changes: Option<HitDiceDelta>,
    #[serde(default)]
    pub ability_changes: Vec<AbilityDelta>,
    #[serde(default)]
    pub add_effects: Vec<EffectApplication>,
    #[serde(default)]
    pub remove_effects: Vec<EffectApplication>,
}

impl CharacterUpdate {
    pub fn for_character(character_id: impl Into<String>) -> Self {
        Self {
            character_id: character_id.into(),
            ..Default::default()
        }
    }

    pub fn merge_combat(&mut self, update: CombatUpdate) {
        if update.hp_delta.is_some() {
            self.hp_delta = update.hp_delta;
        }
        if update.damage_type.is_some() {
            self.damage_type = update.damage_type;
        }
        if update.temp_hp.is_some() {
            self.temp_hp = update.temp_hp;
        }
        if update.death_saves.is_some() {
            self.death_saves = update.death_saves;
        }
        self.add_conditions.extend(update.add_conditions);
        self.remove_conditions.extend(update.remove_conditions);
        self.combat_stat_changes.extend(update.combat_stat_changes);
    }

    pub fn merge_resource(&mut self, update: ResourceUpdate) {
        if update.hit_dice_changes.is_some() {
            self.hit_dice_changes = update.hit_dice_changes;
        }
        self.spell_slot_changes.extend(update.spell_slot_changes);
        self.inventory_changes.extend(update.inventory_changes);
        self.ability_changes.extend(update.ability_changes);
    }

    pub fn merge_effect(&mut self, update: EffectUpdate) {
        self.add_effects.extend(update.add_effects);
        self.remove_effects.extend(update.remove_effects);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One structured change for the caller to apply to its character store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ExtractionCommand {
    HpChange {
        character_id: String,
        /// Signed: negative for damage, positive for healing.
        delta: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        damage_type: Option<String>,
        #[serde(default)]
        is_temp_hp: bool,
    },
    ConditionChange {
        character_id: String,
        action: ConditionAction,
        condition_name: String,
    },
    EffectChange {
        character_id: String,
        action: EffectAction,
        effect_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<String>,
    },
    CombatStatChange {
        character_id: String,
        stat: String,
        value: i32,
        temporary: bool,
    },
    SpellSlotChange {
        character_id: String,
        level: u8,
        action: ExpendAction,
        count: u8,
    },
    ItemChange {
        character_id: String,
        action: ItemAction,
        item_name: String,
        quantity: u32,
    },
    HitDiceChange {
        character_id: String,
        action: ExpendAction,
        count: u8,
    },
    AbilityChange {
        character_id: String,
        ability: String,
        modifier: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<String>,
    },
    DeathSaveChange {
        character_id: String,
        result: DeathSaveResult,
        /// Number of saves added; 0 for a reset.
        count: u8,
    },
    NewCharacter {
        identifier: String,
        kind: String,
        #[serde(default)]
        basic_stats: BTreeMap<String, serde_json::Value>,
    },
}

impl ExtractionCommand {
    /// Ordering band: downstream appliers must see damage before the
    /// conditions that depended on it, resources after both, and death
    /// saves last among per-character changes.
    fn band(&self) -> u8 {
        match self {
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

    /// The character this command targets (the identifier, for new
    /// characters).
    pub fn character_id(&self) -> &str {
        match self {
            ExtractionCommand::HpChange { character_id, .. }
            | ExtractionCommand::ConditionChange { character_id, .. }
            | ExtractionCommand::EffectChange { character_id, .. }
            | ExtractionCommand::CombatStatChange { character_id, .. }
            | ExtractionCommand::SpellSlotChange { character_id, .. }
            | ExtractionCommand::ItemChange { character_id, .. }
            | ExtractionCommand::HitDiceChange { character_id, .. }
            | ExtractionCommand::AbilityChange { character_id, .. }
            | ExtractionCommand::DeathSaveChange { character_id, .. } => character_id,
            ExtractionCommand::NewCharacter { identifier, .. } => identifier,
        }
    }
}

/// Flatten merged character updates into the ordered command list.
///
/// Ordering: HP band, then conditions/effects/stat modifiers, then
/// resources, then death saves, then new characters; within a band,
/// ascending character id, then insertion order (the sort is stable).
pub fn flatten_commands(
    updates: &[CharacterUpdate],
    new_characters: &[NewCharacter],
) -> Vec<ExtractionCommand> {
    let mut commands = Vec::new();

    for update in updates {
        let id = &update.character_id;

        if let Some(delta) = update.hp_delta {
            commands.push(ExtractionCommand::HpChange {
                character_id: id.clone(),
                delta,
                damage_type: update.damage_type.clone(),
                is_temp_hp: false,
            });
        }
        if let Some(temp) = update.temp_hp {
            commands.push(ExtractionCommand::HpChange {
                character_id: id.clone(),
                delta: temp,
                damage_type: None,
                is_temp_hp: true,
            });
        }

        for condition in &update.add_conditions {
            commands.push(ExtractionCommand::ConditionChange {
                character_id: id.clone(),
                action: ConditionAction::Add,
                condition_name: condition.clone(),
            });
        }
        for condition in &update.remove_conditions {
            commands.push(ExtractionCommand::ConditionChange {
                character_id: id.clone(),
                action: ConditionAction::Remove,
                condition_name: condition.clone(),
            });
        }
        for effect in &update.add_effects {
            commands.push(ExtractionCommand::EffectChange {
                character_id: id.clone(),
                action: EffectAction::Add,
                effect_name: effect.effect_name.clone(),
                duration: effect.duration.clone(),
            });
        }
        for effect in &update.remove_effects {
            commands.push(ExtractionCommand::EffectChange {
                character_id: id.clone(),
                action: EffectAction::Remove,
                effect_name: effect.effect_name.clone(),
                duration: effect.duration.clone(),
            });
        }
        for stat in &update.combat_stat_changes {
            commands.push(ExtractionCommand::CombatStatChange {
                character_id: id.clone(),
                stat: stat.stat.clone(),
                value: stat.value,
                temporary: stat.temporary,
            });
        }

        for slot in &update.spell_slot_changes {
            commands.push(ExtractionCommand::SpellSlotChange {
                character_id: id.clone(),
                level: slot.level,
                action: slot.action,
                count: slot.count,
            });
        }
        for item in &update.inventory_changes {
            commands.push(ExtractionCommand::ItemChange {
                character_id: id.clone(),
                action: item.action,
                item_name: item.name.clone(),
                quantity: item.quantity,
            });
        }
        if let Some(dice) = &update.hit_dice_changes {
            commands.push(ExtractionCommand::HitDiceChange {
                character_id: id.clone(),
                action: dice.action,
                count: dice.count,
            });
        }
        for ability in &update.ability_changes {
            commands.push(ExtractionCommand::AbilityChange {
                character_id: id.clone(),
                ability: ability.ability.clone(),
                modifier: ability.modifier,
                duration: ability.duration.clone(),
            });
        }

        if let Some(saves) = &update.death_saves {
            if saves.reset {
                commands.push(ExtractionCommand::DeathSaveChange {
                    character_id: id.clone(),
                    result: DeathSaveResult::Reset,
                    count: 0,
                });
            }
            if saves.successes > 0 {
                commands.push(ExtractionCommand::DeathSaveChange {
                    character_id: id.clone(),
                    result: DeathSaveResult::Success,
                    count: saves.successes,
                });
            }
            if saves.failures > 0 {
                commands.push(ExtractionCommand::DeathSaveChange {
                    character_id: id.clone(),
                    result: DeathSaveResult::Failure,
                    count: saves.failures,
                });
            }
        }
    }

    for character in new_characters {
        commands.push(ExtractionCommand::NewCharacter {
            identifier: character.identifier.clone(),
            kind: character.kind.clone(),
            basic_stats: character.basic_stats.clone(),
        });
    }

    // Stable, so insertion order breaks ties within (band, character).
    commands.sort_by(|a, b| {
        a.band()
            .cmp(&b.band())
            .then_with(|| a.character_id().cmp(b.character_id()))
    });

    commands
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extraction result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Final output of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub commands: Vec<ExtractionCommand>,
    #[serde(default)]
    pub new_characters: Vec<NewCharacter>,
    #[serde(default)]
    pub combat_info: BTreeMap<String, serde_json::Value>,
    /// Always populated: detected events, per-extractor notes, failures.
    pub notes: String,
}

impl ExtractionResult {
    pub fn empty(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            ..Default::default()
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_one_u8() -> u8 {
    1
}
fn d_one_u32() -> u32 {
    1
}
