//! Effect-agent projection: the narrative plus the reference rules its
//! lineage has already looked up.

use gm_domain::extraction::GameContext;
use gm_domain::rules::CacheEntry;
use gm_turns::{cache, TurnContext};

/// Entry types the effect agent cares about.
const EFFECT_TYPES: &[&str] = &["effect", "condition", "spell"];

/// Builds the effect extractor's context.
#[derive(Debug, Default)]
pub struct EffectContextBuilder;

impl EffectContextBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Three sections: the narrative to extract from, the merged
    /// effect-related rules cache of the active path, and game metadata.
    pub fn build(
        &self,
        narrative: &str,
        active_turns_by_level: &[TurnContext],
        game_context: Option<&GameContext>,
    ) -> String {
        let mut parts = vec!["=== NARRATIVE ===".to_owned(), narrative.to_owned(), String::new()];

        let merged = cache::merge_along_path(active_turns_by_level);
        let effects = cache::filter_by_types(&merged, EFFECT_TYPES);

        parts.push("=== KNOWN EFFECTS ===".to_owned());
        if effects.is_empty() {
            parts.push(
                "No effects have been queried from the rules database in this turn.".to_owned(),
            );
            parts.push(String::new());
        } else {
            parts.push(
                "The following effects/spells/conditions have been referenced in this turn:"
                    .to_owned(),
            );
            parts.push(String::new());
            for entry in effects.values() {
                parts.push(format_cached_rule(entry));
                parts.push(String::new());
            }
        }

        if let Some(game) = game_context {
            parts.push("=== GAME CONTEXT ===".to_owned());
            if let Some(turn_id) = &game.turn_id {
                parts.push(format!("Turn ID: {turn_id}"));
            }
            if let Some(character) = &game.active_character {
                parts.push(format!("Active Character: {character}"));
            }
            if let Some(round) = game.combat_round {
                parts.push(format!("Combat Round: {round}"));
            }
            parts.push(String::new());
        }

        parts.join("\n")
    }
}

/// `**Name** (Type, Level N)` header followed by the description and any
/// duration/school/damage trailers.
fn format_cached_rule(entry: &CacheEntry) -> String {
    let mut header_parts = vec![capitalize(&entry.entry_type)];
    if let Some(level) = entry.level {
        header_parts.push(format!("Level {level}"));
    }
    if let Some(rarity) = &entry.rarity {
        header_parts.push(capitalize(rarity));
    }

    let mut lines = vec![
        format!("**{}** ({})", entry.name, header_parts.join(", ")),
        entry.description.clone(),
    ];
    if let Some(duration) = &entry.duration_text {
        lines.push(format!("Duration: {duration}"));
    }
    if let Some(school) = &entry.school {
        lines.push(format!("School: {}", capitalize(school)));
    }
    if let Some(damage) = &entry.damage {
        lines.push(format!("Damage: {damage}"));
    }
    lines.join("\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_domain::rules::CacheSource;

    fn entry(name: &str, entry_type: &str) -> CacheEntry {
        CacheEntry {
            name: name.into(),
            entry_type: entry_type.into(),
            description: format!("{name} description"),
            source: CacheSource::FromRuleStore,
            level: None,
            school: None,
            duration_text: None,
            rarity: None,
            damage: None,
        }
    }

    #[test]
    fn narrative_always_leads() {
        let ctx = EffectContextBuilder::new().build("The cleric casts Bless.", &[], None);
        assert!(ctx.starts_with("=== NARRATIVE ===\nThe cleric casts Bless."));
    }

    #[test]
    fn empty_cache_states_so() {
        let ctx = EffectContextBuilder::new().build("text", &[], None);
        assert!(ctx.contains("=== KNOWN EFFECTS ==="));
        assert!(ctx.contains("No effects have been queried"));
    }

    #[test]
    fn cached_effects_render_filtered_by_type() {
        let mut turn = TurnContext::new("1", None);
        cache::add_entry(entry("Bless", "spell"), &mut turn);
        cache::add_entry(entry("Longsword", "item"), &mut turn);
        cache::add_entry(entry("Poisoned", "condition"), &mut turn);

        let ctx = EffectContextBuilder::new().build("text", std::slice::from_ref(&turn), None);
        assert!(ctx.contains("**Bless** (Spell)"));
        assert!(ctx.contains("**Poisoned** (Condition)"));
        assert!(!ctx.contains("Longsword"));
    }

    #[test]
    fn formatted_rule_includes_trailers() {
        let mut bless = entry("Bless", "spell");
        bless.level = Some(1);
        bless.duration_text = Some("Concentration, up to 1 minute".into());
        bless.school = Some("enchantment".into());

        let formatted = format_cached_rule(&bless);
        assert!(formatted.starts_with("**Bless** (Spell, Level 1)"));
        assert!(formatted.contains("Duration: Concentration, up to 1 minute"));
        assert!(formatted.contains("School: Enchantment"));
    }

    #[test]
    fn game_context_section_lists_known_fields() {
        let game = GameContext {
            turn_id: Some("1.2".into()),
            active_character: Some("Alice".into()),
            combat_round: Some(3),
        };
        let ctx = EffectContextBuilder::new().build("text", &[], Some(&game));
        assert!(ctx.contains("=== GAME CONTEXT ==="));
        assert!(ctx.contains("Turn ID: 1.2"));
        assert!(ctx.contains("Active Character: Alice"));
        assert!(ctx.contains("Combat Round: 3"));
    }
}
