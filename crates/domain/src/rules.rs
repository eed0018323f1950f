//! Reference-rule entries: what the rule store returns and what the
//! per-turn cache holds.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store-side entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A reference entry as returned by the rule store's hybrid retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    /// Publication source (e.g. a book abbreviation), not to be confused
    /// with [`CacheSource`].
    pub source: String,
    /// Entry kind: spell, item, condition, action, effect, variantrule, …
    pub entry_type: String,
    pub content: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache-side entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a cached rule description came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    FromRuleStore,
    LlmGenerated,
}

/// One entry of a turn's rules cache, keyed by [`CacheEntry::cache_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub entry_type: String,
    pub description: String,
    pub source: CacheSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<String>,
}

impl CacheEntry {
    /// Map a store entry into the cache schema.
    pub fn from_rule(entry: &RuleEntry) -> Self {
        Self {
            name: entry.name.clone(),
            entry_type: entry.entry_type.clone(),
            description: entry.content.clone(),
            source: CacheSource::FromRuleStore,
            level: entry.level,
            school: entry.school.clone(),
            duration_text: entry.duration.clone(),
            rarity: entry.rarity.clone(),
            damage: entry.damage.clone(),
        }
    }

    /// Normalised key this entry is stored under.
    pub fn cache_key(&self) -> String {
        normalize_rule_key(&self.name)
    }
}

/// Cache keys are the lowercase rule name.
pub fn normalize_rule_key(name: &str) -> String {
    name.to_lowercase()
}
