//! The `query_rules_database` tool.
//!
//! The narrator calls this mid-reasoning to look up spells, items,
//! conditions, and rules text. Short queries try an exact-name lookup
//! before falling back to hybrid search. Every returned rule is cached
//! on the active turn so downstream extraction agents see what the
//! narrator saw.
//!
//! Because the call happens inside an LLM reasoning step, problems are
//! reported as strings, never as errors. The manager lock is taken
//! briefly before and after the store call, never across it.

use std::sync::Arc;

use parking_lot::Mutex;

use gm_agents::RuleStore;
use gm_domain::config::RulesToolConfig;
use gm_domain::rules::CacheEntry;
use gm_domain::trace::TraceEvent;
use gm_turns::TurnManager;

/// Separator between results in a multi-rule response.
const RESULT_SEPARATOR: &str = "\n\n---\n\n";

/// Narrator-facing rules lookup with cache side effects.
pub struct RulesQueryTool {
    store: Arc<dyn RuleStore>,
    config: RulesToolConfig,
}

impl RulesQueryTool {
    pub fn new(store: Arc<dyn RuleStore>, config: RulesToolConfig) -> Self {
        Self { store, config }
    }

    /// Look up rules for `query`, caching every hit on the active turn.
    ///
    /// `limit` is clamped to `[1, max_limit]`; `None` uses the default.
    pub async fn query_rules_database(
        &self,
        manager: &Mutex<TurnManager>,
        query: &str,
        limit: Option<usize>,
    ) -> String {
        let limit = limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);

        // Probe for an active turn up front: without one there is
        // nowhere to cache and the tool must not touch the store.
        if manager.lock().current_turn_id().is_none() {
            return "Error: No active turn to cache results.".to_owned();
        }

        let query_words = query.split_whitespace().count();

        // Short queries: try an exact-name lookup first.
        if query_words <= self.config.exact_match_max_words {
            match self.store.get_by_name(query, None).await {
                Ok(Some(rule)) => {
                    let entry = CacheEntry::from_rule(&rule);
                    if let Err(err) = manager.lock().cache_rule_on_active(entry.clone()) {
                        tracing::warn!(error = %err, "active turn vanished mid-lookup");
                        return "Error: No active turn to cache results.".to_owned();
                    }
                    TraceEvent::RulesQueried {
                        query_words,
                        exact_match: true,
                        results: 1,
                    }
                    .emit();
                    return format_rule_for_dm(&entry);
                }
                Ok(None) => {}
                Err(err) => {
                    // Treat a failed lookup like a miss; hybrid search
                    // may still succeed.
                    tracing::warn!(error = %err, "exact-name lookup failed");
                }
            }
        }

        let results = match self.store.search(query, limit, None).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(error = %err, "rules search failed");
                return format!("No rules found matching '{query}'");
            }
        };

        if results.is_empty() {
            return format!("No rules found matching '{query}'");
        }

        let entries: Vec<CacheEntry> = results.iter().map(CacheEntry::from_rule).collect();
        {
            let mut manager = manager.lock();
            for entry in &entries {
                if let Err(err) = manager.cache_rule_on_active(entry.clone()) {
                    tracing::warn!(error = %err, "active turn vanished mid-search");
                    return "Error: No active turn to cache results.".to_owned();
                }
            }
        }

        TraceEvent::RulesQueried {
            query_words,
            exact_match: false,
            results: entries.len(),
        }
        .emit();

        entries
            .iter()
            .map(format_rule_for_dm)
            .collect::<Vec<_>>()
            .join(RESULT_SEPARATOR)
    }
}

/// Human-readable rendering of one rule for the narrator.
fn format_rule_for_dm(entry: &CacheEntry) -> String {
    let mut header_parts = vec![capitalize(&entry.entry_type)];
    if let Some(level) = entry.level {
        header_parts.push(format!("Level {level}"));
    }
    if let Some(rarity) = &entry.rarity {
        header_parts.push(capitalize(rarity));
    }
    let header = format!("{} ({})", entry.name, header_parts.join(", "));

    let mut lines = vec![header.clone(), "=".repeat(header.len()), entry.description.clone()];
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
