//! Rules-cache merge and filter along the active path.
//!
//! Each turn carries its own small cache of reference rules the narrator
//! queried while that turn was live. Consumers never read a single
//! turn's cache directly: they merge the caches of every turn on the
//! active path, root to leaf, so children inherit what their lineage
//! looked up while siblings stay invisible to each other.

use std::collections::BTreeMap;

use gm_domain::rules::CacheEntry;
use gm_domain::trace::TraceEvent;

use crate::context::TurnContext;

/// Merge per-turn caches root-to-leaf; a deeper turn's entry overwrites
/// an ancestor's entry under the same key.
pub fn merge_along_path(active_turns_by_level: &[TurnContext]) -> BTreeMap<String, CacheEntry> {
    let mut merged = BTreeMap::new();
    for turn in active_turns_by_level {
        for (key, entry) in &turn.rules_cache {
            merged.insert(key.clone(), entry.clone());
        }
    }
    merged
}

/// Keep only entries whose `entry_type` is in `allowed_types`.
pub fn filter_by_types(
    cache: &BTreeMap<String, CacheEntry>,
    allowed_types: &[&str],
) -> BTreeMap<String, CacheEntry> {
    cache
        .iter()
        .filter(|(_, entry)| allowed_types.contains(&entry.entry_type.as_str()))
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect()
}

/// Store an entry in a turn's cache under its normalised key,
/// overwriting any previous value.
pub fn add_entry(entry: CacheEntry, turn: &mut TurnContext) {
    let key = entry.cache_key();
    TraceEvent::RuleCached {
        turn_id: turn.turn_id.clone(),
        cache_key: key.clone(),
        entry_type: entry.entry_type.clone(),
    }
    .emit();
    turn.rules_cache.insert(key, entry);
}
