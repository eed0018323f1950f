//! Typed engine configuration.
//!
//! Loading is the caller's concern; these structs only fix the shape and
//! the defaults.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub rules_tool: RulesToolConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Deadline for the event-detection phase.
    #[serde(default = "d_15000")]
    pub detector_timeout_ms: u64,
    /// Per-specialist deadline; a timed-out specialist is cancelled and
    /// contributes nothing but a note.
    #[serde(default = "d_30000")]
    pub specialist_timeout_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            detector_timeout_ms: 15_000,
            specialist_timeout_ms: 30_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rules-query tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesToolConfig {
    /// Result count when the narrator does not pass a limit.
    #[serde(default = "d_3")]
    pub default_limit: usize,
    /// Hard cap on the result count.
    #[serde(default = "d_10")]
    pub max_limit: usize,
    /// Queries with at most this many whitespace-separated tokens try an
    /// exact-name lookup before falling back to hybrid search.
    #[serde(default = "d_10")]
    pub exact_match_max_words: usize,
}

impl Default for RulesToolConfig {
    fn default() -> Self {
        Self {
            default_limit: 3,
            max_limit: 10,
            exact_match_max_words: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Narrator history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Trimming starts once the retained history exceeds this.
    #[serde(default = "d_10000")]
    pub max_tokens: usize,
    /// Trimming keeps roughly this many tokens of recent history.
    #[serde(default = "d_5000")]
    pub min_tokens: usize,
    /// Share of the budget the accumulated summary may occupy before a
    /// warning is logged.
    #[serde(default = "d_ratio")]
    pub max_summary_ratio: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10_000,
            min_tokens: 5_000,
            max_summary_ratio: 0.3,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_15000() -> u64 {
    15_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_3() -> usize {
    3
}
fn d_10() -> usize {
    10
}
fn d_10000() -> usize {
    10_000
}
fn d_5000() -> usize {
    5_000
}
fn d_ratio() -> f64 {
    0.3
}
