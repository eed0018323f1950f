//! Token-managed narrator conversation history.
//!
//! The turn tree carries the in-flight structure of the session; this
//! processor carries the flat prose history of narrator exchanges across
//! completed turns. When the retained lines exceed the token budget, the
//! oldest span is condensed into an accumulated summary block and only
//! recent lines stay verbatim.

use serde::{Deserialize, Serialize};

use gm_agents::HistorySummarizer;
use gm_domain::config::HistoryConfig;
use gm_domain::message::Speaker;

/// Rough chars-per-token multiplier for entries without a real count.
const CHARS_PER_TOKEN: usize = 4;

/// Floor for the content budget when the summary has eaten most of it.
const MIN_CONTENT_MAX: usize = 1_000;
const MIN_CONTENT_MIN: usize = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line of narrator conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub speaker: Speaker,
    pub content: String,
    /// Real token count from the provider, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
}

impl HistoryEntry {
    pub fn new(speaker: impl Into<Speaker>, content: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Reported token count, or a character-based estimate.
    fn token_estimate(&self) -> usize {
        self.tokens.unwrap_or(self.content.len() / CHARS_PER_TOKEN)
    }
}

/// Memory-usage digest of the processor.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub entry_count: usize,
    pub entry_tokens: usize,
    pub summary_tokens: usize,
    pub effective_max_tokens: usize,
    pub effective_min_tokens: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token-bounded history with an accumulated rolling summary.
pub struct HistoryProcessor {
    config: HistoryConfig,
    entries: Vec<HistoryEntry>,
    summary: Option<String>,
    summary_tokens: usize,
}

impl HistoryProcessor {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            summary: None,
            summary_tokens: 0,
        }
    }

    /// Record one exchange line.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// The accumulated summary block, if any trimming has happened.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Produce the history for the next narrator call: the summary block
    /// (if any) followed by retained entries, trimming first when over
    /// budget.
    ///
    /// Trimming condenses the oldest span (together with the previous
    /// summary) through `summarizer`; if that fails, nothing is dropped
    /// and the full history is returned, so a flaky summarizer degrades
    /// to a longer prompt rather than lost context.
    pub async fn history(
        &mut self,
        summarizer: &dyn HistorySummarizer,
    ) -> (Option<String>, Vec<HistoryEntry>) {
        let (effective_max, effective_min) = self.effective_limits();
        let content_tokens: usize = self.entries.iter().map(|e| e.token_estimate()).sum();

        if content_tokens > effective_max {
            self.trim(summarizer, effective_min).await;
        }

        (self.summary.clone(), self.entries.clone())
    }

    async fn trim(&mut self, summarizer: &dyn HistorySummarizer, effective_min: usize) {
        // Walk backwards to find the cutoff that keeps roughly
        // `effective_min` tokens of recent history.
        let mut running = 0;
        let mut cutoff = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate().rev() {
            let tokens = entry.token_estimate();
            if running + tokens > effective_min {
                break;
            }
            running += tokens;
            cutoff = i;
        }

        if cutoff == 0 {
            return;
        }

        let transcript = self.render_for_summary(cutoff);
        match summarizer.summarize(&transcript).await {
            Ok(new_summary) if !new_summary.trim().is_empty() => {
                self.summary_tokens = new_summary.len() / CHARS_PER_TOKEN;
                self.summary = Some(new_summary);
                self.entries.drain(..cutoff);
                tracing::debug!(
                    dropped = cutoff,
                    summary_tokens = self.summary_tokens,
                    "history trimmed into summary"
                );
            }
            Ok(_) => {
                tracing::warn!("history summarizer returned empty output; keeping full history");
            }
            Err(err) => {
                tracing::warn!(error = %err, "history summarization failed; keeping full history");
            }
        }
    }

    /// Previous summary plus the to-be-trimmed lines, as summarizer
    /// input.
    fn render_for_summary(&self, cutoff: usize) -> String {
        let mut parts = Vec::new();
        if let Some(summary) = &self.summary {
            parts.push(format!("EARLIER EVENTS:\n{summary}"));
        }
        for entry in &self.entries[..cutoff] {
            parts.push(format!("{}: {}", entry.speaker, entry.content));
        }
        parts.join("\n")
    }

    fn effective_limits(&self) -> (usize, usize) {
        let max_summary_allowed =
            (self.config.max_tokens as f64 * self.config.max_summary_ratio) as usize;
        if self.summary_tokens > max_summary_allowed {
            tracing::warn!(
                summary_tokens = self.summary_tokens,
                max_summary_allowed,
                "accumulated summary exceeds its budget share"
            );
        }

        let effective_max = self
            .config
            .max_tokens
            .saturating_sub(self.summary_tokens)
            .max(MIN_CONTENT_MAX);
        let effective_min = self
            .config
            .min_tokens
            .saturating_sub(self.summary_tokens)
            .max(MIN_CONTENT_MIN);
        (effective_max, effective_min)
    }

    pub fn stats(&self) -> HistoryStats {
        let (effective_max, effective_min) = self.effective_limits();
        HistoryStats {
            entry_count: self.entries.len(),
            entry_tokens: self.entries.iter().map(|e| e.token_estimate()).sum(),
            summary_tokens: self.summary_tokens,
            effective_max_tokens: effective_max,
            effective_min_tokens: effective_min,
        }
    }

    /// Drop everything, summary included.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.summary = None;
        self.summary_tokens = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_domain::error::{Error, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingSummarizer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSummarizer {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl HistorySummarizer for CountingSummarizer {
        async fn summarize(&self, transcript: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Summarizer("no model".into()));
            }
            Ok(format!("summary of {} chars", transcript.len()))
        }
    }

    fn config(max_tokens: usize, min_tokens: usize) -> HistoryConfig {
        HistoryConfig {
            max_tokens,
            min_tokens,
            max_summary_ratio: 0.3,
        }
    }

    fn line(speaker: &str, tokens: usize) -> HistoryEntry {
        HistoryEntry::new(speaker, "x".repeat(tokens * CHARS_PER_TOKEN)).with_tokens(tokens)
    }

    #[tokio::test]
    async fn under_budget_returns_everything_untouched() {
        let mut history = HistoryProcessor::new(config(10_000, 5_000));
        history.push(line("player", 100));
        history.push(line("dm", 200));

        let summarizer = CountingSummarizer::new(false);
        let (summary, entries) = history.history(&summarizer).await;

        assert!(summary.is_none());
        assert_eq!(entries.len(), 2);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn over_budget_condenses_oldest_span() {
        // Budget floors clamp effective limits to 1000/500.
        let mut history = HistoryProcessor::new(config(1_000, 500));
        for _ in 0..5 {
            history.push(line("player", 300));
        }

        let summarizer = CountingSummarizer::new(false);
        let (summary, entries) = history.history(&summarizer).await;

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert!(summary.is_some());
        // Only one 300-token line fits under the 500-token keep target.
        assert_eq!(entries.len(), 1);
        assert_eq!(history.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn summarizer_failure_keeps_full_history() {
        let mut history = HistoryProcessor::new(config(1_000, 500));
        for _ in 0..5 {
            history.push(line("dm", 300));
        }

        let summarizer = CountingSummarizer::new(true);
        let (summary, entries) = history.history(&summarizer).await;

        assert!(summary.is_none());
        assert_eq!(entries.len(), 5, "nothing is dropped on failure");
    }

    #[tokio::test]
    async fn second_trim_folds_previous_summary_into_input() {
        #[derive(Default)]
        struct CapturingSummarizer {
            saw_earlier_events: AtomicBool,
        }

        #[async_trait::async_trait]
        impl HistorySummarizer for CapturingSummarizer {
            async fn summarize(&self, transcript: &str) -> Result<String> {
                if transcript.contains("EARLIER EVENTS:") {
                    self.saw_earlier_events.store(true, Ordering::SeqCst);
                }
                Ok("condensed".into())
            }
        }

        let mut history = HistoryProcessor::new(config(1_000, 500));
        let summarizer = CapturingSummarizer::default();

        for _ in 0..5 {
            history.push(line("player", 300));
        }
        history.history(&summarizer).await;
        assert!(history.summary().is_some());

        for _ in 0..5 {
            history.push(line("dm", 300));
        }
        history.history(&summarizer).await;

        assert!(summarizer.saw_earlier_events.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn clear_resets_summary_and_entries() {
        let mut history = HistoryProcessor::new(config(1_000, 500));
        for _ in 0..5 {
            history.push(line("player", 300));
        }
        history.history(&CountingSummarizer::new(false)).await;

        history.clear();
        let stats = history.stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.summary_tokens, 0);
        assert!(history.summary().is_none());
    }

    #[test]
    fn token_estimate_prefers_reported_count() {
        let entry = HistoryEntry::new("dm", "abcdefgh"); // 8 chars -> 2 tokens
        assert_eq!(entry.token_estimate(), 2);
        let entry = entry.with_tokens(50);
        assert_eq!(entry.token_estimate(), 50);
    }
}
