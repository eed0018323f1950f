use serde::Serialize;

/// Structured trace events emitted across all engine crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnsQueued {
        parent_turn_id: Option<String>,
        turn_ids: Vec<String>,
        active_turn_id: String,
    },
    MessagesAppended {
        turn_id: String,
        count: usize,
        grouped: bool,
    },
    TurnClosed {
        turn_id: String,
        turn_level: usize,
        embedded_in_parent: bool,
        advanced_to_sibling: bool,
    },
    SummarizerFallback {
        turn_id: String,
        error: String,
    },
    RuleCached {
        turn_id: String,
        cache_key: String,
        entry_type: String,
    },
    RulesQueried {
        query_words: usize,
        exact_match: bool,
        results: usize,
    },
    EventsDetected {
        events: Vec<String>,
        confidence: f64,
    },
    ExtractorFailed {
        extractor: String,
        error: String,
    },
    ExtractionMerged {
        commands: usize,
        new_characters: usize,
    },
    ExtractionMarkedProcessed {
        turn_id: String,
        messages: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "gm_event");
    }
}
