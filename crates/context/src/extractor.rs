//! State-extractor projection: strictly the active leaf's unprocessed
//! live messages.
//!
//! The locality rule is what prevents double extraction: when a parent
//! turn resumes after a sub-turn, its earlier messages were already
//! processed before the sub-turn opened, and the folded sub-turn result
//! was processed inside the sub-turn. Neither may reach the extractors
//! again.

use serde::Serialize;

use gm_turns::manager::Snapshot;
use gm_turns::TurnContext;

/// Builds the extractor's isolated view of the current turn.
#[derive(Debug, Default)]
pub struct ExtractorContextBuilder;

impl ExtractorContextBuilder {
    pub fn new() -> Self {
        Self
    }

    /// `<turn_log>` containing only the leaf's unprocessed live
    /// messages, in order.
    pub fn build(&self, current_turn: &TurnContext) -> String {
        let mut parts = vec!["<turn_log>".to_owned()];
        for message in current_turn.unprocessed_live_in_self() {
            parts.push(format!("  {}", message.to_xml_element()));
        }
        parts.push("</turn_log>".to_owned());
        parts.join("\n")
    }

    /// As [`build`](Self::build), from a snapshot; an empty snapshot
    /// yields an empty log.
    pub fn build_from_snapshot(&self, snapshot: &Snapshot) -> String {
        match snapshot.active_leaf() {
            Some(leaf) => self.build(leaf),
            None => "<turn_log>\n</turn_log>".to_owned(),
        }
    }

    /// Diagnostic breakdown of what the projection would and would not
    /// include for a turn.
    pub fn isolation_report(&self, current_turn: &TurnContext) -> IsolationReport {
        let all: Vec<_> = current_turn
            .messages
            .iter()
            .flat_map(|item| item.messages())
            .collect();

        let live_messages = all.iter().filter(|m| m.is_live()).count();
        let subturn_results = all.iter().filter(|m| m.is_subturn_result()).count();
        let foreign_messages = all
            .iter()
            .filter(|m| m.is_live() && m.origin_turn_id != current_turn.turn_id)
            .count();
        let unprocessed_messages = current_turn.unprocessed_live_in_self().len();

        let mut warnings = Vec::new();
        if subturn_results > 0 {
            warnings.push(format!(
                "turn contains {subturn_results} folded sub-turn result(s); extractors only see live messages"
            ));
        }
        if unprocessed_messages == 0 {
            warnings.push("no unprocessed messages; extraction would be empty".to_owned());
        }
        if foreign_messages > 0 {
            warnings.push(format!(
                "{foreign_messages} live message(s) carry a foreign origin turn"
            ));
        }

        IsolationReport {
            live_messages,
            unprocessed_messages,
            subturn_results,
            foreign_messages,
            is_isolated: unprocessed_messages > 0 && foreign_messages == 0,
            warnings,
        }
    }
}

/// What the extractor projection covers for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct IsolationReport {
    pub live_messages: usize,
    pub unprocessed_messages: usize,
    pub subturn_results: usize,
    pub foreign_messages: usize,
    pub is_isolated: bool,
    pub warnings: Vec<String>,
}
