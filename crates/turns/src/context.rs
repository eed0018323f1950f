//! A single node of the turn tree.
//!
//! A `TurnContext` stores the chronological log of one turn plus the
//! rules cache populated by the narrator's tool calls. The narrator
//! wants everything while the state extractor wants only
//! locally-unprocessed utterances; the read projections below serve
//! both without the turn ever reaching into other turns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gm_domain::message::{MessageGroup, MessageKind, Speaker, TurnItem, TurnMessage};
use gm_domain::rules::CacheEntry;
use gm_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn-id helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Depth encoded in a dotted turn id: `"1"` → 0, `"1.2.1"` → 2.
pub fn level_of(turn_id: &str) -> usize {
    turn_id.matches('.').count()
}

/// The parent id, i.e. everything before the last dot. Roots have none.
pub fn parent_of(turn_id: &str) -> Option<&str> {
    turn_id.rsplit_once('.').map(|(parent, _)| parent)
}

/// Id of the `n`-th child (1-based) of `parent`.
pub fn child_of(parent: &str, n: usize) -> String {
    format!("{parent}.{n}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One turn (or sub-turn) of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnContext {
    /// Dotted path id; the final component is the child index within the
    /// parent.
    pub turn_id: String,
    /// Depth in the tree; always equals the dot count of `turn_id`.
    pub turn_level: usize,
    /// Whose action this turn represents, if declared.
    pub active_character: Option<String>,
    /// Chronological log; insertion order equals timestamp order.
    pub messages: Vec<TurnItem>,
    /// Reference rules cached for this turn, keyed by lowercase name.
    /// The only metadata field the engine reads.
    pub rules_cache: BTreeMap<String, CacheEntry>,
    /// Free-form metadata for callers; opaque to the engine.
    #[serde(default)]
    pub side_metadata: BTreeMap<String, serde_json::Value>,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, when the turn closes.
    pub end_time: Option<DateTime<Utc>>,
}

impl TurnContext {
    pub fn new(turn_id: impl Into<String>, active_character: Option<String>) -> Self {
        let turn_id = turn_id.into();
        let turn_level = level_of(&turn_id);
        Self {
            turn_id,
            turn_level,
            active_character,
            messages: Vec::new(),
            rules_cache: BTreeMap::new(),
            side_metadata: BTreeMap::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// A turn is open until `end_time` is set.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    // ── log mutation (called by the manager only) ──────────────────

    pub(crate) fn push_live(&mut self, content: impl Into<String>, speaker: Speaker, seq: u64) {
        let message = TurnMessage::live(
            content,
            speaker,
            self.turn_id.as_str(),
            self.turn_level,
            seq,
        );
        self.messages.push(TurnItem::Message(message));
    }

    pub(crate) fn push_message(&mut self, message: TurnMessage) {
        self.messages.push(TurnItem::Message(message));
    }

    pub(crate) fn push_group(&mut self, messages: Vec<TurnMessage>) -> Result<()> {
        let group = MessageGroup::new(messages)?;
        self.messages.push(TurnItem::Group(group));
        Ok(())
    }

    pub(crate) fn push_subturn_result(
        &mut self,
        condensate: impl Into<String>,
        subturn_id: &str,
        subturn_level: usize,
        seq: u64,
    ) {
        let message = TurnMessage::subturn_result(condensate, subturn_id, subturn_level, seq);
        self.messages.push(TurnItem::Message(message));
    }

    pub(crate) fn close(&mut self) {
        self.end_time = Some(Utc::now());
    }

    // ── read projections ───────────────────────────────────────────

    /// All live message contents emitted by this turn itself, in order,
    /// flattening groups. Sub-turn results and foreign-origin messages
    /// are excluded.
    pub fn live_messages_in_self(&self) -> Vec<&str> {
        self.messages
            .iter()
            .flat_map(|item| item.messages())
            .filter(|m| m.is_live() && m.origin_turn_id == self.turn_id)
            .map(|m| m.content.as_str())
            .collect()
    }

    /// As [`live_messages_in_self`](Self::live_messages_in_self), but only
    /// messages the extraction pipeline has not consumed yet.
    pub fn unprocessed_live_in_self(&self) -> Vec<&TurnMessage> {
        self.messages
            .iter()
            .flat_map(|item| item.messages())
            .filter(|m| {
                m.is_live()
                    && m.origin_turn_id == self.turn_id
                    && !m.processed_for_extraction
            })
            .collect()
    }

    /// Count of live messages vs. folded sub-turn results, for digests.
    pub fn message_counts(&self) -> (usize, usize) {
        let mut live = 0;
        let mut folded = 0;
        for message in self.messages.iter().flat_map(|item| item.messages()) {
            match message.kind {
                MessageKind::Live => live += 1,
                MessageKind::SubturnResult => folded += 1,
            }
        }
        (live, folded)
    }

    // ── mark operations ────────────────────────────────────────────

    /// Mark every live message this turn emitted as consumed by the
    /// extraction pipeline. Returns how many were newly marked.
    pub(crate) fn mark_extraction_processed(&mut self) -> usize {
        let turn_id = self.turn_id.clone();
        let mut marked = 0;
        for message in self.messages.iter_mut().flat_map(|item| item.messages_mut()) {
            if message.is_live()
                && message.origin_turn_id == turn_id
                && !message.processed_for_extraction
            {
                message.mark_processed();
                marked += 1;
            }
        }
        marked
    }

    /// Clear the "new to the narrator" flag on every item and member.
    pub(crate) fn mark_seen_by_dm(&mut self) {
        for item in &mut self.messages {
            item.mark_seen_by_dm();
        }
    }

    // ── XML rendering ──────────────────────────────────────────────

    /// Render this turn's log as one XML block.
    ///
    /// Root-level turns emit `<turn_log>`; deeper turns emit
    /// `<subturn_log id="…">` with an optional `cause` attribute. When
    /// `exclude_new_groups` is set, message groups still flagged new are
    /// omitted; the narrator projection renders those separately in its
    /// `<new_messages>` section.
    pub fn to_xml_block(&self, exclude_new_groups: bool, cause: Option<&str>) -> String {
        let (opening, closing) = if self.turn_level == 0 {
            ("<turn_log>".to_owned(), "</turn_log>")
        } else {
            let opening = match cause {
                Some(cause) => {
                    format!("<subturn_log id=\"{}\" cause=\"{cause}\">", self.turn_id)
                }
                None => format!("<subturn_log id=\"{}\">", self.turn_id),
            };
            (opening, "</subturn_log>")
        };

        let mut parts = vec![opening];
        for item in &self.messages {
            if exclude_new_groups && item.is_new_group() {
                continue;
            }
            parts.push(format!("  {}", item.to_xml_element()));
        }
        parts.push(closing.to_owned());
        parts.join("\n")
    }
}
