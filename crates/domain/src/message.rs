//! Message model for the turn log.
//!
//! A turn's log is a sequence of [`TurnItem`]s: either a single
//! [`TurnMessage`] or a [`MessageGroup`] of messages that entered the
//! system simultaneously. Live utterances and condensed sub-turn results
//! share the same message type, distinguished by [`MessageKind`], so one
//! log can serve consumers with very different visibility rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Speaker / kind tags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who produced an utterance.
///
/// The well-known values are `player`, `dm`, and `system`; reaction
/// declarations may instead carry the name of the acting character
/// (e.g. `"orc"`), so this is an open string rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Speaker(pub String);

impl Speaker {
    pub fn player() -> Self {
        Self("player".into())
    }

    pub fn dm() -> Self {
        Self("dm".into())
    }

    pub fn system() -> Self {
        Self("system".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Speaker {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Speaker {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether a message is a real utterance or a condensed sub-turn result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// An utterance from a player or the narrator.
    Live,
    /// The condensate of a closed child turn, folded into its parent.
    SubturnResult,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnMessage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single entry in a turn's log.
///
/// `timestamp` is a monotonic sequence number issued by the turn manager;
/// within a turn it is strictly increasing, which is what downstream
/// chronology checks rely on (wall clocks cannot guarantee that).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub content: String,
    pub speaker: Speaker,
    pub kind: MessageKind,
    /// Id of the turn that emitted this message.
    pub origin_turn_id: String,
    /// Depth of the emitting turn at the time of emission.
    pub origin_turn_level: usize,
    pub timestamp: u64,
    /// Whether the state-extraction pipeline has consumed this message.
    pub processed_for_extraction: bool,
    /// Whether the narrator has yet to respond to this message.
    pub is_new_to_dm: bool,
}

impl TurnMessage {
    /// A live conversation message.
    pub fn live(
        content: impl Into<String>,
        speaker: Speaker,
        origin_turn_id: impl Into<String>,
        origin_turn_level: usize,
        timestamp: u64,
    ) -> Self {
        Self {
            content: content.into(),
            speaker,
            kind: MessageKind::Live,
            origin_turn_id: origin_turn_id.into(),
            origin_turn_level,
            timestamp,
            processed_for_extraction: false,
            is_new_to_dm: true,
        }
    }

    /// A condensed sub-turn result.
    ///
    /// Always system-spoken and born processed: its contents were already
    /// extracted while the sub-turn was live, so re-extracting the
    /// condensate would double-count every state change.
    pub fn subturn_result(
        condensed_content: impl Into<String>,
        subturn_id: impl Into<String>,
        subturn_level: usize,
        timestamp: u64,
    ) -> Self {
        Self {
            content: condensed_content.into(),
            speaker: Speaker::system(),
            kind: MessageKind::SubturnResult,
            origin_turn_id: subturn_id.into(),
            origin_turn_level: subturn_level,
            timestamp,
            processed_for_extraction: true,
            is_new_to_dm: true,
        }
    }

    pub fn is_live(&self) -> bool {
        self.kind == MessageKind::Live
    }

    pub fn is_subturn_result(&self) -> bool {
        self.kind == MessageKind::SubturnResult
    }

    pub fn mark_processed(&mut self) {
        self.processed_for_extraction = true;
    }

    pub fn mark_seen_by_dm(&mut self) {
        self.is_new_to_dm = false;
    }

    /// Render this message as one XML element of the turn-log grammar.
    ///
    /// Live messages become `<message speaker="...">`; sub-turn results
    /// become `<reaction id="X.Y" level="N">` carrying the condensate
    /// verbatim.
    pub fn to_xml_element(&self) -> String {
        match self.kind {
            MessageKind::Live => {
                format!(
                    "<message speaker=\"{}\">{}</message>",
                    self.speaker, self.content
                )
            }
            MessageKind::SubturnResult => {
                format!(
                    "<reaction id=\"{}\" level=\"{}\">\n    {}\n  </reaction>",
                    self.origin_turn_id, self.origin_turn_level, self.content
                )
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MessageGroup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An ordered batch of messages that entered the system simultaneously
/// (e.g. several reactions declared in one step).
///
/// Treated as one opaque item in the turn log so the whole batch can be
/// highlighted to the narrator as "new" without duplicating entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageGroup {
    pub messages: Vec<TurnMessage>,
    pub timestamp: u64,
    pub is_new_to_dm: bool,
}

impl MessageGroup {
    /// Build a group. Fails on an empty batch or mixed message kinds.
    pub fn new(messages: Vec<TurnMessage>) -> Result<Self> {
        let first = messages
            .first()
            .ok_or_else(|| Error::Other("message group must not be empty".into()))?;
        let kind = first.kind;
        if messages.iter().any(|m| m.kind != kind) {
            return Err(Error::Other(
                "message group must contain a single message kind".into(),
            ));
        }
        let timestamp = first.timestamp;
        Ok(Self {
            messages,
            timestamp,
            is_new_to_dm: true,
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.messages[0].kind
    }

    pub fn mark_processed(&mut self) {
        for message in &mut self.messages {
            message.mark_processed();
        }
    }

    pub fn mark_seen_by_dm(&mut self) {
        self.is_new_to_dm = false;
        for message in &mut self.messages {
            message.mark_seen_by_dm();
        }
    }

    /// `<message_group>` wrapper containing each member element.
    pub fn to_xml_element(&self) -> String {
        let mut parts = vec!["<message_group>".to_owned()];
        for message in &self.messages {
            parts.push(format!("  {}", message.to_xml_element()));
        }
        parts.push("</message_group>".to_owned());
        parts.join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnItem
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One slot in a turn's log: a bare message or a grouped batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum TurnItem {
    Message(TurnMessage),
    Group(MessageGroup),
}

impl TurnItem {
    pub fn timestamp(&self) -> u64 {
        match self {
            TurnItem::Message(m) => m.timestamp,
            TurnItem::Group(g) => g.timestamp,
        }
    }

    pub fn is_new_to_dm(&self) -> bool {
        match self {
            TurnItem::Message(m) => m.is_new_to_dm,
            TurnItem::Group(g) => g.is_new_to_dm,
        }
    }

    pub fn is_new_group(&self) -> bool {
        matches!(self, TurnItem::Group(g) if g.is_new_to_dm)
    }

    /// The contained messages, in order. A bare message yields a
    /// one-element slice.
    pub fn messages(&self) -> &[TurnMessage] {
        match self {
            TurnItem::Message(m) => std::slice::from_ref(m),
            TurnItem::Group(g) => &g.messages,
        }
    }

    pub fn messages_mut(&mut self) -> &mut [TurnMessage] {
        match self {
            TurnItem::Message(m) => std::slice::from_mut(m),
            TurnItem::Group(g) => &mut g.messages,
        }
    }

    pub fn mark_seen_by_dm(&mut self) {
        match self {
            TurnItem::Message(m) => m.mark_seen_by_dm(),
            TurnItem::Group(g) => g.mark_seen_by_dm(),
        }
    }

    pub fn to_xml_element(&self) -> String {
        match self {
            TurnItem::Message(m) => m.to_xml_element(),
            TurnItem::Group(g) => g.to_xml_element(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input envelope for starting new turns: one declaration becomes one
/// child turn seeded with one live message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDeclaration {
    pub speaker: Speaker,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_character: Option<String>,
}

impl ActionDeclaration {
    pub fn new(speaker: impl Into<Speaker>, content: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
            active_character: None,
        }
    }

    pub fn with_character(mut self, character: impl Into<String>) -> Self {
        self.active_character = Some(character.into());
        self
    }
}

/// Input envelope for appending messages to the active turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    pub content: String,
    pub speaker: Speaker,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
}

impl MessageDraft {
    /// A live draft, the common case.
    pub fn new(content: impl Into<String>, speaker: impl Into<Speaker>) -> Self {
        Self {
            content: content.into(),
            speaker: speaker.into(),
            kind: MessageKind::Live,
        }
    }
}

fn default_kind() -> MessageKind {
    MessageKind::Live
}
