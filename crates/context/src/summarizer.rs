//! Summarizer projection: everything a closing turn contains, in order.
//!
//! Unlike the extractor view, the summarizer sees live prose *and* the
//! already-condensed child sub-turns, so it can weave both into one
//! `<turn>` element.

use gm_turns::TurnContext;

/// Builds the condensation input for a closing turn.
#[derive(Debug, Default)]
pub struct SummarizerContextBuilder;

impl SummarizerContextBuilder {
    pub fn new() -> Self {
        Self
    }

    /// `<turn_log>` with every message chronologically: live utterances
    /// as `<message>`, folded children as `<reaction>`. Groups are
    /// flattened, since the batching boundary means nothing to a summary.
    pub fn build(&self, turn: &TurnContext) -> String {
        let mut parts = vec!["<turn_log>".to_owned()];
        for message in turn.messages.iter().flat_map(|item| item.messages()) {
            parts.push(format!("  {}", message.to_xml_element()));
        }
        parts.push("</turn_log>".to_owned());
        parts.join("\n")
    }

    /// Full condensation prompt: instructions, the turn log, turn
    /// metadata, and output-format guidance.
    pub fn build_prompt(&self, turn: &TurnContext, additional_instructions: Option<&str>) -> String {
        let mut parts = vec![
            "Condense the following turn into a structured action-resolution summary.".to_owned(),
            String::new(),
            "INPUT:".to_owned(),
            self.build(turn),
            String::new(),
            "TURN METADATA:".to_owned(),
            format!("- Turn ID: {}", turn.turn_id),
            format!("- Turn Level: {}", turn.turn_level),
            format!(
                "- Active Character: {}",
                turn.active_character.as_deref().unwrap_or("Unknown")
            ),
        ];

        if let Some(instructions) = additional_instructions {
            parts.push(String::new());
            parts.push("ADDITIONAL INSTRUCTIONS:".to_owned());
            parts.push(instructions.to_owned());
        }

        parts.push(String::new());
        parts.push(
            "Provide your output as a single <turn> element with an <action>, any <reaction> \
             elements from the input copied verbatim, and a final <resolution>."
                .to_owned(),
        );

        parts.join("\n")
    }
}
