//! Narrator projection: full hierarchical context plus a highlight of
//! what the narrator has not responded to yet.

use gm_turns::manager::Snapshot;

/// The two blocks handed to the narrator.
#[derive(Debug, Clone)]
pub struct DmContext {
    /// Chronological rendering of the active path, children nested
    /// inline inside their parents.
    pub context_xml: String,
    /// `<new_messages>` block listing message groups still flagged new;
    /// `None` when there are none.
    pub new_messages_xml: Option<String>,
}

impl DmContext {
    /// Both blocks as one prompt section.
    pub fn render(&self) -> String {
        match &self.new_messages_xml {
            Some(new_block) => format!("{}\n\n{}", self.context_xml, new_block),
            None => self.context_xml.clone(),
        }
    }
}

/// How many completed turns of condensed history precede the live tree.
const RECENT_HISTORY_TURNS: usize = 3;

/// Builds the narrator's view of the tree.
#[derive(Debug, Default)]
pub struct DmContextBuilder;

impl DmContextBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Render the active path. Message groups still flagged new are left
    /// out of the main rendering and listed in the `new_messages` block
    /// instead, so the narrator sees each utterance exactly once.
    pub fn build(&self, snapshot: &Snapshot) -> DmContext {
        if snapshot.is_empty() {
            return DmContext {
                context_xml: "<turn_log>\n</turn_log>".to_owned(),
                new_messages_xml: None,
            };
        }

        // Assemble leaf-outward: each ancestor's block swallows the
        // nested block built so far, indented one level, just before its
        // closing tag. All writes target the leaf, so a child block
        // always belongs after every message its parent already has.
        let mut nested: Option<Vec<String>> = None;
        for turn in snapshot.active_turns_by_level.iter().rev() {
            let block = turn.to_xml_block(true, None);
            let mut lines: Vec<String> = block.lines().map(str::to_owned).collect();
            if let Some(child_lines) = nested.take() {
                let closing = lines.pop().expect("block has a closing tag");
                lines.extend(child_lines.into_iter().map(|line| format!("  {line}")));
                lines.push(closing);
            }
            nested = Some(lines);
        }
        let context_xml = nested.expect("non-empty path").join("\n");

        DmContext {
            context_xml,
            new_messages_xml: self.new_messages_block(snapshot),
        }
    }

    fn new_messages_block(&self, snapshot: &Snapshot) -> Option<String> {
        let mut parts = Vec::new();
        for turn in &snapshot.active_turns_by_level {
            for item in &turn.messages {
                if item.is_new_group() {
                    parts.push(format!("  {}", item.to_xml_element()));
                }
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!(
            "<new_messages>\n{}\n</new_messages>",
            parts.join("\n")
        ))
    }

    /// As [`build`](Self::build), prefixed with the last few condensed
    /// turns of completed history.
    pub fn build_with_history(
        &self,
        snapshot: &Snapshot,
        recent_history: &[String],
    ) -> DmContext {
        let mut ctx = self.build(snapshot);
        if recent_history.is_empty() {
            return ctx;
        }

        let start = recent_history.len().saturating_sub(RECENT_HISTORY_TURNS);
        let mut parts = vec!["=== RECENT TURN HISTORY ===".to_owned()];
        parts.extend(recent_history[start..].iter().cloned());
        ctx.context_xml = format!("{}\n\n{}", parts.join("\n"), ctx.context_xml);
        ctx
    }

    /// One-line digest of the path state, e.g.
    /// `Turn 1 (L0): 3 messages, 1 subturns | Turn 1.2 (L1): 2 messages, 0 subturns`.
    pub fn context_summary(&self, snapshot: &Snapshot) -> String {
        if snapshot.is_empty() {
            return "No active turns".to_owned();
        }
        snapshot
            .active_turns_by_level
            .iter()
            .map(|turn| {
                let (live, folded) = turn.message_counts();
                format!(
                    "Turn {} (L{}): {live} messages, {folded} subturns",
                    turn.turn_id, turn.turn_level
                )
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_domain::message::{ActionDeclaration, MessageDraft};
    use gm_turns::manager::TurnManager;

    fn scene() -> TurnManager {
        let mut manager = TurnManager::new();
        manager
            .start_and_queue_turns(vec![ActionDeclaration::new("player", "I attack the orc")])
            .unwrap();
        manager
            .append_messages(vec![MessageDraft::new("Roll for it", "dm")])
            .unwrap();
        manager
    }

    #[test]
    fn empty_snapshot_renders_empty_log() {
        let manager = TurnManager::new();
        let ctx = DmContextBuilder::new().build(&manager.snapshot());
        assert_eq!(ctx.context_xml, "<turn_log>\n</turn_log>");
        assert!(ctx.new_messages_xml.is_none());
    }

    #[test]
    fn single_turn_renders_flat_log() {
        let manager = scene();
        let ctx = DmContextBuilder::new().build(&manager.snapshot());
        assert!(ctx.context_xml.starts_with("<turn_log>"));
        assert!(ctx
            .context_xml
            .contains("<message speaker=\"player\">I attack the orc</message>"));
        assert!(ctx.context_xml.ends_with("</turn_log>"));
    }

    #[test]
    fn child_block_nests_inside_parent() {
        let mut manager = scene();
        manager
            .start_and_queue_turns(vec![ActionDeclaration::new("orc", "Shield!")])
            .unwrap();

        let ctx = DmContextBuilder::new().build(&manager.snapshot());
        let xml = ctx.context_xml;

        let sub_open = xml.find("<subturn_log id=\"1.1\">").expect("nested block");
        let sub_close = xml.find("</subturn_log>").unwrap();
        let outer_close = xml.rfind("</turn_log>").unwrap();
        // Parent messages come before the nested block, which closes
        // before the parent does.
        assert!(xml.find("I attack the orc").unwrap() < sub_open);
        assert!(sub_close < outer_close);
        assert!(xml.contains("<message speaker=\"orc\">Shield!</message>"));
    }

    #[test]
    fn new_groups_move_to_new_messages_block() {
        let mut manager = scene();
        manager
            .append_messages(vec![
                MessageDraft::new("I dodge", "player"),
                MessageDraft::new("I parry", "player"),
            ])
            .unwrap();

        let builder = DmContextBuilder::new();
        let ctx = builder.build(&manager.snapshot());

        assert!(!ctx.context_xml.contains("I dodge"));
        let new_block = ctx.new_messages_xml.expect("new messages present");
        assert!(new_block.starts_with("<new_messages>"));
        assert!(new_block.contains("<message_group>"));
        assert!(new_block.contains("I dodge"));

        // Once the narrator has seen them, they rejoin the main log.
        manager.mark_dm_saw_new_messages().unwrap();
        let ctx = builder.build(&manager.snapshot());
        assert!(ctx.context_xml.contains("I dodge"));
        assert!(ctx.new_messages_xml.is_none());
    }

    #[test]
    fn render_joins_both_blocks() {
        let mut manager = scene();
        manager
            .append_messages(vec![
                MessageDraft::new("a", "player"),
                MessageDraft::new("b", "player"),
            ])
            .unwrap();
        let rendered = DmContextBuilder::new().build(&manager.snapshot()).render();
        assert!(rendered.contains("</turn_log>\n\n<new_messages>"));
    }

    #[test]
    fn recent_history_keeps_last_three_turns() {
        let manager = scene();
        let history: Vec<String> = (1..=5)
            .map(|i| format!("<turn id=\"{i}\" level=\"0\">…</turn>"))
            .collect();

        let ctx = DmContextBuilder::new().build_with_history(&manager.snapshot(), &history);
        assert!(ctx.context_xml.starts_with("=== RECENT TURN HISTORY ==="));
        assert!(!ctx.context_xml.contains("id=\"2\""));
        assert!(ctx.context_xml.contains("id=\"3\""));
        assert!(ctx.context_xml.contains("id=\"5\""));
        // The live tree follows the history block.
        assert!(ctx.context_xml.contains("<turn_log>"));
    }

    #[test]
    fn summary_lists_each_path_turn() {
        let mut manager = scene();
        manager
            .start_and_queue_turns(vec![ActionDeclaration::new("orc", "Shield!")])
            .unwrap();

        let summary = DmContextBuilder::new().context_summary(&manager.snapshot());
        assert!(summary.contains("Turn 1 (L0): 2 messages, 0 subturns"));
        assert!(summary.contains("Turn 1.1 (L1): 1 messages, 0 subturns"));
    }
}
