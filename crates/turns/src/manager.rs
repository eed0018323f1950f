//! Sole mutator of the turn tree.
//!
//! The manager owns every turn in a flat arena and tracks the active
//! path: the stack of open turns from a root down to the leaf that all
//! writes target. External identifiers stay the dotted strings; indices
//! never leave this module.
//!
//! Closing a turn is split in two because condensation is an async LLM
//! call that must run outside the manager lock: [`prepare_end_turn`]
//! handles the synchronous fast paths (queued-sibling advance, root
//! close) and otherwise hands back a snapshot of the closing leaf;
//! [`commit_end_turn`] folds the condensate into the parent.
//!
//! [`prepare_end_turn`]: TurnManager::prepare_end_turn
//! [`commit_end_turn`]: TurnManager::commit_end_turn

use serde::Serialize;

use gm_domain::message::{ActionDeclaration, MessageDraft, MessageKind, TurnMessage};
use gm_domain::rules::CacheEntry;
use gm_domain::trace::TraceEvent;
use gm_domain::{Error, Result};

use crate::cache;
use crate::context::{child_of, TurnContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of closing the active turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndResult {
    /// Id of the turn that was closed.
    pub turn_id: String,
    pub turn_level: usize,
    /// True when the closed turn was condensed into its parent.
    pub embedded_in_parent: bool,
    /// True when a queued sibling from the same batch was entered
    /// instead of returning to the parent.
    pub advanced_to_sibling: bool,
    /// The condensate, when `embedded_in_parent`.
    pub condensation_result: Option<String>,
}

/// Intermediate state of a close operation.
#[derive(Debug)]
pub enum EndStage {
    /// The close finished synchronously (sibling advance or root close).
    Done(EndResult),
    /// The leaf needs condensing before it can fold into its parent;
    /// run the summarizer over this snapshot, then call
    /// [`TurnManager::commit_end_turn`].
    NeedsCondensation { leaf: TurnContext },
}

/// Point-in-time view of the active path, root first.
///
/// Snapshots own their turns; later mutations of the tree are invisible
/// to a snapshot holder.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub active_turns_by_level: Vec<TurnContext>,
}

impl Snapshot {
    /// The active leaf, if any turn is open.
    pub fn active_leaf(&self) -> Option<&TurnContext> {
        self.active_turns_by_level.last()
    }

    pub fn is_empty(&self) -> bool {
        self.active_turns_by_level.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arena
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct TurnNode {
    ctx: TurnContext,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Whether this turn has ever been the active leaf. Batch members
    /// other than the last are created open but un-entered.
    entered: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single-writer owner of the turn tree.
#[derive(Debug, Default)]
pub struct TurnManager {
    nodes: Vec<TurnNode>,
    /// Top-level turns, in creation order. Numbering is monotonic for
    /// the manager's lifetime so ids stay unique after roots close.
    roots: Vec<usize>,
    /// Indices of the open turns from root to active leaf.
    active_path: Vec<usize>,
    /// Monotonic message-timestamp source.
    next_seq: u64,
}

impl TurnManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn active_leaf_idx(&self) -> Result<usize> {
        self.active_path.last().copied().ok_or(Error::NoActiveTurn)
    }

    // ── turn creation ──────────────────────────────────────────────

    /// Atomically create one child turn per declaration under the
    /// current leaf (or at top level when the tree is empty). Each child
    /// is seeded with one live message from its declaration. The last
    /// child becomes the new active leaf; earlier ones are queued open
    /// and will be entered newest-first as each active sibling closes.
    ///
    /// Returns the created ids in declaration order.
    pub fn start_and_queue_turns(
        &mut self,
        declarations: Vec<ActionDeclaration>,
    ) -> Result<Vec<String>> {
        if declarations.is_empty() {
            return Ok(Vec::new());
        }

        let parent_idx = self.active_path.last().copied();
        let mut created = Vec::with_capacity(declarations.len());

        for declaration in declarations {
            let turn_id = match parent_idx {
                Some(p) => {
                    let parent = &self.nodes[p];
                    child_of(&parent.ctx.turn_id, parent.children.len() + 1)
                }
                None => (self.roots.len() + 1).to_string(),
            };

            let mut ctx = TurnContext::new(turn_id.clone(), declaration.active_character.clone());
            let seq = self.seq();
            ctx.push_live(declaration.content, declaration.speaker, seq);

            let idx = self.nodes.len();
            self.nodes.push(TurnNode {
                ctx,
                parent: parent_idx,
                children: Vec::new(),
                entered: false,
            });
            match parent_idx {
                Some(p) => self.nodes[p].children.push(idx),
                None => self.roots.push(idx),
            }
            created.push((idx, turn_id));
        }

        // Enter the last declared child.
        let last_idx = created.last().expect("non-empty batch").0;
        self.active_path.push(last_idx);
        self.nodes[last_idx].entered = true;

        let turn_ids: Vec<String> = created.into_iter().map(|(_, id)| id).collect();
        TraceEvent::TurnsQueued {
            parent_turn_id: parent_idx.map(|p| self.nodes[p].ctx.turn_id.clone()),
            turn_ids: turn_ids.clone(),
            active_turn_id: self.nodes[last_idx].ctx.turn_id.clone(),
        }
        .emit();

        Ok(turn_ids)
    }

    // ── message appends ────────────────────────────────────────────

    /// Append a batch of messages to the active leaf. A multi-message
    /// all-live batch is wrapped in one [`MessageGroup`] flagged new to
    /// the narrator; anything else appends as bare messages.
    ///
    /// [`MessageGroup`]: gm_domain::message::MessageGroup
    pub fn append_messages(&mut self, drafts: Vec<MessageDraft>) -> Result<()> {
        let leaf_idx = self.active_leaf_idx()?;
        if drafts.is_empty() {
            return Ok(());
        }

        let (leaf_id, leaf_level) = {
            let ctx = &self.nodes[leaf_idx].ctx;
            (ctx.turn_id.clone(), ctx.turn_level)
        };
        let count = drafts.len();
        let all_live = drafts.iter().all(|d| d.kind == MessageKind::Live);

        if count > 1 && all_live {
            let messages: Vec<TurnMessage> = drafts
                .into_iter()
                .map(|d| {
                    let seq = self.seq();
                    TurnMessage::live(d.content, d.speaker, leaf_id.as_str(), leaf_level, seq)
                })
                .collect();
            self.nodes[leaf_idx].ctx.push_group(messages)?;
        } else {
            for draft in drafts {
                let seq = self.seq();
                let message = match draft.kind {
                    MessageKind::Live => TurnMessage::live(
                        draft.content,
                        draft.speaker,
                        leaf_id.as_str(),
                        leaf_level,
                        seq,
                    ),
                    MessageKind::SubturnResult => {
                        TurnMessage::subturn_result(draft.content, leaf_id.as_str(), leaf_level, seq)
                    }
                };
                self.nodes[leaf_idx].ctx.push_message(message);
            }
        }

        TraceEvent::MessagesAppended {
            turn_id: leaf_id,
            count,
            grouped: count > 1 && all_live,
        }
        .emit();

        Ok(())
    }

    // ── closing turns ──────────────────────────────────────────────

    /// First half of `end_turn`. Mutates and finishes immediately when
    /// the close needs no condensation:
    ///
    /// 1. the leaf has queued un-entered siblings from its batch: the
    ///    newest queued sibling is entered, nothing folds;
    /// 2. the leaf is a root: the tree empties.
    ///
    /// Otherwise returns the leaf snapshot for condensation; the tree is
    /// untouched until [`commit_end_turn`](Self::commit_end_turn).
    pub fn prepare_end_turn(&mut self) -> Result<EndStage> {
        let leaf_idx = self.active_leaf_idx()?;
        let parent_idx = self.nodes[leaf_idx].parent;

        // Queued siblings from the same batch: enter the next one,
        // newest-first.
        let siblings: &[usize] = match parent_idx {
            Some(p) => &self.nodes[p].children,
            None => &self.roots,
        };
        let next_sibling = siblings
            .iter()
            .rev()
            .copied()
            .find(|&s| s != leaf_idx && !self.nodes[s].entered && self.nodes[s].ctx.is_open());

        if let Some(sibling_idx) = next_sibling {
            let result = self.close_leaf(leaf_idx, false, true, None);
            self.active_path.push(sibling_idx);
            self.nodes[sibling_idx].entered = true;
            return Ok(EndStage::Done(result));
        }

        // Root with no queued siblings: the tree empties.
        if parent_idx.is_none() {
            let result = self.close_leaf(leaf_idx, false, false, None);
            return Ok(EndStage::Done(result));
        }

        Ok(EndStage::NeedsCondensation {
            leaf: self.nodes[leaf_idx].ctx.clone(),
        })
    }

    /// Second half of `end_turn`: fold the condensate into the parent as
    /// one sub-turn-result message, close the leaf, and make the parent
    /// the active leaf.
    pub fn commit_end_turn(&mut self, condensate: String) -> Result<EndResult> {
        let leaf_idx = self.active_leaf_idx()?;
        let parent_idx = self.nodes[leaf_idx]
            .parent
            .ok_or_else(|| Error::Other("commit_end_turn called on a root turn".into()))?;

        let (leaf_id, leaf_level) = {
            let ctx = &self.nodes[leaf_idx].ctx;
            (ctx.turn_id.clone(), ctx.turn_level)
        };

        let seq = self.seq();
        self.nodes[parent_idx]
            .ctx
            .push_subturn_result(condensate.as_str(), leaf_id.as_str(), leaf_level, seq);

        Ok(self.close_leaf(leaf_idx, true, false, Some(condensate)))
    }

    fn close_leaf(
        &mut self,
        leaf_idx: usize,
        embedded_in_parent: bool,
        advanced_to_sibling: bool,
        condensation_result: Option<String>,
    ) -> EndResult {
        self.nodes[leaf_idx].ctx.close();
        self.active_path.pop();

        let ctx = &self.nodes[leaf_idx].ctx;
        let result = EndResult {
            turn_id: ctx.turn_id.clone(),
            turn_level: ctx.turn_level,
            embedded_in_parent,
            advanced_to_sibling,
            condensation_result,
        };

        TraceEvent::TurnClosed {
            turn_id: result.turn_id.clone(),
            turn_level: result.turn_level,
            embedded_in_parent,
            advanced_to_sibling,
        }
        .emit();

        result
    }

    // ── reads ──────────────────────────────────────────────────────

    /// The active leaf, or `None` when the tree is empty.
    pub fn get_current_turn(&self) -> Option<&TurnContext> {
        self.active_path
            .last()
            .map(|&idx| &self.nodes[idx].ctx)
    }

    /// Point-in-time copy of the active path, root first.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            active_turns_by_level: self
                .active_path
                .iter()
                .map(|&idx| self.nodes[idx].ctx.clone())
                .collect(),
        }
    }

    // ── mark operations ────────────────────────────────────────────

    /// Clear the new-to-narrator flag on every item in the active leaf.
    /// Invoked after the narrator consumed a projection that rendered
    /// those items as new.
    pub fn mark_dm_saw_new_messages(&mut self) -> Result<()> {
        let leaf_idx = self.active_leaf_idx()?;
        self.nodes[leaf_idx].ctx.mark_seen_by_dm();
        Ok(())
    }

    /// Mark every live message the active leaf emitted as consumed by
    /// the extraction pipeline. Idempotent.
    pub fn mark_extraction_processed(&mut self) -> Result<usize> {
        let leaf_idx = self.active_leaf_idx()?;
        let marked = self.nodes[leaf_idx].ctx.mark_extraction_processed();
        TraceEvent::ExtractionMarkedProcessed {
            turn_id: self.nodes[leaf_idx].ctx.turn_id.clone(),
            messages: marked,
        }
        .emit();
        Ok(marked)
    }

    // ── cache writes ───────────────────────────────────────────────

    /// Store a rule entry in the active leaf's cache. This is the only
    /// tree write that happens mid-narrator-call, so the caller holds
    /// the manager lock just for this mutation.
    pub fn cache_rule_on_active(&mut self, entry: CacheEntry) -> Result<()> {
        let leaf_idx = self.active_leaf_idx()?;
        cache::add_entry(entry, &mut self.nodes[leaf_idx].ctx);
        Ok(())
    }

    /// Id of the active leaf, if any. Cheap probe for tool call sites.
    pub fn current_turn_id(&self) -> Option<String> {
        self.get_current_turn().map(|t| t.turn_id.clone())
    }

    /// (open turn count, total turn count) for digests.
    pub fn turn_counts(&self) -> (usize, usize) {
        let open = self.nodes.iter().filter(|n| n.ctx.is_open()).count();
        (open, self.nodes.len())
    }

    #[cfg(test)]
    fn leaf_id(&self) -> String {
        self.current_turn_id().expect("active turn")
    }
}
