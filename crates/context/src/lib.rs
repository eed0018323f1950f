//! Per-consumer projections of the turn tree.
//!
//! Four consumers read the same log with incompatible needs: the
//! narrator wants the whole hierarchy with its unanswered messages
//! highlighted, the state extractor wants only the leaf's unprocessed
//! utterances, the effect agent wants those plus the cached rules of the
//! lineage, and the summarizer wants a closing turn's full chronology.
//! Each builder is a pure function of a snapshot; none mutate state.
//! The one stateful piece here is the [`HistoryProcessor`], which keeps
//! the flat prose history of narrator exchanges across completed turns
//! under a token budget.

pub mod dm;
pub mod effect;
pub mod extractor;
pub mod history;
pub mod summarizer;

pub use dm::{DmContext, DmContextBuilder};
pub use effect::EffectContextBuilder;
pub use extractor::{ExtractorContextBuilder, IsolationReport};
pub use history::{HistoryEntry, HistoryProcessor, HistoryStats};
pub use summarizer::SummarizerContextBuilder;
