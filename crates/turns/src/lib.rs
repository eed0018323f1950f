//! The turn tree: contexts, the manager that owns them, and the rules
//! cache that rides along the active path.
//!
//! A session is a tree of turns. A parent turn can spawn child
//! "reaction" turns that must resolve and fold back before the parent
//! resumes; the [`TurnManager`] is the sole mutator of that tree and
//! tracks the root-to-leaf active path all writes target.

pub mod cache;
pub mod context;
pub mod manager;

pub use context::TurnContext;
pub use manager::{EndResult, EndStage, Snapshot, TurnManager};
