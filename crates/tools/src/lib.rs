//! Tools exposed to the narrator.
//!
//! One tool exists: the rules-database query. Its only observable side
//! effect beyond the returned string is populating the active turn's
//! rules cache.

pub mod rules_query;

pub use rules_query::RulesQueryTool;
