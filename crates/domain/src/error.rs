/// Shared error type used across all engine crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no active turn")]
    NoActiveTurn,

    #[error("turn {0} is already closed")]
    TurnClosed(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("agent {agent}: {message}")]
    Agent { agent: String, message: String },

    #[error("agent {0} timed out")]
    Timeout(String),

    #[error("summarizer: {0}")]
    Summarizer(String),

    #[error("rule store: {0}")]
    Store(String),

    #[error("malformed output from {agent}: {message}")]
    MalformedOutput { agent: String, message: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
