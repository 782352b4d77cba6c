//! Error types for warden

/// Main error type for warden operations
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Malformed wire input (check line, deletion payload)
    #[error("parse error: {0}")]
    Parse(String),

    /// Payload failed validation (missing required fields)
    #[error("payload error: {0}")]
    Payload(String),

    /// Authorization-store or cache transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Batch check returned an empty result for a non-empty input
    #[error("empty response: {0}")]
    EmptyResponse(String),

    /// Failed to deliver a reply when one was requested
    #[error("reply error: {0}")]
    Reply(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WardenError {
    /// Short human-readable string sent back on the reply inbox.
    ///
    /// Handlers put the wire-appropriate text in the variant payload; the
    /// reply tail strips the variant prefix so inboxes see only the short
    /// message.
    pub fn reply_text(&self) -> &str {
        match self {
            Self::Parse(msg)
            | Self::Payload(msg)
            | Self::Transport(msg)
            | Self::EmptyResponse(msg)
            | Self::Reply(msg)
            | Self::Nats(msg)
            | Self::Config(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for WardenError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
