//! Core types for command handling: context and errors.

use tokio_util::sync::CancellationToken;

/// Context provided to every command handler invocation.
#[derive(Clone, Debug)]
pub struct CommandContext {
    /// Name of the node running the command.
    pub node: String,
    /// Command name as received (without the node prefix).
    pub command: String,
    /// Correlation id; `None` for a call that expects no reply.
    pub request_id: Option<u64>,
    /// Cancelled when the connection that delivered the command drops.
    pub cancel: CancellationToken,
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum NodeSdkError {
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("registration rejected: {0}")]
    Registration(String),
    #[error("reconnect abandoned after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
