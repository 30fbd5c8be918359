/// Error types for the chat core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Invalid or expired credential at connect time. Never retried here;
    /// the surrounding session must re-authenticate.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Transient transport failure. Retried by the connection manager up to
    /// its attempt budget, then surfaced as a steady Disconnected state.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single pull request (history, listing, mark-read) failed.
    /// Not retried automatically; the caller decides.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Send attempted while the live channel is not connected.
    /// The message is neither queued nor retried.
    #[error("Send blocked: live channel is not connected")]
    SendBlocked,

    /// Message rejected before publish (e.g. empty content)
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
