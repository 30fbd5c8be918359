/// Boundary traits for the external collaborators this core consumes.
/// The storefront backend (history, listing, mark-read) and the live
/// channel are abstracted here; tests and the demo binary plug in the
/// in-process hub, production plugs in real transports.
use crate::error::Result;
use crate::types::{Conversation, Message, PushEvent, SenderType, SessionCredential, ViewingActor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One page of historical messages, ordered oldest-to-newest.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor for the next-older page; `None` declares end-of-history
    pub next_cursor: Option<String>,
}

/// Paginated message history for one conversation
#[async_trait]
pub trait HistoryEndpoint: Send + Sync {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage>;
}

/// Full conversation listing for the current actor, with embedded
/// last-message and unread metadata
#[async_trait]
pub trait ListingEndpoint: Send + Sync {
    async fn fetch_conversations(&self, actor: &ViewingActor) -> Result<Vec<Conversation>>;
}

/// Records that the actor has read a conversation up to now; idempotent
#[async_trait]
pub trait MarkReadEndpoint: Send + Sync {
    async fn mark_read(&self, conversation_id: &str, actor: &ViewingActor) -> Result<()>;
}

/// Operations available on an established live connection
#[async_trait]
pub trait LiveHandle: Send + Sync {
    /// Subscribe to push events for a conversation
    async fn join(&self, conversation_id: &str) -> Result<()>;

    /// Stop push delivery for a conversation
    async fn leave(&self, conversation_id: &str) -> Result<()>;

    /// Publish a new message. Delivery back to the sender and counterpart
    /// arrives via the push stream; there is no separate ack path.
    async fn send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_type: SenderType,
        content: &str,
    ) -> Result<()>;

    /// Tear the connection down
    async fn close(&self);
}

/// An established connection: the command handle plus the push stream.
/// The stream ending (without an explicit close) signals transport loss.
pub struct LiveConnection {
    pub handle: Arc<dyn LiveHandle>,
    pub events: mpsc::UnboundedReceiver<PushEvent>,
}

/// Factory for authenticated live connections
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Establish the channel. Fails with `ChatError::Auth` for a missing or
    /// invalid credential, `ChatError::Connection` for transport failures.
    async fn connect(&self, credential: &SessionCredential) -> Result<LiveConnection>;
}
