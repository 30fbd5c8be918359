/// Shared types for the chat core
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a two-party conversation authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    Guest,
    HotelOperator,
}

/// One chat message. Immutable once created; appended only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique within a conversation
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_type: SenderType,
    /// Non-empty text
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Total-order key within a conversation: created_at, tie-broken by id
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// One conversation thread between a guest and a hotel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque, stable id
    pub id: String,
    pub guest_ref: String,
    pub hotel_ref: String,
    /// Preview of the most recent message, if any
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Connection state of the live channel; process-wide per active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The actor whose view this session renders. The same core serves both
/// roles; role-specific presentation stays at the UI boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewingActor {
    pub actor_id: String,
    pub actor_type: SenderType,
}

impl ViewingActor {
    pub fn new(actor_id: impl Into<String>, actor_type: SenderType) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_type,
        }
    }

    /// Whether the given message was authored by this actor
    pub fn authored(&self, message: &Message) -> bool {
        message.sender_id == self.actor_id && message.sender_type == self.actor_type
    }
}

/// Bearer credential authenticating the live channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential(pub String);

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

/// Event pushed over the live channel, scoped to joined conversations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// A fully-formed message landed in a joined conversation
    NewMessage { message: Message },
}

/// Real-time events surfaced to the surrounding application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The live channel changed state
    ConnectionChanged { state: ConnectionState },
    /// A message was merged into an open conversation's timeline
    MessageReceived { message: Message },
    /// A conversation's preview/unread metadata changed
    ConversationTouched { conversation_id: String },
    /// A conversation was marked read by the viewing actor
    ConversationRead { conversation_id: String },
}
