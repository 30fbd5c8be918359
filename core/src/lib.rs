/// Concierge Chat Core
///
/// Real-time conversation synchronization for a hotel-booking storefront:
/// one live push channel reconciled with pull-based history and listing
/// endpoints into ordered, duplicate-free per-conversation timelines,
/// with unread tracking and reconnect-safe room subscriptions.

pub mod client;
pub mod config;
pub mod connection;
pub mod directory;
pub mod endpoints;
pub mod error;
pub mod memory_hub;
pub mod message_stream;
pub mod read_state;
pub mod session;
pub mod subscription;
pub mod types;

pub use client::ChatClient;
pub use config::Config;
pub use error::{ChatError, Result};
pub use session::SessionContext;
pub use types::{
    ChatEvent, ConnectionState, Conversation, Message, SenderType, SessionCredential,
    ViewingActor,
};
