/// In-process hub implementing every collaborator boundary (live channel,
/// history, listing, mark-read) for two-party sessions. Backs the demo
/// binary and the multi-session integration tests; failure injection
/// covers auth rejection, transport drops and fetch errors.
use crate::endpoints::{
    HistoryEndpoint, ListingEndpoint, LiveChannel, LiveConnection, LiveHandle, MarkReadEndpoint,
    MessagePage,
};
use crate::error::{ChatError, Result};
use crate::types::{
    Conversation, Message, PushEvent, SenderType, SessionCredential, ViewingActor,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

struct StoredConversation {
    id: String,
    guest_ref: String,
    hotel_ref: String,
    /// Ordered by (created_at, id) ascending
    messages: Vec<Message>,
    /// Server-side unread per actor id
    unread: HashMap<String, u32>,
    updated_at: DateTime<Utc>,
}

impl StoredConversation {
    fn counterpart_of(&self, sender_id: &str) -> Option<&str> {
        if self.guest_ref == sender_id && !self.hotel_ref.is_empty() {
            Some(&self.hotel_ref)
        } else if self.hotel_ref == sender_id && !self.guest_ref.is_empty() {
            Some(&self.guest_ref)
        } else {
            None
        }
    }

    fn summary_for(&self, actor_id: &str) -> Conversation {
        Conversation {
            id: self.id.clone(),
            guest_ref: self.guest_ref.clone(),
            hotel_ref: self.hotel_ref.clone(),
            last_message: self.messages.last().cloned(),
            unread_count: self.unread.get(actor_id).copied().unwrap_or(0),
            updated_at: self.updated_at,
        }
    }
}

struct HubConnection {
    actor: ViewingActor,
    joined: HashSet<String>,
    push_tx: mpsc::UnboundedSender<PushEvent>,
}

#[derive(Default)]
struct HubState {
    /// Valid bearer tokens and the actor they authenticate
    tokens: HashMap<String, ViewingActor>,
    conversations: HashMap<String, StoredConversation>,
    connections: HashMap<u64, HubConnection>,
    next_connection_id: u64,
    /// Next N connect attempts fail with a transport error
    fail_connects: u32,
    /// Next N history fetches fail
    fail_history_fetches: u32,
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<RwLock<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a bearer token for an actor
    pub async fn register_credential(&self, credential: &SessionCredential, actor: ViewingActor) {
        self.inner
            .write()
            .await
            .tokens
            .insert(credential.0.clone(), actor);
    }

    /// Invalidate a token; later connects with it fail with Auth
    pub async fn revoke_credential(&self, credential: &SessionCredential) {
        self.inner.write().await.tokens.remove(&credential.0);
    }

    /// Seed a conversation between two participants
    pub async fn create_conversation(&self, id: &str, guest_ref: &str, hotel_ref: &str) {
        let mut state = self.inner.write().await;
        state.conversations.insert(
            id.to_string(),
            StoredConversation {
                id: id.to_string(),
                guest_ref: guest_ref.to_string(),
                hotel_ref: hotel_ref.to_string(),
                messages: Vec::new(),
                unread: HashMap::new(),
                updated_at: Utc::now(),
            },
        );
    }

    /// Seed one historical message with an explicit timestamp, bypassing
    /// push delivery
    pub async fn seed_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_type: SenderType,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_type,
            content: content.to_string(),
            created_at,
        };
        let mut state = self.inner.write().await;
        Self::store_message(&mut state, message.clone());
        message
    }

    /// Fail the next `n` connect attempts with a transport error
    pub async fn fail_next_connects(&self, n: u32) {
        self.inner.write().await.fail_connects = n;
    }

    /// Fail the next `n` history fetches
    pub async fn fail_next_history_fetches(&self, n: u32) {
        self.inner.write().await.fail_history_fetches = n;
    }

    /// Simulate transport loss for every connection of one actor: their
    /// push streams end without an explicit close.
    pub async fn drop_connections_for(&self, actor_id: &str) {
        let mut state = self.inner.write().await;
        state
            .connections
            .retain(|_, conn| conn.actor.actor_id != actor_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Conversation ids an actor's live connections are currently joined to
    pub async fn joined_rooms_for(&self, actor_id: &str) -> Vec<String> {
        let state = self.inner.read().await;
        let mut rooms: Vec<String> = state
            .connections
            .values()
            .filter(|c| c.actor.actor_id == actor_id)
            .flat_map(|c| c.joined.iter().cloned())
            .collect();
        rooms.sort();
        rooms.dedup();
        rooms
    }

    fn store_message(state: &mut HubState, message: Message) {
        let conversation = state
            .conversations
            .entry(message.conversation_id.clone())
            .or_insert_with(|| {
                // Conversations come into being on first message exchange
                let (guest_ref, hotel_ref) = match message.sender_type {
                    SenderType::Guest => (message.sender_id.clone(), String::new()),
                    SenderType::HotelOperator => (String::new(), message.sender_id.clone()),
                };
                StoredConversation {
                    id: message.conversation_id.clone(),
                    guest_ref,
                    hotel_ref,
                    messages: Vec::new(),
                    unread: HashMap::new(),
                    updated_at: message.created_at,
                }
            });

        let counterpart = conversation
            .counterpart_of(&message.sender_id)
            .map(str::to_string);
        if let Some(counterpart) = counterpart {
            *conversation.unread.entry(counterpart).or_insert(0) += 1;
        }
        if conversation.updated_at < message.created_at {
            conversation.updated_at = message.created_at;
        }
        let at = conversation
            .messages
            .partition_point(|m| m.order_key() < message.order_key());
        conversation.messages.insert(at, message);
    }

    async fn publish(&self, connection_id: u64, conversation_id: &str, sender_id: &str, sender_type: SenderType, content: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        if !state.connections.contains_key(&connection_id) {
            return Err(ChatError::Connection("connection closed".to_string()));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_type,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        Self::store_message(&mut state, message.clone());

        // Push to every connection joined to this conversation, the
        // sender's own included (the echo is the only delivery confirmation)
        for conn in state.connections.values() {
            if conn.joined.contains(conversation_id) {
                let _ = conn.push_tx.send(PushEvent::NewMessage {
                    message: message.clone(),
                });
            }
        }
        debug!(conversation_id, message_id = %message.id, "Hub stored and routed message");
        Ok(())
    }
}

/// Per-connection command handle handed to the connection manager
struct HubHandle {
    hub: MemoryHub,
    connection_id: u64,
}

#[async_trait]
impl LiveHandle for HubHandle {
    async fn join(&self, conversation_id: &str) -> Result<()> {
        let mut state = self.hub.inner.write().await;
        match state.connections.get_mut(&self.connection_id) {
            Some(conn) => {
                conn.joined.insert(conversation_id.to_string());
                Ok(())
            }
            None => Err(ChatError::Connection("connection closed".to_string())),
        }
    }

    async fn leave(&self, conversation_id: &str) -> Result<()> {
        let mut state = self.hub.inner.write().await;
        match state.connections.get_mut(&self.connection_id) {
            Some(conn) => {
                conn.joined.remove(conversation_id);
                Ok(())
            }
            None => Err(ChatError::Connection("connection closed".to_string())),
        }
    }

    async fn send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_type: SenderType,
        content: &str,
    ) -> Result<()> {
        self.hub
            .publish(self.connection_id, conversation_id, sender_id, sender_type, content)
            .await
    }

    async fn close(&self) {
        let mut state = self.hub.inner.write().await;
        state.connections.remove(&self.connection_id);
    }
}

#[async_trait]
impl LiveChannel for MemoryHub {
    async fn connect(&self, credential: &SessionCredential) -> Result<LiveConnection> {
        let mut state = self.inner.write().await;

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(ChatError::Connection(
                "simulated transport failure".to_string(),
            ));
        }

        let actor = state
            .tokens
            .get(&credential.0)
            .cloned()
            .ok_or_else(|| ChatError::Auth("unknown or revoked credential".to_string()))?;

        let connection_id = state.next_connection_id;
        state.next_connection_id += 1;

        let (push_tx, events) = mpsc::unbounded_channel();
        state.connections.insert(
            connection_id,
            HubConnection {
                actor,
                joined: HashSet::new(),
                push_tx,
            },
        );

        Ok(LiveConnection {
            handle: Arc::new(HubHandle {
                hub: self.clone(),
                connection_id,
            }),
            events,
        })
    }
}

#[async_trait]
impl HistoryEndpoint for MemoryHub {
    /// Cursor scheme: index of the first message of the previously
    /// returned page; `None` asks for the newest page. Pages come back
    /// oldest-to-newest.
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage> {
        let mut state = self.inner.write().await;
        if state.fail_history_fetches > 0 {
            state.fail_history_fetches -= 1;
            return Err(ChatError::Fetch("simulated history failure".to_string()));
        }

        let Some(conversation) = state.conversations.get(conversation_id) else {
            return Ok(MessagePage {
                messages: Vec::new(),
                next_cursor: None,
            });
        };

        let end = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ChatError::Fetch(format!("invalid history cursor: {}", raw)))?
                .min(conversation.messages.len()),
            None => conversation.messages.len(),
        };
        let start = end.saturating_sub(limit.max(1));

        Ok(MessagePage {
            messages: conversation.messages[start..end].to_vec(),
            next_cursor: (start > 0).then(|| start.to_string()),
        })
    }
}

#[async_trait]
impl ListingEndpoint for MemoryHub {
    async fn fetch_conversations(&self, actor: &ViewingActor) -> Result<Vec<Conversation>> {
        let state = self.inner.read().await;
        let mut list: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.guest_ref == actor.actor_id || c.hotel_ref == actor.actor_id)
            .map(|c| c.summary_for(&actor.actor_id))
            .collect();
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(list)
    }
}

#[async_trait]
impl MarkReadEndpoint for MemoryHub {
    async fn mark_read(&self, conversation_id: &str, actor: &ViewingActor) -> Result<()> {
        let mut state = self.inner.write().await;
        if let Some(conversation) = state.conversations.get_mut(conversation_id) {
            conversation.unread.insert(actor.actor_id.clone(), 0);
        }
        Ok(())
    }
}
