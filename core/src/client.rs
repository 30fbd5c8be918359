/// Chat client facade: wires the connection manager, room subscriptions,
/// message stream, directory and read-state tracker behind the imperative
/// surface the UI layer consumes. One client per session; the same core
/// serves guest and hotel-operator views, parameterized by the session's
/// viewing actor.
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::directory::ConversationDirectory;
use crate::endpoints::{HistoryEndpoint, ListingEndpoint, LiveChannel, MarkReadEndpoint};
use crate::error::{ChatError, Result};
use crate::message_stream::{LoadOutcome, MessageStream};
use crate::read_state::ReadStateTracker;
use crate::session::SessionContext;
use crate::subscription::RoomSubscriptions;
use crate::types::{ChatEvent, ConnectionState, Conversation, Message, PushEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Capacity of the application-facing event broadcast
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct ChatClient {
    session: SessionContext,
    connection: ConnectionManager,
    subscriptions: RoomSubscriptions,
    stream: MessageStream,
    directory: ConversationDirectory,
    read_state: ReadStateTracker,
    listing: Arc<dyn ListingEndpoint>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatClient {
    pub fn new(
        config: Config,
        session: SessionContext,
        channel: Arc<dyn LiveChannel>,
        history: Arc<dyn HistoryEndpoint>,
        listing: Arc<dyn ListingEndpoint>,
        mark_read: Arc<dyn MarkReadEndpoint>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let subscriptions = RoomSubscriptions::new();
        let connection = ConnectionManager::new(
            config.clone(),
            session.clone(),
            channel,
            subscriptions.clone(),
            push_tx,
            events.clone(),
        );
        let stream = MessageStream::new(history, subscriptions.clone(), config.history_page_size);
        let directory = ConversationDirectory::new(session.viewing_actor().clone());
        let read_state = ReadStateTracker::new(
            session.viewing_actor().clone(),
            directory.clone(),
            mark_read,
            events.clone(),
        );

        let client = Arc::new(Self {
            session,
            connection,
            subscriptions,
            stream,
            directory,
            read_state,
            listing,
            events,
        });

        // Single consumer: push events are applied strictly in arrival order
        let loop_client = client.clone();
        tokio::spawn(async move { loop_client.run_event_loop(push_rx).await });

        client
    }

    /// Connect the live channel with the session's credential.
    /// Auth failures propagate; transport failures are retried in the
    /// background and observable via `connection_state`.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Tear the live channel down; room subscriptions survive for the
    /// next connect.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Connection-state signal
    pub fn connection_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.connection.state()
    }

    /// Application-facing event stream
    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Enter a conversation view: join its room, make it the active
    /// conversation, mark it read, and pull the newest history page.
    /// The page is fetched on every open, not just the first: messages
    /// that landed while the view was closed (and thus unjoined) only
    /// exist on the history side, and the sorted-dedup merge makes the
    /// refetch idempotent.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        let handle = self.connection.live_handle().await;
        self.subscriptions.join(conversation_id, handle).await;
        self.read_state
            .set_active(Some(conversation_id.to_string()))
            .await;
        self.read_state.mark_read(conversation_id).await;

        self.stream.load(conversation_id, None).await?;
        info!(conversation_id, "Conversation opened");
        Ok(())
    }

    /// Leave a conversation view. In-flight history fetches are not
    /// cancelled; their late pages are discarded at apply-time.
    pub async fn close_conversation(&self, conversation_id: &str) {
        if self.read_state.active_conversation().await.as_deref() == Some(conversation_id) {
            self.read_state.set_active(None).await;
        }
        let handle = self.connection.live_handle().await;
        self.subscriptions.leave(conversation_id, handle).await;
        info!(conversation_id, "Conversation closed");
    }

    /// Publish a message to a conversation. Returns `SendBlocked` when the
    /// channel is not connected; confirmation arrives as the push echo.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidMessage(
                "content must not be empty".to_string(),
            ));
        }
        let actor = self.session.viewing_actor();
        self.connection
            .send(conversation_id, &actor.actor_id, actor.actor_type, content)
            .await
    }

    /// Pull the next-older history page for a conversation
    pub async fn load_older(&self, conversation_id: &str) -> Result<LoadOutcome> {
        self.stream.load_older(conversation_id).await
    }

    /// Pull the conversation listing and reconcile it with local state
    pub async fn refresh_directory(&self) -> Result<()> {
        let fetched = self
            .listing
            .fetch_conversations(self.session.viewing_actor())
            .await?;
        self.directory.refresh(fetched).await;
        Ok(())
    }

    /// Ordered message snapshot for an open conversation
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.stream.messages(conversation_id).await
    }

    /// Conversation list, most-recently-active first
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.directory.conversations().await
    }

    pub async fn unread_count(&self, conversation_id: &str) -> u32 {
        self.directory.unread_count(conversation_id).await
    }

    /// Drain push events in arrival order. The timeline merge runs first:
    /// its membership gate drops strays for conversations not joined, and
    /// its id dedup collapses redelivery. Only a newly inserted message
    /// touches the directory (increment rules live there) and feeds the
    /// read-state tracker, so a duplicate cannot bump unread counts twice.
    async fn run_event_loop(&self, mut push_rx: mpsc::UnboundedReceiver<PushEvent>) {
        while let Some(event) = push_rx.recv().await {
            match event {
                PushEvent::NewMessage { message } => {
                    if !self.stream.apply_live(&message).await {
                        debug!(
                            conversation_id = %message.conversation_id,
                            message_id = %message.id,
                            "Dropping stray or duplicate push event"
                        );
                        continue;
                    }

                    let active = self.read_state.active_conversation().await;
                    self.directory.touch(&message, active.as_deref()).await;
                    let _ = self.events.send(ChatEvent::ConversationTouched {
                        conversation_id: message.conversation_id.clone(),
                    });

                    self.read_state.observe_incoming(&message).await;
                    let _ = self.events.send(ChatEvent::MessageReceived { message });
                }
            }
        }
        debug!("Push event loop finished");
    }
}
