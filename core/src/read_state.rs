/// Read-state tracking: when a conversation transitions to "read".
/// Local state is the source of truth; the remote mark-read call is
/// best-effort synchronization and its failure never rolls back the
/// local zeroing.
use crate::directory::ConversationDirectory;
use crate::endpoints::MarkReadEndpoint;
use crate::types::{ChatEvent, Message, ViewingActor};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ReadStateTracker {
    viewing_actor: ViewingActor,
    directory: ConversationDirectory,
    endpoint: Arc<dyn MarkReadEndpoint>,
    active: Arc<RwLock<Option<String>>>,
    events: broadcast::Sender<ChatEvent>,
}

impl ReadStateTracker {
    pub fn new(
        viewing_actor: ViewingActor,
        directory: ConversationDirectory,
        endpoint: Arc<dyn MarkReadEndpoint>,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            viewing_actor,
            directory,
            endpoint,
            active: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// The conversation currently open in the active view, if any
    pub async fn active_conversation(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    pub async fn set_active(&self, conversation_id: Option<String>) {
        *self.active.write().await = conversation_id;
    }

    /// Zero the local unread count and issue the remote mark-read call.
    /// The remote call is fire-and-forget; a failure is logged only.
    pub async fn mark_read(&self, conversation_id: &str) {
        self.directory.mark_read(conversation_id).await;
        let _ = self.events.send(ChatEvent::ConversationRead {
            conversation_id: conversation_id.to_string(),
        });

        let endpoint = self.endpoint.clone();
        let actor = self.viewing_actor.clone();
        let id = conversation_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = endpoint.mark_read(&id, &actor).await {
                warn!(conversation_id = %id, "Remote mark-read failed: {}", e);
            }
        });
        debug!(conversation_id, "Marked read");
    }

    /// A counterpart-authored message arriving while its conversation is
    /// the open one keeps that conversation read.
    pub async fn observe_incoming(&self, message: &Message) {
        if self.viewing_actor.authored(message) {
            return;
        }
        let is_active = self
            .active_conversation()
            .await
            .as_deref()
            .map_or(false, |a| a == message.conversation_id);
        if is_active {
            self.mark_read(&message.conversation_id).await;
        }
    }
}
