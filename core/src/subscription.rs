/// Room subscription set: which conversations this client receives push
/// events for. Membership is independent of connection state; the set
/// survives disconnects and is replayed after every reconnect.
use crate::endpoints::LiveHandle;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RoomSubscriptions {
    joined: Arc<RwLock<HashSet<String>>>,
}

impl RoomSubscriptions {
    pub fn new() -> Self {
        Self {
            joined: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Record membership and, when a connection is up, notify the channel.
    /// No-op if already joined. The notify is awaited so a send issued
    /// right after joining is already in scope for push delivery; it is
    /// still best-effort against the current connection (a failure only
    /// gets logged — the reconnect replay re-issues it).
    pub async fn join(&self, conversation_id: &str, handle: Option<Arc<dyn LiveHandle>>) {
        let newly_joined = self.joined.write().await.insert(conversation_id.to_string());
        if !newly_joined {
            return;
        }
        debug!(conversation_id, "Joined conversation");

        if let Some(handle) = handle {
            if let Err(e) = handle.join(conversation_id).await {
                warn!(conversation_id, "Join notify failed: {}", e);
            }
        }
    }

    /// Remove membership and, when connected, tell the channel to stop
    /// pushing for this conversation. Stray events that still arrive are
    /// dropped by the merger's membership gate.
    pub async fn leave(&self, conversation_id: &str, handle: Option<Arc<dyn LiveHandle>>) {
        let was_joined = self.joined.write().await.remove(conversation_id);
        if !was_joined {
            return;
        }
        debug!(conversation_id, "Left conversation");

        if let Some(handle) = handle {
            let id = conversation_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = handle.leave(&id).await {
                    warn!(conversation_id = %id, "Leave notify failed: {}", e);
                }
            });
        }
    }

    pub async fn contains(&self, conversation_id: &str) -> bool {
        self.joined.read().await.contains(conversation_id)
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.joined.read().await.iter().cloned().collect()
    }

    /// Re-issue join for every member. Called by the connection manager
    /// each time the channel re-enters Connected.
    pub async fn replay(&self, handle: &Arc<dyn LiveHandle>) {
        let members = self.snapshot().await;
        for id in members {
            match handle.join(&id).await {
                Ok(()) => debug!(conversation_id = %id, "Replayed join"),
                Err(e) => warn!(conversation_id = %id, "Join replay failed: {}", e),
            }
        }
    }
}

impl Default for RoomSubscriptions {
    fn default() -> Self {
        Self::new()
    }
}
