/// Process-wide session context with explicit init/teardown.
/// The credential is set on login and cleared on logout; the connection
/// manager reads it at connect time instead of consulting global state.
use crate::types::{SessionCredential, ViewingActor};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Clone)]
pub struct SessionContext {
    viewing_actor: ViewingActor,
    credential: Arc<RwLock<Option<SessionCredential>>>,
}

impl SessionContext {
    /// Initialize a session for one viewing actor
    pub fn init(viewing_actor: ViewingActor, credential: SessionCredential) -> Self {
        info!(
            actor_id = %viewing_actor.actor_id,
            actor_type = ?viewing_actor.actor_type,
            "Session initialized"
        );
        Self {
            viewing_actor,
            credential: Arc::new(RwLock::new(Some(credential))),
        }
    }

    /// The actor whose view this session renders
    pub fn viewing_actor(&self) -> &ViewingActor {
        &self.viewing_actor
    }

    /// Current credential, if the session is still authenticated
    pub async fn credential(&self) -> Option<SessionCredential> {
        self.credential.read().await.clone()
    }

    /// Replace the credential (e.g. after re-authentication)
    pub async fn set_credential(&self, credential: SessionCredential) {
        *self.credential.write().await = Some(credential);
    }

    /// Clear the credential on logout. Subsequent connects fail with Auth.
    pub async fn teardown(&self) {
        *self.credential.write().await = None;
        info!(actor_id = %self.viewing_actor.actor_id, "Session torn down");
    }
}
