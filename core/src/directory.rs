/// Conversation directory: the actor's conversation list, most-recent
/// activity first, with unread counts and last-message previews.
/// Reconciles pull-based listing fetches with live "conversation touched"
/// signals; a fetch never clobbers a strictly fresher local entry.
use crate::types::{Conversation, Message, SenderType, ViewingActor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone)]
pub struct ConversationDirectory {
    viewing_actor: ViewingActor,
    entries: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl ConversationDirectory {
    pub fn new(viewing_actor: ViewingActor) -> Self {
        Self {
            viewing_actor,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace local state with a fetched listing, keeping any local entry
    /// that is strictly fresher by updated_at (a live touch that landed
    /// after the fetch was issued must survive the reconcile). Local
    /// entries missing from the fetch (first contact seen live before the
    /// backend listed it) are kept as well.
    pub async fn refresh(&self, fetched: Vec<Conversation>) {
        let mut entries = self.entries.write().await;
        for conversation in fetched {
            match entries.get(&conversation.id) {
                Some(local) if local.updated_at > conversation.updated_at => {
                    debug!(
                        conversation_id = %conversation.id,
                        "Keeping locally fresher conversation over fetched copy"
                    );
                }
                _ => {
                    entries.insert(conversation.id.clone(), conversation);
                }
            }
        }
    }

    /// Apply one live-delivered message to the list: move the conversation
    /// to the front, update its preview, and increment unread by exactly
    /// one — unless the message is self-authored or the conversation is the
    /// active one. Unread is counted per message, never re-derived, so
    /// overlapping merges cannot double count.
    pub async fn touch(&self, message: &Message, active_conversation: Option<&str>) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(message.conversation_id.clone())
            .or_insert_with(|| self.entry_from_first_contact(message));

        let is_active = active_conversation == Some(message.conversation_id.as_str());
        let self_authored = self.viewing_actor.authored(message);
        if !self_authored && !is_active {
            entry.unread_count += 1;
        }

        if entry.updated_at < message.created_at {
            entry.updated_at = message.created_at;
        }
        // Out-of-order delivery must not roll the preview back
        let preview_stale = entry
            .last_message
            .as_ref()
            .map_or(true, |current| current.order_key() <= message.order_key());
        if preview_stale {
            entry.last_message = Some(message.clone());
        }

        debug!(
            conversation_id = %message.conversation_id,
            unread = entry.unread_count,
            "Conversation touched"
        );
    }

    /// Reset a conversation's unread count to zero
    pub async fn mark_read(&self, conversation_id: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(conversation_id) {
            entry.unread_count = 0;
        }
    }

    pub async fn unread_count(&self, conversation_id: &str) -> u32 {
        let entries = self.entries.read().await;
        entries.get(conversation_id).map_or(0, |c| c.unread_count)
    }

    /// Snapshot ordered most-recently-active first, ties broken by id
    pub async fn conversations(&self) -> Vec<Conversation> {
        let entries = self.entries.read().await;
        let mut list: Vec<Conversation> = entries.values().cloned().collect();
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    /// Directory entry for a conversation first seen via live delivery.
    /// Participant refs are filled from what the message reveals; a later
    /// refresh completes whichever side is still unknown.
    fn entry_from_first_contact(&self, message: &Message) -> Conversation {
        let mut guest_ref = String::new();
        let mut hotel_ref = String::new();
        match message.sender_type {
            SenderType::Guest => guest_ref = message.sender_id.clone(),
            SenderType::HotelOperator => hotel_ref = message.sender_id.clone(),
        }
        match self.viewing_actor.actor_type {
            SenderType::Guest if guest_ref.is_empty() => {
                guest_ref = self.viewing_actor.actor_id.clone();
            }
            SenderType::HotelOperator if hotel_ref.is_empty() => {
                hotel_ref = self.viewing_actor.actor_id.clone();
            }
            _ => {}
        }
        Conversation {
            id: message.conversation_id.clone(),
            guest_ref,
            hotel_ref,
            last_message: None,
            unread_count: 0,
            updated_at: message.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn actor() -> ViewingActor {
        ViewingActor::new("guest-1", SenderType::Guest)
    }

    fn counterpart_msg(id: &str, conversation_id: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "hotel-1".to_string(),
            sender_type: SenderType::HotelOperator,
            content: "hello".to_string(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn own_msg(id: &str, conversation_id: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "guest-1".to_string(),
            sender_type: SenderType::Guest,
            content: "hi".to_string(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn listed(id: &str, secs: i64, unread: u32) -> Conversation {
        Conversation {
            id: id.to_string(),
            guest_ref: "guest-1".to_string(),
            hotel_ref: "hotel-1".to_string(),
            last_message: None,
            unread_count: unread,
            updated_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn counterpart_message_increments_unread_once_per_message() {
        let dir = ConversationDirectory::new(actor());
        dir.touch(&counterpart_msg("m1", "c1", 10), None).await;
        dir.touch(&counterpart_msg("m2", "c1", 20), None).await;
        assert_eq!(dir.unread_count("c1").await, 2);
    }

    #[tokio::test]
    async fn self_authored_message_never_increments_unread() {
        let dir = ConversationDirectory::new(actor());
        dir.touch(&own_msg("m1", "c1", 10), None).await;
        assert_eq!(dir.unread_count("c1").await, 0);
    }

    #[tokio::test]
    async fn active_conversation_suppresses_increment() {
        let dir = ConversationDirectory::new(actor());
        dir.touch(&counterpart_msg("m1", "c1", 10), Some("c1")).await;
        assert_eq!(dir.unread_count("c1").await, 0);
    }

    #[tokio::test]
    async fn mark_read_resets_to_zero() {
        let dir = ConversationDirectory::new(actor());
        dir.touch(&counterpart_msg("m1", "c1", 10), None).await;
        dir.mark_read("c1").await;
        assert_eq!(dir.unread_count("c1").await, 0);
    }

    #[tokio::test]
    async fn refresh_does_not_clobber_fresher_local_entry() {
        let dir = ConversationDirectory::new(actor());
        // live touch lands after the fetch was issued
        dir.touch(&counterpart_msg("m5", "c1", 100), None).await;
        dir.refresh(vec![listed("c1", 50, 0)]).await;
        assert_eq!(dir.unread_count("c1").await, 1);
    }

    #[tokio::test]
    async fn refresh_adopts_fresher_fetched_entry() {
        let dir = ConversationDirectory::new(actor());
        dir.touch(&counterpart_msg("m1", "c1", 10), None).await;
        dir.refresh(vec![listed("c1", 50, 3)]).await;
        assert_eq!(dir.unread_count("c1").await, 3);
    }

    #[tokio::test]
    async fn ordering_is_most_recent_first_with_id_ties() {
        let dir = ConversationDirectory::new(actor());
        dir.refresh(vec![listed("c2", 10, 0), listed("c3", 20, 0), listed("c1", 10, 0)])
            .await;
        let ids: Vec<String> = dir.conversations().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c3", "c1", "c2"]);

        // a touch moves a conversation to the front
        dir.touch(&counterpart_msg("m9", "c2", 30), None).await;
        let ids: Vec<String> = dir.conversations().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids[0], "c2");
    }

    #[tokio::test]
    async fn older_message_delivered_late_keeps_newest_preview() {
        let dir = ConversationDirectory::new(actor());
        dir.touch(&counterpart_msg("m2", "c1", 200), None).await;
        dir.touch(&counterpart_msg("m1", "c1", 100), None).await;

        let list = dir.conversations().await;
        assert_eq!(list[0].last_message.as_ref().unwrap().id, "m2");
        assert_eq!(list[0].updated_at, Utc.timestamp_opt(200, 0).unwrap());
        // the late message still counts toward unread
        assert_eq!(dir.unread_count("c1").await, 2);
    }

    #[tokio::test]
    async fn first_contact_creates_entry_with_preview() {
        let dir = ConversationDirectory::new(actor());
        dir.touch(&counterpart_msg("m1", "c9", 10), None).await;
        let list = dir.conversations().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "c9");
        assert_eq!(list[0].hotel_ref, "hotel-1");
        assert_eq!(list[0].guest_ref, "guest-1");
        assert_eq!(list[0].last_message.as_ref().unwrap().id, "m1");
    }
}
