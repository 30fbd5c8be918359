/// Message stream merger: reconciles paginated history fetches and live
/// push delivery into one ordered, duplicate-free timeline per
/// conversation. Merging is a stable sorted insert keyed by
/// (created_at, id), so the visible sequence is identical for every
/// arrival order of the two sources.
use crate::endpoints::HistoryEndpoint;
use crate::error::Result;
use crate::subscription::RoomSubscriptions;
use crate::types::Message;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Outcome of a history page load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Page merged; number of messages not previously seen
    Merged { new_messages: usize, end_of_history: bool },
    /// The view moved on before the page arrived; page dropped
    Discarded,
}

struct Timeline {
    /// Ordered by (created_at, id) ascending
    messages: Vec<Message>,
    /// Ids already merged, for duplicate collapse across sources
    seen: HashSet<String>,
    /// Cursor for the next-older history page
    next_cursor: Option<String>,
    end_of_history: bool,
}

impl Timeline {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            seen: HashSet::new(),
            next_cursor: None,
            end_of_history: false,
        }
    }

    /// Stable sorted insert; duplicates by id collapse to the first entry.
    /// Returns true when the message was newly inserted.
    fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.order_key() < message.order_key());
        self.messages.insert(at, message);
        true
    }
}

#[derive(Clone)]
pub struct MessageStream {
    history: Arc<dyn HistoryEndpoint>,
    subscriptions: RoomSubscriptions,
    timelines: Arc<RwLock<HashMap<String, Timeline>>>,
    page_size: usize,
}

impl MessageStream {
    pub fn new(
        history: Arc<dyn HistoryEndpoint>,
        subscriptions: RoomSubscriptions,
        page_size: usize,
    ) -> Self {
        Self {
            history,
            subscriptions,
            timelines: Arc::new(RwLock::new(HashMap::new())),
            page_size,
        }
    }

    /// Fetch one history page and merge it. A page that completes after the
    /// client left the conversation is discarded at apply-time; an in-flight
    /// fetch is never cancelled. Fetch failures surface for caller retry.
    pub async fn load(&self, conversation_id: &str, cursor: Option<String>) -> Result<LoadOutcome> {
        let page = self
            .history
            .fetch_page(conversation_id, cursor.as_deref(), self.page_size)
            .await?;

        // Apply-time gate: the view may have moved on during the fetch
        if !self.subscriptions.contains(conversation_id).await {
            debug!(conversation_id, "Discarding late history page");
            return Ok(LoadOutcome::Discarded);
        }

        let mut timelines = self.timelines.write().await;
        let timeline = timelines
            .entry(conversation_id.to_string())
            .or_insert_with(Timeline::new);

        let mut new_messages = 0;
        for message in page.messages {
            if timeline.insert(message) {
                new_messages += 1;
            }
        }
        timeline.end_of_history = page.next_cursor.is_none();
        timeline.next_cursor = page.next_cursor;

        debug!(
            conversation_id,
            new_messages,
            end_of_history = timeline.end_of_history,
            "Merged history page"
        );
        Ok(LoadOutcome::Merged {
            new_messages,
            end_of_history: timeline.end_of_history,
        })
    }

    /// Fetch the next-older page using the stored cursor. No-op once
    /// end-of-history was declared.
    pub async fn load_older(&self, conversation_id: &str) -> Result<LoadOutcome> {
        let cursor = {
            let timelines = self.timelines.read().await;
            match timelines.get(conversation_id) {
                Some(t) if t.end_of_history => {
                    return Ok(LoadOutcome::Merged {
                        new_messages: 0,
                        end_of_history: true,
                    })
                }
                Some(t) => t.next_cursor.clone(),
                None => None,
            }
        };
        self.load(conversation_id, cursor).await
    }

    /// Merge one push-delivered message. Events for conversations outside
    /// the subscription set are ignored; a duplicate id is discarded.
    /// Returns true when the message was newly inserted.
    pub async fn apply_live(&self, message: &Message) -> bool {
        if !self.subscriptions.contains(&message.conversation_id).await {
            debug!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                "Ignoring push for conversation not joined"
            );
            return false;
        }

        let mut timelines = self.timelines.write().await;
        let timeline = timelines
            .entry(message.conversation_id.clone())
            .or_insert_with(Timeline::new);
        timeline.insert(message.clone())
    }

    /// Current ordered snapshot for a conversation
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        let timelines = self.timelines.read().await;
        timelines
            .get(conversation_id)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }
}
