/// Chat core integration tests
/// Two independent sessions (guest + hotel operator) over the in-process
/// hub: unread accounting, reconnect replay, retry exhaustion, send gating.
extern crate concierge_core;

use async_trait::async_trait;
use concierge_core::endpoints::{LiveChannel, LiveConnection};
use concierge_core::memory_hub::MemoryHub;
use concierge_core::{
    ChatClient, ChatError, Config, ConnectionState, Result, SenderType, SessionContext,
    SessionCredential, ViewingActor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn fast_config() -> Config {
    Config {
        max_connect_attempts: 4,
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(40),
        retry_jitter: Duration::ZERO,
        history_page_size: 50,
    }
}

async fn session(
    hub: &MemoryHub,
    actor_id: &str,
    actor_type: SenderType,
) -> (Arc<ChatClient>, SessionCredential) {
    let credential = SessionCredential::new(format!("{}-token", actor_id));
    let actor = ViewingActor::new(actor_id, actor_type);
    hub.register_credential(&credential, actor.clone()).await;
    let client = ChatClient::new(
        fast_config(),
        SessionContext::init(actor, credential.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
    );
    (client, credential)
}

async fn wait_for_state(
    rx: &mut tokio::sync::watch::Receiver<ConnectionState>,
    state: ConnectionState,
) {
    timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for connection state")
        .expect("state channel closed");
}

#[tokio::test]
async fn guest_hello_reaches_operator_with_unread_then_mark_read() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;

    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;
    let (operator, _) = session(&hub, "hotel-1", SenderType::HotelOperator).await;
    guest.connect().await.unwrap();
    operator.connect().await.unwrap();

    guest.open_conversation("c1").await.unwrap();
    guest.send_message("c1", "Hello").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // The sender's own view: echo merged, unread stays zero
    let guest_view = guest.messages("c1").await;
    assert_eq!(guest_view.len(), 1);
    assert_eq!(guest_view[0].content, "Hello");
    assert_eq!(guest.unread_count("c1").await, 0);

    // The operator's independent session sees c1 on top with unread = 1
    operator.refresh_directory().await.unwrap();
    let listed = operator.conversations().await;
    assert_eq!(listed[0].id, "c1");
    assert_eq!(listed[0].unread_count, 1);
    assert_eq!(listed[0].last_message.as_ref().unwrap().content, "Hello");

    // Opening the conversation marks it read and loads exactly [m1]
    operator.open_conversation("c1").await.unwrap();
    assert_eq!(operator.unread_count("c1").await, 0);
    let history = operator.messages("c1").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Hello");
}

#[tokio::test]
async fn counterpart_message_while_conversation_open_stays_read() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;

    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;
    let (operator, _) = session(&hub, "hotel-1", SenderType::HotelOperator).await;
    guest.connect().await.unwrap();
    operator.connect().await.unwrap();

    guest.open_conversation("c1").await.unwrap();
    operator.open_conversation("c1").await.unwrap();

    operator.send_message("c1", "Welcome!").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // Arrived while the conversation is the active one: no unread
    assert_eq!(guest.unread_count("c1").await, 0);
    assert_eq!(guest.messages("c1").await.len(), 1);

    // After the guest leaves, pushes stop; the server still counts unread
    guest.close_conversation("c1").await;
    operator.send_message("c1", "One more thing...").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    guest.refresh_directory().await.unwrap();
    assert_eq!(guest.unread_count("c1").await, 1);
}

#[tokio::test]
async fn reconnect_replays_all_joined_conversations() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;
    hub.create_conversation("c2", "guest-1", "hotel-1").await;

    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;
    guest.connect().await.unwrap();
    guest.open_conversation("c1").await.unwrap();
    guest.open_conversation("c2").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.joined_rooms_for("guest-1").await, vec!["c1", "c2"]);

    hub.drop_connections_for("guest-1").await;
    assert_eq!(hub.connection_count().await, 0);

    // Losing the connection does not clear subscriptions; they are
    // replayed with no caller action once the channel is back up
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hub.joined_rooms_for("guest-1").await != vec!["c1", "c2"] {
        assert!(
            tokio::time::Instant::now() < deadline,
            "reconnect did not replay joined conversations"
        );
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*guest.connection_state().borrow(), ConnectionState::Connected);

    // Push delivery works again on the new connection
    let (operator, _) = session(&hub, "hotel-1", SenderType::HotelOperator).await;
    operator.connect().await.unwrap();
    operator.open_conversation("c2").await.unwrap();
    operator.send_message("c2", "still there?").await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(guest.messages("c2").await.len(), 1);
}

#[tokio::test]
async fn retry_exhaustion_settles_disconnected_and_join_is_queued() {
    let hub = MemoryHub::new();
    hub.create_conversation("c2", "guest-1", "hotel-1").await;

    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;
    // First attempt plus the whole retry budget fail
    hub.fail_next_connects(1 + fast_config().max_connect_attempts).await;

    guest.connect().await.unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(*guest.connection_state().borrow(), ConnectionState::Disconnected);
    assert_eq!(hub.connection_count().await, 0);

    // join while disconnected is accepted without error...
    guest.open_conversation("c2").await.unwrap();

    // ...and replayed automatically on the next successful connect
    let mut state = guest.connection_state();
    guest.connect().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.joined_rooms_for("guest-1").await, vec!["c2"]);
}

#[tokio::test]
async fn invalid_credential_fails_without_retry() {
    let hub = MemoryHub::new();
    let credential = SessionCredential::new("revoked");
    let actor = ViewingActor::new("guest-1", SenderType::Guest);
    // Never registered with the hub
    let guest = ChatClient::new(
        fast_config(),
        SessionContext::init(actor, credential),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
    );

    let err = guest.connect().await.unwrap_err();
    assert!(matches!(err, ChatError::Auth(_)));
    assert_eq!(*guest.connection_state().borrow(), ConnectionState::Disconnected);
    assert_eq!(hub.connection_count().await, 0);
}

#[tokio::test]
async fn send_while_disconnected_is_blocked_not_queued() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;
    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;

    let err = guest.send_message("c1", "hello?").await.unwrap_err();
    assert!(matches!(err, ChatError::SendBlocked));

    // Nothing was queued: connecting later does not deliver it
    guest.connect().await.unwrap();
    guest.open_conversation("c1").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(guest.messages("c1").await.is_empty());
}

#[tokio::test]
async fn failed_history_fetch_surfaces_and_can_be_retried() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;
    hub.seed_message(
        "c1",
        "hotel-1",
        SenderType::HotelOperator,
        "Welcome back!",
        chrono::Utc::now(),
    )
    .await;

    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;
    guest.connect().await.unwrap();

    hub.fail_next_history_fetches(1).await;
    let err = guest.open_conversation("c1").await.unwrap_err();
    assert!(matches!(err, ChatError::Fetch(_)));

    // Caller retries explicitly; the second open loads the page
    guest.open_conversation("c1").await.unwrap();
    assert_eq!(guest.messages("c1").await.len(), 1);
}

#[tokio::test]
async fn history_pagination_walks_back_to_the_beginning() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;
    let base = chrono::Utc::now() - chrono::Duration::minutes(10);
    for i in 0..7i64 {
        hub.seed_message(
            "c1",
            "hotel-1",
            SenderType::HotelOperator,
            &format!("note {}", i),
            base + chrono::Duration::seconds(i),
        )
        .await;
    }

    let hub_arc = Arc::new(hub.clone());
    let credential = SessionCredential::new("guest-1-token");
    let actor = ViewingActor::new("guest-1", SenderType::Guest);
    hub.register_credential(&credential, actor.clone()).await;
    let guest = ChatClient::new(
        Config {
            history_page_size: 3,
            ..fast_config()
        },
        SessionContext::init(actor, credential),
        hub_arc.clone(),
        hub_arc.clone(),
        hub_arc.clone(),
        hub_arc,
    );

    guest.connect().await.unwrap();
    guest.open_conversation("c1").await.unwrap();
    assert_eq!(guest.messages("c1").await.len(), 3);

    guest.load_older("c1").await.unwrap();
    assert_eq!(guest.messages("c1").await.len(), 6);

    guest.load_older("c1").await.unwrap();
    let all = guest.messages("c1").await;
    assert_eq!(all.len(), 7);
    // Oldest-to-newest across all pages
    assert_eq!(all[0].content, "note 0");
    assert_eq!(all[6].content, "note 6");
}

#[tokio::test]
async fn teardown_clears_credential_and_blocks_connect() {
    let hub = MemoryHub::new();
    let credential = SessionCredential::new("guest-1-token");
    let actor = ViewingActor::new("guest-1", SenderType::Guest);
    hub.register_credential(&credential, actor.clone()).await;
    let session_ctx = SessionContext::init(actor, credential);
    let guest = ChatClient::new(
        fast_config(),
        session_ctx.clone(),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
    );

    guest.connect().await.unwrap();
    guest.disconnect().await;

    session_ctx.teardown().await;
    let err = guest.connect().await.unwrap_err();
    assert!(matches!(err, ChatError::Auth(_)));
}

#[tokio::test]
async fn credential_revocation_during_reconnect_settles_disconnected() {
    let hub = MemoryHub::new();
    let (guest, credential) = session(&hub, "guest-1", SenderType::Guest).await;
    guest.connect().await.unwrap();

    let mut state = guest.connection_state();
    hub.revoke_credential(&credential).await;
    hub.drop_connections_for("guest-1").await;

    // The retry loop hits the auth rejection and gives up rather than
    // burning the rest of the budget
    wait_for_state(&mut state, ConnectionState::Disconnected).await;
    assert_eq!(hub.connection_count().await, 0);
}

#[tokio::test]
async fn disconnect_during_retry_delay_stops_the_loop() {
    let hub = MemoryHub::new();
    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;

    // First attempt fails, pushing the manager into its retry loop;
    // the user disconnects before the next attempt fires
    hub.fail_next_connects(1).await;
    guest.connect().await.unwrap();
    guest.disconnect().await;

    // Give the loop time to have run every attempt it would have made
    sleep(Duration::from_millis(300)).await;
    assert_eq!(*guest.connection_state().borrow(), ConnectionState::Disconnected);
    assert_eq!(hub.connection_count().await, 0);

    // The manager is still usable afterwards
    guest.connect().await.unwrap();
    let mut state = guest.connection_state();
    wait_for_state(&mut state, ConnectionState::Connected).await;
}

#[tokio::test]
async fn reopening_recovers_messages_sent_while_closed() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;

    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;
    let (operator, _) = session(&hub, "hotel-1", SenderType::HotelOperator).await;
    guest.connect().await.unwrap();
    operator.connect().await.unwrap();
    operator.open_conversation("c1").await.unwrap();

    guest.open_conversation("c1").await.unwrap();
    operator.send_message("c1", "first").await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(guest.messages("c1").await.len(), 1);

    // Sent while the guest's view is closed: no push reaches the guest
    guest.close_conversation("c1").await;
    operator.send_message("c1", "second").await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(guest.messages("c1").await.len(), 1);

    // Reopening refetches history and closes the gap
    guest.open_conversation("c1").await.unwrap();
    let all = guest.messages("c1").await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].content, "first");
    assert_eq!(all[1].content, "second");
}

/// Live channel wrapper that delivers every push event twice, modeling
/// at-least-once transports that redeliver across flaky links
struct RedeliveringChannel {
    inner: MemoryHub,
}

#[async_trait]
impl LiveChannel for RedeliveringChannel {
    async fn connect(&self, credential: &SessionCredential) -> Result<LiveConnection> {
        let LiveConnection { handle, mut events } = self.inner.connect(credential).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let _ = tx.send(event.clone());
                let _ = tx.send(event);
            }
        });
        Ok(LiveConnection { handle, events: rx })
    }
}

#[tokio::test]
async fn redelivered_push_counts_unread_once() {
    let hub = MemoryHub::new();
    hub.create_conversation("c1", "guest-1", "hotel-1").await;
    hub.create_conversation("c2", "guest-1", "hotel-1").await;

    let credential = SessionCredential::new("guest-1-token");
    let actor = ViewingActor::new("guest-1", SenderType::Guest);
    hub.register_credential(&credential, actor.clone()).await;
    let guest = ChatClient::new(
        fast_config(),
        SessionContext::init(actor, credential),
        Arc::new(RedeliveringChannel { inner: hub.clone() }),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
    );
    let (operator, _) = session(&hub, "hotel-1", SenderType::HotelOperator).await;
    guest.connect().await.unwrap();
    operator.connect().await.unwrap();

    // c1 stays joined but inactive once c2 becomes the open view
    guest.open_conversation("c1").await.unwrap();
    guest.open_conversation("c2").await.unwrap();
    operator.open_conversation("c1").await.unwrap();

    operator.send_message("c1", "your room is ready").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // Both copies arrive; the duplicate neither re-enters the timeline
    // nor bumps the unread count a second time
    assert_eq!(guest.messages("c1").await.len(), 1);
    assert_eq!(guest.unread_count("c1").await, 1);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_always_reachable() {
    let hub = MemoryHub::new();
    let (guest, _) = session(&hub, "guest-1", SenderType::Guest).await;

    // From Disconnected
    guest.disconnect().await;
    assert_eq!(*guest.connection_state().borrow(), ConnectionState::Disconnected);

    // From Connected, twice
    guest.connect().await.unwrap();
    guest.disconnect().await;
    guest.disconnect().await;
    assert_eq!(*guest.connection_state().borrow(), ConnectionState::Disconnected);
    assert_eq!(hub.connection_count().await, 0);
}
