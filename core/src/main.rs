/// Concierge chat demo - Main entry point
///
/// Runs a scripted guest/operator exchange over the in-process hub and
/// prints both views, exercising connect, join, send, push echo, unread
/// tracking and mark-read.
use concierge_core::memory_hub::MemoryHub;
use concierge_core::{
    ChatClient, Config, SenderType, SessionContext, SessionCredential, ViewingActor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let hub = MemoryHub::new();

    let guest_token = SessionCredential::new("guest-token");
    let operator_token = SessionCredential::new("operator-token");
    let guest_actor = ViewingActor::new("guest-42", SenderType::Guest);
    let operator_actor = ViewingActor::new("hotel-7", SenderType::HotelOperator);

    hub.register_credential(&guest_token, guest_actor.clone()).await;
    hub.register_credential(&operator_token, operator_actor.clone())
        .await;
    hub.create_conversation("c1", "guest-42", "hotel-7").await;

    // Two independent sessions share nothing but the hub
    let guest = ChatClient::new(
        Config::from_env(),
        SessionContext::init(guest_actor, guest_token),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
    );
    let operator = ChatClient::new(
        Config::from_env(),
        SessionContext::init(operator_actor, operator_token),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
        Arc::new(hub.clone()),
    );

    guest.connect().await?;
    operator.connect().await?;

    guest.open_conversation("c1").await?;
    guest
        .send_message("c1", "Hello! Is early check-in possible on Friday?")
        .await?;

    // Give the push echo time to land
    tokio::time::sleep(Duration::from_millis(100)).await;

    operator.refresh_directory().await?;
    for conversation in operator.conversations().await {
        info!(
            conversation_id = %conversation.id,
            unread = conversation.unread_count,
            preview = conversation
                .last_message
                .as_ref()
                .map(|m| m.content.as_str())
                .unwrap_or("-"),
            "Operator directory"
        );
    }

    operator.open_conversation("c1").await?;
    operator
        .send_message("c1", "Of course - check-in opens at noon that day.")
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for message in guest.messages("c1").await {
        info!(
            sender = %message.sender_id,
            at = %message.created_at,
            "{}",
            message.content
        );
    }
    info!(
        guest_unread = guest.unread_count("c1").await,
        operator_unread = operator.unread_count("c1").await,
        "Final read state"
    );

    guest.disconnect().await;
    operator.disconnect().await;
    Ok(())
}
