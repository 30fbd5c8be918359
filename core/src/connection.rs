/// Connection manager: lifecycle of the one authenticated live channel
/// per active session.
///
/// State machine: Disconnected -> Connecting -> Connected, and back to
/// Disconnected on credential invalidation, explicit disconnect, or retry
/// exhaustion. Auth failures propagate to the caller and are never
/// retried; transport failures are retried up to a bounded attempt budget
/// with doubling delay, then settle as an observable Disconnected state.
use crate::config::Config;
use crate::endpoints::{LiveChannel, LiveConnection, LiveHandle};
use crate::error::{ChatError, Result};
use crate::session::SessionContext;
use crate::subscription::RoomSubscriptions;
use crate::types::{ChatEvent, ConnectionState, PushEvent, SenderType};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ConnectionManager {
    config: Config,
    session: SessionContext,
    channel: Arc<dyn LiveChannel>,
    subscriptions: RoomSubscriptions,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    handle: Arc<RwLock<Option<Arc<dyn LiveHandle>>>>,
    /// Push events are forwarded here and drained by the client event loop
    push_tx: mpsc::UnboundedSender<PushEvent>,
    events: broadcast::Sender<ChatEvent>,
    /// False after an explicit disconnect; suppresses the retry loop
    wanted: Arc<AtomicBool>,
    /// Bumped per established connection so a stale pump task cannot
    /// trigger a reconnect after disconnect() or a newer connection
    generation: Arc<AtomicU64>,
}

impl ConnectionManager {
    pub fn new(
        config: Config,
        session: SessionContext,
        channel: Arc<dyn LiveChannel>,
        subscriptions: RoomSubscriptions,
        push_tx: mpsc::UnboundedSender<PushEvent>,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            session,
            channel,
            subscriptions,
            state_tx: Arc::new(state_tx),
            handle: Arc::new(RwLock::new(None)),
            push_tx,
            events,
            wanted: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Observable connection-state signal
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Current command handle, present only while Connected
    pub async fn live_handle(&self) -> Option<Arc<dyn LiveHandle>> {
        self.handle.read().await.clone()
    }

    /// Establish the live channel using the session's credential.
    /// A missing or rejected credential returns `ChatError::Auth` without
    /// retrying. A transport failure on the first attempt starts the
    /// bounded retry loop in the background and is observable through the
    /// state signal rather than returned.
    pub async fn connect(&self) -> Result<()> {
        if self.current_state() != ConnectionState::Disconnected {
            debug!("connect() ignored: channel already active");
            return Ok(());
        }
        let credential = self
            .session
            .credential()
            .await
            .ok_or_else(|| ChatError::Auth("session has no credential".to_string()))?;

        self.wanted.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        match self.channel.connect(&credential).await {
            Ok(connection) => {
                self.install(connection).await;
                Ok(())
            }
            Err(ChatError::Auth(e)) => {
                self.set_state(ConnectionState::Disconnected);
                self.wanted.store(false, Ordering::SeqCst);
                Err(ChatError::Auth(e))
            }
            Err(e) => {
                warn!("Initial connect failed, entering retry loop: {}", e);
                let manager = self.clone();
                tokio::spawn(async move { manager.run_retry_loop().await });
                Ok(())
            }
        }
    }

    /// Tear the channel down. Idempotent and reachable from any state;
    /// the subscription set is left intact for a later reconnect.
    pub async fn disconnect(&self) {
        self.wanted.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.handle.write().await.take() {
            handle.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Publish a message. Fails immediately with `SendBlocked` when the
    /// channel is not Connected; nothing is queued or retried.
    pub async fn send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_type: SenderType,
        content: &str,
    ) -> Result<()> {
        if self.current_state() != ConnectionState::Connected {
            return Err(ChatError::SendBlocked);
        }
        let handle = self
            .live_handle()
            .await
            .ok_or(ChatError::SendBlocked)?;
        handle
            .send(conversation_id, sender_id, sender_type, content)
            .await
    }

    /// Adopt an established connection: store the handle, announce
    /// Connected, replay room subscriptions, start the push pump.
    /// A disconnect that raced the connect attempt wins: the fresh
    /// connection is closed instead of adopted.
    async fn install(&self, connection: LiveConnection) {
        if !self.wanted.load(Ordering::SeqCst) {
            connection.handle.close().await;
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.handle.write().await = Some(connection.handle.clone());
        if !self.wanted.load(Ordering::SeqCst) {
            if let Some(handle) = self.handle.write().await.take() {
                handle.close().await;
            }
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.set_state(ConnectionState::Connected);

        self.subscriptions.replay(&connection.handle).await;

        let manager = self.clone();
        let events = connection.events;
        tokio::spawn(async move { manager.run_pump(generation, events).await });
    }

    /// Forward push events in arrival order until the stream ends.
    /// A stream that ends while this generation is still current and the
    /// session still wants a connection means transport loss.
    async fn run_pump(&self, generation: u64, mut events: mpsc::UnboundedReceiver<PushEvent>) {
        while let Some(event) = events.recv().await {
            if self.push_tx.send(event).is_err() {
                debug!("Push consumer dropped, stopping pump");
                return;
            }
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Stale pump finished after planned disconnect");
            return;
        }
        if !self.wanted.load(Ordering::SeqCst) {
            return;
        }

        warn!("Live channel transport lost, scheduling reconnect");
        *self.handle.write().await = None;
        let manager = self.clone();
        tokio::spawn(async move { manager.run_retry_loop().await });
    }

    /// Bounded reconnect loop: doubling delay with jitter, capped, up to
    /// max_connect_attempts. Exhaustion (or an auth rejection mid-loop)
    /// settles the state at Disconnected instead of raising.
    ///
    /// Boxed: the loop re-enters itself through install -> pump, and the
    /// opaque future cycle needs one concrete leg to stay Send.
    fn run_retry_loop(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut delay = self.config.retry_base_delay;

            for attempt in 1..=self.config.max_connect_attempts {
                if !self.wanted.load(Ordering::SeqCst) {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                self.set_state(ConnectionState::Connecting);
                sleep(self.jittered(delay)).await;

                // An explicit disconnect during the sleep wins over the
                // retry; Disconnected is re-asserted in case this loop
                // announced Connecting after disconnect() published its state
                if !self.wanted.load(Ordering::SeqCst) {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }

                let credential = match self.session.credential().await {
                    Some(c) => c,
                    None => {
                        warn!("Credential cleared during reconnect, giving up");
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                };

                match self.channel.connect(&credential).await {
                    Ok(connection) => {
                        info!(attempt, "Reconnected to live channel");
                        self.install(connection).await;
                        return;
                    }
                    Err(ChatError::Auth(e)) => {
                        warn!("Credential rejected during reconnect: {}", e);
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    Err(e) => {
                        warn!(
                            attempt,
                            max_attempts = self.config.max_connect_attempts,
                            "Reconnect attempt failed: {}",
                            e
                        );
                        delay = (delay * 2).min(self.config.retry_max_delay);
                    }
                }
            }

            warn!("Reconnect budget exhausted, settling Disconnected");
            self.set_state(ConnectionState::Disconnected);
        })
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter_ms = self.config.retry_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        delay + Duration::from_millis(jitter)
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(?state, "Connection state changed");
            let _ = self.events.send(ChatEvent::ConnectionChanged { state });
        }
    }
}
