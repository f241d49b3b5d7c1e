#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use futures::{SinkExt as _, Stream, StreamExt as _};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::config::{Config, ReconnectPolicy};
use super::endpoint::{EndpointDescriptor, EndpointNegotiator, PathKind};
use super::envelope::{ControlType, MessageEnvelope, decode_frame};
use super::error::WsError;
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use super::registry::{HandlerRegistry, Handlers, typed_handler};
use super::subscription::{Confirmation, SubscriptionRegistry};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code for a normal closure; every other code triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the peer closed without a status code.
const NO_STATUS_RECEIVED: u16 = 1005;
/// Reported when the transport dropped without a close handshake.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, no timers pending
    Disconnected,
    /// Open handshake in flight
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting for the reconnect timer
    Reconnecting {
        /// Consecutive failures so far
        attempt: u32,
    },
    /// `disconnect` in progress
    Closing,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Notifications delivered to callers alongside per-type message handlers.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection opened; subscriptions have been replayed
    Connected {
        /// Path the connection is using
        path: PathKind,
    },
    /// The connection ended
    Disconnected {
        /// WebSocket close code (1000 = normal)
        code: u16,
        /// Close reason or transport error
        reason: String,
    },
    /// A recoverable transport or protocol error
    Error(String),
    /// A reconnect completed and the full subscription set was sent again
    Resynchronized,
}

/// How one open connection ended.
enum SessionEnd {
    /// `disconnect` was called
    Cancelled,
    /// Peer closed with code 1000
    Normal { reason: String },
    /// Any other closure, transport error or heartbeat expiry
    Abnormal { code: u16, reason: String },
    /// The first connection of a `connect` call broke before it was reported ready
    OpenFailed(crate::error::Error),
}

/// State the background task shares with every handle.
struct Shared {
    config: Config,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    handlers: HandlerRegistry,
    subscriptions: SubscriptionRegistry,
    active_path: RwLock<Option<PathKind>>,
}

impl Shared {
    /// Publish a state. Nothing but `Disconnected` may replace `Closing`, so the
    /// background task cannot resurrect a connection `disconnect` is tearing down.
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closing && next != ConnectionState::Disconnected {
                return false;
            }
            *state = next;
            true
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine: events are advisory.
        _ = self.event_tx.send(event);
    }

    fn set_active_path(&self, path: Option<PathKind>) {
        *self
            .active_path
            .write()
            .unwrap_or_else(PoisonError::into_inner) = path;
    }
}

/// One `connect` lifetime.
struct Session {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

struct Inner {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl Inner {
    fn outbound(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.outbound.clone())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.cancel.cancel();
        }
    }
}

/// Manages one feed's WebSocket connection lifecycle, reconnection, and heartbeat.
///
/// The manager handles all connection concerns for a single logical feed:
/// - Negotiating the live or simulated endpoint
/// - Automatic reconnection with exponential backoff
/// - Heartbeat monitoring via `ping`/`pong` envelopes
/// - Replaying the subscription set after every open
/// - Dispatching inbound envelopes to the handler registered for their type
///
/// Handles are cheap to clone and share one connection. Dropping the last handle tears
/// the connection down.
///
/// # Example
///
/// ```rust, no_run
/// use detection_feeds::ws::{ConnectionManager, Config, EndpointDescriptor, Handlers};
/// use url::Url;
///
/// # async fn example() -> detection_feeds::Result<()> {
/// let connection = ConnectionManager::new(Config::default());
/// connection.subscribe(["alerts"]);
///
/// let endpoint = EndpointDescriptor::builder()
///     .base_url(Url::parse("wss://dashboard.example.com")?)
///     .path("/ws/alerts")
///     .build();
/// let handlers = Handlers::new().on("alert", |envelope| {
///     let _ = &envelope.payload;
/// });
///
/// connection.connect(endpoint, handlers).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("handlers", &self.inner.shared.handlers)
            .field("subscriptions", &self.inner.shared.subscriptions.snapshot())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a disconnected manager. Nothing is dialed until [`Self::connect`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    config,
                    state_tx,
                    event_tx,
                    handlers: HandlerRegistry::new(),
                    subscriptions: SubscriptionRegistry::new(),
                    active_path: RwLock::new(None),
                }),
                session: Mutex::new(None),
            }),
        }
    }

    /// Connect to `endpoint`, installing `handlers` first.
    ///
    /// Resolves once the connection is open, the heartbeat is running and the
    /// subscription set has been sent. Returns immediately when already connected, and
    /// fails with [`WsError::AlreadyConnecting`] while an attempt or teardown is in
    /// flight. In `auto` mode a failed live handshake falls back to the mock path once
    /// before the error is returned.
    pub async fn connect(&self, endpoint: EndpointDescriptor, handlers: Handlers) -> Result<()> {
        let shared = &self.inner.shared;

        let ready_rx = {
            // Held across claim and install so `disconnect` always sees the new session.
            let mut session = self
                .inner
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let mut claimed = false;
            let mut connected = false;
            shared.state_tx.send_if_modified(|state| match state {
                ConnectionState::Disconnected => {
                    *state = ConnectionState::Connecting;
                    claimed = true;
                    true
                }
                ConnectionState::Connected { .. } => {
                    connected = true;
                    false
                }
                _ => false,
            });

            if connected {
                shared.handlers.extend(handlers);
                return Ok(());
            }
            if !claimed {
                return Err(WsError::AlreadyConnecting.into());
            }

            shared.handlers.extend(handlers);

            let negotiator = EndpointNegotiator::new(endpoint)
                .with_live_reprobe(shared.config.reprobe_live_on_reconnect);
            let cancel = CancellationToken::new();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = oneshot::channel();

            let task = tokio::spawn(Self::connection_loop(
                Arc::clone(shared),
                negotiator,
                outbound_rx,
                cancel.clone(),
                ready_tx,
            ));

            // Left over only when the previous lifetime ended on its own.
            if let Some(previous) = session.replace(Session {
                cancel,
                outbound: outbound_tx,
                task,
            }) {
                previous.cancel.cancel();
            }

            ready_rx
        };

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(WsError::Cancelled.into()),
        }
    }

    /// Close the connection and stop all timers. Idempotent.
    ///
    /// Cancels any in-flight handshake, pending reconnect timer and heartbeat before the
    /// transport is released, sends a normal (1000) close frame when connected, and clears
    /// the handler registry. The subscription set is kept for the next `connect`.
    pub async fn disconnect(&self) {
        let session = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let shared = &self.inner.shared;

        let Some(session) = session else {
            shared.set_state(ConnectionState::Disconnected);
            return;
        };

        // A loop that already gave up or saw a normal close has reported its own end.
        let was_live = !matches!(self.state(), ConnectionState::Disconnected);

        shared.set_state(ConnectionState::Closing);
        session.cancel.cancel();
        drop(session.outbound);

        if let Err(e) = session.task.await {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "Connection task failed during disconnect");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }

        shared.handlers.clear();
        shared.subscriptions.clear_confirmation();
        shared.set_active_path(None);
        if was_live {
            shared.emit(ConnectionEvent::Disconnected {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_owned(),
            });
        }
        shared.set_state(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::debug!("Disconnected by caller");
    }

    /// Send a message. Dropped (and logged) unless currently connected.
    pub fn send(&self, message: &MessageEnvelope) {
        if !self.is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!(msg_type = %message.msg_type, "Not connected, dropping outbound message");
            return;
        }

        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(msg_type = %message.msg_type, error = %e, "Failed to encode outbound message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };

        if let Some(outbound) = self.inner.outbound() {
            // A closed channel means the connection is going away; the message is dropped.
            _ = outbound.send(frame);
        }
    }

    /// Ask the server for a fresh snapshot, e.g. `get_status` or `get_summary`.
    pub fn request_snapshot(&self, msg_type: &str) {
        self.send(&MessageEnvelope::outbound(msg_type, Value::Null));
    }

    /// Register the handler for `msg_type`, replacing any previous one.
    pub fn on_message<S, F>(&self, msg_type: S, handler: F)
    where
        S: Into<String>,
        F: Fn(&MessageEnvelope) + Send + Sync + 'static,
    {
        self.inner.shared.handlers.insert(msg_type, Arc::new(handler));
    }

    /// Register a handler receiving the decoded payload of `msg_type`.
    pub fn on_typed<S, T, F>(&self, msg_type: S, handler: F)
    where
        S: Into<String>,
        T: serde::de::DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.inner
            .shared
            .handlers
            .insert(msg_type, typed_handler(handler));
    }

    /// Remove the handler for `msg_type`. Returns whether one was registered.
    pub fn remove_handler(&self, msg_type: &str) -> bool {
        self.inner.shared.handlers.remove(msg_type)
    }

    /// Add data types to the subscription set.
    ///
    /// The set is kept across reconnects. When connected and the set changed, the full
    /// set is sent right away.
    pub fn subscribe<I, S>(&self, types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscriptions = &self.inner.shared.subscriptions;
        if subscriptions.subscribe(types) && self.is_connected() {
            self.send(&subscriptions.request());
        }
    }

    /// Remove data types from the subscription set.
    pub fn unsubscribe<I, S>(&self, types: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let subscriptions = &self.inner.shared.subscriptions;
        if subscriptions.unsubscribe(types) && self.is_connected() {
            self.send(&subscriptions.request());
        }
    }

    /// Current subscription set in subscription order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.shared.subscriptions.snapshot()
    }

    /// Last `subscription_confirmed` received on the current connection.
    #[must_use]
    pub fn subscription_confirmation(&self) -> Option<Confirmation> {
        self.inner.shared.subscriptions.confirmation()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state_tx.subscribe()
    }

    /// Path the current `connect` lifetime settled on.
    #[must_use]
    pub fn active_path(&self) -> Option<PathKind> {
        *self
            .inner
            .shared
            .active_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw receiver for connection events.
    #[must_use]
    pub fn event_receiver(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.shared.event_tx.subscribe()
    }

    /// Stream of connection events from now on. Lagging receivers skip missed events.
    pub fn events(&self) -> impl Stream<Item = ConnectionEvent> + use<> {
        let mut rx = self.event_receiver();

        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Connection event stream lagged, missed {n} events");
                        #[cfg(not(feature = "tracing"))]
                        let _ = n;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Main connection loop for one `connect` lifetime.
    ///
    /// `ready` carries the outcome of the first open back to `connect`; after that the
    /// loop keeps reconnecting on abnormal closures until the policy gives up, the
    /// server closes normally, or `cancel` fires.
    async fn connection_loop(
        shared: Arc<Shared>,
        mut negotiator: EndpointNegotiator,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
        ready: oneshot::Sender<Result<()>>,
    ) {
        let mut ready = Some(ready);
        let mut policy = ReconnectPolicy::new(shared.config.reconnect.clone());
        let mut reconnected = false;

        loop {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                opened = Self::open(&negotiator) => opened,
            };

            match opened {
                Ok((ws_stream, path)) => {
                    negotiator.record_success(path);
                    policy.reset();

                    let end = Self::handle_connection(
                        &shared,
                        ws_stream,
                        path,
                        &mut outbound_rx,
                        &cancel,
                        &mut ready,
                        reconnected,
                    )
                    .await;
                    reconnected = true;
                    shared.subscriptions.clear_confirmation();

                    match end {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Normal { reason } => {
                            #[cfg(feature = "tracing")]
                            tracing::info!(%reason, "Server closed the connection normally");
                            shared.set_state(ConnectionState::Closing);
                            shared.emit(ConnectionEvent::Disconnected {
                                code: NORMAL_CLOSURE,
                                reason,
                            });
                            shared.set_state(ConnectionState::Disconnected);
                            return;
                        }
                        SessionEnd::Abnormal { code, reason } => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(code, %reason, "Connection closed abnormally");
                            shared.emit(ConnectionEvent::Disconnected { code, reason });
                        }
                        SessionEnd::OpenFailed(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Connection lost before it was ready");
                            shared.set_active_path(None);
                            shared.set_state(ConnectionState::Disconnected);
                            if let Some(ready) = ready.take() {
                                _ = ready.send(Err(e));
                            }
                            return;
                        }
                    }
                }
                Err(e) => {
                    if let Some(ready) = ready.take() {
                        shared.set_state(ConnectionState::Disconnected);
                        _ = ready.send(Err(e));
                        return;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Reconnect attempt failed");
                    shared.emit(ConnectionEvent::Error(e.to_string()));
                }
            }

            // Check if we should stop reconnecting
            let Some(delay) = policy.record_failure() else {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    attempts = policy.attempt(),
                    "Reconnect attempts exhausted, giving up"
                );
                shared.emit(ConnectionEvent::Error(format!(
                    "gave up after {} reconnect attempts",
                    policy.attempt()
                )));
                shared.set_state(ConnectionState::Disconnected);
                return;
            };

            shared.set_state(ConnectionState::Reconnecting {
                attempt: policy.attempt(),
            });

            #[cfg(feature = "tracing")]
            tracing::debug!(attempt = policy.attempt(), ?delay, "Scheduling reconnect");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = sleep(delay) => {}
            }

            shared.set_state(ConnectionState::Connecting);
        }
    }

    /// Dial each candidate in turn; more than one candidate means a single fallback.
    async fn open(negotiator: &EndpointNegotiator) -> Result<(WsStream, PathKind)> {
        let mut failures = Vec::new();

        for endpoint in negotiator.candidates()? {
            match connect_async(endpoint.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%endpoint, "WebSocket opened");
                    return Ok((ws_stream, endpoint.kind));
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%endpoint, error = %e, "Unable to connect");
                    failures.push(format!("{endpoint}: {e}"));
                }
            }
        }

        Err(WsError::HandshakeFailed { attempts: failures }.into())
    }

    /// Drive one open connection until it ends.
    ///
    /// Entering `Connected` starts the heartbeat, then replays the subscription set,
    /// then issues the configured snapshot requests, and only then reports readiness.
    /// While `ready` is pending a failed opening write ends the session with
    /// [`SessionEnd::OpenFailed`] instead of scheduling a reconnect.
    async fn handle_connection(
        shared: &Shared,
        ws_stream: WsStream,
        path: PathKind,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
        ready: &mut Option<oneshot::Sender<Result<()>>>,
        reconnected: bool,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        // Messages queued for a previous connection are not carried over.
        while outbound_rx.try_recv().is_ok() {}

        // Taken before `Connected` is published: later changes go out through `subscribe`.
        let mut opening = Vec::new();
        if let Some(replay) = shared.subscriptions.replay() {
            opening.push(replay);
        }
        opening.extend(
            shared
                .config
                .snapshot_requests
                .iter()
                .map(|msg_type| MessageEnvelope::outbound(msg_type.as_str(), Value::Null)),
        );

        shared.set_state(ConnectionState::Connected {
            since: Instant::now(),
        });
        shared.set_active_path(Some(path));

        let mut heartbeat =
            HeartbeatMonitor::new(shared.config.heartbeat_interval, shared.config.missed_heartbeats);
        let mut ticker = heartbeat.ticker();

        for message in opening {
            let sent = match message.to_frame() {
                Ok(frame) => write.send(Message::Text(frame.into())).await,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(msg_type = %message.msg_type, error = %e, "Failed to encode opening message");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    continue;
                }
            };
            if let Err(e) = sent {
                if ready.is_some() {
                    return SessionEnd::OpenFailed(e.into());
                }
                return SessionEnd::Abnormal {
                    code: ABNORMAL_CLOSURE,
                    reason: "connection lost while replaying subscriptions".to_owned(),
                };
            }
        }

        shared.emit(ConnectionEvent::Connected { path });
        if let Some(ready) = ready.take() {
            _ = ready.send(Ok(()));
        }
        if reconnected {
            shared.emit(ConnectionEvent::Resynchronized);
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    _ = write.send(Message::Close(Some(frame))).await;
                    _ = write.close().await;
                    return SessionEnd::Cancelled;
                }

                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_frame(shared, text.as_str(), &mut heartbeat);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame.map_or_else(
                                || (NO_STATUS_RECEIVED, String::new()),
                                |frame| (u16::from(frame.code), frame.reason.as_str().to_owned()),
                            );
                            return if code == NORMAL_CLOSURE {
                                SessionEnd::Normal { reason }
                            } else {
                                SessionEnd::Abnormal { code, reason }
                            };
                        }
                        Some(Ok(_)) => {
                            // Binary frames and transport-level ping/pong carry no envelopes.
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Abnormal {
                                code: ABNORMAL_CLOSURE,
                                reason: e.to_string(),
                            };
                        }
                        None => {
                            return SessionEnd::Abnormal {
                                code: ABNORMAL_CLOSURE,
                                reason: "connection lost".to_owned(),
                            };
                        }
                    }
                }

                // Handle outgoing messages from callers
                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return SessionEnd::Abnormal {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        };
                    }
                }

                _ = ticker.tick() => {
                    match heartbeat.on_tick() {
                        HeartbeatAction::SendPing => {
                            let ping = MessageEnvelope::ping().to_frame();
                            if let Ok(ping) = ping
                                && let Err(e) = write.send(Message::Text(ping.into())).await
                            {
                                return SessionEnd::Abnormal {
                                    code: ABNORMAL_CLOSURE,
                                    reason: e.to_string(),
                                };
                            }
                        }
                        HeartbeatAction::Expired { missed } => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(missed, "Heartbeat timeout: no pong received");
                            shared.emit(ConnectionEvent::Error(format!(
                                "heartbeat timeout after {missed} missed pongs"
                            )));
                            return SessionEnd::Abnormal {
                                code: ABNORMAL_CLOSURE,
                                reason: "heartbeat timeout".to_owned(),
                            };
                        }
                    }
                }
            }
        }
    }

    /// Decode one text frame and route each envelope, in wire order.
    fn handle_frame(shared: &Shared, text: &str, heartbeat: &mut HeartbeatMonitor) {
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received WebSocket text message");

        let envelopes = match decode_frame(text) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = (&text, &e);
                return;
            }
        };

        for envelope in envelopes {
            match envelope.control_type() {
                Some(ControlType::Pong) => heartbeat.on_pong(),
                Some(ControlType::SubscriptionConfirmed) => shared.subscriptions.confirm(&envelope),
                None => {
                    if !shared.handlers.dispatch(&envelope) {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(msg_type = %envelope.msg_type, "No handler registered, dropping");
                    }
                }
            }
        }
    }
}
