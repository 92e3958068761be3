//! Persistent WebSocket client
//!
//! [`WebSocketClient`] owns one transport session at a time, an outbound
//! queue and three kinds of background task:
//!
//! - the sender loop, the only writer to the transport, which drains the
//!   queue in FIFO order while connected;
//! - the event dispatcher, which applies transport events to the connection
//!   state and then calls the [`EventStrategy`];
//! - at most one reconnect timer, scheduled after a failure.
//!
//! `close()` cancels all of them for good.

use crate::config::WebSocketConfig;
use crate::error::{ClientError, TransportError};
use crate::events::{EventSink, HandshakeResponse, SessionEvent, TransportEvent, NORMAL_CLOSURE};
use crate::queue::{outbound_queue, OutboundReceiver, OutboundSender, QueueError};
use crate::reconnect::ReconnectDecision;
use crate::state::{ConnectionState, SharedState};
use crate::strategy::{DefaultStrategy, EventStrategy};
use crate::transport::{Transport, TungsteniteTransport};

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason sent with the close frame from [`WebSocketClient::close`]
pub const CLOSE_REASON: &str = "normal closure";

/// Builder for [`WebSocketClient`]
pub struct WebSocketClientBuilder {
    url: String,
    config: WebSocketConfig,
    strategy: Arc<dyn EventStrategy>,
    transport: Arc<dyn Transport>,
}

impl WebSocketClientBuilder {
    /// Start a builder for `url` with default config, logging strategy and
    /// tokio-tungstenite transport
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config: WebSocketConfig::default(),
            strategy: Arc::new(DefaultStrategy),
            transport: Arc::new(TungsteniteTransport::new()),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event strategy
    pub fn with_strategy(mut self, strategy: impl EventStrategy) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Set a shared event strategy
    pub fn with_shared_strategy(mut self, strategy: Arc<dyn EventStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the transport
    pub fn with_transport(mut self, transport: impl Transport) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Validate, open the first connection and start the background tasks
    ///
    /// Must be called from within a Tokio runtime. Returns as soon as the
    /// connection attempt has started; its outcome is reported to the
    /// strategy.
    pub fn connect(self) -> Result<WebSocketClient, ClientError> {
        self.config.validate()?;
        self.url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let (queue_tx, queue_rx) = outbound_queue(self.config.queue_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            url: self.url,
            config: self.config,
            strategy: self.strategy,
            transport: self.transport,
            shared: Arc::new(SharedState::new()),
            queue: queue_tx,
            events_tx,
            cancel: CancellationToken::new(),
            reconnect_timer: Mutex::new(None),
        });
        let client = WebSocketClient { inner };

        client.connect();

        tokio::spawn(run_sender(
            Arc::clone(&client.inner.shared),
            queue_rx,
            client.inner.cancel.clone(),
        ));
        tokio::spawn(run_dispatcher(
            Arc::downgrade(&client.inner),
            events_rx,
            client.inner.cancel.clone(),
        ));

        info!(url = %client.inner.url, "WebSocket client started");
        Ok(client)
    }
}

struct ClientInner {
    url: String,
    config: WebSocketConfig,
    strategy: Arc<dyn EventStrategy>,
    transport: Arc<dyn Transport>,
    shared: Arc<SharedState>,
    queue: OutboundSender,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
        // Best effort: a dropped client still says goodbye if a runtime is around
        if let Some(handle) = self.shared.take_handle() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = handle.close(NORMAL_CLOSURE, CLOSE_REASON).await;
                });
            }
        }
    }
}

/// Handle to a persistent WebSocket connection
///
/// Cloning is cheap; all clones share one connection. The connection is
/// closed by [`close`](Self::close) or when the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use dawn_ws::{WebSocketClient, WebSocketConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = WebSocketClient::with_config("wss://echo.example.com", WebSocketConfig::default())?;
///
///     // Queued now, written once the connection is open
///     client.send("hello").await?;
///
///     client.close().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct WebSocketClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WebSocketClient {
    /// Connect to `url` with default settings
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        WebSocketClientBuilder::new(url).connect()
    }

    /// Connect to `url` with the given configuration
    pub fn with_config(url: impl Into<String>, config: WebSocketConfig) -> Result<Self, ClientError> {
        WebSocketClientBuilder::new(url).with_config(config).connect()
    }

    /// Start a builder
    pub fn builder(url: impl Into<String>) -> WebSocketClientBuilder {
        WebSocketClientBuilder::new(url)
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Configuration in use
    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.snapshot()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Check if [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Queue a text message for delivery
    ///
    /// Returns once the message is queued, not when it is written. While
    /// disconnected, messages wait in the queue and go out in order after
    /// the next open. With a bounded queue this waits for room.
    ///
    /// Fails with [`ClientError::Closed`] after [`close`](Self::close);
    /// nothing is queued in that case.
    ///
    /// Inside an [`EventStrategy`] handler with a bounded queue, use
    /// [`try_send`](Self::try_send) instead: waiting here stalls event
    /// delivery until the queue drains, and it only drains after an open.
    pub async fn send(&self, message: impl Into<String>) -> Result<(), ClientError> {
        let message = message.into();
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(ClientError::Closed),
            result = self.inner.queue.send(message) => result.map_err(|_| ClientError::Closed),
        }
    }

    /// Queue a text message without waiting
    ///
    /// Fails with [`ClientError::QueueFull`] if a bounded queue has no room.
    pub fn try_send(&self, message: impl Into<String>) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        self.inner.queue.try_send(message.into()).map_err(|e| match e {
            QueueError::Full(_) => ClientError::QueueFull,
            QueueError::Closed(_) => ClientError::Closed,
        })
    }

    /// Shut the client down for good
    ///
    /// Stops the sender loop and any pending reconnect, then closes the
    /// transport with a normal closure. Queued messages are discarded and no
    /// strategy handler runs afterwards. Calling it again does nothing.
    pub async fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();

        if let Some(timer) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }

        if let Some(handle) = self.inner.shared.take_handle() {
            if let Err(e) = handle.close(NORMAL_CLOSURE, CLOSE_REASON).await {
                debug!("Transport close failed: {}", e);
            }
        }

        info!(url = %self.inner.url, "WebSocket client closed");
    }

    /// Open a new transport session, replacing the current handle
    fn connect(&self) {
        let inner = &self.inner;
        let session = inner.shared.begin_session(|session| {
            // Checked under the state lock so close() cannot miss this handle
            if inner.cancel.is_cancelled() {
                return None;
            }
            let events = EventSink::new(session, inner.events_tx.clone());
            Some(inner.transport.open(&inner.url, &inner.config.connection, events))
        });

        match session {
            Some(session) => debug!(url = %inner.url, session, "Opening connection"),
            None => debug!("Client closed, not connecting"),
        }
    }

    /// Apply one transport event, then hand it to the strategy
    async fn dispatch(&self, SessionEvent { session, event }: SessionEvent) {
        match event {
            TransportEvent::Open(response) => self.on_open(session, response).await,
            TransportEvent::Text(text) => {
                if self.is_current(session) {
                    self.guarded("handle_message", self.inner.strategy.handle_message(self, &text))
                        .await;
                }
            }
            TransportEvent::Binary(bytes) => {
                if self.is_current(session) {
                    self.guarded("handle_binary", self.inner.strategy.handle_binary(self, &bytes))
                        .await;
                }
            }
            TransportEvent::Closing { code, reason } => {
                self.on_closing(session, code, reason).await
            }
            TransportEvent::Failure { error, response } => {
                self.on_failure(session, error, response).await
            }
        }
    }

    fn is_current(&self, session: u64) -> bool {
        let current = self.inner.shared.current_session() == session;
        if !current {
            debug!(session, "Ignoring event from superseded session");
        }
        current
    }

    async fn on_open(&self, session: u64, response: HandshakeResponse) {
        if self.inner.shared.mark_open(session).is_none() {
            debug!(session, "Ignoring open from superseded session");
            return;
        }
        info!(url = %self.inner.url, session, "Connected");

        self.guarded("handle_open", self.inner.strategy.handle_open(self, &response))
            .await;
    }

    async fn on_closing(&self, session: u64, code: u16, reason: String) {
        if self.inner.shared.mark_closing(session).is_none() {
            debug!(session, "Ignoring close from superseded session");
            return;
        }
        info!(url = %self.inner.url, code, "Connection closed by peer: {}", reason);

        self.guarded(
            "handle_closing",
            self.inner.strategy.handle_closing(self, code, &reason),
        )
        .await;
    }

    async fn on_failure(
        &self,
        session: u64,
        error: TransportError,
        response: Option<HandshakeResponse>,
    ) {
        let Some((state, decision)) = self.inner.shared.mark_failed(session, &self.inner.config.retry)
        else {
            debug!(session, "Ignoring failure from superseded session");
            return;
        };
        warn!(url = %self.inner.url, session, "Connection failed: {}", error);

        self.guarded(
            "handle_failure",
            self.inner
                .strategy
                .handle_failure(self, &error, response.as_ref()),
        )
        .await;

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                self.schedule_reconnect(attempt, delay);
                self.guarded(
                    "handle_reconnect_scheduled",
                    self.inner
                        .strategy
                        .handle_reconnect_scheduled(self, attempt, delay),
                )
                .await;
            }
            ReconnectDecision::GiveUp => {
                if self.inner.config.retry.max_retries > 0 {
                    error!(
                        "Reconnection attempts exhausted after {} tries",
                        state.retry_count
                    );
                }
                self.guarded(
                    "handle_retries_exhausted",
                    self.inner
                        .strategy
                        .handle_retries_exhausted(self, state.retry_count),
                )
                .await;
            }
        }
    }

    /// Start the reconnect timer without waiting on it
    fn schedule_reconnect(&self, attempt: u32, delay: Duration) {
        if self.is_closed() {
            return;
        }
        debug!("Reconnecting in {:?} (attempt {})", delay, attempt);

        let client = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(inner) = client.upgrade() {
                        WebSocketClient { inner }.connect();
                    }
                }
            }
        });

        // The previous timer has already fired: a failure needs a live session
        *self.inner.reconnect_timer.lock() = Some(timer);
    }

    /// Run a strategy callback, containing any panic
    async fn guarded<F>(&self, handler: &'static str, call: F)
    where
        F: Future<Output = ()>,
    {
        if AssertUnwindSafe(call).catch_unwind().await.is_err() {
            error!(handler, "Event strategy panicked; event ignored");
        }
    }
}

/// Drain the queue into the transport, one message at a time
async fn run_sender(shared: Arc<SharedState>, mut queue: OutboundReceiver, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        // Hold the message until there is an open connection to write it to
        let handle = loop {
            let opened = shared.opened();
            if let Some(handle) = shared.connected_handle() {
                break handle;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = opened => {}
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        // Delivery attempted; a failure here surfaces through the failure event.
        // A handle closed by close() refuses the write.
        if let Err(e) = handle.send(&message).await {
            if cancel.is_cancelled() {
                break;
            }
            warn!("Failed to send message: {}", e);
        }
    }
    debug!("Sender loop stopped");
}

/// Feed transport events to the client, one at a time
async fn run_dispatcher(
    client: Weak<ClientInner>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(inner) = client.upgrade() else {
            break;
        };
        WebSocketClient { inner }.dispatch(event).await;
    }
    debug!("Event dispatcher stopped");
}
