//! WebSocket transport abstraction
//!
//! A [`Transport`] opens sessions; each session is driven on the transport's
//! own tasks and reports back through an [`EventSink`]. The client only ever
//! writes through the returned [`TransportHandle`].
//!
//! [`TungsteniteTransport`] is the real implementation. [`MockTransport`]
//! (behind the `test-utils` feature) lets tests drive sessions by hand.

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::events::{is_expected_close, EventSink, HandshakeResponse};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, http, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Opens transport sessions
pub trait Transport: Send + Sync + 'static {
    /// Start opening a session to `url` and return immediately
    ///
    /// The outcome arrives later on `events`: open, then messages, then one
    /// closing or failure. Must not block.
    fn open(&self, url: &str, config: &ConnectionConfig, events: EventSink)
        -> Arc<dyn TransportHandle>;
}

/// Write side of one session
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Send a text frame
    async fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Start the closing handshake
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Real WebSocket transport using tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create a new transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TungsteniteTransport {
    fn open(
        &self,
        url: &str,
        config: &ConnectionConfig,
        events: EventSink,
    ) -> Arc<dyn TransportHandle> {
        let session = Arc::new(WsSession {
            sink: Mutex::new(None),
            events,
            config: config.clone(),
            closing: AtomicBool::new(false),
            close_requested: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(run_session(url.to_string(), Arc::clone(&session)));
        session
    }
}

/// One tokio-tungstenite session
struct WsSession {
    sink: Mutex<Option<WsSink>>,
    events: EventSink,
    config: ConnectionConfig,
    closing: AtomicBool,
    close_requested: Notify,
    /// Tears the session down after a failed write
    shutdown: CancellationToken,
}

impl WsSession {
    async fn write(&self, message: Message) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;

        // Checked under the sink lock: nothing but the close frame goes out
        // once a close has been requested
        if self.closing.load(Ordering::SeqCst) && !matches!(message, Message::Close(_)) {
            return Err(TransportError::NotConnected);
        }

        match timeout(self.config.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::SendFailed(e.to_string())),
            Err(_) => Err(TransportError::Timeout(self.config.write_timeout)),
        }
    }

    /// Report a failed write and stop the session
    fn write_failed(&self, error: &TransportError) {
        if matches!(error, TransportError::NotConnected) {
            return;
        }
        self.events.failure(error.clone(), None);
        self.shutdown.cancel();
    }
}

#[async_trait]
impl TransportHandle for WsSession {
    #[instrument(skip(self, text), fields(session = self.events.session(), len = text.len()))]
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let result = self.write(Message::Text(text.to_string())).await;
        if let Err(ref e) = result {
            self.write_failed(e);
        }
        result
    }

    #[instrument(skip(self), fields(session = self.events.session()))]
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        self.close_requested.notify_one();
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        match self.write(Message::Close(Some(frame))).await {
            // Handshake still in flight; the session closes itself once it lands
            Err(TransportError::NotConnected) => Ok(()),
            Err(e) => {
                self.write_failed(&e);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }
}

fn handshake_response<T>(response: &http::Response<T>) -> HandshakeResponse {
    HandshakeResponse {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    }
}

#[instrument(skip(session), fields(session = session.events.session()))]
async fn run_session(url: String, session: Arc<WsSession>) {
    debug!("Connecting to WebSocket");
    let connect_timeout = session.config.connect_timeout;

    let (ws_stream, response) = match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            let response = match &e {
                tungstenite::Error::Http(response) => Some(handshake_response(response)),
                _ => None,
            };
            session
                .events
                .failure(TransportError::ConnectionFailed(e.to_string()), response);
            return;
        }
        Err(_) => {
            session
                .events
                .failure(TransportError::Timeout(connect_timeout), None);
            return;
        }
    };

    let (write, read) = ws_stream.split();
    *session.sink.lock().await = Some(write);
    debug!("WebSocket connected");

    if session.closing.load(Ordering::SeqCst) {
        debug!("Close requested during handshake");
        let _ = session.write(Message::Close(None)).await;
    } else {
        session.events.open(handshake_response(&response));
        read_frames(&session, read).await;
    }

    // Dropping both halves closes the socket even while handles are still held
    session.sink.lock().await.take();
    debug!("WebSocket session finished");
}

async fn read_frames(session: &WsSession, mut read: WsStream) {
    // Armed by a local close: give the peer read_timeout to acknowledge
    let close_deadline = async {
        session.close_requested.notified().await;
        tokio::time::sleep(session.config.read_timeout).await;
    };
    tokio::pin!(close_deadline);

    loop {
        let frame = tokio::select! {
            biased;
            _ = session.shutdown.cancelled() => {
                debug!("Write failed, tearing session down");
                return;
            }
            _ = &mut close_deadline => {
                debug!("Peer did not acknowledge close in time");
                return;
            }
            frame = read.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                session.events.text(text);
            }
            Some(Ok(Message::Binary(data))) => {
                session.events.binary(data);
            }
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = session.write(Message::Pong(data)).await {
                    warn!("Failed to answer ping: {}", e);
                    session.write_failed(&e);
                }
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                    None => (u16::from(CloseCode::Status), String::new()),
                };
                if is_expected_close(code) {
                    session.events.closing(code, reason);
                } else {
                    session
                        .events
                        .failure(TransportError::UnexpectedClose { code, reason }, None);
                }
                // Keep reading so the close reply gets flushed
                let _ = timeout(session.config.read_timeout, read.next()).await;
                return;
            }
            Some(Err(e)) => {
                session
                    .events
                    .failure(TransportError::ReceiveFailed(e.to_string()), None);
                return;
            }
            None => {
                session.events.failure(TransportError::ConnectionClosed, None);
                return;
            }
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockSession, MockTransport};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// Mock transport for testing
    ///
    /// Every `open` becomes a [`MockSession`] the test drives by hand.
    /// Sends and close requests from the client are recorded.
    #[derive(Clone)]
    pub struct MockTransport {
        inner: Arc<MockInner>,
    }

    struct MockInner {
        sessions: SyncMutex<Vec<MockSession>>,
        opened_tx: mpsc::UnboundedSender<MockSession>,
        opened_rx: Mutex<mpsc::UnboundedReceiver<MockSession>>,
        sent: SyncMutex<Vec<String>>,
        close_requests: SyncMutex<Vec<(u16, String)>>,
        fail_send: AtomicBool,
    }

    /// One session opened through the [`MockTransport`]
    #[derive(Clone)]
    pub struct MockSession {
        /// 0 for the first open, 1 for the first reconnect, ...
        pub attempt: usize,
        /// URL the client asked for
        pub url: String,
        /// Timeouts the client passed
        pub config: ConnectionConfig,
        /// When the client called `open`
        pub opened_at: Instant,
        events: EventSink,
    }

    impl MockSession {
        /// Deliver the open event
        pub fn open(&self) -> bool {
            self.events.open(HandshakeResponse::new(101))
        }

        /// Deliver a text message
        pub fn text(&self, text: impl Into<String>) -> bool {
            self.events.text(text)
        }

        /// Deliver a binary message
        pub fn binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
            self.events.binary(bytes)
        }

        /// Deliver a normal close
        pub fn closing(&self, code: u16, reason: &str) -> bool {
            self.events.closing(code, reason)
        }

        /// Deliver a failure
        pub fn fail(&self, error: TransportError) -> bool {
            self.events.failure(error, None)
        }

        /// Session id assigned by the client
        pub fn session(&self) -> u64 {
            self.events.session()
        }
    }

    struct MockHandle {
        transport: Arc<MockInner>,
        events: EventSink,
        closed: AtomicBool,
    }

    #[async_trait]
    impl TransportHandle for MockHandle {
        async fn send(&self, text: &str) -> Result<(), TransportError> {
            if self.events.is_terminated() {
                return Err(TransportError::NotConnected);
            }
            if self.transport.fail_send.load(Ordering::SeqCst) {
                let error = TransportError::SendFailed("mock send failure".into());
                self.events.failure(error.clone(), None);
                return Err(error);
            }
            let mut sent = self.transport.sent.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::NotConnected);
            }
            sent.push(text.to_string());
            Ok(())
        }

        async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
            // Under the `sent` lock, so a racing send lands before or not at all
            let _sent = self.transport.sent.lock();
            self.closed.store(true, Ordering::SeqCst);
            self.transport
                .close_requests
                .lock()
                .push((code, reason.to_string()));
            Ok(())
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        /// Create a new mock transport
        pub fn new() -> Self {
            let (opened_tx, opened_rx) = mpsc::unbounded_channel();
            Self {
                inner: Arc::new(MockInner {
                    sessions: SyncMutex::new(Vec::new()),
                    opened_tx,
                    opened_rx: Mutex::new(opened_rx),
                    sent: SyncMutex::new(Vec::new()),
                    close_requests: SyncMutex::new(Vec::new()),
                    fail_send: AtomicBool::new(false),
                }),
            }
        }

        /// Wait for the next `open` call (sessions are returned in order)
        pub async fn next_session(&self) -> Option<MockSession> {
            self.inner.opened_rx.lock().await.recv().await
        }

        /// Number of `open` calls so far
        pub fn attempts(&self) -> usize {
            self.inner.sessions.lock().len()
        }

        /// All sessions opened so far
        pub fn sessions(&self) -> Vec<MockSession> {
            self.inner.sessions.lock().clone()
        }

        /// Messages written by the client, across all sessions
        pub fn sent(&self) -> Vec<String> {
            self.inner.sent.lock().clone()
        }

        /// `(code, reason)` of every close request
        pub fn close_requests(&self) -> Vec<(u16, String)> {
            self.inner.close_requests.lock().clone()
        }

        /// Make every send fail (and raise a failure event)
        pub fn set_fail_send(&self, fail: bool) {
            self.inner.fail_send.store(fail, Ordering::SeqCst);
        }
    }

    impl Transport for MockTransport {
        fn open(
            &self,
            url: &str,
            config: &ConnectionConfig,
            events: EventSink,
        ) -> Arc<dyn TransportHandle> {
            let mut sessions = self.inner.sessions.lock();
            let session = MockSession {
                attempt: sessions.len(),
                url: url.to_string(),
                config: config.clone(),
                opened_at: Instant::now(),
                events: events.clone(),
            };
            sessions.push(session.clone());
            let _ = self.inner.opened_tx.send(session);

            Arc::new(MockHandle {
                transport: Arc::clone(&self.inner),
                events,
                closed: AtomicBool::new(false),
            })
        }
    }
}
