//! Pluggable handling of connection events
//!
//! The client calls one [`EventStrategy`] method per transport event, after
//! it has updated its own state. Each call gets the client itself, so a
//! strategy can reply with [`WebSocketClient::send`] or shut down with
//! [`WebSocketClient::close`] without holding a back-reference.
//!
//! Handlers run one at a time on the client's event path: keep them short.
//! A panic inside a handler is caught and logged; it never affects
//! connection state.
//!
//! With a [`QueueCapacity::Bounded`](crate::QueueCapacity::Bounded) queue,
//! reply with [`WebSocketClient::try_send`] or from a spawned task. Awaiting
//! [`WebSocketClient::send`] on a full queue while disconnected blocks the
//! event path, so the open that would drain the queue is never handled.

use crate::client::WebSocketClient;
use crate::error::TransportError;
use crate::events::HandshakeResponse;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callbacks for connection lifecycle events
///
/// Every method has a no-op default, so implementors only override what
/// they care about.
#[async_trait]
pub trait EventStrategy: Send + Sync + 'static {
    /// Connection established
    async fn handle_open(&self, _client: &WebSocketClient, _response: &HandshakeResponse) {}

    /// Text message received
    async fn handle_message(&self, _client: &WebSocketClient, _text: &str) {}

    /// Binary message received
    async fn handle_binary(&self, _client: &WebSocketClient, _bytes: &[u8]) {}

    /// Peer closed the connection normally; no reconnection follows
    async fn handle_closing(&self, _client: &WebSocketClient, _code: u16, _reason: &str) {}

    /// Connection failed; a reconnection may follow
    async fn handle_failure(
        &self,
        _client: &WebSocketClient,
        _error: &TransportError,
        _response: Option<&HandshakeResponse>,
    ) {
    }

    /// Reconnection `attempt` (1-indexed) will start after `delay`
    async fn handle_reconnect_scheduled(
        &self,
        _client: &WebSocketClient,
        _attempt: u32,
        _delay: Duration,
    ) {
    }

    /// No retries left; the client stays disconnected
    async fn handle_retries_exhausted(&self, _client: &WebSocketClient, _retries: u32) {}
}

/// Strategy that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

#[async_trait]
impl EventStrategy for DefaultStrategy {
    async fn handle_open(&self, client: &WebSocketClient, response: &HandshakeResponse) {
        info!(url = client.url(), status = response.status, "WebSocket opened");
    }

    async fn handle_message(&self, client: &WebSocketClient, text: &str) {
        debug!(url = client.url(), "Received message: {}", text);
    }

    async fn handle_binary(&self, client: &WebSocketClient, bytes: &[u8]) {
        debug!(url = client.url(), len = bytes.len(), "Received binary message");
    }

    async fn handle_closing(&self, client: &WebSocketClient, code: u16, reason: &str) {
        info!(url = client.url(), code, "WebSocket closing: {}", reason);
    }

    async fn handle_failure(
        &self,
        client: &WebSocketClient,
        error: &TransportError,
        response: Option<&HandshakeResponse>,
    ) {
        warn!(
            url = client.url(),
            status = response.map(|r| r.status),
            "WebSocket failure: {}",
            error
        );
    }

    async fn handle_reconnect_scheduled(
        &self,
        client: &WebSocketClient,
        attempt: u32,
        delay: Duration,
    ) {
        info!(url = client.url(), "Reconnecting in {:?} (attempt {})", delay, attempt);
    }

    async fn handle_retries_exhausted(&self, client: &WebSocketClient, retries: u32) {
        warn!(url = client.url(), "Giving up after {} reconnection attempts", retries);
    }
}
