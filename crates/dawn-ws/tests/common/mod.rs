//! Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dawn_ws::{
    EventStrategy, HandshakeResponse, MockSession, MockTransport, ReconnectPolicy,
    TransportError, WebSocketClient, WebSocketConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// One strategy callback, as observed by [`RecordingStrategy`]
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Open(u16),
    Message(String),
    Binary(Vec<u8>),
    Closing(u16, String),
    Failure(TransportError),
    ReconnectScheduled { attempt: u32, delay: Duration },
    RetriesExhausted(u32),
}

/// Strategy that records every callback, with the client's state at the time
#[derive(Clone, Default)]
pub struct RecordingStrategy {
    events: Arc<Mutex<Vec<Recorded>>>,
    connected_during_open: Arc<Mutex<Vec<bool>>>,
}

impl RecordingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    /// Delays from every scheduled reconnect, in order
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::ReconnectScheduled { delay, .. } => Some(delay),
                _ => None,
            })
            .collect()
    }

    /// Number of failures seen so far
    pub fn failures(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, Recorded::Failure(_)))
            .count()
    }

    /// Connected flag observed from inside each `handle_open`
    pub fn connected_during_open(&self) -> Vec<bool> {
        self.connected_during_open.lock().clone()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl EventStrategy for RecordingStrategy {
    async fn handle_open(&self, client: &WebSocketClient, response: &HandshakeResponse) {
        self.connected_during_open.lock().push(client.is_connected());
        self.push(Recorded::Open(response.status));
    }

    async fn handle_message(&self, _client: &WebSocketClient, text: &str) {
        self.push(Recorded::Message(text.to_string()));
    }

    async fn handle_binary(&self, _client: &WebSocketClient, bytes: &[u8]) {
        self.push(Recorded::Binary(bytes.to_vec()));
    }

    async fn handle_closing(&self, _client: &WebSocketClient, code: u16, reason: &str) {
        self.push(Recorded::Closing(code, reason.to_string()));
    }

    async fn handle_failure(
        &self,
        _client: &WebSocketClient,
        error: &TransportError,
        _response: Option<&HandshakeResponse>,
    ) {
        self.push(Recorded::Failure(error.clone()));
    }

    async fn handle_reconnect_scheduled(
        &self,
        _client: &WebSocketClient,
        attempt: u32,
        delay: Duration,
    ) {
        self.push(Recorded::ReconnectScheduled { attempt, delay });
    }

    async fn handle_retries_exhausted(&self, _client: &WebSocketClient, retries: u32) {
        self.push(Recorded::RetriesExhausted(retries));
    }
}

/// Retry policy with the given base interval and ceiling, multiplier 2.0
pub fn retry(interval_ms: u64, max_retries: u32) -> WebSocketConfig {
    WebSocketConfig::new().with_retry(
        ReconnectPolicy::new()
            .with_retry_interval(Duration::from_millis(interval_ms))
            .with_max_retries(max_retries)
            .with_backoff_multiplier(2.0),
    )
}

/// Client wired to a mock transport and a recording strategy
pub fn mock_client(
    config: WebSocketConfig,
) -> (WebSocketClient, MockTransport, RecordingStrategy) {
    let transport = MockTransport::new();
    let strategy = RecordingStrategy::new();
    let client = WebSocketClient::builder("ws://mock.test")
        .with_config(config)
        .with_transport(transport.clone())
        .with_strategy(strategy.clone())
        .connect()
        .expect("valid client config");
    (client, transport, strategy)
}

/// Next session, failing the test if none arrives in time
pub async fn next_session(transport: &MockTransport) -> MockSession {
    timeout(Duration::from_secs(30), transport.next_session())
        .await
        .expect("timed out waiting for a connection attempt")
        .expect("mock transport dropped")
}

/// Poll `condition` until it holds, failing the test after 30s
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Open `session` and wait until the client has processed it
pub async fn open(client: &WebSocketClient, session: &MockSession) {
    assert!(session.open());
    wait_until(|| client.is_connected()).await;
}

/// Fail `session` and wait until the strategy has seen the failure
pub async fn fail(strategy: &RecordingStrategy, session: &MockSession) {
    let before = strategy.failures();
    assert!(session.fail(TransportError::ConnectionClosed));
    wait_until(|| strategy.failures() > before).await;
}
