//! Closure-based event strategy
//!
//! For callers who want a couple of callbacks without writing a strategy
//! type. Unset callbacks do nothing.
//!
//! # Example
//!
//! ```
//! use dawn_ws::hooks::CallbackStrategy;
//!
//! let strategy = CallbackStrategy::new()
//!     .on_message(|_client, text| {
//!         println!("Received: {}", text);
//!     })
//!     .on_failure(|_client, error| {
//!         eprintln!("Failed: {}", error);
//!     })
//!     .on_reconnect_scheduled(|attempt, delay| {
//!         println!("Reconnecting (attempt {}), waiting {:?}", attempt, delay);
//!     });
//! ```

use crate::client::WebSocketClient;
use crate::error::TransportError;
use crate::events::HandshakeResponse;
use crate::strategy::EventStrategy;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for callbacks
pub type OpenHook = Arc<dyn Fn(&WebSocketClient, &HandshakeResponse) + Send + Sync>;
pub type MessageHook = Arc<dyn Fn(&WebSocketClient, &str) + Send + Sync>;
pub type BinaryHook = Arc<dyn Fn(&WebSocketClient, &[u8]) + Send + Sync>;
pub type ClosingHook = Arc<dyn Fn(&WebSocketClient, u16, &str) + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&WebSocketClient, &TransportError) + Send + Sync>;
pub type ReconnectHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;
pub type ExhaustedHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Event strategy assembled from closures
///
/// Callbacks are synchronous and run on the client's event path. Keep them
/// fast.
#[derive(Clone, Default)]
pub struct CallbackStrategy {
    on_open: Option<OpenHook>,
    on_message: Option<MessageHook>,
    on_binary: Option<BinaryHook>,
    on_closing: Option<ClosingHook>,
    on_failure: Option<FailureHook>,
    on_reconnect_scheduled: Option<ReconnectHook>,
    on_retries_exhausted: Option<ExhaustedHook>,
}

impl fmt::Debug for CallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackStrategy")
            .field("on_open", &self.on_open.as_ref().map(|_| "..."))
            .field("on_message", &self.on_message.as_ref().map(|_| "..."))
            .field("on_binary", &self.on_binary.as_ref().map(|_| "..."))
            .field("on_closing", &self.on_closing.as_ref().map(|_| "..."))
            .field("on_failure", &self.on_failure.as_ref().map(|_| "..."))
            .field(
                "on_reconnect_scheduled",
                &self.on_reconnect_scheduled.as_ref().map(|_| "..."),
            )
            .field(
                "on_retries_exhausted",
                &self.on_retries_exhausted.as_ref().map(|_| "..."),
            )
            .finish()
    }
}

impl CallbackStrategy {
    /// Create a strategy with no callbacks
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for successful opens (including reconnections)
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&WebSocketClient, &HandshakeResponse) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Register a callback for text messages
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&WebSocketClient, &str) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Register a callback for binary messages
    pub fn on_binary<F>(mut self, f: F) -> Self
    where
        F: Fn(&WebSocketClient, &[u8]) + Send + Sync + 'static,
    {
        self.on_binary = Some(Arc::new(f));
        self
    }

    /// Register a callback for normal closes from the peer
    pub fn on_closing<F>(mut self, f: F) -> Self
    where
        F: Fn(&WebSocketClient, u16, &str) + Send + Sync + 'static,
    {
        self.on_closing = Some(Arc::new(f));
        self
    }

    /// Register a callback for failures
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&WebSocketClient, &TransportError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(f));
        self
    }

    /// Register a callback for scheduled reconnections
    ///
    /// Called with the attempt number (1-indexed) and the delay before it.
    pub fn on_reconnect_scheduled<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.on_reconnect_scheduled = Some(Arc::new(f));
        self
    }

    /// Register a callback for when retries run out
    pub fn on_retries_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_retries_exhausted = Some(Arc::new(f));
        self
    }
}

#[async_trait]
impl EventStrategy for CallbackStrategy {
    async fn handle_open(&self, client: &WebSocketClient, response: &HandshakeResponse) {
        if let Some(ref hook) = self.on_open {
            hook(client, response);
        }
    }

    async fn handle_message(&self, client: &WebSocketClient, text: &str) {
        if let Some(ref hook) = self.on_message {
            hook(client, text);
        }
    }

    async fn handle_binary(&self, client: &WebSocketClient, bytes: &[u8]) {
        if let Some(ref hook) = self.on_binary {
            hook(client, bytes);
        }
    }

    async fn handle_closing(&self, client: &WebSocketClient, code: u16, reason: &str) {
        if let Some(ref hook) = self.on_closing {
            hook(client, code, reason);
        }
    }

    async fn handle_failure(
        &self,
        client: &WebSocketClient,
        error: &TransportError,
        _response: Option<&HandshakeResponse>,
    ) {
        if let Some(ref hook) = self.on_failure {
            hook(client, error);
        }
    }

    async fn handle_reconnect_scheduled(
        &self,
        _client: &WebSocketClient,
        attempt: u32,
        delay: Duration,
    ) {
        if let Some(ref hook) = self.on_reconnect_scheduled {
            hook(attempt, delay);
        }
    }

    async fn handle_retries_exhausted(&self, _client: &WebSocketClient, retries: u32) {
        if let Some(ref hook) = self.on_retries_exhausted {
            hook(retries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callbacks_clone() {
        let strategy = CallbackStrategy::new()
            .on_open(|_, _| {})
            .on_failure(|_, _| {});

        let cloned = strategy.clone();
        assert!(cloned.on_open.is_some());
        assert!(cloned.on_failure.is_some());
        assert!(cloned.on_message.is_none());
    }

    #[test]
    fn test_debug_hides_closures() {
        let strategy = CallbackStrategy::new().on_message(|_, _| {});
        let debug = format!("{:?}", strategy);
        assert!(debug.contains("on_message: Some(\"...\")"));
        assert!(debug.contains("on_open: None"));
    }
}
