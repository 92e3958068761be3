//! Persistent WebSocket client
//!
//! This crate provides a long-lived WebSocket client that keeps itself
//! connected: outbound messages go through a queue drained by a single
//! sender task, transport events are routed into a pluggable
//! [`EventStrategy`], and failures trigger reconnection with exponential
//! backoff.
//!
//! # Features
//!
//! - Fire-and-forget `send` backed by a bounded or unbounded FIFO queue
//! - Automatic reconnection with exponential backoff and a retry ceiling
//! - Pluggable event handling (trait objects or closures)
//! - Transport abstraction with a tokio-tungstenite implementation and a
//!   mock for tests (`test-utils` feature)
//!
//! # Example
//!
//! ```no_run
//! use dawn_ws::{CallbackStrategy, ReconnectPolicy, WebSocketClient, WebSocketConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WebSocketConfig::new().with_retry(
//!         ReconnectPolicy::new()
//!             .with_retry_interval(Duration::from_secs(1))
//!             .with_max_retries(5),
//!     );
//!
//!     let client = WebSocketClient::builder("wss://echo.example.com")
//!         .with_config(config)
//!         .with_strategy(CallbackStrategy::new().on_message(|_client, text| {
//!             println!("{}", text);
//!         }))
//!         .connect()?;
//!
//!     client.send("hello").await?;
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
mod queue;
pub mod reconnect;
pub mod state;
pub mod strategy;
pub mod transport;

// Re-export main types
pub use client::{WebSocketClient, WebSocketClientBuilder, CLOSE_REASON};
pub use config::{ConnectionConfig, QueueCapacity, WebSocketConfig};
pub use error::{ClientError, ConfigError, TransportError};
pub use events::{is_expected_close, EventSink, HandshakeResponse, TransportEvent, NORMAL_CLOSURE};
pub use hooks::CallbackStrategy;
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use state::ConnectionState;
pub use strategy::{DefaultStrategy, EventStrategy};
pub use transport::{Transport, TransportHandle, TungsteniteTransport};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::{MockSession, MockTransport};
