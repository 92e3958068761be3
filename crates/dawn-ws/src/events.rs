//! Transport lifecycle events
//!
//! A transport reports what happens on a session through an [`EventSink`].
//! The sink tags every event with its session id so the client can ignore
//! stragglers from a superseded connection, and it lets through at most one
//! terminal event (closing or failure) per session.

use crate::error::TransportError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Close code for a normal, intentional closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Returns true if a peer close with `code` is an expected shutdown
///
/// Expected closes raise a closing event and are not retried. Every other
/// code is reported as a failure and goes through reconnection.
pub fn is_expected_close(code: u16) -> bool {
    code == NORMAL_CLOSURE
}

/// Status and headers of the HTTP upgrade response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code (101 on success)
    pub status: u16,
    /// Response headers in arrival order
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// Create a response with no headers
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// First header value matching `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Something that happened on a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed
    Open(HandshakeResponse),
    /// Text frame received
    Text(String),
    /// Binary frame received
    Binary(Vec<u8>),
    /// Peer closed the session normally
    Closing { code: u16, reason: String },
    /// Session failed
    Failure {
        error: TransportError,
        response: Option<HandshakeResponse>,
    },
}

impl TransportEvent {
    /// Closing and failure end a session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing { .. } | Self::Failure { .. })
    }
}

/// An event tagged with the session that produced it
#[derive(Debug)]
pub(crate) struct SessionEvent {
    pub session: u64,
    pub event: TransportEvent,
}

/// Per-session callback surface handed to [`Transport::open`](crate::transport::Transport::open)
///
/// Events can be raised from any task or thread. Once a closing or failure
/// event has been raised, everything after it is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
    terminated: Arc<AtomicBool>,
}

impl EventSink {
    pub(crate) fn new(session: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            session,
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session id this sink reports for
    pub fn session(&self) -> u64 {
        self.session
    }

    /// True once a closing or failure event has been raised
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Raise an event; returns false if it was dropped
    pub fn emit(&self, event: TransportEvent) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::AcqRel) {
                debug!(session = self.session, "dropping event after session ended");
                return false;
            }
        } else if self.is_terminated() {
            debug!(session = self.session, "dropping event after session ended");
            return false;
        }

        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }

    /// Handshake completed
    pub fn open(&self, response: HandshakeResponse) -> bool {
        self.emit(TransportEvent::Open(response))
    }

    /// Text frame received
    pub fn text(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Text(text.into()))
    }

    /// Binary frame received
    pub fn binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.emit(TransportEvent::Binary(bytes.into()))
    }

    /// Peer closed normally
    pub fn closing(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closing {
            code,
            reason: reason.into(),
        })
    }

    /// Session failed
    pub fn failure(&self, error: TransportError, response: Option<HandshakeResponse>) -> bool {
        self.emit(TransportEvent::Failure { error, response })
    }
}
