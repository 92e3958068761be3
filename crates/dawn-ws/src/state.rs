//! Connection state shared between the client's tasks
//!
//! One lock guards the connected flag, the retry counter, the current
//! session id and its transport handle. Every transition takes the session
//! id of the event that caused it and is refused for a superseded session,
//! so the flag only ever reflects events that were actually delivered.

use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::transport::TransportHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Point-in-time copy of the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState {
    /// True between an open event and the next closing/failure event
    pub connected: bool,
    /// Reconnects scheduled since the last successful open
    pub retry_count: u32,
}

struct Inner {
    state: ConnectionState,
    session: u64,
    handle: Option<Arc<dyn TransportHandle>>,
}

/// Lock-guarded state plus a wakeup for tasks waiting on an open
pub(crate) struct SharedState {
    inner: Mutex<Inner>,
    opened: Notify,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::default(),
                session: 0,
                handle: None,
            }),
            opened: Notify::new(),
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn current_session(&self) -> u64 {
        self.inner.lock().session
    }

    /// Start a new session; `open` runs under the lock and yields its handle
    ///
    /// Returns the new session id, or `None` if `open` declined.
    pub fn begin_session<F>(&self, open: F) -> Option<u64>
    where
        F: FnOnce(u64) -> Option<Arc<dyn TransportHandle>>,
    {
        let mut inner = self.inner.lock();
        let session = inner.session + 1;
        let handle = open(session)?;
        inner.session = session;
        inner.handle = Some(handle);
        Some(session)
    }

    /// Detach the current handle so it can be closed
    pub fn take_handle(&self) -> Option<Arc<dyn TransportHandle>> {
        self.inner.lock().handle.take()
    }

    /// Handle to write to, only while connected
    pub fn connected_handle(&self) -> Option<Arc<dyn TransportHandle>> {
        let inner = self.inner.lock();
        if inner.state.connected {
            inner.handle.clone()
        } else {
            None
        }
    }

    /// Wait for the next open. Create the future before checking
    /// [`connected_handle`](Self::connected_handle) so no wakeup is missed.
    pub fn opened(&self) -> tokio::sync::futures::Notified<'_> {
        self.opened.notified()
    }

    /// Open event: connected, retry counter reset
    pub fn mark_open(&self, session: u64) -> Option<ConnectionState> {
        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.session != session {
                return None;
            }
            inner.state.connected = true;
            inner.state.retry_count = 0;
            inner.state
        };
        self.opened.notify_waiters();
        Some(snapshot)
    }

    /// Closing event: disconnected, no reconnection
    pub fn mark_closing(&self, session: u64) -> Option<ConnectionState> {
        let mut inner = self.inner.lock();
        if inner.session != session {
            return None;
        }
        inner.state.connected = false;
        Some(inner.state)
    }

    /// Failure event: disconnected, and the reconnect decision taken in the
    /// same critical section. A retry increments the counter.
    pub fn mark_failed(
        &self,
        session: u64,
        policy: &ReconnectPolicy,
    ) -> Option<(ConnectionState, ReconnectDecision)> {
        let mut inner = self.inner.lock();
        if inner.session != session {
            return None;
        }
        inner.state.connected = false;
        let decision = policy.decide(inner.state.retry_count);
        if let ReconnectDecision::Retry { .. } = decision {
            inner.state.retry_count += 1;
        }
        Some((inner.state, decision))
    }
}
