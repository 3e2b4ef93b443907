//! Session and transport binding types.

use super::events::{EventId, EventStore, StoredEvent};
use super::registry::SessionError;
use crate::protocol::SessionSummary;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Opaque server-issued session identifier.
pub type SessionId = String;

/// The handler state attached to exactly one session for its whole life.
///
/// All requests for a session pass through `gate`, so at most one operation
/// touches the binding at a time.
pub struct TransportBinding {
    gate: Mutex<()>,
    closed: CancellationToken,
    events: EventStore,
    next_stream: AtomicU64,
}

impl TransportBinding {
    fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            closed: CancellationToken::new(),
            events: EventStore::default(),
            next_stream: AtomicU64::new(0),
        }
    }
}

/// A live session owned by the [`SessionRegistry`](super::SessionRegistry).
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    binding: TransportBinding,
    initialized: AtomicBool,
    tool_calls: AtomicU64,
}

impl Session {
    pub(crate) fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            binding: TransportBinding::new(),
            initialized: AtomicBool::new(false),
            tool_calls: AtomicU64::new(0),
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Wait for exclusive use of the binding.
    ///
    /// Fails with [`SessionError::Closed`] if the session was torn down while
    /// waiting or before the call.
    pub async fn acquire(&self) -> Result<MutexGuard<'_, ()>, SessionError> {
        let guard = self.binding.gate.lock().await;
        if self.is_closed() {
            return Err(SessionError::Closed(self.id.clone()));
        }
        Ok(guard)
    }

    pub fn is_closed(&self) -> bool {
        self.binding.closed.is_cancelled()
    }

    /// Token cancelled when the session is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.binding.closed.clone()
    }

    /// Close the binding: reject further requests, wait for the in-flight one,
    /// then drop buffered events.
    pub(crate) async fn close(&self) {
        self.binding.closed.cancel();
        let _gate = self.binding.gate.lock().await;
        self.binding.events.clear();
    }

    /// Mark the MCP handshake as done. Returns `true` if it already was.
    pub fn mark_initialized(&self) -> bool {
        self.initialized.swap(true, Ordering::AcqRel)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Count a tool invocation made on this session.
    pub fn record_tool_call(&self) -> u64 {
        self.tool_calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }

    /// Allocate a stream id for one response.
    pub fn open_stream(&self) -> String {
        let n = self.binding.next_stream.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.id)
    }

    /// Buffer a message written to `stream_id` for later resumption.
    pub fn record_event(&self, stream_id: &str, message: Value) -> EventId {
        self.binding.events.store(stream_id, message)
    }

    /// Messages written to the same stream after `last_event_id`.
    pub fn replay_after(&self, last_event_id: &str) -> Option<Vec<StoredEvent>> {
        self.binding.events.replay_after(last_event_id)
    }

    pub fn buffered_events(&self) -> usize {
        self.binding.events.len()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            tool_calls: self.tool_calls(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn closed_session_rejects_acquire() {
        let session = Session::new("s1".to_string());
        session.record_event("s1-0", json!({"ok": true}));
        assert!(session.acquire().await.is_ok());

        session.close().await;
        assert!(session.is_closed());
        assert_eq!(session.buffered_events(), 0);
        assert!(matches!(
            session.acquire().await,
            Err(SessionError::Closed(id)) if id == "s1"
        ));
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_operation() {
        let session = Arc::new(Session::new("s2".to_string()));
        let guard = session.acquire().await.expect("open session");

        let closer = {
            let session = session.clone();
            tokio::spawn(async move { session.close().await })
        };
        while !session.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(!closer.is_finished());

        drop(guard);
        closer.await.expect("close task");
    }

    #[test]
    fn initialization_flag_flips_once() {
        let session = Session::new("s3".to_string());
        assert!(!session.mark_initialized());
        assert!(session.mark_initialized());
        assert!(session.is_initialized());
    }
}
