//! Server-side session state for stateful mode.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ SessionRegistry                                      │
//! │  live:    HashMap<SessionId, Arc<Session>>           │
//! │  retired: HashSet<SessionId>  (never reissued)       │
//! └──────────────────────────────────────────────────────┘
//!          │ owns
//!          ▼
//! ┌──────────────────────┐
//! │ Session              │
//! │  id, created_at      │
//! │  TransportBinding    │── gate (one request at a time)
//! │                      │── closed (CancellationToken)
//! │                      │── EventStore (resumption buffer)
//! └──────────────────────┘
//! ```
//!
//! Request handlers borrow an `Arc<Session>` for one request; only the
//! registry keeps sessions alive across requests.

mod events;
mod registry;
mod types;

pub use events::{EventId, EventStore, StoredEvent, StreamId, DEFAULT_EVENT_CAPACITY};
pub use registry::{SessionError, SessionRegistry};
pub use types::{Session, SessionId, TransportBinding};
