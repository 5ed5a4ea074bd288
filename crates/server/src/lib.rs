//! kingside Server
//!
//! The server owns one live match and everything around it:
//! - Clock: server-authoritative remaining time per side
//! - Session: seats, spectators and the match lifecycle state machine
//! - Connection registry: identity → outbound channel
//! - Match coordinator: serializes every inbound event against the session
//!   and fans out notifications
//! - Edges: move payload validation, authentication, the background record
//!   writer and the TCP transport
//!
//! # Architecture
//!
//! Transport tasks authenticate connections and forward events as messages
//! to a single coordinator task. Only the coordinator mutates the session,
//! so no two events interleave their effect on match state. The rules
//! engine is consulted through `kingside_rules::RulesEngine`; records are
//! written through `kingside_record::MatchStore`.

#![deny(unsafe_code)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod transport;
pub mod validation;

pub use auth::{AuthError, Authenticator, TokenAuthenticator};
pub use clock::{Clock, ClockError, ClockSnapshot, ManualTime, MonotonicTime, TimeSource};
pub use config::{ConfigError, ServerConfig, TokenEntry};
pub use coordinator::{CoordinatorHandle, Inbound, MatchCoordinator, MatchSlot};
pub use error::SessionError;
pub use registry::{ConnectionId, ConnectionRegistry, LeaveEvent};
pub use session::{Lifecycle, Role, Session, SessionConfig};

// ============================================================================
// Server Parameters
// ============================================================================

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 7878);

/// Default starting time per side (10 minutes).
pub const DEFAULT_INITIAL_CLOCK_MS: u64 = 600_000;

/// Default per-move increment.
pub const DEFAULT_INCREMENT_MS: u64 = 0;

/// Default interval of the background clock check.
pub const DEFAULT_CLOCK_CHECK_INTERVAL_MS: u64 = 500;

/// Upper bound for the background clock check interval.
pub const MAX_CLOCK_CHECK_INTERVAL_MS: u64 = 1_000;

/// Default outbound queue depth per connection.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default depth of the coordinator's inbound queue.
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 1024;

/// Default time a new connection has to present its `ClientHello`.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default maximum frame size.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Longest chat message relayed, in characters.
pub const MAX_CHAT_CHARS: usize = 500;
