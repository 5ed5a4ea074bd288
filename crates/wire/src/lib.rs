//! kingside Wire Protocol Types
//!
//! This crate defines the shared Protobuf message types exchanged between
//! clients and the match server, plus the durable match record message.
//! Clients and server MUST both depend on this crate so the schema has one
//! definition.
//!
//! # Message Categories
//!
//! - **Handshake**: `ClientHello` carries the bearer credential
//! - **Client events**: `ClientEvent` (move, new-game request, chat)
//! - **Notifications**: `ServerNotification`, one variant per outbound kind
//! - **Records**: `MatchRecord` and its moves, written by the persistence
//!   collaborator

#![deny(unsafe_code)]

use std::fmt;

use kingside_rules::Side;
use prost::{Message, Oneof};

// ============================================================================
// Identity
// ============================================================================

/// Opaque stable user id issued by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated user: stable id plus display name. Immutable per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            display_name: display_name.into(),
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// First frame on every connection.
#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    /// Bearer credential, verified by the auth collaborator.
    #[prost(string, tag = "1")]
    pub token: String,
}

// ============================================================================
// Client Events
// ============================================================================

/// Raw move payload as submitted by a client.
///
/// Fields are untrusted text; the server validates them into a strict
/// `MoveRequest` before the rules engine sees them.
#[derive(Clone, PartialEq, Message)]
pub struct MovePayload {
    #[prost(string, tag = "1")]
    pub from: String,

    #[prost(string, tag = "2")]
    pub to: String,

    #[prost(string, optional, tag = "3")]
    pub promotion: Option<String>,
}

impl MovePayload {
    pub fn new(from: &str, to: &str, promotion: Option<&str>) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            promotion: promotion.map(str::to_string),
        }
    }
}

/// Ask for a fresh match after the current one ended.
#[derive(Clone, PartialEq, Message)]
pub struct NewGameRequest {}

/// Chat text to relay.
#[derive(Clone, PartialEq, Message)]
pub struct ChatSend {
    #[prost(string, tag = "1")]
    pub text: String,
}

/// One inbound client event.
#[derive(Clone, PartialEq, Message)]
pub struct ClientEvent {
    #[prost(oneof = "ClientEventKind", tags = "1, 2, 3")]
    pub kind: Option<ClientEventKind>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum ClientEventKind {
    #[prost(message, tag = "1")]
    Move(MovePayload),
    #[prost(message, tag = "2")]
    RequestNewGame(NewGameRequest),
    #[prost(message, tag = "3")]
    Chat(ChatSend),
}

impl ClientEvent {
    pub fn of(kind: ClientEventKind) -> Self {
        Self { kind: Some(kind) }
    }
}

// ============================================================================
// Server Notifications
// ============================================================================

/// Seat assigned to the receiving connection.
#[derive(Clone, PartialEq, Message)]
pub struct PlayerRole {
    /// `w` or `b`.
    #[prost(string, tag = "1")]
    pub side: String,
}

/// Receiving connection watches without a seat.
#[derive(Clone, PartialEq, Message)]
pub struct SpectatorRole {}

/// Serialized position (FEN).
#[derive(Clone, PartialEq, Message)]
pub struct BoardState {
    #[prost(string, tag = "1")]
    pub fen: String,
}

/// An accepted move.
#[derive(Clone, PartialEq, Message)]
pub struct MoveMade {
    #[prost(string, tag = "1")]
    pub from: String,

    #[prost(string, tag = "2")]
    pub to: String,

    #[prost(string, optional, tag = "3")]
    pub promotion: Option<String>,

    #[prost(string, tag = "4")]
    pub san: String,

    /// `w` or `b`: the side that moved.
    #[prost(string, tag = "5")]
    pub side: String,
}

/// Rules engine rejected the submitted move (or its payload was malformed).
#[derive(Clone, PartialEq, Message)]
pub struct InvalidMove {
    #[prost(message, optional, tag = "1")]
    pub attempted: Option<MovePayload>,

    #[prost(string, tag = "2")]
    pub reason: String,
}

/// Submitter does not hold the seat whose turn it is.
#[derive(Clone, PartialEq, Message)]
pub struct UnauthorizedMove {
    #[prost(string, tag = "1")]
    pub reason: String,
}

/// A move arrived while the match is not active.
#[derive(Clone, PartialEq, Message)]
pub struct MatchNotActive {
    #[prost(string, tag = "1")]
    pub state: String,
}

/// Side to move is in check.
#[derive(Clone, PartialEq, Message)]
pub struct Check {
    /// `w` or `b`.
    #[prost(string, tag = "1")]
    pub side: String,

    #[prost(string, tag = "2")]
    pub message: String,
}

/// Match ended.
#[derive(Clone, PartialEq, Message)]
pub struct GameOver {
    /// `1-0`, `0-1`, `1/2-1/2` or `abandoned`.
    #[prost(string, tag = "1")]
    pub result: String,

    /// `checkmate`, `stalemate`, `draw`, `timeout` or `abandoned`.
    #[prost(string, tag = "2")]
    pub reason: String,

    /// `w`, `b`, or empty when there is no winner.
    #[prost(string, tag = "3")]
    pub winner: String,

    #[prost(string, tag = "4")]
    pub message: String,
}

/// A seated player left.
#[derive(Clone, PartialEq, Message)]
pub struct PlayerDisconnected {
    #[prost(string, tag = "1")]
    pub side: String,

    #[prost(string, tag = "2")]
    pub message: String,
}

/// Both seats are filled and the match is live.
#[derive(Clone, PartialEq, Message)]
pub struct GameReady {
    #[prost(string, tag = "1")]
    pub white: String,

    #[prost(string, tag = "2")]
    pub black: String,

    #[prost(string, tag = "3")]
    pub white_username: String,

    #[prost(string, tag = "4")]
    pub black_username: String,
}

/// Relayed chat line.
#[derive(Clone, PartialEq, Message)]
pub struct ChatMessage {
    #[prost(string, tag = "1")]
    pub user_id: String,

    #[prost(string, tag = "2")]
    pub username: String,

    #[prost(string, tag = "3")]
    pub text: String,

    #[prost(uint64, tag = "4")]
    pub timestamp_ms: u64,
}

/// Board was reset for a new match.
#[derive(Clone, PartialEq, Message)]
pub struct NewGameStarted {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Authoritative remaining time, sent on join/rejoin and on every clock start.
#[derive(Clone, PartialEq, Message)]
pub struct ClockSync {
    #[prost(uint64, tag = "1")]
    pub white_remaining_ms: u64,

    #[prost(uint64, tag = "2")]
    pub black_remaining_ms: u64,

    /// `w`, `b`, or empty when no clock is running.
    #[prost(string, tag = "3")]
    pub running: String,
}

/// Credential was rejected; the connection is closed after this frame.
#[derive(Clone, PartialEq, Message)]
pub struct AuthFailed {
    #[prost(string, tag = "1")]
    pub reason: String,
}

/// One outbound notification.
#[derive(Clone, PartialEq, Message)]
pub struct ServerNotification {
    #[prost(
        oneof = "NotificationKind",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16"
    )]
    pub kind: Option<NotificationKind>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum NotificationKind {
    #[prost(message, tag = "1")]
    PlayerRole(PlayerRole),
    #[prost(message, tag = "2")]
    SpectatorRole(SpectatorRole),
    #[prost(message, tag = "3")]
    BoardState(BoardState),
    #[prost(message, tag = "4")]
    Move(MoveMade),
    #[prost(message, tag = "5")]
    InvalidMove(InvalidMove),
    #[prost(message, tag = "6")]
    UnauthorizedMove(UnauthorizedMove),
    #[prost(message, tag = "7")]
    MatchNotActive(MatchNotActive),
    #[prost(message, tag = "8")]
    Check(Check),
    #[prost(message, tag = "9")]
    GameOver(GameOver),
    #[prost(message, tag = "10")]
    PlayerDisconnected(PlayerDisconnected),
    #[prost(message, tag = "11")]
    GameReady(GameReady),
    #[prost(message, tag = "12")]
    ChatMessage(ChatMessage),
    #[prost(message, tag = "13")]
    NewGameStarted(NewGameStarted),
    #[prost(message, tag = "14")]
    ClockSync(ClockSync),
    #[prost(message, tag = "15")]
    AuthFailed(AuthFailed),
    #[prost(message, tag = "16")]
    Superseded(Superseded),
}

/// The connection was replaced by a newer one for the same identity.
#[derive(Clone, PartialEq, Message)]
pub struct Superseded {}

impl ServerNotification {
    pub fn of(kind: NotificationKind) -> Self {
        Self { kind: Some(kind) }
    }

    /// Short name of the carried variant, for logs.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            Some(NotificationKind::PlayerRole(_)) => "playerRole",
            Some(NotificationKind::SpectatorRole(_)) => "spectatorRole",
            Some(NotificationKind::BoardState(_)) => "boardState",
            Some(NotificationKind::Move(_)) => "move",
            Some(NotificationKind::InvalidMove(_)) => "invalidMove",
            Some(NotificationKind::UnauthorizedMove(_)) => "unauthorizedMove",
            Some(NotificationKind::MatchNotActive(_)) => "matchNotActive",
            Some(NotificationKind::Check(_)) => "check",
            Some(NotificationKind::GameOver(_)) => "gameOver",
            Some(NotificationKind::PlayerDisconnected(_)) => "playerDisconnected",
            Some(NotificationKind::GameReady(_)) => "gameReady",
            Some(NotificationKind::ChatMessage(_)) => "chatMessage",
            Some(NotificationKind::NewGameStarted(_)) => "newGameStarted",
            Some(NotificationKind::ClockSync(_)) => "clockSync",
            Some(NotificationKind::AuthFailed(_)) => "authFailed",
            Some(NotificationKind::Superseded(_)) => "superseded",
            None => "empty",
        }
    }

    pub fn player_role(side: Side) -> Self {
        Self::of(NotificationKind::PlayerRole(PlayerRole {
            side: side.letter().to_string(),
        }))
    }

    pub fn spectator_role() -> Self {
        Self::of(NotificationKind::SpectatorRole(SpectatorRole {}))
    }

    pub fn board_state(fen: impl Into<String>) -> Self {
        Self::of(NotificationKind::BoardState(BoardState { fen: fen.into() }))
    }

    pub fn unauthorized_move(reason: impl Into<String>) -> Self {
        Self::of(NotificationKind::UnauthorizedMove(UnauthorizedMove {
            reason: reason.into(),
        }))
    }

    pub fn invalid_move(attempted: MovePayload, reason: impl Into<String>) -> Self {
        Self::of(NotificationKind::InvalidMove(InvalidMove {
            attempted: Some(attempted),
            reason: reason.into(),
        }))
    }

    pub fn match_not_active(state: impl Into<String>) -> Self {
        Self::of(NotificationKind::MatchNotActive(MatchNotActive {
            state: state.into(),
        }))
    }

    pub fn check(side: Side) -> Self {
        Self::of(NotificationKind::Check(Check {
            side: side.letter().to_string(),
            message: format!("{} is in check!", side.name()),
        }))
    }

    pub fn player_disconnected(side: Side) -> Self {
        Self::of(NotificationKind::PlayerDisconnected(PlayerDisconnected {
            side: side.letter().to_string(),
            message: format!("{} player disconnected", side.name()),
        }))
    }

    pub fn new_game_started() -> Self {
        Self::of(NotificationKind::NewGameStarted(NewGameStarted {
            message: "New game started!".to_string(),
        }))
    }

    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::of(NotificationKind::AuthFailed(AuthFailed {
            reason: reason.into(),
        }))
    }

    pub fn superseded() -> Self {
        Self::of(NotificationKind::Superseded(Superseded {}))
    }
}

// ============================================================================
// Match Record Types
// ============================================================================

/// Player entry of a match record.
#[derive(Clone, PartialEq, Message)]
pub struct RecordedPlayer {
    #[prost(string, tag = "1")]
    pub user_id: String,

    #[prost(string, tag = "2")]
    pub username: String,
}

impl From<&Identity> for RecordedPlayer {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.as_str().to_string(),
            username: identity.display_name.clone(),
        }
    }
}

/// One accepted move as persisted.
#[derive(Clone, PartialEq, Message)]
pub struct RecordedMove {
    #[prost(string, tag = "1")]
    pub from: String,

    #[prost(string, tag = "2")]
    pub to: String,

    #[prost(string, optional, tag = "3")]
    pub promotion: Option<String>,

    /// Standard algebraic notation.
    #[prost(string, tag = "4")]
    pub san: String,

    /// Position after the move.
    #[prost(string, tag = "5")]
    pub fen: String,

    #[prost(uint64, tag = "6")]
    pub timestamp_ms: u64,
}

/// Durable record of a single match.
#[derive(Clone, PartialEq, Message)]
pub struct MatchRecord {
    /// Schema version (starts at 1).
    #[prost(uint32, tag = "1")]
    pub record_format_version: u32,

    /// Persistent handle (UUID text).
    #[prost(string, tag = "2")]
    pub handle: String,

    #[prost(message, optional, tag = "3")]
    pub white: Option<RecordedPlayer>,

    #[prost(message, optional, tag = "4")]
    pub black: Option<RecordedPlayer>,

    #[prost(message, repeated, tag = "5")]
    pub moves: Vec<RecordedMove>,

    /// `active`, `completed` or `abandoned`.
    #[prost(string, tag = "6")]
    pub status: String,

    /// `1-0`, `0-1`, `1/2-1/2`, `abandoned`; empty while active.
    #[prost(string, tag = "7")]
    pub result: String,

    /// Winner's user id; absent for draws and abandonment.
    #[prost(string, optional, tag = "8")]
    pub winner: Option<String>,

    /// `checkmate`, `stalemate`, `draw`, `timeout`, `abandoned`; empty while active.
    #[prost(string, tag = "9")]
    pub end_reason: String,

    /// Position after the last recorded move.
    #[prost(string, tag = "10")]
    pub current_fen: String,

    /// Position at completion.
    #[prost(string, optional, tag = "11")]
    pub final_fen: Option<String>,

    #[prost(uint64, tag = "12")]
    pub created_at_ms: u64,

    #[prost(uint64, optional, tag = "13")]
    pub completed_at_ms: Option<u64>,

    /// SHA-256 over the move list (hex), written on completion.
    #[prost(string, tag = "14")]
    pub moves_digest: String,
}

// ============================================================================
// Tests
// ============================================================================
