//! Session state machine.
//!
//! A `Session` is the single authoritative match of a slot: seats, spectators,
//! lifecycle, position and clock. It is a plain value mutated by one owner
//! (the match coordinator), so every operation takes `&mut self` and the
//! current time explicitly.
//!
//! Lifecycle:
//!
//! ```text
//! WaitingForPlayers --(second seat filled)--> Active
//! Active --(timeout / checkmate / stalemate / draw)--> Completed
//! Active --(seated player leaves, invariant violation)--> Abandoned
//! Completed | Abandoned --(requestNewGame, both seated)--> Active
//! Completed | Abandoned --(requestNewGame, seat empty)--> WaitingForPlayers
//! Completed | Abandoned --(vacant seat refilled)--> Active
//! any --(both seats empty)--> WaitingForPlayers
//! ```

use std::collections::BTreeMap;
use std::fmt;

use kingside_record::{
    Completion, EndReason, MatchHandle, MatchResult, MatchStore, StoreError, recorded_move,
};
use kingside_rules::{
    ApplyOutcome, ChessRules, DrawKind, NormalizedMove, RulesEngine, Side, TerminalStatus,
};
use kingside_wire::{Identity, MovePayload, UserId};

use crate::clock::{Clock, ClockError, ClockSnapshot};
use crate::error::SessionError;
use crate::validation::validate_move;
use crate::{DEFAULT_INCREMENT_MS, DEFAULT_INITIAL_CLOCK_MS};

// ============================================================================
// Session Types
// ============================================================================

/// Lifecycle state of the current match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    WaitingForPlayers,
    Active,
    Completed,
    Abandoned,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForPlayers => "waitingForPlayers",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Terminal for the current persistent handle.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role an identity holds in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Seat(Side),
    Spectator,
}

/// Session parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Starting time per side.
    pub initial_clock_ms: u64,
    /// Credited to the mover after each move.
    pub increment_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_clock_ms: DEFAULT_INITIAL_CLOCK_MS,
            increment_ms: DEFAULT_INCREMENT_MS,
        }
    }
}

/// Both seats are filled and a new match began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReady {
    pub handle: MatchHandle,
    pub white: Identity,
    pub black: Identity,
}

/// How a match ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEnd {
    pub result: MatchResult,
    pub reason: EndReason,
    pub winner: Option<Side>,
    pub message: String,
}

impl GameEnd {
    fn on_time(loser: Side) -> Self {
        let winner = loser.opponent();
        Self {
            result: MatchResult::decisive(winner),
            reason: EndReason::Timeout,
            winner: Some(winner),
            message: format!("{} ran out of time! {} wins!", loser.name(), winner.name()),
        }
    }

    fn from_status(status: TerminalStatus) -> Option<Self> {
        let end = match status {
            TerminalStatus::None => return None,
            TerminalStatus::Checkmate { winner } => Self {
                result: MatchResult::decisive(winner),
                reason: EndReason::Checkmate,
                winner: Some(winner),
                message: format!("Checkmate! {} wins!", winner.name()),
            },
            TerminalStatus::Stalemate => Self {
                result: MatchResult::Draw,
                reason: EndReason::Stalemate,
                winner: None,
                message: "Game Over: Stalemate - It's a draw!".to_string(),
            },
            TerminalStatus::DrawOther(kind) => Self {
                result: MatchResult::Draw,
                reason: EndReason::Draw,
                winner: None,
                message: match kind {
                    DrawKind::InsufficientMaterial => "Game Over: Draw by insufficient material!",
                    DrawKind::FiftyMoveRule => "Game Over: Draw by the fifty-move rule!",
                    DrawKind::ThreefoldRepetition => "Game Over: Draw by threefold repetition!",
                }
                .to_string(),
            },
        };
        Some(end)
    }

    fn abandoned(message: String) -> Self {
        Self {
            result: MatchResult::Abandoned,
            reason: EndReason::Abandoned,
            winner: None,
            message,
        }
    }
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub role: Role,
    /// The identity already held `role`; no seat assignment happened.
    pub rejoined: bool,
    pub ready: Option<MatchReady>,
}

/// What follows an applied move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    None,
    /// The side now to move is in check.
    Check(Side),
    GameOver(GameEnd),
}

/// Result of an authorized, legal move submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Applied {
        side: Side,
        normalized: NormalizedMove,
        fen: String,
        follow_up: FollowUp,
    },
    /// The mover's time ran out before the move landed. The position is
    /// unchanged.
    TimedOut(GameEnd),
}

/// Result of a leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    NotPresent,
    Spectator,
    Seat {
        side: Side,
        /// Set when the leave abandoned an active match.
        abandoned: Option<GameEnd>,
        /// Both seats are now empty and the session was re-initialized.
        reset: bool,
    },
}

/// Result of a new-game request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGameOutcome {
    pub fen: String,
    pub ready: Option<MatchReady>,
}

// ============================================================================
// Session
// ============================================================================

/// The authoritative match.
pub struct Session<R: RulesEngine = ChessRules> {
    config: SessionConfig,
    lifecycle: Lifecycle,
    white: Option<Identity>,
    black: Option<Identity>,
    spectators: BTreeMap<UserId, Identity>,
    position: R,
    clock: Clock,
    handle: Option<MatchHandle>,
    store: Box<dyn MatchStore>,
    persistence_failures: u64,
}

impl<R: RulesEngine> Session<R> {
    /// Create an empty session waiting for players.
    pub fn new(config: SessionConfig, store: Box<dyn MatchStore>) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::WaitingForPlayers,
            white: None,
            black: None,
            spectators: BTreeMap::new(),
            position: R::default(),
            clock: Clock::new(config.initial_clock_ms),
            handle: None,
            store,
            persistence_failures: 0,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn seat(&self, side: Side) -> Option<&Identity> {
        match side {
            Side::White => self.white.as_ref(),
            Side::Black => self.black.as_ref(),
        }
    }

    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if let Some(side) = self.side_of(user) {
            return Some(Role::Seat(side));
        }
        self.spectators.contains_key(user).then_some(Role::Spectator)
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    /// Serialized current position.
    pub fn fen(&self) -> String {
        self.position.position_snapshot()
    }

    pub fn side_to_move(&self) -> Side {
        self.position.side_to_move()
    }

    pub fn clock_snapshot(&self, now_ms: u64) -> ClockSnapshot {
        self.clock.snapshot(now_ms)
    }

    /// Handle of the current match record.
    pub fn handle(&self) -> Option<MatchHandle> {
        self.handle
    }

    /// Number of record writes that failed.
    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures
    }

    fn side_of(&self, user: &UserId) -> Option<Side> {
        if self.white.as_ref().is_some_and(|i| i.user_id == *user) {
            Some(Side::White)
        } else if self.black.as_ref().is_some_and(|i| i.user_id == *user) {
            Some(Side::Black)
        } else {
            None
        }
    }

    fn seat_mut(&mut self, side: Side) -> &mut Option<Identity> {
        match side {
            Side::White => &mut self.white,
            Side::Black => &mut self.black,
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Admit an identity.
    ///
    /// An identity that already holds a role keeps it. Otherwise White is
    /// filled first, then Black, then the identity becomes a spectator.
    /// Filling the second seat starts a match.
    pub fn join(&mut self, identity: Identity, now_ms: u64) -> JoinOutcome {
        if let Some(role) = self.role_of(&identity.user_id) {
            tracing::debug!(user_id = %identity.user_id, ?role, "identity rejoined");
            return JoinOutcome {
                role,
                rejoined: true,
                ready: None,
            };
        }

        let vacant = [Side::White, Side::Black]
            .into_iter()
            .find(|side| self.seat(*side).is_none());
        let Some(side) = vacant else {
            tracing::info!(user_id = %identity.user_id, "spectator joined");
            self.spectators.insert(identity.user_id.clone(), identity);
            return JoinOutcome {
                role: Role::Spectator,
                rejoined: false,
                ready: None,
            };
        };

        tracing::info!(user_id = %identity.user_id, side = %side, "seat filled");
        *self.seat_mut(side) = Some(identity);

        let both_seated = self.white.is_some() && self.black.is_some();
        let ready = if both_seated && self.lifecycle != Lifecycle::Active {
            self.start_match(now_ms)
        } else {
            None
        };

        JoinOutcome {
            role: Role::Seat(side),
            rejoined: false,
            ready,
        }
    }

    /// Submit a move on behalf of `user`.
    ///
    /// Checks run in order: seated, active, turn, payload shape, legality.
    /// A rejected submission never touches position or clock.
    pub fn submit_move(
        &mut self,
        user: &UserId,
        payload: &MovePayload,
        now_ms: u64,
    ) -> Result<MoveOutcome, SessionError> {
        let Some(side) = self.side_of(user) else {
            return Err(SessionError::UnauthorizedMove(
                "Spectators cannot move".to_string(),
            ));
        };
        if self.lifecycle != Lifecycle::Active {
            return Err(SessionError::MatchNotActive(self.lifecycle));
        }
        let to_move = self.position.side_to_move();
        if side != to_move {
            return Err(SessionError::UnauthorizedMove(format!(
                "Not your turn - {} to move",
                to_move.name()
            )));
        }

        let request =
            validate_move(payload).map_err(|err| SessionError::IllegalMove(err.to_string()))?;
        let (next, normalized) = match self.position.try_apply(&request) {
            ApplyOutcome::Accepted { next, normalized } => (next, normalized),
            ApplyOutcome::Rejected => {
                return Err(SessionError::IllegalMove(format!(
                    "{} is not a legal move",
                    request.uci()
                )));
            }
        };

        // Time is settled before the rules engine's verdict on the new position
        let flagged = match self.clock.commit_elapsed(now_ms) {
            Ok(flagged) => flagged,
            Err(err) => return Err(self.invariant_violation(err.to_string(), now_ms)),
        };
        if let Some(loser) = flagged {
            let end = self.finish(Lifecycle::Completed, GameEnd::on_time(loser), now_ms);
            return Ok(MoveOutcome::TimedOut(end));
        }

        self.position = next;
        self.clock.add_increment(side, self.config.increment_ms);
        let fen = self.position.position_snapshot();
        let entry = recorded_move(&normalized, &fen, now_ms);
        self.persist("append_move", |store, handle| store.append_move(handle, entry));

        let follow_up = match GameEnd::from_status(self.position.terminal_status()) {
            Some(end) => FollowUp::GameOver(self.finish(Lifecycle::Completed, end, now_ms)),
            None => {
                let next_side = self.position.side_to_move();
                if let Err(err) = self.start_clock(next_side, now_ms) {
                    return Err(self.invariant_violation(err.to_string(), now_ms));
                }
                if self.position.is_in_check() {
                    FollowUp::Check(next_side)
                } else {
                    FollowUp::None
                }
            }
        };

        tracing::debug!(side = %side, uci = %normalized.uci(), san = %normalized.san, "move applied");
        Ok(MoveOutcome::Applied {
            side,
            normalized,
            fen,
            follow_up,
        })
    }

    /// Start a fresh match after the current one finished.
    ///
    /// Only a seated identity may ask, and only from `Completed` or
    /// `Abandoned`. A repeated request once the reset happened is refused
    /// with `MatchInProgress`, so one logical reset allocates one handle.
    pub fn request_new_game(
        &mut self,
        user: &UserId,
        now_ms: u64,
    ) -> Result<NewGameOutcome, SessionError> {
        if self.side_of(user).is_none() {
            return Err(SessionError::NotSeated);
        }
        if !self.lifecycle.is_finished() {
            return Err(SessionError::MatchInProgress);
        }

        let ready = if self.white.is_some() && self.black.is_some() {
            self.start_match(now_ms)
        } else {
            self.reinitialize();
            None
        };

        tracing::info!(user_id = %user, lifecycle = %self.lifecycle, "new game requested");
        Ok(NewGameOutcome {
            fen: self.fen(),
            ready,
        })
    }

    /// Remove an identity.
    ///
    /// A seated player leaving an active match abandons it. When both seats
    /// end up empty the session is re-initialized; spectators stay.
    pub fn leave(&mut self, user: &UserId, now_ms: u64) -> LeaveOutcome {
        if self.spectators.remove(user).is_some() {
            tracing::debug!(user_id = %user, "spectator left");
            return LeaveOutcome::Spectator;
        }
        let Some(side) = self.side_of(user) else {
            return LeaveOutcome::NotPresent;
        };

        let abandoned = (self.lifecycle == Lifecycle::Active).then(|| {
            let end = GameEnd::abandoned(format!("{} player disconnected", side.name()));
            self.finish(Lifecycle::Abandoned, end, now_ms)
        });
        *self.seat_mut(side) = None;
        tracing::info!(user_id = %user, side = %side, "seat vacated");

        let reset = self.white.is_none() && self.black.is_none();
        if reset {
            self.reinitialize();
        }

        LeaveOutcome::Seat {
            side,
            abandoned,
            reset,
        }
    }

    /// Settle a clock that ran out with no further moves.
    pub fn poll_clock(&mut self, now_ms: u64) -> Result<Option<GameEnd>, SessionError> {
        if self.lifecycle != Lifecycle::Active {
            return Ok(None);
        }
        let snapshot = self.clock.snapshot(now_ms);
        let Some(running) = snapshot.running else {
            return Ok(None);
        };
        if snapshot.remaining(running) > 0 {
            return Ok(None);
        }

        match self.clock.commit_elapsed(now_ms) {
            Ok(Some(loser)) => Ok(Some(self.finish(
                Lifecycle::Completed,
                GameEnd::on_time(loser),
                now_ms,
            ))),
            Ok(None) => Err(self.invariant_violation(
                "running side at zero but not flagged".to_string(),
                now_ms,
            )),
            Err(err) => Err(self.invariant_violation(err.to_string(), now_ms)),
        }
    }

    /// Check structural invariants, abandoning the match on violation.
    pub fn check_invariants(&mut self, now_ms: u64) -> Result<(), SessionError> {
        match self.audit() {
            Ok(()) => Ok(()),
            Err(detail) => Err(self.invariant_violation(detail, now_ms)),
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Clock start is a no-op unless the match is active.
    fn start_clock(&mut self, side: Side, now_ms: u64) -> Result<(), ClockError> {
        if self.lifecycle != Lifecycle::Active {
            return Ok(());
        }
        self.clock.start(side, now_ms)
    }

    fn start_match(&mut self, now_ms: u64) -> Option<MatchReady> {
        let (Some(white), Some(black)) = (self.white.clone(), self.black.clone()) else {
            return None;
        };

        let handle = MatchHandle::generate();
        self.reset_board();
        self.handle = Some(handle);
        self.lifecycle = Lifecycle::Active;
        self.persist("create_match", |store, handle| {
            store.create_match(handle, &white, &black, now_ms)
        });

        if let Err(err) = self.start_clock(Side::White, now_ms) {
            self.invariant_violation(err.to_string(), now_ms);
            return None;
        }

        tracing::info!(
            %handle,
            white = %white.user_id,
            black = %black.user_id,
            "match started"
        );
        Some(MatchReady {
            handle,
            white,
            black,
        })
    }

    fn finish(&mut self, lifecycle: Lifecycle, end: GameEnd, now_ms: u64) -> GameEnd {
        self.clock.stop();
        self.lifecycle = lifecycle;

        let completion = Completion {
            result: end.result,
            winner: end
                .winner
                .and_then(|side| self.seat(side))
                .map(|identity| identity.user_id.clone()),
            reason: end.reason,
            final_fen: self.position.position_snapshot(),
            completed_at_ms: now_ms,
        };
        self.persist("complete", |store, handle| store.complete(handle, completion));

        tracing::info!(
            handle = ?self.handle,
            result = end.result.as_str(),
            reason = end.reason.as_str(),
            lifecycle = %lifecycle,
            "match ended"
        );
        end
    }

    /// Force the match into `Abandoned` with a fresh board and stopped clock.
    fn invariant_violation(&mut self, detail: String, now_ms: u64) -> SessionError {
        tracing::error!(handle = ?self.handle, %detail, "session invariant violated");
        if self.lifecycle == Lifecycle::Active {
            let end = GameEnd::abandoned("Match aborted".to_string());
            self.finish(Lifecycle::Abandoned, end, now_ms);
        }
        self.lifecycle = Lifecycle::Abandoned;
        self.repair_seats();
        if self.white.is_none() && self.black.is_none() {
            self.reinitialize();
        } else {
            self.reset_board();
        }
        SessionError::InvariantViolation(detail)
    }

    /// Drop a duplicated seat and seated identities from the spectator set.
    fn repair_seats(&mut self) {
        if let (Some(white), Some(black)) = (&self.white, &self.black)
            && white.user_id == black.user_id
        {
            self.black = None;
        }
        for seated in [&self.white, &self.black].into_iter().flatten() {
            self.spectators.remove(&seated.user_id);
        }
    }

    fn reinitialize(&mut self) {
        self.lifecycle = Lifecycle::WaitingForPlayers;
        self.handle = None;
        self.reset_board();
    }

    fn reset_board(&mut self) {
        self.position = R::default();
        self.clock = Clock::new(self.config.initial_clock_ms);
    }

    fn audit(&self) -> Result<(), String> {
        if let (Some(white), Some(black)) = (&self.white, &self.black)
            && white.user_id == black.user_id
        {
            return Err(format!("{} holds both seats", white.user_id));
        }
        for seated in [&self.white, &self.black].into_iter().flatten() {
            if self.spectators.contains_key(&seated.user_id) {
                return Err(format!("{} is seated and spectating", seated.user_id));
            }
        }
        if self.clock.is_running() && self.lifecycle != Lifecycle::Active {
            return Err(format!("clock running while {}", self.lifecycle));
        }
        if self.lifecycle == Lifecycle::Active && (self.white.is_none() || self.black.is_none()) {
            return Err("active match with an empty seat".to_string());
        }
        Ok(())
    }

    /// Fire-and-forget record write. Failures are logged and counted.
    fn persist<F>(&mut self, op: &'static str, write: F)
    where
        F: FnOnce(&mut dyn MatchStore, MatchHandle) -> Result<(), StoreError>,
    {
        let Some(handle) = self.handle else {
            return;
        };
        if let Err(err) = write(self.store.as_mut(), handle) {
            self.persistence_failures += 1;
            let err = SessionError::from(err);
            tracing::error!(%handle, op, error = %err, "match record write failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
