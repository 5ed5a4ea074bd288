//! Match coordinator: the single serialization point for session events.
//!
//! Transport tasks never touch the session. They enqueue `Inbound` messages
//! on one channel; the coordinator drains it one message at a time, applies
//! each to the session, and fans the resulting notifications out through the
//! connection registry. A periodic tick settles clocks that run out between
//! moves.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kingside_rules::{ChessRules, NormalizedMove, RulesEngine, Side};
use kingside_wire::{
    ChatMessage, ClientEventKind, ClockSync, GameOver, GameReady, Identity, MoveMade, MovePayload,
    NotificationKind, ServerNotification, UserId,
};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::MAX_CHAT_CHARS;
use crate::clock::{ClockSnapshot, TimeSource};
use crate::error::SessionError;
use crate::registry::{ConnectionId, ConnectionRegistry, Outbox};
use crate::session::{
    FollowUp, GameEnd, LeaveOutcome, Lifecycle, MatchReady, MoveOutcome, Role, Session,
};

// ============================================================================
// Inbound Events
// ============================================================================

/// One event for the coordinator, already bound to an authenticated identity.
pub enum Inbound {
    /// Authentication succeeded on a new connection.
    Join {
        identity: Identity,
        connection_id: ConnectionId,
        outbox: Outbox,
    },
    /// A client event from a live connection.
    Event {
        user_id: UserId,
        connection_id: ConnectionId,
        event: ClientEventKind,
    },
    /// The transport connection closed.
    Disconnect {
        user_id: UserId,
        connection_id: ConnectionId,
        reason: String,
    },
}

/// The coordinator task has exited.
#[derive(Debug, thiserror::Error)]
#[error("match coordinator has stopped")]
pub struct CoordinatorClosed;

/// Cloneable producer side of the coordinator queue.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Inbound>,
    next_connection_id: Arc<AtomicU64>,
}

impl CoordinatorHandle {
    /// Create a bounded inbound queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            tx,
            next_connection_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, rx)
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue an event, waiting for queue space.
    pub async fn send(&self, inbound: Inbound) -> Result<(), CoordinatorClosed> {
        self.tx.send(inbound).await.map_err(|_| CoordinatorClosed)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub type SlotId = u32;

/// One match slot. The coordinator owns the session value outright.
pub struct MatchSlot<R: RulesEngine = ChessRules> {
    pub id: SlotId,
    pub session: Session<R>,
}

pub struct MatchCoordinator<R: RulesEngine = ChessRules> {
    slot: MatchSlot<R>,
    registry: ConnectionRegistry,
    time: Arc<dyn TimeSource>,
}

impl<R: RulesEngine> MatchCoordinator<R> {
    pub fn new(session: Session<R>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            slot: MatchSlot { id: 0, session },
            registry: ConnectionRegistry::new(),
            time,
        }
    }

    pub fn session(&self) -> &Session<R> {
        &self.slot.session
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Drain `inbound` until every producer is gone, settling clocks every
    /// `clock_check_interval`.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        clock_check_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(clock_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(slot = self.slot.id, "match coordinator running");

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = ticker.tick() => self.poll_clock(),
            }
        }

        tracing::info!(slot = self.slot.id, "match coordinator stopped");
    }

    /// Apply one inbound event.
    pub fn handle(&mut self, inbound: Inbound) {
        let now_ms = self.time.now_ms();
        match inbound {
            Inbound::Join {
                identity,
                connection_id,
                outbox,
            } => self.on_join(identity, connection_id, outbox, now_ms),
            Inbound::Event {
                user_id,
                connection_id,
                event,
            } => {
                if !self.registry.is_current(&user_id, connection_id) {
                    tracing::debug!(%user_id, connection_id, "event from stale connection dropped");
                    return;
                }
                match event {
                    ClientEventKind::Move(payload) => self.on_move(&user_id, payload, now_ms),
                    ClientEventKind::RequestNewGame(_) => self.on_new_game(&user_id, now_ms),
                    ClientEventKind::Chat(chat) => self.on_chat(&user_id, &chat.text, now_ms),
                }
            }
            Inbound::Disconnect {
                user_id,
                connection_id,
                reason,
            } => self.on_disconnect(&user_id, connection_id, &reason, now_ms),
        }

        if let Err(err) = self.slot.session.check_invariants(now_ms) {
            tracing::error!(error = %err, "match aborted");
            self.broadcast_abort(now_ms);
        }
    }

    /// Settle a clock that ran out without a move.
    pub fn poll_clock(&mut self) {
        let now_ms = self.time.now_ms();
        match self.slot.session.poll_clock(now_ms) {
            Ok(Some(end)) => {
                self.registry.broadcast(&game_over(&end));
                self.broadcast_clock(now_ms);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(error = %err, "match aborted");
                self.broadcast_abort(now_ms);
            }
        }
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    fn on_join(
        &mut self,
        identity: Identity,
        connection_id: ConnectionId,
        outbox: Outbox,
        now_ms: u64,
    ) {
        let user_id = identity.user_id.clone();
        self.registry.register(identity.clone(), connection_id, outbox);
        let join = self.slot.session.join(identity, now_ms);

        let role = match join.role {
            Role::Seat(side) => ServerNotification::player_role(side),
            Role::Spectator => ServerNotification::spectator_role(),
        };
        self.registry.send_to(&user_id, role);

        if let Some(ready) = &join.ready {
            self.registry.broadcast(&game_ready(ready));
        }
        self.registry
            .send_to(&user_id, ServerNotification::board_state(self.slot.session.fen()));

        if join.ready.is_some() {
            self.broadcast_clock(now_ms);
        } else if join.rejoined || self.slot.session.lifecycle() == Lifecycle::Active {
            let snapshot = self.slot.session.clock_snapshot(now_ms);
            self.registry.send_to(&user_id, clock_sync(&snapshot));
        }
    }

    fn on_move(&mut self, user_id: &UserId, payload: MovePayload, now_ms: u64) {
        match self.slot.session.submit_move(user_id, &payload, now_ms) {
            Ok(MoveOutcome::Applied {
                side,
                normalized,
                fen,
                follow_up,
            }) => {
                self.registry.broadcast(&move_made(side, &normalized));
                self.registry.broadcast(&ServerNotification::board_state(fen));
                match follow_up {
                    FollowUp::None => {}
                    FollowUp::Check(side) => {
                        self.registry.broadcast(&ServerNotification::check(side));
                    }
                    FollowUp::GameOver(end) => {
                        self.registry.broadcast(&game_over(&end));
                    }
                }
                self.broadcast_clock(now_ms);
            }
            Ok(MoveOutcome::TimedOut(end)) => {
                self.registry.broadcast(&game_over(&end));
                self.broadcast_clock(now_ms);
            }
            Err(err) => {
                tracing::debug!(%user_id, error = %err, "move rejected");
                let reply = match err {
                    SessionError::UnauthorizedMove(reason) => {
                        ServerNotification::unauthorized_move(reason)
                    }
                    SessionError::IllegalMove(reason) => {
                        ServerNotification::invalid_move(payload, reason)
                    }
                    SessionError::MatchNotActive(state) => {
                        ServerNotification::match_not_active(state.as_str())
                    }
                    SessionError::InvariantViolation(_) => {
                        self.broadcast_abort(now_ms);
                        return;
                    }
                    SessionError::NotSeated
                    | SessionError::MatchInProgress
                    | SessionError::PersistenceFailure(_) => return,
                };
                self.registry.send_to(user_id, reply);
            }
        }
    }

    fn on_new_game(&mut self, user_id: &UserId, now_ms: u64) {
        match self.slot.session.request_new_game(user_id, now_ms) {
            Ok(outcome) => {
                self.registry
                    .broadcast(&ServerNotification::board_state(outcome.fen));
                self.registry
                    .broadcast(&ServerNotification::new_game_started());
                if let Some(ready) = &outcome.ready {
                    self.registry.broadcast(&game_ready(ready));
                }
                self.broadcast_clock(now_ms);
            }
            Err(err) => {
                tracing::debug!(%user_id, error = %err, "new game request refused");
            }
        }
    }

    fn on_chat(&mut self, user_id: &UserId, text: &str, now_ms: u64) {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_CHAT_CHARS {
            tracing::debug!(%user_id, "chat message dropped");
            return;
        }
        let Some(identity) = self.registry.identity(user_id) else {
            return;
        };
        let message = ServerNotification::of(NotificationKind::ChatMessage(ChatMessage {
            user_id: identity.user_id.to_string(),
            username: identity.display_name.clone(),
            text: text.to_string(),
            timestamp_ms: now_ms,
        }));
        self.registry.broadcast(&message);
    }

    fn on_disconnect(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
        reason: &str,
        now_ms: u64,
    ) {
        let Some(leave) = self.registry.unregister(user_id, connection_id) else {
            return;
        };
        tracing::info!(%user_id, connection_id = leave.connection_id, reason, "connection closed");

        if let LeaveOutcome::Seat {
            side,
            abandoned,
            reset,
        } = self.slot.session.leave(&leave.identity.user_id, now_ms)
        {
            self.registry
                .broadcast(&ServerNotification::player_disconnected(side));
            if let Some(end) = abandoned {
                self.registry.broadcast(&game_over(&end));
            }
            if reset {
                self.registry
                    .broadcast(&ServerNotification::board_state(self.slot.session.fen()));
            }
        }
    }

    fn broadcast_clock(&self, now_ms: u64) {
        let snapshot = self.slot.session.clock_snapshot(now_ms);
        self.registry.broadcast(&clock_sync(&snapshot));
    }

    fn broadcast_abort(&self, now_ms: u64) {
        let aborted = ServerNotification::of(NotificationKind::GameOver(GameOver {
            result: "abandoned".to_string(),
            reason: "abandoned".to_string(),
            winner: String::new(),
            message: "Match aborted".to_string(),
        }));
        self.registry.broadcast(&aborted);
        self.registry
            .broadcast(&ServerNotification::board_state(self.slot.session.fen()));
        self.broadcast_clock(now_ms);
    }
}

// ============================================================================
// Notification Builders
// ============================================================================

fn side_letter(side: Option<Side>) -> String {
    side.map(|s| s.letter()).unwrap_or("").to_string()
}

fn move_made(side: Side, normalized: &NormalizedMove) -> ServerNotification {
    ServerNotification::of(NotificationKind::Move(MoveMade {
        from: normalized.from.to_string(),
        to: normalized.to.to_string(),
        promotion: normalized.promotion.map(|p| p.letter().to_string()),
        san: normalized.san.clone(),
        side: side.letter().to_string(),
    }))
}

fn game_over(end: &GameEnd) -> ServerNotification {
    ServerNotification::of(NotificationKind::GameOver(GameOver {
        result: end.result.as_str().to_string(),
        reason: end.reason.as_str().to_string(),
        winner: side_letter(end.winner),
        message: end.message.clone(),
    }))
}

fn game_ready(ready: &MatchReady) -> ServerNotification {
    ServerNotification::of(NotificationKind::GameReady(GameReady {
        white: ready.white.user_id.to_string(),
        black: ready.black.user_id.to_string(),
        white_username: ready.white.display_name.clone(),
        black_username: ready.black.display_name.clone(),
    }))
}

fn clock_sync(snapshot: &ClockSnapshot) -> ServerNotification {
    ServerNotification::of(NotificationKind::ClockSync(ClockSync {
        white_remaining_ms: snapshot.white_remaining_ms,
        black_remaining_ms: snapshot.black_remaining_ms,
        running: side_letter(snapshot.running),
    }))
}

#[cfg(test)]
mod tests {
    use kingside_record::MemoryStore;
    use kingside_wire::ChatSend;

    use super::*;
    use crate::clock::ManualTime;
    use crate::session::SessionConfig;

    struct Harness {
        coordinator: MatchCoordinator,
        time: Arc<ManualTime>,
        next_connection: ConnectionId,
    }

    impl Harness {
        fn new(initial_clock_ms: u64) -> Self {
            let config = SessionConfig {
                initial_clock_ms,
                increment_ms: 0,
            };
            let session = Session::new(config, Box::new(MemoryStore::new()));
            let time = Arc::new(ManualTime::new(0));
            Self {
                coordinator: MatchCoordinator::new(session, time.clone()),
                time,
                next_connection: 1,
            }
        }

        fn connect(
            &mut self,
            identity: &Identity,
        ) -> (ConnectionId, mpsc::Receiver<ServerNotification>) {
            let connection_id = self.next_connection;
            self.next_connection += 1;
            let (outbox, rx) = mpsc::channel(64);
            self.coordinator.handle(Inbound::Join {
                identity: identity.clone(),
                connection_id,
                outbox,
            });
            (connection_id, rx)
        }

        fn send(
            &mut self,
            identity: &Identity,
            connection_id: ConnectionId,
            event: ClientEventKind,
        ) {
            self.coordinator.handle(Inbound::Event {
                user_id: identity.user_id.clone(),
                connection_id,
                event,
            });
        }

        fn play(&mut self, identity: &Identity, connection_id: ConnectionId, text: &str) {
            let payload = MovePayload::new(&text[0..2], &text[2..4], text.get(4..5));
            self.send(identity, connection_id, ClientEventKind::Move(payload));
        }

        fn disconnect(&mut self, identity: &Identity, connection_id: ConnectionId) {
            self.coordinator.handle(Inbound::Disconnect {
                user_id: identity.user_id.clone(),
                connection_id,
                reason: "closed".to_string(),
            });
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerNotification>) -> Vec<ServerNotification> {
        let mut out = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            out.push(notification);
        }
        out
    }

    fn kinds(rx: &mut mpsc::Receiver<ServerNotification>) -> Vec<&'static str> {
        drain(rx).iter().map(ServerNotification::kind_name).collect()
    }

    fn alice() -> Identity {
        Identity::new("u-alice", "alice")
    }

    fn bob() -> Identity {
        Identity::new("u-bob", "bob")
    }

    fn carol() -> Identity {
        Identity::new("u-carol", "carol")
    }

    /// Alice (White), Bob (Black) and spectator Carol connected, queues drained.
    fn seated() -> (Harness, [(ConnectionId, mpsc::Receiver<ServerNotification>); 3]) {
        let mut h = Harness::new(600_000);
        let mut a = h.connect(&alice());
        let mut b = h.connect(&bob());
        let mut c = h.connect(&carol());
        drain(&mut a.1);
        drain(&mut b.1);
        drain(&mut c.1);
        (h, [a, b, c])
    }

    #[test]
    fn test_join_sequence() {
        let mut h = Harness::new(600_000);
        let (_, mut rx_a) = h.connect(&alice());
        let first = drain(&mut rx_a);
        assert_eq!(first[0], ServerNotification::player_role(Side::White));
        assert_eq!(first[1].kind_name(), "boardState");
        assert_eq!(first.len(), 2);

        let (_, mut rx_b) = h.connect(&bob());
        assert_eq!(
            kinds(&mut rx_b),
            ["playerRole", "gameReady", "boardState", "clockSync"]
        );
        let to_alice = drain(&mut rx_a);
        let Some(NotificationKind::GameReady(ready)) = &to_alice[0].kind else {
            panic!("expected gameReady, got {:?}", to_alice[0].kind_name());
        };
        assert_eq!(ready.white_username, "alice");
        assert_eq!(ready.black_username, "bob");
        assert_eq!(to_alice[1].kind_name(), "clockSync");
        assert_eq!(h.coordinator.session().lifecycle(), Lifecycle::Active);

        let (_, mut rx_c) = h.connect(&carol());
        assert_eq!(kinds(&mut rx_c), ["spectatorRole", "boardState", "clockSync"]);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_move_broadcast_order() {
        let (mut h, [(a, mut rx_a), (_, mut rx_b), (_, mut rx_c)]) = seated();
        h.play(&alice(), a, "e2e4");

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let got = drain(rx);
            let names: Vec<_> = got.iter().map(ServerNotification::kind_name).collect();
            assert_eq!(names, ["move", "boardState", "clockSync"]);
            let Some(NotificationKind::Move(made)) = &got[0].kind else {
                panic!("expected move");
            };
            assert_eq!(made.san, "e4");
            assert_eq!(made.side, "w");
        }
    }

    #[test]
    fn test_position_precedes_check() {
        let (mut h, [(a, mut rx_a), (b, _), _]) = seated();
        h.play(&alice(), a, "e2e4");
        h.play(&bob(), b, "f7f6");
        drain(&mut rx_a);

        h.play(&alice(), a, "d1h5");
        let got = drain(&mut rx_a);
        let names: Vec<_> = got.iter().map(ServerNotification::kind_name).collect();
        assert_eq!(names, ["move", "boardState", "check", "clockSync"]);
        assert_eq!(got[2], ServerNotification::check(Side::Black));
    }

    #[test]
    fn test_position_precedes_game_over() {
        let (mut h, [(a, _), (b, mut rx_b), _]) = seated();
        h.play(&alice(), a, "f2f3");
        h.play(&bob(), b, "e7e5");
        h.play(&alice(), a, "g2g4");
        drain(&mut rx_b);
        h.play(&bob(), b, "d8h4");

        let got = drain(&mut rx_b);
        let names: Vec<_> = got.iter().map(ServerNotification::kind_name).collect();
        assert_eq!(names, ["move", "boardState", "gameOver", "clockSync"]);
        let Some(NotificationKind::GameOver(over)) = &got[2].kind else {
            panic!("expected gameOver");
        };
        assert_eq!(over.message, "Checkmate! Black wins!");
        assert_eq!(over.result, "0-1");
        assert_eq!(over.winner, "b");
    }

    #[test]
    fn test_rejections_reach_submitter_only() {
        let (mut h, [(_, mut rx_a), (b, mut rx_b), (c, mut rx_c)]) = seated();

        h.play(&bob(), b, "e7e5");
        let got = drain(&mut rx_b);
        assert_eq!(
            got,
            [ServerNotification::unauthorized_move("Not your turn - White to move")]
        );

        h.play(&carol(), c, "e2e4");
        assert_eq!(kinds(&mut rx_c), ["unauthorizedMove"]);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(h.coordinator.session().side_to_move(), Side::White);
    }

    #[test]
    fn test_illegal_move_reports_attempt() {
        let (mut h, [(a, mut rx_a), (_, mut rx_b), _]) = seated();
        h.play(&alice(), a, "e2e5");
        let got = drain(&mut rx_a);
        let Some(NotificationKind::InvalidMove(invalid)) = &got[0].kind else {
            panic!("expected invalidMove");
        };
        assert_eq!(invalid.attempted, Some(MovePayload::new("e2", "e5", None)));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_move_while_waiting_reports_state() {
        let mut h = Harness::new(600_000);
        let (a, mut rx_a) = h.connect(&alice());
        drain(&mut rx_a);
        h.play(&alice(), a, "e2e4");
        assert_eq!(
            drain(&mut rx_a),
            [ServerNotification::match_not_active("waitingForPlayers")]
        );
    }

    #[test]
    fn test_seated_disconnect_abandons() {
        let (mut h, [(a, _), (_, mut rx_b), (_, mut rx_c)]) = seated();
        h.disconnect(&alice(), a);

        assert_eq!(h.coordinator.session().lifecycle(), Lifecycle::Abandoned);
        for rx in [&mut rx_b, &mut rx_c] {
            let got = drain(rx);
            assert_eq!(got[0], ServerNotification::player_disconnected(Side::White));
            let Some(NotificationKind::GameOver(over)) = &got[1].kind else {
                panic!("expected gameOver");
            };
            assert_eq!(over.reason, "abandoned");
            assert_eq!(over.winner, "");
        }
    }

    #[test]
    fn test_spectator_disconnect_is_quiet() {
        let (mut h, [(_, mut rx_a), _, (c, _)]) = seated();
        h.disconnect(&carol(), c);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(h.coordinator.session().lifecycle(), Lifecycle::Active);
        assert_eq!(h.coordinator.session().spectator_count(), 0);
    }

    #[test]
    fn test_reconnect_preserves_seat() {
        let (mut h, [(a, mut old_rx), (_, mut rx_b), _]) = seated();
        h.play(&alice(), a, "e2e4");
        drain(&mut old_rx);
        drain(&mut rx_b);

        h.time.set(3_000);
        let (a2, mut new_rx) = h.connect(&alice());
        assert_eq!(kinds(&mut old_rx), ["superseded"]);

        let got = drain(&mut new_rx);
        assert_eq!(got[0], ServerNotification::player_role(Side::White));
        assert_eq!(got[1].kind_name(), "boardState");
        let Some(NotificationKind::ClockSync(sync)) = &got[2].kind else {
            panic!("expected clockSync");
        };
        assert_eq!(sync.black_remaining_ms, 597_000);
        assert_eq!(sync.running, "b");
        // Nobody else hears about a reconnect
        assert!(drain(&mut rx_b).is_empty());

        // The old connection's late disconnect and events are ignored
        h.disconnect(&alice(), a);
        h.play(&alice(), a, "d2d4");
        assert_eq!(h.coordinator.session().lifecycle(), Lifecycle::Active);
        assert_eq!(h.coordinator.registry().len(), 3);
        assert!(drain(&mut rx_b).is_empty());
        assert!(h.coordinator.registry().is_current(&alice().user_id, a2));
    }

    #[test]
    fn test_chat_relay() {
        let (mut h, [(a, mut rx_a), (_, mut rx_b), _]) = seated();
        h.time.set(1_234);
        h.send(
            &alice(),
            a,
            ClientEventKind::Chat(ChatSend {
                text: "  good luck ".to_string(),
            }),
        );

        let got = drain(&mut rx_b);
        let Some(NotificationKind::ChatMessage(chat)) = &got[0].kind else {
            panic!("expected chatMessage");
        };
        assert_eq!(chat.username, "alice");
        assert_eq!(chat.user_id, "u-alice");
        assert_eq!(chat.text, "good luck");
        assert_eq!(chat.timestamp_ms, 1_234);
        assert_eq!(kinds(&mut rx_a), ["chatMessage"]);

        for text in [String::new(), "   ".to_string(), "x".repeat(MAX_CHAT_CHARS + 1)] {
            h.send(&alice(), a, ClientEventKind::Chat(ChatSend { text }));
        }
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_poll_clock_ends_match() {
        let mut h = Harness::new(1_000);
        let (_, mut rx_a) = h.connect(&alice());
        let (_, mut rx_b) = h.connect(&bob());
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.time.set(999);
        h.coordinator.poll_clock();
        assert!(drain(&mut rx_a).is_empty());

        h.time.set(1_000);
        h.coordinator.poll_clock();
        let got = drain(&mut rx_b);
        let Some(NotificationKind::GameOver(over)) = &got[0].kind else {
            panic!("expected gameOver");
        };
        assert_eq!(over.reason, "timeout");
        assert_eq!(over.winner, "b");
        assert_eq!(h.coordinator.session().lifecycle(), Lifecycle::Completed);
    }

    #[test]
    fn test_new_game_notifications() {
        let (mut h, [(a, mut rx_a), (b, mut rx_b), _]) = seated();
        h.play(&alice(), a, "f2f3");
        h.play(&bob(), b, "e7e5");
        h.play(&alice(), a, "g2g4");
        h.play(&bob(), b, "d8h4");
        assert_eq!(h.coordinator.session().lifecycle(), Lifecycle::Completed);
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.send(&alice(), a, ClientEventKind::RequestNewGame(Default::default()));
        assert_eq!(
            kinds(&mut rx_b),
            ["boardState", "newGameStarted", "gameReady", "clockSync"]
        );
        assert_eq!(h.coordinator.session().lifecycle(), Lifecycle::Active);
        drain(&mut rx_a);

        // A repeated request is a no-op
        h.send(&bob(), b, ClientEventKind::RequestNewGame(Default::default()));
        h.send(&alice(), a, ClientEventKind::RequestNewGame(Default::default()));
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_settles_clock() {
        let config = SessionConfig {
            initial_clock_ms: 500,
            increment_ms: 0,
        };
        let session = Session::new(config, Box::new(MemoryStore::new()));
        let time = Arc::new(ManualTime::new(0));
        let coordinator: MatchCoordinator = MatchCoordinator::new(session, time.clone());
        let (handle, rx) = CoordinatorHandle::channel(16);
        let task = tokio::spawn(coordinator.run(rx, Duration::from_millis(5)));

        let (outbox, mut rx_a) = mpsc::channel(64);
        handle
            .send(Inbound::Join {
                identity: alice(),
                connection_id: handle.next_connection_id(),
                outbox,
            })
            .await
            .unwrap();
        let (outbox, _rx_b) = mpsc::channel(64);
        handle
            .send(Inbound::Join {
                identity: bob(),
                connection_id: handle.next_connection_id(),
                outbox,
            })
            .await
            .unwrap();

        // Both joins must be handled before time moves, so White's clock starts at 0
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx_a.recv().await.expect("outbox open").kind_name() != "gameReady" {}
        })
        .await
        .expect("game ready within timeout");

        time.set(600);
        let over = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notification = rx_a.recv().await.expect("outbox open");
                if let Some(NotificationKind::GameOver(over)) = notification.kind {
                    return over;
                }
            }
        })
        .await
        .expect("game over within timeout");
        assert_eq!(over.reason, "timeout");

        drop(handle);
        task.await.unwrap();
    }
}
