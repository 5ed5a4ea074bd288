//! kingside Rules Engine Adapter
//!
//! This crate wraps the external chess rules engine behind a small, stable
//! interface. It is the single source of truth for move legality, side to
//! move and game-over detection; nothing outside this crate inspects a
//! position's internals.
//!
//! # Architecture Constraints
//!
//! The adapter MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Hold any state beyond the current position (and the repetition
//!   history that is part of that position's identity)
//!
//! Illegal input is a normal `ApplyOutcome::Rejected`, never an error.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, File, Position as _, Rank, Role};

// ============================================================================
// Core Types
// ============================================================================

/// One of the two seats at the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The other side.
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
        }
    }

    /// Capitalized name for player-facing messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::White => "White",
            Self::Black => "Black",
        }
    }

    /// Single-letter form used on the wire (`w` / `b`).
    pub fn letter(&self) -> &'static str {
        match self {
            Self::White => "w",
            Self::Black => "b",
        }
    }

    fn from_color(color: Color) -> Self {
        match color {
            Color::White => Self::White,
            Color::Black => Self::Black,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A board square, `a1`..`h8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// Build a square from zero-based file and rank indices.
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then_some(Self { file, rank })
    }

    /// Parse algebraic square notation such as `e4`.
    ///
    /// Exactly two ASCII characters are accepted; case-insensitive file.
    pub fn parse(name: &str) -> Option<Self> {
        let [file, rank] = name.as_bytes() else {
            return None;
        };
        let file = file.to_ascii_lowercase();
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(rank) {
            return None;
        }
        Self::new(file - b'a', rank - b'1')
    }

    pub fn file(&self) -> u8 {
        self.file
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    fn to_engine(self) -> shakmaty::Square {
        shakmaty::Square::from_coords(
            File::new(u32::from(self.file)),
            Rank::new(u32::from(self.rank)),
        )
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(b'a' + self.file), char::from(b'1' + self.rank))
    }
}

/// Piece a pawn may promote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    /// Parse a promotion letter (`q`, `r`, `b`, `n`; case-insensitive).
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.to_ascii_lowercase().as_str() {
            "q" => Some(Self::Queen),
            "r" => Some(Self::Rook),
            "b" => Some(Self::Bishop),
            "n" => Some(Self::Knight),
            _ => None,
        }
    }

    pub fn letter(&self) -> &'static str {
        match self {
            Self::Queen => "q",
            Self::Rook => "r",
            Self::Bishop => "b",
            Self::Knight => "n",
        }
    }

    fn to_role(self) -> Role {
        match self {
            Self::Queen => Role::Queen,
            Self::Rook => Role::Rook,
            Self::Bishop => Role::Bishop,
            Self::Knight => Role::Knight,
        }
    }
}

/// A strictly-shaped move request.
///
/// Produced by payload validation at the server edge; never carries
/// ambiguous shapes into the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Promotion>,
}

impl MoveRequest {
    pub fn new(from: Square, to: Square, promotion: Option<Promotion>) -> Self {
        Self {
            from,
            to,
            promotion,
        }
    }

    /// UCI text of the request (`e2e4`, `a7a8q`).
    pub fn uci(&self) -> String {
        match self.promotion {
            Some(promotion) => format!("{}{}{}", self.from, self.to, promotion.letter()),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

/// A move as accepted by the rules engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Promotion>,
    /// Standard algebraic notation, computed against the pre-move position.
    pub san: String,
}

impl NormalizedMove {
    pub fn uci(&self) -> String {
        MoveRequest::new(self.from, self.to, self.promotion).uci()
    }
}

/// Result of offering a move to the rules engine.
#[derive(Debug, Clone)]
pub enum ApplyOutcome<E> {
    /// Move is legal. `next` is the resulting position; the current one is
    /// left untouched until the caller adopts `next`.
    Accepted { next: E, normalized: NormalizedMove },
    /// Move is not legal in the current position.
    Rejected,
}

/// Draw conditions other than stalemate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

/// Game-over status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    None,
    Checkmate { winner: Side },
    Stalemate,
    DrawOther(DrawKind),
}

// ============================================================================
// Adapter Contract
// ============================================================================

/// The stable interface the session uses to consult the rules engine.
///
/// `Default` yields the initial position of a fresh match.
pub trait RulesEngine: Clone + Default + Send + 'static {
    /// Side whose turn it is in the current position.
    fn side_to_move(&self) -> Side;

    /// Try a move against the current position without mutating it.
    fn try_apply(&self, request: &MoveRequest) -> ApplyOutcome<Self>;

    /// Game-over status of the current position.
    fn terminal_status(&self) -> TerminalStatus;

    /// Whether the side to move is in check.
    fn is_in_check(&self) -> bool;

    /// Serialized form of the current position, opaque to callers.
    fn position_snapshot(&self) -> String;
}

// ============================================================================
// shakmaty-backed Adapter
// ============================================================================

/// Halfmove clock value at which the fifty-move rule applies.
pub const FIFTY_MOVE_HALFMOVES: u32 = 100;

/// Number of occurrences of a position that ends the game in a draw.
pub const REPETITION_LIMIT: u8 = 3;

/// Failure to load a position from FEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenError {
    /// Text is not syntactically valid FEN.
    Malformed,
    /// FEN parses but describes an impossible position.
    IllegalPosition,
}

impl fmt::Display for FenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed FEN"),
            Self::IllegalPosition => write!(f, "FEN describes an illegal position"),
        }
    }
}

impl std::error::Error for FenError {}

/// Standard chess rules backed by `shakmaty`.
#[derive(Debug, Clone)]
pub struct ChessRules {
    chess: Chess,
    /// Occurrence count per position key (FEN without move counters).
    repetitions: HashMap<String, u8>,
}

impl Default for ChessRules {
    fn default() -> Self {
        Self::from_chess(Chess::default())
    }
}

impl ChessRules {
    /// Standard starting position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an arbitrary position. Repetition history starts empty.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fen: Fen = fen.parse().map_err(|_| FenError::Malformed)?;
        let chess: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|_| FenError::IllegalPosition)?;
        Ok(Self::from_chess(chess))
    }

    fn from_chess(chess: Chess) -> Self {
        let mut repetitions = HashMap::new();
        repetitions.insert(position_key(&chess), 1);
        Self { chess, repetitions }
    }

    fn repetition_count(&self) -> u8 {
        self.repetitions
            .get(&position_key(&self.chess))
            .copied()
            .unwrap_or(0)
    }
}

impl RulesEngine for ChessRules {
    fn side_to_move(&self) -> Side {
        Side::from_color(self.chess.turn())
    }

    fn try_apply(&self, request: &MoveRequest) -> ApplyOutcome<Self> {
        let uci = |promotion: Option<Promotion>| Uci::Normal {
            from: request.from.to_engine(),
            to: request.to.to_engine(),
            promotion: promotion.map(Promotion::to_role),
        };
        // A promotion letter on a move that does not promote is ignored
        let (legal, promotion) = match uci(request.promotion).to_move(&self.chess) {
            Ok(legal) => (legal, request.promotion),
            Err(_) if request.promotion.is_some() => match uci(None).to_move(&self.chess) {
                Ok(legal) => (legal, None),
                Err(_) => return ApplyOutcome::Rejected,
            },
            Err(_) => return ApplyOutcome::Rejected,
        };

        let mut next = self.clone();
        let san = SanPlus::from_move_and_play_unchecked(&mut next.chess, &legal).to_string();
        *next
            .repetitions
            .entry(position_key(&next.chess))
            .or_insert(0) += 1;

        ApplyOutcome::Accepted {
            next,
            normalized: NormalizedMove {
                from: request.from,
                to: request.to,
                promotion,
                san,
            },
        }
    }

    fn terminal_status(&self) -> TerminalStatus {
        if self.chess.is_checkmate() {
            TerminalStatus::Checkmate {
                winner: self.side_to_move().opponent(),
            }
        } else if self.chess.is_stalemate() {
            TerminalStatus::Stalemate
        } else if self.chess.is_insufficient_material() {
            TerminalStatus::DrawOther(DrawKind::InsufficientMaterial)
        } else if self.chess.halfmoves() >= FIFTY_MOVE_HALFMOVES {
            TerminalStatus::DrawOther(DrawKind::FiftyMoveRule)
        } else if self.repetition_count() >= REPETITION_LIMIT {
            TerminalStatus::DrawOther(DrawKind::ThreefoldRepetition)
        } else {
            TerminalStatus::None
        }
    }

    fn is_in_check(&self) -> bool {
        self.chess.is_check()
    }

    fn position_snapshot(&self) -> String {
        fen_of(&self.chess)
    }
}

fn fen_of(chess: &Chess) -> String {
    Fen::from_position(chess.clone(), EnPassantMode::Legal).to_string()
}

/// FEN with the halfmove and fullmove counters stripped.
fn position_key(chess: &Chess) -> String {
    let fen = fen_of(chess);
    match fen.rsplitn(3, ' ').nth(2) {
        Some(key) => key.to_string(),
        None => fen,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn mv(text: &str) -> MoveRequest {
        let from = Square::parse(&text[0..2]).unwrap();
        let to = Square::parse(&text[2..4]).unwrap();
        let promotion = text.get(4..5).and_then(Promotion::from_letter);
        MoveRequest::new(from, to, promotion)
    }

    fn play(rules: &ChessRules, text: &str) -> ChessRules {
        match rules.try_apply(&mv(text)) {
            ApplyOutcome::Accepted { next, .. } => next,
            ApplyOutcome::Rejected => panic!("move {text} rejected"),
        }
    }

    fn play_all(moves: &[&str]) -> ChessRules {
        moves
            .iter()
            .fold(ChessRules::new(), |rules, text| play(&rules, text))
    }

    #[test]
    fn test_square_parse() {
        assert_eq!(Square::parse("a1"), Square::new(0, 0));
        assert_eq!(Square::parse("H8"), Square::new(7, 7));
        assert_eq!(Square::parse("e4").unwrap().to_string(), "e4");
        assert!(Square::parse("i1").is_none());
        assert!(Square::parse("a9").is_none());
        assert!(Square::parse("a").is_none());
        assert!(Square::parse("a10").is_none());
        assert!(Square::parse("").is_none());
    }

    #[test]
    fn test_initial_position() {
        let rules = ChessRules::new();
        assert_eq!(rules.side_to_move(), Side::White);
        assert_eq!(rules.position_snapshot(), START_FEN);
        assert_eq!(rules.terminal_status(), TerminalStatus::None);
        assert!(!rules.is_in_check());
    }

    #[test]
    fn test_try_apply_does_not_mutate_current_position() {
        let rules = ChessRules::new();
        let ApplyOutcome::Accepted { next, normalized } = rules.try_apply(&mv("e2e4")) else {
            panic!("e2e4 must be legal");
        };

        assert_eq!(rules.position_snapshot(), START_FEN);
        assert_eq!(rules.side_to_move(), Side::White);
        assert_eq!(next.side_to_move(), Side::Black);
        assert_eq!(normalized.san, "e4");
        assert_eq!(normalized.uci(), "e2e4");
    }

    #[test]
    fn test_illegal_move_rejected() {
        let rules = ChessRules::new();
        assert!(matches!(rules.try_apply(&mv("e2e5")), ApplyOutcome::Rejected));
        // Black piece while White to move
        assert!(matches!(rules.try_apply(&mv("e7e5")), ApplyOutcome::Rejected));
        // Empty square
        assert!(matches!(rules.try_apply(&mv("e4e5")), ApplyOutcome::Rejected));
    }

    #[test]
    fn test_side_to_move_alternates() {
        let mut rules = ChessRules::new();
        let line = ["e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6"];
        let mut expected = Side::White;
        for text in line {
            assert_eq!(rules.side_to_move(), expected);
            rules = play(&rules, text);
            expected = expected.opponent();
        }
        assert_eq!(rules.side_to_move(), Side::White);
    }

    #[test]
    fn test_checkmate_detected() {
        let rules = play_all(&["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert_eq!(
            rules.terminal_status(),
            TerminalStatus::Checkmate {
                winner: Side::Black
            }
        );
        assert!(rules.is_in_check());
    }

    #[test]
    fn test_check_detected() {
        let rules = play_all(&["e2e4", "f7f6", "d1h5"]);
        assert!(rules.is_in_check());
        assert_eq!(rules.terminal_status(), TerminalStatus::None);
    }

    #[test]
    fn test_stalemate_detected() {
        let rules = ChessRules::from_fen("7k/8/6K1/8/8/8/5Q2/8 w - - 0 1").unwrap();
        let rules = play(&rules, "f2f7");
        assert_eq!(rules.terminal_status(), TerminalStatus::Stalemate);
        assert!(!rules.is_in_check());
    }

    #[test]
    fn test_promotion_requires_piece() {
        let rules = ChessRules::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        assert!(matches!(rules.try_apply(&mv("a7a8")), ApplyOutcome::Rejected));

        let ApplyOutcome::Accepted { normalized, .. } = rules.try_apply(&mv("a7a8n")) else {
            panic!("underpromotion must be legal");
        };
        assert_eq!(normalized.promotion, Some(Promotion::Knight));
        assert_eq!(normalized.uci(), "a7a8n");
    }

    #[test]
    fn test_promotion_letter_ignored_on_plain_move() {
        let rules = ChessRules::new();
        let ApplyOutcome::Accepted { next, normalized } = rules.try_apply(&mv("e2e4q")) else {
            panic!("e2e4 with a stray promotion letter must be legal");
        };
        assert_eq!(normalized.promotion, None);
        assert_eq!(normalized.uci(), "e2e4");
        assert_eq!(normalized.san, "e4");
        assert_eq!(next.side_to_move(), Side::Black);

        // Still rejected when the move itself is illegal
        assert!(matches!(rules.try_apply(&mv("e2e5q")), ApplyOutcome::Rejected));
    }

    #[test]
    fn test_san_carries_check_and_mate_suffix() {
        let rules = play_all(&["e2e4", "f7f6"]);
        let ApplyOutcome::Accepted { normalized, .. } = rules.try_apply(&mv("d1h5")) else {
            panic!("Qh5 must be legal");
        };
        assert_eq!(normalized.san, "Qh5+");

        let rules = play_all(&["f2f3", "e7e5", "g2g4"]);
        let ApplyOutcome::Accepted { normalized, .. } = rules.try_apply(&mv("d8h4")) else {
            panic!("Qh4 must be legal");
        };
        assert_eq!(normalized.san, "Qh4#");
    }

    #[test]
    fn test_castling_accepted_from_king_move() {
        let rules = play_all(&["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"]);
        let ApplyOutcome::Accepted { normalized, .. } = rules.try_apply(&mv("e1g1")) else {
            panic!("short castling must be legal");
        };
        assert_eq!(normalized.san, "O-O");
    }

    #[test]
    fn test_threefold_repetition_draw() {
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8"];
        let once: Vec<&str> = shuffle.iter().copied().collect();
        let rules = play_all(&once);
        assert_eq!(rules.terminal_status(), TerminalStatus::None);

        let twice: Vec<&str> = shuffle.iter().chain(shuffle.iter()).copied().collect();
        let rules = play_all(&twice);
        assert_eq!(
            rules.terminal_status(),
            TerminalStatus::DrawOther(DrawKind::ThreefoldRepetition)
        );
    }

    #[test]
    fn test_fifty_move_rule_draw() {
        let rules = ChessRules::from_fen("k7/8/8/8/8/8/8/K6R w - - 99 80").unwrap();
        let rules = play(&rules, "h1h3");
        assert_eq!(
            rules.terminal_status(),
            TerminalStatus::DrawOther(DrawKind::FiftyMoveRule)
        );
    }

    #[test]
    fn test_insufficient_material_draw() {
        let rules = ChessRules::from_fen("k7/8/8/8/8/8/8/K7 w - - 0 1").unwrap();
        assert_eq!(
            rules.terminal_status(),
            TerminalStatus::DrawOther(DrawKind::InsufficientMaterial)
        );
    }

    #[test]
    fn test_from_fen_errors() {
        assert_eq!(
            ChessRules::from_fen("not a fen").unwrap_err(),
            FenError::Malformed
        );
        // Two white kings, no black king
        assert_eq!(
            ChessRules::from_fen("K7/8/8/8/8/8/8/K7 w - - 0 1").unwrap_err(),
            FenError::IllegalPosition
        );
    }

    #[test]
    fn test_snapshot_round_trips_through_fen() {
        let rules = play_all(&["d2d4", "d7d5", "c2c4"]);
        let restored = ChessRules::from_fen(&rules.position_snapshot()).unwrap();
        assert_eq!(restored.position_snapshot(), rules.position_snapshot());
        assert_eq!(restored.side_to_move(), Side::Black);
    }
}
