//! kingside Match Records
//!
//! This crate is the persistence collaborator for live matches.
//!
//! # Architecture
//!
//! The record system consists of:
//! - `MatchStore`: create / append-move / complete operations keyed by a
//!   `MatchHandle`, with `MemoryStore` and `FileStore` implementations
//! - `verify_record`: re-plays a stored record through the rules engine and
//!   checks it reproduces every recorded position and the recorded outcome
//! - Record file I/O (`write_record`, `read_record`)
//!
//! Callers treat every store write as fire-and-forget: a failed write is
//! reported, never rolled back into the live match.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use kingside_rules::{
    ApplyOutcome, ChessRules, MoveRequest, NormalizedMove, Promotion, RulesEngine, Side, Square,
    TerminalStatus,
};
use kingside_wire::{Identity, MatchRecord, RecordedMove, RecordedPlayer, UserId};
use prost::Message;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Record schema version written by this crate.
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// File extension of record files inside a `FileStore` directory.
pub const RECORD_FILE_EXTENSION: &str = "match";

// ============================================================================
// Match Handle and Outcome
// ============================================================================

/// Opaque reference to one durable match record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchHandle(Uuid);

impl MatchHandle {
    /// Allocate a fresh handle.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }
}

impl fmt::Display for MatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Checkmate,
    Stalemate,
    Draw,
    Timeout,
    Abandoned,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkmate => "checkmate",
            Self::Stalemate => "stalemate",
            Self::Draw => "draw",
            Self::Timeout => "timeout",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Scored result of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    WhiteWins,
    BlackWins,
    Draw,
    Abandoned,
}

impl MatchResult {
    /// Result for a decisive game.
    pub fn decisive(winner: Side) -> Self {
        match winner {
            Side::White => Self::WhiteWins,
            Side::Black => Self::BlackWins,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhiteWins => "1-0",
            Self::BlackWins => "0-1",
            Self::Draw => "1/2-1/2",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Data written when a match ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub result: MatchResult,
    /// Winner's user id; `None` for draws and abandonment.
    pub winner: Option<UserId>,
    pub reason: EndReason,
    pub final_fen: String,
    pub completed_at_ms: u64,
}

/// Build the persisted form of an accepted move.
pub fn recorded_move(normalized: &NormalizedMove, fen: &str, timestamp_ms: u64) -> RecordedMove {
    RecordedMove {
        from: normalized.from.to_string(),
        to: normalized.to.to_string(),
        promotion: normalized.promotion.map(|p| p.letter().to_string()),
        san: normalized.san.clone(),
        fen: fen.to_string(),
        timestamp_ms,
    }
}

// ============================================================================
// Store
// ============================================================================

/// Persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("record could not be decoded: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("no record for match {0}")]
    UnknownMatch(MatchHandle),
    #[error("record for match {0} already exists")]
    AlreadyExists(MatchHandle),
    #[error("match {0} is already completed")]
    AlreadyCompleted(MatchHandle),
    #[error("record writer is no longer running")]
    WriterClosed,
}

/// Durable storage of match records.
pub trait MatchStore: Send {
    /// Create the record for a new match between `white` and `black`.
    fn create_match(
        &mut self,
        handle: MatchHandle,
        white: &Identity,
        black: &Identity,
        created_at_ms: u64,
    ) -> Result<(), StoreError>;

    /// Append an accepted move.
    fn append_move(&mut self, handle: MatchHandle, entry: RecordedMove) -> Result<(), StoreError>;

    /// Mark the match finished.
    fn complete(&mut self, handle: MatchHandle, completion: Completion) -> Result<(), StoreError>;
}

impl<S: MatchStore + ?Sized> MatchStore for Box<S> {
    fn create_match(
        &mut self,
        handle: MatchHandle,
        white: &Identity,
        black: &Identity,
        created_at_ms: u64,
    ) -> Result<(), StoreError> {
        (**self).create_match(handle, white, black, created_at_ms)
    }

    fn append_move(&mut self, handle: MatchHandle, entry: RecordedMove) -> Result<(), StoreError> {
        (**self).append_move(handle, entry)
    }

    fn complete(&mut self, handle: MatchHandle, completion: Completion) -> Result<(), StoreError> {
        (**self).complete(handle, completion)
    }
}

fn new_record(
    handle: MatchHandle,
    white: &Identity,
    black: &Identity,
    created_at_ms: u64,
) -> MatchRecord {
    MatchRecord {
        record_format_version: RECORD_FORMAT_VERSION,
        handle: handle.to_string(),
        white: Some(RecordedPlayer::from(white)),
        black: Some(RecordedPlayer::from(black)),
        moves: Vec::new(),
        status: "active".to_string(),
        result: String::new(),
        winner: None,
        end_reason: String::new(),
        current_fen: ChessRules::new().position_snapshot(),
        final_fen: None,
        created_at_ms,
        completed_at_ms: None,
        moves_digest: String::new(),
    }
}

fn apply_move(
    record: &mut MatchRecord,
    handle: MatchHandle,
    entry: RecordedMove,
) -> Result<(), StoreError> {
    if record.status != "active" {
        return Err(StoreError::AlreadyCompleted(handle));
    }
    record.current_fen = entry.fen.clone();
    record.moves.push(entry);
    Ok(())
}

fn apply_completion(
    record: &mut MatchRecord,
    handle: MatchHandle,
    completion: Completion,
) -> Result<(), StoreError> {
    if record.status != "active" {
        return Err(StoreError::AlreadyCompleted(handle));
    }
    record.status = match completion.reason {
        EndReason::Abandoned => "abandoned",
        _ => "completed",
    }
    .to_string();
    record.result = completion.result.as_str().to_string();
    record.winner = completion.winner.map(|w| w.as_str().to_string());
    record.end_reason = completion.reason.as_str().to_string();
    record.final_fen = Some(completion.final_fen);
    record.completed_at_ms = Some(completion.completed_at_ms);
    record.moves_digest = moves_digest(&record.moves);
    Ok(())
}

/// In-memory store, used when no record directory is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<MatchHandle, MatchRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn load(&self, handle: MatchHandle) -> Result<MatchRecord, StoreError> {
        self.records
            .get(&handle)
            .cloned()
            .ok_or(StoreError::UnknownMatch(handle))
    }
}

impl MatchStore for MemoryStore {
    fn create_match(
        &mut self,
        handle: MatchHandle,
        white: &Identity,
        black: &Identity,
        created_at_ms: u64,
    ) -> Result<(), StoreError> {
        if self.records.contains_key(&handle) {
            return Err(StoreError::AlreadyExists(handle));
        }
        let record = new_record(handle, white, black, created_at_ms);
        self.records.insert(handle, record);
        Ok(())
    }

    fn append_move(&mut self, handle: MatchHandle, entry: RecordedMove) -> Result<(), StoreError> {
        let record = self
            .records
            .get_mut(&handle)
            .ok_or(StoreError::UnknownMatch(handle))?;
        apply_move(record, handle, entry)
    }

    fn complete(&mut self, handle: MatchHandle, completion: Completion) -> Result<(), StoreError> {
        let record = self
            .records
            .get_mut(&handle)
            .ok_or(StoreError::UnknownMatch(handle))?;
        apply_completion(record, handle, completion)
    }
}

/// One record file per match inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a record directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the record file for `handle`.
    pub fn record_path(&self, handle: MatchHandle) -> PathBuf {
        self.dir.join(format!("{handle}.{RECORD_FILE_EXTENSION}"))
    }

    pub fn load(&self, handle: MatchHandle) -> Result<MatchRecord, StoreError> {
        let path = self.record_path(handle);
        if !path.exists() {
            return Err(StoreError::UnknownMatch(handle));
        }
        read_record(&path)
    }
}

impl MatchStore for FileStore {
    fn create_match(
        &mut self,
        handle: MatchHandle,
        white: &Identity,
        black: &Identity,
        created_at_ms: u64,
    ) -> Result<(), StoreError> {
        let path = self.record_path(handle);
        if path.exists() {
            return Err(StoreError::AlreadyExists(handle));
        }
        write_record(&new_record(handle, white, black, created_at_ms), &path)?;
        tracing::debug!(%handle, path = %path.display(), "match record created");
        Ok(())
    }

    fn append_move(&mut self, handle: MatchHandle, entry: RecordedMove) -> Result<(), StoreError> {
        let mut record = self.load(handle)?;
        apply_move(&mut record, handle, entry)?;
        replace_record(&record, &self.record_path(handle))
    }

    fn complete(&mut self, handle: MatchHandle, completion: Completion) -> Result<(), StoreError> {
        let mut record = self.load(handle)?;
        apply_completion(&mut record, handle, completion)?;
        replace_record(&record, &self.record_path(handle))?;
        tracing::debug!(%handle, status = %record.status, "match record completed");
        Ok(())
    }
}

// ============================================================================
// Record Verification
// ============================================================================

/// Record verification error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    #[error("unsupported record format version {0}")]
    UnsupportedVersion(u32),
    #[error("move {index} is malformed: {reason}")]
    InvalidFormat { index: usize, reason: String },
    #[error("move {index} ({uci}) is illegal in the replayed position")]
    IllegalMove { index: usize, uci: String },
    #[error("move {index} SAN mismatch: recorded {recorded}, replayed {replayed}")]
    SanMismatch {
        index: usize,
        recorded: String,
        replayed: String,
    },
    #[error("move {index} position mismatch: recorded {recorded}, replayed {replayed}")]
    PositionMismatch {
        index: usize,
        recorded: String,
        replayed: String,
    },
    #[error("final position mismatch: recorded {recorded}, replayed {replayed}")]
    FinalPositionMismatch { recorded: String, replayed: String },
    #[error("move digest mismatch: recorded {recorded}, computed {computed}")]
    DigestMismatch { recorded: String, computed: String },
    #[error("recorded outcome {recorded} does not match replayed position ({replayed})")]
    OutcomeMismatch { recorded: String, replayed: String },
}

/// Verify a record reproduces its recorded positions and outcome.
///
/// # Verification Steps
/// 1. Check the record format version
/// 2. For completed records, recompute the move digest
/// 3. Replay every move from the initial position, comparing SAN and FEN
/// 4. Compare the final position
/// 5. For rules-engine endings (checkmate, stalemate, draw), confirm the
///    replayed position agrees
pub fn verify_record(record: &MatchRecord) -> Result<(), VerifyError> {
    // Step 1: Version
    if record.record_format_version != RECORD_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion(record.record_format_version));
    }

    // Step 2: Digest
    if record.status != "active" {
        let computed = moves_digest(&record.moves);
        if computed != record.moves_digest {
            return Err(VerifyError::DigestMismatch {
                recorded: record.moves_digest.clone(),
                computed,
            });
        }
    }

    // Step 3: Replay
    let mut rules = ChessRules::new();
    for (index, entry) in record.moves.iter().enumerate() {
        let request = parse_recorded_move(index, entry)?;
        let (next, normalized) = match rules.try_apply(&request) {
            ApplyOutcome::Accepted { next, normalized } => (next, normalized),
            ApplyOutcome::Rejected => {
                return Err(VerifyError::IllegalMove {
                    index,
                    uci: request.uci(),
                });
            }
        };
        if normalized.san != entry.san {
            return Err(VerifyError::SanMismatch {
                index,
                recorded: entry.san.clone(),
                replayed: normalized.san,
            });
        }
        rules = next;
        let replayed = rules.position_snapshot();
        if replayed != entry.fen {
            return Err(VerifyError::PositionMismatch {
                index,
                recorded: entry.fen.clone(),
                replayed,
            });
        }
    }

    // Step 4: Final position
    let replayed = rules.position_snapshot();
    if let Some(final_fen) = &record.final_fen
        && *final_fen != replayed
    {
        return Err(VerifyError::FinalPositionMismatch {
            recorded: final_fen.clone(),
            replayed,
        });
    }

    // Step 5: Outcome
    let status = rules.terminal_status();
    let agrees = match record.end_reason.as_str() {
        "checkmate" => matches!(
            status,
            TerminalStatus::Checkmate { winner }
                if record.result == MatchResult::decisive(winner).as_str()
        ),
        "stalemate" => status == TerminalStatus::Stalemate,
        "draw" => matches!(status, TerminalStatus::DrawOther(_)),
        _ => true,
    };
    if !agrees {
        return Err(VerifyError::OutcomeMismatch {
            recorded: format!("{} {}", record.end_reason, record.result),
            replayed: format!("{status:?}"),
        });
    }

    Ok(())
}

fn parse_recorded_move(index: usize, entry: &RecordedMove) -> Result<MoveRequest, VerifyError> {
    let invalid = |reason: &str| VerifyError::InvalidFormat {
        index,
        reason: reason.to_string(),
    };
    let from = Square::parse(&entry.from).ok_or_else(|| invalid("bad from square"))?;
    let to = Square::parse(&entry.to).ok_or_else(|| invalid("bad to square"))?;
    let promotion = match &entry.promotion {
        Some(letter) => {
            Some(Promotion::from_letter(letter).ok_or_else(|| invalid("bad promotion piece"))?)
        }
        None => None,
    };
    Ok(MoveRequest::new(from, to, promotion))
}

// ============================================================================
// Move Digest
// ============================================================================

/// SHA-256 over the move list, hex encoded.
///
/// Each move contributes `from`, `to`, promotion letter (or empty), SAN and
/// FEN, newline separated. Timestamps are excluded.
pub fn moves_digest(moves: &[RecordedMove]) -> String {
    let mut hasher = Sha256::new();
    for entry in moves {
        hasher.update(entry.from.as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.to.as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.promotion.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.san.as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.fen.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Record I/O
// ============================================================================

/// Write a new record file. Refuses to overwrite an existing file.
pub fn write_record(record: &MatchRecord, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("match record already exists at {}", path.display()),
        )
        .into());
    }

    let encoded = record.encode_to_vec();
    let mut file = fs::File::create(path)?;
    file.write_all(&encoded)?;
    Ok(())
}

/// Replace an existing record file via a temp file and rename.
fn replace_record(record: &MatchRecord, path: &Path) -> Result<(), StoreError> {
    let tmp = path.with_extension(format!("{RECORD_FILE_EXTENSION}.tmp"));
    let encoded = record.encode_to_vec();
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a record file.
pub fn read_record(path: &Path) -> Result<MatchRecord, StoreError> {
    let data = fs::read(path)?;
    Ok(MatchRecord::decode(data.as_slice())?)
}

// ============================================================================
// Tests
// ============================================================================
