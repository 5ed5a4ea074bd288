//! Server-authoritative chess clock.
//!
//! The clock never reads time itself. Every operation takes `now_ms` from a
//! `TimeSource`, so the same inputs always produce the same remaining times.
//! Elapsed time is whole milliseconds and remaining time is floored at zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use kingside_rules::Side;

// ============================================================================
// Time Sources
// ============================================================================

/// Millisecond time source injected into the coordinator.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic process time, anchored to the Unix epoch at construction.
///
/// Readings never go backwards even if the wall clock is adjusted.
#[derive(Debug, Clone)]
pub struct MonotonicTime {
    origin: Instant,
    origin_epoch_ms: u64,
}

impl MonotonicTime {
    pub fn new() -> Self {
        let origin_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            origin_epoch_ms,
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ms(&self) -> u64 {
        self.origin_epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Manually driven time, for tests.
#[derive(Debug, Default)]
pub struct ManualTime {
    now: AtomicU64,
}

impl ManualTime {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("{running} clock is already running")]
    AlreadyRunning { running: Side },
    #[error("both clocks reached zero")]
    BothFlagged,
}

/// Remaining time for both sides at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub white_remaining_ms: u64,
    pub black_remaining_ms: u64,
    /// Side whose time is currently decreasing, if any.
    pub running: Option<Side>,
}

impl ClockSnapshot {
    pub fn remaining(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_remaining_ms,
            Side::Black => self.black_remaining_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunningSide {
    side: Side,
    started_at_ms: u64,
}

/// Two-sided countdown clock. At most one side runs at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clock {
    white_remaining_ms: u64,
    black_remaining_ms: u64,
    running: Option<RunningSide>,
    last_tick_at_ms: Option<u64>,
}

impl Clock {
    /// Both sides start with `initial_ms`.
    pub fn new(initial_ms: u64) -> Self {
        Self {
            white_remaining_ms: initial_ms,
            black_remaining_ms: initial_ms,
            running: None,
            last_tick_at_ms: None,
        }
    }

    /// Explicit remaining times, used to resume a clock.
    pub fn with_remaining(white_remaining_ms: u64, black_remaining_ms: u64) -> Self {
        Self {
            white_remaining_ms,
            black_remaining_ms,
            running: None,
            last_tick_at_ms: None,
        }
    }

    /// Start `side`'s clock at `now_ms`.
    pub fn start(&mut self, side: Side, now_ms: u64) -> Result<(), ClockError> {
        if let Some(running) = self.running {
            return Err(ClockError::AlreadyRunning {
                running: running.side,
            });
        }
        self.running = Some(RunningSide {
            side,
            started_at_ms: now_ms,
        });
        Ok(())
    }

    /// Debit the running side with the time elapsed since it started and
    /// stop it.
    ///
    /// Returns the side whose remaining time is zero, if any.
    pub fn commit_elapsed(&mut self, now_ms: u64) -> Result<Option<Side>, ClockError> {
        if let Some(running) = self.running.take() {
            let elapsed = now_ms.saturating_sub(running.started_at_ms);
            let remaining = self.remaining_mut(running.side);
            *remaining = remaining.saturating_sub(elapsed);
            self.last_tick_at_ms = Some(now_ms);
        }
        self.flagged()
    }

    /// Remaining time for both sides as of `now_ms`, without mutating.
    pub fn snapshot(&self, now_ms: u64) -> ClockSnapshot {
        let mut white = self.white_remaining_ms;
        let mut black = self.black_remaining_ms;
        if let Some(running) = self.running {
            let elapsed = now_ms.saturating_sub(running.started_at_ms);
            match running.side {
                Side::White => white = white.saturating_sub(elapsed),
                Side::Black => black = black.saturating_sub(elapsed),
            }
        }
        ClockSnapshot {
            white_remaining_ms: white,
            black_remaining_ms: black,
            running: self.running_side(),
        }
    }

    /// Stop without debiting. Used when the match is voided.
    pub fn stop(&mut self) {
        self.running = None;
    }

    /// Credit `side` with an increment.
    pub fn add_increment(&mut self, side: Side, increment_ms: u64) {
        let remaining = self.remaining_mut(side);
        *remaining = remaining.saturating_add(increment_ms);
    }

    pub fn running_side(&self) -> Option<Side> {
        self.running.map(|r| r.side)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Time of the last commit.
    pub fn last_tick_at_ms(&self) -> Option<u64> {
        self.last_tick_at_ms
    }

    fn remaining_mut(&mut self, side: Side) -> &mut u64 {
        match side {
            Side::White => &mut self.white_remaining_ms,
            Side::Black => &mut self.black_remaining_ms,
        }
    }

    fn flagged(&self) -> Result<Option<Side>, ClockError> {
        match (self.white_remaining_ms, self.black_remaining_ms) {
            (0, 0) => Err(ClockError::BothFlagged),
            (0, _) => Ok(Some(Side::White)),
            (_, 0) => Ok(Some(Side::Black)),
            _ => Ok(None),
        }
    }
}
