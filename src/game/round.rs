//! Round Clock
//!
//! Round life-cycle state machine:
//!
//! ```text
//! Waiting ──start──▶ Active ──end──▶ Ended ──start──▶ Active (n + 1) ...
//! ```
//!
//! The clock only tracks state. Timers are armed by the scheduler from the
//! `TimerRequest`s the coordinator emits around each transition.

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::game::state::Faction;

/// Round phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// No round has started yet.
    Waiting,
    /// Captures are accepted.
    Active,
    /// Intermission before the next round.
    Ended,
}

/// Winner summary attached to an ended round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundWinner {
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Faction.
    pub faction: Faction,
    /// Round captures.
    pub score: u32,
}

/// The live round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    /// Round number, 0 before the first round.
    pub number: u32,
    /// Current phase.
    pub status: RoundStatus,
    /// Start time of the current or last round.
    pub started_at: Option<Millis>,
    /// Scheduled end of the current or last round.
    pub ends_at: Option<Millis>,
    /// Configured round length.
    pub duration_ms: u64,
    /// Winner of the last ended round.
    pub winner: Option<RoundWinner>,
}

/// Round transition errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    /// Transition not allowed from the current phase.
    #[error("cannot {action} round {number} while {from:?}")]
    InvalidTransition {
        /// Attempted action.
        action: &'static str,
        /// Current phase.
        from: RoundStatus,
        /// Current round number.
        number: u32,
    },
}

/// Round state machine.
#[derive(Debug, Clone)]
pub struct RoundClock {
    state: RoundState,
    intermission_ms: u64,
}

impl RoundClock {
    /// Create a clock in `Waiting` with round number 0.
    pub fn new(duration_ms: u64, intermission_ms: u64) -> Self {
        Self {
            state: RoundState {
                number: 0,
                status: RoundStatus::Waiting,
                started_at: None,
                ends_at: None,
                duration_ms,
                winner: None,
            },
            intermission_ms,
        }
    }

    /// Continue numbering after rounds recorded by a previous process.
    ///
    /// Only moves the counter forward, and only while `Waiting`.
    pub fn resume_after(&mut self, last_number: u32) {
        if self.state.status == RoundStatus::Waiting && last_number > self.state.number {
            self.state.number = last_number;
        }
    }

    /// Adopt a round that was still running when the previous process
    /// stopped.
    pub fn restore(&mut self, state: RoundState) {
        self.state = state;
    }

    /// Begin the next round.
    ///
    /// # Errors
    ///
    /// [`RoundError::InvalidTransition`] while a round is already active.
    pub fn start(&mut self, now: Millis) -> Result<&RoundState, RoundError> {
        if self.state.status == RoundStatus::Active {
            return Err(self.invalid("start"));
        }
        self.state.number += 1;
        self.state.status = RoundStatus::Active;
        self.state.started_at = Some(now);
        self.state.ends_at = Some(now.saturating_add(self.state.duration_ms));
        self.state.winner = None;
        Ok(&self.state)
    }

    /// End the active round.
    ///
    /// # Errors
    ///
    /// [`RoundError::InvalidTransition`] unless a round is active.
    pub fn end(&mut self, winner: Option<RoundWinner>) -> Result<&RoundState, RoundError> {
        if self.state.status != RoundStatus::Active {
            return Err(self.invalid("end"));
        }
        self.state.status = RoundStatus::Ended;
        self.state.winner = winner;
        Ok(&self.state)
    }

    fn invalid(&self, action: &'static str) -> RoundError {
        RoundError::InvalidTransition {
            action,
            from: self.state.status,
            number: self.state.number,
        }
    }

    /// Current state.
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// Current round number.
    pub fn number(&self) -> u32 {
        self.state.number
    }

    /// Whether captures are accepted.
    pub fn is_active(&self) -> bool {
        self.state.status == RoundStatus::Active
    }

    /// Time left in the active round.
    pub fn remaining_ms(&self, now: Millis) -> u64 {
        match (self.state.status, self.state.ends_at) {
            (RoundStatus::Active, Some(end)) => end.saturating_sub(now),
            _ => 0,
        }
    }

    /// When the next round should start if the current one ends at `now`.
    pub fn next_start_at(&self, now: Millis) -> Millis {
        now.saturating_add(self.intermission_ms)
    }

    /// Pause between rounds.
    pub fn intermission_ms(&self) -> u64 {
        self.intermission_ms
    }
}
