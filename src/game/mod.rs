//! Game Logic Module
//!
//! Every piece of authoritative game state. Nothing here performs I/O or
//! reads the clock; time arrives as a `now` argument and side effects
//! leave as [`Effects`].
//!
//! ## Module Structure
//!
//! - `state`: Participant identity and records
//! - `grid`: Tile ownership, cooldowns and core zones
//! - `energy`: Regenerating per-participant energy
//! - `rate`: Sliding-window request limiter
//! - `cluster`: Connected-territory search and bonus rule
//! - `rank`: Capture counts, tiers and leaderboard
//! - `round`: Round life-cycle state machine
//! - `events`: Client events, timer and persistence requests
//! - `coordinator`: The single write path tying it all together

pub mod state;
pub mod grid;
pub mod energy;
pub mod rate;
pub mod cluster;
pub mod rank;
pub mod round;
pub mod events;
pub mod coordinator;

// Re-export key types
pub use state::{Faction, Participant, ParticipantId};
pub use grid::{GridError, GridSnapshot, GridStore, Tile, TileCoord};
pub use energy::{EnergyError, EnergyLedger, EnergyState};
pub use rate::RateGuard;
pub use cluster::{largest_cluster, Cluster};
pub use rank::{LeaderboardEntry, RankRegistry, RankTier};
pub use round::{RoundClock, RoundError, RoundState, RoundStatus, RoundWinner};
pub use events::{Effects, GameEvent, Outbound, PersistRequest, Recipient, RejectReason, TimerRequest};
pub use coordinator::{CaptureCoordinator, CaptureError, CaptureReport, IdentityError};
