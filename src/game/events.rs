//! Game Events
//!
//! Everything the coordinator wants to happen outside its own state is
//! returned as [`Effects`]: events for the gateway, timers for the
//! scheduler and writes for the durable store. The coordinator never
//! performs I/O itself.

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::game::energy::EnergyState;
use crate::game::grid::{Tile, TileCoord};
use crate::game::rank::{LeaderboardEntry, RankTier};
use crate::game::round::{RoundState, RoundStatus, RoundWinner};
use crate::game::state::{Faction, Participant, ParticipantId};
use crate::persistence::store::{RecoverySnapshot, RoundRecord, RoundResultRow, StoredProfile};

// =============================================================================
// VIEWS
// =============================================================================

/// Client view of one tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileView {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Owner, if claimed.
    pub owner: Option<ParticipantId>,
    /// Owner color, if claimed.
    pub color: Option<String>,
    /// Core-zone flag.
    pub is_core: bool,
    /// Last capture time.
    pub last_captured_at: Option<Millis>,
}

impl From<&Tile> for TileView {
    fn from(tile: &Tile) -> Self {
        Self {
            x: tile.x,
            y: tile.y,
            owner: tile.owner,
            color: tile.color.clone(),
            is_core: tile.is_core,
            last_captured_at: tile.last_captured_at,
        }
    }
}

/// Client view of an energy pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyView {
    /// Current energy.
    pub current: u32,
    /// Capacity.
    pub max: u32,
    /// Units per second.
    pub regen_per_sec: u32,
}

impl From<EnergyState> for EnergyView {
    fn from(state: EnergyState) -> Self {
        Self {
            current: state.current,
            max: state.max,
            regen_per_sec: state.regen_per_sec,
        }
    }
}

/// Client view of the round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundView {
    /// Round number.
    pub number: u32,
    /// Phase.
    pub status: RoundStatus,
    /// Start time.
    pub started_at: Option<Millis>,
    /// Scheduled end.
    pub ends_at: Option<Millis>,
    /// Configured length.
    pub duration_ms: u64,
    /// Time left when the view was taken.
    pub remaining_ms: u64,
    /// Winner of the last ended round.
    pub winner: Option<RoundWinner>,
}

impl RoundView {
    /// Build a view at `now`.
    pub fn new(state: &RoundState, now: Millis) -> Self {
        let remaining_ms = match (state.status, state.ends_at) {
            (RoundStatus::Active, Some(end)) => end.saturating_sub(now),
            _ => 0,
        };
        Self {
            number: state.number,
            status: state.status,
            started_at: state.started_at,
            ends_at: state.ends_at,
            duration_ms: state.duration_ms,
            remaining_ms,
            winner: state.winner.clone(),
        }
    }
}

/// Public view of a participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    /// Identity.
    pub id: ParticipantId,
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Faction.
    pub faction: Faction,
    /// Tier.
    pub rank: RankTier,
    /// Captures across rounds.
    pub lifetime_captures: u32,
    /// Captures this round.
    pub round_captures: u32,
    /// Consecutive captures.
    pub streak: u32,
}

impl From<&Participant> for ParticipantView {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            color: p.color.clone(),
            faction: p.faction,
            rank: p.rank,
            lifetime_captures: p.lifetime_captures,
            round_captures: p.round_captures,
            streak: p.streak,
        }
    }
}

/// Complete board sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullStateView {
    /// Grid width.
    pub width: u32,
    /// Grid height.
    pub height: u32,
    /// Every tile in row-major order.
    pub tiles: Vec<TileView>,
    /// Core-zone coordinates.
    pub core_zones: Vec<TileCoord>,
    /// Round.
    pub round: RoundView,
    /// Current leaderboard.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Connected participants.
    pub online: usize,
}

/// Tiles held by one faction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionTiles {
    /// Faction.
    pub faction: Faction,
    /// Owned tiles.
    pub tiles: u32,
}

/// Aggregate statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsView {
    /// Connected participants.
    pub online: usize,
    /// Owned tiles.
    pub claimed_tiles: usize,
    /// All tiles.
    pub total_tiles: usize,
    /// Owned tiles per faction.
    pub factions: Vec<FactionTiles>,
    /// Round.
    pub round: RoundView,
    /// Current leaderboard.
    pub leaderboard: Vec<LeaderboardEntry>,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Why a capture was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Sender is not a known participant.
    UnknownParticipant,
    /// Coordinates outside the grid.
    UnknownTile,
    /// No round is running.
    RoundInactive,
    /// Energy pool below the capture cost.
    InsufficientEnergy,
    /// Tile captured too recently.
    OnCooldown,
}

/// Kind of activity-feed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Core-zone tile captured.
    CoreCapture,
    /// Cluster bonus awarded.
    ClusterBonus,
    /// Rank promotion.
    RankUp,
    /// Round began.
    RoundStarted,
    /// Round finished.
    RoundEnded,
    /// Participant joined.
    Joined,
    /// Participant left.
    Left,
}

/// Activity-feed entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Entry kind.
    pub kind: ActivityKind,
    /// Human-readable text.
    pub message: String,
    /// When it happened.
    pub at: Millis,
}

/// A state change to be delivered to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// Identity assignment for a new connection.
    Welcome {
        /// The new participant.
        participant: ParticipantView,
        /// Starting energy.
        energy: EnergyView,
    },

    /// Full board sync.
    FullState(FullStateView),

    /// One tile changed owner.
    TileUpdated(TileView),

    /// Requester's energy after an attempt.
    EnergyUpdated(EnergyView),

    /// Round started or changed.
    RoundUpdated(RoundView),

    /// Round finished.
    RoundEnded {
        /// Final round state including winner.
        round: RoundView,
        /// Top participants.
        top: Vec<LeaderboardEntry>,
    },

    /// Cluster bonus awarded.
    ClusterBonus {
        /// Recipient.
        participant: ParticipantId,
        /// Display name.
        username: String,
        /// Cluster size.
        size: usize,
        /// Bonus points credited.
        bonus: u32,
    },

    /// Participant moved up a tier.
    RankUp {
        /// Participant.
        participant: ParticipantId,
        /// Display name.
        username: String,
        /// Old tier.
        previous: RankTier,
        /// New tier.
        rank: RankTier,
    },

    /// Someone connected.
    ParticipantConnected {
        /// The new participant.
        participant: ParticipantView,
        /// Live count.
        online: usize,
    },

    /// Someone disconnected.
    ParticipantDisconnected {
        /// Participant.
        participant: ParticipantId,
        /// Live count.
        online: usize,
    },

    /// Name, color or restored totals changed.
    ParticipantUpdated(ParticipantView),

    /// Leaderboard changed.
    LeaderboardUpdated {
        /// Top entries.
        entries: Vec<LeaderboardEntry>,
    },

    /// Activity-feed entry.
    Activity(ActivityEntry),

    /// Capture refused.
    CaptureRejected {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Reason.
        reason: RejectReason,
    },

    /// Too many requests.
    RateLimited {
        /// Configured window.
        window_ms: u64,
    },

    /// Aggregate statistics.
    Stats(StatsView),
}

// =============================================================================
// EFFECTS
// =============================================================================

/// Who receives an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Every subscriber.
    All,
    /// One participant.
    Only(ParticipantId),
}

/// An addressed event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    /// Delivery target.
    pub recipient: Recipient,
    /// Payload.
    pub event: GameEvent,
}

/// Timer the scheduler should arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerRequest {
    /// End `round` at `at`.
    EndRound {
        /// Round to end.
        round: u32,
        /// Deadline.
        at: Millis,
    },
    /// Start the round after `after_round` at `at`.
    StartRound {
        /// Round that just ended.
        after_round: u32,
        /// Start time.
        at: Millis,
    },
}

/// Durable write to hand to the persistence worker.
#[derive(Clone, Debug, PartialEq)]
pub enum PersistRequest {
    /// Upsert a profile.
    SaveProfile(StoredProfile),
    /// Record a completed round with its result rows.
    RecordRound {
        /// Round record.
        record: RoundRecord,
        /// Per-participant results.
        results: Vec<RoundResultRow>,
    },
    /// Replace the crash-recovery snapshot.
    SaveRecovery(Box<RecoverySnapshot>),
}

/// Output of one coordinator operation, in generation order.
#[derive(Clone, Debug, Default)]
pub struct Effects {
    /// Events to deliver.
    pub outbound: Vec<Outbound>,
    /// Timers to arm.
    pub timers: Vec<TimerRequest>,
    /// Writes to persist.
    pub persist: Vec<PersistRequest>,
}

impl Effects {
    /// No effects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for everyone.
    pub fn broadcast(&mut self, event: GameEvent) {
        self.outbound.push(Outbound { recipient: Recipient::All, event });
    }

    /// Queue an event for one participant.
    pub fn send_to(&mut self, id: ParticipantId, event: GameEvent) {
        self.outbound.push(Outbound { recipient: Recipient::Only(id), event });
    }

    /// Queue an activity-feed entry for everyone.
    pub fn activity(&mut self, kind: ActivityKind, message: String, at: Millis) {
        self.broadcast(GameEvent::Activity(ActivityEntry { kind, message, at }));
    }

    /// Events addressed to everyone.
    pub fn broadcasts(&self) -> impl Iterator<Item = &GameEvent> {
        self.outbound
            .iter()
            .filter(|o| o.recipient == Recipient::All)
            .map(|o| &o.event)
    }

    /// Events addressed to one participant only.
    pub fn sent_to(&self, id: ParticipantId) -> impl Iterator<Item = &GameEvent> + '_ {
        self.outbound
            .iter()
            .filter(move |o| o.recipient == Recipient::Only(id))
            .map(|o| &o.event)
    }
}
