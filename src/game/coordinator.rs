//! Capture Coordinator
//!
//! Root orchestrator that owns every game service and is the only write
//! path into shared state. Each operation runs to completion and returns
//! the [`Effects`] it produced; the engine task applies them.
//!
//! Capture policy chain, short-circuiting in order:
//!
//! ```text
//! identity/tile ─▶ round active ─▶ rate guard ─▶ energy ─▶ grid cooldown
//! ```
//!
//! Energy spent at step 4 is not refunded when the grid rejects at step 5.

use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::core::rng::DeterministicRng;
use crate::core::time::{to_datetime, Millis};
use crate::game::cluster::largest_cluster;
use crate::game::energy::{EnergyError, EnergyLedger, EnergyState};
use crate::game::events::{
    ActivityKind, Effects, FactionTiles, FullStateView, GameEvent, ParticipantView,
    PersistRequest, RejectReason, RoundView, StatsView, TileView, TimerRequest,
};
use crate::game::grid::{GridError, GridStore, TileCoord};
use crate::game::rank::{RankRegistry, RankTier};
use crate::game::rate::RateGuard;
use crate::game::round::{RoundClock, RoundError, RoundState, RoundStatus, RoundWinner};
use crate::game::state::{
    profile_key, sanitize_display_name, Faction, Participant, ParticipantId,
};
use crate::persistence::store::{
    RecoverySnapshot, RoundRecord, RoundResultRow, StoredProfile,
};

/// Entries in the broadcast leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;

/// Entries in the round-ended summary.
pub const ROUND_SUMMARY_SIZE: usize = 5;

// =============================================================================
// ERRORS
// =============================================================================

/// Why a capture did not happen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// Sender is not connected.
    #[error("unknown participant")]
    UnknownParticipant,

    /// Coordinates outside the grid.
    #[error("tile ({x}, {y}) does not exist")]
    UnknownTile {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// No round is running.
    #[error("round is not active")]
    RoundInactive,

    /// Too many requests in the rate window.
    #[error("rate limited")]
    RateLimited,

    /// Not enough energy.
    #[error("insufficient energy: have {current}, need {required}")]
    InsufficientEnergy {
        /// Energy after regeneration.
        current: u32,
        /// Capture cost.
        required: u32,
    },

    /// Tile captured too recently.
    #[error("tile on cooldown for another {remaining_ms} ms")]
    OnCooldown {
        /// Time left.
        remaining_ms: u64,
    },
}

impl CaptureError {
    /// Wire reason for a capture rejection.
    ///
    /// `None` for [`CaptureError::RateLimited`], which has its own message.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            CaptureError::UnknownParticipant => Some(RejectReason::UnknownParticipant),
            CaptureError::UnknownTile { .. } => Some(RejectReason::UnknownTile),
            CaptureError::RoundInactive => Some(RejectReason::RoundInactive),
            CaptureError::RateLimited => None,
            CaptureError::InsufficientEnergy { .. } => Some(RejectReason::InsufficientEnergy),
            CaptureError::OnCooldown { .. } => Some(RejectReason::OnCooldown),
        }
    }
}

/// Why a display name change was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Sender is not connected.
    #[error("unknown participant")]
    UnknownParticipant,

    /// Empty, too long or disallowed characters.
    #[error("invalid display name")]
    InvalidName,

    /// Another connected participant uses this name.
    #[error("display name already in use")]
    NameTaken,
}

// =============================================================================
// CAPTURE REPORT
// =============================================================================

/// Outcome of a successful capture.
#[derive(Clone, Debug)]
pub struct CaptureReport {
    /// Points for the tile itself.
    pub points: u32,
    /// Size of the capturer's largest cluster afterwards.
    pub cluster_size: usize,
    /// Cluster bonus credited, 0 if none.
    pub bonus: u32,
    /// New tier if the capture crossed a boundary.
    pub promoted: Option<RankTier>,
    /// Capturer's energy afterwards.
    pub energy: EnergyState,
    /// Events produced.
    pub effects: Effects,
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Owner of the grid, energy, rate, rank and round services.
#[derive(Debug)]
pub struct CaptureCoordinator {
    config: GameConfig,
    server_seed: u64,
    grid: GridStore,
    energy: EnergyLedger,
    rate: RateGuard,
    ranks: RankRegistry,
    round: RoundClock,
}

impl CaptureCoordinator {
    /// Build all services. The board is laid out from round 0's seed until
    /// the first round starts.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::CoreZonePlacement`] if the core zones cannot be
    /// placed on the configured grid.
    pub fn new(config: GameConfig, server_seed: u64) -> Result<Self, GridError> {
        let mut rng = DeterministicRng::for_round(server_seed, 0);
        let grid = GridStore::initialize(
            config.grid_width,
            config.grid_height,
            config.core_zone_count,
            config.capture_cooldown_ms,
            &mut rng,
        )?;

        Ok(Self {
            energy: EnergyLedger::new(config.energy_max, config.energy_regen_per_sec),
            rate: RateGuard::new(),
            ranks: RankRegistry::new(),
            round: RoundClock::new(config.round_duration_ms, config.round_intermission_ms),
            grid,
            server_seed,
            config,
        })
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Register a new connection.
    pub fn join(&mut self, id: ParticipantId, now: Millis) -> Effects {
        let faction = self.ranks.least_populated_faction();
        let participant = Participant::new(id, faction, now);
        let view = ParticipantView::from(&participant);
        let username = participant.username.clone();

        self.ranks.insert(participant);
        let energy = self.energy.register(id, now);

        let mut effects = Effects::new();
        effects.send_to(id, GameEvent::Welcome {
            participant: view.clone(),
            energy: energy.into(),
        });
        effects.send_to(id, GameEvent::FullState(self.full_state(now)));
        effects.broadcast(GameEvent::ParticipantConnected {
            participant: view,
            online: self.ranks.len(),
        });
        effects.activity(ActivityKind::Joined, format!("{username} joined the grid"), now);
        effects
    }

    /// Drop a connection and flush its profile.
    ///
    /// Tiles stay owned until recaptured or the round resets.
    pub fn leave(&mut self, id: &ParticipantId, now: Millis) -> Effects {
        let mut effects = Effects::new();
        let Some(participant) = self.ranks.remove(id) else {
            return effects;
        };
        self.energy.remove(id);
        self.rate.remove(id);

        effects
            .persist
            .push(PersistRequest::SaveProfile(StoredProfile::from_participant(&participant, now)));
        effects.broadcast(GameEvent::ParticipantDisconnected {
            participant: *id,
            online: self.ranks.len(),
        });
        effects.activity(
            ActivityKind::Left,
            format!("{} left the grid", participant.username),
            now,
        );
        effects.broadcast(self.leaderboard_event());
        effects
    }

    /// Rename a participant, adopting a stored profile for that name.
    ///
    /// # Errors
    ///
    /// See [`IdentityError`].
    pub fn set_display_name(
        &mut self,
        id: &ParticipantId,
        raw_name: &str,
        restored: Option<StoredProfile>,
        now: Millis,
    ) -> Result<Effects, IdentityError> {
        if !self.ranks.contains(id) {
            return Err(IdentityError::UnknownParticipant);
        }
        let name = sanitize_display_name(raw_name).ok_or(IdentityError::InvalidName)?;
        let key = profile_key(&name);
        let taken = self
            .ranks
            .iter()
            .any(|p| p.id != *id && profile_key(&p.username) == key);
        if taken {
            return Err(IdentityError::NameTaken);
        }

        let participant = self.ranks.get_mut(id).ok_or(IdentityError::UnknownParticipant)?;
        participant.username = name;
        participant.last_active_at = now;
        if let Some(profile) = restored.filter(|p| p.key() == key) {
            participant.color = profile.color;
            participant.faction = profile.faction;
            participant.lifetime_captures = participant
                .lifetime_captures
                .max(profile.lifetime_captures);
            participant.rank = RankTier::from_captures(participant.lifetime_captures);
            debug!(
                participant = %id,
                lifetime = participant.lifetime_captures,
                "profile restored"
            );
        }

        let view = ParticipantView::from(&*participant);
        let mut effects = Effects::new();
        effects.broadcast(GameEvent::ParticipantUpdated(view));
        effects.broadcast(self.leaderboard_event());
        Ok(effects)
    }

    // =========================================================================
    // CAPTURE
    // =========================================================================

    /// Run one capture through the policy chain.
    ///
    /// # Errors
    ///
    /// The first failing stage, as a [`CaptureError`]. A rejection at the
    /// cooldown stage has already spent the capture cost.
    pub fn try_capture(
        &mut self,
        id: &ParticipantId,
        coord: TileCoord,
        now: Millis,
    ) -> Result<CaptureReport, CaptureError> {
        // 1. Identity and tile
        let color = self
            .ranks
            .get(id)
            .map(|p| p.color.clone())
            .ok_or(CaptureError::UnknownParticipant)?;
        if !self.grid.contains(coord) {
            return Err(CaptureError::UnknownTile { x: coord.x, y: coord.y });
        }

        // 2. Round
        if !self.round.is_active() {
            return Err(CaptureError::RoundInactive);
        }

        // 3. Rate
        let allowed = self.rate.is_allowed(
            id,
            self.config.rate_limit_max_requests,
            self.config.rate_limit_window_ms,
            now,
        );
        if !allowed {
            return Err(CaptureError::RateLimited);
        }

        // 4. Energy
        let energy = self
            .energy
            .consume(id, self.config.capture_cost, now)
            .map_err(|e| match e {
                EnergyError::UnknownParticipant => CaptureError::UnknownParticipant,
                EnergyError::InsufficientEnergy { current, required } => {
                    CaptureError::InsufficientEnergy { current, required }
                }
            })?;

        // 5. Grid
        let points = self.grid.capture(coord, *id, &color, now).map_err(|e| match e {
            GridError::OnCooldown { remaining_ms } => CaptureError::OnCooldown { remaining_ms },
            _ => CaptureError::UnknownTile { x: coord.x, y: coord.y },
        })?;

        Ok(self.apply_capture(id, coord, points, energy, now))
    }

    fn apply_capture(
        &mut self,
        id: &ParticipantId,
        coord: TileCoord,
        points: u32,
        energy: EnergyState,
        now: Millis,
    ) -> CaptureReport {
        let mut effects = Effects::new();
        let credit = self.ranks.increment_capture_count(id, points, now);
        let previous = credit.map_or(RankTier::Bronze, |c| c.previous);
        let username = self
            .ranks
            .get(id)
            .map(|p| p.username.clone())
            .unwrap_or_default();

        if let Some(tile) = self.grid.tile(coord) {
            effects.broadcast(GameEvent::TileUpdated(TileView::from(tile)));
            if tile.is_core {
                effects.activity(
                    ActivityKind::CoreCapture,
                    format!("{username} seized a core zone at ({}, {})", coord.x, coord.y),
                    now,
                );
            }
        }
        effects.send_to(*id, GameEvent::EnergyUpdated(energy.into()));

        let cluster = largest_cluster(&self.grid, id);
        let bonus = cluster.bonus();
        if bonus > 0 {
            self.ranks.credit_bonus(id, bonus);
            effects.broadcast(GameEvent::ClusterBonus {
                participant: *id,
                username: username.clone(),
                size: cluster.size(),
                bonus,
            });
            effects.activity(
                ActivityKind::ClusterBonus,
                format!("{username} linked {} tiles for +{bonus}", cluster.size()),
                now,
            );
        }

        let current = self.ranks.get(id).map_or(previous, |p| p.rank);
        let promoted = (current != previous).then_some(current);
        // A core capture plus a large cluster bonus can cross several tiers
        for (from, rank) in RankTier::steps_between(previous, current) {
            effects.broadcast(GameEvent::RankUp {
                participant: *id,
                username: username.clone(),
                previous: from,
                rank,
            });
            effects.activity(
                ActivityKind::RankUp,
                format!("{username} reached {}", rank.as_str()),
                now,
            );
        }

        effects.broadcast(self.leaderboard_event());

        CaptureReport {
            points,
            cluster_size: cluster.size(),
            bonus,
            promoted,
            energy,
            effects,
        }
    }

    /// Run a capture and turn any rejection into a message for the
    /// requester.
    #[cfg_attr(feature = "debug-tracing", tracing::instrument(skip(self)))]
    pub fn handle_capture(&mut self, id: &ParticipantId, coord: TileCoord, now: Millis) -> Effects {
        match self.try_capture(id, coord, now) {
            Ok(report) => report.effects,
            Err(err) => {
                debug!(participant = %id, x = coord.x, y = coord.y, %err, "capture rejected");
                self.rejection_effects(id, coord, &err, now)
            }
        }
    }

    fn rejection_effects(
        &mut self,
        id: &ParticipantId,
        coord: TileCoord,
        err: &CaptureError,
        now: Millis,
    ) -> Effects {
        let mut effects = Effects::new();
        match err.reason() {
            None => effects.send_to(*id, GameEvent::RateLimited {
                window_ms: self.config.rate_limit_window_ms,
            }),
            Some(reason) => effects.send_to(*id, GameEvent::CaptureRejected {
                x: coord.x,
                y: coord.y,
                reason,
            }),
        }
        if matches!(
            err,
            CaptureError::OnCooldown { .. } | CaptureError::InsufficientEnergy { .. }
        ) {
            if let Some(energy) = self.energy.get(id, now) {
                effects.send_to(*id, GameEvent::EnergyUpdated(energy.into()));
            }
        }
        effects
    }

    // =========================================================================
    // ROUNDS
    // =========================================================================

    /// Start the next round: new board, full energy, zeroed round totals.
    ///
    /// # Errors
    ///
    /// [`RoundError::InvalidTransition`] while a round is active.
    pub fn start_round(&mut self, now: Millis) -> Result<Effects, RoundError> {
        let state = self.round.start(now)?.clone();

        let mut rng = DeterministicRng::for_round(self.server_seed, state.number);
        if let Err(e) = self.grid.reset(&mut rng) {
            warn!(round = state.number, error = %e, "core zone placement incomplete");
        }
        self.energy.reset_all(now);
        self.ranks.reset_round();

        info!(
            round = state.number,
            ends_at = state.ends_at.unwrap_or(now),
            cores = self.grid.core_zones().len(),
            "round started"
        );

        let mut effects = Effects::new();
        effects.broadcast(GameEvent::RoundUpdated(RoundView::new(&state, now)));
        effects.broadcast(GameEvent::FullState(self.full_state(now)));
        let ids: Vec<ParticipantId> = self.ranks.iter().map(|p| p.id).collect();
        for id in ids {
            if let Some(energy) = self.energy.get(&id, now) {
                effects.send_to(id, GameEvent::EnergyUpdated(energy.into()));
            }
        }
        effects.activity(
            ActivityKind::RoundStarted,
            format!("Round {} has begun", state.number),
            now,
        );
        effects.timers.push(TimerRequest::EndRound {
            round: state.number,
            at: state.ends_at.unwrap_or(now),
        });
        effects
            .persist
            .push(PersistRequest::SaveRecovery(Box::new(self.recovery_snapshot(now))));
        Ok(effects)
    }

    /// End the active round and declare the leaderboard head the winner.
    ///
    /// Nobody wins a round without captures.
    ///
    /// # Errors
    ///
    /// [`RoundError::InvalidTransition`] unless a round is active.
    pub fn end_round(&mut self, now: Millis) -> Result<Effects, RoundError> {
        if !self.round.is_active() {
            return Err(RoundError::InvalidTransition {
                action: "end",
                from: self.round.state().status,
                number: self.round.number(),
            });
        }

        let standings = self.ranks.leaderboard(self.ranks.len());
        let winner = standings
            .first()
            .filter(|e| e.round_captures > 0)
            .map(|e| RoundWinner {
                username: e.username.clone(),
                color: e.color.clone(),
                faction: e.faction,
                score: e.round_captures,
            });
        let state = self.round.end(winner)?.clone();

        info!(
            round = state.number,
            winner = state.winner.as_ref().map_or("none", |w| w.username.as_str()),
            "round ended"
        );

        let mut effects = Effects::new();
        effects.broadcast(GameEvent::RoundEnded {
            round: RoundView::new(&state, now),
            top: standings.iter().take(ROUND_SUMMARY_SIZE).cloned().collect(),
        });
        let message = match &state.winner {
            Some(w) => format!("Round {} won by {} with {}", state.number, w.username, w.score),
            None => format!("Round {} ended with no captures", state.number),
        };
        effects.activity(ActivityKind::RoundEnded, message, now);
        effects.timers.push(TimerRequest::StartRound {
            after_round: state.number,
            at: self.round.next_start_at(now),
        });

        let record = RoundRecord {
            number: state.number,
            started_at: to_datetime(state.started_at.unwrap_or(now)),
            ended_at: to_datetime(now),
            duration_ms: state.duration_ms,
            winner: state.winner.clone(),
            status: state.status,
        };
        let results = standings
            .iter()
            .enumerate()
            .map(|(idx, e)| RoundResultRow {
                round: state.number,
                username: e.username.clone(),
                captures: e.round_captures,
                rank: e.rank,
                placement: u32::try_from(idx + 1).unwrap_or(u32::MAX),
            })
            .collect();
        effects.persist.push(PersistRequest::RecordRound { record, results });
        for p in self.ranks.iter() {
            effects
                .persist
                .push(PersistRequest::SaveProfile(StoredProfile::from_participant(p, now)));
        }
        Ok(effects)
    }

    /// Round end timer fired. Ignored unless `round` is still active.
    pub fn on_round_deadline(&mut self, round: u32, now: Millis) -> Effects {
        if self.round.number() != round || !self.round.is_active() {
            debug!(round, current = self.round.number(), "stale round deadline");
            return Effects::new();
        }
        self.end_round(now).unwrap_or_default()
    }

    /// Intermission timer fired. Ignored unless `after_round` just ended.
    pub fn on_intermission_over(&mut self, after_round: u32, now: Millis) -> Effects {
        let state = self.round.state();
        if state.number != after_round || state.status != RoundStatus::Ended {
            debug!(after_round, current = state.number, "stale round start");
            return Effects::new();
        }
        self.start_round(now).unwrap_or_default()
    }

    /// Continue round numbering after a previous process.
    pub fn resume_numbering(&mut self, last_round: u32) {
        self.round.resume_after(last_round);
    }

    /// Resume a round that was still running in a recovery snapshot.
    ///
    /// Returns `None` (and changes nothing) if the snapshot's round is over
    /// or its grid does not fit.
    pub fn resume_from(&mut self, snapshot: RecoverySnapshot, now: Millis) -> Option<Effects> {
        let round = snapshot.round;
        let running = round.status == RoundStatus::Active
            && round.ends_at.is_some_and(|end| now < end)
            && round.number > self.round.number();
        if !running || self.round.is_active() {
            return None;
        }
        if let Err(e) = self.grid.load(snapshot.grid) {
            warn!(error = %e, "recovery snapshot rejected");
            return None;
        }

        info!(
            round = round.number,
            claimed = self.grid.claimed_count(),
            "resumed round from recovery snapshot"
        );
        let mut effects = Effects::new();
        effects.timers.push(TimerRequest::EndRound {
            round: round.number,
            at: round.ends_at.unwrap_or(now),
        });
        self.round.restore(round);
        Some(effects)
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// Purge idle rate-limit entries.
    pub fn cleanup_rate_limits(&mut self, now: Millis) -> usize {
        self.rate.cleanup(now)
    }

    /// Grid and round for crash recovery.
    pub fn recovery_snapshot(&self, now: Millis) -> RecoverySnapshot {
        RecoverySnapshot {
            grid: self.grid.snapshot(),
            round: self.round.state().clone(),
            taken_at: now,
        }
    }

    /// Profiles of everyone connected.
    pub fn profiles(&self, now: Millis) -> Vec<StoredProfile> {
        self.ranks
            .iter()
            .map(|p| StoredProfile::from_participant(p, now))
            .collect()
    }

    // =========================================================================
    // VIEWS
    // =========================================================================

    /// Complete board sync.
    pub fn full_state(&self, now: Millis) -> FullStateView {
        FullStateView {
            width: self.grid.width(),
            height: self.grid.height(),
            tiles: self.grid.tiles().iter().map(TileView::from).collect(),
            core_zones: self.grid.core_zones().to_vec(),
            round: RoundView::new(self.round.state(), now),
            leaderboard: self.ranks.leaderboard(LEADERBOARD_SIZE),
            online: self.ranks.len(),
        }
    }

    /// Aggregate statistics.
    pub fn stats(&self, now: Millis) -> StatsView {
        let mut counts = [0u32; 3];
        for tile in self.grid.tiles() {
            let faction = tile
                .owner
                .as_ref()
                .and_then(|owner| self.ranks.get(owner))
                .map(|p| p.faction);
            if let Some(slot) = faction.and_then(|f| Faction::ALL.iter().position(|x| *x == f)) {
                counts[slot] += 1;
            }
        }

        StatsView {
            online: self.ranks.len(),
            claimed_tiles: self.grid.claimed_count(),
            total_tiles: self.grid.tiles().len(),
            factions: Faction::ALL
                .iter()
                .zip(counts)
                .map(|(faction, tiles)| FactionTiles { faction: *faction, tiles })
                .collect(),
            round: RoundView::new(self.round.state(), now),
            leaderboard: self.ranks.leaderboard(LEADERBOARD_SIZE),
        }
    }

    fn leaderboard_event(&self) -> GameEvent {
        GameEvent::LeaderboardUpdated {
            entries: self.ranks.leaderboard(LEADERBOARD_SIZE),
        }
    }

    /// Participant view.
    pub fn participant(&self, id: &ParticipantId) -> Option<ParticipantView> {
        self.ranks.get(id).map(ParticipantView::from)
    }

    /// Energy after regeneration.
    pub fn energy_of(&mut self, id: &ParticipantId, now: Millis) -> Option<EnergyState> {
        self.energy.get(id, now)
    }

    /// The board.
    pub fn grid(&self) -> &GridStore {
        &self.grid
    }

    /// The roster.
    pub fn ranks(&self) -> &RankRegistry {
        &self.ranks
    }

    /// The live round.
    pub fn round_state(&self) -> &RoundState {
        self.round.state()
    }

    /// Active configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }
}

// =============================================================================
// TESTS
// =============================================================================
