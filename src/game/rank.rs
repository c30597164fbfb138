//! Rank Registry
//!
//! Owns the per-participant roster: capture counts, streaks and rank tier.
//! Tiers are a step function of lifetime captures.
//!
//! Leaderboard order is round captures descending, then lifetime captures
//! descending. Remaining ties fall back to participant id ascending; that
//! order is reproducible but carries no meaning.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::game::state::{Faction, Participant, ParticipantId};

// =============================================================================
// RANK TIERS
// =============================================================================

/// Named band derived from lifetime captures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankTier {
    /// 0-19 captures.
    Bronze,
    /// 20-49 captures.
    Silver,
    /// 50-99 captures.
    Gold,
    /// 100-199 captures.
    Diamond,
    /// 200+ captures.
    Neon,
}

impl RankTier {
    /// Every tier, lowest first.
    pub const ALL: [RankTier; 5] = [
        RankTier::Bronze,
        RankTier::Silver,
        RankTier::Gold,
        RankTier::Diamond,
        RankTier::Neon,
    ];

    /// Each single-step promotion from `previous` up to `current`, lowest
    /// first. Empty unless `current` is above `previous`.
    pub fn steps_between(
        previous: RankTier,
        current: RankTier,
    ) -> impl Iterator<Item = (RankTier, RankTier)> {
        let all: &'static [RankTier] = &Self::ALL;
        all.windows(2)
            .filter(move |pair| pair[0] >= previous && pair[1] <= current)
            .map(|pair| (pair[0], pair[1]))
    }

    /// Tier for a lifetime capture total.
    pub fn from_captures(lifetime: u32) -> Self {
        match lifetime {
            0..=19 => RankTier::Bronze,
            20..=49 => RankTier::Silver,
            50..=99 => RankTier::Gold,
            100..=199 => RankTier::Diamond,
            _ => RankTier::Neon,
        }
    }

    /// Display name.
    pub fn as_str(self) -> &'static str {
        match self {
            RankTier::Bronze => "Bronze",
            RankTier::Silver => "Silver",
            RankTier::Gold => "Gold",
            RankTier::Diamond => "Diamond",
            RankTier::Neon => "Neon",
        }
    }
}

/// Result of crediting points to a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureCredit {
    /// Tier before the credit.
    pub previous: RankTier,
    /// New tier, only if it changed.
    pub promoted: Option<RankTier>,
    /// Lifetime captures after the credit.
    pub lifetime_captures: u32,
    /// Round captures after the credit.
    pub round_captures: u32,
}

/// Read-only leaderboard projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Participant.
    pub id: ParticipantId,
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Faction.
    pub faction: Faction,
    /// Captures this round.
    pub round_captures: u32,
    /// Captures across all rounds.
    pub lifetime_captures: u32,
    /// Current tier.
    pub rank: RankTier,
}

impl From<&Participant> for LeaderboardEntry {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            color: p.color.clone(),
            faction: p.faction,
            round_captures: p.round_captures,
            lifetime_captures: p.lifetime_captures,
            rank: p.rank,
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Connected participants keyed by id.
#[derive(Debug, Default)]
pub struct RankRegistry {
    participants: BTreeMap<ParticipantId, Participant>,
}

impl RankRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a participant.
    pub fn insert(&mut self, participant: Participant) {
        self.participants.insert(participant.id, participant);
    }

    /// Remove a participant, returning its final record.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Get a participant.
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Get a participant mutably.
    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    /// Whether the participant is known.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    /// Number of connected participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Iterate participants in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Faction with the fewest connected members, ties by faction order.
    pub fn least_populated_faction(&self) -> Faction {
        let mut counts = [0usize; 3];
        for p in self.participants.values() {
            if let Some(slot) = Faction::ALL.iter().position(|f| *f == p.faction) {
                counts[slot] += 1;
            }
        }
        let mut best = 0;
        for slot in 1..counts.len() {
            if counts[slot] < counts[best] {
                best = slot;
            }
        }
        Faction::ALL[best]
    }

    /// Credit a successful capture: points to both totals, streak + 1.
    ///
    /// Returns `None` for an unknown participant.
    pub fn increment_capture_count(
        &mut self,
        id: &ParticipantId,
        points: u32,
        now: Millis,
    ) -> Option<CaptureCredit> {
        let p = self.participants.get_mut(id)?;
        p.streak = p.streak.saturating_add(1);
        p.last_active_at = now;
        Some(credit(p, points))
    }

    /// Credit bonus points without touching the streak.
    pub fn credit_bonus(&mut self, id: &ParticipantId, points: u32) -> Option<CaptureCredit> {
        let p = self.participants.get_mut(id)?;
        Some(credit(p, points))
    }

    /// Zero a participant's streak.
    ///
    /// Not called by the capture flow; exposed for a future streak-window
    /// policy.
    pub fn reset_streak(&mut self, id: &ParticipantId) {
        if let Some(p) = self.participants.get_mut(id) {
            p.streak = 0;
        }
    }

    /// Zero every participant's round total.
    pub fn reset_round(&mut self) {
        for p in self.participants.values_mut() {
            p.round_captures = 0;
        }
    }

    /// Top `limit` entries in leaderboard order.
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut ranked: Vec<&Participant> = self.participants.values().collect();
        // Stable sort over id-ordered input keeps id ascending as the last key
        ranked.sort_by(|a, b| {
            b.round_captures
                .cmp(&a.round_captures)
                .then(b.lifetime_captures.cmp(&a.lifetime_captures))
        });
        ranked.into_iter().take(limit).map(LeaderboardEntry::from).collect()
    }
}

fn credit(p: &mut Participant, points: u32) -> CaptureCredit {
    let previous = p.rank;
    p.lifetime_captures = p.lifetime_captures.saturating_add(points);
    p.round_captures = p.round_captures.saturating_add(points);
    p.rank = RankTier::from_captures(p.lifetime_captures);
    CaptureCredit {
        previous,
        promoted: (p.rank != previous).then_some(p.rank),
        lifetime_captures: p.lifetime_captures,
        round_captures: p.round_captures,
    }
}

// =============================================================================
// TESTS
// =============================================================================
