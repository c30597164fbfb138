//! Durable Store
//!
//! Records kept across restarts and the [`DurableStore`] trait the server
//! writes them through. Stores are synchronous; the persistence worker
//! calls them off the async runtime.
//!
//! [`StoreData`] holds the record-keeping rules shared by every backend
//! (profile upsert, cumulative stats on round completion).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::time::{to_datetime, Millis};
use crate::game::grid::GridSnapshot;
use crate::game::rank::RankTier;
use crate::game::round::{RoundState, RoundStatus, RoundWinner};
use crate::game::state::{profile_key, Faction, Participant};

// =============================================================================
// ERRORS
// =============================================================================

/// Errors from durable storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary snapshot encoding error.
    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    /// A lock holder panicked.
    #[error("store lock poisoned")]
    Poisoned,

    /// The blocking task running a store call failed.
    #[error("store task failed: {0}")]
    Task(String),
}

// =============================================================================
// RECORDS
// =============================================================================

/// Persisted profile, keyed by normalized display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProfile {
    /// Display name as last chosen.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Faction.
    pub faction: Faction,
    /// Tier at last save.
    pub rank: RankTier,
    /// Captures across all rounds.
    pub lifetime_captures: u32,
    /// Last time the participant was seen.
    pub last_seen: DateTime<Utc>,
}

impl StoredProfile {
    /// Snapshot a live participant.
    pub fn from_participant(p: &Participant, now: Millis) -> Self {
        Self {
            username: p.username.clone(),
            color: p.color.clone(),
            faction: p.faction,
            rank: p.rank,
            lifetime_captures: p.lifetime_captures,
            last_seen: to_datetime(now),
        }
    }

    /// Storage key.
    pub fn key(&self) -> String {
        profile_key(&self.username)
    }
}

/// One completed round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number.
    pub number: u32,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub ended_at: DateTime<Utc>,
    /// Configured length.
    pub duration_ms: u64,
    /// Winner, if anyone scored.
    pub winner: Option<RoundWinner>,
    /// Final phase.
    pub status: RoundStatus,
}

/// One participant's result in a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResultRow {
    /// Round number.
    pub round: u32,
    /// Display name.
    pub username: String,
    /// Round captures.
    pub captures: u32,
    /// Tier at round end.
    pub rank: RankTier,
    /// 1-based leaderboard position.
    pub placement: u32,
}

/// Cumulative stats per profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    /// Display name.
    pub username: String,
    /// Rounds with a result row.
    pub rounds_played: u32,
    /// Rounds won.
    pub wins: u32,
    /// Best single-round captures.
    pub best_round_score: u32,
    /// Highest tier reached.
    pub highest_rank: RankTier,
}

/// Grid and round state for resuming after a crash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    /// Grid contents.
    pub grid: GridSnapshot,
    /// Round at snapshot time.
    pub round: RoundState,
    /// Snapshot time.
    pub taken_at: Millis,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Durable storage backend.
pub trait DurableStore: Send + Sync {
    /// Look up a profile by display name.
    fn load_profile(&self, username: &str) -> Result<Option<StoredProfile>, StoreError>;

    /// Insert or replace a profile.
    fn save_profile(&self, profile: &StoredProfile) -> Result<(), StoreError>;

    /// Record a completed round and fold its results into player stats.
    fn record_round(
        &self,
        record: &RoundRecord,
        results: &[RoundResultRow],
    ) -> Result<(), StoreError>;

    /// Most recent rounds, newest first.
    fn round_history(&self, limit: usize) -> Result<Vec<RoundRecord>, StoreError>;

    /// Result rows of one round in placement order.
    fn round_results(&self, round: u32) -> Result<Vec<RoundResultRow>, StoreError>;

    /// Cumulative stats by display name.
    fn player_stats(&self, username: &str) -> Result<Option<PlayerStats>, StoreError>;

    /// Highest recorded round number, 0 if none.
    fn last_round_number(&self) -> Result<u32, StoreError>;

    /// Replace the recovery snapshot.
    fn save_recovery(&self, snapshot: &RecoverySnapshot) -> Result<(), StoreError>;

    /// Latest recovery snapshot.
    fn load_recovery(&self) -> Result<Option<RecoverySnapshot>, StoreError>;
}

// =============================================================================
// SHARED RECORD KEEPING
// =============================================================================

/// Record collections behind every backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreData {
    /// Profiles by key.
    pub profiles: BTreeMap<String, StoredProfile>,
    /// Completed rounds in completion order.
    pub rounds: Vec<RoundRecord>,
    /// Result rows in insertion order.
    pub results: Vec<RoundResultRow>,
    /// Stats by profile key.
    pub stats: BTreeMap<String, PlayerStats>,
}

impl StoreData {
    /// Upsert a profile.
    pub fn save_profile(&mut self, profile: &StoredProfile) {
        self.profiles.insert(profile.key(), profile.clone());
    }

    /// Look up a profile.
    pub fn profile(&self, username: &str) -> Option<StoredProfile> {
        self.profiles.get(&profile_key(username)).cloned()
    }

    /// Append a round and update cumulative stats.
    pub fn record_round(&mut self, record: &RoundRecord, results: &[RoundResultRow]) {
        let winner_key = record.winner.as_ref().map(|w| profile_key(&w.username));

        for row in results {
            let key = profile_key(&row.username);
            let stats = self.stats.entry(key.clone()).or_insert_with(|| PlayerStats {
                username: row.username.clone(),
                rounds_played: 0,
                wins: 0,
                best_round_score: 0,
                highest_rank: RankTier::Bronze,
            });
            stats.username = row.username.clone();
            stats.rounds_played += 1;
            if row.placement == 1 && winner_key.as_deref() == Some(key.as_str()) {
                stats.wins += 1;
            }
            stats.best_round_score = stats.best_round_score.max(row.captures);
            stats.highest_rank = stats.highest_rank.max(row.rank);
        }

        self.rounds.push(record.clone());
        self.results.extend_from_slice(results);
    }

    /// Newest rounds first.
    pub fn round_history(&self, limit: usize) -> Vec<RoundRecord> {
        self.rounds.iter().rev().take(limit).cloned().collect()
    }

    /// Rows of one round by placement.
    pub fn round_results(&self, round: u32) -> Vec<RoundResultRow> {
        let mut rows: Vec<_> = self
            .results
            .iter()
            .filter(|r| r.round == round)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.placement);
        rows
    }

    /// Stats by display name.
    pub fn player_stats(&self, username: &str) -> Option<PlayerStats> {
        self.stats.get(&profile_key(username)).cloned()
    }

    /// Highest recorded round.
    pub fn last_round_number(&self) -> u32 {
        self.rounds.iter().map(|r| r.number).max().unwrap_or(0)
    }
}

/// Backend whose every operation fails, for exercising degraded paths.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingStore;

#[cfg(test)]
impl FailingStore {
    fn fail<T>() -> Result<T, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk unavailable")))
    }
}

#[cfg(test)]
impl DurableStore for FailingStore {
    fn load_profile(&self, _username: &str) -> Result<Option<StoredProfile>, StoreError> {
        Self::fail()
    }

    fn save_profile(&self, _profile: &StoredProfile) -> Result<(), StoreError> {
        Self::fail()
    }

    fn record_round(
        &self,
        _record: &RoundRecord,
        _results: &[RoundResultRow],
    ) -> Result<(), StoreError> {
        Self::fail()
    }

    fn round_history(&self, _limit: usize) -> Result<Vec<RoundRecord>, StoreError> {
        Self::fail()
    }

    fn round_results(&self, _round: u32) -> Result<Vec<RoundResultRow>, StoreError> {
        Self::fail()
    }

    fn player_stats(&self, _username: &str) -> Result<Option<PlayerStats>, StoreError> {
        Self::fail()
    }

    fn last_round_number(&self) -> Result<u32, StoreError> {
        Self::fail()
    }

    fn save_recovery(&self, _snapshot: &RecoverySnapshot) -> Result<(), StoreError> {
        Self::fail()
    }

    fn load_recovery(&self) -> Result<Option<RecoverySnapshot>, StoreError> {
        Self::fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: u32, winner: Option<&str>) -> RoundRecord {
        RoundRecord {
            number,
            started_at: to_datetime(0),
            ended_at: to_datetime(300_000),
            duration_ms: 300_000,
            winner: winner.map(|name| RoundWinner {
                username: name.to_string(),
                color: "#fff".into(),
                faction: Faction::Cyan,
                score: 10,
            }),
            status: RoundStatus::Ended,
        }
    }

    fn row(round: u32, name: &str, captures: u32, rank: RankTier, placement: u32) -> RoundResultRow {
        RoundResultRow {
            round,
            username: name.to_string(),
            captures,
            rank,
            placement,
        }
    }

    #[test]
    fn test_record_round_updates_stats() {
        let mut data = StoreData::default();
        data.record_round(
            &record(1, Some("Neo")),
            &[row(1, "Neo", 10, RankTier::Bronze, 1), row(1, "Trin", 4, RankTier::Silver, 2)],
        );
        data.record_round(
            &record(2, Some("Trin")),
            &[row(2, "Trin", 12, RankTier::Silver, 1), row(2, "neo", 3, RankTier::Bronze, 2)],
        );

        let neo = data.player_stats("NEO").unwrap();
        assert_eq!(neo.rounds_played, 2);
        assert_eq!(neo.wins, 1);
        assert_eq!(neo.best_round_score, 10);

        let trin = data.player_stats("trin").unwrap();
        assert_eq!(trin.wins, 1);
        assert_eq!(trin.highest_rank, RankTier::Silver);

        assert_eq!(data.last_round_number(), 2);
        let history = data.round_history(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].number, 2);
    }

    #[test]
    fn test_no_win_without_winner() {
        let mut data = StoreData::default();
        data.record_round(&record(1, None), &[row(1, "Neo", 0, RankTier::Bronze, 1)]);
        assert_eq!(data.player_stats("neo").unwrap().wins, 0);
    }

    #[test]
    fn test_round_results_by_placement() {
        let mut data = StoreData::default();
        data.record_round(
            &record(3, Some("A")),
            &[row(3, "B", 1, RankTier::Bronze, 2), row(3, "A", 5, RankTier::Bronze, 1)],
        );
        let rows = data.round_results(3);
        assert_eq!(rows[0].username, "A");
        assert!(data.round_results(4).is_empty());
    }

    #[test]
    fn test_profile_lookup_is_case_insensitive() {
        let mut data = StoreData::default();
        data.save_profile(&StoredProfile {
            username: "Neo".into(),
            color: "#fff".into(),
            faction: Faction::Lime,
            rank: RankTier::Gold,
            lifetime_captures: 60,
            last_seen: to_datetime(0),
        });
        assert_eq!(data.profile(" neo ").unwrap().lifetime_captures, 60);
        assert!(data.profile("trin").is_none());
    }
}
