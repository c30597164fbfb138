//! In-process store used when no data directory is configured, and in tests.

use std::sync::{Mutex, MutexGuard};

use crate::persistence::store::{
    DurableStore, PlayerStats, RecoverySnapshot, RoundRecord, RoundResultRow, StoreData,
    StoreError, StoredProfile,
};

/// Store that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    recovery: Mutex<Option<RecoverySnapshot>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> Result<MutexGuard<'_, StoreData>, StoreError> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl DurableStore for MemoryStore {
    fn load_profile(&self, username: &str) -> Result<Option<StoredProfile>, StoreError> {
        Ok(self.data()?.profile(username))
    }

    fn save_profile(&self, profile: &StoredProfile) -> Result<(), StoreError> {
        self.data()?.save_profile(profile);
        Ok(())
    }

    fn record_round(
        &self,
        record: &RoundRecord,
        results: &[RoundResultRow],
    ) -> Result<(), StoreError> {
        self.data()?.record_round(record, results);
        Ok(())
    }

    fn round_history(&self, limit: usize) -> Result<Vec<RoundRecord>, StoreError> {
        Ok(self.data()?.round_history(limit))
    }

    fn round_results(&self, round: u32) -> Result<Vec<RoundResultRow>, StoreError> {
        Ok(self.data()?.round_results(round))
    }

    fn player_stats(&self, username: &str) -> Result<Option<PlayerStats>, StoreError> {
        Ok(self.data()?.player_stats(username))
    }

    fn last_round_number(&self) -> Result<u32, StoreError> {
        Ok(self.data()?.last_round_number())
    }

    fn save_recovery(&self, snapshot: &RecoverySnapshot) -> Result<(), StoreError> {
        let mut slot = self.recovery.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load_recovery(&self) -> Result<Option<RecoverySnapshot>, StoreError> {
        let slot = self.recovery.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::to_datetime;
    use crate::game::rank::RankTier;
    use crate::game::state::Faction;

    #[test]
    fn test_profile_roundtrip() {
        let store = MemoryStore::new();
        let profile = StoredProfile {
            username: "Neo".into(),
            color: "#00f5ff".into(),
            faction: Faction::Cyan,
            rank: RankTier::Silver,
            lifetime_captures: 25,
            last_seen: to_datetime(1_000),
        };
        store.save_profile(&profile).unwrap();

        assert_eq!(store.load_profile("neo").unwrap(), Some(profile));
        assert_eq!(store.load_profile("trin").unwrap(), None);
    }

    #[test]
    fn test_empty_store() {
        let store = MemoryStore::new();
        assert_eq!(store.last_round_number().unwrap(), 0);
        assert!(store.round_history(10).unwrap().is_empty());
        assert!(store.load_recovery().unwrap().is_none());
    }
}
