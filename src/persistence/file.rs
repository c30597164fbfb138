//! File-backed store.
//!
//! Records live in one JSON document rewritten after every change; the
//! recovery snapshot is a separate bincode file. Both are written to a
//! synced temporary file in the same directory and renamed into place, so a
//! crash never leaves a torn document behind. A records document that does
//! not parse is moved aside and the store starts empty.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::persistence::store::{
    DurableStore, PlayerStats, RecoverySnapshot, RoundRecord, RoundResultRow, StoreData,
    StoreError, StoredProfile,
};

/// Records document name.
pub const RECORDS_FILE: &str = "records.json";

/// Recovery snapshot name.
pub const RECOVERY_FILE: &str = "recovery.bin";

/// Where an unreadable records document is moved on open.
pub const CORRUPT_RECORDS_FILE: &str = "records.corrupt.json";

/// Store persisted under a data directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// Open (creating if needed) a store in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or read. A records
    /// document that does not parse is renamed to [`CORRUPT_RECORDS_FILE`]
    /// and the store opens empty.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let records = dir.join(RECORDS_FILE);
        let data = if records.exists() {
            let text = fs::read_to_string(&records)?;
            match serde_json::from_str(&text) {
                Ok(data) => data,
                Err(e) => {
                    let aside = dir.join(CORRUPT_RECORDS_FILE);
                    fs::rename(&records, &aside)?;
                    warn!(
                        error = %e,
                        moved_to = %aside.display(),
                        "records document unreadable, starting empty"
                    );
                    StoreData::default()
                }
            }
        } else {
            StoreData::default()
        };
        info!(
            dir = %dir.display(),
            profiles = data.profiles.len(),
            rounds = data.rounds.len(),
            "file store opened"
        );

        Ok(Self {
            dir,
            data: Mutex::new(data),
        })
    }

    /// Directory holding the store files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data(&self) -> Result<MutexGuard<'_, StoreData>, StoreError> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }

    fn write_records(&self, data: &StoreData) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(data)?;
        write_atomic(&self.dir.join(RECORDS_FILE), text.as_bytes())
    }
}

/// Replace `path` with `bytes` through a synced temporary file in the same
/// directory.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl DurableStore for FileStore {
    fn load_profile(&self, username: &str) -> Result<Option<StoredProfile>, StoreError> {
        Ok(self.data()?.profile(username))
    }

    fn save_profile(&self, profile: &StoredProfile) -> Result<(), StoreError> {
        let mut data = self.data()?;
        data.save_profile(profile);
        self.write_records(&data)
    }

    fn record_round(
        &self,
        record: &RoundRecord,
        results: &[RoundResultRow],
    ) -> Result<(), StoreError> {
        let mut data = self.data()?;
        data.record_round(record, results);
        self.write_records(&data)
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
        let bytes = bincode::serialize(snapshot)?;
        write_atomic(&self.dir.join(RECOVERY_FILE), &bytes)
    }

    fn load_recovery(&self) -> Result<Option<RecoverySnapshot>, StoreError> {
        let path = self.dir.join(RECOVERY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::DeterministicRng;
    use crate::core::time::to_datetime;
    use crate::game::grid::{GridStore, TileCoord};
    use crate::game::rank::RankTier;
    use crate::game::round::{RoundState, RoundStatus, RoundWinner};
    use crate::game::state::{Faction, ParticipantId};

    fn profile(name: &str, captures: u32) -> StoredProfile {
        StoredProfile {
            username: name.into(),
            color: "#ff00e6".into(),
            faction: Faction::Magenta,
            rank: RankTier::from_captures(captures),
            lifetime_captures: captures,
            last_seen: to_datetime(5_000),
        }
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.save_profile(&profile("Neo", 30)).unwrap();
            store
                .record_round(
                    &RoundRecord {
                        number: 4,
                        started_at: to_datetime(0),
                        ended_at: to_datetime(300_000),
                        duration_ms: 300_000,
                        winner: Some(RoundWinner {
                            username: "Neo".into(),
                            color: "#ff00e6".into(),
                            faction: Faction::Magenta,
                            score: 9,
                        }),
                        status: RoundStatus::Ended,
                    },
                    &[RoundResultRow {
                        round: 4,
                        username: "Neo".into(),
                        captures: 9,
                        rank: RankTier::Silver,
                        placement: 1,
                    }],
                )
                .unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.load_profile("NEO").unwrap(), Some(profile("Neo", 30)));
        assert_eq!(store.last_round_number().unwrap(), 4);
        assert_eq!(store.player_stats("neo").unwrap().unwrap().wins, 1);
        assert_eq!(store.round_results(4).unwrap().len(), 1);
    }

    #[test]
    fn test_recovery_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.load_recovery().unwrap().is_none());

        let mut rng = DeterministicRng::new(3);
        let mut grid = GridStore::initialize(20, 20, 1, 1_000, &mut rng).unwrap();
        grid.capture(TileCoord::new(1, 1), ParticipantId::from_bytes([4; 16]), "#fff", 10)
            .unwrap();
        let snapshot = RecoverySnapshot {
            grid: grid.snapshot(),
            round: RoundState {
                number: 2,
                status: RoundStatus::Active,
                started_at: Some(0),
                ends_at: Some(300_000),
                duration_ms: 300_000,
                winner: None,
            },
            taken_at: 10,
        };
        store.save_recovery(&snapshot).unwrap();

        assert_eq!(store.load_recovery().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_corrupt_records_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RECORDS_FILE), "{not json").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.last_round_number().unwrap(), 0);
        assert!(store.load_profile("neo").unwrap().is_none());
        assert_eq!(
            fs::read_to_string(dir.path().join(CORRUPT_RECORDS_FILE)).unwrap(),
            "{not json"
        );
        assert!(!dir.path().join(RECORDS_FILE).exists());

        store.save_profile(&profile("Neo", 2)).unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_profile("neo").unwrap(), Some(profile("Neo", 2)));
    }

    #[test]
    fn test_atomic_write_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save_profile(&profile("Neo", 1)).unwrap();
        store.save_profile(&profile("Neo", 8)).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![RECORDS_FILE.to_string()]);

        let text = fs::read_to_string(dir.path().join(RECORDS_FILE)).unwrap();
        let data: StoreData = serde_json::from_str(&text).unwrap();
        assert_eq!(data.profile("neo").unwrap().lifetime_captures, 8);
    }
}
