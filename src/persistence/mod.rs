//! Durable Storage
//!
//! Profiles, round history, cumulative stats and crash-recovery snapshots.
//! Nothing here sits on the capture hot path: writes go through the
//! persistence worker and failures only cost durability.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

pub mod store;
pub mod memory;
pub mod file;
pub mod worker;

pub use store::{
    DurableStore, PlayerStats, RecoverySnapshot, RoundRecord, RoundResultRow, StoreError,
    StoredProfile,
};
pub use memory::MemoryStore;
pub use file::FileStore;
pub use worker::{spawn_worker, PersistHandle, SharedStore};

/// Open the store for `data_dir`, or an in-memory one when there is none.
///
/// A data directory that cannot be opened falls back to memory with a
/// warning; the server runs without durability rather than not at all.
pub fn open_store(data_dir: Option<&Path>) -> SharedStore {
    match data_dir {
        Some(dir) => match FileStore::open(dir) {
            Ok(store) => {
                info!(dir = %dir.display(), "using file store");
                Arc::new(store)
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "file store unavailable, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_store_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be
        let blocked = dir.path().join("data");
        std::fs::write(&blocked, "occupied").unwrap();

        let store = open_store(Some(&blocked));
        assert_eq!(store.last_round_number().unwrap(), 0);
        assert!(store.load_recovery().unwrap().is_none());
        assert_eq!(std::fs::read_to_string(&blocked).unwrap(), "occupied");
    }

    #[test]
    fn test_open_store_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(Some(dir.path()));
        store
            .save_profile(&StoredProfile {
                username: "Neo".into(),
                color: "#00f0ff".into(),
                faction: crate::game::state::Faction::Cyan,
                rank: crate::game::rank::RankTier::Bronze,
                lifetime_captures: 1,
                last_seen: crate::core::time::to_datetime(0),
            })
            .unwrap();
        assert!(dir.path().join(file::RECORDS_FILE).exists());
    }
}
