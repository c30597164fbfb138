//! Persistence Worker
//!
//! Applies [`PersistRequest`]s to the durable store off the hot path.
//! The engine hands requests over with `try_send`; a full queue or a
//! failing store is logged and never blocks gameplay.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::game::events::PersistRequest;
use crate::persistence::store::{DurableStore, RecoverySnapshot, StoreError, StoredProfile};

/// Shared store handle.
pub type SharedStore = Arc<dyn DurableStore>;

/// Sending side of the persistence queue.
#[derive(Clone, Debug)]
pub struct PersistHandle {
    tx: mpsc::Sender<PersistRequest>,
}

impl PersistHandle {
    /// Queue a write. Drops it with a warning when the queue is full or the
    /// worker has stopped.
    pub fn submit(&self, request: PersistRequest) {
        if let Err(e) = self.tx.try_send(request) {
            let kind = match &e {
                mpsc::error::TrySendError::Full(r) => describe(r),
                mpsc::error::TrySendError::Closed(r) => describe(r),
            };
            warn!(request = kind, "persistence queue unavailable, write dropped");
        }
    }
}

/// Start the worker. It runs until every [`PersistHandle`] is dropped and
/// the queue has drained.
pub fn spawn_worker(store: SharedStore, capacity: usize) -> (PersistHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PersistRequest>(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let kind = describe(&request);
            let store = store.clone();
            match tokio::task::spawn_blocking(move || apply(store.as_ref(), request)).await {
                Ok(Ok(())) => debug!(request = kind, "persisted"),
                Ok(Err(e)) => warn!(request = kind, error = %e, "persistence failed"),
                Err(e) => warn!(request = kind, error = %e, "persistence task panicked"),
            }
        }
        debug!("persistence worker stopped");
    });
    (PersistHandle { tx }, handle)
}

/// Apply one request synchronously.
///
/// # Errors
///
/// Whatever the store returns.
pub fn apply(store: &dyn DurableStore, request: PersistRequest) -> Result<(), StoreError> {
    match request {
        PersistRequest::SaveProfile(profile) => store.save_profile(&profile),
        PersistRequest::RecordRound { record, results } => store.record_round(&record, &results),
        PersistRequest::SaveRecovery(snapshot) => store.save_recovery(&snapshot),
    }
}

/// Write every profile and the recovery snapshot, continuing past
/// failures. Returns the number of failed writes.
pub fn flush_all(
    store: &dyn DurableStore,
    profiles: &[StoredProfile],
    snapshot: &RecoverySnapshot,
) -> usize {
    let mut failed = 0;
    for profile in profiles {
        if let Err(e) = store.save_profile(profile) {
            warn!(username = %profile.username, error = %e, "profile flush failed");
            failed += 1;
        }
    }
    if let Err(e) = store.save_recovery(snapshot) {
        warn!(error = %e, "recovery snapshot flush failed");
        failed += 1;
    }
    failed
}

/// Run a store call on the blocking pool.
///
/// # Errors
///
/// The store's own error, or [`StoreError::Task`] if the blocking task
/// panicked.
pub async fn blocking<T, F>(store: &SharedStore, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DurableStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

fn describe(request: &PersistRequest) -> &'static str {
    match request {
        PersistRequest::SaveProfile(_) => "save_profile",
        PersistRequest::RecordRound { .. } => "record_round",
        PersistRequest::SaveRecovery(_) => "save_recovery",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::to_datetime;
    use crate::game::rank::RankTier;
    use crate::game::state::Faction;
    use crate::config::GameConfig;
    use crate::game::coordinator::CaptureCoordinator;
    use crate::persistence::memory::MemoryStore;
    use crate::persistence::store::FailingStore;

    fn profile(name: &str) -> StoredProfile {
        StoredProfile {
            username: name.into(),
            color: "#39ff14".into(),
            faction: Faction::Lime,
            rank: RankTier::Bronze,
            lifetime_captures: 3,
            last_seen: to_datetime(0),
        }
    }

    #[tokio::test]
    async fn test_worker_applies_requests_then_stops() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (handle, join) = spawn_worker(store.clone(), 8);

        handle.submit(PersistRequest::SaveProfile(profile("Neo")));
        drop(handle);
        join.await.unwrap();

        assert!(store.load_profile("neo").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blocking_helper() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        store.save_profile(&profile("Trin")).unwrap();

        let found = blocking(&store, |s| s.load_profile("trin")).await.unwrap();
        assert_eq!(found.map(|p| p.username), Some("Trin".to_string()));
    }

    #[tokio::test]
    async fn test_worker_survives_failing_store() {
        let store: SharedStore = Arc::new(FailingStore);
        let (handle, join) = spawn_worker(store, 8);

        handle.submit(PersistRequest::SaveProfile(profile("Neo")));
        handle.submit(PersistRequest::SaveProfile(profile("Trin")));
        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_all_counts_failures() {
        let coordinator = CaptureCoordinator::new(
            GameConfig {
                grid_width: 10,
                grid_height: 10,
                core_zone_count: 0,
                ..GameConfig::default()
            },
            3,
        )
        .unwrap();
        let snapshot = coordinator.recovery_snapshot(0);
        let profiles = vec![profile("Neo"), profile("Trin")];

        assert_eq!(flush_all(&FailingStore, &profiles, &snapshot), 3);
        let healthy = MemoryStore::new();
        assert_eq!(flush_all(&healthy, &profiles, &snapshot), 0);
        assert_eq!(healthy.load_recovery().unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_submit_after_worker_stopped_does_not_panic() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (handle, join) = spawn_worker(store, 1);
        join.abort();
        let _ = join.await;
        handle.submit(PersistRequest::SaveProfile(profile("Neo")));
    }
}
