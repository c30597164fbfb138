//! Engine Task
//!
//! The single logical execution stream. The engine exclusively owns the
//! [`CaptureCoordinator`], the [`BroadcastGateway`] and the [`Scheduler`],
//! and consumes [`EngineCommand`]s from one channel. Each command runs to
//! completion before the next is read, so game state needs no locks.
//!
//! ```text
//!  connections ──┐
//!  timers ───────┼──▶ mpsc ──▶ Engine ──▶ gateway  (client queues)
//!  maintenance ──┘                   ├──▶ scheduler (round timers)
//!                                    └──▶ persistence worker
//! ```

use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::time::{now_ms, Millis};
use crate::game::coordinator::{CaptureCoordinator, IdentityError};
use crate::game::events::{Effects, GameEvent, PersistRequest};
use crate::game::grid::TileCoord;
use crate::game::state::{profile_key, ParticipantId};
use crate::network::gateway::BroadcastGateway;
use crate::network::protocol::{ErrorCode, ServerError, ServerMessage};
use crate::network::scheduler::Scheduler;
use crate::persistence::store::{RecoverySnapshot, StoredProfile};
use crate::persistence::worker::PersistHandle;

/// Work for the engine.
#[derive(Debug)]
pub enum EngineCommand {
    /// A client connected.
    Join {
        /// Identity assigned to the connection.
        id: ParticipantId,
        /// The client's outbound queue.
        sender: mpsc::Sender<ServerMessage>,
    },

    /// A client disconnected.
    Leave {
        /// Participant.
        id: ParticipantId,
    },

    /// Capture intent.
    Capture {
        /// Participant.
        id: ParticipantId,
        /// Target tile.
        coord: TileCoord,
    },

    /// Resend the full board to one client.
    RequestFullState {
        /// Participant.
        id: ParticipantId,
    },

    /// Send aggregate stats to one client.
    RequestStats {
        /// Participant.
        id: ParticipantId,
    },

    /// Rename, with the stored profile for the new name if any.
    SetDisplayName {
        /// Participant.
        id: ParticipantId,
        /// Requested name.
        name: String,
        /// Profile loaded from the store.
        restored: Option<StoredProfile>,
    },

    /// Whether someone with this display name is connected.
    IsOnline {
        /// Display name.
        username: String,
        /// Answer.
        reply: oneshot::Sender<bool>,
    },

    /// Round end timer fired.
    RoundDeadline {
        /// Round the timer was armed for.
        round: u32,
    },

    /// Intermission timer fired.
    StartNextRound {
        /// Round that ended.
        after_round: u32,
    },

    /// Purge idle rate-limit entries.
    CleanupRateLimits,

    /// Broadcast aggregate stats to everyone.
    BroadcastStats,

    /// Write a recovery snapshot.
    SnapshotRecovery,

    /// Stop the engine and hand back what must be flushed.
    Shutdown {
        /// Receives the final state.
        reply: oneshot::Sender<FinalState>,
    },
}

/// State to flush on shutdown.
#[derive(Debug)]
pub struct FinalState {
    /// Everyone still connected.
    pub profiles: Vec<StoredProfile>,
    /// Grid and round.
    pub snapshot: RecoverySnapshot,
}

/// Owner of all game state.
pub struct Engine {
    coordinator: CaptureCoordinator,
    gateway: BroadcastGateway,
    scheduler: Scheduler,
    persist: PersistHandle,
    clock: fn() -> Millis,
}

impl Engine {
    /// Create an engine reading the wall clock.
    pub fn new(coordinator: CaptureCoordinator, scheduler: Scheduler, persist: PersistHandle) -> Self {
        Self {
            coordinator,
            gateway: BroadcastGateway::new(),
            scheduler,
            persist,
            clock: now_ms,
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: fn() -> Millis) -> Self {
        self.clock = clock;
        self
    }

    /// Resume from durable state or start a fresh round.
    ///
    /// A recovery snapshot whose round is still running is resumed.
    /// Otherwise the next round is numbered after the highest round either
    /// source knows about.
    pub fn boot(&mut self, last_round: u32, snapshot: Option<RecoverySnapshot>) {
        let now = (self.clock)();
        let snapshot_round = snapshot.as_ref().map_or(0, |s| s.round.number);

        if let Some(snapshot) = snapshot {
            if let Some(effects) = self.coordinator.resume_from(snapshot, now) {
                self.apply(effects, now);
                return;
            }
        }

        self.coordinator.resume_numbering(last_round.max(snapshot_round));
        match self.coordinator.start_round(now) {
            Ok(effects) => self.apply(effects, now),
            Err(e) => warn!(error = %e, "could not start first round"),
        }
    }

    /// Deliver events, arm timers and queue writes.
    pub fn apply(&mut self, effects: Effects, now: Millis) {
        let Effects { outbound, timers, persist } = effects;
        self.gateway.deliver(outbound);
        for timer in timers {
            self.scheduler.arm(timer, now);
        }
        for request in persist {
            self.persist.submit(request);
        }
    }

    /// Run one command.
    pub fn handle(&mut self, command: EngineCommand) -> ControlFlow<()> {
        let now = (self.clock)();
        match command {
            EngineCommand::Join { id, sender } => {
                self.gateway.subscribe(id, sender);
                let effects = self.coordinator.join(id, now);
                debug!(participant = %id, online = self.gateway.len(), "participant joined");
                self.apply(effects, now);
            }
            EngineCommand::Leave { id } => {
                let effects = self.coordinator.leave(&id, now);
                self.gateway.unsubscribe(&id);
                debug!(participant = %id, online = self.gateway.len(), "participant left");
                self.apply(effects, now);
            }
            EngineCommand::Capture { id, coord } => {
                let effects = self.coordinator.handle_capture(&id, coord, now);
                self.apply(effects, now);
            }
            EngineCommand::RequestFullState { id } => {
                let view = self.coordinator.full_state(now);
                self.gateway.send(&id, GameEvent::FullState(view).into());
            }
            EngineCommand::RequestStats { id } => {
                let stats = self.coordinator.stats(now);
                self.gateway.send(&id, GameEvent::Stats(stats).into());
            }
            EngineCommand::SetDisplayName { id, name, restored } => {
                match self.coordinator.set_display_name(&id, &name, restored, now) {
                    Ok(effects) => self.apply(effects, now),
                    Err(e) => {
                        let code = match &e {
                            IdentityError::NameTaken => ErrorCode::NameTaken,
                            IdentityError::InvalidName => ErrorCode::InvalidName,
                            IdentityError::UnknownParticipant => ErrorCode::InvalidInput,
                        };
                        self.gateway
                            .send(&id, ServerMessage::Error(ServerError::new(code, e.to_string())));
                    }
                }
            }
            EngineCommand::IsOnline { username, reply } => {
                let key = profile_key(&username);
                let online = self
                    .coordinator
                    .ranks()
                    .iter()
                    .any(|p| profile_key(&p.username) == key);
                let _ = reply.send(online);
            }
            EngineCommand::RoundDeadline { round } => {
                let effects = self.coordinator.on_round_deadline(round, now);
                self.apply(effects, now);
            }
            EngineCommand::StartNextRound { after_round } => {
                let effects = self.coordinator.on_intermission_over(after_round, now);
                self.apply(effects, now);
            }
            EngineCommand::CleanupRateLimits => {
                let purged = self.coordinator.cleanup_rate_limits(now);
                if purged > 0 {
                    debug!(purged, "rate limiter cleaned up");
                }
            }
            EngineCommand::BroadcastStats => {
                if !self.gateway.is_empty() {
                    let stats = self.coordinator.stats(now);
                    self.gateway.broadcast(GameEvent::Stats(stats).into());
                }
            }
            EngineCommand::SnapshotRecovery => {
                let snapshot = self.coordinator.recovery_snapshot(now);
                self.persist.submit(PersistRequest::SaveRecovery(Box::new(snapshot)));
            }
            EngineCommand::Shutdown { reply } => {
                self.scheduler.shutdown();
                self.gateway.broadcast(ServerMessage::Shutdown {
                    reason: "Server shutting down".to_string(),
                });
                let _ = reply.send(FinalState {
                    profiles: self.coordinator.profiles(now),
                    snapshot: self.coordinator.recovery_snapshot(now),
                });
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Process commands until shutdown or until every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        info!(round = self.coordinator.round_state().number, "engine running");
        while let Some(command) = commands.recv().await {
            if self.handle(command).is_break() {
                break;
            }
        }
        self.scheduler.shutdown();
        info!(dropped = self.gateway.dropped(), "engine stopped");
    }

    /// The coordinator.
    pub fn coordinator(&self) -> &CaptureCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::GameConfig;
    use crate::game::round::RoundStatus;
    use crate::persistence::memory::MemoryStore;
    use crate::persistence::worker::{spawn_worker, SharedStore};

    fn fixed_clock() -> Millis {
        1_000
    }

    fn config() -> GameConfig {
        GameConfig {
            grid_width: 20,
            grid_height: 20,
            core_zone_count: 1,
            ..GameConfig::default()
        }
    }

    fn engine(store: SharedStore) -> (Engine, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(64);
        let coordinator = CaptureCoordinator::new(config(), 11).unwrap();
        let (persist, _worker) = spawn_worker(store, 64);
        let engine = Engine::new(coordinator, Scheduler::new(tx), persist).with_clock(fixed_clock);
        (engine, rx)
    }

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::from_bytes([n; 16])
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_boot_starts_round_after_recorded_history() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (mut engine, _rx) = engine(store);
        engine.boot(6, None);

        let round = engine.coordinator().round_state();
        assert_eq!(round.number, 7);
        assert_eq!(round.status, RoundStatus::Active);
    }

    #[tokio::test]
    async fn test_join_and_capture_flow() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (mut engine, _rx) = engine(store);
        engine.boot(0, None);

        let (tx, mut client) = mpsc::channel(64);
        engine.handle(EngineCommand::Join { id: pid(1), sender: tx });
        let joined = drain(&mut client);
        assert!(matches!(joined[0], ServerMessage::Event(GameEvent::Welcome { .. })));
        assert!(matches!(joined[1], ServerMessage::Event(GameEvent::FullState(_))));

        engine.handle(EngineCommand::Capture { id: pid(1), coord: TileCoord::new(0, 0) });
        let messages = drain(&mut client);
        assert!(matches!(messages[0], ServerMessage::Event(GameEvent::TileUpdated(_))));
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMessage::Event(GameEvent::EnergyUpdated(v)) if v.current == 95
        )));
    }

    #[tokio::test]
    async fn test_name_errors_reach_requester() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (mut engine, _rx) = engine(store);

        let (tx, mut client) = mpsc::channel(64);
        engine.handle(EngineCommand::Join { id: pid(1), sender: tx });
        drain(&mut client);

        engine.handle(EngineCommand::SetDisplayName {
            id: pid(1),
            name: "<bad>".into(),
            restored: None,
        });
        let messages = drain(&mut client);
        assert!(matches!(
            &messages[0],
            ServerMessage::Error(ServerError { code: ErrorCode::InvalidName, .. })
        ));
    }

    #[tokio::test]
    async fn test_is_online() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (mut engine, _rx) = engine(store);
        let (tx, _client) = mpsc::channel(64);
        engine.handle(EngineCommand::Join { id: pid(1), sender: tx });
        engine.handle(EngineCommand::SetDisplayName {
            id: pid(1),
            name: "Neo".into(),
            restored: None,
        });

        let (reply, answer) = oneshot::channel();
        engine.handle(EngineCommand::IsOnline { username: "neo".into(), reply });
        assert!(answer.await.unwrap());
    }

    /// Plays one session and returns everything the client saw.
    fn play_session(engine: &mut Engine) -> Vec<ServerMessage> {
        engine.boot(0, None);
        let (tx, mut client) = mpsc::channel(256);
        engine.handle(EngineCommand::Join { id: pid(1), sender: tx });
        engine.handle(EngineCommand::SetDisplayName {
            id: pid(1),
            name: "Neo".into(),
            restored: None,
        });
        engine.handle(EngineCommand::Capture { id: pid(1), coord: TileCoord::new(0, 0) });
        engine.handle(EngineCommand::Capture { id: pid(1), coord: TileCoord::new(1, 0) });
        engine.handle(EngineCommand::SnapshotRecovery);
        engine.handle(EngineCommand::RoundDeadline { round: 1 });
        engine.handle(EngineCommand::StartNextRound { after_round: 1 });
        drain(&mut client)
    }

    #[tokio::test]
    async fn test_failing_store_does_not_change_gameplay() {
        use crate::persistence::store::FailingStore;

        let (mut healthy, _rx) = engine(Arc::new(MemoryStore::new()));
        let (mut failing, _rx2) = engine(Arc::new(FailingStore));

        let expected = play_session(&mut healthy);
        let observed = play_session(&mut failing);
        assert_eq!(observed, expected);

        assert!(observed.iter().any(|m| matches!(
            m,
            ServerMessage::Event(GameEvent::RoundEnded { round, .. })
                if round.winner.as_ref().is_some_and(|w| w.score == 2)
        )));
        assert_eq!(failing.coordinator().round_state().number, 2);
        assert_eq!(failing.coordinator().round_state().status, RoundStatus::Active);
        assert_eq!(failing.coordinator().participant(&pid(1)).unwrap().lifetime_captures, 2);
        assert_eq!(
            failing.coordinator().grid().digest(),
            healthy.coordinator().grid().digest()
        );
    }

    #[tokio::test]
    async fn test_shutdown_hands_back_final_state() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (mut engine, _rx) = engine(store);
        engine.boot(0, None);
        let (tx, mut client) = mpsc::channel(64);
        engine.handle(EngineCommand::Join { id: pid(1), sender: tx });
        drain(&mut client);

        let (reply, final_state) = oneshot::channel();
        let flow = engine.handle(EngineCommand::Shutdown { reply });
        assert!(flow.is_break());

        let final_state = final_state.await.unwrap();
        assert_eq!(final_state.profiles.len(), 1);
        assert_eq!(final_state.snapshot.round.number, 1);
        assert!(matches!(drain(&mut client)[0], ServerMessage::Shutdown { .. }));
    }
}
