//! WebSocket Game Server
//!
//! Accepts WebSocket connections and bridges them to the engine task.
//! Each connection gets a reader loop that turns client messages into
//! [`EngineCommand`]s and a writer task that drains the client's bounded
//! outbound queue. Store lookups for history and profiles run on the
//! blocking pool and never reach the engine.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::core::time::now_ms;
use crate::game::coordinator::CaptureCoordinator;
use crate::game::grid::{GridError, TileCoord};
use crate::game::state::{sanitize_display_name, ParticipantId};
use crate::network::engine::{Engine, EngineCommand, FinalState};
use crate::network::protocol::{
    ClientMessage, ErrorCode, ProfileView, ServerError, ServerMessage, MAX_HISTORY_LIMIT,
};
use crate::network::scheduler::Scheduler;
use crate::persistence::worker::{blocking, flush_all, spawn_worker, SharedStore};

/// Depth of the engine command queue.
pub const ENGINE_QUEUE_DEPTH: usize = 4096;

/// Depth of the persistence queue.
pub const PERSIST_QUEUE_DEPTH: usize = 1024;

/// How long a closing connection waits for its writer to drain.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Initial board could not be built.
    #[error("Grid setup failed: {0}")]
    Grid(#[from] GridError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared pieces every connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    commands: mpsc::Sender<EngineCommand>,
    store: SharedStore,
    queue_depth: usize,
    connections: Arc<AtomicUsize>,
}

/// The game server.
pub struct GameServer {
    config: Config,
    store: SharedStore,
    seed: u64,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server. The grid seed comes from the config or, failing
    /// that, from a random UUID.
    pub fn new(config: Config, store: SharedStore) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let seed = config.server.grid_seed.unwrap_or_else(|| {
            let bytes = *uuid::Uuid::new_v4().as_bytes();
            u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])
        });

        Self {
            config,
            store,
            seed,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// # Errors
    ///
    /// See [`GameServer::serve`].
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.server.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until [`GameServer::shutdown`].
    ///
    /// # Errors
    ///
    /// [`GameServerError::Grid`] when the first board cannot be laid out.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let local = listener.local_addr()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let coordinator = CaptureCoordinator::new(self.config.game.clone(), self.seed)?;
        let last_round = blocking(&self.store, |s| s.last_round_number())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not read round history, numbering from 1");
                0
            });
        let snapshot = blocking(&self.store, |s| s.load_recovery())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not read recovery snapshot");
                None
            });

        let (persist, worker) = spawn_worker(self.store.clone(), PERSIST_QUEUE_DEPTH);
        let (cmd_tx, cmd_rx) = mpsc::channel(ENGINE_QUEUE_DEPTH);

        let server = &self.config.server;
        let mut scheduler = Scheduler::new(cmd_tx.clone());
        scheduler.every(server.cleanup_interval, || EngineCommand::CleanupRateLimits);
        scheduler.every(server.stats_interval, || EngineCommand::BroadcastStats);
        scheduler.every(server.snapshot_interval, || EngineCommand::SnapshotRecovery);

        let mut engine = Engine::new(coordinator, scheduler, persist);
        engine.boot(last_round, snapshot);
        info!(
            addr = %local,
            round = engine.coordinator().round_state().number,
            seed = self.seed,
            "Game server listening"
        );
        let engine_task = tokio::spawn(engine.run(cmd_rx));

        let ctx = ConnectionContext {
            commands: cmd_tx.clone(),
            store: self.store.clone(),
            queue_depth: server.client_queue_depth,
            connections: self.connections.clone(),
        };

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let active = self.connections.load(Ordering::Relaxed);
                            if active >= server.max_connections {
                                warn!(%addr, active, "Connection limit reached, rejecting");
                                tokio::spawn(reject_overloaded(stream, addr));
                                continue;
                            }
                            self.connections.fetch_add(1, Ordering::Relaxed);
                            debug!(%addr, "New connection");
                            self.handle_connection(stream, addr, ctx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(ctx);
        self.drain(cmd_tx, engine_task, worker).await;
        Ok(())
    }

    /// Stop the engine, let queued writes land, then flush what is still
    /// in memory. The whole sequence is bounded by the flush timeout.
    async fn drain(
        &self,
        commands: mpsc::Sender<EngineCommand>,
        engine_task: JoinHandle<()>,
        worker: JoinHandle<()>,
    ) {
        let (reply, final_state) = oneshot::channel::<FinalState>();
        if commands.send(EngineCommand::Shutdown { reply }).await.is_err() {
            warn!("engine already stopped");
        }
        drop(commands);

        let store = self.store.clone();
        let flush = async move {
            let final_state = final_state.await.ok();
            let _ = engine_task.await;
            // The worker exits once the engine's handle is gone and the
            // queue is empty.
            let _ = worker.await;
            match final_state {
                Some(FinalState { profiles, snapshot }) => {
                    let total = profiles.len() + 1;
                    let failed = blocking(&store, move |s| Ok(flush_all(s, &profiles, &snapshot)))
                        .await
                        .unwrap_or(total);
                    (total, failed)
                }
                None => (0, 0),
            }
        };

        match tokio::time::timeout(self.config.server.shutdown_flush_timeout, flush).await {
            Ok((total, 0)) => info!(writes = total, "shutdown flush complete"),
            Ok((total, failed)) => warn!(writes = total, failed, "shutdown flush incomplete"),
            Err(_) => warn!(
                timeout_ms = self.config.server.shutdown_flush_timeout.as_millis() as u64,
                "shutdown flush timed out"
            ),
        }
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, ctx: ConnectionContext) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = ConnectionGuard(ctx.connections.clone());
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(ctx.queue_depth.max(1));
            let id = ParticipantId::random();

            // Message sender task
            let mut writer = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            if ctx
                .commands
                .send(EngineCommand::Join { id, sender: msg_tx.clone() })
                .await
                .is_err()
            {
                writer.abort();
                return;
            }
            info!(participant = %id, %addr, "Client connected");

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        if !handle_client_message(id, client_msg, &ctx, &msg_tx).await {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        debug!(participant = %id, "Invalid message: {}", e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ))).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                ))).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(participant = %id, "Client disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                debug!(participant = %id, "WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            let _ = ctx.commands.send(EngineCommand::Leave { id }).await;
            drop(msg_tx);
            if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
                writer.abort();
            }
            info!(participant = %id, %addr, "Client cleaned up");
        });
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Sender for the shutdown signal.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Seed used for core-zone layouts.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Decrements the connection count when the connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Tell an over-limit client why and hang up.
async fn reject_overloaded(stream: TcpStream, addr: SocketAddr) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let msg = ServerMessage::Error(ServerError::new(
        ErrorCode::ServerOverloaded,
        "Connection limit reached",
    ));
    if let Ok(text) = msg.to_json() {
        let _ = ws.send(Message::Text(text)).await;
    }
    let _ = ws.close(None).await;
    debug!(%addr, "Rejected client closed");
}

/// Route one client message. Returns `false` when the engine is gone.
async fn handle_client_message(
    id: ParticipantId,
    msg: ClientMessage,
    ctx: &ConnectionContext,
    reply: &mpsc::Sender<ServerMessage>,
) -> bool {
    let command = match msg {
        ClientMessage::Capture { x, y } => EngineCommand::Capture {
            id,
            coord: TileCoord::new(x, y),
        },
        ClientMessage::RequestFullState => EngineCommand::RequestFullState { id },
        ClientMessage::RequestStats => EngineCommand::RequestStats { id },
        ClientMessage::SetDisplayName { name } => {
            let restored = match sanitize_display_name(&name) {
                Some(clean) => blocking(&ctx.store, move |s| s.load_profile(&clean))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(participant = %id, error = %e, "profile lookup failed");
                        None
                    }),
                None => None,
            };
            EngineCommand::SetDisplayName { id, name, restored }
        }
        ClientMessage::RequestRoundHistory { limit } => {
            let limit = limit.min(MAX_HISTORY_LIMIT);
            let response = match blocking(&ctx.store, move |s| s.round_history(limit)).await {
                Ok(rounds) => ServerMessage::RoundHistory { rounds },
                Err(e) => store_unavailable(e),
            };
            let _ = reply.send(response).await;
            return true;
        }
        ClientMessage::RequestRoundResults { round } => {
            let response = match blocking(&ctx.store, move |s| s.round_results(round)).await {
                Ok(results) => ServerMessage::RoundResults { round, results },
                Err(e) => store_unavailable(e),
            };
            let _ = reply.send(response).await;
            return true;
        }
        ClientMessage::RequestProfile { username } => {
            let response = profile_response(username, ctx).await;
            let _ = reply.send(response).await;
            return true;
        }
        ClientMessage::Ping { timestamp } => {
            let _ = reply
                .send(ServerMessage::Pong {
                    timestamp,
                    server_time: now_ms(),
                })
                .await;
            return true;
        }
    };
    ctx.commands.send(command).await.is_ok()
}

async fn profile_response(username: String, ctx: &ConnectionContext) -> ServerMessage {
    let lookup = username.clone();
    let records = blocking(&ctx.store, move |s| {
        Ok((s.load_profile(&lookup)?, s.player_stats(&lookup)?))
    })
    .await;
    let (profile, stats) = match records {
        Ok(found) => found,
        Err(e) => return store_unavailable(e),
    };

    let (tx, rx) = oneshot::channel();
    let online = match ctx
        .commands
        .send(EngineCommand::IsOnline { username: username.clone(), reply: tx })
        .await
    {
        Ok(()) => rx.await.unwrap_or(false),
        Err(_) => false,
    };
    ServerMessage::Profile(ProfileView::new(username, profile, stats, online))
}

fn store_unavailable(e: impl std::fmt::Display) -> ServerMessage {
    warn!(error = %e, "store query failed");
    ServerMessage::Error(ServerError::new(ErrorCode::StoreUnavailable, "Store unavailable"))
}
