//! Network Layer
//!
//! WebSocket transport, the engine task and its background timers.
//! Game rules live in `game/`; this layer only moves commands in and
//! events out.

pub mod protocol;
pub mod gateway;
pub mod scheduler;
pub mod engine;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, ProfileView, ServerError, ServerMessage};
pub use gateway::BroadcastGateway;
pub use scheduler::Scheduler;
pub use engine::{Engine, EngineCommand, FinalState};
pub use server::{GameServer, GameServerError};
