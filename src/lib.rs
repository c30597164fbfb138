//! # Neon Grid Server
//!
//! Authoritative real-time tile-capture engine. Clients race to claim tiles
//! on a shared grid during timed rounds; the server owns every rule.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NEON GRID SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  ├── hash.rs     - Domain-separated SHA-256 digests          │
//! │  └── time.rs     - Millisecond wall clock                    │
//! │                                                              │
//! │  game/           - Game rules (no I/O, no clock)             │
//! │  ├── grid.rs     - GridStore: ownership, cooldowns, cores    │
//! │  ├── energy.rs   - EnergyLedger: regenerating energy         │
//! │  ├── rate.rs     - RateGuard: sliding-window limiter         │
//! │  ├── cluster.rs  - ClusterAnalyzer: connected territory      │
//! │  ├── rank.rs     - RankRegistry: tiers and leaderboard       │
//! │  ├── round.rs    - RoundClock: round life cycle              │
//! │  └── coordinator.rs - CaptureCoordinator: the write path     │
//! │                                                              │
//! │  network/        - Transport and scheduling                  │
//! │  ├── engine.rs   - Single task owning all game state         │
//! │  ├── gateway.rs  - BroadcastGateway: client fan-out          │
//! │  ├── scheduler.rs- Round timers and maintenance ticks        │
//! │  ├── server.rs   - WebSocket server                          │
//! │  └── protocol.rs - Message types                             │
//! │                                                              │
//! │  persistence/    - Profiles, round history, recovery         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! Every mutation runs on the engine task, one command at a time. Two
//! captures of the same tile are totally ordered: the first wins and the
//! second sees the cooldown. Clients receive events in the order they were
//! produced.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod persistence;

// Re-export commonly used types
pub use config::{Config, ConfigError, GameConfig, ServerConfig};
pub use core::rng::DeterministicRng;
pub use game::coordinator::CaptureCoordinator;
pub use game::grid::{GridStore, TileCoord};
pub use game::state::ParticipantId;
pub use network::server::GameServer;
pub use persistence::{DurableStore, FileStore, MemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "NEON_GRID_CONFIG";
