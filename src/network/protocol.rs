//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON text frame tagged by `type`. Game state changes
//! travel as `{"type": "event", "event": ...}`.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::events::GameEvent;
use crate::game::rank::RankTier;
use crate::game::state::Faction;
use crate::persistence::store::{PlayerStats, RoundRecord, RoundResultRow, StoredProfile};

/// Rounds returned by a history request that names no limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Upper bound on history requests.
pub const MAX_HISTORY_LIMIT: usize = 100;

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Capture the tile at `(x, y)`.
    Capture {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// Resend the whole board.
    RequestFullState,

    /// Choose a display name, restoring a saved profile if one matches.
    SetDisplayName {
        /// Requested name.
        name: String,
    },

    /// Aggregate statistics.
    RequestStats,

    /// Recently completed rounds.
    RequestRoundHistory {
        /// Maximum rounds to return.
        #[serde(default = "default_history_limit")]
        limit: usize,
    },

    /// Final standings of one completed round.
    RequestRoundResults {
        /// Round number.
        round: u32,
    },

    /// Saved profile and cumulative stats for a name.
    RequestProfile {
        /// Display name.
        username: String,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Game state change.
    Event(GameEvent),

    /// Reply to a round history request.
    RoundHistory {
        /// Rounds, newest first.
        rounds: Vec<RoundRecord>,
    },

    /// Reply to a round results request. Empty when the round is unknown.
    RoundResults {
        /// Round number.
        round: u32,
        /// Rows ordered by placement.
        results: Vec<RoundResultRow>,
    },

    /// Reply to a profile request.
    Profile(ProfileView),

    /// Pong response.
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Server time in milliseconds.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

impl From<GameEvent> for ServerMessage {
    fn from(event: GameEvent) -> Self {
        ServerMessage::Event(event)
    }
}

/// Saved profile with cumulative stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileView {
    /// Display name as requested.
    pub username: String,
    /// Whether a saved profile exists.
    pub found: bool,
    /// Display color.
    pub color: Option<String>,
    /// Faction.
    pub faction: Option<Faction>,
    /// Tier.
    pub rank: Option<RankTier>,
    /// Captures across rounds.
    pub lifetime_captures: u32,
    /// Last time seen.
    pub last_seen: Option<DateTime<Utc>>,
    /// Cumulative round stats.
    pub stats: Option<PlayerStats>,
    /// Connected right now.
    pub online: bool,
}

impl ProfileView {
    /// Combine store records for `username`.
    pub fn new(
        username: String,
        profile: Option<StoredProfile>,
        stats: Option<PlayerStats>,
        online: bool,
    ) -> Self {
        match profile {
            Some(p) => Self {
                username: p.username,
                found: true,
                color: Some(p.color),
                faction: Some(p.faction),
                rank: Some(p.rank),
                lifetime_captures: p.lifetime_captures,
                last_seen: Some(p.last_seen),
                stats,
                online,
            },
            None => Self {
                username,
                found: false,
                color: None,
                faction: None,
                rank: None,
                lifetime_captures: 0,
                last_seen: None,
                stats,
                online,
            },
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Create an error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed message.
    InvalidInput,
    /// Display name rejected.
    InvalidName,
    /// Display name used by another connection.
    NameTaken,
    /// Connection limit reached.
    ServerOverloaded,
    /// Durable store unavailable.
    StoreUnavailable,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::{RejectReason, TileView};

    #[test]
    fn test_client_message_parsing() {
        let msg = ClientMessage::from_json(r#"{"type":"capture","x":3,"y":4}"#).unwrap();
        assert_eq!(msg, ClientMessage::Capture { x: 3, y: 4 });

        let msg = ClientMessage::from_json(r#"{"type":"request_full_state"}"#).unwrap();
        assert_eq!(msg, ClientMessage::RequestFullState);

        let msg = ClientMessage::from_json(r#"{"type":"set_display_name","name":"Neo"}"#).unwrap();
        assert_eq!(msg, ClientMessage::SetDisplayName { name: "Neo".into() });
    }

    #[test]
    fn test_history_limit_defaults() {
        let msg = ClientMessage::from_json(r#"{"type":"request_round_history"}"#).unwrap();
        assert_eq!(msg, ClientMessage::RequestRoundHistory { limit: DEFAULT_HISTORY_LIMIT });
    }

    #[test]
    fn test_round_results_request() {
        let msg = ClientMessage::from_json(r#"{"type":"request_round_results","round":7}"#).unwrap();
        assert_eq!(msg, ClientMessage::RequestRoundResults { round: 7 });
        assert!(ClientMessage::from_json(r#"{"type":"request_round_results"}"#).is_err());
    }

    #[test]
    fn test_round_results_reply_json() {
        let msg = ServerMessage::RoundResults {
            round: 7,
            results: vec![RoundResultRow {
                round: 7,
                username: "neo".into(),
                captures: 12,
                rank: RankTier::Bronze,
                placement: 1,
            }],
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "round_results");
        assert_eq!(value["round"], 7);
        assert_eq!(value["results"][0]["placement"], 1);
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"capture","x":-1,"y":0}"#).is_err());
    }

    #[test]
    fn test_game_event_nesting() {
        let msg = ServerMessage::from(GameEvent::TileUpdated(TileView {
            x: 1,
            y: 2,
            owner: None,
            color: None,
            is_core: true,
            last_captured_at: None,
        }));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"], "tile_updated");
        assert_eq!(value["is_core"], true);

        let parsed = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_rejection_json() {
        let msg = ServerMessage::from(GameEvent::CaptureRejected {
            x: 3,
            y: 4,
            reason: RejectReason::InsufficientEnergy,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"reason\":\"insufficient_energy\""));
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::Error(ServerError::new(ErrorCode::NameTaken, "taken"));
        let json = msg.to_json().unwrap();
        assert!(json.contains("name_taken"));
    }

    #[test]
    fn test_profile_view_missing() {
        let view = ProfileView::new("ghost".into(), None, None, false);
        assert!(!view.found);
        assert_eq!(view.lifetime_captures, 0);
    }
}
