//! Participant State
//!
//! Identity, faction and per-connection participant records.
//! Uses BTreeMap-friendly ordered ids so every derived view iterates
//! in a deterministic order.

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::game::rank::RankTier;

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Ephemeral identity bound to one connection.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub uuid::Uuid);

impl ParticipantId {
    /// Allocate a fresh random identity.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short hex prefix for logs and default names.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..3])
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// FACTION
// =============================================================================

/// Team tag shown next to a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    /// Cyan team.
    Cyan,
    /// Magenta team.
    Magenta,
    /// Lime team.
    Lime,
}

impl Faction {
    /// All factions in balancing order.
    pub const ALL: [Faction; 3] = [Faction::Cyan, Faction::Magenta, Faction::Lime];

    /// Wire / storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Faction::Cyan => "cyan",
            Faction::Magenta => "magenta",
            Faction::Lime => "lime",
        }
    }
}

/// Display colors handed out to new participants.
pub const COLOR_PALETTE: [&str; 12] = [
    "#00f5ff", "#ff00e6", "#39ff14", "#ffea00",
    "#ff6b00", "#9d00ff", "#00ff9d", "#ff0055",
    "#00a2ff", "#f7ff00", "#ff3df2", "#7dff00",
];

/// Pick a palette color from an identity.
pub fn color_for(id: &ParticipantId) -> &'static str {
    let idx = id.as_bytes()[0] as usize % COLOR_PALETTE.len();
    COLOR_PALETTE[idx]
}

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 20;

/// Normalize and validate a requested display name.
///
/// Returns `None` for empty, overlong, or non-printable names.
pub fn sanitize_display_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return None;
    }
    let allowed = |c: char| c.is_alphanumeric() || c == ' ' || c == '_' || c == '-';
    if !trimmed.chars().all(allowed) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Storage key for a display name (case-insensitive).
pub fn profile_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// A connected participant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity for this connection.
    pub id: ParticipantId,
    /// Display name.
    pub username: String,
    /// Display color.
    pub color: String,
    /// Faction tag.
    pub faction: Faction,
    /// Captures across all rounds (including restored history).
    pub lifetime_captures: u32,
    /// Captures in the current round.
    pub round_captures: u32,
    /// Consecutive successful captures.
    pub streak: u32,
    /// Tier derived from lifetime captures.
    pub rank: RankTier,
    /// Connection time.
    pub connected_at: Millis,
    /// Last accepted request.
    pub last_active_at: Millis,
}

impl Participant {
    /// Create a fresh participant with a default name and palette color.
    pub fn new(id: ParticipantId, faction: Faction, now: Millis) -> Self {
        Self {
            id,
            username: format!("Player-{}", id.short()),
            color: color_for(&id).to_string(),
            faction,
            lifetime_captures: 0,
            round_captures: 0,
            streak: 0,
            rank: RankTier::Bronze,
            connected_at: now,
            last_active_at: now,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
