//! Tile Grid
//!
//! Owns every tile of the fixed `width × height` board and the core-zone
//! layout. `capture` is the only way tile ownership changes.
//!
//! Core zones are placed by rejection sampling inside a band that keeps
//! them away from the edges, with a minimum Manhattan spacing between any
//! two cores.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::core::time::Millis;
use crate::game::state::ParticipantId;

/// Points for capturing an ordinary tile.
pub const TILE_POINTS: u32 = 1;

/// Points for capturing a core-zone tile.
pub const CORE_ZONE_POINTS: u32 = 5;

/// Minimum Manhattan distance between two core zones.
pub const MIN_CORE_SPACING: u32 = 10;

/// Edge band excluded from core placement, as a percentage of the
/// shorter grid dimension.
pub const CORE_MARGIN_PERCENT: u32 = 15;

/// Rejection-sampling budget per requested core zone.
const PLACEMENT_ATTEMPTS_PER_CORE: usize = 10_000;

/// Width of the excluded edge band for a grid.
pub fn core_zone_margin(width: u32, height: u32) -> u32 {
    width.min(height) * CORE_MARGIN_PERCENT / 100
}

// =============================================================================
// TILES
// =============================================================================

/// Integer tile coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl TileCoord {
    /// Create a coordinate.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another coordinate.
    pub fn manhattan(&self, other: &TileCoord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

/// One addressable grid cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Current owner.
    pub owner: Option<ParticipantId>,
    /// Owner's display color at capture time.
    pub color: Option<String>,
    /// When the tile was last captured.
    pub last_captured_at: Option<Millis>,
    /// High-value tile.
    pub is_core: bool,
}

impl Tile {
    fn blank(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            owner: None,
            color: None,
            last_captured_at: None,
            is_core: false,
        }
    }

    /// Coordinates of this tile.
    pub fn coord(&self) -> TileCoord {
        TileCoord::new(self.x, self.y)
    }

    fn clear(&mut self) {
        self.owner = None;
        self.color = None;
        self.last_captured_at = None;
        self.is_core = false;
    }
}

/// Grid errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    /// Coordinates outside the grid.
    #[error("tile ({x}, {y}) does not exist")]
    UnknownTile {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// Tile was captured too recently.
    #[error("tile on cooldown for another {remaining_ms} ms")]
    OnCooldown {
        /// Time until the tile can be captured again.
        remaining_ms: u64,
    },

    /// Rejection sampling ran out of attempts.
    #[error("placed only {placed} of {requested} core zones")]
    CoreZonePlacement {
        /// Cores placed before giving up.
        placed: usize,
        /// Cores requested.
        requested: usize,
    },

    /// Snapshot does not fit this grid or failed its digest check.
    #[error("snapshot rejected: {0}")]
    SnapshotMismatch(String),
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Full export of grid state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// Grid width.
    pub width: u32,
    /// Grid height.
    pub height: u32,
    /// Every tile in row-major order.
    pub tiles: Vec<Tile>,
    /// Core-zone coordinates.
    pub core_zones: Vec<TileCoord>,
    /// Number of owned tiles.
    pub claimed: usize,
    /// Digest over dimensions and tiles.
    pub digest: StateHash,
}

// =============================================================================
// GRID STORE
// =============================================================================

/// The capturable board.
#[derive(Clone, Debug)]
pub struct GridStore {
    width: u32,
    height: u32,
    cooldown_ms: u64,
    core_zone_count: usize,
    tiles: Vec<Tile>,
    core_zones: Vec<TileCoord>,
    claimed: usize,
}

impl GridStore {
    /// Allocate an unowned grid and place its core zones.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::CoreZonePlacement`] if the cores cannot be
    /// spaced on this grid.
    pub fn initialize(
        width: u32,
        height: u32,
        core_zone_count: usize,
        cooldown_ms: u64,
        rng: &mut DeterministicRng,
    ) -> Result<Self, GridError> {
        let mut tiles = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                tiles.push(Tile::blank(x, y));
            }
        }

        let mut grid = Self {
            width,
            height,
            cooldown_ms,
            core_zone_count,
            tiles,
            core_zones: Vec::with_capacity(core_zone_count),
            claimed: 0,
        };
        grid.place_core_zones(rng)?;
        Ok(grid)
    }

    /// Reinitialize every tile in place and draw a new core layout.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::CoreZonePlacement`] if placement gives up; the
    /// tiles are still cleared and the cores placed so far are kept.
    pub fn reset(&mut self, rng: &mut DeterministicRng) -> Result<(), GridError> {
        for tile in &mut self.tiles {
            tile.clear();
        }
        self.core_zones.clear();
        self.claimed = 0;
        self.place_core_zones(rng)
    }

    fn place_core_zones(&mut self, rng: &mut DeterministicRng) -> Result<(), GridError> {
        let margin = core_zone_margin(self.width, self.height);
        let (x_range, y_range) = if self.width > 2 * margin && self.height > 2 * margin {
            ((margin, self.width - margin), (margin, self.height - margin))
        } else {
            ((0, self.width), (0, self.height))
        };

        let budget = PLACEMENT_ATTEMPTS_PER_CORE * self.core_zone_count.max(1);
        let mut attempts = 0;
        while self.core_zones.len() < self.core_zone_count {
            if attempts >= budget {
                return Err(GridError::CoreZonePlacement {
                    placed: self.core_zones.len(),
                    requested: self.core_zone_count,
                });
            }
            attempts += 1;

            let candidate = TileCoord::new(
                rng.next_in(x_range.0, x_range.1),
                rng.next_in(y_range.0, y_range.1),
            );
            let spaced = self
                .core_zones
                .iter()
                .all(|core| core.manhattan(&candidate) >= MIN_CORE_SPACING);
            if !spaced {
                continue;
            }

            if let Some(idx) = self.index(candidate) {
                self.tiles[idx].is_core = true;
                self.core_zones.push(candidate);
            }
        }

        debug!(
            cores = self.core_zones.len(),
            attempts,
            "core zones placed"
        );
        Ok(())
    }

    /// Capture a tile.
    ///
    /// Returns the points awarded: [`CORE_ZONE_POINTS`] for a core zone,
    /// [`TILE_POINTS`] otherwise.
    ///
    /// # Errors
    ///
    /// - [`GridError::UnknownTile`] for coordinates outside the grid.
    /// - [`GridError::OnCooldown`] if `now - last_captured_at < cooldown`.
    pub fn capture(
        &mut self,
        coord: TileCoord,
        owner: ParticipantId,
        color: &str,
        now: Millis,
    ) -> Result<u32, GridError> {
        let idx = self.index(coord).ok_or(GridError::UnknownTile {
            x: coord.x,
            y: coord.y,
        })?;
        let cooldown_ms = self.cooldown_ms;
        let tile = &mut self.tiles[idx];

        if let Some(last) = tile.last_captured_at {
            let elapsed = now.saturating_sub(last);
            if elapsed < cooldown_ms {
                return Err(GridError::OnCooldown {
                    remaining_ms: cooldown_ms - elapsed,
                });
            }
        }

        if tile.owner.is_none() {
            self.claimed += 1;
        }
        tile.owner = Some(owner);
        tile.color = Some(color.to_string());
        tile.last_captured_at = Some(now);

        Ok(if tile.is_core { CORE_ZONE_POINTS } else { TILE_POINTS })
    }

    /// Export full state.
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            width: self.width,
            height: self.height,
            tiles: self.tiles.clone(),
            core_zones: self.core_zones.clone(),
            claimed: self.claimed,
            digest: self.digest(),
        }
    }

    /// Replace state from a snapshot of a grid with the same dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::SnapshotMismatch`] if the dimensions, tile
    /// layout or digest disagree; the grid is left untouched.
    pub fn load(&mut self, snapshot: GridSnapshot) -> Result<(), GridError> {
        if snapshot.width != self.width || snapshot.height != self.height {
            return Err(GridError::SnapshotMismatch(format!(
                "snapshot is {}x{}, grid is {}x{}",
                snapshot.width, snapshot.height, self.width, self.height
            )));
        }
        if snapshot.tiles.len() != self.tiles.len() {
            return Err(GridError::SnapshotMismatch(format!(
                "expected {} tiles, found {}",
                self.tiles.len(),
                snapshot.tiles.len()
            )));
        }
        let misplaced = snapshot.tiles.iter().enumerate().any(|(idx, tile)| {
            self.index(tile.coord()) != Some(idx)
        });
        if misplaced {
            return Err(GridError::SnapshotMismatch("tiles out of row-major order".into()));
        }
        if digest_tiles(snapshot.width, snapshot.height, &snapshot.tiles) != snapshot.digest {
            return Err(GridError::SnapshotMismatch("digest mismatch".into()));
        }

        self.claimed = snapshot.tiles.iter().filter(|t| t.owner.is_some()).count();
        self.core_zones = snapshot
            .tiles
            .iter()
            .filter(|t| t.is_core)
            .map(Tile::coord)
            .collect();
        self.tiles = snapshot.tiles;
        Ok(())
    }

    /// Digest over dimensions and every tile.
    pub fn digest(&self) -> StateHash {
        digest_tiles(self.width, self.height, &self.tiles)
    }

    /// Row-major index of a coordinate.
    pub fn index(&self, coord: TileCoord) -> Option<usize> {
        if coord.x < self.width && coord.y < self.height {
            Some(coord.y as usize * self.width as usize + coord.x as usize)
        } else {
            None
        }
    }

    /// Whether the coordinate lies on the grid.
    pub fn contains(&self, coord: TileCoord) -> bool {
        self.index(coord).is_some()
    }

    /// Get a tile.
    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.index(coord).and_then(|idx| self.tiles.get(idx))
    }

    /// Owner of a tile, if any.
    pub fn owner_of(&self, coord: TileCoord) -> Option<ParticipantId> {
        self.tile(coord).and_then(|t| t.owner)
    }

    /// All tiles in row-major order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Core-zone coordinates in placement order.
    pub fn core_zones(&self) -> &[TileCoord] {
        &self.core_zones
    }

    /// Number of owned tiles.
    pub fn claimed_count(&self) -> usize {
        self.claimed
    }

    /// Grid width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Capture cooldown in milliseconds.
    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }
}

fn digest_tiles(width: u32, height: u32, tiles: &[Tile]) -> StateHash {
    let mut hasher = StateHasher::for_grid();
    hasher.update_u32(width);
    hasher.update_u32(height);
    for tile in tiles {
        hasher.update_u32(tile.x);
        hasher.update_u32(tile.y);
        match tile.owner {
            Some(owner) => {
                hasher.update_u8(1);
                hasher.update_uuid(owner.as_bytes());
            }
            None => hasher.update_u8(0),
        }
        hasher.update_opt_str(tile.color.as_deref());
        hasher.update_u64(tile.last_captured_at.unwrap_or(0));
        hasher.update_bool(tile.last_captured_at.is_some());
        hasher.update_bool(tile.is_core);
    }
    hasher.finalize()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: u64 = 5_000;

    fn grid(cores: usize) -> GridStore {
        let mut rng = DeterministicRng::new(42);
        GridStore::initialize(100, 100, cores, COOLDOWN, &mut rng).unwrap()
    }

    fn alice() -> ParticipantId {
        ParticipantId::from_bytes([1; 16])
    }

    fn first_plain_tile(grid: &GridStore) -> TileCoord {
        grid.tiles().iter().find(|t| !t.is_core).unwrap().coord()
    }

    #[test]
    fn test_initialize_allocates_every_tile() {
        let grid = grid(0);
        assert_eq!(grid.tiles().len(), 10_000);
        assert!(grid.tiles().iter().all(|t| t.owner.is_none()));
        assert_eq!(grid.claimed_count(), 0);
        assert_eq!(grid.tile(TileCoord::new(99, 99)).unwrap().coord(), TileCoord::new(99, 99));
        assert!(grid.tile(TileCoord::new(100, 0)).is_none());
    }

    #[test]
    fn test_core_zone_placement_rules() {
        let grid = grid(8);
        let cores = grid.core_zones();
        assert_eq!(cores.len(), 8);

        let margin = core_zone_margin(100, 100);
        assert_eq!(margin, 15);
        for core in cores {
            assert!(core.x >= margin && core.x < 100 - margin);
            assert!(core.y >= margin && core.y < 100 - margin);
            assert!(grid.tile(*core).unwrap().is_core);
        }
        for (i, a) in cores.iter().enumerate() {
            for b in &cores[i + 1..] {
                assert!(a.manhattan(b) >= MIN_CORE_SPACING);
            }
        }
        assert_eq!(grid.tiles().iter().filter(|t| t.is_core).count(), 8);
    }

    #[test]
    fn test_placement_is_deterministic_per_seed() {
        let a = grid(6);
        let b = grid(6);
        assert_eq!(a.core_zones(), b.core_zones());
    }

    #[test]
    fn test_impossible_placement_errors() {
        let mut rng = DeterministicRng::new(1);
        let result = GridStore::initialize(10, 10, 40, COOLDOWN, &mut rng);
        assert!(matches!(result, Err(GridError::CoreZonePlacement { requested: 40, .. })));
    }

    #[test]
    fn test_capture_plain_tile_awards_one_point() {
        let mut grid = grid(0);
        let coord = TileCoord::new(3, 4);
        let points = grid.capture(coord, alice(), "#00f5ff", 1_000).unwrap();

        assert_eq!(points, TILE_POINTS);
        let tile = grid.tile(coord).unwrap();
        assert_eq!(tile.owner, Some(alice()));
        assert_eq!(tile.color.as_deref(), Some("#00f5ff"));
        assert_eq!(tile.last_captured_at, Some(1_000));
        assert_eq!(grid.claimed_count(), 1);
    }

    #[test]
    fn test_capture_core_zone_awards_five_points() {
        let mut grid = grid(4);
        let core = grid.core_zones()[0];
        assert_eq!(grid.capture(core, alice(), "#fff", 0).unwrap(), CORE_ZONE_POINTS);
    }

    #[test]
    fn test_cooldown_boundary() {
        let mut grid = grid(0);
        let coord = first_plain_tile(&grid);
        grid.capture(coord, alice(), "#fff", 10_000).unwrap();

        let early = grid.capture(coord, alice(), "#fff", 10_000 + COOLDOWN - 1);
        assert_eq!(early, Err(GridError::OnCooldown { remaining_ms: 1 }));

        // Exactly at the cooldown boundary succeeds
        assert!(grid.capture(coord, alice(), "#fff", 10_000 + COOLDOWN).is_ok());
    }

    #[test]
    fn test_recapture_by_other_owner_keeps_claimed_count() {
        let mut grid = grid(0);
        let coord = TileCoord::new(10, 10);
        let bob = ParticipantId::from_bytes([2; 16]);

        grid.capture(coord, alice(), "#a", 0).unwrap();
        grid.capture(coord, bob, "#b", COOLDOWN).unwrap();

        assert_eq!(grid.owner_of(coord), Some(bob));
        assert_eq!(grid.claimed_count(), 1);
    }

    #[test]
    fn test_unknown_tile() {
        let mut grid = grid(0);
        let result = grid.capture(TileCoord::new(100, 5), alice(), "#fff", 0);
        assert_eq!(result, Err(GridError::UnknownTile { x: 100, y: 5 }));
    }

    #[test]
    fn test_reset_clears_tiles_and_redraws_cores() {
        let mut grid = grid(5);
        grid.capture(TileCoord::new(1, 1), alice(), "#fff", 0).unwrap();
        let old_cores = grid.core_zones().to_vec();

        let mut rng = DeterministicRng::new(777);
        grid.reset(&mut rng).unwrap();

        assert_eq!(grid.claimed_count(), 0);
        assert!(grid.tile(TileCoord::new(1, 1)).unwrap().owner.is_none());
        assert!(grid.tile(TileCoord::new(1, 1)).unwrap().last_captured_at.is_none());
        assert_eq!(grid.core_zones().len(), 5);
        assert_ne!(grid.core_zones(), old_cores.as_slice());
        assert_eq!(grid.tiles().iter().filter(|t| t.is_core).count(), 5);
    }

    #[test]
    fn test_snapshot_load_restores_state() {
        let mut grid = grid(3);
        grid.capture(TileCoord::new(2, 2), alice(), "#fff", 50).unwrap();
        let snapshot = grid.snapshot();
        assert_eq!(snapshot.claimed, 1);

        let mut other = {
            let mut rng = DeterministicRng::new(9);
            GridStore::initialize(100, 100, 3, COOLDOWN, &mut rng).unwrap()
        };
        other.load(snapshot.clone()).unwrap();

        assert_eq!(other.owner_of(TileCoord::new(2, 2)), Some(alice()));
        assert_eq!(other.core_zones(), grid.core_zones());
        assert_eq!(other.claimed_count(), 1);
        assert_eq!(other.digest(), snapshot.digest);
    }

    #[test]
    fn test_load_rejects_tampered_snapshot() {
        let mut grid = grid(0);
        let mut snapshot = grid.snapshot();
        snapshot.tiles[0].owner = Some(alice());

        let result = grid.load(snapshot);
        assert!(matches!(result, Err(GridError::SnapshotMismatch(_))));
        assert!(grid.tile(TileCoord::new(0, 0)).unwrap().owner.is_none());
    }

    #[test]
    fn test_load_rejects_wrong_dimensions() {
        let mut small = {
            let mut rng = DeterministicRng::new(1);
            GridStore::initialize(20, 20, 0, COOLDOWN, &mut rng).unwrap()
        };
        let result = small.load(grid(0).snapshot());
        assert!(matches!(result, Err(GridError::SnapshotMismatch(_))));
    }
}
