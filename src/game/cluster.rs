//! Cluster Analysis
//!
//! Finds the largest 4-connected group of tiles owned by one participant.
//! The search uses an explicit stack so large territories cannot overflow
//! the call stack.

use crate::game::grid::{GridStore, TileCoord};
use crate::game::state::ParticipantId;

/// Cluster sizes that award a bonus are multiples of this.
pub const CLUSTER_STEP: usize = 5;

/// A connected component of owned tiles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cluster {
    /// Member tiles, in discovery order.
    pub tiles: Vec<TileCoord>,
}

impl Cluster {
    /// Number of tiles.
    pub fn size(&self) -> usize {
        self.tiles.len()
    }

    /// Bonus points earned by this exact size: `size / 5` when the size is
    /// a positive multiple of 5, else zero.
    pub fn bonus(&self) -> u32 {
        cluster_bonus(self.size())
    }
}

/// Bonus for a cluster of `size` tiles.
pub fn cluster_bonus(size: usize) -> u32 {
    if size >= CLUSTER_STEP && size % CLUSTER_STEP == 0 {
        u32::try_from(size / CLUSTER_STEP).unwrap_or(u32::MAX)
    } else {
        0
    }
}

/// Largest connected component of `owner`'s tiles.
///
/// Returns an empty cluster if the owner has no tiles. Among equally large
/// components, the one containing the lowest row-major tile wins.
pub fn largest_cluster(grid: &GridStore, owner: &ParticipantId) -> Cluster {
    let width = grid.width();
    let height = grid.height();
    let mut visited = vec![false; grid.tiles().len()];
    let mut best = Cluster::default();
    let mut stack = Vec::new();

    for (start_idx, tile) in grid.tiles().iter().enumerate() {
        if visited[start_idx] || tile.owner.as_ref() != Some(owner) {
            continue;
        }

        let mut members = Vec::new();
        visited[start_idx] = true;
        stack.push(tile.coord());

        while let Some(coord) = stack.pop() {
            members.push(coord);
            for next in neighbors(coord, width, height) {
                let Some(idx) = grid.index(next) else { continue };
                if !visited[idx] && grid.tiles()[idx].owner.as_ref() == Some(owner) {
                    visited[idx] = true;
                    stack.push(next);
                }
            }
        }

        if members.len() > best.tiles.len() {
            best.tiles = members;
        }
    }

    best
}

fn neighbors(coord: TileCoord, width: u32, height: u32) -> impl Iterator<Item = TileCoord> {
    let TileCoord { x, y } = coord;
    [
        (x > 0).then(|| TileCoord::new(x - 1, y)),
        (x + 1 < width).then(|| TileCoord::new(x + 1, y)),
        (y > 0).then(|| TileCoord::new(x, y - 1)),
        (y + 1 < height).then(|| TileCoord::new(x, y + 1)),
    ]
    .into_iter()
    .flatten()
}
