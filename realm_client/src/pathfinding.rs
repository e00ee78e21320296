//! Grid pathfinding.
//!
//! Breadth-first search over 4-connected tiles. Every step costs the same, so
//! the first time BFS reaches the goal it has found a shortest path. Neighbors
//! are expanded in a fixed order (up, down, left, right), which makes the chosen
//! path deterministic among equally short candidates.
//!
//! The search never leaves a bounding rectangle (normally the room's authored
//! extent plus a one-tile rim), so an unreachable goal terminates once the
//! start's connected component inside the rectangle is exhausted.

use std::collections::{HashMap, VecDeque};

use realm_shared::tile::TileCoordinate;

use crate::world::BlockedSet;

/// Tiles from the current tile (exclusive) to the destination (inclusive).
pub type Path = Vec<TileCoordinate>;

/// Expansion order: up, down, left, right.
const NEIGHBOR_OFFSETS: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];

/// Inclusive tile rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub min: TileCoordinate,
    pub max: TileCoordinate,
}

impl TileBounds {
    pub const EMPTY: TileBounds = TileBounds {
        min: TileCoordinate::new(0, 0),
        max: TileCoordinate::new(-1, -1),
    };

    pub const fn new(min: TileCoordinate, max: TileCoordinate) -> Self {
        Self { min, max }
    }

    /// Smallest rectangle containing every tile; `EMPTY` for none.
    pub fn enclosing(tiles: impl IntoIterator<Item = TileCoordinate>) -> Self {
        tiles.into_iter().fold(Self::EMPTY, |acc, t| {
            if acc.is_empty() {
                Self::new(t, t)
            } else {
                Self::new(
                    TileCoordinate::new(acc.min.x.min(t.x), acc.min.y.min(t.y)),
                    TileCoordinate::new(acc.max.x.max(t.x), acc.max.y.max(t.y)),
                )
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn expand(self, by: i32) -> Self {
        if self.is_empty() {
            return self;
        }
        Self::new(self.min.offset(-by, -by), self.max.offset(by, by))
    }

    pub fn contains(&self, t: TileCoordinate) -> bool {
        t.x >= self.min.x && t.x <= self.max.x && t.y >= self.min.y && t.y <= self.max.y
    }
}

/// Shortest-path search over one room.
#[derive(Debug, Clone, Copy)]
pub struct PathFinder {
    bounds: TileBounds,
}

impl PathFinder {
    pub fn new(bounds: TileBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> TileBounds {
        self.bounds
    }

    /// Shortest path from `start` to `goal` avoiding `blocked`.
    ///
    /// `None` when the goal is blocked, outside the bounds, or unreachable.
    /// `Some(vec![])` when `start == goal`.
    pub fn find_path(
        &self,
        start: TileCoordinate,
        goal: TileCoordinate,
        blocked: &BlockedSet,
    ) -> Option<Path> {
        if blocked.contains(&goal) || !self.bounds.contains(goal) {
            return None;
        }
        if start == goal {
            return Some(Path::new());
        }

        let mut came_from: HashMap<TileCoordinate, TileCoordinate> = HashMap::new();
        let mut frontier = VecDeque::from([start]);
        came_from.insert(start, start);

        while let Some(current) = frontier.pop_front() {
            for (dx, dy) in NEIGHBOR_OFFSETS {
                let next = current.offset(dx, dy);
                if !self.bounds.contains(next)
                    || blocked.contains(&next)
                    || came_from.contains_key(&next)
                {
                    continue;
                }
                came_from.insert(next, current);
                if next == goal {
                    return Some(reconstruct(&came_from, start, goal));
                }
                frontier.push_back(next);
            }
        }

        None
    }
}

fn reconstruct(
    came_from: &HashMap<TileCoordinate, TileCoordinate>,
    start: TileCoordinate,
    goal: TileCoordinate,
) -> Path {
    let mut path = vec![goal];
    let mut at = goal;
    while let Some(&prev) = came_from.get(&at) {
        if prev == start {
            break;
        }
        path.push(prev);
        at = prev;
    }
    path.reverse();
    path
}
