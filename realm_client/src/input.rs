//! Input handling.
//!
//! The host forwards raw key and click events as they arrive; they are buffered
//! here and applied by the gameplay loop at the start of the next frame, so the
//! world is only ever mutated from inside `frame`.

use std::collections::VecDeque;

use realm_shared::tile::TileCoordinate;

use crate::movement::Direction;

/// Maps a key name (`"ArrowUp"`, `"w"`, ...) to a movement direction.
pub fn key_direction(key: &str) -> Option<Direction> {
    match key {
        "ArrowUp" | "w" | "W" => Some(Direction::Up),
        "ArrowDown" | "s" | "S" => Some(Direction::Down),
        "ArrowLeft" | "a" | "A" => Some(Direction::Left),
        "ArrowRight" | "d" | "D" => Some(Direction::Right),
        _ => None,
    }
}

/// A deferred input action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCommand {
    /// Step one tile (keyboard).
    Step(Direction),
    /// Walk to a clicked tile (mouse).
    MoveTo(TileCoordinate),
}

/// Held keys plus commands waiting for the next frame.
#[derive(Debug, Clone)]
pub struct InputState {
    held: Vec<Direction>,
    pending: VecDeque<InputCommand>,
    enabled: bool,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            held: Vec::new(),
            pending: VecDeque::new(),
            enabled: true,
        }
    }
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the key was a movement key and was accepted.
    pub fn key_down(&mut self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(dir) = key_direction(key) else {
            return false;
        };
        if !self.held.contains(&dir) {
            self.held.push(dir);
        }
        self.pending.push_back(InputCommand::Step(dir));
        true
    }

    pub fn key_up(&mut self, key: &str) {
        if let Some(dir) = key_direction(key) {
            self.held.retain(|d| *d != dir);
        }
    }

    pub fn click(&mut self, tile: TileCoordinate) -> bool {
        if !self.enabled {
            return false;
        }
        self.pending.push_back(InputCommand::MoveTo(tile));
        true
    }

    /// Most recently pressed key that is still down.
    pub fn held(&self) -> Option<Direction> {
        self.held.last().copied()
    }

    pub fn drain(&mut self) -> Vec<InputCommand> {
        self.pending.drain(..).collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling drops held keys and anything not yet applied.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.held.clear();
            self.pending.clear();
        }
    }
}
