//! Per-entity movement.
//!
//! A `MovementController` walks an avatar along a BFS path one tile at a time,
//! producing continuous screen-space motion and the matching animation state.
//!
//! ```text
//!   Idle(dir) --request_move--> Walking(dir) --path exhausted--> Idle(dir)
//!       ^                          |   ^
//!       |                          |   +-- held key continues into next tile
//!       +------- unfreeze ---- Frozen (teleport in progress)
//! ```
//!
//! Side effects the owner must act on (animation changes, teleports, private
//! area transitions) are queued as [`MovementEvent`]s and drained each frame.

use std::fmt;

use realm_shared::{
    math::Vec2,
    tile::{Teleporter, TileCoordinate},
};
use tracing::{debug, trace};

use crate::pathfinding::{Path, PathFinder};
use crate::world::TileWorld;

/// Channel id used when the avatar is in the open world.
pub const LOCAL_CHANNEL: &str = "local";

/// Movement speeds are expressed per tick of a 60 Hz loop.
const REFERENCE_TICK_HZ: f32 = 60.0;

/// Facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    /// Tile offset of one step this way.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    /// Facing for a screen-space delta: the larger axis wins, horizontal on ties.
    /// `None` when there is no motion at all.
    pub fn from_delta(dx: f32, dy: f32) -> Option<Direction> {
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        if dx.abs() >= dy.abs() {
            Some(if dx > 0.0 { Direction::Right } else { Direction::Left })
        } else {
            Some(if dy > 0.0 { Direction::Down } else { Direction::Up })
        }
    }
}

/// Sprite animation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationState {
    Idle(Direction),
    Walk(Direction),
}

impl AnimationState {
    pub fn direction(self) -> Direction {
        match self {
            AnimationState::Idle(d) | AnimationState::Walk(d) => d,
        }
    }
}

impl Default for AnimationState {
    fn default() -> Self {
        AnimationState::Idle(Direction::Down)
    }
}

impl fmt::Display for AnimationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnimationState::Idle(d) => write!(f, "idle_{}", d.as_str()),
            AnimationState::Walk(d) => write!(f, "walk_{}", d.as_str()),
        }
    }
}

/// Which input source issued the last move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovementMode {
    Keyboard,
    #[default]
    Mouse,
}

/// Coarse state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementPhase {
    Idle(Direction),
    Walking(Direction),
    Frozen,
}

/// Something the owner of a controller has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum MovementEvent {
    AnimationChanged(AnimationState),
    /// The avatar froze on a teleporter; the owner performs the relocation.
    TeleportRequested(Teleporter),
    /// Proximity channel switched. `private_area` is set when entering a tagged
    /// area (fade its overlay in) and `None` when returning to open world or an
    /// ambient proximity channel (fade out).
    ChannelChanged {
        channel: String,
        private_area: Option<String>,
    },
}

/// Walks one avatar along grid paths.
#[derive(Debug, Clone)]
pub struct MovementController {
    is_local: bool,
    speed: f32,
    max_strikes: u32,

    current_tile: TileCoordinate,
    path: Path,
    path_index: usize,
    target: Option<Vec2>,
    position: Vec2,
    direction: Direction,
    animation: AnimationState,
    frozen: bool,
    mode: MovementMode,
    /// Consecutive unreachable requests from a remote-driven controller.
    strikes: u32,

    channel: String,
    proximity_id: Option<String>,

    events: Vec<MovementEvent>,
}

impl MovementController {
    /// Creates a controller standing on `tile`. `speed` is pixels per 60 Hz tick.
    pub fn new(tile: TileCoordinate, speed: f32, is_local: bool) -> Self {
        Self {
            is_local,
            speed,
            max_strikes: 25,
            current_tile: tile,
            path: Path::new(),
            path_index: 0,
            target: None,
            position: tile.avatar_anchor(),
            direction: Direction::Down,
            animation: AnimationState::default(),
            frozen: false,
            mode: MovementMode::default(),
            strikes: 0,
            channel: LOCAL_CHANNEL.to_string(),
            proximity_id: None,
            events: Vec::new(),
        }
    }

    pub fn with_max_strikes(mut self, max_strikes: u32) -> Self {
        self.max_strikes = max_strikes;
        self
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub fn current_tile(&self) -> TileCoordinate {
        self.current_tile
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn animation(&self) -> AnimationState {
        self.animation
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_walking(&self) -> bool {
        self.target.is_some()
    }

    pub fn mode(&self) -> MovementMode {
        self.mode
    }

    /// Consecutive failed requests; only remote-driven controllers count them.
    pub fn strikes(&self) -> u32 {
        self.strikes
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waypoints not yet reached, including the one being walked to.
    pub fn remaining_path(&self) -> &[TileCoordinate] {
        self.path.get(self.path_index..).unwrap_or(&[])
    }

    pub fn phase(&self) -> MovementPhase {
        if self.frozen {
            MovementPhase::Frozen
        } else if self.target.is_some() {
            MovementPhase::Walking(self.direction)
        } else {
            MovementPhase::Idle(self.direction)
        }
    }

    pub fn drain_events(&mut self) -> Vec<MovementEvent> {
        std::mem::take(&mut self.events)
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    pub fn set_mode(&mut self, mode: MovementMode) {
        self.mode = mode;
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// Ambient proximity channel supplied by the server, if any.
    pub fn set_proximity_id(&mut self, proximity_id: Option<String>, world: &TileWorld) {
        self.proximity_id = proximity_id;
        if self.proximity_id.is_some() {
            self.check_channel(self.current_tile, world);
        }
    }

    /// Places the avatar on `tile` immediately, abandoning any path.
    pub fn set_position(&mut self, tile: TileCoordinate) {
        self.current_tile = tile;
        self.position = tile.avatar_anchor();
        self.path.clear();
        self.path_index = 0;
        self.target = None;
    }

    /// Starts walking to `goal`. Returns whether a walk began.
    ///
    /// Ignored while frozen. For remote-driven controllers every unreachable
    /// goal is a strike and a successful request clears them; past the strike
    /// limit requests are ignored outright.
    pub fn request_move(&mut self, goal: TileCoordinate, world: &TileWorld) -> bool {
        if self.frozen {
            return false;
        }
        if !self.is_local && self.strikes > self.max_strikes {
            return false;
        }

        let finder = PathFinder::new(world.bounds());
        let Some(path) = finder.find_path(self.current_tile, goal, world.blocked()) else {
            if !self.is_local {
                self.strikes += 1;
                debug!(strikes = self.strikes, %goal, "Rejected move request");
            }
            return false;
        };
        if path.is_empty() {
            return false;
        }

        trace!(from = %self.current_tile, to = %goal, steps = path.len(), "Walking");
        self.strikes = 0;
        self.path = path;
        self.path_index = 0;
        self.begin_step(world);
        true
    }

    /// Stops where the avatar stands and shows the idle cycle.
    pub fn halt(&mut self) {
        self.path.clear();
        self.path_index = 0;
        self.target = None;
        self.set_animation(AnimationState::Idle(self.direction), false);
    }

    /// Advances one frame.
    ///
    /// `held` is the most recent movement key still held down; when the path
    /// runs out it continues the walk into the adjacent tile that way.
    pub fn update(&mut self, delta_seconds: f32, world: &TileWorld, held: Option<Direction>) {
        let Some(target) = self.target else {
            return;
        };

        if self.is_local {
            self.check_channel(TileCoordinate::from_screen(self.position), world);
        }

        let step = self.speed * delta_seconds * REFERENCE_TICK_HZ;
        let delta = target.sub(self.position);
        let distance = delta.length();

        if distance <= step {
            self.position = target;
            self.path_index += 1;
            if self.path_index < self.path.len() {
                self.begin_step(world);
            } else {
                self.finish_path(world, held);
            }
            return;
        }

        self.position = self.position.add(delta.scale(step / distance));
        if let Some(dir) = Direction::from_delta(delta.x, delta.y) {
            self.direction = dir;
        }
        self.set_animation(AnimationState::Walk(self.direction), false);
    }

    /// Re-evaluates the proximity channel for `tile`.
    pub fn check_channel(&mut self, tile: TileCoordinate, world: &TileWorld) {
        if !self.is_local {
            return;
        }
        if let Some(area) = world.private_area_at(tile) {
            if area != self.channel {
                self.channel = area.to_string();
                self.events.push(MovementEvent::ChannelChanged {
                    channel: self.channel.clone(),
                    private_area: Some(area.to_string()),
                });
            }
            return;
        }

        let next = self
            .proximity_id
            .clone()
            .unwrap_or_else(|| LOCAL_CHANNEL.to_string());
        if next != self.channel {
            self.channel = next;
            self.events.push(MovementEvent::ChannelChanged {
                channel: self.channel.clone(),
                private_area: None,
            });
        }
    }

    /// Forces the animation state; the sprite cycle restarts only on change
    /// unless `force` is set.
    pub fn set_animation(&mut self, state: AnimationState, force: bool) {
        if self.animation == state && !force {
            return;
        }
        self.animation = state;
        self.events.push(MovementEvent::AnimationChanged(state));
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Targets `path[path_index]` and enters that tile.
    fn begin_step(&mut self, world: &TileWorld) {
        let tile = self.path[self.path_index];
        self.target = Some(tile.avatar_anchor());
        self.current_tile = tile;

        if self.is_local && self.mode == MovementMode::Keyboard && !self.frozen {
            self.try_teleport(world);
        }
    }

    fn finish_path(&mut self, world: &TileWorld, held: Option<Direction>) {
        if self.frozen {
            self.stop();
            return;
        }

        if let Some(dir) = held {
            let (dx, dy) = dir.offset();
            let next = self.current_tile.offset(dx, dy);
            if !world.is_blocked(next) && self.request_move(next, world) {
                return;
            }
        }

        self.stop();
        if self.is_local && self.mode == MovementMode::Mouse {
            self.try_teleport(world);
        }
    }

    fn stop(&mut self) {
        self.halt();
    }

    fn try_teleport(&mut self, world: &TileWorld) {
        if let Some(teleporter) = world.teleporter_at(self.current_tile) {
            debug!(
                tile = %self.current_tile,
                room = teleporter.room_index,
                mode = ?self.mode,
                "Teleporter triggered"
            );
            self.frozen = true;
            self.events.push(MovementEvent::TeleportRequested(teleporter));
        }
    }
}
