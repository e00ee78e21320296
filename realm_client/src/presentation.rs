//! Presentation topics.
//!
//! The engine does not draw. Everything a renderer needs to react to is pushed
//! onto the gameplay controller's [`EventBus`](realm_shared::event::EventBus)
//! as one of these types, and the host drains the topics it cares about after
//! each frame.

use realm_shared::{math::Vec2, tile::TileCoordinate};

use crate::culling::RenderId;
use crate::depth::Drawable;
use crate::movement::AnimationState;
use crate::sync::{ConnectionState, JoinError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fade {
    In,
    Out,
}

/// Whole-screen fade around a teleport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenFade {
    pub fade: Fade,
    pub duration: f32,
}

/// Overlay fade over the tiles of a private area.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateAreaFade {
    pub fade: Fade,
    /// The area entered; `None` when leaving to open world.
    pub area_id: Option<String>,
    pub tiles: Vec<TileCoordinate>,
}

/// Which avatar a notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AvatarRef {
    Local,
    Remote(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarSpawned {
    pub avatar: AvatarRef,
    pub display_name: Option<String>,
    pub skin: String,
    pub position: Vec2,
    pub render_id: RenderId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarDespawned {
    pub avatar: AvatarRef,
    pub render_id: RenderId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarRenamed {
    pub avatar: AvatarRef,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationChanged {
    pub avatar: AvatarRef,
    pub state: AnimationState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkinChanged {
    pub avatar: AvatarRef,
    pub skin: String,
}

/// The local avatar now stands in another room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomChanged {
    pub room_index: usize,
    pub room_name: String,
}

/// Draw order of the sorted layer changed.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthOrderChanged(pub Vec<Drawable>);

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionChanged {
    pub state: ConnectionState,
}

/// The proximity channel the local avatar belongs to changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelChanged {
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinFailed {
    pub error: JoinError,
}
