//! Depth ordering.
//!
//! Objects that can overlap avatars are drawn back to front by the screen y of
//! their base. A sprite's base is the bottom of the tile it stands on; an
//! avatar's base is its anchor. Floor layers are always underneath and are not
//! sorted here.

use realm_shared::{math::Vec2, tile::TILE_SIZE};

/// Something drawn in the sorted layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Drawable {
    /// Index into `TileWorld::placements`.
    Sprite(usize),
    LocalAvatar,
    Remote(String),
}

/// Sort key of a sprite standing on tile row `tile_y`.
pub fn sprite_depth(tile_y: i32) -> f32 {
    (tile_y * TILE_SIZE + TILE_SIZE) as f32
}

pub fn avatar_depth(position: Vec2) -> f32 {
    position.y
}

/// Back-to-front order. Equal depths keep their input order.
pub fn depth_sort(mut items: Vec<(Drawable, f32)>) -> Vec<Drawable> {
    items.sort_by(|a, b| a.1.total_cmp(&b.1));
    items.into_iter().map(|(d, _)| d).collect()
}
