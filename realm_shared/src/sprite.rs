//! Sprite metadata consumed from the asset side.
//!
//! Sprite ids are `"<sheet>-<sprite>"`. The world only needs each sprite's pixel
//! size (to locate its anchor) and its collider offsets; textures stay with the
//! renderer.
//!
//! Placement convention: a sprite of height `h` placed on tile (x, y) is
//! anchored at `(0, 1 - 32/h)`, i.e. its bottom 32px row sits on the tile and
//! taller sprites extend upwards. Collider offsets are relative to the grid cell
//! of the sprite's top-left corner.

use std::collections::HashMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::math::{Rect, Vec2};
use crate::tile::{Layer, TileCoordinate, TILE_SIZE};

/// Offset, in tiles, of a blocked cell relative to a sprite's top-left cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColliderOffset {
    pub x: i32,
    pub y: i32,
}

/// What the world needs to know about one sprite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpriteInfo {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<Layer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub colliders: Vec<ColliderOffset>,
}

impl SpriteInfo {
    /// Screen-space bounds when placed on `tile`.
    pub fn bounds_at(&self, tile: TileCoordinate) -> Rect {
        let origin = tile.to_screen();
        let top = origin.y + TILE_SIZE as f32 - self.height as f32;
        Rect::from_origin_size(
            Vec2::new(origin.x, top),
            self.width as f32,
            self.height as f32,
        )
    }

    /// Grid cell of the sprite's top-left corner when placed on `tile`.
    pub fn anchor_cell(&self, tile: TileCoordinate) -> TileCoordinate {
        TileCoordinate::from_screen(self.bounds_at(tile).min)
    }

    /// Tiles blocked by this sprite when placed on `tile`.
    pub fn collider_tiles(&self, tile: TileCoordinate) -> impl Iterator<Item = TileCoordinate> + '_ {
        let anchor = self.anchor_cell(tile);
        self.colliders
            .iter()
            .map(move |c| anchor.offset(c.x, c.y))
    }
}

/// Source of sprite metadata.
pub trait SpriteMetadata: Send + Sync {
    fn sprite(&self, id: &str) -> Option<&SpriteInfo>;
}

/// In-memory catalog keyed by full sprite id (`"sheet-sprite"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpriteCatalog {
    sprites: HashMap<String, SpriteInfo>,
}

impl SpriteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog from JSON: `{ "sprites": { "<id>": { ... } } }`.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("parse sprite catalog")
    }

    pub fn insert(&mut self, id: impl Into<String>, info: SpriteInfo) {
        self.sprites.insert(id.into(), info);
    }

    pub fn len(&self) -> usize {
        self.sprites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sprites.is_empty()
    }
}

impl SpriteMetadata for SpriteCatalog {
    fn sprite(&self, id: &str) -> Option<&SpriteInfo> {
        self.sprites.get(id)
    }
}
