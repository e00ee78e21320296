//! Tile grid primitives and the tile content schema.
//!
//! # Coordinate keys
//! Tilemaps are authored as JSON objects keyed by `"<x>, <y>"`: one comma, one
//! space, optional leading minus, decimal digits without leading zeros, and a
//! magnitude of at most [`MAX_TILE_COMPONENT`]. The same string is used as the
//! network and storage key, so parsing is strict and re-serializing a parsed key
//! yields the identical string.
//!
//! # Screen space
//! Tiles are 32x32 pixels. Tile (x, y) covers screen `[x*32, x*32+32)` on each
//! axis; an avatar standing on it is drawn at `(x*32 + 16, y*32 + 24)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Tile edge length in pixels.
pub const TILE_SIZE: i32 = 32;

/// Largest magnitude a key component may have; keeps pixel math in range.
pub const MAX_TILE_COMPONENT: i32 = i32::MAX / TILE_SIZE - 1;

/// Integer tile position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileCoordinate {
    pub x: i32,
    pub y: i32,
}

impl TileCoordinate {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }

    /// Manhattan distance in tiles.
    pub fn manhattan(self, other: Self) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// True when the two tiles share an edge.
    pub fn is_adjacent(self, other: Self) -> bool {
        self.manhattan(other) == 1
    }

    /// Canonical `"x, y"` key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Top-left pixel of the tile.
    pub fn to_screen(self) -> Vec2 {
        let size = TILE_SIZE as f32;
        Vec2::new(self.x as f32 * size, self.y as f32 * size)
    }

    /// Pixel an avatar standing on this tile is drawn at.
    pub fn avatar_anchor(self) -> Vec2 {
        self.to_screen().add(Vec2::new((TILE_SIZE / 2) as f32, 24.0))
    }

    /// Tile containing a screen pixel.
    pub fn from_screen(p: Vec2) -> Self {
        let size = TILE_SIZE as f32;
        Self::new((p.x / size).floor() as i32, (p.y / size).floor() as i32)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.x, self.y)
    }
}

impl FromStr for TileCoordinate {
    type Err = TileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (xs, ys) = s
            .split_once(", ")
            .ok_or_else(|| TileKeyError::new(s, "expected \"<int>, <int>\""))?;
        let x = parse_component(s, xs)?;
        let y = parse_component(s, ys)?;
        Ok(Self::new(x, y))
    }
}

fn parse_component(key: &str, part: &str) -> Result<i32, TileKeyError> {
    let digits = part.strip_prefix('-').unwrap_or(part);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TileKeyError::new(key, "component is not a decimal integer"));
    }
    // One spelling per coordinate: "-0" and "01" would alias "0" and "1".
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(TileKeyError::new(key, "component has a leading zero"));
    }
    if part == "-0" {
        return Err(TileKeyError::new(key, "component is negative zero"));
    }
    let value: i32 = part
        .parse()
        .map_err(|_| TileKeyError::new(key, "component out of range"))?;
    if value.unsigned_abs() > MAX_TILE_COMPONENT as u32 {
        return Err(TileKeyError::new(key, "component out of range"));
    }
    Ok(value)
}

impl Serialize for TileCoordinate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TileCoordinate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A tile key that does not match `"<int>, <int>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileKeyError {
    pub key: String,
    pub reason: &'static str,
}

impl TileKeyError {
    fn new(key: &str, reason: &'static str) -> Self {
        Self {
            key: key.to_string(),
            reason,
        }
    }
}

impl fmt::Display for TileKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tile key {:?}: {}", self.key, self.reason)
    }
}

impl std::error::Error for TileKeyError {}

/// Visual layers, bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Floor,
    AboveFloor,
    Object,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Floor, Layer::AboveFloor, Layer::Object];

    pub fn mask(self) -> LayerMask {
        match self {
            Layer::Floor => LayerMask::FLOOR,
            Layer::AboveFloor => LayerMask::ABOVE_FLOOR,
            Layer::Object => LayerMask::OBJECT,
        }
    }
}

bitflags::bitflags! {
    /// Which sprite layers a tile populates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LayerMask: u8 {
        const FLOOR = 1 << 0;
        const ABOVE_FLOOR = 1 << 1;
        const OBJECT = 1 << 2;
    }
}

/// Destination of a teleporter tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teleporter {
    pub room_index: usize,
    pub x: i32,
    pub y: i32,
}

impl Teleporter {
    pub fn target_tile(&self) -> TileCoordinate {
        TileCoordinate::new(self.x, self.y)
    }
}

/// One authored tile. Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TileDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub above_floor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub impassable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teleporter: Option<Teleporter>,
    #[serde(
        default,
        rename = "privateAreaId",
        skip_serializing_if = "Option::is_none"
    )]
    pub private_area_id: Option<String>,
}

impl TileDefinition {
    /// Sprite id placed on `layer`, if any.
    pub fn sprite(&self, layer: Layer) -> Option<&str> {
        match layer {
            Layer::Floor => self.floor.as_deref(),
            Layer::AboveFloor => self.above_floor.as_deref(),
            Layer::Object => self.object.as_deref(),
        }
    }

    pub fn layers(&self) -> LayerMask {
        Layer::ALL
            .into_iter()
            .filter(|layer| self.sprite(*layer).is_some())
            .fold(LayerMask::empty(), |mask, layer| mask | layer.mask())
    }
}

/// A tilemap entry that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidKey(TileKeyError),
    InvalidTile { key: String, reason: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::InvalidKey(e) => write!(f, "{e}"),
            SchemaError::InvalidTile { key, reason } => {
                write!(f, "invalid tile definition at {key:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

impl From<TileKeyError> for SchemaError {
    fn from(e: TileKeyError) -> Self {
        SchemaError::InvalidKey(e)
    }
}

/// Validates one raw tilemap entry.
pub fn parse_tile_entry(
    key: &str,
    value: &serde_json::Value,
) -> Result<(TileCoordinate, TileDefinition), SchemaError> {
    let coord: TileCoordinate = key.parse()?;
    let tile = TileDefinition::deserialize(value).map_err(|e| SchemaError::InvalidTile {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok((coord, tile))
}
