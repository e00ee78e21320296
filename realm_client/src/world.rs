//! Tile world.
//!
//! Owns a private copy of the realm and the parsed state of the active room:
//! tile definitions, sprite placements per layer, and the blocked set. Every
//! system that needs map data borrows it from here.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use realm_shared::{
    math::Rect,
    realm::{RealmData, Room, Spawnpoint},
    sprite::SpriteMetadata,
    tile::{parse_tile_entry, Layer, SchemaError, Teleporter, TileCoordinate, TileDefinition},
};
use tracing::{debug, info};

use crate::pathfinding::TileBounds;

/// Tiles an avatar may not occupy.
pub type BlockedSet = HashSet<TileCoordinate>;

/// A sprite placed on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct SpritePlacement {
    pub tile: TileCoordinate,
    pub layer: Layer,
    pub sprite: String,
    pub bounds: Rect,
}

/// Room loading errors.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldError {
    Schema(SchemaError),
    UnknownSprite { tile: TileCoordinate, sprite: String },
    NoSuchRoom { index: usize, rooms: usize },
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::Schema(e) => write!(f, "{e}"),
            WorldError::UnknownSprite { tile, sprite } => {
                write!(f, "unknown sprite {sprite:?} at ({tile})")
            }
            WorldError::NoSuchRoom { index, rooms } => {
                write!(f, "room {index} does not exist ({rooms} rooms)")
            }
        }
    }
}

impl std::error::Error for WorldError {}

impl From<SchemaError> for WorldError {
    fn from(e: SchemaError) -> Self {
        WorldError::Schema(e)
    }
}

/// Parsed contents of one room; built completely before it replaces the old one.
#[derive(Default)]
struct RoomState {
    name: String,
    tiles: HashMap<TileCoordinate, TileDefinition>,
    placements: Vec<SpritePlacement>,
    colliders_from_sprites: HashSet<TileCoordinate>,
}

/// Authoritative static map of the active room.
pub struct TileWorld {
    realm: RealmData,
    sprites: Arc<dyn SpriteMetadata>,
    current_room: usize,
    room: RoomState,
    blocked: BlockedSet,
}

impl TileWorld {
    /// Copies `realm`; the caller keeps ownership of its data.
    pub fn new(realm: &RealmData, sprites: Arc<dyn SpriteMetadata>) -> Self {
        Self {
            realm: realm.clone(),
            sprites,
            current_room: realm.spawnpoint.room_index,
            room: RoomState::default(),
            blocked: BlockedSet::new(),
        }
    }

    /// Loads a room of the owned realm by index.
    pub fn load_room(&mut self, index: usize) -> Result<(), WorldError> {
        let room = self
            .realm
            .room(index)
            .cloned()
            .ok_or(WorldError::NoSuchRoom {
                index,
                rooms: self.realm.rooms.len(),
            })?;
        self.load(&room)?;
        self.current_room = index;
        Ok(())
    }

    /// Replaces the active room's state with `room`.
    ///
    /// On error the previous room stays loaded.
    pub fn load(&mut self, room: &Room) -> Result<(), WorldError> {
        let mut state = RoomState {
            name: room.name.clone(),
            ..RoomState::default()
        };

        for (key, value) in &room.tilemap {
            let (coord, tile) = parse_tile_entry(key, value)?;
            for layer in Layer::ALL {
                let Some(sprite_id) = tile.sprite(layer) else {
                    continue;
                };
                let info = self
                    .sprites
                    .sprite(sprite_id)
                    .ok_or_else(|| WorldError::UnknownSprite {
                        tile: coord,
                        sprite: sprite_id.to_string(),
                    })?;
                state.colliders_from_sprites.extend(info.collider_tiles(coord));
                state.placements.push(SpritePlacement {
                    tile: coord,
                    layer,
                    sprite: sprite_id.to_string(),
                    bounds: info.bounds_at(coord),
                });
            }
            state.tiles.insert(coord, tile);
        }

        self.room = state;
        self.blocked = self.compute_blocked();
        info!(
            room = %self.room.name,
            tiles = self.room.tiles.len(),
            sprites = self.room.placements.len(),
            blocked = self.blocked.len(),
            "Room loaded"
        );
        Ok(())
    }

    /// Impassable tiles plus tiles covered by sprite colliders.
    pub fn compute_blocked(&self) -> BlockedSet {
        let mut blocked: BlockedSet = self
            .room
            .tiles
            .iter()
            .filter(|(_, tile)| tile.impassable)
            .map(|(coord, _)| *coord)
            .collect();
        let impassable = blocked.len();
        blocked.extend(self.room.colliders_from_sprites.iter().copied());
        debug!(
            impassable,
            colliders = self.room.colliders_from_sprites.len(),
            "Blocked set computed"
        );
        blocked
    }

    pub fn blocked(&self) -> &BlockedSet {
        &self.blocked
    }

    pub fn is_blocked(&self, tile: TileCoordinate) -> bool {
        self.blocked.contains(&tile)
    }

    pub fn tile(&self, coord: TileCoordinate) -> Option<&TileDefinition> {
        self.room.tiles.get(&coord)
    }

    pub fn teleporter_at(&self, coord: TileCoordinate) -> Option<Teleporter> {
        self.tile(coord).and_then(|t| t.teleporter)
    }

    pub fn private_area_at(&self, coord: TileCoordinate) -> Option<&str> {
        self.tile(coord).and_then(|t| t.private_area_id.as_deref())
    }

    /// Every tile tagged with `area_id`, in key order.
    pub fn tiles_in_private_area(&self, area_id: &str) -> Vec<TileCoordinate> {
        let mut tiles: Vec<_> = self
            .room
            .tiles
            .iter()
            .filter(|(_, t)| t.private_area_id.as_deref() == Some(area_id))
            .map(|(c, _)| *c)
            .collect();
        tiles.sort();
        tiles
    }

    pub fn placements(&self) -> &[SpritePlacement] {
        &self.room.placements
    }

    /// Search rectangle for pathfinding: every authored tile plus a one-tile rim.
    pub fn bounds(&self) -> TileBounds {
        TileBounds::enclosing(self.room.tiles.keys().copied()).expand(1)
    }

    pub fn spawnpoint(&self) -> Spawnpoint {
        self.realm.spawnpoint
    }

    pub fn current_room_index(&self) -> usize {
        self.current_room
    }

    pub fn room_name(&self) -> &str {
        &self.room.name
    }

    pub fn room_count(&self) -> usize {
        self.realm.rooms.len()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn blocked_set_unions_impassable_and_colliders() {
        let mut room = open_room("yard", 6, 6);
        set_tile(&mut room, 1, 1, json!({ "floor": "ground-grass", "impassable": true }));
        // 64px tree on (4, 3): top-left cell is (4, 2), collider +1 row -> (4, 3).
        set_tile(&mut room, 4, 3, json!({ "floor": "ground-grass", "object": "grasslands-tree" }));
        let world = world(vec![room]);

        let mut blocked: Vec<_> = world.blocked().iter().copied().collect();
        blocked.sort();
        assert_eq!(blocked, vec![TileCoordinate::new(1, 1), TileCoordinate::new(4, 3)]);
        assert_eq!(world.compute_blocked(), *world.blocked());
    }

    #[test]
    fn malformed_key_fails_the_load() {
        let mut room = open_room("yard", 2, 2);
        room.tilemap.insert("3,3".to_string(), json!({}));
        let realm = realm(vec![room], (0, 0));
        let mut world = TileWorld::new(&realm, catalog());
        let err = world.load_room(0).unwrap_err();
        assert!(matches!(err, WorldError::Schema(SchemaError::InvalidKey(_))));
    }

    #[test]
    fn out_of_range_key_fails_the_load_instead_of_overflowing() {
        let mut room = open_room("hall", 2, 1);
        set_tile(&mut room, 100_000_000, 0, json!({ "floor": "ground-grass" }));
        let realm = realm(vec![room], (0, 0));
        let mut world = TileWorld::new(&realm, catalog());
        let err = world.load_room(0).unwrap_err();
        assert!(matches!(err, WorldError::Schema(SchemaError::InvalidKey(_))));
    }

    #[test]
    fn aliased_keys_are_rejected() {
        let mut room = open_room("hall", 2, 1);
        room.tilemap.insert("-0, 0".to_string(), json!({ "impassable": true }));
        let realm = realm(vec![room], (0, 0));
        let mut world = TileWorld::new(&realm, catalog());
        let err = world.load_room(0).unwrap_err();
        assert!(matches!(err, WorldError::Schema(SchemaError::InvalidKey(_))));
    }

    #[test]
    fn failed_load_keeps_previous_room() {
        let mut bad = open_room("bad", 2, 2);
        set_tile(&mut bad, 0, 0, json!({ "object": "nowhere-statue" }));
        let mut good = open_room("good", 3, 3);
        set_tile(&mut good, 2, 2, json!({ "impassable": true }));
        let mut world = world(vec![good, bad]);

        let err = world.load_room(1).unwrap_err();
        assert!(matches!(err, WorldError::UnknownSprite { .. }));
        assert_eq!(world.current_room_index(), 0);
        assert_eq!(world.room_name(), "good");
        assert!(world.is_blocked(TileCoordinate::new(2, 2)));

        assert!(matches!(
            world.load_room(7),
            Err(WorldError::NoSuchRoom { index: 7, rooms: 2 })
        ));
    }

    #[test]
    fn reload_clears_previous_colliders() {
        let mut first = open_room("first", 4, 4);
        set_tile(&mut first, 2, 2, json!({ "object": "grasslands-tree" }));
        let second = open_room("second", 4, 4);
        let mut world = world(vec![first, second]);
        assert!(!world.blocked().is_empty());

        world.load_room(1).unwrap();
        assert!(world.blocked().is_empty());
        assert_eq!(world.current_room_index(), 1);
    }

    #[test]
    fn caller_realm_is_not_aliased() {
        let mut realm = realm(vec![open_room("yard", 2, 2)], (0, 0));
        let mut world = TileWorld::new(&realm, catalog());
        realm.rooms[0].tilemap.clear();
        world.load_room(0).unwrap();
        assert_eq!(world.placements().len(), 4);
    }

    #[test]
    fn private_area_queries() {
        let mut room = open_room("office", 3, 1);
        set_tile(&mut room, 1, 0, json!({ "privateAreaId": "desk" }));
        set_tile(&mut room, 2, 0, json!({ "privateAreaId": "desk" }));
        let world = world(vec![room]);
        assert_eq!(world.private_area_at(TileCoordinate::new(1, 0)), Some("desk"));
        assert_eq!(world.private_area_at(TileCoordinate::new(0, 0)), None);
        assert_eq!(
            world.tiles_in_private_area("desk"),
            vec![TileCoordinate::new(1, 0), TileCoordinate::new(2, 0)]
        );
    }

    #[test]
    fn bounds_cover_authored_tiles_with_rim() {
        let world = world(vec![open_room("yard", 3, 2)]);
        let b = world.bounds();
        assert!(b.contains(TileCoordinate::new(-1, -1)));
        assert!(b.contains(TileCoordinate::new(3, 2)));
        assert!(!b.contains(TileCoordinate::new(4, 0)));
    }
}
