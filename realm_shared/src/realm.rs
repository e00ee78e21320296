//! Realm content: rooms and the spawnpoint.
//!
//! Tilemaps are kept exactly as authored (key string -> raw JSON object) and are
//! validated when a room is loaded into the world, so one malformed entry fails
//! that load instead of being silently coerced during deserialization.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tile::TileCoordinate;

/// Where new avatars appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spawnpoint {
    pub room_index: usize,
    pub x: i32,
    pub y: i32,
}

impl Spawnpoint {
    pub fn tile(&self) -> TileCoordinate {
        TileCoordinate::new(self.x, self.y)
    }
}

/// One room of the realm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub name: String,
    #[serde(default)]
    pub tilemap: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

/// All static content of a realm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmData {
    pub spawnpoint: Spawnpoint,
    pub rooms: Vec<Room>,
}

impl RealmData {
    /// Parses realm data from JSON.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let realm: RealmData = serde_json::from_str(s).context("parse realm data")?;
        if realm.spawnpoint.room_index >= realm.rooms.len() {
            anyhow::bail!(
                "spawnpoint room {} out of range ({} rooms)",
                realm.spawnpoint.room_index,
                realm.rooms.len()
            );
        }
        debug!(rooms = realm.rooms.len(), spawn_room = realm.spawnpoint.room_index, "Realm data parsed");
        Ok(realm)
    }

    pub fn room(&self, index: usize) -> Option<&Room> {
        self.rooms.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_parses_camel_case_fields() {
        let realm = RealmData::from_json_str(
            r#"{
                "spawnpoint": { "roomIndex": 0, "x": 3, "y": 4 },
                "rooms": [
                    { "name": "lobby", "tilemap": { "0, 0": { "floor": "ground-grass" } }, "channelId": "c1" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(realm.spawnpoint.tile(), TileCoordinate::new(3, 4));
        assert_eq!(realm.rooms[0].channel_id.as_deref(), Some("c1"));
        assert_eq!(realm.rooms[0].tilemap.len(), 1);
    }

    #[test]
    fn spawnpoint_must_name_an_existing_room() {
        let err = RealmData::from_json_str(
            r#"{ "spawnpoint": { "roomIndex": 2, "x": 0, "y": 0 }, "rooms": [ { "name": "a" } ] }"#,
        );
        assert!(err.is_err());
    }
}
