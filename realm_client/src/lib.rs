//! `realm_client`
//!
//! Client-side systems:
//! - Tile world and collision derivation for the active room
//! - Grid pathfinding and per-avatar movement
//! - Remote avatar smoothing from network position events
//! - Room join and realtime channel management
//! - Frustum culling, camera and depth ordering
//! - The gameplay controller that runs them in frame order

pub mod camera;
pub mod culling;
pub mod depth;
pub mod gameplay;
pub mod input;
pub mod movement;
pub mod pathfinding;
pub mod presentation;
pub mod remote;
pub mod sync;
pub mod world;

pub use gameplay::GameplayController;
pub use sync::NetworkSyncClient;
pub use world::TileWorld;
