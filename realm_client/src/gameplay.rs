//! Gameplay controller.
//!
//! Composes the world, the local avatar, remote avatars, the network client,
//! the camera and the culler into one `frame` call. The host owns the loop and
//! calls `frame` once per rendered frame; input handlers only record into
//! [`InputState`] and are applied at the start of the next frame.
//!
//! Frame order:
//! 1. network notices
//! 2. deferred input
//! 3. local movement
//! 4. teleport sequencing
//! 5. remote smoothing
//! 6. camera
//! 7. depth sort
//! 8. culling
//! 9. position broadcast

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use realm_shared::{
    config::ClientConfig,
    event::EventBus,
    math::{Rect, Vec2},
    net::{RoomSnapshot, ServerEvent},
    realm::RealmData,
    sprite::SpriteMetadata,
    tile::{Layer, Teleporter, TileCoordinate},
};
use tracing::{debug, info, trace, warn};

use crate::{
    camera::Camera,
    culling::{RenderId, VisibilityCuller},
    depth::{avatar_depth, depth_sort, sprite_depth, Drawable},
    input::{InputCommand, InputState},
    movement::{MovementController, MovementEvent, MovementMode},
    presentation::{
        AnimationChanged, AvatarDespawned, AvatarRef, AvatarRenamed, AvatarSpawned, ChannelChanged,
        ConnectionChanged, DepthOrderChanged, Fade, JoinFailed, PrivateAreaFade, RoomChanged,
        ScreenFade, SkinChanged,
    },
    remote::{RemoteEntityReconciler, RemoteEvent},
    sync::{JoinError, NetworkSyncClient, SyncNotice},
    world::{TileWorld, WorldError},
};

/// Screen-space box of an avatar standing at `anchor`.
pub fn avatar_bounds(anchor: Vec2) -> Rect {
    Rect::from_origin_size(Vec2::new(anchor.x - 16.0, anchor.y - 40.0), 32.0, 48.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TeleportPhase {
    FadingOut,
    FadingIn,
}

#[derive(Debug, Clone, Copy)]
struct TeleportSequence {
    target: Teleporter,
    phase: TeleportPhase,
    elapsed: f32,
}

/// The playable world: one local avatar in a room shared with remote peers.
pub struct GameplayController {
    config: ClientConfig,
    world: TileWorld,
    local: MovementController,
    local_skin: String,
    local_render: RenderId,
    input: InputState,
    remotes: RemoteEntityReconciler,
    remote_render: HashMap<String, RenderId>,
    sync: NetworkSyncClient,
    camera: Camera,
    culler: VisibilityCuller,
    sprite_render: Vec<RenderId>,
    teleport: Option<TeleportSequence>,
    private_area: Option<String>,
    /// Object-layer sort keys of the loaded room.
    depth_sprites: Vec<(Drawable, f32)>,
    /// Avatar keys the current `depth_order` was sorted with.
    depth_local: Option<f32>,
    depth_remotes: HashMap<String, f32>,
    depth_dirty: bool,
    depth_sorts: u64,
    depth_order: Vec<Drawable>,
    room_id: Option<String>,
    bus: EventBus,
}

impl GameplayController {
    /// Loads the spawn room and places the local avatar on the spawnpoint.
    pub fn new(
        config: ClientConfig,
        realm: &RealmData,
        sprites: Arc<dyn SpriteMetadata>,
        sync: NetworkSyncClient,
    ) -> Result<Self, WorldError> {
        let mut world = TileWorld::new(realm, sprites);
        let spawn = realm.spawnpoint;
        world.load_room(spawn.room_index)?;

        let local = MovementController::new(spawn.tile(), config.movement_speed, true)
            .with_max_strikes(config.max_strikes);
        let mut camera = Camera::new(config.camera_scale, config.screen_width, config.screen_height);
        camera.follow(local.position());
        let mut culler = VisibilityCuller::new(config.culling.clone());
        let local_render = culler.register(avatar_bounds(local.position()));

        let mut controller = Self {
            remotes: RemoteEntityReconciler::new(config.remote_lerp, config.skin.clone()),
            local_skin: config.skin.clone(),
            config,
            world,
            local,
            local_render,
            input: InputState::new(),
            remote_render: HashMap::new(),
            sync,
            camera,
            culler,
            sprite_render: Vec::new(),
            teleport: None,
            private_area: None,
            depth_sprites: Vec::new(),
            depth_local: None,
            depth_remotes: HashMap::new(),
            depth_dirty: true,
            depth_sorts: 0,
            depth_order: Vec::new(),
            room_id: None,
            bus: EventBus::default(),
        };
        controller.register_room_sprites();
        controller.bus.push(AvatarSpawned {
            avatar: AvatarRef::Local,
            display_name: Some(controller.config.player_name.clone()),
            skin: controller.local_skin.clone(),
            position: controller.local.position(),
            render_id: local_render,
        });
        controller.push_room_changed();
        Ok(controller)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn world(&self) -> &TileWorld {
        &self.world
    }

    pub fn local(&self) -> &MovementController {
        &self.local
    }

    pub fn remotes(&self) -> &RemoteEntityReconciler {
        &self.remotes
    }

    pub fn sync(&self) -> &NetworkSyncClient {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut NetworkSyncClient {
        &mut self.sync
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn culler(&self) -> &VisibilityCuller {
        &self.culler
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn is_teleporting(&self) -> bool {
        self.teleport.is_some()
    }

    /// Presentation topics produced so far; drain after each frame.
    pub fn events(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    // -------------------------------------------------------------------------
    // Host-facing commands
    // -------------------------------------------------------------------------

    /// Joins a room as the configured player.
    pub fn join(&mut self, room_id: Option<&str>) -> Result<(), JoinError> {
        let identity = self.config.player_name.clone();
        self.sync.join(&identity, room_id)
    }

    /// Leaves the room and forgets every peer.
    pub fn leave(&mut self) {
        info!("Leaving room");
        self.sync.leave();
        self.room_id = None;
        self.remotes.clear();
        self.apply_remote_events();
        self.bus.push(ConnectionChanged {
            state: self.sync.state(),
        });
    }

    pub fn key_down(&mut self, key: &str) -> bool {
        self.input.key_down(key)
    }

    pub fn key_up(&mut self, key: &str) {
        self.input.key_up(key);
    }

    /// Click at a screen point; walks to the tile under it.
    pub fn click_screen(&mut self, point: Vec2) -> bool {
        let world = self.camera.screen_to_world(point);
        self.input.click(TileCoordinate::from_screen(world))
    }

    pub fn click_tile(&mut self, tile: TileCoordinate) -> bool {
        self.input.click(tile)
    }

    /// Blocks keyboard and mouse movement, e.g. while a text field has focus.
    pub fn set_input_enabled(&mut self, enabled: bool) {
        debug!(enabled, "Input toggled");
        self.input.set_enabled(enabled);
    }

    pub fn set_skin(&mut self, skin: &str) {
        if self.local_skin == skin {
            return;
        }
        self.local_skin = skin.to_string();
        self.bus.push(SkinChanged {
            avatar: AvatarRef::Local,
            skin: skin.to_string(),
        });
    }

    /// Ambient proximity channel assigned by the server.
    pub fn set_proximity_id(&mut self, proximity_id: Option<String>) {
        self.local.set_proximity_id(proximity_id, &self.world);
        self.apply_local_events();
    }

    pub fn set_culling_enabled(&mut self, enabled: bool) {
        for change in self.culler.set_enabled(enabled) {
            self.bus.push(change);
        }
    }

    pub fn send_chat(&mut self, message: &str) -> bool {
        self.sync.send_chat(message)
    }

    // -------------------------------------------------------------------------
    // Frame
    // -------------------------------------------------------------------------

    /// Advances the whole simulation by `delta`.
    pub fn frame(&mut self, delta: Duration) {
        let dt = delta.as_secs_f32();

        for notice in self.sync.poll() {
            self.apply_notice(notice);
        }

        self.apply_input();

        self.local.update(dt, &self.world, self.input.held());
        self.apply_local_events();

        self.advance_teleport(dt);

        self.remotes.update();
        self.apply_remote_events();
        for avatar in self.remotes.iter() {
            if let Some(id) = self.remote_render.get(&avatar.id) {
                self.culler.update_bounds(*id, avatar_bounds(avatar.smoothed));
            }
        }

        self.camera.follow(self.local.position());

        self.sort_depth();

        self.culler
            .update_bounds(self.local_render, avatar_bounds(self.local.position()));
        for change in self.culler.update(self.camera.viewport(), self.camera.pivot()) {
            self.bus.push(change);
        }

        self.sync.tick(delta, self.local.position());
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn apply_notice(&mut self, notice: SyncNotice) {
        match notice {
            SyncNotice::Joined(snapshot) => self.apply_snapshot(snapshot),
            SyncNotice::JoinFailed(error) => self.bus.push(JoinFailed { error }),
            SyncNotice::Connected { .. } | SyncNotice::ConnectFailed { .. } => {
                self.bus.push(ConnectionChanged {
                    state: self.sync.state(),
                });
            }
            SyncNotice::Disconnected { reason } => {
                info!(reason = %reason, "Disconnected; clearing remote avatars");
                self.remotes.clear();
                self.apply_remote_events();
                self.bus.push(ConnectionChanged {
                    state: self.sync.state(),
                });
            }
            SyncNotice::Event(event) => self.apply_server_event(event),
        }
    }

    fn apply_snapshot(&mut self, snapshot: RoomSnapshot) {
        let identity = self.config.player_name.clone();
        info!(room = %snapshot.room_id, players = snapshot.players.len(), "Applying roster");

        self.remotes.clear();
        self.remotes.set_local_id(Some(identity.clone()));
        for player in &snapshot.players {
            self.remotes.on_position_event(&player.id, player.position, None);
        }
        self.apply_remote_events();

        let spawn = self.world.spawnpoint();
        if let Err(e) = self.relocate(spawn.room_index, spawn.tile()) {
            warn!(error = %e, "Could not load spawn room");
        }
        self.room_id = Some(snapshot.room_id);

        if let Err(e) = self.sync.connect(&identity) {
            warn!(error = %e, "Could not open realtime channel");
        }
    }

    fn apply_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::PositionUpdate {
                player_id,
                position,
                username,
            }
            | ServerEvent::PlayerJoined {
                player_id,
                position,
                username,
            } => {
                self.remotes
                    .on_position_event(&player_id, position, username.as_deref());
            }
            ServerEvent::PlayerLeft { player_id } => {
                self.remotes.on_leave(&player_id);
            }
        }
        self.apply_remote_events();
    }

    fn apply_input(&mut self) {
        let commands = self.input.drain();
        if self.local.is_frozen() {
            return;
        }
        for command in commands {
            match command {
                InputCommand::Step(dir) => {
                    if self.local.is_walking() {
                        continue;
                    }
                    let (dx, dy) = dir.offset();
                    let target = self.local.current_tile().offset(dx, dy);
                    self.local.set_mode(MovementMode::Keyboard);
                    self.local.request_move(target, &self.world);
                }
                InputCommand::MoveTo(tile) => {
                    self.local.set_mode(MovementMode::Mouse);
                    self.local.request_move(tile, &self.world);
                }
            }
        }
    }

    fn apply_local_events(&mut self) {
        for event in self.local.drain_events() {
            match event {
                MovementEvent::AnimationChanged(state) => self.bus.push(AnimationChanged {
                    avatar: AvatarRef::Local,
                    state,
                }),
                MovementEvent::TeleportRequested(target) => {
                    if self.teleport.is_some() {
                        continue;
                    }
                    info!(room = target.room_index, x = target.x, y = target.y, "Teleporting");
                    self.teleport = Some(TeleportSequence {
                        target,
                        phase: TeleportPhase::FadingOut,
                        elapsed: 0.0,
                    });
                    self.bus.push(ScreenFade {
                        fade: Fade::Out,
                        duration: self.config.fade_duration,
                    });
                }
                MovementEvent::ChannelChanged {
                    channel,
                    private_area,
                } => {
                    self.bus.push(ChannelChanged { channel });
                    match private_area {
                        Some(area) => {
                            self.bus.push(PrivateAreaFade {
                                fade: Fade::In,
                                tiles: self.world.tiles_in_private_area(&area),
                                area_id: Some(area.clone()),
                            });
                            self.private_area = Some(area);
                        }
                        None => {
                            let tiles = self
                                .private_area
                                .take()
                                .map(|a| self.world.tiles_in_private_area(&a))
                                .unwrap_or_default();
                            self.bus.push(PrivateAreaFade {
                                fade: Fade::Out,
                                area_id: None,
                                tiles,
                            });
                        }
                    }
                }
            }
        }
    }

    fn advance_teleport(&mut self, dt: f32) {
        let Some(mut seq) = self.teleport else {
            return;
        };
        seq.elapsed += dt;
        let duration = self.config.fade_duration;

        match seq.phase {
            TeleportPhase::FadingOut if seq.elapsed >= duration => {
                let target = seq.target;
                if let Err(e) = self.relocate(target.room_index, target.target_tile()) {
                    warn!(error = %e, room = target.room_index, "Teleport target unavailable");
                }
                self.local.set_frozen(false);
                self.bus.push(ScreenFade {
                    fade: Fade::In,
                    duration,
                });
                self.teleport = Some(TeleportSequence {
                    target,
                    phase: TeleportPhase::FadingIn,
                    elapsed: 0.0,
                });
            }
            TeleportPhase::FadingIn if seq.elapsed >= duration => {
                self.teleport = None;
            }
            _ => self.teleport = Some(seq),
        }
    }

    /// Puts the local avatar on `tile` of room `room_index`, swapping rooms if
    /// needed. On a failed room load the avatar stays where it is.
    fn relocate(&mut self, room_index: usize, tile: TileCoordinate) -> Result<(), WorldError> {
        if room_index != self.world.current_room_index() {
            self.world.load_room(room_index)?;
            self.register_room_sprites();
            self.private_area = None;
            self.push_room_changed();
        }
        self.local.set_position(tile);
        self.local.halt();
        self.local.check_channel(tile, &self.world);
        self.apply_local_events();
        self.camera.follow(self.local.position());
        Ok(())
    }

    fn register_room_sprites(&mut self) {
        for id in self.sprite_render.drain(..) {
            self.culler.remove(id);
        }
        self.sprite_render = self
            .world
            .placements()
            .iter()
            .map(|p| self.culler.register(p.bounds))
            .collect();
        self.depth_sprites = self
            .world
            .placements()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.layer == Layer::Object)
            .map(|(i, p)| (Drawable::Sprite(i), sprite_depth(p.tile.y)))
            .collect();
        self.depth_order.clear();
        self.depth_dirty = true;
    }

    fn push_room_changed(&mut self) {
        self.bus.push(RoomChanged {
            room_index: self.world.current_room_index(),
            room_name: self.world.room_name().to_string(),
        });
    }

    fn apply_remote_events(&mut self) {
        for event in self.remotes.drain_events() {
            match event {
                RemoteEvent::Spawned {
                    id,
                    position,
                    display_name,
                } => {
                    let render_id = self.culler.register(avatar_bounds(position));
                    self.remote_render.insert(id.clone(), render_id);
                    let skin = self
                        .remotes
                        .get(&id)
                        .map(|a| a.skin.clone())
                        .unwrap_or_else(|| self.config.skin.clone());
                    self.bus.push(AvatarSpawned {
                        avatar: AvatarRef::Remote(id),
                        display_name,
                        skin,
                        position,
                        render_id,
                    });
                }
                RemoteEvent::Renamed { id, display_name } => self.bus.push(AvatarRenamed {
                    avatar: AvatarRef::Remote(id),
                    display_name,
                }),
                RemoteEvent::AnimationChanged { id, state } => self.bus.push(AnimationChanged {
                    avatar: AvatarRef::Remote(id),
                    state,
                }),
                RemoteEvent::Despawned { id } => {
                    if let Some(render_id) = self.remote_render.remove(&id) {
                        self.culler.remove(render_id);
                        self.bus.push(AvatarDespawned {
                            avatar: AvatarRef::Remote(id),
                            render_id,
                        });
                    }
                }
            }
        }
    }

    /// Re-sorts the object layer when the room changed or an avatar's depth
    /// moved since the last sort.
    fn sort_depth(&mut self) {
        let local = avatar_depth(self.local.position());
        let moved = self.depth_local != Some(local)
            || self.depth_remotes.len() != self.remotes.len()
            || self
                .remotes
                .iter()
                .any(|a| self.depth_remotes.get(a.id.as_str()) != Some(&avatar_depth(a.smoothed)));
        if !self.depth_dirty && !moved {
            return;
        }
        self.depth_dirty = false;
        self.depth_local = Some(local);
        self.depth_remotes = self
            .remotes
            .iter()
            .map(|a| (a.id.clone(), avatar_depth(a.smoothed)))
            .collect();

        let mut items = self.depth_sprites.clone();
        items.push((Drawable::LocalAvatar, local));
        let mut remotes: Vec<_> = self.depth_remotes.iter().collect();
        remotes.sort_by(|a, b| a.0.cmp(b.0));
        items.extend(
            remotes
                .into_iter()
                .map(|(id, depth)| (Drawable::Remote(id.clone()), *depth)),
        );

        self.depth_sorts += 1;
        trace!(sorts = self.depth_sorts, items = items.len(), "Depth re-sorted");
        let order = depth_sort(items);
        if order != self.depth_order {
            self.depth_order = order.clone();
            self.bus.push(DepthOrderChanged(order));
        }
    }
}
