//! Frustum culling.
//!
//! Keeps a visibility flag per registered renderable. An object is visible iff
//! its bounds overlap the viewport grown by a margin. Evaluation is throttled
//! twice: by frame count, and by how far the camera moved since the last pass.
//! Registry changes mark the culler dirty, which bypasses the camera check (but
//! not the frame throttle) so new objects get a correct flag on the next pass.

use std::collections::BTreeMap;

use realm_shared::{
    config::CullingConfig,
    math::{Rect, Vec2},
};
use tracing::{debug, trace};

/// Handle for a registered renderable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderId(u32);

impl RenderId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A visibility flag that actually flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityChange {
    pub id: RenderId,
    pub visible: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    bounds: Rect,
    visible: bool,
}

/// Visibility registry and throttled culling pass.
#[derive(Debug)]
pub struct VisibilityCuller {
    config: CullingConfig,
    entries: BTreeMap<RenderId, Entry>,
    next_id: u32,
    frames_since_pass: u32,
    last_camera: Option<Vec2>,
    dirty: bool,
}

impl VisibilityCuller {
    pub fn new(config: CullingConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
            next_id: 0,
            frames_since_pass: 0,
            last_camera: None,
            dirty: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Registers a renderable; it starts out visible.
    pub fn register(&mut self, bounds: Rect) -> RenderId {
        let id = RenderId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                bounds,
                visible: true,
            },
        );
        self.dirty = true;
        id
    }

    /// Returns false for an unknown id.
    pub fn update_bounds(&mut self, id: RenderId, bounds: Rect) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                if entry.bounds != bounds {
                    entry.bounds = bounds;
                    self.dirty = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: RenderId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Drops every registration.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_camera = None;
        self.dirty = false;
    }

    pub fn is_visible(&self, id: RenderId) -> Option<bool> {
        self.entries.get(&id).map(|e| e.visible)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn visible_count(&self) -> usize {
        self.entries.values().filter(|e| e.visible).count()
    }

    /// Turns culling on or off. Turning it off shows everything again.
    pub fn set_enabled(&mut self, enabled: bool) -> Vec<VisibilityChange> {
        if self.config.enabled == enabled {
            return Vec::new();
        }
        self.config.enabled = enabled;
        debug!(enabled, "Culling toggled");
        if enabled {
            self.last_camera = None;
            self.dirty = true;
            return Vec::new();
        }

        let mut changes = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if !entry.visible {
                entry.visible = true;
                changes.push(VisibilityChange {
                    id: *id,
                    visible: true,
                });
            }
        }
        changes
    }

    /// Per-frame entry point; evaluates only when both throttles allow it.
    pub fn update(&mut self, viewport: Rect, camera: Vec2) -> Vec<VisibilityChange> {
        if !self.config.enabled {
            return Vec::new();
        }

        self.frames_since_pass += 1;
        if self.frames_since_pass < self.config.interval_frames.max(1) {
            return Vec::new();
        }
        self.frames_since_pass = 0;

        if !self.dirty {
            if let Some(last) = self.last_camera {
                if last.distance(camera) <= self.config.camera_threshold {
                    return Vec::new();
                }
            }
        }

        self.last_camera = Some(camera);
        self.evaluate(viewport)
    }

    /// Full pass ignoring both throttles.
    pub fn evaluate(&mut self, viewport: Rect) -> Vec<VisibilityChange> {
        if !self.config.enabled {
            return Vec::new();
        }
        self.dirty = false;

        let area = viewport.expand(self.config.margin);
        let mut changes = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            let visible = entry.bounds.intersects(&area);
            if visible != entry.visible {
                entry.visible = visible;
                changes.push(VisibilityChange { id: *id, visible });
            }
        }
        trace!(
            objects = self.entries.len(),
            flipped = changes.len(),
            "Culling pass"
        );
        changes
    }
}
