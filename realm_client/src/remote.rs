//! Remote avatar reconciliation.
//!
//! Position events arrive at network cadence (about 10 Hz) with jitter. Each
//! remote avatar keeps the last reported position as a target and approaches it
//! by a fixed fraction every frame, which hides gaps between updates without a
//! prediction model.

use std::collections::HashMap;

use realm_shared::math::Vec2;
use tracing::{debug, trace};

use crate::movement::{AnimationState, Direction};

/// Per-frame displacement above which a remote avatar counts as walking.
const MOVING_THRESHOLD: f32 = 0.5;

/// Render-time cache of one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAvatar {
    pub id: String,
    pub display_name: Option<String>,
    pub skin: String,
    pub target: Vec2,
    pub smoothed: Vec2,
    pub direction: Direction,
    pub animation: AnimationState,
}

impl RemoteAvatar {
    fn new(id: &str, position: Vec2, display_name: Option<String>, skin: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name,
            skin: skin.to_string(),
            target: position,
            smoothed: position,
            direction: Direction::Down,
            animation: AnimationState::default(),
        }
    }
}

/// Lifecycle and animation changes for the host's render layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Spawned {
        id: String,
        position: Vec2,
        display_name: Option<String>,
    },
    Renamed {
        id: String,
        display_name: String,
    },
    AnimationChanged {
        id: String,
        state: AnimationState,
    },
    Despawned {
        id: String,
    },
}

/// Owns every non-local avatar.
#[derive(Debug)]
pub struct RemoteEntityReconciler {
    local_id: Option<String>,
    lerp_factor: f32,
    default_skin: String,
    avatars: HashMap<String, RemoteAvatar>,
    events: Vec<RemoteEvent>,
}

impl RemoteEntityReconciler {
    pub fn new(lerp_factor: f32, default_skin: impl Into<String>) -> Self {
        Self {
            local_id: None,
            lerp_factor: lerp_factor.clamp(0.0, 1.0),
            default_skin: default_skin.into(),
            avatars: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Events carrying this id describe the local avatar and are ignored.
    pub fn set_local_id(&mut self, id: Option<String>) {
        self.local_id = id;
    }

    /// Spawns on first sight, otherwise retargets. Returns whether a new avatar
    /// was created.
    pub fn on_position_event(&mut self, id: &str, position: Vec2, display_name: Option<&str>) -> bool {
        if self.local_id.as_deref() == Some(id) {
            return false;
        }

        if let Some(avatar) = self.avatars.get_mut(id) {
            avatar.target = position;
            if let Some(name) = display_name {
                if avatar.display_name.as_deref() != Some(name) {
                    avatar.display_name = Some(name.to_string());
                    self.events.push(RemoteEvent::Renamed {
                        id: id.to_string(),
                        display_name: name.to_string(),
                    });
                }
            }
            trace!(player_id = %id, x = position.x, y = position.y, "Remote target updated");
            return false;
        }

        let avatar = RemoteAvatar::new(
            id,
            position,
            display_name.map(str::to_string),
            &self.default_skin,
        );
        debug!(player_id = %id, x = position.x, y = position.y, "Remote avatar spawned");
        self.events.push(RemoteEvent::Spawned {
            id: id.to_string(),
            position,
            display_name: avatar.display_name.clone(),
        });
        self.avatars.insert(id.to_string(), avatar);
        true
    }

    /// Destroys the avatar; unknown ids are ignored.
    pub fn on_leave(&mut self, id: &str) -> Option<RemoteAvatar> {
        let avatar = self.avatars.remove(id)?;
        debug!(player_id = %id, "Remote avatar despawned");
        self.events.push(RemoteEvent::Despawned { id: id.to_string() });
        Some(avatar)
    }

    /// Advances smoothing by one frame.
    pub fn update(&mut self) {
        for avatar in self.avatars.values_mut() {
            let before = avatar.smoothed;
            avatar.smoothed = before.lerp(avatar.target, self.lerp_factor);

            let delta = avatar.smoothed.sub(before);
            let moving = delta.length() > MOVING_THRESHOLD;
            if let Some(dir) = Direction::from_delta(delta.x, delta.y) {
                if moving {
                    avatar.direction = dir;
                }
            }
            let state = if moving {
                AnimationState::Walk(avatar.direction)
            } else {
                AnimationState::Idle(avatar.direction)
            };
            if state != avatar.animation {
                avatar.animation = state;
                self.events.push(RemoteEvent::AnimationChanged {
                    id: avatar.id.clone(),
                    state,
                });
            }
        }
    }

    /// Destroys every avatar (local disconnect or room change).
    pub fn clear(&mut self) {
        let mut ids: Vec<_> = self.avatars.keys().cloned().collect();
        ids.sort();
        self.avatars.clear();
        for id in ids {
            self.events.push(RemoteEvent::Despawned { id });
        }
    }

    pub fn get(&self, id: &str) -> Option<&RemoteAvatar> {
        self.avatars.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteAvatar> {
        self.avatars.values()
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    pub fn drain_events(&mut self) -> Vec<RemoteEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciler() -> RemoteEntityReconciler {
        RemoteEntityReconciler::new(0.2, "009")
    }

    #[test]
    fn first_sight_spawns_without_interpolation() {
        let mut r = reconciler();
        assert!(r.on_position_event("p2", Vec2::new(64.0, 96.0), Some("ann")));
        let p2 = r.get("p2").unwrap();
        assert_eq!(p2.smoothed, Vec2::new(64.0, 96.0));
        assert_eq!(p2.target, Vec2::new(64.0, 96.0));
        assert_eq!(p2.skin, "009");
        assert_eq!(
            r.drain_events(),
            vec![RemoteEvent::Spawned {
                id: "p2".into(),
                position: Vec2::new(64.0, 96.0),
                display_name: Some("ann".into()),
            }]
        );
    }

    #[test]
    fn later_events_retarget_instead_of_snapping() {
        let mut r = reconciler();
        r.on_position_event("p2", Vec2::new(0.0, 0.0), None);
        assert!(!r.on_position_event("p2", Vec2::new(100.0, 0.0), None));
        let p2 = r.get("p2").unwrap();
        assert_eq!(p2.smoothed, Vec2::ZERO);
        assert_eq!(p2.target, Vec2::new(100.0, 0.0));
    }

    #[test]
    fn smoothing_converges_geometrically() {
        let mut r = reconciler();
        let target = Vec2::new(100.0, -40.0);
        r.on_position_event("p2", Vec2::ZERO, None);
        r.on_position_event("p2", target, None);

        let mut prev = r.get("p2").unwrap().smoothed.distance(target);
        for _ in 0..60 {
            r.update();
            let d = r.get("p2").unwrap().smoothed.distance(target);
            assert!(d <= prev * 0.8 + 1e-3);
            prev = d;
        }
        assert!(prev < 0.01);
    }

    #[test]
    fn animation_follows_smoothed_motion() {
        let mut r = reconciler();
        r.on_position_event("p2", Vec2::ZERO, None);
        r.on_position_event("p2", Vec2::new(-64.0, 0.0), None);
        r.drain_events();

        r.update();
        assert_eq!(r.get("p2").unwrap().animation, AnimationState::Walk(Direction::Left));
        for _ in 0..60 {
            r.update();
        }
        assert_eq!(r.get("p2").unwrap().animation, AnimationState::Idle(Direction::Left));

        let changes: Vec<_> = r
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                RemoteEvent::AnimationChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![AnimationState::Walk(Direction::Left), AnimationState::Idle(Direction::Left)]
        );
    }

    #[test]
    fn leave_of_unknown_id_is_a_no_op() {
        let mut r = reconciler();
        assert!(r.on_leave("ghost").is_none());
        assert!(r.drain_events().is_empty());

        r.on_position_event("p2", Vec2::ZERO, None);
        assert!(r.on_leave("p2").is_some());
        assert!(r.is_empty());
    }

    #[test]
    fn local_identity_is_never_spawned() {
        let mut r = reconciler();
        r.set_local_id(Some("me".into()));
        assert!(!r.on_position_event("me", Vec2::ZERO, None));
        assert!(r.is_empty());
    }

    #[test]
    fn rename_is_reported_once() {
        let mut r = reconciler();
        r.on_position_event("p2", Vec2::ZERO, Some("ann"));
        r.drain_events();
        r.on_position_event("p2", Vec2::ZERO, Some("anna"));
        r.on_position_event("p2", Vec2::ZERO, Some("anna"));
        assert_eq!(
            r.drain_events(),
            vec![RemoteEvent::Renamed {
                id: "p2".into(),
                display_name: "anna".into()
            }]
        );
    }

    #[test]
    fn clear_despawns_everyone() {
        let mut r = reconciler();
        r.on_position_event("b", Vec2::ZERO, None);
        r.on_position_event("a", Vec2::ZERO, None);
        r.drain_events();
        r.clear();
        assert!(r.is_empty());
        assert_eq!(
            r.drain_events(),
            vec![
                RemoteEvent::Despawned { id: "a".into() },
                RemoteEvent::Despawned { id: "b".into() }
            ]
        );
    }
}
