//! Camera.
//!
//! Follows the local avatar: the pivot is the world point drawn at the
//! top-left of the screen, chosen so the avatar sits at the screen center.

use realm_shared::math::{Rect, Vec2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pivot: Vec2,
    scale: f32,
    screen: Vec2,
}

impl Camera {
    pub fn new(scale: f32, screen_width: f32, screen_height: f32) -> Self {
        Self {
            pivot: Vec2::ZERO,
            scale: if scale > 0.0 { scale } else { 1.0 },
            screen: Vec2::new(screen_width, screen_height),
        }
    }

    /// Centers the view on `target`.
    pub fn follow(&mut self, target: Vec2) {
        self.pivot = target.sub(self.screen.scale(0.5 / self.scale));
    }

    pub fn pivot(&self) -> Vec2 {
        self.pivot
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn resize(&mut self, screen_width: f32, screen_height: f32) {
        self.screen = Vec2::new(screen_width, screen_height);
    }

    /// World-space rectangle currently on screen.
    pub fn viewport(&self) -> Rect {
        Rect::new(self.pivot, self.pivot.add(self.screen.scale(1.0 / self.scale)))
    }

    pub fn screen_to_world(&self, p: Vec2) -> Vec2 {
        self.pivot.add(p.scale(1.0 / self.scale))
    }

    pub fn world_to_screen(&self, p: Vec2) -> Vec2 {
        p.sub(self.pivot).scale(self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_centers_target() {
        let mut cam = Camera::new(2.0, 1600.0, 800.0);
        let avatar = Vec2::new(400.0, 300.0);
        cam.follow(avatar);
        assert_eq!(cam.pivot(), Vec2::new(0.0, 100.0));
        assert_eq!(cam.world_to_screen(avatar), Vec2::new(800.0, 400.0));
        assert_eq!(cam.screen_to_world(Vec2::new(800.0, 400.0)), avatar);

        let vp = cam.viewport();
        assert_eq!(vp.width(), 800.0);
        assert_eq!(vp.height(), 400.0);
        assert!(vp.contains(avatar));
    }
}
