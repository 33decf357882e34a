use crate::game::constants::client::{CAMERA_OVERSCROLL, CAMERA_SMOOTHING};
use crate::net::protocol::ZoneSnapshot;
use crate::util::vec2::Vec2;

/// Camera easing toward the local player's authoritative position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec2,
    smoothing: f32,
    overscroll: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec2::ZERO)
    }
}

impl Camera {
    pub fn new(position: Vec2) -> Self {
        Self::with_params(position, CAMERA_SMOOTHING, CAMERA_OVERSCROLL)
    }

    pub fn with_params(position: Vec2, smoothing: f32, overscroll: f32) -> Self {
        Self {
            position,
            smoothing: smoothing.clamp(0.0, 1.0),
            overscroll: overscroll.max(0.0),
        }
    }

    /// One frame: `camera += (target - camera) * smoothing`, then clamp to
    /// the zone plus the overscroll allowance
    pub fn follow(&mut self, target: Vec2, bounds: &ZoneSnapshot) -> Vec2 {
        self.position += (target - self.position) * self.smoothing;
        self.clamp(bounds);
        self.position
    }

    /// Jump straight to `target`, e.g. on the first snapshot
    pub fn snap_to(&mut self, target: Vec2, bounds: &ZoneSnapshot) {
        self.position = target;
        self.clamp(bounds);
    }

    fn clamp(&mut self, bounds: &ZoneSnapshot) {
        let limit = bounds.current_radius.max(0.0) + self.overscroll;
        let offset = self.position - bounds.center;
        if offset.length_sq() > limit * limit {
            self.position = bounds.center + offset.normalize() * limit;
        }
    }
}
