use crate::net::protocol::ZoneSnapshot;
use crate::util::vec2::Vec2;

/// Circular minimap: the zone disc mapped linearly onto a fixed-size disc
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimap {
    /// Disc center in screen space
    pub origin: Vec2,
    /// Disc radius in screen units
    pub radius: f32,
}

impl Minimap {
    pub fn new(origin: Vec2, radius: f32) -> Self {
        Self { origin, radius }
    }

    /// Screen position of `world`, or `None` if it lies outside the zone.
    /// Points outside are not drawn, never pinned to the edge.
    pub fn project(&self, world: Vec2, zone: &ZoneSnapshot) -> Option<Vec2> {
        if zone.current_radius <= 0.0 || !world.is_finite() {
            return None;
        }
        let offset = world - zone.center;
        if offset.length_sq() > zone.current_radius * zone.current_radius {
            return None;
        }
        Some(self.origin + offset * (self.radius / zone.current_radius))
    }
}
