//! Scripted local flight path so the headless client has something to publish.

use glam::Vec3;
use murmur_net::PositionUpdate;

/// Flies a level circle around `center` at constant speed.
#[derive(Debug, Clone)]
pub struct CircuitFlight {
    pub center: Vec3,
    pub radius: f32,
    /// Units per second along the circle.
    pub speed: f32,
    angle: f32,
}

impl Default for CircuitFlight {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 40.0, 0.0), 60.0, 18.0)
    }
}

impl CircuitFlight {
    pub fn new(center: Vec3, radius: f32, speed: f32) -> Self {
        Self {
            center,
            radius: radius.max(1.0),
            speed,
            angle: 0.0,
        }
    }

    /// Move along the circle by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        self.angle = (self.angle + self.speed / self.radius * dt) % std::f32::consts::TAU;
    }

    pub fn position(&self) -> Vec3 {
        self.center + Vec3::new(self.angle.cos(), 0.0, self.angle.sin()) * self.radius
    }

    /// Heading along the tangent, in radians.
    pub fn yaw(&self) -> f32 {
        let tangent = Vec3::new(-self.angle.sin(), 0.0, self.angle.cos());
        tangent.x.atan2(tangent.z)
    }

    pub fn update(&self, timestamp_ms: i64) -> PositionUpdate {
        PositionUpdate {
            position: self.position(),
            yaw: self.yaw(),
            pitch: 0.0,
            speed: self.speed,
            timestamp: timestamp_ms,
        }
    }
}
