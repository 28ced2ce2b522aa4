use glam::{Mat3, Vec3};
use latentsync::Transform;

/// Scripted local movement: a circle around the current spawn point, facing
/// along the direction of travel.
#[derive(Debug, Clone)]
pub struct CircleMotion {
    origin: Vec3,
    radius: f32,
    /// Radians per frame.
    speed: f32,
    phase: f32,
}

impl CircleMotion {
    pub fn new(origin: Vec3, radius: f32, speed: f32) -> Self {
        Self {
            origin,
            radius,
            speed,
            phase: 0.0,
        }
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
        self.phase = 0.0;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    pub fn current(&self) -> Transform {
        let offset = Vec3::new(self.phase.cos(), 0.0, self.phase.sin()) * self.radius;
        let heading = -self.phase;
        Transform::new(Mat3::from_rotation_y(heading), self.origin + offset)
    }

    pub fn advance(&mut self) -> Transform {
        self.phase = (self.phase + self.speed) % std::f32::consts::TAU;
        self.current()
    }
}
