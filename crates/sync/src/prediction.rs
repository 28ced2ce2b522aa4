use std::collections::{HashMap, VecDeque};

use glam::{Mat3, Vec3};

use crate::config::PredictionMode;
use crate::net::{EntityId, Transform};

/// Short history of one remote entity and the per-frame deltas derived
/// from it.
#[derive(Debug, Clone)]
pub struct PredictionState {
    samples: VecDeque<Transform>,
    translation_delta: Vec3,
    rotation_delta: Mat3,
    frame_lag: i32,
}

impl PredictionState {
    fn new(depth: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(depth),
            translation_delta: Vec3::ZERO,
            rotation_delta: Mat3::ZERO,
            frame_lag: 0,
        }
    }

    pub fn translation_delta(&self) -> Vec3 {
        self.translation_delta
    }

    pub fn rotation_delta(&self) -> Mat3 {
        self.rotation_delta
    }

    pub fn frame_lag(&self) -> i32 {
        self.frame_lag
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn recompute(&mut self, mode: PredictionMode) {
        let (translation, rotation) = match (mode, self.samples.len()) {
            (PredictionMode::Linear, n) if n >= 2 => {
                let (t0, t1) = (&self.samples[0], &self.samples[1]);
                (
                    t0.translation - t1.translation,
                    t0.rotation - t1.rotation,
                )
            }
            (PredictionMode::Quadratic, n) if n >= 3 => {
                let (t0, t1, t2) = (&self.samples[0], &self.samples[1], &self.samples[2]);
                let translation = (t0.translation - t1.translation)
                    + 0.5 * (t0.translation - 2.0 * t1.translation + t2.translation);
                let rotation = (t0.rotation - t1.rotation)
                    + (t0.rotation - t1.rotation * 2.0 + t2.rotation) * 0.5;
                (translation, rotation)
            }
            _ => (Vec3::ZERO, Mat3::ZERO),
        };

        self.translation_delta = translation;
        self.rotation_delta = rotation;
    }
}

/// Dead-reckoning for remote entities on the client.
#[derive(Debug, Clone, Default)]
pub struct Predictor {
    mode: PredictionMode,
    states: HashMap<EntityId, PredictionState>,
}

impl Predictor {
    pub fn new(mode: PredictionMode) -> Self {
        Self {
            mode,
            states: HashMap::new(),
        }
    }

    pub fn mode(&self) -> PredictionMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != PredictionMode::None
    }

    pub fn state(&self, id: &EntityId) -> Option<&PredictionState> {
        self.states.get(id)
    }

    pub fn remove(&mut self, id: &EntityId) {
        self.states.remove(id);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Pushes a freshly received transform and recomputes the deltas.
    pub fn update(&mut self, id: EntityId, transform: Transform, local_frame: u32, packet_frame: u32) {
        let mode = self.mode;
        let depth = mode.depth();
        let state = self
            .states
            .entry(id)
            .or_insert_with(|| PredictionState::new(depth));

        state.samples.push_front(transform);
        state.samples.truncate(depth);
        state.frame_lag = local_frame.wrapping_sub(packet_frame) as i32;
        state.recompute(mode);
    }

    /// One frame of extrapolation from `current`.
    pub fn predict(&self, id: &EntityId, current: &Transform) -> Transform {
        match self.states.get(id) {
            Some(state) => Transform::new(
                current.rotation + state.rotation_delta,
                current.translation + state.translation_delta,
            ),
            None => *current,
        }
    }

    /// Re-extrapolates a received transform across the measured frame lag.
    pub fn recalculate(&self, id: &EntityId, transform: &Transform) -> Transform {
        match self.states.get(id) {
            Some(state) => {
                let lag = state.frame_lag as f32;
                Transform::new(
                    transform.rotation + state.rotation_delta * lag,
                    transform.translation + state.translation_delta * lag,
                )
            }
            None => *transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_translation(Vec3::new(x, y, z))
    }

    #[test]
    fn test_linear_prediction() {
        let id = EntityId::random();
        let mut predictor = Predictor::new(PredictionMode::Linear);

        predictor.update(id, at(0.0, 0.0, 0.0), 10, 10);
        assert_eq!(predictor.state(&id).unwrap().translation_delta(), Vec3::ZERO);

        predictor.update(id, at(1.0, 0.0, 0.0), 11, 11);
        let predicted = predictor.predict(&id, &at(5.0, 0.0, 0.0));
        assert_eq!(predicted.translation, Vec3::new(6.0, 0.0, 0.0));
        assert_eq!(predicted.rotation, Mat3::IDENTITY);
    }

    #[test]
    fn test_quadratic_needs_three_samples() {
        let id = EntityId::random();
        let mut predictor = Predictor::new(PredictionMode::Quadratic);

        predictor.update(id, at(0.0, 0.0, 0.0), 0, 0);
        predictor.update(id, at(1.0, 0.0, 0.0), 1, 1);
        assert_eq!(predictor.state(&id).unwrap().translation_delta(), Vec3::ZERO);

        predictor.update(id, at(2.0, 0.0, 0.0), 2, 2);
        assert_eq!(
            predictor.state(&id).unwrap().translation_delta(),
            Vec3::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_quadratic_accelerating() {
        let id = EntityId::random();
        let mut predictor = Predictor::new(PredictionMode::Quadratic);

        predictor.update(id, at(0.0, 0.0, 0.0), 0, 0);
        predictor.update(id, at(1.0, 0.0, 0.0), 1, 1);
        predictor.update(id, at(3.0, 0.0, 0.0), 2, 2);

        // (3 - 1) + 0.5 * (3 - 2 + 0)
        assert_eq!(
            predictor.state(&id).unwrap().translation_delta(),
            Vec3::new(2.5, 0.0, 0.0)
        );
    }

    #[test]
    fn test_recalculate_scales_by_lag() {
        let id = EntityId::random();
        let mut predictor = Predictor::new(PredictionMode::Linear);

        predictor.update(id, at(0.0, 0.0, 0.0), 20, 17);
        predictor.update(id, at(0.0, 2.0, 0.0), 21, 18);
        assert_eq!(predictor.state(&id).unwrap().frame_lag(), 3);

        let corrected = predictor.recalculate(&id, &at(0.0, 2.0, 0.0));
        assert_eq!(corrected.translation, Vec3::new(0.0, 8.0, 0.0));
    }

    #[test]
    fn test_rotation_delta() {
        let id = EntityId::random();
        let mut predictor = Predictor::new(PredictionMode::Linear);

        let turned = Transform::new(Mat3::from_rotation_y(0.5), Vec3::ZERO);
        predictor.update(id, Transform::IDENTITY, 0, 0);
        predictor.update(id, turned, 1, 1);

        let predicted = predictor.predict(&id, &turned);
        let expected = Mat3::from_rotation_y(0.5) * 2.0 - Mat3::IDENTITY;
        assert!(predicted.rotation.abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_none_mode_is_passthrough() {
        let id = EntityId::random();
        let mut predictor = Predictor::new(PredictionMode::None);
        assert!(!predictor.is_enabled());

        predictor.update(id, at(0.0, 0.0, 0.0), 0, 0);
        predictor.update(id, at(4.0, 0.0, 0.0), 1, 1);

        assert_eq!(predictor.predict(&id, &at(4.0, 0.0, 0.0)), at(4.0, 0.0, 0.0));
        assert_eq!(predictor.state(&id).unwrap().sample_count(), 1);
    }

    #[test]
    fn test_unknown_entity_unchanged() {
        let predictor = Predictor::new(PredictionMode::Linear);
        let current = at(1.0, 2.0, 3.0);
        assert_eq!(predictor.predict(&EntityId::random(), &current), current);
        assert_eq!(predictor.recalculate(&EntityId::random(), &current), current);
    }
}
