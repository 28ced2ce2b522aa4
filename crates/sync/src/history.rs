use std::collections::VecDeque;

use crate::error::{NetError, NetResult};
use crate::net::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HistorySlot {
    pub transform: Option<Transform>,
    pub valid: bool,
}

/// Per-client window of received transforms, newest frame first.
///
/// Slot `i` holds frame `current_frame - i`, so only frames in
/// `[current_frame - window, current_frame]` are addressable. Advancing the
/// current frame evicts the oldest slot and pushes an empty one at the head.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    window: u32,
    current_frame: u32,
    slots: VecDeque<HistorySlot>,
    last_valid: Option<u32>,
    latest_frame: Option<u32>,
}

impl FrameHistory {
    pub fn new(window: u32, current_frame: u32) -> Self {
        Self {
            window,
            current_frame,
            slots: (0..=window).map(|_| HistorySlot::default()).collect(),
            last_valid: None,
            latest_frame: None,
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Newest validated frame. Never moves backwards.
    pub fn last_valid(&self) -> Option<u32> {
        self.last_valid
    }

    /// Newest frame a transform was recorded for.
    pub fn latest_frame(&self) -> Option<u32> {
        self.latest_frame
    }

    fn index_of(&self, frame: u32) -> Option<usize> {
        let age = self.current_frame.checked_sub(frame)?;
        (age <= self.window).then_some(age as usize)
    }

    fn stale(&self, frame: u32) -> NetError {
        NetError::StaleUpdate {
            frame,
            current: self.current_frame,
        }
    }

    pub fn is_acceptable(&self, frame: u32) -> bool {
        self.index_of(frame).is_some()
    }

    pub fn record_update(&mut self, frame: u32, transform: Transform) -> NetResult<()> {
        let index = self.index_of(frame).ok_or_else(|| self.stale(frame))?;
        self.slots[index].transform = Some(transform);

        if self.latest_frame.is_none_or(|latest| frame > latest) {
            self.latest_frame = Some(frame);
        }
        Ok(())
    }

    pub fn validate(&mut self, frame: u32) -> NetResult<()> {
        let index = self.index_of(frame).ok_or_else(|| self.stale(frame))?;
        self.slots[index].valid = true;

        if self.last_valid.is_none_or(|last| frame >= last) {
            self.last_valid = Some(frame);
        }
        Ok(())
    }

    pub fn get(&self, frame: u32) -> Option<&HistorySlot> {
        self.index_of(frame).map(|index| &self.slots[index])
    }

    pub fn transform_at(&self, frame: u32) -> Option<Transform> {
        self.get(frame).and_then(|slot| slot.transform)
    }

    /// Most recent valid frame no newer than `frame`, looking back at most to
    /// the oldest slot in the window.
    pub fn last_valid_frame_at_or_before(&self, frame: u32) -> Option<u32> {
        let frame = frame.min(self.current_frame);
        let start = self.index_of(frame)?;

        (start..self.slots.len())
            .find(|&index| self.slots[index].valid)
            .map(|index| self.current_frame - index as u32)
    }

    /// Moves the head to `frame`, one eviction per frame stepped. Going
    /// backwards is ignored.
    pub fn advance(&mut self, frame: u32) {
        if frame <= self.current_frame {
            return;
        }

        let steps = (frame - self.current_frame).min(self.window + 1);
        for _ in 0..steps {
            self.slots.pop_back();
            self.slots.push_front(HistorySlot::default());
        }
        self.current_frame = frame;
    }

    /// Forgets every slot, keeping the window size.
    pub fn reset(&mut self, current_frame: u32) {
        *self = Self::new(self.window, current_frame);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn at(x: f32) -> Transform {
        Transform::from_translation(Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_record_inside_window() {
        let mut history = FrameHistory::new(10, 100);
        history.record_update(100, at(1.0)).unwrap();
        history.record_update(90, at(2.0)).unwrap();

        assert_eq!(history.transform_at(100), Some(at(1.0)));
        assert_eq!(history.transform_at(90), Some(at(2.0)));
        assert_eq!(history.latest_frame(), Some(100));
    }

    #[test]
    fn test_outside_window_is_noop() {
        let mut history = FrameHistory::new(10, 100);
        history.record_update(95, at(1.0)).unwrap();

        assert!(matches!(
            history.record_update(89, at(9.0)),
            Err(NetError::StaleUpdate { frame: 89, current: 100 })
        ));
        assert!(matches!(
            history.record_update(101, at(9.0)),
            Err(NetError::StaleUpdate { .. })
        ));
        assert!(history.validate(80).is_err());

        assert_eq!(history.transform_at(95), Some(at(1.0)));
        assert_eq!(history.latest_frame(), Some(95));
        assert_eq!(history.last_valid(), None);
        for frame in 90..=100 {
            if frame != 95 {
                assert_eq!(history.get(frame), Some(&HistorySlot::default()));
            }
        }
    }

    #[test]
    fn test_last_valid_is_monotonic() {
        let mut history = FrameHistory::new(10, 100);
        history.validate(98).unwrap();
        assert_eq!(history.last_valid(), Some(98));

        history.validate(95).unwrap();
        assert_eq!(history.last_valid(), Some(98));
        assert!(history.get(95).unwrap().valid);

        history.validate(98).unwrap();
        history.validate(100).unwrap();
        assert_eq!(history.last_valid(), Some(100));
    }

    #[test]
    fn test_last_valid_frame_at_or_before() {
        let mut history = FrameHistory::new(10, 100);
        history.validate(92).unwrap();
        history.validate(97).unwrap();

        assert_eq!(history.last_valid_frame_at_or_before(100), Some(97));
        assert_eq!(history.last_valid_frame_at_or_before(97), Some(97));
        assert_eq!(history.last_valid_frame_at_or_before(96), Some(92));
        assert_eq!(history.last_valid_frame_at_or_before(91), None);
        assert_eq!(history.last_valid_frame_at_or_before(50), None);
        assert_eq!(history.last_valid_frame_at_or_before(500), Some(97));
    }

    #[test]
    fn test_advance_evicts_oldest() {
        let mut history = FrameHistory::new(10, 100);
        history.record_update(90, at(1.0)).unwrap();
        history.record_update(100, at(2.0)).unwrap();
        history.validate(90).unwrap();

        history.advance(101);
        assert_eq!(history.current_frame(), 101);
        assert_eq!(history.get(90), None);
        assert_eq!(history.transform_at(100), Some(at(2.0)));
        assert_eq!(history.get(101), Some(&HistorySlot::default()));
        assert_eq!(history.last_valid_frame_at_or_before(101), None);

        history.advance(200);
        assert_eq!(history.transform_at(190), None);
        assert!((190..=200).all(|frame| history.get(frame) == Some(&HistorySlot::default())));
    }

    #[test]
    fn test_advance_backwards_ignored() {
        let mut history = FrameHistory::new(10, 100);
        history.record_update(100, at(3.0)).unwrap();
        history.advance(50);
        assert_eq!(history.current_frame(), 100);
        assert_eq!(history.transform_at(100), Some(at(3.0)));
    }

    #[test]
    fn test_frame_zero_window() {
        let mut history = FrameHistory::new(10, 0);
        history.record_update(0, at(1.0)).unwrap();
        assert!(history.record_update(1, at(1.0)).is_err());
        assert_eq!(history.last_valid_frame_at_or_before(0), None);
    }

    #[test]
    fn test_reset_clears() {
        let mut history = FrameHistory::new(4, 10);
        history.record_update(10, at(1.0)).unwrap();
        history.validate(10).unwrap();
        history.reset(20);

        assert_eq!(history.current_frame(), 20);
        assert_eq!(history.window(), 4);
        assert_eq!(history.last_valid(), None);
        assert_eq!(history.latest_frame(), None);
    }
}
