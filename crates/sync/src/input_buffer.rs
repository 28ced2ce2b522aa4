use std::collections::VecDeque;

use crate::net::EntityId;

/// Frames the buffer will hold ahead of the leading frame.
pub const FUTURE_FRAMES: u32 = 2;

/// Per-frame sets of client inputs, indexed relative to the leading frame.
///
/// Slot `leading - frame + 2` holds `frame`; there are `cutoff + 2` slots, so
/// a frame up to two ahead of the leading frame can already be collected.
#[derive(Debug, Clone)]
pub struct InputFrameBuffer<T> {
    cutoff: u32,
    leading_frame: u32,
    slots: VecDeque<Vec<(EntityId, T)>>,
}

impl<T> InputFrameBuffer<T> {
    pub fn new(cutoff: u32, leading_frame: u32) -> Self {
        let depth = cutoff as usize + FUTURE_FRAMES as usize;
        Self {
            cutoff,
            leading_frame,
            slots: (0..depth).map(|_| Vec::new()).collect(),
        }
    }

    pub fn cutoff(&self) -> u32 {
        self.cutoff
    }

    pub fn leading_frame(&self) -> u32 {
        self.leading_frame
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    fn offset(&self, frame: u32) -> i64 {
        self.leading_frame as i64 - frame as i64 + FUTURE_FRAMES as i64
    }

    fn index_of(&self, frame: u32) -> Option<usize> {
        let offset = self.offset(frame);
        (0..self.slots.len() as i64)
            .contains(&offset)
            .then_some(offset as usize)
    }

    pub fn is_acceptable(&self, frame: u32) -> bool {
        (0..self.cutoff as i64).contains(&self.offset(frame))
    }

    /// Stores `input` for `client` at `frame`, replacing an earlier input
    /// from the same client. Returns `false` when the frame is out of range.
    pub fn submit(&mut self, frame: u32, client: EntityId, input: T) -> bool {
        if !self.is_acceptable(frame) {
            log::trace!(
                "input for frame {} outside window (leading {})",
                frame,
                self.leading_frame
            );
            return false;
        }

        let offset = self.offset(frame) as usize;
        let slot = &mut self.slots[offset];
        match slot.iter_mut().find(|(id, _)| *id == client) {
            Some(entry) => entry.1 = input,
            None => slot.push((client, input)),
        }
        true
    }

    pub fn inputs(&self, frame: u32) -> &[(EntityId, T)] {
        match self.index_of(frame) {
            Some(index) => &self.slots[index],
            None => &[],
        }
    }

    pub fn all_clients_present(&self, frame: u32, expected: usize) -> bool {
        self.index_of(frame)
            .is_some_and(|index| self.slots[index].len() == expected)
    }

    /// Moves the leading frame forward, evicting one slot per frame.
    pub fn advance(&mut self, frame: u32) {
        if frame <= self.leading_frame {
            return;
        }

        let steps = (frame - self.leading_frame).min(self.slots.len() as u32);
        for _ in 0..steps {
            self.slots.pop_back();
            self.slots.push_front(Vec::new());
        }
        self.leading_frame = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_range() {
        let buffer: InputFrameBuffer<u8> = InputFrameBuffer::new(5, 100);
        assert_eq!(buffer.depth(), 7);

        assert!(buffer.is_acceptable(102));
        assert!(buffer.is_acceptable(100));
        assert!(buffer.is_acceptable(98));
        assert!(!buffer.is_acceptable(97));
        assert!(!buffer.is_acceptable(103));
    }

    #[test]
    fn test_all_clients_present() {
        let mut buffer = InputFrameBuffer::new(5, 10);
        let (a, b) = (EntityId::random(), EntityId::random());

        assert!(buffer.submit(10, a, 1u8));
        assert!(!buffer.all_clients_present(10, 2));

        assert!(buffer.submit(10, a, 2u8));
        assert!(!buffer.all_clients_present(10, 2));

        assert!(buffer.submit(10, b, 3u8));
        assert!(buffer.all_clients_present(10, 2));
        assert_eq!(buffer.inputs(10), &[(a, 2), (b, 3)]);
    }

    #[test]
    fn test_rejected_submit_is_noop() {
        let mut buffer = InputFrameBuffer::new(3, 10);
        assert!(!buffer.submit(50, EntityId::random(), ()));
        assert!(!buffer.submit(2, EntityId::random(), ()));
        assert!((8..=12).all(|frame| buffer.inputs(frame).is_empty()));
    }

    #[test]
    fn test_evicted_after_cutoff_plus_two_advances() {
        let cutoff = 3;
        let mut buffer = InputFrameBuffer::new(cutoff, 0);
        let client = EntityId::random();

        assert!(buffer.submit(2, client, 7u32));

        for frame in 1..=cutoff + 1 {
            buffer.advance(frame);
            assert_eq!(buffer.inputs(2), &[(client, 7)], "lost at frame {frame}");
        }

        buffer.advance(cutoff + 2);
        assert!(buffer.inputs(2).is_empty());
        assert!(!buffer.all_clients_present(2, 1));
    }

    #[test]
    fn test_large_jump_clears() {
        let mut buffer = InputFrameBuffer::new(3, 0);
        let client = EntityId::random();
        buffer.submit(1, client, 1u8);
        buffer.advance(1_000);

        assert_eq!(buffer.leading_frame(), 1_000);
        assert!((995..=1_002).all(|frame| buffer.inputs(frame).is_empty()));
    }
}
