//! Bounded buffer of locally-generated inputs awaiting server confirmation.
//!
//! The owning client predicts ahead of the server: every generated input is
//! applied to the local simulation immediately and kept here until the
//! authority acknowledges it (by echoing the client timestamp it has folded
//! in). On a divergence the remaining unconfirmed inputs are replayed from
//! the corrected server baseline.

use bevy_math::{Quat, Vec3};
use ringbuffer::{AllocRingBuffer, RingBuffer};

/// Number of unconfirmed inputs retained. At 60 input frames per second this
/// covers well over a second of round-trip; older inputs are overwritten and
/// simply won't be replayed.
pub const INPUT_BUFFER_CAPACITY: usize = 128;

/// One locally generated input frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedInput {
    /// Timestamp on the local client clock, seconds. Matches the
    /// `client_time` submitted with the corresponding transform message.
    pub time: f32,
    /// Desired displacement for this frame, before collision resolution.
    pub translation: Vec3,
    /// Desired orientation after this frame.
    pub rotation: Quat,
    /// Input frame duration, seconds.
    pub delta: f32,
}

/// Ring buffer of unconfirmed inputs, oldest first.
#[derive(Debug)]
pub struct InputBuffer {
    buffer: AllocRingBuffer<PredictedInput>,
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBuffer {
    pub fn new() -> Self {
        Self {
            buffer: AllocRingBuffer::new(INPUT_BUFFER_CAPACITY),
        }
    }

    pub fn push(&mut self, input: PredictedInput) {
        // a full buffer overwrites the oldest input; it would not have been
        // replayed anyway
        let _ = self.buffer.enqueue(input);
    }

    /// Drop every input the authority has confirmed (timestamp at or before
    /// the acked client time). Returns how many inputs were discarded.
    pub fn confirm(&mut self, ack_client_time: f32) -> usize {
        let mut discarded = 0;
        while let Some(front) = self.buffer.peek() {
            if front.time <= ack_client_time {
                self.buffer.dequeue();
                discarded += 1;
            } else {
                break;
            }
        }
        discarded
    }

    /// Unconfirmed inputs in generation order, for replay.
    pub fn iter(&self) -> impl Iterator<Item = &PredictedInput> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn input(time: f32) -> PredictedInput {
        PredictedInput {
            time,
            translation: Vec3::X,
            rotation: Quat::IDENTITY,
            delta: 1.0 / 60.0,
        }
    }

    #[test]
    fn confirm_discards_acked_prefix() {
        let mut buffer = InputBuffer::new();
        for t in [0.1, 0.2, 0.3, 0.4] {
            buffer.push(input(t));
        }
        assert_eq!(buffer.confirm(0.2), 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.iter().next().unwrap().time, 0.3);
        // acking the past again is a no-op
        assert_eq!(buffer.confirm(0.2), 0);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut buffer = InputBuffer::new();
        for i in 0..(INPUT_BUFFER_CAPACITY + 8) {
            buffer.push(input(i as f32));
        }
        assert_eq!(buffer.len(), INPUT_BUFFER_CAPACITY);
        // oldest entries were overwritten
        assert_eq!(buffer.iter().next().unwrap().time, 8.0);
    }
}
