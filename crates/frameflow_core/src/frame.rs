//! Frame bookkeeping shared by the scheduler and its callers.

use serde::{Deserialize, Serialize};

/// Width and height of the current output targets, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-sized extent (e.g. a minimized window) cannot be rendered to.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Cycles the in-flight frame slot.
///
/// The scheduler never advances the frame index itself: after a successful
/// submission the caller calls [`advance`](Self::advance); after a
/// submission that requested reinitialization it rebuilds its targets and
/// retries with the same slot.
#[derive(Debug, Clone)]
pub struct FrameCursor {
    frames_in_flight: usize,
    current: usize,
    frame_number: u64,
}

impl FrameCursor {
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    #[must_use]
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");
        Self {
            frames_in_flight,
            current: 0,
            frame_number: 0,
        }
    }

    /// Slot index in `[0, frames_in_flight)` for the next submission.
    #[inline]
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    #[inline]
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Number of frames completed so far (monotonic, for logging).
    #[inline]
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Moves to the next slot and returns it.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.frames_in_flight;
        self.frame_number += 1;
        self.current
    }
}
