//! Evaluation Context
//!
//! [`EvalContext`] is built by the caller before every `submit` and passed by
//! mutable reference through the whole traversal. The acquire node writes
//! the output image index and the reinit flag; draw and present nodes read
//! them.

use frameflow_core::{Extent2d, FrameflowError, Result};

use crate::backend::Backend;

/// `output_index` value before an image was acquired.
pub const NO_OUTPUT: u32 = u32::MAX;

/// Per-submission state shared by every node of a traversal.
pub struct EvalContext<'a, B: Backend> {
    /// Frame slot in `[0, frames_in_flight)`.
    pub frame_index: usize,
    pub target_extent: Extent2d,
    /// Index into `targets`, written by the acquire node.
    pub output_index: u32,
    pub targets: &'a [B::Target],
    pub presentable_chain: &'a mut B::Chain,
    /// Set by the acquire node when extent-dependent resources must be
    /// rebuilt before the next frame.
    pub needs_reinit: bool,
    pub(crate) halted: bool,
}

impl<'a, B: Backend> EvalContext<'a, B> {
    pub fn new(
        frame_index: usize,
        target_extent: Extent2d,
        targets: &'a [B::Target],
        presentable_chain: &'a mut B::Chain,
    ) -> Self {
        Self {
            frame_index,
            target_extent,
            output_index: NO_OUTPUT,
            targets,
            presentable_chain,
            needs_reinit: false,
            halted: false,
        }
    }

    /// Whether an acquire node produced an output index this frame.
    #[inline]
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.output_index != NO_OUTPUT
    }

    /// Whether the traversal stopped early because the chain was out of date.
    #[inline]
    #[must_use]
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// The target at `output_index`.
    pub fn output_target(&self) -> Result<&'a B::Target> {
        let targets: &'a [B::Target] = self.targets;
        targets
            .get(self.output_index as usize)
            .ok_or(FrameflowError::MissingTarget {
                index: self.output_index,
                available: targets.len(),
            })
    }

    #[inline]
    #[must_use]
    pub fn frame_info(&self) -> FrameInfo {
        FrameInfo {
            frame_index: self.frame_index,
            extent: self.target_extent,
        }
    }
}

/// The read-only slice of the context handed to user work callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_index: usize,
    pub extent: Extent2d,
}
