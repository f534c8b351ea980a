//! Frame Driver
//!
//! Wraps the per-frame protocol around a [`DependencyGraph`]:
//!
//! 1. wait for the current slot's frame-blocking work;
//! 2. build an [`EvalContext`] and submit;
//! 3. advance the [`FrameCursor`] unless the acquire asked for a reinit.

use frameflow_core::{Extent2d, FrameCursor, Result};
use frameflow_render::{Backend, DependencyGraph, EvalContext, SubmitReport, NO_OUTPUT};

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Slot the frame was submitted with.
    pub frame_index: usize,
    /// Image written by the acquire node, or [`NO_OUTPUT`].
    pub output_index: u32,
    pub report: SubmitReport,
    /// The caller must rebuild extent-dependent resources; the slot was not
    /// advanced.
    pub needs_reinit: bool,
}

impl FrameOutcome {
    /// Whether an image was acquired and the traversal ran to completion.
    #[must_use]
    pub fn presented(&self) -> bool {
        !self.report.halted && self.output_index != NO_OUTPUT
    }
}

/// Owns a graph and the frame slot cursor that drives it.
pub struct FrameDriver<B: Backend> {
    graph: DependencyGraph<B>,
    cursor: FrameCursor,
}

impl<B: Backend> FrameDriver<B> {
    #[must_use]
    pub fn new(graph: DependencyGraph<B>) -> Self {
        let cursor = FrameCursor::new(graph.frames_in_flight());
        Self { graph, cursor }
    }

    #[inline]
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph<B> {
        &self.graph
    }

    #[inline]
    pub fn graph_mut(&mut self) -> &mut DependencyGraph<B> {
        &mut self.graph
    }

    #[inline]
    #[must_use]
    pub fn cursor(&self) -> &FrameCursor {
        &self.cursor
    }

    /// Runs one frame on the current slot.
    pub fn run_frame(
        &mut self,
        extent: Extent2d,
        targets: &[B::Target],
        chain: &mut B::Chain,
    ) -> Result<FrameOutcome> {
        let frame_index = self.cursor.current();
        self.graph.wait_until_complete(frame_index)?;

        let mut ctx = EvalContext::new(frame_index, extent, targets, chain);
        let report = self.graph.submit(&mut ctx)?;
        let outcome = FrameOutcome {
            frame_index,
            output_index: ctx.output_index,
            report,
            needs_reinit: ctx.needs_reinit,
        };

        if outcome.needs_reinit {
            log::info!(
                "{}: frame {} requested reinit (slot {frame_index} kept)",
                self.graph.label(),
                self.cursor.frame_number()
            );
        } else {
            self.cursor.advance();
        }
        Ok(outcome)
    }

    /// Waits for the device to go idle, e.g. before rebuilding targets.
    pub fn wait_idle(&self) -> Result<()> {
        self.graph.wait_idle()
    }

    /// Returns the graph after waiting for in-flight work.
    pub fn into_graph(self) -> Result<DependencyGraph<B>> {
        self.graph.wait_idle()?;
        Ok(self.graph)
    }
}
