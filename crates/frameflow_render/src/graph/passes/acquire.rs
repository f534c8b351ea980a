use std::time::Duration;

use frameflow_core::Result;

use crate::backend::{Backend, ChainStatus, PresentChain};
use crate::graph::context::EvalContext;
use crate::graph::sync::SyncState;

/// Acquires the next output image from the context's presentable chain.
///
/// The only node kind allowed to touch `needs_reinit`:
///
/// - `Suboptimal`: flag set, the frame continues (the image was acquired and
///   its semaphore signaled).
/// - `OutOfDate`: flag set and the traversal halts; nothing was signaled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireNode {
    timeout: Option<Duration>,
}

impl AcquireNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds how long the acquire may block. `None` waits forever.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn execute<B: Backend>(
        &self,
        name: &str,
        sync: &SyncState<B>,
        device: &B::Device,
        ctx: &mut EvalContext<'_, B>,
    ) -> Result<()> {
        let frame = ctx.frame_index;
        let outcome = ctx.presentable_chain.acquire_next(
            device,
            sync.signal_semaphore(frame),
            sync.signal_fence(frame),
            self.timeout,
        )?;
        ctx.output_index = outcome.index;

        match outcome.status {
            ChainStatus::Optimal => {}
            ChainStatus::Suboptimal => {
                log::info!("'{name}': presentable chain is suboptimal, reinit requested");
                ctx.needs_reinit = true;
            }
            ChainStatus::OutOfDate => {
                log::warn!("'{name}': presentable chain is out of date, halting frame {frame}");
                ctx.needs_reinit = true;
                ctx.halted = true;
            }
        }
        Ok(())
    }
}
