use frameflow_core::Result;

use crate::backend::{Backend, GpuDevice, QueueKind, WaitStage};
use crate::graph::context::{EvalContext, FrameInfo};
use crate::graph::sync::SyncState;

use super::node_submission;

/// Work performed by a compute node each frame.
pub trait ComputeWork<B: Backend> {
    /// Updates CPU-visible state (uniforms, push data) for the frame.
    fn update(&mut self, _frame: &FrameInfo) -> Result<()> {
        Ok(())
    }

    /// Records the dispatch for the frame.
    fn record(&mut self, device: &B::Device, frame: &FrameInfo) -> Result<B::CommandBuffer>;
}

impl<B, F> ComputeWork<B> for F
where
    B: Backend,
    F: FnMut(&B::Device, &FrameInfo) -> Result<B::CommandBuffer>,
{
    fn record(&mut self, device: &B::Device, frame: &FrameInfo) -> Result<B::CommandBuffer> {
        self(device, frame)
    }
}

/// Records and submits a compute dispatch.
pub struct ComputeNode<B: Backend> {
    work: Box<dyn ComputeWork<B>>,
    queue: QueueKind,
    wait_stage: WaitStage,
}

impl<B: Backend> ComputeNode<B> {
    pub fn new(work: impl ComputeWork<B> + 'static) -> Self {
        Self {
            work: Box::new(work),
            queue: QueueKind::Compute,
            wait_stage: WaitStage::COMPUTE_SHADER,
        }
    }

    /// Same as [`new`](Self::new), with the closure signature spelled out so
    /// argument types are inferred.
    pub fn from_fn<F>(record: F) -> Self
    where
        F: FnMut(&B::Device, &FrameInfo) -> Result<B::CommandBuffer> + 'static,
    {
        Self::new(record)
    }

    #[must_use]
    pub fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    #[must_use]
    pub fn with_wait_stage(mut self, wait_stage: WaitStage) -> Self {
        self.wait_stage = wait_stage;
        self
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    #[inline]
    #[must_use]
    pub fn wait_stage(&self) -> WaitStage {
        self.wait_stage
    }

    pub(crate) fn execute(
        &mut self,
        name: &str,
        sync: &SyncState<B>,
        device: &B::Device,
        ctx: &mut EvalContext<'_, B>,
    ) -> Result<()> {
        let frame = ctx.frame_info();
        self.work.update(&frame)?;
        let commands = self.work.record(device, &frame)?;

        device.submit(
            self.queue,
            node_submission(name, sync, frame.frame_index, vec![commands], self.wait_stage),
        )?;
        Ok(())
    }
}
