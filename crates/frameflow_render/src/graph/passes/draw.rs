use frameflow_core::Result;

use crate::backend::{Backend, GpuDevice, QueueKind, WaitStage};
use crate::graph::context::{EvalContext, FrameInfo};
use crate::graph::sync::SyncState;

use super::node_submission;

/// Graphics work recorded against the frame's output target.
pub trait DrawWork<B: Backend> {
    fn record(&mut self, device: &B::Device, frame: &FrameInfo, target: &B::Target) -> Result<B::CommandBuffer>;
}

impl<B, F> DrawWork<B> for F
where
    B: Backend,
    F: FnMut(&B::Device, &FrameInfo, &B::Target) -> Result<B::CommandBuffer>,
{
    fn record(&mut self, device: &B::Device, frame: &FrameInfo, target: &B::Target) -> Result<B::CommandBuffer> {
        self(device, frame, target)
    }
}

/// Records and submits graphics work into `ctx.targets[ctx.output_index]`.
pub struct DrawNode<B: Backend> {
    work: Box<dyn DrawWork<B>>,
    wait_stage: WaitStage,
}

impl<B: Backend> DrawNode<B> {
    pub fn new(work: impl DrawWork<B> + 'static) -> Self {
        Self {
            work: Box::new(work),
            wait_stage: WaitStage::COLOR_ATTACHMENT_OUTPUT,
        }
    }

    pub fn from_fn<F>(record: F) -> Self
    where
        F: FnMut(&B::Device, &FrameInfo, &B::Target) -> Result<B::CommandBuffer> + 'static,
    {
        Self::new(record)
    }

    #[must_use]
    pub fn with_wait_stage(mut self, wait_stage: WaitStage) -> Self {
        self.wait_stage = wait_stage;
        self
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
        let target = ctx.output_target()?;
        let frame = ctx.frame_info();
        let commands = self.work.record(device, &frame, target)?;

        device.submit(
            QueueKind::Graphics,
            node_submission(name, sync, frame.frame_index, vec![commands], self.wait_stage),
        )?;
        Ok(())
    }
}
