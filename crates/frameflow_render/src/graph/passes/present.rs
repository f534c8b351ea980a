use frameflow_core::{FrameflowError, Result};

use crate::backend::{Backend, ChainStatus, PresentChain};
use crate::graph::context::EvalContext;
use crate::graph::sync::SyncState;

/// Presents the acquired image once every incoming semaphore has signaled.
///
/// Presentation has no completion signal, so a present node never has
/// outgoing edges. A non-optimal present status is logged only; the next
/// acquire reports it through `needs_reinit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresentNode;

impl PresentNode {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn execute<B: Backend>(
        &self,
        name: &str,
        sync: &SyncState<B>,
        device: &B::Device,
        ctx: &mut EvalContext<'_, B>,
    ) -> Result<()> {
        if !ctx.has_output() {
            return Err(FrameflowError::MissingTarget {
                index: ctx.output_index,
                available: ctx.targets.len(),
            });
        }

        let status = ctx
            .presentable_chain
            .present(device, ctx.output_index, sync.wait_semaphores(ctx.frame_index))?;
        if status != ChainStatus::Optimal {
            log::debug!("'{name}': present of image {} returned {status:?}", ctx.output_index);
        }
        Ok(())
    }
}
