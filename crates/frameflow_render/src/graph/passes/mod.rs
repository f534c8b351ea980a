//! Node Kind Implementations
//!
//! One file per node kind. Each kind exposes an `execute` that issues the
//! frame's work with the owning node's waits and signals attached.

mod acquire;
mod compute;
mod draw;
mod present;

pub use acquire::AcquireNode;
pub use compute::{ComputeNode, ComputeWork};
pub use draw::{DrawNode, DrawWork};
pub use present::PresentNode;

use crate::backend::{Backend, Submission, WaitStage};
use crate::graph::sync::SyncState;

/// Builds a submission for `frame` carrying the node's waits, its signal
/// semaphore and its completion fence.
fn node_submission<'a, B: Backend>(
    label: &'a str,
    sync: &'a SyncState<B>,
    frame: usize,
    command_buffers: Vec<B::CommandBuffer>,
    wait_stage: WaitStage,
) -> Submission<'a, B> {
    Submission {
        label,
        command_buffers,
        wait_semaphores: sync.wait_semaphores(frame),
        wait_stage,
        signal_semaphores: sync.signal_semaphore(frame).map(std::slice::from_ref).unwrap_or_default(),
        signal_fence: sync.signal_fence(frame),
    }
}
