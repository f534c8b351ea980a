//! Device Backend Abstraction
//!
//! The scheduler never talks to a graphics API directly. Everything it needs
//! from the outside world is expressed by three traits:
//!
//! - [`Backend`]: ties together the concrete handle types of one API
//!   (device, semaphore, fence, command buffer, target, presentable chain).
//! - [`GpuDevice`]: primitive lifecycle, fence waits and queue submission.
//! - [`PresentChain`]: acquiring and presenting output images.
//!
//! # Provided Backends
//!
//! | Backend | Availability | Notes |
//! |---------|--------------|-------|
//! | [`headless`] | Always | Software queue; validates sync rules, used by tests |
//! | `wgpu` | `wgpu` feature | In-order wgpu queue, offscreen target ring |
//!
//! # Handle Semantics
//!
//! Semaphore and fence handles are `Clone`: a node owns the primitive it
//! signals, and every consumer keeps a cloned handle in its wait list. Only
//! the owner ever destroys a primitive.

pub mod headless;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use frameflow_core::DeviceResult;

// ─── Backend ──────────────────────────────────────────────────────────────────

/// A family of handle types provided by one graphics API.
pub trait Backend: Sized + 'static {
    /// Logical device used to create primitives and submit work.
    type Device: GpuDevice<Self>;
    /// GPU→GPU ordering primitive.
    type Semaphore: Clone + fmt::Debug;
    /// GPU→CPU completion primitive.
    type Fence: Clone + fmt::Debug;
    /// Recorded work ready for submission.
    type CommandBuffer;
    /// One output target (framebuffer, texture view, ...).
    type Target;
    /// Presentable chain of output images.
    type Chain: PresentChain<Self>;
}

// ─── Submission ───────────────────────────────────────────────────────────────

/// Queue a submission is issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Present,
}

bitflags! {
    /// Pipeline stages at which a submission waits on its semaphores.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WaitStage: u32 {
        const TOP_OF_PIPE             = 1 << 0;
        const TRANSFER                = 1 << 1;
        const COMPUTE_SHADER          = 1 << 2;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 3;
        const ALL_COMMANDS            = 1 << 4;
    }
}

/// One batch of recorded work with its synchronization.
///
/// The submission waits on every semaphore in `wait_semaphores` at
/// `wait_stage`, signals every semaphore in `signal_semaphores` once the
/// work completes, and finally signals `signal_fence` if present.
pub struct Submission<'a, B: Backend> {
    pub label: &'a str,
    pub command_buffers: Vec<B::CommandBuffer>,
    pub wait_semaphores: &'a [B::Semaphore],
    pub wait_stage: WaitStage,
    pub signal_semaphores: &'a [B::Semaphore],
    pub signal_fence: Option<&'a B::Fence>,
}

impl<'a, B: Backend> Submission<'a, B> {
    /// A submission without work or semaphores that only signals `fence`
    /// once everything submitted earlier on the queue has completed.
    #[must_use]
    pub fn fence_only(label: &'a str, fence: &'a B::Fence) -> Self {
        Self {
            label,
            command_buffers: Vec::new(),
            wait_semaphores: &[],
            wait_stage: WaitStage::ALL_COMMANDS,
            signal_semaphores: &[],
            signal_fence: Some(fence),
        }
    }

    /// A submission without work that only consumes `semaphores`, returning
    /// them to the unsignaled state.
    #[must_use]
    pub fn wait_only(label: &'a str, semaphores: &'a [B::Semaphore]) -> Self {
        Self {
            label,
            command_buffers: Vec::new(),
            wait_semaphores: semaphores,
            wait_stage: WaitStage::ALL_COMMANDS,
            signal_semaphores: &[],
            signal_fence: None,
        }
    }
}

// ─── Device ───────────────────────────────────────────────────────────────────

/// Logical device capability consumed by the scheduler.
pub trait GpuDevice<B: Backend> {
    fn create_semaphore(&self) -> DeviceResult<B::Semaphore>;

    /// Releases a semaphore. Must not be called while work referencing it
    /// is still pending.
    fn destroy_semaphore(&self, semaphore: &B::Semaphore);

    /// Creates a fence, optionally in the already signaled state.
    fn create_fence(&self, signaled: bool) -> DeviceResult<B::Fence>;

    fn destroy_fence(&self, fence: &B::Fence);

    /// Blocks until `fence` is signaled.
    ///
    /// Returns `Ok(false)` if `timeout` expired first; `None` waits forever.
    fn wait_for_fence(&self, fence: &B::Fence, timeout: Option<Duration>) -> DeviceResult<bool>;

    /// Returns the fence to the unsignaled state.
    fn reset_fence(&self, fence: &B::Fence) -> DeviceResult<()>;

    /// Non-blocking fence query.
    fn is_fence_signaled(&self, fence: &B::Fence) -> DeviceResult<bool>;

    fn submit(&self, queue: QueueKind, submission: Submission<'_, B>) -> DeviceResult<()>;

    /// Blocks until all submitted work has completed.
    fn wait_idle(&self) -> DeviceResult<()>;
}

// ─── Presentable Chain ────────────────────────────────────────────────────────

/// Health of the presentable chain reported by acquire and present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainStatus {
    /// The chain matches the surface.
    Optimal,
    /// Usable, but no longer matches the surface exactly.
    Suboptimal,
    /// Unusable; nothing was acquired or presented.
    OutOfDate,
}

impl ChainStatus {
    /// Whether the owner should rebuild surface-dependent resources.
    #[inline]
    #[must_use]
    pub fn needs_reinit(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

/// Result of acquiring an output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOutcome {
    /// Index into the context's target list.
    pub index: u32,
    pub status: ChainStatus,
}

/// Presentable surface chain capability.
pub trait PresentChain<B: Backend> {
    /// Number of images in the chain.
    fn image_count(&self) -> usize;

    /// Acquires the next output image.
    ///
    /// `signal_semaphore` and `signal_fence` are signaled once the image is
    /// available, unless the outcome is [`ChainStatus::OutOfDate`], in which
    /// case neither is touched.
    fn acquire_next(
        &mut self,
        device: &B::Device,
        signal_semaphore: Option<&B::Semaphore>,
        signal_fence: Option<&B::Fence>,
        timeout: Option<Duration>,
    ) -> DeviceResult<AcquireOutcome>;

    /// Queues presentation of `index` after all `wait_semaphores` signal.
    fn present(
        &mut self,
        device: &B::Device,
        index: u32,
        wait_semaphores: &[B::Semaphore],
    ) -> DeviceResult<ChainStatus>;
}
