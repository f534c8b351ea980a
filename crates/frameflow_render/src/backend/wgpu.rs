//! wgpu Backend
//!
//! Runs the scheduler on a real GPU through `wgpu`.
//!
//! wgpu exposes a single in-order queue and no explicit semaphores, so:
//!
//! - semaphores are ordering tokens: submission order on the queue already
//!   satisfies every GPU→GPU edge the traversal produces;
//! - fences are completed by `Queue::on_submitted_work_done`, driven by
//!   `Device::poll`;
//! - the presentable chain is a ring of offscreen textures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use frameflow_core::{DeviceError, DeviceResult, Extent2d};

use super::{AcquireOutcome, Backend, ChainStatus, GpuDevice, PresentChain, QueueKind, Submission};

/// Marker type selecting the wgpu handle family.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgpuBackend;

impl Backend for WgpuBackend {
    type Device = WgpuDevice;
    type Semaphore = WgpuSemaphore;
    type Fence = WgpuFence;
    type CommandBuffer = ::wgpu::CommandBuffer;
    type Target = WgpuTarget;
    type Chain = WgpuChain;
}

/// Ordering token standing in for a GPU semaphore.
#[derive(Debug, Clone, Default)]
pub struct WgpuSemaphore(Arc<()>);

#[derive(Debug, Default)]
struct FenceState {
    signaled: AtomicBool,
    pending: AtomicBool,
}

/// CPU-observable completion flag set by the queue's work-done callback.
#[derive(Debug, Clone, Default)]
pub struct WgpuFence(Arc<FenceState>);

impl WgpuFence {
    fn new(signaled: bool) -> Self {
        let fence = Self::default();
        fence.0.signaled.store(signaled, Ordering::Release);
        fence
    }

    fn is_signaled(&self) -> bool {
        self.0.signaled.load(Ordering::Acquire)
    }

    fn is_pending(&self) -> bool {
        self.0.pending.load(Ordering::Acquire)
    }
}

// ─── Device ───────────────────────────────────────────────────────────────────

pub struct WgpuDevice {
    device: ::wgpu::Device,
    queue: ::wgpu::Queue,
}

impl WgpuDevice {
    #[must_use]
    pub fn new(device: ::wgpu::Device, queue: ::wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Requests a device from the default adapter, without a surface.
    pub async fn request_default() -> DeviceResult<Self> {
        let instance = ::wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&::wgpu::RequestAdapterOptions {
                power_preference: ::wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&::wgpu::DeviceDescriptor {
                label: Some("frameflow device"),
                ..Default::default()
            })
            .await
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        Ok(Self::new(device, queue))
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &::wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &::wgpu::Queue {
        &self.queue
    }

    fn poll(&self, block: bool) -> DeviceResult<()> {
        let mode = if block {
            ::wgpu::PollType::wait_indefinitely()
        } else {
            ::wgpu::PollType::Poll
        };
        self.device
            .poll(mode)
            .map(|_| ())
            .map_err(|e| DeviceError::Backend(e.to_string()))
    }
}

impl GpuDevice<WgpuBackend> for WgpuDevice {
    fn create_semaphore(&self) -> DeviceResult<WgpuSemaphore> {
        Ok(WgpuSemaphore::default())
    }

    fn destroy_semaphore(&self, _semaphore: &WgpuSemaphore) {}

    fn create_fence(&self, signaled: bool) -> DeviceResult<WgpuFence> {
        Ok(WgpuFence::new(signaled))
    }

    fn destroy_fence(&self, _fence: &WgpuFence) {}

    fn wait_for_fence(&self, fence: &WgpuFence, timeout: Option<Duration>) -> DeviceResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if fence.is_signaled() {
                return Ok(true);
            }
            if !fence.is_pending() {
                return match timeout {
                    None => Err(DeviceError::Validation(
                        "unbounded wait on a fence with no pending signal".to_string(),
                    )),
                    Some(_) => Ok(false),
                };
            }
            match deadline {
                None => self.poll(true)?,
                Some(deadline) => {
                    self.poll(false)?;
                    if Instant::now() >= deadline {
                        return Ok(fence.is_signaled());
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    fn reset_fence(&self, fence: &WgpuFence) -> DeviceResult<()> {
        if fence.is_pending() {
            return Err(DeviceError::Validation(
                "reset of a fence whose submission is still pending".to_string(),
            ));
        }
        fence.0.signaled.store(false, Ordering::Release);
        Ok(())
    }

    fn is_fence_signaled(&self, fence: &WgpuFence) -> DeviceResult<bool> {
        self.poll(false)?;
        Ok(fence.is_signaled())
    }

    fn submit(&self, queue: QueueKind, submission: Submission<'_, WgpuBackend>) -> DeviceResult<()> {
        if let Some(fence) = submission.signal_fence
            && (fence.is_signaled() || fence.is_pending())
        {
            return Err(DeviceError::Validation(format!(
                "'{}' submitted with a fence that was not reset",
                submission.label
            )));
        }

        log::trace!(
            "wgpu: submitting '{}' on {queue:?} ({} command buffers)",
            submission.label,
            submission.command_buffers.len()
        );
        self.queue.submit(submission.command_buffers);

        if let Some(fence) = submission.signal_fence {
            fence.0.pending.store(true, Ordering::Release);
            let state = Arc::clone(&fence.0);
            self.queue.on_submitted_work_done(move || {
                state.signaled.store(true, Ordering::Release);
                state.pending.store(false, Ordering::Release);
            });
        }
        Ok(())
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        self.poll(true)
    }
}

// ─── Offscreen Chain ──────────────────────────────────────────────────────────

/// One offscreen output texture.
#[derive(Debug)]
pub struct WgpuTarget {
    pub texture: ::wgpu::Texture,
    pub view: ::wgpu::TextureView,
    pub extent: Extent2d,
}

/// A ring of offscreen render targets acting as a presentable chain.
///
/// [`resize`](Self::resize) marks the chain stale: the next acquire reports
/// `OutOfDate` until the owner rebuilds its targets.
pub struct WgpuChain {
    image_count: u32,
    extent: Extent2d,
    format: ::wgpu::TextureFormat,
    next: u32,
    stale: bool,
    presented: Vec<u32>,
}

impl WgpuChain {
    #[must_use]
    pub fn new(image_count: u32, extent: Extent2d, format: ::wgpu::TextureFormat) -> Self {
        Self {
            image_count: image_count.max(1),
            extent,
            format,
            next: 0,
            stale: false,
            presented: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn resize(&mut self, extent: Extent2d) {
        if extent != self.extent {
            self.extent = extent;
            self.stale = true;
        }
    }

    /// Creates one texture per image at the current extent and clears the
    /// stale flag.
    pub fn create_targets(&mut self, device: &WgpuDevice) -> Vec<WgpuTarget> {
        self.stale = false;
        self.next = 0;
        (0..self.image_count)
            .map(|image| {
                let texture = device.device().create_texture(&::wgpu::TextureDescriptor {
                    label: Some(&format!("frameflow chain image {image}")),
                    size: ::wgpu::Extent3d {
                        width: self.extent.width.max(1),
                        height: self.extent.height.max(1),
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: ::wgpu::TextureDimension::D2,
                    format: self.format,
                    usage: ::wgpu::TextureUsages::RENDER_ATTACHMENT | ::wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                });
                let view = texture.create_view(&::wgpu::TextureViewDescriptor::default());
                WgpuTarget {
                    texture,
                    view,
                    extent: self.extent,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }
}

impl PresentChain<WgpuBackend> for WgpuChain {
    fn image_count(&self) -> usize {
        self.image_count as usize
    }

    fn acquire_next(
        &mut self,
        device: &WgpuDevice,
        _signal_semaphore: Option<&WgpuSemaphore>,
        signal_fence: Option<&WgpuFence>,
        _timeout: Option<Duration>,
    ) -> DeviceResult<AcquireOutcome> {
        let index = self.next;
        if self.stale || self.extent.is_empty() {
            return Ok(AcquireOutcome {
                index,
                status: ChainStatus::OutOfDate,
            });
        }
        if let Some(fence) = signal_fence {
            device.submit(QueueKind::Present, Submission::fence_only("acquire", fence))?;
        }
        self.next = (self.next + 1) % self.image_count;
        Ok(AcquireOutcome {
            index,
            status: ChainStatus::Optimal,
        })
    }

    fn present(
        &mut self,
        _device: &WgpuDevice,
        index: u32,
        _wait_semaphores: &[WgpuSemaphore],
    ) -> DeviceResult<ChainStatus> {
        self.presented.push(index);
        Ok(if self.stale {
            ChainStatus::OutOfDate
        } else {
            ChainStatus::Optimal
        })
    }
}
