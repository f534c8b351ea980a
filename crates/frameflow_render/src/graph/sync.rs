//! Per-Node Synchronization State
//!
//! Every node carries one [`SyncState`]: the primitives it owns (signals)
//! and the borrowed handles it waits on, one slot per frame in flight.
//!
//! | Field | Ownership | Created |
//! |-------|-----------|---------|
//! | `signal_semaphores` | owned | on the first outgoing GPU→GPU edge |
//! | `wait_semaphores[f]` | borrowed | one per incoming GPU→GPU edge |
//! | `signal_fences` | owned | on the first outgoing GPU→CPU edge |
//! | `wait_fences[f]` | borrowed | one per incoming GPU→CPU edge |
//!
//! Owned arrays are created for all frames at once. If creation fails part
//! way through, the members already created are destroyed before the error
//! is returned, so a node never holds a partial array.

use frameflow_core::DeviceResult;
use smallvec::SmallVec;

use crate::backend::{Backend, GpuDevice};

/// Borrowed wait handles of one frame slot.
pub type WaitList<T> = SmallVec<[T; 4]>;

pub struct SyncState<B: Backend> {
    frames_in_flight: usize,
    signal_semaphores: Option<Box<[B::Semaphore]>>,
    wait_semaphores: Box<[WaitList<B::Semaphore>]>,
    signal_fences: Option<Box<[B::Fence]>>,
    fences_presignaled: bool,
    fence_consumers: usize,
    wait_fences: Box<[WaitList<B::Fence>]>,
}

impl<B: Backend> SyncState<B> {
    #[must_use]
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight,
            signal_semaphores: None,
            wait_semaphores: (0..frames_in_flight).map(|_| WaitList::new()).collect(),
            signal_fences: None,
            fences_presignaled: false,
            fence_consumers: 0,
            wait_fences: (0..frames_in_flight).map(|_| WaitList::new()).collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    // === Accessors ===

    #[inline]
    #[must_use]
    pub fn signal_semaphores(&self) -> Option<&[B::Semaphore]> {
        self.signal_semaphores.as_deref()
    }

    /// The semaphore signaled for `frame`, if this node has outgoing
    /// semaphore edges.
    #[inline]
    #[must_use]
    pub fn signal_semaphore(&self, frame: usize) -> Option<&B::Semaphore> {
        self.signal_semaphores.as_deref().and_then(|s| s.get(frame))
    }

    #[inline]
    #[must_use]
    pub fn wait_semaphores(&self, frame: usize) -> &[B::Semaphore] {
        self.wait_semaphores.get(frame).map_or(&[], |w| w.as_slice())
    }

    #[inline]
    #[must_use]
    pub fn signal_fences(&self) -> Option<&[B::Fence]> {
        self.signal_fences.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn signal_fence(&self, frame: usize) -> Option<&B::Fence> {
        self.signal_fences.as_deref().and_then(|f| f.get(frame))
    }

    #[inline]
    #[must_use]
    pub fn wait_fences(&self, frame: usize) -> &[B::Fence] {
        self.wait_fences.get(frame).map_or(&[], |w| w.as_slice())
    }

    /// Whether the owned fences were created in the signaled state.
    #[inline]
    #[must_use]
    pub fn fences_presignaled(&self) -> bool {
        self.fences_presignaled
    }

    /// Number of CPU-side waiters on the owned fences.
    #[inline]
    #[must_use]
    pub fn fence_consumers(&self) -> usize {
        self.fence_consumers
    }

    // === Wiring ===

    /// Returns the owned semaphores, creating them on first use.
    pub fn ensure_semaphores(&mut self, device: &B::Device) -> DeviceResult<&[B::Semaphore]> {
        if self.signal_semaphores.is_none() {
            let created = create_per_frame(
                self.frames_in_flight,
                || device.create_semaphore(),
                |s| device.destroy_semaphore(s),
            )?;
            self.signal_semaphores = Some(created);
        }
        Ok(self.signal_semaphores.as_deref().unwrap_or_default())
    }

    /// Returns the owned fences, creating them on first use.
    ///
    /// `signaled` only applies when the fences do not exist yet.
    pub fn ensure_fences(&mut self, device: &B::Device, signaled: bool) -> DeviceResult<&[B::Fence]> {
        if self.signal_fences.is_none() {
            let created = create_per_frame(
                self.frames_in_flight,
                || device.create_fence(signaled),
                |f| device.destroy_fence(f),
            )?;
            self.signal_fences = Some(created);
            self.fences_presignaled = signaled;
        }
        Ok(self.signal_fences.as_deref().unwrap_or_default())
    }

    pub(crate) fn add_fence_consumer(&mut self) {
        self.fence_consumers += 1;
    }

    /// Appends one handle per frame to the semaphore wait lists.
    pub fn push_wait_semaphores(&mut self, per_frame: &[B::Semaphore]) {
        debug_assert_eq!(per_frame.len(), self.frames_in_flight);
        for (list, semaphore) in self.wait_semaphores.iter_mut().zip(per_frame) {
            list.push(semaphore.clone());
        }
    }

    /// Appends one handle per frame to the fence wait lists.
    pub fn push_wait_fences(&mut self, per_frame: &[B::Fence]) {
        debug_assert_eq!(per_frame.len(), self.frames_in_flight);
        for (list, fence) in self.wait_fences.iter_mut().zip(per_frame) {
            list.push(fence.clone());
        }
    }

    // === Teardown ===

    /// Destroys the owned primitives. Borrowed wait handles are dropped
    /// without being destroyed.
    pub fn destroy_owned(&mut self, device: &B::Device) {
        if let Some(semaphores) = self.signal_semaphores.take() {
            for semaphore in &semaphores {
                device.destroy_semaphore(semaphore);
            }
        }
        if let Some(fences) = self.signal_fences.take() {
            for fence in &fences {
                device.destroy_fence(fence);
            }
        }
        for list in &mut self.wait_semaphores {
            list.clear();
        }
        for list in &mut self.wait_fences {
            list.clear();
        }
    }
}

/// Creates one primitive per frame. On failure the already created
/// primitives are released and the device error is returned.
fn create_per_frame<T>(
    frames: usize,
    mut create: impl FnMut() -> DeviceResult<T>,
    mut destroy: impl FnMut(&T),
) -> DeviceResult<Box<[T]>> {
    let mut created = Vec::with_capacity(frames);
    for _ in 0..frames {
        match create() {
            Ok(primitive) => created.push(primitive),
            Err(err) => {
                for primitive in &created {
                    destroy(primitive);
                }
                return Err(err);
            }
        }
    }
    Ok(created.into_boxed_slice())
}
