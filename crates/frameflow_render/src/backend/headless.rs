//! Headless Backend
//!
//! A software stand-in for a GPU. Nothing is rendered; instead the device
//! keeps an in-order queue of submissions and enforces the synchronization
//! rules a real driver's validation layer would:
//!
//! - a binary semaphore must be signaled (or have a signal submitted)
//!   before a submission waits on it, and cannot be signaled twice in a row;
//! - a fence must be unsignaled and idle when it is submitted;
//! - a fence with pending work cannot be reset;
//! - waiting forever on a fence that nothing will signal is reported instead
//!   of hanging.
//!
//! Violations surface as [`DeviceError::Validation`], which lets tests prove
//! that the scheduler wires and resets primitives correctly.
//!
//! # Completion Modes
//!
//! | Mode | Work retires when |
//! |------|-------------------|
//! | `Immediate` | at submission |
//! | `OnWait` | a CPU wait needs it (default) |
//! | `Manual` | [`HeadlessDevice::retire_all`] / [`HeadlessDevice::retire_next`] is called |
//!
//! `Manual` lets a test hold GPU work "in flight" and observe that the frame
//! throttle actually blocks.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use frameflow_core::{DeviceError, DeviceResult, Extent2d};
use parking_lot::{Condvar, Mutex};
use slotmap::SlotMap;

use super::{AcquireOutcome, Backend, ChainStatus, GpuDevice, PresentChain, QueueKind, Submission, WaitStage};

slotmap::new_key_type! {
    /// Semaphore handle of the headless device.
    pub struct HeadlessSemaphore;
    /// Fence handle of the headless device.
    pub struct HeadlessFence;
}

/// Marker type selecting the headless handle family.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessBackend;

impl Backend for HeadlessBackend {
    type Device = HeadlessDevice;
    type Semaphore = HeadlessSemaphore;
    type Fence = HeadlessFence;
    type CommandBuffer = HeadlessCommands;
    type Target = HeadlessTarget;
    type Chain = HeadlessChain;
}

// ─── Commands & Targets ───────────────────────────────────────────────────────

/// A single recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadlessCommand {
    Dispatch { x: u32, y: u32, z: u32 },
    Draw { image: u32, vertex_count: u32 },
    Marker(String),
}

/// Recorded work of one node for one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessCommands {
    commands: Vec<HeadlessCommand>,
}

impl HeadlessCommands {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dispatch(mut self, x: u32, y: u32, z: u32) -> Self {
        self.commands.push(HeadlessCommand::Dispatch { x, y, z });
        self
    }

    #[must_use]
    pub fn draw(mut self, target: &HeadlessTarget, vertex_count: u32) -> Self {
        self.commands.push(HeadlessCommand::Draw {
            image: target.image,
            vertex_count,
        });
        self
    }

    #[must_use]
    pub fn marker(mut self, text: impl Into<String>) -> Self {
        self.commands.push(HeadlessCommand::Marker(text.into()));
        self
    }

    #[must_use]
    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }
}

/// One image of a [`HeadlessChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessTarget {
    pub image: u32,
    pub extent: Extent2d,
}

// ─── Device State ─────────────────────────────────────────────────────────────

/// When submitted work is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    Immediate,
    #[default]
    OnWait,
    Manual,
}

/// A submission as the device saw it, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub label: String,
    pub queue: QueueKind,
    pub wait_semaphores: Vec<HeadlessSemaphore>,
    pub wait_stage: WaitStage,
    pub signal_semaphores: Vec<HeadlessSemaphore>,
    pub signal_fence: Option<HeadlessFence>,
    pub commands: Vec<HeadlessCommand>,
}

/// Primitive lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub semaphores_created: usize,
    pub semaphores_destroyed: usize,
    pub fences_created: usize,
    pub fences_destroyed: usize,
    pub submissions: usize,
    pub retired: usize,
}

impl DeviceStats {
    #[must_use]
    pub fn live_semaphores(&self) -> usize {
        self.semaphores_created - self.semaphores_destroyed
    }

    #[must_use]
    pub fn live_fences(&self) -> usize {
        self.fences_created - self.fences_destroyed
    }
}

#[derive(Debug, Default)]
struct SemaphoreState {
    /// A signal was submitted and no wait has consumed it yet.
    armed: bool,
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    /// A submission carrying this fence has not retired yet.
    pending: bool,
}

struct PendingWork {
    serial: u64,
    fence: Option<HeadlessFence>,
}

#[derive(Default)]
struct DeviceState {
    semaphores: SlotMap<HeadlessSemaphore, SemaphoreState>,
    fences: SlotMap<HeadlessFence, FenceState>,
    queue: VecDeque<PendingWork>,
    log: Vec<SubmissionRecord>,
    stats: DeviceStats,
    next_serial: u64,
    primitive_budget: Option<usize>,
    lost: bool,
}

impl DeviceState {
    fn live_primitives(&self) -> usize {
        self.semaphores.len() + self.fences.len()
    }

    fn check_budget(&self) -> DeviceResult<()> {
        match self.primitive_budget {
            Some(budget) if self.live_primitives() >= budget => Err(DeviceError::OutOfDeviceMemory),
            _ => Ok(()),
        }
    }

    fn retire_front(&mut self) -> Option<u64> {
        let work = self.queue.pop_front()?;
        if let Some(fence) = work.fence
            && let Some(state) = self.fences.get_mut(fence)
        {
            state.pending = false;
            state.signaled = true;
        }
        self.stats.retired += 1;
        Some(work.serial)
    }

    /// Retires queued work up to and including the submission that signals
    /// `fence`.
    fn retire_through(&mut self, fence: HeadlessFence) {
        while let Some(front) = self.queue.front() {
            let is_target = front.fence == Some(fence);
            self.retire_front();
            if is_target {
                break;
            }
        }
    }
}

// ─── Device ───────────────────────────────────────────────────────────────────

/// Software device implementing [`GpuDevice`] for [`HeadlessBackend`].
pub struct HeadlessDevice {
    mode: CompletionMode,
    state: Mutex<DeviceState>,
    retired: Condvar,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(CompletionMode::default())
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new(mode: CompletionMode) -> Self {
        Self {
            mode,
            state: Mutex::new(DeviceState::default()),
            retired: Condvar::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Limits the number of live primitives; creation beyond it fails with
    /// [`DeviceError::OutOfDeviceMemory`].
    pub fn set_primitive_budget(&self, budget: Option<usize>) {
        self.state.lock().primitive_budget = budget;
    }

    /// Simulates device loss: every later submission fails.
    pub fn lose_device(&self) {
        self.state.lock().lost = true;
    }

    /// Completes the oldest outstanding submission. Returns `false` if the
    /// queue was empty.
    pub fn retire_next(&self) -> bool {
        let retired = self.state.lock().retire_front().is_some();
        if retired {
            self.retired.notify_all();
        }
        retired
    }

    /// Completes every outstanding submission.
    pub fn retire_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut count = 0;
        while state.retire_front().is_some() {
            count += 1;
        }
        drop(state);
        if count > 0 {
            self.retired.notify_all();
        }
        count
    }

    /// Number of submissions that have not retired yet.
    #[must_use]
    pub fn pending_work(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        self.state.lock().stats
    }

    /// Every submission so far, in submission order.
    #[must_use]
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().log.clone()
    }

    /// Labels of every submission so far, in submission order.
    #[must_use]
    pub fn submission_labels(&self) -> Vec<String> {
        self.state.lock().log.iter().map(|r| r.label.clone()).collect()
    }

    pub fn clear_submission_log(&self) {
        self.state.lock().log.clear();
    }

    fn validate(state: &DeviceState, submission: &Submission<'_, HeadlessBackend>) -> DeviceResult<()> {
        for &semaphore in submission.wait_semaphores {
            let sem = state.semaphores.get(semaphore).ok_or_else(|| {
                DeviceError::Validation(format!("'{}' waits on a destroyed semaphore", submission.label))
            })?;
            if !sem.armed {
                return Err(DeviceError::Validation(format!(
                    "'{}' waits on semaphore {semaphore:?} with no pending signal",
                    submission.label
                )));
            }
        }
        for &semaphore in submission.signal_semaphores {
            let sem = state.semaphores.get(semaphore).ok_or_else(|| {
                DeviceError::Validation(format!("'{}' signals a destroyed semaphore", submission.label))
            })?;
            // A semaphore consumed by this same submission may be re-signaled.
            let consumed_here = submission.wait_semaphores.contains(&semaphore);
            if sem.armed && !consumed_here {
                return Err(DeviceError::Validation(format!(
                    "'{}' signals semaphore {semaphore:?} that is already signaled",
                    submission.label
                )));
            }
        }
        if let Some(&fence) = submission.signal_fence {
            let f = state.fences.get(fence).ok_or_else(|| {
                DeviceError::Validation(format!("'{}' signals a destroyed fence", submission.label))
            })?;
            if f.signaled || f.pending {
                return Err(DeviceError::Validation(format!(
                    "'{}' submitted with fence {fence:?} that was not reset",
                    submission.label
                )));
            }
        }
        Ok(())
    }
}

impl GpuDevice<HeadlessBackend> for HeadlessDevice {
    fn create_semaphore(&self) -> DeviceResult<HeadlessSemaphore> {
        let mut state = self.state.lock();
        state.check_budget()?;
        state.stats.semaphores_created += 1;
        Ok(state.semaphores.insert(SemaphoreState::default()))
    }

    fn destroy_semaphore(&self, semaphore: &HeadlessSemaphore) {
        let mut state = self.state.lock();
        if state.semaphores.remove(*semaphore).is_some() {
            state.stats.semaphores_destroyed += 1;
        }
    }

    fn create_fence(&self, signaled: bool) -> DeviceResult<HeadlessFence> {
        let mut state = self.state.lock();
        state.check_budget()?;
        state.stats.fences_created += 1;
        Ok(state.fences.insert(FenceState {
            signaled,
            pending: false,
        }))
    }

    fn destroy_fence(&self, fence: &HeadlessFence) {
        let mut state = self.state.lock();
        if state.fences.remove(*fence).is_some() {
            state.stats.fences_destroyed += 1;
        }
    }

    fn wait_for_fence(&self, fence: &HeadlessFence, timeout: Option<Duration>) -> DeviceResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            let f = state
                .fences
                .get(*fence)
                .ok_or_else(|| DeviceError::Validation(format!("wait on destroyed fence {fence:?}")))?;
            if f.signaled {
                return Ok(true);
            }
            if !f.pending {
                if timeout.is_none() {
                    return Err(DeviceError::Validation(format!(
                        "unbounded wait on fence {fence:?} that has no pending signal"
                    )));
                }
                return Ok(false);
            }

            match self.mode {
                CompletionMode::Immediate | CompletionMode::OnWait => {
                    state.retire_through(*fence);
                }
                CompletionMode::Manual => match deadline {
                    Some(deadline) => {
                        if self.retired.wait_until(&mut state, deadline).timed_out() {
                            let signaled = state.fences.get(*fence).is_some_and(|f| f.signaled);
                            return Ok(signaled);
                        }
                    }
                    None => self.retired.wait(&mut state),
                },
            }
        }
    }

    fn reset_fence(&self, fence: &HeadlessFence) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let f = state
            .fences
            .get_mut(*fence)
            .ok_or_else(|| DeviceError::Validation(format!("reset of destroyed fence {fence:?}")))?;
        if f.pending {
            return Err(DeviceError::Validation(format!(
                "reset of fence {fence:?} while its submission is still pending"
            )));
        }
        f.signaled = false;
        Ok(())
    }

    fn is_fence_signaled(&self, fence: &HeadlessFence) -> DeviceResult<bool> {
        let state = self.state.lock();
        state
            .fences
            .get(*fence)
            .map(|f| f.signaled)
            .ok_or_else(|| DeviceError::Validation(format!("query of destroyed fence {fence:?}")))
    }

    fn submit(&self, queue: QueueKind, submission: Submission<'_, HeadlessBackend>) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(DeviceError::DeviceLost);
        }
        Self::validate(&state, &submission)?;

        for &semaphore in submission.wait_semaphores {
            if let Some(sem) = state.semaphores.get_mut(semaphore) {
                sem.armed = false;
            }
        }
        for &semaphore in submission.signal_semaphores {
            if let Some(sem) = state.semaphores.get_mut(semaphore) {
                sem.armed = true;
            }
        }
        let fence = submission.signal_fence.copied();
        if let Some(fence) = fence
            && let Some(f) = state.fences.get_mut(fence)
        {
            f.pending = true;
        }

        let serial = state.next_serial;
        state.next_serial += 1;
        state.stats.submissions += 1;
        state.queue.push_back(PendingWork { serial, fence });
        state.log.push(SubmissionRecord {
            label: submission.label.to_string(),
            queue,
            wait_semaphores: submission.wait_semaphores.to_vec(),
            wait_stage: submission.wait_stage,
            signal_semaphores: submission.signal_semaphores.to_vec(),
            signal_fence: fence,
            commands: submission
                .command_buffers
                .into_iter()
                .flat_map(|cb| cb.commands)
                .collect(),
        });
        log::trace!("headless: queued '{}' on {queue:?} (serial {serial})", submission.label);

        if self.mode == CompletionMode::Immediate {
            state.retire_front();
            drop(state);
            self.retired.notify_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        match self.mode {
            CompletionMode::Immediate | CompletionMode::OnWait => {
                self.retire_all();
            }
            CompletionMode::Manual => {
                let mut state = self.state.lock();
                while !state.queue.is_empty() {
                    self.retired.wait(&mut state);
                }
            }
        }
        Ok(())
    }
}

// ─── Presentable Chain ────────────────────────────────────────────────────────

/// A ring of headless output images.
///
/// Acquire and present outcomes can be scripted to simulate a window that
/// was resized or minimized.
pub struct HeadlessChain {
    image_count: u32,
    extent: Extent2d,
    next: u32,
    acquire_script: VecDeque<ChainStatus>,
    present_script: VecDeque<ChainStatus>,
    presented: Vec<u32>,
}

impl HeadlessChain {
    /// # Panics
    ///
    /// Panics if `image_count` is zero.
    #[must_use]
    pub fn new(image_count: u32, extent: Extent2d) -> Self {
        assert!(image_count > 0, "a chain needs at least one image");
        Self {
            image_count,
            extent,
            next: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            presented: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Builds one target per image, in image order.
    #[must_use]
    pub fn create_targets(&self) -> Vec<HeadlessTarget> {
        (0..self.image_count)
            .map(|image| HeadlessTarget {
                image,
                extent: self.extent,
            })
            .collect()
    }

    /// Rebuilds the chain for a new surface size.
    pub fn recreate(&mut self, extent: Extent2d) {
        log::debug!(
            "headless chain recreated: {}x{} -> {}x{}",
            self.extent.width,
            self.extent.height,
            extent.width,
            extent.height
        );
        self.extent = extent;
        self.next = 0;
        self.acquire_script.clear();
        self.present_script.clear();
    }

    /// Queues the status reported by the next acquire.
    pub fn script_acquire(&mut self, status: ChainStatus) {
        self.acquire_script.push_back(status);
    }

    /// Queues the status reported by the next present.
    pub fn script_present(&mut self, status: ChainStatus) {
        self.present_script.push_back(status);
    }

    /// Image indices presented so far.
    #[must_use]
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }
}

impl PresentChain<HeadlessBackend> for HeadlessChain {
    fn image_count(&self) -> usize {
        self.image_count as usize
    }

    fn acquire_next(
        &mut self,
        device: &HeadlessDevice,
        signal_semaphore: Option<&HeadlessSemaphore>,
        signal_fence: Option<&HeadlessFence>,
        _timeout: Option<Duration>,
    ) -> DeviceResult<AcquireOutcome> {
        let status = self.acquire_script.pop_front().unwrap_or(ChainStatus::Optimal);
        let index = self.next;
        if status == ChainStatus::OutOfDate {
            return Ok(AcquireOutcome { index, status });
        }

        let signal = signal_semaphore.map(std::slice::from_ref).unwrap_or_default();
        device.submit(
            QueueKind::Present,
            Submission {
                label: "acquire",
                command_buffers: Vec::new(),
                wait_semaphores: &[],
                wait_stage: WaitStage::TOP_OF_PIPE,
                signal_semaphores: signal,
                signal_fence,
            },
        )?;
        self.next = (self.next + 1) % self.image_count;
        Ok(AcquireOutcome { index, status })
    }

    fn present(
        &mut self,
        device: &HeadlessDevice,
        index: u32,
        wait_semaphores: &[HeadlessSemaphore],
    ) -> DeviceResult<ChainStatus> {
        if index >= self.image_count {
            return Err(DeviceError::Validation(format!(
                "present of image {index} on a chain of {} images",
                self.image_count
            )));
        }
        device.submit(
            QueueKind::Present,
            Submission {
                label: "present",
                command_buffers: Vec::new(),
                wait_semaphores,
                wait_stage: WaitStage::ALL_COMMANDS,
                signal_semaphores: &[],
                signal_fence: None,
            },
        )?;
        self.presented.push(index);
        Ok(self.present_script.pop_front().unwrap_or(ChainStatus::Optimal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_signal(device: &HeadlessDevice, label: &str, sem: &HeadlessSemaphore) -> DeviceResult<()> {
        device.submit(
            QueueKind::Graphics,
            Submission {
                label,
                command_buffers: Vec::new(),
                wait_semaphores: &[],
                wait_stage: WaitStage::ALL_COMMANDS,
                signal_semaphores: std::slice::from_ref(sem),
                signal_fence: None,
            },
        )
    }

    fn submit_wait(device: &HeadlessDevice, label: &str, sem: &HeadlessSemaphore) -> DeviceResult<()> {
        device.submit(
            QueueKind::Graphics,
            Submission {
                label,
                command_buffers: Vec::new(),
                wait_semaphores: std::slice::from_ref(sem),
                wait_stage: WaitStage::ALL_COMMANDS,
                signal_semaphores: &[],
                signal_fence: None,
            },
        )
    }

    #[test]
    fn waiting_on_unsignaled_semaphore_is_rejected() {
        let device = HeadlessDevice::default();
        let sem = device.create_semaphore().unwrap();
        let err = submit_wait(&device, "consumer", &sem).unwrap_err();
        assert!(matches!(err, DeviceError::Validation(_)));
    }

    #[test]
    fn double_signal_is_rejected_until_consumed() {
        let device = HeadlessDevice::default();
        let sem = device.create_semaphore().unwrap();
        submit_signal(&device, "first", &sem).unwrap();
        assert!(submit_signal(&device, "second", &sem).is_err());
        submit_wait(&device, "consumer", &sem).unwrap();
        submit_signal(&device, "third", &sem).unwrap();
    }

    #[test]
    fn fence_must_be_reset_before_resubmission() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();
        device.submit(QueueKind::Graphics, Submission::fence_only("a", &fence)).unwrap();
        assert!(device.wait_for_fence(&fence, None).unwrap());
        assert!(device.submit(QueueKind::Graphics, Submission::fence_only("b", &fence)).is_err());
        device.reset_fence(&fence).unwrap();
        device.submit(QueueKind::Graphics, Submission::fence_only("c", &fence)).unwrap();
    }

    #[test]
    fn wait_only_submission_consumes_pending_signal() {
        let device = HeadlessDevice::default();
        let sem = device.create_semaphore().unwrap();
        submit_signal(&device, "producer", &sem).unwrap();

        let waits = std::slice::from_ref(&sem);
        device.submit(QueueKind::Graphics, Submission::wait_only("drain", waits)).unwrap();
        assert!(device.submit(QueueKind::Graphics, Submission::wait_only("again", waits)).is_err());
        submit_signal(&device, "producer", &sem).unwrap();
    }

    #[test]
    fn on_wait_mode_retires_lazily() {
        let device = HeadlessDevice::new(CompletionMode::OnWait);
        let fence = device.create_fence(false).unwrap();
        device.submit(QueueKind::Graphics, Submission::fence_only("work", &fence)).unwrap();
        assert!(!device.is_fence_signaled(&fence).unwrap());
        assert_eq!(device.pending_work(), 1);
        assert!(device.wait_for_fence(&fence, None).unwrap());
        assert_eq!(device.pending_work(), 0);
    }

    #[test]
    fn manual_mode_times_out_until_retired() {
        let device = HeadlessDevice::new(CompletionMode::Manual);
        let fence = device.create_fence(false).unwrap();
        device.submit(QueueKind::Graphics, Submission::fence_only("work", &fence)).unwrap();
        assert!(!device.wait_for_fence(&fence, Some(Duration::from_millis(5))).unwrap());
        assert!(device.retire_next());
        assert!(device.wait_for_fence(&fence, Some(Duration::from_millis(5))).unwrap());
    }

    #[test]
    fn reset_of_pending_fence_is_rejected() {
        let device = HeadlessDevice::new(CompletionMode::Manual);
        let fence = device.create_fence(false).unwrap();
        device.submit(QueueKind::Graphics, Submission::fence_only("work", &fence)).unwrap();
        assert!(device.reset_fence(&fence).is_err());
    }

    #[test]
    fn unbounded_wait_on_idle_fence_is_reported() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();
        assert!(device.wait_for_fence(&fence, None).is_err());
    }

    #[test]
    fn primitive_budget_limits_creation() {
        let device = HeadlessDevice::default();
        device.set_primitive_budget(Some(1));
        let sem = device.create_semaphore().unwrap();
        assert_eq!(device.create_fence(false).unwrap_err(), DeviceError::OutOfDeviceMemory);
        device.destroy_semaphore(&sem);
        assert!(device.create_fence(false).is_ok());
    }

    #[test]
    fn out_of_date_acquire_signals_nothing() {
        let device = HeadlessDevice::default();
        let sem = device.create_semaphore().unwrap();
        let mut chain = HeadlessChain::new(3, Extent2d::new(64, 64));
        chain.script_acquire(ChainStatus::OutOfDate);

        let outcome = chain.acquire_next(&device, Some(&sem), None, None).unwrap();
        assert_eq!(outcome.status, ChainStatus::OutOfDate);
        assert!(device.submissions().is_empty());

        let outcome = chain.acquire_next(&device, Some(&sem), None, None).unwrap();
        assert_eq!(outcome, AcquireOutcome { index: 0, status: ChainStatus::Optimal });
        let next = chain.acquire_next(&device, None, None, None).unwrap();
        assert_eq!(next.index, 1);
    }
}
