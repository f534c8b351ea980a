//! Dependency Graph
//!
//! [`DependencyGraph`] owns its nodes in an arena and drives one traversal
//! per frame.
//!
//! # Frame Protocol
//!
//! ```text
//! graph.wait_until_complete(frame)   // CPU blocks on the frame-blocking fences
//! graph.submit(&mut ctx)             // reset those fences, run every node
//! ctx.needs_reinit ?                 // rebuild targets and retry the same slot
//! ```
//!
//! # Traversal
//!
//! Kahn's algorithm: in-degrees are counted once per submit, start nodes are
//! seeded (acquire nodes first when `seed_acquire_first` is set) and a child
//! is enqueued once its last parent ran. Siblings keep insertion order.
//!
//! # Edge Rules
//!
//! | From | To | Primitive |
//! |------|----|-----------|
//! | GPU | GPU | semaphore |
//! | GPU | CPU | fence |
//! | CPU | any | rejected |
//!
//! Edges are validated before anything is mutated: invalid handles, self and
//! duplicate edges, cycles, present nodes as producers, acquire nodes as
//! semaphore consumers and a second CPU consumer of one fence array are all
//! rejected with the graph unchanged.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use frameflow_core::{
    DeviceAffinity, DeviceError, EdgeKind, FrameflowError, NodeHandle, Result, SchedulerSettings,
};
use rustc_hash::FxHashSet;

use crate::backend::{Backend, GpuDevice, QueueKind, Submission};
use crate::graph::context::EvalContext;
use crate::graph::node::{NodeKind, WorkNode};
use crate::graph::sync::SyncState;

/// Outcome of one [`DependencyGraph::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitReport {
    /// Nodes executed, including nested graphs' nodes only as one node.
    pub executed: usize,
    /// The frame stopped after an out-of-date acquire.
    pub halted: bool,
}

/// Frame scheduler over an arena of [`WorkNode`]s.
///
/// Owned primitives are destroyed when the graph is dropped. Call
/// [`wait_idle`](Self::wait_idle) first if work may still be in flight.
pub struct DependencyGraph<B: Backend> {
    device: Arc<B::Device>,
    settings: SchedulerSettings,
    nodes: Vec<WorkNode<B>>,
    is_start_node: Vec<bool>,
    frame_blocking: Vec<NodeHandle>,
    /// First subgraph node whose frames in flight differ from this graph's.
    mismatched_subgraph: Option<NodeHandle>,
    /// The graph's own waits: fences of its frame-blocking nodes.
    sync: SyncState<B>,
}

impl<B: Backend> DependencyGraph<B> {
    pub fn new(device: Arc<B::Device>, settings: SchedulerSettings) -> Result<Self> {
        settings.validate()?;
        log::debug!(
            "created graph '{}' with {} frames in flight",
            settings.label,
            settings.frames_in_flight
        );
        Ok(Self {
            device,
            sync: SyncState::new(settings.frames_in_flight),
            settings,
            nodes: Vec::new(),
            is_start_node: Vec::new(),
            frame_blocking: Vec::new(),
            mismatched_subgraph: None,
        })
    }

    // === Accessors ===

    #[inline]
    #[must_use]
    pub fn device(&self) -> &Arc<B::Device> {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.settings.frames_in_flight
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.settings.label
    }

    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn node(&self, handle: NodeHandle) -> Option<&WorkNode<B>> {
        self.nodes.get(handle.index())
    }

    /// Every node with its handle, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &WorkNode<B>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (handle_at(index), node))
    }

    #[must_use]
    pub fn is_start_node(&self, handle: NodeHandle) -> bool {
        self.is_start_node.get(handle.index()).copied().unwrap_or(false)
    }

    /// Nodes without incoming edges, in insertion order.
    #[must_use]
    pub fn start_nodes(&self) -> Vec<NodeHandle> {
        self.is_start_node
            .iter()
            .enumerate()
            .filter(|(_, start)| **start)
            .map(|(index, _)| handle_at(index))
            .collect()
    }

    #[inline]
    #[must_use]
    pub fn frame_blocking_nodes(&self) -> &[NodeHandle] {
        &self.frame_blocking
    }

    /// Fences the graph waits on before reusing `frame`.
    #[inline]
    #[must_use]
    pub fn wait_fences(&self, frame: usize) -> &[B::Fence] {
        self.sync.wait_fences(frame)
    }

    // === Construction ===

    /// Takes ownership of `node` and marks it as a start node.
    ///
    /// A subgraph must use the same number of frames in flight as this
    /// graph. A mismatched one is accepted here but every later
    /// [`submit`](Self::submit) fails with
    /// [`FrameflowError::SubgraphFramesMismatch`] before any work is issued.
    pub fn add_node(&mut self, mut node: WorkNode<B>) -> NodeHandle {
        let handle = handle_at(self.nodes.len());
        if let NodeKind::Subgraph(inner) = node.kind()
            && inner.frames_in_flight() != self.frames_in_flight()
        {
            log::warn!(
                "subgraph '{}' has {} frames in flight, '{}' has {}",
                node.name(),
                inner.frames_in_flight(),
                self.settings.label,
                self.frames_in_flight()
            );
            if self.mismatched_subgraph.is_none() {
                self.mismatched_subgraph = Some(handle);
            }
        }

        node.sync = SyncState::new(self.frames_in_flight());
        node.children.clear();
        node.parents.clear();
        log::debug!(
            "{}: added {} node '{}' as {handle}",
            self.settings.label,
            node.kind().kind_name(),
            node.name()
        );

        self.nodes.push(node);
        self.is_start_node.push(true);
        handle
    }

    /// Makes `to` depend on `from`, selecting the primitive from the pair's
    /// affinities.
    pub fn add_edge(&mut self, from: NodeHandle, to: NodeHandle) -> Result<()> {
        self.check_handle(from)?;
        self.check_handle(to)?;
        if from == to {
            return Err(FrameflowError::SelfEdge(from));
        }

        let src = &self.nodes[from.index()];
        let dst = &self.nodes[to.index()];
        let kind = EdgeKind::select(src.affinity(), dst.affinity()).ok_or(FrameflowError::UnsupportedEdge {
            from: src.affinity(),
            to: dst.affinity(),
        })?;
        if !src.kind().can_signal() {
            return Err(FrameflowError::NodeCannotSignal {
                node: from,
                kind: src.kind().kind_name(),
            });
        }
        if src.children.contains(&to) {
            return Err(FrameflowError::DuplicateEdge { from, to });
        }
        match kind {
            EdgeKind::Semaphore if !dst.kind().can_wait() => {
                return Err(FrameflowError::NodeCannotWait {
                    node: to,
                    kind: dst.kind().kind_name(),
                });
            }
            EdgeKind::Fence if src.sync.fence_consumers() > 0 => {
                return Err(FrameflowError::FenceConsumerConflict(from));
            }
            _ => {}
        }
        if self.reaches(to, from) {
            return Err(FrameflowError::CycleDetected { from, to });
        }

        let [src, dst] = self
            .nodes
            .get_disjoint_mut([from.index(), to.index()])
            .map_err(|_| FrameflowError::SelfEdge(from))?;
        match kind {
            EdgeKind::Semaphore => src.add_child_via_semaphore(&self.device, dst)?,
            EdgeKind::Fence => src.add_child_via_fence(&self.device, &mut dst.sync, false)?,
        }
        src.children.push(to);
        dst.parents.push(from);
        self.is_start_node[to.index()] = false;

        log::debug!(
            "{}: edge '{}' {from} -> '{}' {to} via {kind:?}",
            self.settings.label,
            src.name(),
            dst.name()
        );
        Ok(())
    }

    /// Makes the CPU wait on `handle`'s completion before reusing a frame
    /// slot.
    ///
    /// The node's fences are created signaled so the first wait on every
    /// slot returns immediately.
    pub fn flag_node_as_frame_blocking(&mut self, handle: NodeHandle) -> Result<()> {
        self.check_handle(handle)?;
        let node = &self.nodes[handle.index()];
        if node.affinity() == DeviceAffinity::Cpu {
            return Err(FrameflowError::UnsupportedEdge {
                from: DeviceAffinity::Cpu,
                to: DeviceAffinity::Cpu,
            });
        }
        if !node.kind().can_signal() {
            return Err(FrameflowError::NodeCannotSignal {
                node: handle,
                kind: node.kind().kind_name(),
            });
        }
        if node.sync.fence_consumers() > 0 {
            return Err(FrameflowError::FenceConsumerConflict(handle));
        }

        let node = &mut self.nodes[handle.index()];
        node.add_child_via_fence(&self.device, &mut self.sync, true)?;
        self.frame_blocking.push(handle);
        log::debug!(
            "{}: '{}' {handle} is frame-blocking",
            self.settings.label,
            node.name()
        );
        Ok(())
    }

    // === Frame Execution ===

    /// Blocks until every frame-blocking node finished its last submission
    /// for `frame`.
    ///
    /// Fences stay signaled until the next `submit` of the same slot, so
    /// repeated calls return immediately.
    pub fn wait_until_complete(&self, frame: usize) -> Result<()> {
        self.check_frame(frame)?;
        for fence in self.sync.wait_fences(frame) {
            if !self.device.wait_for_fence(fence, None)? {
                return Err(DeviceError::Timeout.into());
            }
        }
        Ok(())
    }

    /// Like [`wait_until_complete`](Self::wait_until_complete), giving up
    /// after `timeout`. Returns `false` if the frame is still running.
    pub fn wait_until_complete_timeout(&self, frame: usize, timeout: Duration) -> Result<bool> {
        self.check_frame(frame)?;
        let deadline = Instant::now() + timeout;
        for fence in self.sync.wait_fences(frame) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.device.wait_for_fence(fence, Some(remaining))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs one frame.
    ///
    /// Resets the graph's fences for `ctx.frame_index`, then executes every
    /// node after all of its parents. Device errors abort the frame and are
    /// returned as is. An out-of-date acquire halts the traversal. Signals
    /// issued by nodes that ran before the halt are consumed on the device,
    /// and fences reset for this slot whose producer did not submit are
    /// re-armed, so the same slot can be submitted again once the caller
    /// rebuilt its targets.
    pub fn submit(&mut self, ctx: &mut EvalContext<'_, B>) -> Result<SubmitReport> {
        let frame = ctx.frame_index;
        self.check_frame(frame)?;
        if let Some(node) = self.mismatched_subgraph {
            let inner = self.nodes[node.index()]
                .as_subgraph()
                .map_or(0, DependencyGraph::frames_in_flight);
            return Err(FrameflowError::SubgraphFramesMismatch {
                node,
                inner,
                outer: self.frames_in_flight(),
            });
        }
        for fence in self.sync.wait_fences(frame) {
            self.device.reset_fence(fence)?;
        }

        let mut traversal = Traversal::new(self);
        let mut visited = FxHashSet::with_capacity_and_hasher(self.nodes.len(), Default::default());
        let mut halted_at = None;

        while let Some(handle) = traversal.next() {
            let node = &mut self.nodes[handle.index()];
            debug_assert!(node.all_parents_visited(&visited));
            node.execute(&self.device, ctx)?;
            visited.insert(handle);

            if ctx.halted {
                halted_at = Some(handle);
                break;
            }
            traversal.complete(&node.children);
        }

        if let Some(halted_at) = halted_at {
            self.release_orphaned_signals(frame, &visited, halted_at)?;
            self.rearm_throttle(frame, &visited, halted_at)?;
            log::info!(
                "{}: frame {frame} halted at {halted_at} after {} of {} nodes",
                self.settings.label,
                visited.len(),
                self.nodes.len()
            );
            return Ok(SubmitReport {
                executed: visited.len(),
                halted: true,
            });
        }

        if visited.len() != self.nodes.len() {
            return Err(FrameflowError::TraversalStalled {
                visited: visited.len(),
                total: self.nodes.len(),
            });
        }
        log::trace!("{}: frame {frame} submitted {} nodes", self.settings.label, visited.len());
        Ok(SubmitReport {
            executed: visited.len(),
            halted: false,
        })
    }

    /// The order in which `submit` would execute the nodes.
    pub fn execution_order(&self) -> Result<Vec<NodeHandle>> {
        let mut traversal = Traversal::new(self);
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(handle) = traversal.next() {
            order.push(handle);
            traversal.complete(&self.nodes[handle.index()].children);
        }
        if order.len() != self.nodes.len() {
            return Err(FrameflowError::TraversalStalled {
                visited: order.len(),
                total: self.nodes.len(),
            });
        }
        Ok(order)
    }

    /// Blocks until the device finished all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    // === Internals ===

    fn check_handle(&self, handle: NodeHandle) -> Result<()> {
        if handle.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(FrameflowError::InvalidNode(handle))
        }
    }

    fn check_frame(&self, frame: usize) -> Result<()> {
        if frame < self.frames_in_flight() {
            Ok(())
        } else {
            Err(FrameflowError::FrameIndexOutOfRange {
                index: frame,
                frames_in_flight: self.frames_in_flight(),
            })
        }
    }

    /// Whether `target` can be reached from `start` along child edges.
    fn reaches(&self, start: NodeHandle, target: NodeHandle) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(handle) = stack.pop() {
            if handle == target {
                return true;
            }
            if std::mem::replace(&mut seen[handle.index()], true) {
                continue;
            }
            stack.extend(self.nodes[handle.index()].children.iter().copied());
        }
        false
    }

    /// Consumes what nodes that ran before a halt signaled for consumers
    /// that never ran: semaphores get a wait-only submission, fences of an
    /// unvisited CPU child are waited on and reset. Otherwise the next
    /// submit of `frame` would signal them a second time.
    fn release_orphaned_signals(
        &self,
        frame: usize,
        visited: &FxHashSet<NodeHandle>,
        halted_at: NodeHandle,
    ) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            let handle = handle_at(index);
            if handle == halted_at || !visited.contains(&handle) {
                continue;
            }
            let child_ran = |affinity: DeviceAffinity| {
                node.children
                    .iter()
                    .any(|child| visited.contains(child) && self.nodes[child.index()].affinity() == affinity)
            };
            let has_child = |affinity: DeviceAffinity| {
                node.children
                    .iter()
                    .any(|child| self.nodes[child.index()].affinity() == affinity)
            };

            if let Some(semaphore) = node.sync.signal_semaphore(frame)
                && has_child(DeviceAffinity::Gpu)
                && !child_ran(DeviceAffinity::Gpu)
            {
                let label = format!("{} drain", node.name());
                self.device.submit(
                    QueueKind::Graphics,
                    Submission::wait_only(&label, std::slice::from_ref(semaphore)),
                )?;
                log::debug!(
                    "{}: consumed orphaned semaphore of '{}' for frame {frame}",
                    self.settings.label,
                    node.name()
                );
            }

            if let Some(fence) = node.sync.signal_fence(frame)
                && has_child(DeviceAffinity::Cpu)
                && !child_ran(DeviceAffinity::Cpu)
            {
                if !self.device.wait_for_fence(fence, None)? {
                    return Err(DeviceError::Timeout.into());
                }
                self.device.reset_fence(fence)?;
            }
        }
        Ok(())
    }

    /// Signals the frame-blocking fences of `frame` that were reset by this
    /// submit but never handed to the device.
    fn rearm_throttle(&self, frame: usize, visited: &FxHashSet<NodeHandle>, halted_at: NodeHandle) -> Result<()> {
        for &handle in &self.frame_blocking {
            if visited.contains(&handle) && handle != halted_at {
                continue;
            }
            let node = &self.nodes[handle.index()];
            if let Some(fence) = node.sync.signal_fence(frame) {
                let label = format!("{} re-arm", node.name());
                self.device
                    .submit(QueueKind::Graphics, Submission::fence_only(&label, fence))?;
                log::debug!("{}: re-armed fence of '{}' for frame {frame}", self.settings.label, node.name());
            }
        }
        Ok(())
    }
}

impl<B: Backend> Drop for DependencyGraph<B> {
    fn drop(&mut self) {
        for node in &mut self.nodes {
            node.destroy_owned(&self.device);
        }
        log::debug!("{}: released {} nodes", self.settings.label, self.nodes.len());
    }
}

fn handle_at(index: usize) -> NodeHandle {
    NodeHandle::new(index as u32)
}

/// Kahn's algorithm state for one pass over a graph.
struct Traversal {
    in_degree: Vec<usize>,
    queue: VecDeque<NodeHandle>,
}

impl Traversal {
    fn new<B: Backend>(graph: &DependencyGraph<B>) -> Self {
        let in_degree = graph.nodes.iter().map(|node| node.parents.len()).collect();
        let starts = graph.start_nodes();

        let queue = if graph.settings.seed_acquire_first {
            let is_acquire = |h: &NodeHandle| matches!(graph.nodes[h.index()].kind(), NodeKind::AcquireImage(_));
            let (acquire, rest): (Vec<_>, Vec<_>) = starts.into_iter().partition(is_acquire);
            acquire.into_iter().chain(rest).collect()
        } else {
            starts.into_iter().collect()
        };

        Self { in_degree, queue }
    }

    fn next(&mut self) -> Option<NodeHandle> {
        self.queue.pop_front()
    }

    /// Marks a node's outgoing edges as satisfied.
    fn complete(&mut self, children: &[NodeHandle]) {
        for &child in children {
            let degree = &mut self.in_degree[child.index()];
            *degree -= 1;
            if *degree == 0 {
                self.queue.push_back(child);
            }
        }
    }
}
