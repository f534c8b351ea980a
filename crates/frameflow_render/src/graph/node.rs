//! Work Nodes
//!
//! A [`WorkNode`] is one schedulable unit: a name, a [`NodeKind`] deciding
//! what it does, its relations inside the owning graph and its
//! synchronization state.
//!
//! | Kind | Affinity | Signals | Waits |
//! |------|----------|---------|-------|
//! | `AcquireImage` | GPU | semaphore, fence | - |
//! | `Compute` | GPU | semaphore, fence | semaphores |
//! | `DrawableSubmit` | GPU | semaphore, fence | semaphores |
//! | `Present` | GPU | - | semaphores |
//! | `Subgraph` | CPU | - | fences |

use frameflow_core::{DeviceAffinity, NodeHandle, Result};
use rustc_hash::FxHashSet;

use crate::backend::{Backend, GpuDevice};
use crate::graph::context::{EvalContext, FrameInfo};
use crate::graph::graph::DependencyGraph;
use crate::graph::passes::{AcquireNode, ComputeNode, ComputeWork, DrawNode, DrawWork, PresentNode};
use crate::graph::sync::SyncState;

/// What a node does when executed.
pub enum NodeKind<B: Backend> {
    AcquireImage(AcquireNode),
    Compute(ComputeNode<B>),
    DrawableSubmit(DrawNode<B>),
    Present(PresentNode),
    Subgraph(Box<DependencyGraph<B>>),
}

impl<B: Backend> NodeKind<B> {
    #[must_use]
    pub fn affinity(&self) -> DeviceAffinity {
        match self {
            Self::Subgraph(_) => DeviceAffinity::Cpu,
            _ => DeviceAffinity::Gpu,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::AcquireImage(_) => "acquire",
            Self::Compute(_) => "compute",
            Self::DrawableSubmit(_) => "draw",
            Self::Present(_) => "present",
            Self::Subgraph(_) => "subgraph",
        }
    }

    /// Whether the node can signal a primitive on completion.
    #[must_use]
    pub fn can_signal(&self) -> bool {
        !matches!(self, Self::Present(_) | Self::Subgraph(_))
    }

    /// Whether the node can consume semaphores from a parent.
    #[must_use]
    pub fn can_wait(&self) -> bool {
        !matches!(self, Self::AcquireImage(_))
    }
}

/// A node of a [`DependencyGraph`].
pub struct WorkNode<B: Backend> {
    name: String,
    kind: NodeKind<B>,
    pub(crate) children: Vec<NodeHandle>,
    pub(crate) parents: Vec<NodeHandle>,
    pub(crate) sync: SyncState<B>,
}

impl<B: Backend> WorkNode<B> {
    pub fn new(name: impl Into<String>, kind: NodeKind<B>) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
            parents: Vec::new(),
            sync: SyncState::new(0),
        }
    }

    // === Constructors ===

    pub fn acquire(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::AcquireImage(AcquireNode::new()))
    }

    pub fn compute(name: impl Into<String>, work: impl ComputeWork<B> + 'static) -> Self {
        Self::new(name, NodeKind::Compute(ComputeNode::new(work)))
    }

    pub fn compute_fn<F>(name: impl Into<String>, record: F) -> Self
    where
        F: FnMut(&B::Device, &FrameInfo) -> Result<B::CommandBuffer> + 'static,
    {
        Self::new(name, NodeKind::Compute(ComputeNode::from_fn(record)))
    }

    pub fn draw(name: impl Into<String>, work: impl DrawWork<B> + 'static) -> Self {
        Self::new(name, NodeKind::DrawableSubmit(DrawNode::new(work)))
    }

    pub fn draw_fn<F>(name: impl Into<String>, record: F) -> Self
    where
        F: FnMut(&B::Device, &FrameInfo, &B::Target) -> Result<B::CommandBuffer> + 'static,
    {
        Self::new(name, NodeKind::DrawableSubmit(DrawNode::from_fn(record)))
    }

    pub fn present(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Present(PresentNode::new()))
    }

    pub fn subgraph(name: impl Into<String>, graph: DependencyGraph<B>) -> Self {
        Self::new(name, NodeKind::Subgraph(Box::new(graph)))
    }

    // === Accessors ===

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &NodeKind<B> {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub fn affinity(&self) -> DeviceAffinity {
        self.kind.affinity()
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn parents(&self) -> &[NodeHandle] {
        &self.parents
    }

    #[inline]
    #[must_use]
    pub fn sync(&self) -> &SyncState<B> {
        &self.sync
    }

    #[inline]
    #[must_use]
    pub fn signal_semaphores(&self) -> Option<&[B::Semaphore]> {
        self.sync.signal_semaphores()
    }

    #[inline]
    #[must_use]
    pub fn wait_semaphores(&self, frame: usize) -> &[B::Semaphore] {
        self.sync.wait_semaphores(frame)
    }

    #[inline]
    #[must_use]
    pub fn signal_fences(&self) -> Option<&[B::Fence]> {
        self.sync.signal_fences()
    }

    #[inline]
    #[must_use]
    pub fn wait_fences(&self, frame: usize) -> &[B::Fence] {
        self.sync.wait_fences(frame)
    }

    /// The nested graph of a subgraph node.
    #[must_use]
    pub fn as_subgraph(&self) -> Option<&DependencyGraph<B>> {
        match &self.kind {
            NodeKind::Subgraph(graph) => Some(&**graph),
            _ => None,
        }
    }

    /// Whether every parent has already been executed this traversal.
    #[must_use]
    pub fn all_parents_visited(&self, visited: &FxHashSet<NodeHandle>) -> bool {
        self.parents.iter().all(|parent| visited.contains(parent))
    }

    // === Wiring ===

    /// GPU→GPU edge: `child` waits on this node's per-frame semaphores.
    ///
    /// Relations are recorded by the graph; this only moves handles.
    pub(crate) fn add_child_via_semaphore(
        &mut self,
        device: &B::Device,
        child: &mut WorkNode<B>,
    ) -> Result<()> {
        let semaphores = self.sync.ensure_semaphores(device)?;
        child.sync.push_wait_semaphores(semaphores);
        Ok(())
    }

    /// GPU→CPU edge: `consumer` waits on this node's per-frame fences.
    ///
    /// `consumer` is the child's (or the owning graph's) sync state.
    pub(crate) fn add_child_via_fence(
        &mut self,
        device: &B::Device,
        consumer: &mut SyncState<B>,
        create_signaled: bool,
    ) -> Result<()> {
        let fences = self.sync.ensure_fences(device, create_signaled)?;
        consumer.push_wait_fences(fences);
        self.sync.add_fence_consumer();
        Ok(())
    }

    // === Execution ===

    pub(crate) fn execute(&mut self, device: &B::Device, ctx: &mut EvalContext<'_, B>) -> Result<()> {
        log::trace!("executing '{}' ({}) for frame {}", self.name, self.kind.kind_name(), ctx.frame_index);

        match &mut self.kind {
            NodeKind::AcquireImage(acquire) => acquire.execute(&self.name, &self.sync, device, ctx),
            NodeKind::Compute(compute) => compute.execute(&self.name, &self.sync, device, ctx),
            NodeKind::DrawableSubmit(draw) => draw.execute(&self.name, &self.sync, device, ctx),
            NodeKind::Present(present) => present.execute(&self.name, &self.sync, device, ctx),
            NodeKind::Subgraph(graph) => {
                let frame = ctx.frame_index;
                for fence in self.sync.wait_fences(frame) {
                    if !device.wait_for_fence(fence, None)? {
                        return Err(frameflow_core::DeviceError::Timeout.into());
                    }
                    device.reset_fence(fence)?;
                }
                graph.wait_until_complete(frame)?;
                graph.submit(ctx)?;
                Ok(())
            }
        }
    }

    pub(crate) fn destroy_owned(&mut self, device: &B::Device) {
        self.sync.destroy_owned(device);
    }
}
