//! Dependency-graph frame scheduling over a pluggable device backend.
//!
//! Build a [`DependencyGraph`] once, wire its nodes with
//! [`add_edge`](DependencyGraph::add_edge), then every frame:
//!
//! ```rust,ignore
//! graph.wait_until_complete(cursor.current())?;
//! let mut ctx = EvalContext::new(cursor.current(), extent, &targets, &mut chain);
//! graph.submit(&mut ctx)?;
//! if ctx.needs_reinit {
//!     // rebuild extent-dependent resources, keep the slot
//! } else {
//!     cursor.advance();
//! }
//! ```

pub mod backend;
pub mod graph;

pub use backend::{
    AcquireOutcome, Backend, ChainStatus, GpuDevice, PresentChain, QueueKind, Submission, WaitStage,
};
pub use graph::{
    AcquireNode, ComputeNode, ComputeWork, DependencyGraph, DrawNode, DrawWork, EvalContext, FrameInfo,
    NO_OUTPUT, NodeKind, PresentNode, SubmitReport, SyncState, WorkNode,
};
