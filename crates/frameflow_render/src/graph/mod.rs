//! Frame Dependency Graph
//!
//! - [`DependencyGraph`]: node arena, edge wiring and per-frame traversal
//! - [`WorkNode`] / [`NodeKind`]: schedulable units
//! - [`SyncState`]: per-frame semaphores and fences of a node
//! - [`EvalContext`]: per-submission state threaded through the traversal
//! - [`passes`]: the node kinds' execution

pub mod context;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod node;
pub mod passes;
pub mod sync;

pub use context::{EvalContext, FrameInfo, NO_OUTPUT};
pub use graph::{DependencyGraph, SubmitReport};
pub use node::{NodeKind, WorkNode};
pub use passes::{AcquireNode, ComputeNode, ComputeWork, DrawNode, DrawWork, PresentNode};
pub use sync::{SyncState, WaitList};
