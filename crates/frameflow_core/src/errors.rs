//! Error Types
//!
//! This module defines the error types used throughout the scheduler.
//!
//! # Overview
//!
//! Two layers of errors exist:
//!
//! - [`DeviceError`]: failures reported by a device backend (primitive
//!   allocation, submission, presentation, validation).
//! - [`FrameflowError`]: everything the scheduler itself can report. Device
//!   failures are wrapped through `From`, so `?` works across the boundary.
//!
//! Construction-time errors (unsupported edges, cycles, bad handles) are
//! recoverable: the graph is left unchanged and the caller may revise its
//! wiring. Device errors raised during `submit` are fatal for the frame and
//! are never retried by the scheduler.
//!
//! # Usage
//!
//! ```rust,ignore
//! use frameflow_core::errors::{FrameflowError, Result};
//!
//! fn wire() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::affinity::DeviceAffinity;
use crate::handle::NodeHandle;

/// Failure reported by a device backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Host memory for a primitive or submission could not be allocated.
    #[error("Out of host memory")]
    OutOfHostMemory,

    /// Device memory or handle space is exhausted.
    #[error("Out of device memory")]
    OutOfDeviceMemory,

    /// The logical device was lost; nothing submitted afterwards will run.
    #[error("Device lost")]
    DeviceLost,

    /// The presentation surface backing a chain no longer exists.
    #[error("Presentation surface lost")]
    SurfaceLost,

    /// A bounded wait expired before the primitive was signaled.
    #[error("Timed out waiting on the device")]
    Timeout,

    /// A synchronization or submission rule was violated.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend-specific failure that has no dedicated variant.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// The main error type for the scheduler.
#[derive(Error, Debug)]
pub enum FrameflowError {
    // ========================================================================
    // Device Errors
    // ========================================================================
    /// A device operation failed (primitive creation, submission, present).
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    // ========================================================================
    // Graph Construction Errors
    // ========================================================================
    /// The affinity pair of an edge has no synchronization primitive.
    #[error("Unsupported edge {from:?} -> {to:?}: no synchronization primitive for this pair")]
    UnsupportedEdge {
        /// Affinity of the producing node
        from: DeviceAffinity,
        /// Affinity of the consuming node
        to: DeviceAffinity,
    },

    /// The handle does not refer to a node of this graph.
    #[error("Invalid node handle: {0}")]
    InvalidNode(NodeHandle),

    /// An edge from a node to itself.
    #[error("Self edge on node {0}")]
    SelfEdge(NodeHandle),

    /// The same edge was added twice.
    #[error("Duplicate edge {from} -> {to}")]
    DuplicateEdge {
        /// Producing node
        from: NodeHandle,
        /// Consuming node
        to: NodeHandle,
    },

    /// The edge would close a cycle through the graph.
    #[error("Edge {from} -> {to} would create a cycle")]
    CycleDetected {
        /// Producing node
        from: NodeHandle,
        /// Consuming node
        to: NodeHandle,
    },

    /// The node kind has no way to signal a primitive on completion.
    #[error("Node {node} ({kind}) cannot signal synchronization primitives")]
    NodeCannotSignal {
        /// Offending node
        node: NodeHandle,
        /// Human-readable kind name
        kind: &'static str,
    },

    /// The node kind cannot consume semaphores from a parent.
    #[error("Node {node} ({kind}) cannot wait on synchronization primitives")]
    NodeCannotWait {
        /// Offending node
        node: NodeHandle,
        /// Human-readable kind name
        kind: &'static str,
    },

    /// A node's fences already have a CPU consumer, or were created in a
    /// state incompatible with the requested edge.
    #[error("Fences of node {0} already have a CPU consumer")]
    FenceConsumerConflict(NodeHandle),

    // ========================================================================
    // Frame Errors
    // ========================================================================
    /// The frame index is outside `[0, frames_in_flight)`.
    #[error("Frame index {index} out of range (frames in flight: {frames_in_flight})")]
    FrameIndexOutOfRange {
        /// Requested frame index
        index: usize,
        /// Configured number of frames in flight
        frames_in_flight: usize,
    },

    /// A nested graph was built with a different number of frames in flight
    /// than the graph it was added to.
    #[error("Subgraph node {node} has {inner} frames in flight, its parent graph has {outer}")]
    SubgraphFramesMismatch {
        /// The subgraph node
        node: NodeHandle,
        /// Frames in flight of the nested graph
        inner: usize,
        /// Frames in flight of the owning graph
        outer: usize,
    },

    /// The context carries no target at the acquired output index.
    #[error("No target surface at output index {index} ({available} available)")]
    MissingTarget {
        /// Output index written by the acquire node
        index: u32,
        /// Number of targets in the context
        available: usize,
    },

    /// Traversal ended before every node ran.
    #[error("Traversal stalled after {visited} of {total} nodes")]
    TraversalStalled {
        /// Nodes executed before the queue ran dry
        visited: usize,
        /// Nodes in the graph
        total: usize,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Scheduler settings failed validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Alias for `Result<T, FrameflowError>`.
pub type Result<T> = std::result::Result<T, FrameflowError>;

/// Alias for results produced directly by device backends.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
