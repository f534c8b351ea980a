//! Frameflow: frame-oriented GPU/CPU work scheduling.
//!
//! Work is described as a dependency graph of nodes (acquire, compute, draw,
//! present, nested subgraphs). Edges between nodes get a semaphore or a
//! fence depending on where producer and consumer run, and every
//! per-frame primitive is replicated for each frame in flight.
//!
//! # Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `frameflow_core` | handles, affinities, settings, errors, frame cursor |
//! | `frameflow_render` | backend traits, headless/wgpu backends, the graph |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use frameflow::prelude::*;
//! use frameflow::backend::headless::*;
//!
//! let device = Arc::new(HeadlessDevice::default());
//! let mut graph = DependencyGraph::<HeadlessBackend>::new(device, SchedulerSettings::default())?;
//! let acquire = graph.add_node(WorkNode::acquire("acquire"));
//! let draw = graph.add_node(WorkNode::draw_fn("draw", |_, _, target| {
//!     Ok(HeadlessCommands::new().draw(target, 3))
//! }));
//! let present = graph.add_node(WorkNode::present("present"));
//! graph.add_edge(acquire, draw)?;
//! graph.add_edge(draw, present)?;
//! graph.flag_node_as_frame_blocking(draw)?;
//!
//! let mut driver = FrameDriver::new(graph);
//! driver.run_frame(extent, &targets, &mut chain)?;
//! ```

pub mod driver;

pub use frameflow_render::{backend, graph};
#[cfg(feature = "wgpu")]
pub use wgpu;

pub use driver::{FrameDriver, FrameOutcome};
pub use frameflow_core::{
    DeviceAffinity, DeviceError, EdgeKind, Extent2d, FrameCursor, FrameflowError, NodeHandle, Result,
    SchedulerSettings,
};
pub use frameflow_render::{
    Backend, ChainStatus, DependencyGraph, EvalContext, FrameInfo, GpuDevice, PresentChain, SubmitReport,
    WaitStage, WorkNode,
};

pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::driver::{FrameDriver, FrameOutcome};
    pub use frameflow_core::{
        DeviceAffinity, Extent2d, FrameCursor, FrameflowError, NodeHandle, Result, SchedulerSettings,
    };
    pub use frameflow_render::{
        Backend, ComputeWork, DependencyGraph, DrawWork, EvalContext, FrameInfo, GpuDevice, PresentChain,
        WorkNode,
    };
}
