//! Core types for the Frameflow scheduler.
//!
//! - [`DeviceAffinity`] / [`EdgeKind`]: where work runs and which primitive
//!   carries a dependency
//! - [`NodeHandle`]: arena index of a graph node
//! - [`SchedulerSettings`]: per-graph configuration
//! - [`FrameCursor`] / [`Extent2d`]: frame bookkeeping
//! - [`errors`]: the shared error enums

pub mod affinity;
pub mod errors;
pub mod frame;
pub mod handle;
pub mod settings;

pub use affinity::{DeviceAffinity, EdgeKind};
pub use errors::{DeviceError, DeviceResult, FrameflowError, Result};
pub use frame::{Extent2d, FrameCursor};
pub use handle::NodeHandle;
pub use settings::{DEFAULT_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT, SchedulerSettings};
