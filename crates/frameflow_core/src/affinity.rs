//! Device Affinity and Edge Kinds
//!
//! Every node declares where its work runs. The pair of affinities on an
//! edge decides which synchronization primitive carries the dependency:
//!
//! | From \ To | GPU         | CPU     |
//! |-----------|-------------|---------|
//! | GPU       | `Semaphore` | `Fence` |
//! | CPU       | unsupported | unsupported |

use serde::{Deserialize, Serialize};

/// Where a node's work executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceAffinity {
    /// Work is issued to a GPU queue.
    Gpu,
    /// Work runs on the calling thread.
    Cpu,
}

impl DeviceAffinity {
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
        }
    }
}

/// Synchronization primitive backing an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// GPU-signaled, GPU-waited ordering.
    Semaphore,
    /// GPU-signaled, CPU-waited completion.
    Fence,
}

impl EdgeKind {
    /// Selects the primitive for an edge `from -> to`.
    ///
    /// Returns `None` for CPU-sourced edges, which have no primitive.
    #[inline]
    #[must_use]
    pub const fn select(from: DeviceAffinity, to: DeviceAffinity) -> Option<Self> {
        match (from, to) {
            (DeviceAffinity::Gpu, DeviceAffinity::Gpu) => Some(Self::Semaphore),
            (DeviceAffinity::Gpu, DeviceAffinity::Cpu) => Some(Self::Fence),
            (DeviceAffinity::Cpu, _) => None,
        }
    }
}
