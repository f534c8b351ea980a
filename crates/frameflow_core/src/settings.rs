//! Scheduler Settings
//!
//! Configuration chosen once when a dependency graph is created.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use frameflow_core::SchedulerSettings;
//!
//! // Default: double buffering
//! let settings = SchedulerSettings::default();
//!
//! // Triple buffering with a custom label
//! let settings = SchedulerSettings::default()
//!     .with_frames_in_flight(3)
//!     .with_label("main graph");
//! ```
//!
//! Settings can also be read from JSON; missing fields fall back to their
//! defaults:
//!
//! ```json
//! { "frames_in_flight": 3 }
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{FrameflowError, Result};

/// Frames in flight used when nothing else is configured.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound accepted by [`SchedulerSettings::validate`].
pub const MAX_FRAMES_IN_FLIGHT: usize = 16;

/// Configuration for a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Number of frames whose GPU work may overlap (`MAX_FRAMES`).
    ///
    /// Sizes every per-frame primitive array and bounds the frame index
    /// accepted by `wait_until_complete` and `submit`.
    pub frames_in_flight: usize,

    /// Label used in log output.
    pub label: String,

    /// Enqueue acquire-kind start nodes ahead of other start nodes.
    ///
    /// When the output surface turns out to be out of date, the frame is
    /// halted right after the acquire; seeding it first keeps any other
    /// work of that frame from having been issued.
    pub seed_acquire_first: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            label: String::from("frame graph"),
            seed_acquire_first: true,
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_seed_acquire_first(mut self, enabled: bool) -> Self {
        self.seed_acquire_first = enabled;
        self
    }

    /// Checks that the settings describe a usable graph.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(FrameflowError::InvalidSettings(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(FrameflowError::InvalidSettings(format!(
                "frames_in_flight {} exceeds the maximum of {MAX_FRAMES_IN_FLIGHT}",
                self.frames_in_flight
            )));
        }
        Ok(())
    }
}
