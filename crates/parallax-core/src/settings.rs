// SPDX-License-Identifier: Apache-2.0
//! Runtime settings, explicitly owned and passed by reference.

use std::time::Duration;

/// Cluster-wide runtime settings.
///
/// One instance lives in the application context; nothing in this workspace
/// reaches for process-global state.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Watchdog for the frame-lock barrier: how long a node waits for its
    /// peers before giving up with a fatal error.
    pub sync_timeout: Duration,
    /// Firm (hard) frame-lock: gate presentation on every peer reaching the
    /// frame. Loose sync tolerates lagging peers at the cost of cross-node
    /// tearing.
    pub firm_frame_lock_sync: bool,
    /// Default near clip distance.
    pub near_clip: f32,
    /// Default far clip distance.
    pub far_clip: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(60),
            firm_frame_lock_sync: true,
            near_clip: 0.1,
            far_clip: 100.0,
        }
    }
}
