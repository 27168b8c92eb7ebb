// SPDX-License-Identifier: Apache-2.0
//! Component-tagged fatal errors.
//!
//! Construction-time failures (configuration rejects, backend allocation,
//! shader compilation) carry the subsystem they came from plus a stable
//! numeric code, so a cluster operator reading one log line from one node
//! knows which part of which machine refused to start.

use thiserror::Error;

/// Subsystem that produced an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Cluster configuration loading/validation.
    Config,
    /// Non-linear projection setup (targets, composite programs).
    Projection,
    /// Warp/blend correction-mesh handling.
    CorrectionMesh,
    /// Window/viewport bookkeeping.
    Window,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Config => "Config",
            Component::Projection => "Projection",
            Component::CorrectionMesh => "CorrectionMesh",
            Component::Window => "Window",
        };
        f.write_str(name)
    }
}

/// Fatal, construction-time error with a component tag and numeric code.
#[derive(Debug, Error)]
#[error("[{component}] error {code}: {message}")]
pub struct Error {
    /// Subsystem the error originated in.
    pub component: Component,
    /// Stable numeric code for log scraping.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl Error {
    /// Create a new component-tagged error.
    pub fn new(component: Component, code: u32, message: impl Into<String>) -> Self {
        Self {
            component,
            code,
            message: message.into(),
        }
    }
}
