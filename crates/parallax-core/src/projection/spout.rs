// SPDX-License-Identifier: Apache-2.0
//! Cubemap faces exported through a texture-sharing sink.
//!
//! The sharing API itself lives behind the projection backend; this kind only
//! decides which faces get rendered and how the rig is oriented.

use glam::Vec3;

use super::{cubemap, reset_faces, CubeFace};
use crate::viewport::BaseViewport;

/// Spout-output projection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SpoutConfig {
    /// Per-face enable mask, in face declaration order.
    pub enabled_faces: [bool; 6],
    /// Rig orientation in degrees (pitch, yaw, roll).
    pub rig_orientation: Vec3,
}

impl Default for SpoutConfig {
    fn default() -> Self {
        Self {
            enabled_faces: [true; 6],
            rig_orientation: Vec3::ZERO,
        }
    }
}

pub(crate) fn init_viewports(faces: &mut [BaseViewport; 6], config: &SpoutConfig) {
    reset_faces(faces);
    cubemap::set_face_planes(faces, config.rig_orientation);

    for face in CubeFace::ALL {
        if !config.enabled_faces[face.index()] {
            faces[face.index()].set_enabled(false);
        }
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_mask_is_honored() {
        let mut faces: [BaseViewport; 6] = Default::default();
        let mut config = SpoutConfig::default();
        config.enabled_faces[CubeFace::Top.index()] = false;
        init_viewports(&mut faces, &config);

        assert!(!faces[CubeFace::Top.index()].is_enabled());
        assert!(faces[CubeFace::Front.index()].is_enabled());
    }
}
