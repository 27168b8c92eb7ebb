// SPDX-License-Identifier: Apache-2.0
//! Spherical-mirror (mirror-dome) projection.
//!
//! The composite pass draws the faces through four warp meshes — bottom,
//! left, right, top — measured for the specific mirror rig. With no measured
//! meshes configured the pass falls back to pass-through quads, which is only
//! useful for bring-up.

use glam::{Mat4, Vec3};

use super::{reset_faces, rotate, set_face_plane, CubeFace};
use crate::correction::MeshBuffer;
use crate::viewport::BaseViewport;

/// Spherical-mirror projection settings.
#[derive(Debug, Clone)]
pub struct SphericalMirrorConfig {
    /// Mirror tilt in degrees.
    pub tilt: f32,
    /// Rig diameter in meters; sets the distance to the face planes.
    pub diameter: f32,
    /// Warp mesh for the bottom region.
    pub mesh_bottom: MeshBuffer,
    /// Warp mesh for the left region.
    pub mesh_left: MeshBuffer,
    /// Warp mesh for the right region.
    pub mesh_right: MeshBuffer,
    /// Warp mesh for the top region.
    pub mesh_top: MeshBuffer,
}

impl Default for SphericalMirrorConfig {
    fn default() -> Self {
        Self {
            tilt: 0.0,
            diameter: 2.4,
            mesh_bottom: MeshBuffer::full_screen_quad(),
            mesh_left: MeshBuffer::full_screen_quad(),
            mesh_right: MeshBuffer::full_screen_quad(),
            mesh_top: MeshBuffer::full_screen_quad(),
        }
    }
}

impl SphericalMirrorConfig {
    /// The four warp meshes in composite order.
    #[must_use]
    pub fn warp_meshes(&self) -> Vec<MeshBuffer> {
        vec![
            self.mesh_bottom.clone(),
            self.mesh_left.clone(),
            self.mesh_right.clone(),
            self.mesh_top.clone(),
        ]
    }
}

pub(crate) fn init_viewports(faces: &mut [BaseViewport; 6], config: &SphericalMirrorConfig) {
    reset_faces(faces);

    let radius = config.diameter / 2.0;
    let lower_left = Vec3::new(-radius, -radius, radius);
    let upper_left = Vec3::new(-radius, radius, radius);
    let upper_right = Vec3::new(radius, radius, radius);

    let tilt_mat = rotate(Mat4::IDENTITY, 45.0 - config.tilt, Vec3::X);

    let rot = rotate(tilt_mat, -90.0, Vec3::Y);
    set_face_plane(&mut faces[CubeFace::Right.index()], rot, lower_left, upper_left, upper_right);

    let rot = rotate(tilt_mat, 90.0, Vec3::Y);
    set_face_plane(&mut faces[CubeFace::Left.index()], rot, lower_left, upper_left, upper_right);

    let rot = rotate(tilt_mat, 90.0, Vec3::X);
    set_face_plane(&mut faces[CubeFace::Top.index()], rot, lower_left, upper_left, upper_right);

    set_face_plane(
        &mut faces[CubeFace::Front.index()],
        tilt_mat,
        lower_left,
        upper_left,
        upper_right,
    );

    // the mirror never sees behind or straight below the rig
    faces[CubeFace::Bottom.index()].set_enabled(false);
    faces[CubeFace::Back.index()].set_enabled(false);
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_faces_are_disabled() {
        let mut faces: [BaseViewport; 6] = Default::default();
        init_viewports(&mut faces, &SphericalMirrorConfig::default());

        assert!(!faces[CubeFace::Bottom.index()].is_enabled());
        assert!(!faces[CubeFace::Back.index()].is_enabled());
        assert!(faces[CubeFace::Front.index()].is_enabled());
        assert!(faces[CubeFace::Top.index()].is_enabled());
    }
}
