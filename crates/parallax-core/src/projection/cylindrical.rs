// SPDX-License-Identifier: Apache-2.0
//! Cylindrical panorama projection: four side faces, no caps.

use glam::{Mat4, Vec3};

use super::{reset_faces, rotate, set_face_plane, CubeFace};
use crate::viewport::BaseViewport;

/// Cylindrical projection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CylindricalConfig {
    /// Rotation of the panorama seam in degrees.
    pub rotation: f32,
    /// Vertical offset of the cylinder midline, in normalized height.
    pub height_offset: f32,
    /// Cylinder radius; sets the distance to the face planes.
    pub radius: f32,
}

impl Default for CylindricalConfig {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            height_offset: 0.0,
            radius: 1.0,
        }
    }
}

pub(crate) fn init_viewports(faces: &mut [BaseViewport; 6], config: &CylindricalConfig) {
    reset_faces(faces);

    let radius = config.radius;
    let lower_left = Vec3::new(-radius, -radius, radius);
    let upper_left = Vec3::new(-radius, radius, radius);
    let upper_right = Vec3::new(radius, radius, radius);

    let tilt_mat = rotate(Mat4::IDENTITY, 90.0, Vec3::X);
    let roll_rot = rotate(
        rotate(tilt_mat, config.rotation, Vec3::Z),
        45.0,
        Vec3::Z,
    );

    let rot = rotate(roll_rot, -90.0, Vec3::Y);
    set_face_plane(&mut faces[CubeFace::Right.index()], rot, lower_left, upper_left, upper_right);

    let rot = rotate(roll_rot, 90.0, Vec3::Y);
    set_face_plane(&mut faces[CubeFace::Left.index()], rot, lower_left, upper_left, upper_right);

    set_face_plane(
        &mut faces[CubeFace::Front.index()],
        roll_rot,
        lower_left,
        upper_left,
        upper_right,
    );

    let rot = rotate(roll_rot, 180.0, Vec3::Y);
    set_face_plane(&mut faces[CubeFace::Back.index()], rot, lower_left, upper_left, upper_right);

    // a cylinder has no caps
    faces[CubeFace::Bottom.index()].set_enabled(false);
    faces[CubeFace::Top.index()].set_enabled(false);
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_are_disabled() {
        let mut faces: [BaseViewport; 6] = Default::default();
        init_viewports(&mut faces, &CylindricalConfig::default());

        assert!(!faces[CubeFace::Bottom.index()].is_enabled());
        assert!(!faces[CubeFace::Top.index()].is_enabled());
        assert!(faces[CubeFace::Right.index()].is_enabled());
        assert!(faces[CubeFace::Back.index()].is_enabled());
    }
}
