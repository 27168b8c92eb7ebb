// SPDX-License-Identifier: Apache-2.0
//! Equirectangular (lat/long) panorama projection: all six faces.

use glam::{Mat4, Vec3};

use super::{reset_faces, rotate, set_face_plane, CubeFace};
use crate::viewport::BaseViewport;

/// Equirectangular projection settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquirectangularConfig {
    /// Rotation of the panorama seam in degrees.
    pub rotation: f32,
}

pub(crate) fn init_viewports(faces: &mut [BaseViewport; 6], config: &EquirectangularConfig) {
    reset_faces(faces);

    const RADIUS: f32 = 1.0;
    let lower_left = Vec3::new(-RADIUS, -RADIUS, RADIUS);
    let upper_left = Vec3::new(-RADIUS, RADIUS, RADIUS);
    let upper_right = Vec3::new(RADIUS, RADIUS, RADIUS);

    let tilt_mat = rotate(Mat4::IDENTITY, 90.0, Vec3::X);
    let roll_rot = rotate(
        rotate(tilt_mat, config.rotation, Vec3::Z),
        45.0,
        Vec3::Z,
    );

    let face_rotation = |face: CubeFace| match face {
        CubeFace::Right => rotate(roll_rot, -90.0, Vec3::Y),
        CubeFace::Left => rotate(roll_rot, 90.0, Vec3::Y),
        CubeFace::Bottom => rotate(roll_rot, -90.0, Vec3::X),
        CubeFace::Top => rotate(roll_rot, 90.0, Vec3::X),
        CubeFace::Front => roll_rot,
        CubeFace::Back => rotate(roll_rot, 180.0, Vec3::Y),
    };

    for face in CubeFace::ALL {
        set_face_plane(
            &mut faces[face.index()],
            face_rotation(face),
            lower_left,
            upper_left,
            upper_right,
        );
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_faces_participate() {
        let mut faces: [BaseViewport; 6] = Default::default();
        init_viewports(&mut faces, &EquirectangularConfig::default());
        assert!(faces.iter().all(BaseViewport::is_enabled));
    }
}
