// SPDX-License-Identifier: Apache-2.0
//! Plain cubemap output: six full 90° faces, optionally reoriented.

use glam::{Mat4, Vec3};

use super::{reset_faces, rotate, set_face_plane, CubeFace};
use crate::viewport::BaseViewport;

/// Cubemap projection settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CubemapConfig {
    /// Rig orientation in degrees (pitch, yaw, roll) applied to all faces.
    pub rig_orientation: Vec3,
}

/// Set all six face planes from a rig orientation, at unit distance.
pub(crate) fn set_face_planes(faces: &mut [BaseViewport; 6], rig_orientation: Vec3) {
    const DISTANCE: f32 = 1.0;

    let lower_left = Vec3::new(-DISTANCE, -DISTANCE, DISTANCE);
    let upper_left = Vec3::new(-DISTANCE, DISTANCE, DISTANCE);
    let upper_right = Vec3::new(DISTANCE, DISTANCE, DISTANCE);

    let pitch = rotate(Mat4::IDENTITY, -rig_orientation.x, Vec3::Y);
    let yaw = rotate(pitch, rig_orientation.y, Vec3::X);
    let roll_rot = rotate(yaw, -rig_orientation.z, Vec3::Z);

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

pub(crate) fn init_viewports(faces: &mut [BaseViewport; 6], config: &CubemapConfig) {
    reset_faces(faces);
    set_face_planes(faces, config.rig_orientation);
}
