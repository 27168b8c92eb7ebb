// SPDX-License-Identifier: Apache-2.0
//! Angular fisheye (dome master) projection.
//!
//! The number of cube faces actually rendered depends on the fisheye FOV: up
//! to 180° four faces suffice (the cube is panned 45° so the seams land on
//! face diagonals); 250.5288° covers exactly five faces; anything wider needs
//! all six. The five-face method additionally crops the side faces and slides
//! their planes outward so the cubemap spends its resolution inside the dome.

use glam::{Mat4, Vec3};

use super::{reset_faces, rotate, set_face_plane};
use crate::viewport::BaseViewport;

/// Fisheye projection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FisheyeConfig {
    /// Total fisheye field of view in degrees.
    pub fov: f32,
    /// Dome tilt in degrees.
    pub tilt: f32,
    /// Dome diameter in meters; sets the distance to the face planes.
    pub diameter: f32,
}

impl Default for FisheyeConfig {
    fn default() -> Self {
        Self {
            fov: 180.0,
            tilt: 0.0,
            diameter: 14.8,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Method {
    FourFace,
    FiveFace,
    SixFace,
}

pub(crate) fn init_viewports(faces: &mut [BaseViewport; 6], config: &FisheyeConfig) {
    reset_faces(faces);

    // radius sets the distance to all view planes
    let radius = config.diameter / 2.0;

    let lower_left_base = Vec3::new(-radius, -radius, radius);
    let upper_left_base = Vec3::new(-radius, radius, radius);
    let upper_right_base = Vec3::new(radius, radius, radius);

    // 250.5288° covers exactly five cube sides; 109.4712° covers the top face
    let five_face_limit = 2.0 * (-1.0f32 / 3.0f32.sqrt()).acos().to_degrees();
    let top_face_limit = 2.0 * (1.0f32 / 3.0f32.sqrt()).acos().to_degrees();

    let mut method = if config.fov > 180.0 && config.fov <= five_face_limit {
        Method::FiveFace
    } else {
        Method::FourFace
    };

    // how much of the side faces is used
    let mut crop_level = 0.5;
    let mut projection_offset = 0.0;
    if method == Method::FiveFace && config.fov >= top_face_limit && config.fov <= five_face_limit
    {
        let cos_angle = (config.fov / 2.0).to_radians().cos();
        let normalized_offset = if config.fov < 180.0 {
            1.0 - config.fov / 180.0
        } else {
            ((2.0 * cos_angle * cos_angle) / (1.0 - cos_angle * cos_angle)).sqrt()
        };
        projection_offset = normalized_offset * radius;
        crop_level = (1.0 - normalized_offset) / 2.0;
    } else if config.fov > five_face_limit {
        method = Method::SixFace;
        crop_level = 0.0;
        projection_offset = radius;
    }

    let tilt_mat = rotate(Mat4::IDENTITY, 90.0 - config.tilt, Vec3::X);

    let [right, left, bottom, top, front, back] = faces;

    if method == Method::FiveFace || method == Method::SixFace {
        let roll_rot = rotate(tilt_mat, 45.0, Vec3::Z);

        // +X face
        {
            right.set_size(glam::Vec2::new(1.0 - crop_level, 1.0));
            let rot = rotate(roll_rot, -90.0, Vec3::Y);
            let upper_right = Vec3::new(projection_offset, radius, radius);
            set_face_plane(right, rot, lower_left_base, upper_left_base, upper_right);
        }

        // -X face
        {
            left.set_position(glam::Vec2::new(crop_level, 0.0));
            left.set_size(glam::Vec2::new(1.0 - crop_level, 1.0));
            let rot = rotate(roll_rot, 90.0, Vec3::Y);
            let lower_left = Vec3::new(-projection_offset, -radius, radius);
            let upper_left = Vec3::new(-projection_offset, radius, radius);
            set_face_plane(left, rot, lower_left, upper_left, upper_right_base);
        }

        // +Y face
        {
            bottom.set_position(glam::Vec2::new(0.0, crop_level));
            bottom.set_size(glam::Vec2::new(1.0, 1.0 - crop_level));
            let rot = rotate(roll_rot, -90.0, Vec3::X);
            let lower_left = Vec3::new(-radius, -projection_offset, radius);
            set_face_plane(bottom, rot, lower_left, upper_left_base, upper_right_base);
        }

        // -Y face
        {
            top.set_size(glam::Vec2::new(1.0, 1.0 - crop_level));
            let rot = rotate(roll_rot, 90.0, Vec3::X);
            let upper_left = Vec3::new(-radius, projection_offset, radius);
            let upper_right = Vec3::new(radius, projection_offset, radius);
            set_face_plane(top, rot, lower_left_base, upper_left, upper_right);
        }

        // +Z face
        set_face_plane(
            front,
            roll_rot,
            lower_left_base,
            upper_left_base,
            upper_right_base,
        );

        // -Z face
        if method == Method::FiveFace {
            back.set_enabled(false);
        } else {
            let rot = rotate(roll_rot, 180.0, Vec3::Y);
            set_face_plane(back, rot, lower_left_base, upper_left_base, upper_right_base);
        }
    } else {
        // four faces panned 45° cover a 180° dome
        let pan_rot = rotate(tilt_mat, 45.0, Vec3::Y);

        let rot = rotate(pan_rot, -90.0, Vec3::Y);
        set_face_plane(right, rot, lower_left_base, upper_left_base, upper_right_base);

        left.set_enabled(false);

        let rot = rotate(pan_rot, -90.0, Vec3::X);
        set_face_plane(bottom, rot, lower_left_base, upper_left_base, upper_right_base);

        let rot = rotate(pan_rot, 90.0, Vec3::X);
        set_face_plane(top, rot, lower_left_base, upper_left_base, upper_right_base);

        set_face_plane(
            front,
            pan_rot,
            lower_left_base,
            upper_left_base,
            upper_right_base,
        );

        back.set_enabled(false);
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_faces() -> [BaseViewport; 6] {
        Default::default()
    }

    #[test]
    fn wide_fov_uses_all_six_faces() {
        let mut faces = fresh_faces();
        init_viewports(
            &mut faces,
            &FisheyeConfig {
                fov: 270.0,
                ..FisheyeConfig::default()
            },
        );
        assert!(faces.iter().all(BaseViewport::is_enabled));
    }

    #[test]
    fn five_face_fov_crops_the_side_faces() {
        let mut faces = fresh_faces();
        init_viewports(
            &mut faces,
            &FisheyeConfig {
                fov: 220.0,
                ..FisheyeConfig::default()
            },
        );

        // back face is unused; side faces are cropped below full size
        assert!(!faces[5].is_enabled());
        assert!(faces[0].size().x < 1.0);
        assert!(faces[2].size().y < 1.0);
    }

    #[test]
    fn dome_tilt_rotates_the_face_planes() {
        let mut flat = fresh_faces();
        init_viewports(&mut flat, &FisheyeConfig::default());

        let mut tilted = fresh_faces();
        init_viewports(
            &mut tilted,
            &FisheyeConfig {
                tilt: 30.0,
                ..FisheyeConfig::default()
            },
        );

        assert_ne!(
            flat[4].projection_plane().upper_left(),
            tilted[4].projection_plane().upper_left()
        );
    }
}
