// SPDX-License-Identifier: Apache-2.0
//! Off-axis frustum and projection math.
//!
//! A viewport's image is defined by a physical projection plane (three corners
//! in world/tracker space) and an eye position. Expressing the corners and the
//! eye in the plane's own coordinate frame reduces the general case — a viewer
//! anywhere relative to an arbitrarily placed, rotated screen — to an
//! asymmetric `glFrustum`-style projection. A symmetric perspective matrix
//! cannot represent this; tiled walls and domes need the off-axis form.

use glam::{Mat3, Mat4, Vec3, Vec4};

/// Which eye a frustum/projection belongs to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum FrustumMode {
    /// Single centered eye.
    #[default]
    Mono,
    /// Left eye, offset by half the eye separation.
    StereoLeft,
    /// Right eye, offset by half the eye separation.
    StereoRight,
}

impl FrustumMode {
    /// All modes, in storage order.
    pub const ALL: [FrustumMode; 3] = [
        FrustumMode::Mono,
        FrustumMode::StereoLeft,
        FrustumMode::StereoRight,
    ];

    /// Storage index for per-mode arrays.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            FrustumMode::Mono => 0,
            FrustumMode::StereoLeft => 1,
            FrustumMode::StereoRight => 2,
        }
    }
}

/// Frustum side planes in eye space plus the clip distances.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Frustum {
    /// Left plane distance at the near clip.
    pub left: f32,
    /// Right plane distance at the near clip.
    pub right: f32,
    /// Bottom plane distance at the near clip.
    pub bottom: f32,
    /// Top plane distance at the near clip.
    pub top: f32,
    /// Near clip distance (positive).
    pub near: f32,
    /// Far clip distance (greater than near).
    pub far: f32,
}

impl Frustum {
    /// Build the asymmetric (off-axis) projection matrix, equivalent to the
    /// fixed-function `glFrustum`. glam has no off-center constructor, so the
    /// columns are laid out by hand.
    #[must_use]
    pub fn to_projection_matrix(&self) -> Mat4 {
        let Frustum {
            left: l,
            right: r,
            bottom: b,
            top: t,
            near: n,
            far: f,
        } = *self;

        Mat4::from_cols(
            Vec4::new(2.0 * n / (r - l), 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 * n / (t - b), 0.0, 0.0),
            Vec4::new((r + l) / (r - l), (t + b) / (t - b), -(f + n) / (f - n), -1.0),
            Vec4::new(0.0, 0.0, -2.0 * f * n / (f - n), 0.0),
        )
    }
}

/// Three corners of a projection plane quad in world/tracker space.
///
/// The fourth corner is implied by the other three. Corners are mutated via
/// explicit setters or derived from FOV angles by the owning viewport.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ProjectionPlane {
    lower_left: Vec3,
    upper_left: Vec3,
    upper_right: Vec3,
}

impl Default for ProjectionPlane {
    /// A unit 90° plane one meter in front of the origin.
    fn default() -> Self {
        Self {
            lower_left: Vec3::new(-1.0, -1.0, -1.0),
            upper_left: Vec3::new(-1.0, 1.0, -1.0),
            upper_right: Vec3::new(1.0, 1.0, -1.0),
        }
    }
}

impl ProjectionPlane {
    /// Create a plane from its three defining corners.
    #[must_use]
    pub fn new(lower_left: Vec3, upper_left: Vec3, upper_right: Vec3) -> Self {
        Self {
            lower_left,
            upper_left,
            upper_right,
        }
    }

    /// Replace all three corners.
    pub fn set_coordinates(&mut self, lower_left: Vec3, upper_left: Vec3, upper_right: Vec3) {
        self.lower_left = lower_left;
        self.upper_left = upper_left;
        self.upper_right = upper_right;
    }

    /// Translate the whole plane.
    pub fn offset(&mut self, delta: Vec3) {
        self.lower_left += delta;
        self.upper_left += delta;
        self.upper_right += delta;
    }

    /// Lower-left corner.
    #[must_use]
    pub fn lower_left(&self) -> Vec3 {
        self.lower_left
    }

    /// Upper-left corner.
    #[must_use]
    pub fn upper_left(&self) -> Vec3 {
        self.upper_left
    }

    /// Upper-right corner.
    #[must_use]
    pub fn upper_right(&self) -> Vec3 {
        self.upper_right
    }
}

/// View/projection matrix pair for one eye, always consistent with the last
/// [`Projection::calculate`] call.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Projection {
    view: Mat4,
    projection: Mat4,
    view_projection: Mat4,
    frustum: Frustum,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            frustum: Frustum::default(),
        }
    }
}

impl Projection {
    /// Recompute the frustum and matrices for `eye` looking at `plane`.
    ///
    /// `eye_offset` shifts the view matrix without moving the frustum apex;
    /// the non-linear path uses it to keep a symmetric plane while still
    /// separating stereo eyes.
    ///
    /// Contract: `near > 0`, `near < far` and a non-degenerate plane. These
    /// are programmer errors, checked in debug builds; with garbage finite or
    /// NaN input the result silently propagates NaN.
    pub fn calculate(
        &mut self,
        eye: Vec3,
        plane: &ProjectionPlane,
        near: f32,
        far: f32,
        eye_offset: Vec3,
    ) {
        debug_assert!(near > 0.0, "near clip must be positive");
        debug_assert!(near < far, "near clip must be closer than far clip");

        let lower_left = plane.lower_left();
        let upper_left = plane.upper_left();
        let upper_right = plane.upper_right();

        // the plane's internal coordinate system bases
        let plane_x = (upper_right - upper_left).normalize();
        let plane_y = (upper_left - lower_left).normalize();
        let plane_z = plane_x.cross(plane_y).normalize();

        // direction-cosine matrix of the plane basis against the world axes;
        // its columns are the basis vectors, so the inverse carries world
        // coordinates into the plane-local frame
        let dcm = Mat3::from_cols(plane_x, plane_y, plane_z);
        let inv_dcm = dcm.inverse();

        let local_lower_left = inv_dcm * lower_left;
        let local_upper_right = inv_dcm * upper_right;
        let local_eye = inv_dcm * eye;

        // near clipping plane over focus plane distance
        let near_factor = (near / (local_lower_left.z - local_eye.z)).abs();

        self.frustum = Frustum {
            left: (local_lower_left.x - local_eye.x) * near_factor,
            right: (local_upper_right.x - local_eye.x) * near_factor,
            bottom: (local_lower_left.y - local_eye.y) * near_factor,
            top: (local_upper_right.y - local_eye.y) * near_factor,
            near,
            far,
        };

        self.view = Mat4::from_mat3(inv_dcm) * Mat4::from_translation(-(eye + eye_offset));
        self.projection = self.frustum.to_projection_matrix();
        self.view_projection = self.projection * self.view;
    }

    /// View matrix of the last calculation.
    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    /// Projection matrix of the last calculation.
    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    /// `projection * view`, computed literally as that product.
    #[must_use]
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.view_projection
    }

    /// Frustum side planes of the last calculation.
    #[must_use]
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn centered_plane(distance: f32, half_extent: f32) -> ProjectionPlane {
        ProjectionPlane::new(
            Vec3::new(-half_extent, -half_extent, -distance),
            Vec3::new(-half_extent, half_extent, -distance),
            Vec3::new(half_extent, half_extent, -distance),
        )
    }

    #[test]
    fn symmetric_plane_matches_symmetric_perspective() {
        // 90° FOV plane one unit away, eye at origin, near at the plane
        let mut projection = Projection::default();
        projection.calculate(Vec3::ZERO, &centered_plane(1.0, 1.0), 1.0, 100.0, Vec3::ZERO);

        let f = projection.frustum();
        assert_relative_eq!(f.left, -1.0, epsilon = 1e-6);
        assert_relative_eq!(f.right, 1.0, epsilon = 1e-6);
        assert_relative_eq!(f.bottom, -1.0, epsilon = 1e-6);
        assert_relative_eq!(f.top, 1.0, epsilon = 1e-6);

        let reference = Mat4::perspective_rh_gl(90f32.to_radians(), 1.0, 1.0, 100.0);
        let produced = projection.projection_matrix();
        for (a, b) in produced
            .to_cols_array()
            .iter()
            .zip(reference.to_cols_array().iter())
        {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn view_projection_is_the_exact_product() {
        let mut projection = Projection::default();
        projection.calculate(
            Vec3::new(0.2, -0.1, 0.4),
            &centered_plane(2.0, 1.5),
            0.1,
            50.0,
            Vec3::ZERO,
        );

        let product = projection.projection_matrix() * projection.view_matrix();
        assert_eq!(product, projection.view_projection_matrix());
    }

    #[test]
    fn off_center_eye_skews_the_frustum() {
        let mut projection = Projection::default();
        projection.calculate(
            Vec3::new(0.5, 0.0, 0.0),
            &centered_plane(1.0, 1.0),
            1.0,
            100.0,
            Vec3::ZERO,
        );

        let f = projection.frustum();
        assert_relative_eq!(f.left, -1.5, epsilon = 1e-6);
        assert_relative_eq!(f.right, 0.5, epsilon = 1e-6);
        assert!(f.left < f.right);
        assert!(f.bottom < f.top);
    }

    #[test]
    fn rotated_plane_keeps_frustum_shape() {
        // the same 90° quad, rotated 90° about Y to face +X, eye at origin
        let plane = ProjectionPlane::new(
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, -1.0),
        );
        let mut projection = Projection::default();
        projection.calculate(Vec3::ZERO, &plane, 1.0, 100.0, Vec3::ZERO);

        let f = projection.frustum();
        assert_relative_eq!(f.right - f.left, 2.0, epsilon = 1e-5);
        assert_relative_eq!(f.top - f.bottom, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn eye_offset_moves_view_not_frustum() {
        let plane = centered_plane(1.0, 1.0);
        let mut centered = Projection::default();
        centered.calculate(Vec3::ZERO, &plane, 1.0, 100.0, Vec3::ZERO);

        let mut offset = Projection::default();
        offset.calculate(Vec3::ZERO, &plane, 1.0, 100.0, Vec3::new(0.03, 0.0, 0.0));

        assert_eq!(centered.frustum(), offset.frustum());
        assert_ne!(centered.view_matrix(), offset.view_matrix());
    }

    proptest::proptest! {
        /// For non-degenerate planes in front of the eye and valid clip
        /// distances, the frustum is properly ordered and the matrix triple
        /// stays consistent.
        #[test]
        fn frustum_invariants_hold(
            distance in 0.5f32..10.0,
            half_w in 0.2f32..4.0,
            half_h in 0.2f32..4.0,
            eye_x in -0.4f32..0.4,
            eye_y in -0.4f32..0.4,
            near in 0.01f32..0.4,
        ) {
            let plane = ProjectionPlane::new(
                glam::Vec3::new(-half_w, -half_h, -distance),
                glam::Vec3::new(-half_w, half_h, -distance),
                glam::Vec3::new(half_w, half_h, -distance),
            );
            let mut projection = Projection::default();
            projection.calculate(
                glam::Vec3::new(eye_x, eye_y, 0.0),
                &plane,
                near,
                near + 100.0,
                glam::Vec3::ZERO,
            );

            let f = projection.frustum();
            proptest::prop_assert!(f.left < f.right);
            proptest::prop_assert!(f.bottom < f.top);
            proptest::prop_assert!(f.near > 0.0);
            proptest::prop_assert_eq!(
                projection.projection_matrix() * projection.view_matrix(),
                projection.view_projection_matrix()
            );
        }
    }
}
