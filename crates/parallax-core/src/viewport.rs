// SPDX-License-Identifier: Apache-2.0
//! Viewports: rectangular window regions with per-eye projections.

use glam::{Quat, Vec2, Vec3};

use crate::correction::CorrectionMesh;
use crate::frustum::{FrustumMode, Projection, ProjectionPlane};
use crate::projection::NonLinearProjection;
use crate::user::User;

/// The unrotated view plane corners kept alongside the projection plane so
/// FOV edits and aspect-ratio updates can be re-derived without accumulating
/// rotation error.
#[derive(Debug, Copy, Clone, PartialEq)]
struct ViewPlane {
    lower_left: Vec3,
    upper_left: Vec3,
    upper_right: Vec3,
}

impl Default for ViewPlane {
    fn default() -> Self {
        Self {
            lower_left: Vec3::new(-1.0, -1.0, -1.0),
            upper_left: Vec3::new(-1.0, 1.0, -1.0),
            upper_right: Vec3::new(1.0, 1.0, -1.0),
        }
    }
}

/// A viewport region with one projection per eye mode.
///
/// Position and size are normalized to the owning surface, `[0,1]²`. The user
/// binding is a name key resolved against the cluster's user registry — the
/// viewport never owns the user.
#[derive(Debug, Clone)]
pub struct BaseViewport {
    position: Vec2,
    size: Vec2,
    enabled: bool,
    eye: FrustumMode,
    user_name: Option<String>,
    projections: [Projection; 3],
    plane: ProjectionPlane,
    view_plane: ViewPlane,
    rotation: Quat,
}

impl Default for BaseViewport {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            size: Vec2::ONE,
            enabled: true,
            eye: FrustumMode::Mono,
            user_name: None,
            projections: [Projection::default(); 3],
            plane: ProjectionPlane::default(),
            view_plane: ViewPlane::default(),
            rotation: Quat::IDENTITY,
        }
    }
}

impl BaseViewport {
    /// Create a full-surface viewport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the normalized position of the lower-left corner.
    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    /// Set the normalized size.
    pub fn set_size(&mut self, size: Vec2) {
        self.size = size;
    }

    /// Enable or disable the viewport. Disabled viewports are skipped by
    /// every render path.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether this viewport participates in rendering.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fix the viewport to a single eye (for side-by-side stereo layouts).
    pub fn set_eye(&mut self, eye: FrustumMode) {
        self.eye = eye;
    }

    /// The eye this viewport is fixed to.
    #[must_use]
    pub fn eye(&self) -> FrustumMode {
        self.eye
    }

    /// Normalized lower-left position.
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Normalized size.
    #[must_use]
    pub fn size(&self) -> Vec2 {
        self.size
    }

    /// Bind this viewport to a named user.
    pub fn set_user_name(&mut self, name: impl Into<String>) {
        self.user_name = Some(name.into());
    }

    /// Name of the bound user, if any (the cluster default applies
    /// otherwise).
    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// The projection for `mode`, as of its last calculation.
    #[must_use]
    pub fn projection(&self, mode: FrustumMode) -> &Projection {
        &self.projections[mode.index()]
    }

    /// The projection plane.
    #[must_use]
    pub fn projection_plane(&self) -> &ProjectionPlane {
        &self.plane
    }

    /// Mutable access to the projection plane, for explicit corner setters.
    pub fn projection_plane_mut(&mut self) -> &mut ProjectionPlane {
        &mut self.plane
    }

    /// Recompute the frustum for `mode` from the bound user's eye position.
    pub fn calculate_frustum(&mut self, mode: FrustumMode, user: &User, near: f32, far: f32) {
        let eye = user.eye_position(mode);
        self.projections[mode.index()].calculate(eye, &self.plane, near, far, Vec3::ZERO);
    }

    /// Recompute the frustum for `mode` keeping the plane symmetric relative
    /// to the user: the mono eye anchors the frustum and the per-eye delta
    /// only shifts the view matrix.
    ///
    /// Head-tracked dome content uses this so a user offset cannot skew the
    /// cube faces.
    pub fn calculate_non_linear_frustum(
        &mut self,
        mode: FrustumMode,
        user: &User,
        near: f32,
        far: f32,
    ) {
        let eye = user.pos_mono();
        let offset = user.eye_position(mode) - eye;
        self.projections[mode.index()].calculate(eye, &self.plane, near, far, offset);
    }

    /// Construct the plane corners from four positive half-angle FOVs
    /// (degrees), a plane rotation, and the plane distance.
    ///
    /// This is the common path for configuration-driven viewports that have
    /// no measured corner coordinates.
    pub fn set_view_plane_coords_using_fovs(
        &mut self,
        up: f32,
        down: f32,
        left: f32,
        right: f32,
        rotation: Quat,
        distance: f32,
    ) {
        self.rotation = rotation;

        self.view_plane.lower_left = Vec3::new(
            -distance * left.to_radians().tan(),
            -distance * down.to_radians().tan(),
            -distance,
        );
        self.view_plane.upper_left = Vec3::new(
            -distance * left.to_radians().tan(),
            distance * up.to_radians().tan(),
            -distance,
        );
        self.view_plane.upper_right = Vec3::new(
            distance * right.to_radians().tan(),
            distance * up.to_radians().tan(),
            -distance,
        );

        self.apply_view_plane();
    }

    /// Rescale the horizontal FOV so the view plane keeps the pixels square
    /// when the surface aspect ratio changes.
    pub fn update_fov_to_match_aspect_ratio(&mut self, old_ratio: f32, new_ratio: f32) {
        let scale = new_ratio / old_ratio;
        self.view_plane.lower_left.x *= scale;
        self.view_plane.upper_left.x *= scale;
        self.view_plane.upper_right.x *= scale;
        self.apply_view_plane();
    }

    /// Current horizontal field of view in degrees.
    #[must_use]
    pub fn horizontal_fov(&self) -> f32 {
        let half_width = (self.view_plane.upper_right.x - self.view_plane.upper_left.x) / 2.0;
        let depth = self.view_plane.upper_right.z;
        (half_width / depth).abs().atan().to_degrees() * 2.0
    }

    /// Rescale all four FOV angles so the horizontal FOV becomes `h_fov`
    /// degrees, preserving the aspect and the rotation.
    pub fn set_horizontal_fov(&mut self, h_fov: f32) {
        let ratio = (h_fov / 2.0).to_radians().tan() / (self.horizontal_fov() / 2.0).to_radians().tan();
        let depth = -self.view_plane.upper_left.z;

        let up = (ratio * self.view_plane.upper_left.y / depth).atan().to_degrees();
        let down = (ratio * -self.view_plane.lower_left.y / depth).atan().to_degrees();
        let left = (ratio * -self.view_plane.upper_left.x / depth).atan().to_degrees();
        let right = (ratio * self.view_plane.upper_right.x / depth).atan().to_degrees();

        self.set_view_plane_coords_using_fovs(up, down, left, right, self.rotation, depth);
    }

    fn apply_view_plane(&mut self) {
        self.plane.set_coordinates(
            self.rotation * self.view_plane.lower_left,
            self.rotation * self.view_plane.upper_left,
            self.rotation * self.view_plane.upper_right,
        );
    }
}

/// A window viewport: the base region plus optional exclusively-owned
/// non-linear projection and warp/blend correction mesh.
#[derive(Debug, Default)]
pub struct Viewport {
    /// The plain viewport state shared with cube-face sub-viewports.
    pub base: BaseViewport,
    non_linear: Option<NonLinearProjection>,
    correction_mesh: Option<CorrectionMesh>,
}

impl Viewport {
    /// Create a full-surface viewport with no non-linear projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a non-linear projection; this viewport now renders through the
    /// cubemap path.
    pub fn set_non_linear_projection(&mut self, projection: NonLinearProjection) {
        self.non_linear = Some(projection);
    }

    /// The attached non-linear projection, if any.
    #[must_use]
    pub fn non_linear_projection(&self) -> Option<&NonLinearProjection> {
        self.non_linear.as_ref()
    }

    /// Mutable access to the attached non-linear projection.
    pub fn non_linear_projection_mut(&mut self) -> Option<&mut NonLinearProjection> {
        self.non_linear.as_mut()
    }

    /// Attach a warp/blend correction mesh.
    pub fn set_correction_mesh(&mut self, mesh: CorrectionMesh) {
        self.correction_mesh = Some(mesh);
    }

    /// The attached correction mesh, if any.
    #[must_use]
    pub fn correction_mesh(&self) -> Option<&CorrectionMesh> {
        self.correction_mesh.as_ref()
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fov_plane_matches_manual_corners() {
        let mut vp = BaseViewport::new();
        vp.set_view_plane_coords_using_fovs(45.0, 45.0, 45.0, 45.0, Quat::IDENTITY, 2.0);

        let plane = vp.projection_plane();
        assert_relative_eq!(plane.lower_left().x, -2.0, epsilon = 1e-5);
        assert_relative_eq!(plane.lower_left().y, -2.0, epsilon = 1e-5);
        assert_relative_eq!(plane.lower_left().z, -2.0, epsilon = 1e-5);
        assert_relative_eq!(plane.upper_right().x, 2.0, epsilon = 1e-5);
        assert_relative_eq!(vp.horizontal_fov(), 90.0, epsilon = 1e-4);
    }

    #[test]
    fn fov_plane_rotation_is_applied_after_construction() {
        let mut vp = BaseViewport::new();
        let yaw = Quat::from_rotation_y(90f32.to_radians());
        vp.set_view_plane_coords_using_fovs(45.0, 45.0, 45.0, 45.0, yaw, 1.0);

        // the -Z facing plane now faces -X
        let plane = vp.projection_plane();
        assert_relative_eq!(plane.upper_right().x, -1.0, epsilon = 1e-5);
        assert!(plane.upper_right().z.abs() > 0.9);
    }

    #[test]
    fn aspect_ratio_update_scales_width_only() {
        let mut vp = BaseViewport::new();
        vp.set_view_plane_coords_using_fovs(30.0, 30.0, 40.0, 40.0, Quat::IDENTITY, 1.0);
        let old_fov = vp.horizontal_fov();

        vp.update_fov_to_match_aspect_ratio(16.0 / 9.0, 32.0 / 9.0);
        assert!(vp.horizontal_fov() > old_fov);

        let plane = vp.projection_plane();
        assert_relative_eq!(plane.upper_left().y, 30f32.to_radians().tan(), epsilon = 1e-5);
    }

    #[test]
    fn set_horizontal_fov_roundtrips() {
        let mut vp = BaseViewport::new();
        vp.set_view_plane_coords_using_fovs(25.0, 25.0, 35.0, 35.0, Quat::IDENTITY, 3.0);

        vp.set_horizontal_fov(90.0);
        assert_relative_eq!(vp.horizontal_fov(), 90.0, epsilon = 1e-3);
    }

    #[test]
    fn non_linear_frustum_is_symmetric_for_stereo() {
        let mut user = User::new("u");
        user.set_eye_separation(0.1);

        let mut vp = BaseViewport::new();
        vp.set_view_plane_coords_using_fovs(45.0, 45.0, 45.0, 45.0, Quat::IDENTITY, 1.0);

        vp.calculate_non_linear_frustum(FrustumMode::StereoLeft, &user, 0.1, 100.0);
        vp.calculate_non_linear_frustum(FrustumMode::StereoRight, &user, 0.1, 100.0);

        let left = vp.projection(FrustumMode::StereoLeft).frustum();
        let right = vp.projection(FrustumMode::StereoRight).frustum();
        assert_eq!(left, right);

        // the ordinary stereo path does skew
        vp.calculate_frustum(FrustumMode::StereoLeft, &user, 0.1, 100.0);
        vp.calculate_frustum(FrustumMode::StereoRight, &user, 0.1, 100.0);
        let left = vp.projection(FrustumMode::StereoLeft).frustum();
        let right = vp.projection(FrustumMode::StereoRight).frustum();
        assert_ne!(left, right);
    }
}
