// SPDX-License-Identifier: Apache-2.0
//! Tracked users (head poses) and their derived eye positions.

use glam::{Mat4, Quat, Vec3};

use crate::frustum::FrustumMode;

/// Default interocular distance in meters.
pub const DEFAULT_EYE_SEPARATION: f32 = 0.06;

/// Binding of a user's head pose to a tracker device, by name.
///
/// These are lookup keys into the tracker registry, never ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerBinding {
    /// Name of the tracker.
    pub tracker: String,
    /// Name of the device within that tracker.
    pub device: String,
}

/// A viewer: head pose, eye separation and the derived world-space eye
/// positions.
///
/// The pose matrix maps head-local coordinates to world space; the stereo
/// eyes sit at `∓separation/2` on the head-local X axis. All three eye
/// positions are recomputed jointly whenever any pose input changes, so
/// partial updates cannot leave mono and stereo eyes disagreeing.
#[derive(Debug, Clone)]
pub struct User {
    name: String,
    eye_separation: f32,
    position: Vec3,
    orientation: Quat,
    transform: Mat4,
    pos_mono: Vec3,
    pos_left_eye: Vec3,
    pos_right_eye: Vec3,
    tracker: Option<TrackerBinding>,
}

impl Default for User {
    fn default() -> Self {
        Self::new("default")
    }
}

impl User {
    /// Create a user at the origin with the default eye separation.
    pub fn new(name: impl Into<String>) -> Self {
        let mut user = Self {
            name: name.into(),
            eye_separation: DEFAULT_EYE_SEPARATION,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            transform: Mat4::IDENTITY,
            pos_mono: Vec3::ZERO,
            pos_left_eye: Vec3::ZERO,
            pos_right_eye: Vec3::ZERO,
            tracker: None,
        };
        user.update_eye_positions();
        user
    }

    /// User name, the key viewports bind to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the head position in world space, keeping the orientation.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.rebuild_transform();
    }

    /// Set the head orientation, pivoting about the current position.
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation;
        self.rebuild_transform();
    }

    /// Set the head orientation from XYZ Euler angles (radians).
    pub fn set_orientation_euler(&mut self, x: f32, y: f32, z: f32) {
        self.set_orientation(Quat::from_euler(glam::EulerRot::XYZ, x, y, z));
    }

    /// Replace the full head pose matrix (the per-frame tracker input path).
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
        self.update_eye_positions();
    }

    /// Set the interocular distance in meters.
    pub fn set_eye_separation(&mut self, eye_separation: f32) {
        self.eye_separation = eye_separation;
        self.update_eye_positions();
    }

    /// Bind this user's head pose to a named tracker device.
    pub fn set_tracker(&mut self, tracker: impl Into<String>, device: impl Into<String>) {
        self.tracker = Some(TrackerBinding {
            tracker: tracker.into(),
            device: device.into(),
        });
    }

    /// Whether a tracker binding is configured.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.tracker.is_some()
    }

    /// The tracker binding, if any.
    #[must_use]
    pub fn tracker(&self) -> Option<&TrackerBinding> {
        self.tracker.as_ref()
    }

    /// Interocular distance in meters.
    #[must_use]
    pub fn eye_separation(&self) -> f32 {
        self.eye_separation
    }

    /// Head pose matrix (head-local → world).
    #[must_use]
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// World-space mono eye position.
    #[must_use]
    pub fn pos_mono(&self) -> Vec3 {
        self.pos_mono
    }

    /// World-space left eye position.
    #[must_use]
    pub fn pos_left_eye(&self) -> Vec3 {
        self.pos_left_eye
    }

    /// World-space right eye position.
    #[must_use]
    pub fn pos_right_eye(&self) -> Vec3 {
        self.pos_right_eye
    }

    /// World-space eye position for `mode`.
    #[must_use]
    pub fn eye_position(&self, mode: FrustumMode) -> Vec3 {
        match mode {
            FrustumMode::Mono => self.pos_mono,
            FrustumMode::StereoLeft => self.pos_left_eye,
            FrustumMode::StereoRight => self.pos_right_eye,
        }
    }

    fn rebuild_transform(&mut self) {
        self.transform =
            Mat4::from_translation(self.position) * Mat4::from_quat(self.orientation);
        self.update_eye_positions();
    }

    /// Recompute all three eye positions from `(transform, separation)` in
    /// one place.
    fn update_eye_positions(&mut self) {
        let offset = Vec3::new(self.eye_separation / 2.0, 0.0, 0.0);
        self.pos_mono = self.transform.transform_point3(Vec3::ZERO);
        self.pos_left_eye = self.transform.transform_point3(-offset);
        self.pos_right_eye = self.transform.transform_point3(offset);
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn eye_separation_is_idempotent() {
        let mut user = User::new("u");
        user.set_position(Vec3::new(0.1, 1.6, 0.0));
        user.set_eye_separation(0.065);
        let left = user.pos_left_eye();
        let right = user.pos_right_eye();

        user.set_eye_separation(0.065);
        assert_eq!(user.pos_left_eye(), left);
        assert_eq!(user.pos_right_eye(), right);
    }

    #[test]
    fn eyes_straddle_the_mono_position() {
        let mut user = User::new("u");
        user.set_position(Vec3::new(0.0, 1.6, 0.0));
        user.set_eye_separation(0.06);

        assert_relative_eq!(user.pos_mono().y, 1.6, epsilon = 1e-6);
        assert_relative_eq!(user.pos_left_eye().x, -0.03, epsilon = 1e-6);
        assert_relative_eq!(user.pos_right_eye().x, 0.03, epsilon = 1e-6);
    }

    #[test]
    fn transform_and_separation_stay_consistent_in_any_order() {
        let pose = Mat4::from_rotation_y(90f32.to_radians());

        let mut a = User::new("a");
        a.set_eye_separation(0.08);
        a.set_transform(pose);

        let mut b = User::new("b");
        b.set_transform(pose);
        b.set_eye_separation(0.08);

        assert_relative_eq!(a.pos_left_eye().z, b.pos_left_eye().z, epsilon = 1e-6);
        assert_relative_eq!(a.pos_right_eye().z, b.pos_right_eye().z, epsilon = 1e-6);

        // a 90° yaw turns the lateral eye offset into a depth offset
        assert_relative_eq!(a.pos_left_eye().z, 0.04, epsilon = 1e-6);
        assert_relative_eq!(a.pos_right_eye().z, -0.04, epsilon = 1e-6);
    }

    #[test]
    fn orientation_pivots_about_the_head_position() {
        let mut user = User::new("u");
        user.set_position(Vec3::new(0.0, 2.0, 0.0));
        user.set_orientation(Quat::from_rotation_y(180f32.to_radians()));

        // mono eye stays at the pivot; stereo eyes swap sides
        assert_relative_eq!(user.pos_mono().y, 2.0, epsilon = 1e-6);
        assert!(user.pos_left_eye().x > 0.0);
        assert!(user.pos_right_eye().x < 0.0);
    }
}
