// SPDX-License-Identifier: Apache-2.0
//! The cluster: nodes, windows, users and trackers.
//!
//! Ownership runs strictly downward — the cluster owns nodes, a node owns its
//! windows, a window owns its viewports. Viewports refer to users by name
//! only; users and trackers live in cluster-wide registries.

use glam::{Mat4, Quat, Vec3};

use crate::frustum::FrustumMode;
use crate::settings::Settings;
use crate::user::User;
use crate::viewport::Viewport;

/// One machine/process in the cluster.
#[derive(Debug, Default)]
pub struct Node {
    /// Address the node is reached at (and matched against for role
    /// detection).
    pub address: String,
    /// TCP port of the frame-sync connection.
    pub sync_port: u16,
    /// TCP port of the optional out-of-band data-transfer connection.
    pub data_transfer_port: Option<u16>,
    /// Whether the node should join a hardware swap group (driven by an
    /// external vendor API).
    pub swap_groups: bool,
    /// Windows owned by this node.
    pub windows: Vec<Window>,
}

/// One window/surface on a node. Context creation is out of scope; this is
/// the bookkeeping the frustum pipeline needs.
#[derive(Debug, Default)]
pub struct Window {
    /// Window name for logs.
    pub name: String,
    /// Framebuffer resolution in pixels.
    pub resolution: [u32; 2],
    /// Whether stereo frustums are computed for this window.
    pub stereo: bool,
    /// Viewports rendered into this window.
    pub viewports: Vec<Viewport>,
}

impl Window {
    /// Frustum modes this window renders each frame.
    #[must_use]
    pub fn frustum_modes(&self) -> &'static [FrustumMode] {
        if self.stereo {
            &[FrustumMode::StereoLeft, FrustumMode::StereoRight]
        } else {
            &[FrustumMode::Mono]
        }
    }
}

/// A pose-reporting device inside a tracker.
#[derive(Debug, Clone)]
pub struct TrackerDevice {
    /// Device name, the second half of a user's tracker binding.
    pub name: String,
    /// Latest reported pose (device-local → world).
    pub transform: Mat4,
}

impl TrackerDevice {
    /// Create a device with an identity pose.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
        }
    }

    /// Update the pose from a position and orientation sample.
    pub fn set_pose(&mut self, position: Vec3, orientation: Quat) {
        self.transform = Mat4::from_translation(position) * Mat4::from_quat(orientation);
    }
}

/// A named tracking system owning its devices.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    /// Tracker name, the first half of a user's tracker binding.
    pub name: String,
    /// Devices reported by this tracker.
    pub devices: Vec<TrackerDevice>,
}

/// All trackers known to the cluster, addressed by `(tracker, device)` name
/// pairs.
#[derive(Debug, Clone, Default)]
pub struct TrackerRegistry {
    trackers: Vec<Tracker>,
}

impl TrackerRegistry {
    /// Add a tracker.
    pub fn add(&mut self, tracker: Tracker) {
        self.trackers.push(tracker);
    }

    /// All trackers.
    #[must_use]
    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    /// Look up a device by `(tracker, device)` name.
    #[must_use]
    pub fn device(&self, tracker: &str, device: &str) -> Option<&TrackerDevice> {
        self.trackers
            .iter()
            .find(|t| t.name == tracker)?
            .devices
            .iter()
            .find(|d| d.name == device)
    }

    /// Mutable device lookup, for feeding in pose samples.
    pub fn device_mut(&mut self, tracker: &str, device: &str) -> Option<&mut TrackerDevice> {
        self.trackers
            .iter_mut()
            .find(|t| t.name == tracker)?
            .devices
            .iter_mut()
            .find(|d| d.name == device)
    }

    /// Push the latest device poses into every tracked user.
    pub fn apply_to_users(&self, users: &mut [User]) {
        for user in users {
            let Some(binding) = user.tracker().cloned() else {
                continue;
            };
            match self.device(&binding.tracker, &binding.device) {
                Some(device) => user.set_transform(device.transform),
                None => tracing::warn!(
                    tracker = %binding.tracker,
                    device = %binding.device,
                    user = %user.name(),
                    "tracker binding does not resolve to a device"
                ),
            }
        }
    }
}

/// The whole cluster description, populated from configuration at startup.
#[derive(Debug)]
pub struct Cluster {
    /// Address of the server (master) node.
    pub master_address: String,
    /// Cluster-wide runtime settings.
    pub settings: Settings,
    /// Nodes in connection order; a node's index is its identity.
    pub nodes: Vec<Node>,
    users: Vec<User>,
    trackers: TrackerRegistry,
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new("127.0.0.1", Vec::new())
    }
}

impl Cluster {
    /// Create a cluster with the given users; a `default` user is prepended
    /// when none carries that name, so the user list is never empty.
    #[must_use]
    pub fn new(master_address: impl Into<String>, mut users: Vec<User>) -> Self {
        if !users.iter().any(|u| u.name() == "default") {
            users.insert(0, User::default());
        }
        Self {
            master_address: master_address.into(),
            settings: Settings::default(),
            nodes: Vec::new(),
            users,
            trackers: TrackerRegistry::default(),
        }
    }

    /// All users.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Mutable access to all users (per-frame tracking input).
    pub fn users_mut(&mut self) -> &mut [User] {
        &mut self.users
    }

    /// Look up a user by name.
    #[must_use]
    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name() == name)
    }

    /// The default user, bound by viewports that name no other.
    #[must_use]
    pub fn default_user(&self) -> &User {
        self.user("default").unwrap_or(&self.users[0])
    }

    /// The tracker registry.
    #[must_use]
    pub fn trackers(&self) -> &TrackerRegistry {
        &self.trackers
    }

    /// Mutable tracker registry, for wiring and pose input.
    pub fn trackers_mut(&mut self) -> &mut TrackerRegistry {
        &mut self.trackers
    }

    /// Apply the latest tracker poses to all tracked users.
    pub fn apply_tracking(&mut self) {
        self.trackers.apply_to_users(&mut self.users);
    }

    /// Node index whose address matches `address`, if any.
    #[must_use]
    pub fn node_index_for_address(&self, address: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.address == address)
    }

    /// Recompute every enabled viewport frustum of one node, for all frustum
    /// modes its windows render.
    ///
    /// This is the per-frame entry point between receiving shared state and
    /// drawing.
    pub fn update_frustums(&mut self, node_index: usize, near: f32, far: f32) {
        let users = &self.users;
        let Some(node) = self.nodes.get_mut(node_index) else {
            return;
        };

        for window in &mut node.windows {
            let modes: &[FrustumMode] = if window.stereo {
                &[
                    FrustumMode::Mono,
                    FrustumMode::StereoLeft,
                    FrustumMode::StereoRight,
                ]
            } else {
                &[FrustumMode::Mono]
            };

            for viewport in &mut window.viewports {
                if !viewport.base.is_enabled() {
                    continue;
                }
                let user = viewport
                    .base
                    .user_name()
                    .and_then(|name| users.iter().find(|u| u.name() == name))
                    .unwrap_or_else(|| {
                        users
                            .iter()
                            .find(|u| u.name() == "default")
                            .unwrap_or(&users[0])
                    });

                for &mode in modes {
                    viewport.base.calculate_frustum(mode, user, near, far);
                    if let Some(non_linear) = viewport.non_linear_projection_mut() {
                        non_linear.update_frustums(mode, user, near, far);
                    }
                }
            }
        }
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::BaseViewport;

    fn two_node_cluster() -> Cluster {
        let mut cluster = Cluster::new("127.0.0.1", Vec::new());
        for i in 0..2u16 {
            let mut viewport = Viewport::new();
            viewport.base = BaseViewport::new();
            cluster.nodes.push(Node {
                address: format!("10.0.0.{}", i + 1),
                sync_port: 20400 + i,
                data_transfer_port: None,
                swap_groups: false,
                windows: vec![Window {
                    name: format!("w{i}"),
                    resolution: [800, 600],
                    stereo: false,
                    viewports: vec![viewport],
                }],
            });
        }
        cluster
    }

    #[test]
    fn default_user_is_injected() {
        let cluster = Cluster::new("127.0.0.1", vec![User::new("alice")]);
        assert!(cluster.user("default").is_some());
        assert!(cluster.user("alice").is_some());
    }

    #[test]
    fn update_frustums_touches_enabled_viewports() {
        let mut cluster = two_node_cluster();
        cluster.update_frustums(0, 0.1, 100.0);

        let projection = cluster.nodes[0].windows[0].viewports[0]
            .base
            .projection(FrustumMode::Mono);
        assert_ne!(projection.view_projection_matrix(), Mat4::IDENTITY);

        // node 1 was not updated
        let untouched = cluster.nodes[1].windows[0].viewports[0]
            .base
            .projection(FrustumMode::Mono);
        assert_eq!(untouched.view_projection_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn tracking_updates_only_bound_users() {
        let mut tracked = User::new("tracked");
        tracked.set_tracker("head-tracker", "hmd");
        let free = User::new("free");

        let mut cluster = Cluster::new("127.0.0.1", vec![tracked, free]);
        let mut tracker = Tracker {
            name: "head-tracker".into(),
            devices: vec![TrackerDevice::new("hmd")],
        };
        tracker.devices[0].set_pose(Vec3::new(0.0, 1.8, 0.0), Quat::IDENTITY);
        cluster.trackers_mut().add(tracker);

        cluster.apply_tracking();

        let tracked = cluster.user("tracked").expect("tracked user");
        let free = cluster.user("free").expect("free user");
        assert_eq!(tracked.pos_mono().y, 1.8);
        assert_eq!(free.pos_mono().y, 0.0);
    }

    #[test]
    fn node_index_matches_address() {
        let cluster = two_node_cluster();
        assert_eq!(cluster.node_index_for_address("10.0.0.2"), Some(1));
        assert_eq!(cluster.node_index_for_address("10.9.9.9"), None);
    }
}
