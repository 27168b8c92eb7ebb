// SPDX-License-Identifier: Apache-2.0
//! Declarative cluster configuration.
//!
//! The JSON document mirrors the runtime model closely; loading validates it
//! and produces a fully-wired [`Cluster`]. Schema evolution happens here so
//! the runtime types stay serde-free.

use std::path::Path;
use std::time::Duration;

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, Node, Tracker, TrackerDevice, Window};
use crate::error::{Component, Error};
use crate::projection::{
    CubemapConfig, CylindricalConfig, EquirectangularConfig, FisheyeConfig, NonLinearProjection,
    ProjectionKind, SphericalMirrorConfig, SpoutConfig,
};
use crate::user::User;
use crate::viewport::Viewport;

/// Root of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFile {
    /// Address of the server (master) node.
    pub master_address: String,
    /// Optional runtime settings.
    #[serde(default)]
    pub settings: SettingsFile,
    /// Users; a `default` user is created when absent.
    #[serde(default)]
    pub users: Vec<UserFile>,
    /// Trackers and their devices.
    #[serde(default)]
    pub trackers: Vec<TrackerFile>,
    /// Cluster nodes in connection order.
    pub nodes: Vec<NodeFile>,
}

/// Settings section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    /// Firm (hard) frame-lock sync.
    pub firm_sync: bool,
    /// Barrier watchdog timeout in seconds.
    pub sync_timeout_secs: f64,
    /// Near clip distance.
    pub near_clip: f32,
    /// Far clip distance.
    pub far_clip: f32,
}

impl Default for SettingsFile {
    fn default() -> Self {
        let defaults = crate::settings::Settings::default();
        Self {
            firm_sync: defaults.firm_frame_lock_sync,
            sync_timeout_secs: defaults.sync_timeout.as_secs_f64(),
            near_clip: defaults.near_clip,
            far_clip: defaults.far_clip,
        }
    }
}

/// One user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFile {
    /// User name.
    pub name: String,
    /// Interocular distance in meters.
    #[serde(default)]
    pub eye_separation: Option<f32>,
    /// Head position in world space.
    #[serde(default)]
    pub position: Option<[f32; 3]>,
    /// Tracker binding.
    #[serde(default)]
    pub tracking: Option<TrackingFile>,
}

/// A user's tracker binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingFile {
    /// Tracker name.
    pub tracker: String,
    /// Device name.
    pub device: String,
}

/// One tracker with its device names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerFile {
    /// Tracker name.
    pub name: String,
    /// Device names.
    #[serde(default)]
    pub devices: Vec<String>,
}

/// One node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFile {
    /// Node address.
    pub address: String,
    /// Sync connection port.
    pub sync_port: u16,
    /// Optional data-transfer connection port.
    #[serde(default)]
    pub data_transfer_port: Option<u16>,
    /// Hardware swap-group membership.
    #[serde(default)]
    pub swap_groups: bool,
    /// Windows on this node.
    pub windows: Vec<WindowFile>,
}

/// One window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowFile {
    /// Window name.
    #[serde(default)]
    pub name: String,
    /// Framebuffer resolution in pixels.
    pub resolution: [u32; 2],
    /// Render stereo frustums.
    #[serde(default)]
    pub stereo: bool,
    /// Viewports; a single full-window viewport when empty.
    #[serde(default)]
    pub viewports: Vec<ViewportFile>,
}

/// One viewport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewportFile {
    /// Normalized lower-left position.
    #[serde(default)]
    pub position: Option<[f32; 2]>,
    /// Normalized size.
    #[serde(default)]
    pub size: Option<[f32; 2]>,
    /// Name of the user driving this viewport's frustums.
    #[serde(default)]
    pub user: Option<String>,
    /// How the projection is defined.
    pub projection: ProjectionFile,
}

/// Projection definition variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProjectionFile {
    /// Plane built from four half-angle FOVs at a distance, with an optional
    /// Euler rotation in degrees.
    Fov {
        /// Up half-angle in degrees.
        up: f32,
        /// Down half-angle in degrees.
        down: f32,
        /// Left half-angle in degrees.
        left: f32,
        /// Right half-angle in degrees.
        right: f32,
        /// Plane distance.
        #[serde(default = "default_distance")]
        distance: f32,
        /// Plane rotation as XYZ Euler degrees.
        #[serde(default)]
        rotation: Option<[f32; 3]>,
    },
    /// Plane given by measured corner coordinates.
    Plane {
        /// Lower-left corner.
        lower_left: [f32; 3],
        /// Upper-left corner.
        upper_left: [f32; 3],
        /// Upper-right corner.
        upper_right: [f32; 3],
    },
    /// Fisheye dome output.
    Fisheye {
        /// Total FOV in degrees.
        #[serde(default = "default_fisheye_fov")]
        fov: f32,
        /// Dome tilt in degrees.
        #[serde(default)]
        tilt: f32,
        /// Face target side length in pixels.
        #[serde(default)]
        cubemap_resolution: Option<u32>,
    },
    /// Plain cubemap output.
    Cubemap {
        /// Rig orientation as pitch/yaw/roll degrees.
        #[serde(default)]
        rig_orientation: Option<[f32; 3]>,
        /// Face target side length in pixels.
        #[serde(default)]
        cubemap_resolution: Option<u32>,
    },
    /// Cylindrical panorama output.
    Cylindrical {
        /// Seam rotation in degrees.
        #[serde(default)]
        rotation: f32,
        /// Face target side length in pixels.
        #[serde(default)]
        cubemap_resolution: Option<u32>,
    },
    /// Equirectangular panorama output.
    Equirectangular {
        /// Seam rotation in degrees.
        #[serde(default)]
        rotation: f32,
        /// Face target side length in pixels.
        #[serde(default)]
        cubemap_resolution: Option<u32>,
    },
    /// Spherical-mirror output (warp meshes are loaded separately).
    SphericalMirror {
        /// Mirror tilt in degrees.
        #[serde(default)]
        tilt: f32,
        /// Face target side length in pixels.
        #[serde(default)]
        cubemap_resolution: Option<u32>,
    },
    /// Cubemap export through a texture-sharing sink.
    Spout {
        /// Per-face enable mask in declaration order.
        #[serde(default)]
        enabled_faces: Option<[bool; 6]>,
        /// Face target side length in pixels.
        #[serde(default)]
        cubemap_resolution: Option<u32>,
    },
}

fn default_distance() -> f32 {
    10.0
}

fn default_fisheye_fov() -> f32 {
    180.0
}

fn config_error(code: u32, message: impl Into<String>) -> Error {
    Error::new(Component::Config, code, message)
}

impl ClusterFile {
    /// Parse a configuration document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text)
            .map_err(|e| config_error(1000, format!("failed to parse cluster config: {e}")))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            config_error(1001, format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Validate and build the runtime cluster model.
    pub fn into_cluster(self) -> Result<Cluster, Error> {
        if self.nodes.is_empty() {
            return Err(config_error(1002, "a cluster needs at least one node"));
        }
        if self.master_address.is_empty() {
            return Err(config_error(1003, "master address must not be empty"));
        }
        for node in &self.nodes {
            if node.sync_port == 0 {
                return Err(config_error(
                    1004,
                    format!("node {} has no sync port", node.address),
                ));
            }
        }

        let mut users = Vec::with_capacity(self.users.len());
        for file in &self.users {
            let mut user = User::new(file.name.clone());
            if let Some(sep) = file.eye_separation {
                user.set_eye_separation(sep);
            }
            if let Some(pos) = file.position {
                user.set_position(Vec3::from_array(pos));
            }
            if let Some(tracking) = &file.tracking {
                user.set_tracker(tracking.tracker.clone(), tracking.device.clone());
            }
            users.push(user);
        }

        let mut cluster = Cluster::new(self.master_address.clone(), users);
        cluster.settings.firm_frame_lock_sync = self.settings.firm_sync;
        cluster.settings.sync_timeout = Duration::from_secs_f64(self.settings.sync_timeout_secs);
        cluster.settings.near_clip = self.settings.near_clip;
        cluster.settings.far_clip = self.settings.far_clip;

        for file in &self.trackers {
            cluster.trackers_mut().add(Tracker {
                name: file.name.clone(),
                devices: file.devices.iter().map(TrackerDevice::new).collect(),
            });
        }

        // every tracker binding must resolve
        for user in cluster.users() {
            if let Some(binding) = user.tracker() {
                if cluster
                    .trackers()
                    .device(&binding.tracker, &binding.device)
                    .is_none()
                {
                    return Err(config_error(
                        1005,
                        format!(
                            "user {} is bound to unknown tracker device {}/{}",
                            user.name(),
                            binding.tracker,
                            binding.device
                        ),
                    ));
                }
            }
        }

        let user_names: Vec<String> =
            cluster.users().iter().map(|u| u.name().to_string()).collect();

        for node_file in self.nodes {
            let mut node = Node {
                address: node_file.address,
                sync_port: node_file.sync_port,
                data_transfer_port: node_file.data_transfer_port,
                swap_groups: node_file.swap_groups,
                windows: Vec::with_capacity(node_file.windows.len()),
            };

            for window_file in node_file.windows {
                let mut window = Window {
                    name: window_file.name,
                    resolution: window_file.resolution,
                    stereo: window_file.stereo,
                    viewports: Vec::new(),
                };

                let viewport_files = if window_file.viewports.is_empty() {
                    vec![ViewportFile {
                        position: None,
                        size: None,
                        user: None,
                        projection: ProjectionFile::Fov {
                            up: 26.565,
                            down: 26.565,
                            left: 43.6,
                            right: 43.6,
                            distance: default_distance(),
                            rotation: None,
                        },
                    }]
                } else {
                    window_file.viewports
                };

                for viewport_file in viewport_files {
                    window
                        .viewports
                        .push(build_viewport(viewport_file, &user_names)?);
                }
                node.windows.push(window);
            }
            cluster.nodes.push(node);
        }

        Ok(cluster)
    }
}

fn build_viewport(file: ViewportFile, user_names: &[String]) -> Result<Viewport, Error> {
    let mut viewport = Viewport::new();

    if let Some(position) = file.position {
        viewport.base.set_position(position.into());
    }
    if let Some(size) = file.size {
        viewport.base.set_size(size.into());
    }
    if let Some(user) = file.user {
        if !user_names.iter().any(|n| n == &user) {
            return Err(config_error(
                1006,
                format!("viewport references unknown user {user}"),
            ));
        }
        viewport.base.set_user_name(user);
    }

    match file.projection {
        ProjectionFile::Fov {
            up,
            down,
            left,
            right,
            distance,
            rotation,
        } => {
            let rotation = rotation.map_or(Quat::IDENTITY, |[x, y, z]| {
                Quat::from_euler(
                    EulerRot::XYZ,
                    x.to_radians(),
                    y.to_radians(),
                    z.to_radians(),
                )
            });
            viewport
                .base
                .set_view_plane_coords_using_fovs(up, down, left, right, rotation, distance);
        }
        ProjectionFile::Plane {
            lower_left,
            upper_left,
            upper_right,
        } => {
            viewport.base.projection_plane_mut().set_coordinates(
                Vec3::from_array(lower_left),
                Vec3::from_array(upper_left),
                Vec3::from_array(upper_right),
            );
        }
        ProjectionFile::Fisheye {
            fov,
            tilt,
            cubemap_resolution,
        } => {
            attach_non_linear(
                &mut viewport,
                ProjectionKind::Fisheye(FisheyeConfig {
                    fov,
                    tilt,
                    ..FisheyeConfig::default()
                }),
                cubemap_resolution,
            );
        }
        ProjectionFile::Cubemap {
            rig_orientation,
            cubemap_resolution,
        } => {
            attach_non_linear(
                &mut viewport,
                ProjectionKind::Cubemap(CubemapConfig {
                    rig_orientation: rig_orientation.map_or(Vec3::ZERO, Vec3::from_array),
                }),
                cubemap_resolution,
            );
        }
        ProjectionFile::Cylindrical {
            rotation,
            cubemap_resolution,
        } => {
            attach_non_linear(
                &mut viewport,
                ProjectionKind::Cylindrical(CylindricalConfig {
                    rotation,
                    ..CylindricalConfig::default()
                }),
                cubemap_resolution,
            );
        }
        ProjectionFile::Equirectangular {
            rotation,
            cubemap_resolution,
        } => {
            attach_non_linear(
                &mut viewport,
                ProjectionKind::Equirectangular(EquirectangularConfig { rotation }),
                cubemap_resolution,
            );
        }
        ProjectionFile::SphericalMirror {
            tilt,
            cubemap_resolution,
        } => {
            attach_non_linear(
                &mut viewport,
                ProjectionKind::SphericalMirror(SphericalMirrorConfig {
                    tilt,
                    ..SphericalMirrorConfig::default()
                }),
                cubemap_resolution,
            );
        }
        ProjectionFile::Spout {
            enabled_faces,
            cubemap_resolution,
        } => {
            attach_non_linear(
                &mut viewport,
                ProjectionKind::SpoutOutput(SpoutConfig {
                    enabled_faces: enabled_faces.unwrap_or([true; 6]),
                    ..SpoutConfig::default()
                }),
                cubemap_resolution,
            );
        }
    }

    Ok(viewport)
}

fn attach_non_linear(
    viewport: &mut Viewport,
    kind: ProjectionKind,
    cubemap_resolution: Option<u32>,
) {
    let mut projection = NonLinearProjection::new(kind);
    if let Some(resolution) = cubemap_resolution {
        projection.set_cubemap_resolution(resolution);
    }
    viewport.set_non_linear_projection(projection);
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::InitStage;

    const TWO_NODE_CONFIG: &str = r#"{
        "master_address": "127.0.0.1",
        "settings": { "firm_sync": true, "sync_timeout_secs": 5.0 },
        "users": [
            { "name": "operator", "eye_separation": 0.065, "position": [0.0, 1.6, 0.0] }
        ],
        "nodes": [
            {
                "address": "127.0.0.1",
                "sync_port": 20401,
                "windows": [
                    {
                        "resolution": [1280, 720],
                        "viewports": [
                            {
                                "user": "operator",
                                "projection": {
                                    "type": "fov",
                                    "up": 30.0, "down": 30.0,
                                    "left": 40.0, "right": 40.0,
                                    "distance": 2.0
                                }
                            }
                        ]
                    }
                ]
            },
            {
                "address": "127.0.0.2",
                "sync_port": 20402,
                "data_transfer_port": 20502,
                "windows": [
                    {
                        "resolution": [2048, 2048],
                        "viewports": [
                            { "projection": { "type": "fisheye", "fov": 220.0, "cubemap_resolution": 1024 } }
                        ]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn two_node_config_builds_the_model() {
        let cluster = ClusterFile::from_json(TWO_NODE_CONFIG)
            .expect("parse")
            .into_cluster()
            .expect("build");

        assert_eq!(cluster.nodes.len(), 2);
        assert_eq!(cluster.settings.sync_timeout, Duration::from_secs(5));
        assert!(cluster.user("operator").is_some());

        let vp = &cluster.nodes[0].windows[0].viewports[0];
        assert_eq!(vp.base.user_name(), Some("operator"));
        assert!((vp.base.horizontal_fov() - 80.0).abs() < 1e-3);

        let dome = &cluster.nodes[1].windows[0].viewports[0];
        let non_linear = dome.non_linear_projection().expect("fisheye attached");
        assert_eq!(non_linear.stage(), InitStage::Uninitialized);
        assert_eq!(non_linear.cubemap_resolution(), 1024);
    }

    #[test]
    fn unknown_user_reference_is_rejected() {
        let bad = TWO_NODE_CONFIG.replace("\"user\": \"operator\"", "\"user\": \"ghost\"");
        let err = ClusterFile::from_json(&bad)
            .expect("parse")
            .into_cluster()
            .expect_err("ghost user");
        assert_eq!(err.component, Component::Config);
        assert_eq!(err.code, 1006);
    }

    #[test]
    fn missing_sync_port_is_rejected() {
        let bad = TWO_NODE_CONFIG.replace("\"sync_port\": 20401", "\"sync_port\": 0");
        let err = ClusterFile::from_json(&bad)
            .expect("parse")
            .into_cluster()
            .expect_err("port 0");
        assert_eq!(err.code, 1004);
    }

    #[test]
    fn unresolved_tracker_binding_is_rejected() {
        let bad = TWO_NODE_CONFIG.replace(
            "\"position\": [0.0, 1.6, 0.0]",
            "\"position\": [0.0, 1.6, 0.0], \"tracking\": { \"tracker\": \"vrpn\", \"device\": \"head\" }",
        );
        let err = ClusterFile::from_json(&bad)
            .expect("parse")
            .into_cluster()
            .expect_err("dangling binding");
        assert_eq!(err.code, 1005);
    }
}
