// SPDX-License-Identifier: Apache-2.0
//! Headless cluster test harness.
//!
//! Drives a full Parallax cluster — frame-lock protocol, shared-state
//! distribution, frustum pipeline, non-linear projections — without opening a
//! single window. Two ways to run it:
//!
//! * `parallax-clustertest --local-nodes 3 --frames 20` spins a server and
//!   two clients inside one process on ephemeral localhost ports and checks
//!   that every node observed the same frame sequence.
//! * `parallax-clustertest --config cluster.json --node 1` runs one node of a
//!   real distributed cluster described by a configuration file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use glam::Vec3;
use parallax_core::config::ClusterFile;
use parallax_core::projection::{FisheyeConfig, NonLinearProjection, ProjectionKind};
use parallax_core::render::{HeadlessBackend, RenderData};
use parallax_core::{BaseViewport, Cluster, FrustumMode, Node, Viewport, Window};
use parallax_net::{
    decode_callback, ClusterCallbacks, ClusterRole, NetworkManager, ServerPeer, SharedDataCodec,
    SyncOptions,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Run an in-process cluster with this many nodes (server + clients).
    #[clap(long)]
    local_nodes: Option<usize>,

    /// Cluster configuration file (distributed mode).
    #[clap(long)]
    config: Option<PathBuf>,

    /// Index of the node this process plays (distributed mode).
    #[clap(long, default_value_t = 0)]
    node: usize,

    /// Number of synchronized frames to run.
    #[clap(long, default_value_t = 20)]
    frames: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The shared state the server floods each frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SceneState {
    frame: u64,
    time: f64,
    camera_position: [f32; 3],
}

/// CBOR codec for [`SceneState`]; encode and decode stay symmetric by
/// construction since both sides run the same serde derive.
#[derive(Debug, Default)]
struct SceneCodec {
    state: SceneState,
}

impl SharedDataCodec for SceneCodec {
    fn encode(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        if let Err(e) = ciborium::into_writer(&self.state, &mut bytes) {
            warn!(error = %e, "failed to encode scene state");
        }
        bytes
    }

    fn decode(&mut self, bytes: &[u8]) {
        match ciborium::from_reader(bytes) {
            Ok(state) => self.state = state,
            Err(e) => warn!(error = %e, "discarding undecodable scene payload"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("starting parallax cluster test harness");

    match (args.local_nodes, args.config) {
        (Some(nodes), None) => run_local(nodes, args.frames),
        (None, Some(config)) => run_distributed(&config, args.node, args.frames),
        (Some(_), Some(_)) => bail!("--local-nodes and --config are mutually exclusive"),
        (None, None) => run_local(2, args.frames),
    }
}

/// Node layout used in local mode: a panorama ring of FOV viewports, with the
/// second node driving a fisheye dome instead.
fn local_node(index: usize) -> Node {
    let mut viewport = Viewport::new();
    viewport.base = BaseViewport::new();
    viewport.base.set_user_name("default");

    if index == 1 {
        viewport.set_non_linear_projection(NonLinearProjection::new(ProjectionKind::Fisheye(
            FisheyeConfig::default(),
        )));
    } else {
        let yaw = glam::Quat::from_rotation_y((index as f32 * 30.0).to_radians());
        viewport
            .base
            .set_view_plane_coords_using_fovs(30.0, 30.0, 40.0, 40.0, yaw, 2.0);
    }

    Node {
        address: "127.0.0.1".into(),
        sync_port: 0,
        data_transfer_port: None,
        swap_groups: false,
        windows: vec![Window {
            name: format!("node{index}"),
            resolution: [960, 540],
            stereo: index == 0,
            viewports: vec![viewport],
        }],
    }
}

fn local_cluster(nodes: usize) -> Cluster {
    let mut cluster = Cluster::new("127.0.0.1", Vec::new());
    for index in 0..nodes {
        cluster.nodes.push(local_node(index));
    }
    cluster
}

fn run_local(nodes: usize, frames: u64) -> Result<()> {
    if nodes < 2 {
        bail!("a cluster needs a server and at least one client");
    }
    info!(nodes, frames, "running in-process cluster");

    let options = SyncOptions {
        firm_sync: true,
        sync_timeout: Duration::from_secs(20),
    };

    let peers = vec![
        ServerPeer {
            sync_port: 0,
            data_transfer_port: None,
        };
        nodes - 1
    ];
    let server = NetworkManager::server(&peers, options.clone(), ClusterCallbacks::default())
        .context("binding server ports")?;
    let ports = server.sync_listen_ports();

    let mut workers = Vec::new();
    for (client_index, port) in ports.into_iter().enumerate() {
        let node_index = client_index + 1;
        let options = options.clone();
        workers.push(
            std::thread::Builder::new()
                .name(format!("node-{node_index}"))
                .spawn(move || -> Result<Vec<SceneState>> {
                    let codec = Arc::new(Mutex::new(SceneCodec::default()));
                    let manager = NetworkManager::client(
                        "127.0.0.1",
                        port,
                        None,
                        options,
                        ClusterCallbacks {
                            sync_decode: Some(decode_callback(Arc::clone(&codec))),
                            ..ClusterCallbacks::default()
                        },
                    );
                    let mut runtime =
                        NodeRuntime::new(local_cluster(nodes), node_index, manager, codec)?;
                    runtime.run(frames)
                })
                .context("spawning client node")?,
        );
    }

    let codec = Arc::new(Mutex::new(SceneCodec::default()));
    let mut runtime = NodeRuntime::new(local_cluster(nodes), 0, server, codec)?;
    let server_states = runtime.run(frames)?;

    let mut all_states = vec![server_states];
    for worker in workers {
        let states = worker
            .join()
            .map_err(|_| anyhow::anyhow!("client node panicked"))??;
        all_states.push(states);
    }

    for (node, states) in all_states.iter().enumerate().skip(1) {
        if states != &all_states[0] {
            bail!(
                "node {node} observed a different frame sequence than the server \
                 ({} vs {} frames)",
                states.len(),
                all_states[0].len()
            );
        }
    }
    info!(
        nodes,
        frames, "every node rendered the identical frame sequence"
    );
    Ok(())
}

fn run_distributed(config: &PathBuf, node_index: usize, frames: u64) -> Result<()> {
    let cluster = ClusterFile::load(config)?.into_cluster()?;
    if node_index >= cluster.nodes.len() {
        bail!(
            "node index {node_index} out of range for a {}-node cluster",
            cluster.nodes.len()
        );
    }

    let options = SyncOptions {
        firm_sync: cluster.settings.firm_frame_lock_sync,
        sync_timeout: cluster.settings.sync_timeout,
    };
    let is_server = cluster.nodes[node_index].address == cluster.master_address;

    let codec = Arc::new(Mutex::new(SceneCodec::default()));
    let manager = if is_server {
        let peers: Vec<ServerPeer> = cluster
            .nodes
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != node_index)
            .map(|(_, n)| ServerPeer {
                sync_port: n.sync_port,
                data_transfer_port: n.data_transfer_port,
            })
            .collect();
        NetworkManager::server(&peers, options, ClusterCallbacks::default())
            .context("binding server ports")?
    } else {
        let node = &cluster.nodes[node_index];
        NetworkManager::client(
            cluster.master_address.clone(),
            node.sync_port,
            node.data_transfer_port,
            options,
            ClusterCallbacks {
                sync_decode: Some(decode_callback(Arc::clone(&codec))),
                ..ClusterCallbacks::default()
            },
        )
    };

    let mut runtime = NodeRuntime::new(cluster, node_index, manager, codec)?;
    let states = runtime.run(frames)?;
    info!(frames = states.len(), "node finished");
    Ok(())
}

/// One node's render loop: network manager + cluster model + headless GPU
/// backend, owned together as the application context.
struct NodeRuntime {
    cluster: Cluster,
    node_index: usize,
    manager: NetworkManager,
    backend: HeadlessBackend,
    codec: Arc<Mutex<SceneCodec>>,
    draw_passes: usize,
}

impl NodeRuntime {
    fn new(
        mut cluster: Cluster,
        node_index: usize,
        manager: NetworkManager,
        codec: Arc<Mutex<SceneCodec>>,
    ) -> Result<Self> {
        let mut backend = HeadlessBackend::new();

        // bring every non-linear projection of this node to Ready
        if let Some(node) = cluster.nodes.get_mut(node_index) {
            for window in &mut node.windows {
                for viewport in &mut window.viewports {
                    if let Some(projection) = viewport.non_linear_projection_mut() {
                        projection
                            .initialize(&mut backend)
                            .context("initializing non-linear projection")?;
                    }
                }
            }
        }

        Ok(Self {
            cluster,
            node_index,
            manager,
            backend,
            codec,
            draw_passes: 0,
        })
    }

    fn run(&mut self, frames: u64) -> Result<Vec<SceneState>> {
        self.manager
            .wait_all_connected(Duration::from_secs(20))
            .context("waiting for cluster connections")?;

        let mut observed = Vec::with_capacity(frames as usize);
        for frame in 1..=frames {
            if !self.manager.is_running() {
                bail!("cluster stopped after {} frames", observed.len());
            }

            if self.manager.role() == ClusterRole::Server {
                let payload = {
                    let mut codec = lock(&self.codec);
                    codec.state = SceneState {
                        frame,
                        time: frame as f64 / 60.0,
                        camera_position: [
                            (frame as f32 / 60.0).sin() * 0.2,
                            1.6,
                            (frame as f32 / 60.0).cos() * 0.2,
                        ],
                    };
                    codec.encode()
                };
                self.manager.frame_lock_pre_stage(&payload)?;
            } else {
                self.manager.frame_lock_pre_stage(&[])?;
            }

            let state = lock(&self.codec).state.clone();
            self.render_frame(&state)?;
            observed.push(state);

            self.manager.frame_lock_post_stage()?;
            debug!(frame, "buffer swap");
        }

        info!(
            node = self.node_index,
            frames,
            draw_passes = self.draw_passes,
            "render loop finished"
        );
        Ok(observed)
    }

    /// Everything between the two barrier stages: apply shared state, update
    /// frustums, draw each viewport (through the cubemap path where
    /// configured).
    fn render_frame(&mut self, state: &SceneState) -> Result<()> {
        if let Some(user) = self
            .cluster
            .users_mut()
            .iter_mut()
            .find(|u| u.name() == "default")
        {
            user.set_position(Vec3::from_array(state.camera_position));
        }
        self.cluster.apply_tracking();

        let (near, far) = (
            self.cluster.settings.near_clip,
            self.cluster.settings.far_clip,
        );
        self.cluster.update_frustums(self.node_index, near, far);

        let mut passes = 0usize;
        let scene_frame = state.frame;
        let mut scene = |data: &RenderData| {
            passes += 1;
            debug!(
                frame = scene_frame,
                mode = ?data.frustum_mode,
                face = ?data.face,
                "scene draw pass"
            );
        };

        let Some(node) = self.cluster.nodes.get_mut(self.node_index) else {
            return Ok(());
        };
        for window in &mut node.windows {
            let modes: &[FrustumMode] = if window.stereo {
                &[FrustumMode::StereoLeft, FrustumMode::StereoRight]
            } else {
                &[FrustumMode::Mono]
            };

            for viewport in &mut window.viewports {
                if !viewport.base.is_enabled() {
                    continue;
                }
                for &mode in modes {
                    match viewport.non_linear_projection_mut() {
                        Some(projection) => {
                            projection
                                .update(&mut self.backend, window.resolution)
                                .context("updating non-linear projection targets")?;
                            projection.render_cubemap(&mut self.backend, &mut scene, mode);
                            projection.render(&mut self.backend);
                        }
                        None => {
                            let projection = viewport.base.projection(mode);
                            scene(&RenderData {
                                view: projection.view_matrix(),
                                projection: projection.projection_matrix(),
                                view_projection: projection.view_projection_matrix(),
                                frustum_mode: mode,
                                resolution: window.resolution,
                                face: None,
                            });
                        }
                    }
                }
            }
        }
        self.draw_passes += passes;
        Ok(())
    }
}
