// SPDX-License-Identifier: Apache-2.0
//! Cluster connection management and the frame-lock barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::connection::{
    AcknowledgeFn, Callbacks, Connection, ConnectionChangedFn, ConnectionKind, ConnectionStats,
    DecodeFn, PackageFn,
};
use crate::error::{NetworkError, WaitingFor};
use crate::signal::SyncSignal;

/// This node's role in the cluster.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClusterRole {
    /// The single server (master) node.
    Server,
    /// A client node.
    Client,
}

/// Sync behavior knobs, sourced from the cluster settings.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Firm (hard) frame-lock; loose sync otherwise.
    pub firm_sync: bool,
    /// Barrier watchdog timeout.
    pub sync_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            firm_sync: true,
            sync_timeout: Duration::from_secs(60),
        }
    }
}

/// One client node as seen from the server: the ports the server must listen
/// on for it.
#[derive(Debug, Copy, Clone)]
pub struct ServerPeer {
    /// Sync connection port (0 picks an ephemeral port).
    pub sync_port: u16,
    /// Optional data-transfer connection port.
    pub data_transfer_port: Option<u16>,
}

/// Application callbacks shared by all connections of a manager.
#[derive(Default)]
pub struct ClusterCallbacks {
    /// Shared-data decode, invoked per received sync payload.
    pub sync_decode: Option<DecodeFn>,
    /// Data-transfer package receiver.
    pub package: Option<PackageFn>,
    /// Data-transfer acknowledge receiver.
    pub acknowledge: Option<AcknowledgeFn>,
    /// Connect/disconnect notifications, surfaced to the application.
    pub connection_changed: Option<ConnectionChangedFn>,
}

/// Owns every connection of one node and implements the frame-lock protocol
/// on top of them.
///
/// Explicitly constructed and passed by reference; there is exactly one per
/// process because a node has one network identity, not because of any
/// global registry.
pub struct NetworkManager {
    role: ClusterRole,
    options: SyncOptions,
    signal: Arc<SyncSignal>,
    running: Arc<AtomicBool>,
    cluster_ready: Arc<AtomicBool>,
    connections: Vec<Connection>,
    sync_indices: Vec<usize>,
    transfer_indices: Vec<usize>,
}

impl NetworkManager {
    /// Server side: listen for every client node's connections.
    ///
    /// Ports bind synchronously, so port conflicts fail construction; peers
    /// are then accepted in the background. Connection ids follow peer order.
    pub fn server(
        peers: &[ServerPeer],
        options: SyncOptions,
        callbacks: ClusterCallbacks,
    ) -> Result<Self, NetworkError> {
        let mut manager = Self::empty(ClusterRole::Server, options);
        let shared = SharedHooks::new(&manager, callbacks);

        for peer in peers {
            let id = manager.connections.len();
            let connection = Connection::listen(
                peer.sync_port,
                ConnectionKind::Sync,
                id,
                Arc::clone(&manager.signal),
                shared.callbacks_for(ConnectionKind::Sync),
            )?;
            debug!(id, port = connection.local_port(), "initiating sync connection");
            manager.sync_indices.push(id);
            manager.connections.push(connection);

            if let Some(port) = peer.data_transfer_port {
                let id = manager.connections.len();
                let connection = Connection::listen(
                    port,
                    ConnectionKind::DataTransfer,
                    id,
                    Arc::clone(&manager.signal),
                    shared.callbacks_for(ConnectionKind::DataTransfer),
                )?;
                manager.transfer_indices.push(id);
                manager.connections.push(connection);
            }
        }

        info!(
            clients = peers.len(),
            "this computer is the network server"
        );
        Ok(manager)
    }

    /// Client side: connect this node's configured ports to the server.
    pub fn client(
        server_address: impl Into<String>,
        sync_port: u16,
        data_transfer_port: Option<u16>,
        options: SyncOptions,
        callbacks: ClusterCallbacks,
    ) -> Self {
        let server_address = server_address.into();
        let mut manager = Self::empty(ClusterRole::Client, options);
        let shared = SharedHooks::new(&manager, callbacks);

        let connection = Connection::connect(
            server_address.clone(),
            sync_port,
            ConnectionKind::Sync,
            0,
            Arc::clone(&manager.signal),
            shared.callbacks_for(ConnectionKind::Sync),
        );
        manager.sync_indices.push(0);
        manager.connections.push(connection);

        if let Some(port) = data_transfer_port {
            let id = manager.connections.len();
            let connection = Connection::connect(
                server_address,
                port,
                ConnectionKind::DataTransfer,
                id,
                Arc::clone(&manager.signal),
                shared.callbacks_for(ConnectionKind::DataTransfer),
            );
            manager.transfer_indices.push(id);
            manager.connections.push(connection);
        }

        info!("this computer is a network client");
        manager
    }

    fn empty(role: ClusterRole, options: SyncOptions) -> Self {
        Self {
            role,
            options,
            signal: Arc::new(SyncSignal::new()),
            running: Arc::new(AtomicBool::new(true)),
            cluster_ready: Arc::new(AtomicBool::new(false)),
            connections: Vec::new(),
            sync_indices: Vec::new(),
            transfer_indices: Vec::new(),
        }
    }

    /// This node's role.
    #[must_use]
    pub fn role(&self) -> ClusterRole {
        self.role
    }

    /// Whether this node is the server.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.role == ClusterRole::Server
    }

    /// Whether the node may keep running. Clears when a client loses its
    /// sync connection or the manager is closed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the whole cluster was observed connected.
    #[must_use]
    pub fn is_cluster_ready(&self) -> bool {
        self.cluster_ready.load(Ordering::SeqCst)
    }

    /// Actual sync listen ports, in peer order (server side; resolves
    /// ephemeral port requests).
    #[must_use]
    pub fn sync_listen_ports(&self) -> Vec<u16> {
        self.sync_indices
            .iter()
            .map(|&i| self.connections[i].local_port())
            .collect()
    }

    /// Actual data-transfer listen ports, in peer order (server side).
    #[must_use]
    pub fn transfer_listen_ports(&self) -> Vec<u16> {
        self.transfer_indices
            .iter()
            .map(|&i| self.connections[i].local_port())
            .collect()
    }

    /// Counter snapshots of the sync connections.
    #[must_use]
    pub fn sync_stats(&self) -> Vec<ConnectionStats> {
        self.sync_indices
            .iter()
            .map(|&i| self.connections[i].stats())
            .collect()
    }

    /// Number of currently connected sync peers.
    #[must_use]
    pub fn active_sync_connections(&self) -> usize {
        self.sync_indices
            .iter()
            .filter(|&&i| self.connections[i].is_connected())
            .count()
    }

    /// Block until every configured connection is up, then (server side)
    /// notify the cluster with the `Connected` broadcast.
    pub fn wait_all_connected(&self, timeout: Duration) -> Result<(), NetworkError> {
        let start = Instant::now();
        let all_up = self.signal.wait_until(
            timeout,
            || self.connections.iter().all(Connection::is_connected),
            || info!("waiting for cluster connections"),
        );
        if !all_up {
            return Err(NetworkError::ConnectTimeout {
                elapsed: start.elapsed(),
            });
        }

        self.cluster_ready.store(true, Ordering::SeqCst);
        if self.is_server() {
            for connection in &self.connections {
                if let Err(e) = connection.send_cluster_connected() {
                    warn!(id = connection.id(), error = %e, "cluster-connected notify failed");
                }
            }
        }
        info!(
            connections = self.connections.len(),
            "all cluster connections established"
        );
        Ok(())
    }

    /// Whether every connected sync connection has caught up with the
    /// current frame.
    #[must_use]
    pub fn is_sync_complete(&self) -> bool {
        self.sync_indices
            .iter()
            .filter(|&&i| self.connections[i].is_connected())
            .all(|&i| self.connections[i].is_updated(self.options.firm_sync))
    }

    /// Pre-draw barrier stage.
    ///
    /// Server: flood this frame's shared payload to every client and return —
    /// the server draws while clients decode. Client: wait for the server's
    /// frame (watchdog-bounded), then acknowledge it.
    pub fn frame_lock_pre_stage(&self, shared_payload: &[u8]) -> Result<(), NetworkError> {
        if self.is_server() {
            // a peer dying mid-send degrades that connection, not the frame
            for &i in &self.sync_indices {
                let connection = &self.connections[i];
                if connection.is_connected() {
                    if let Err(e) = connection.send_sync_payload(shared_payload) {
                        warn!(id = connection.id(), error = %e, "sync send failed");
                    }
                }
            }
            return Ok(());
        }

        if self.active_sync_connections() == 0 {
            return Err(NetworkError::NotConnected { id: 0 });
        }
        self.wait_for_sync(WaitingFor::Master)?;

        // everything needed to draw this frame has arrived; tell the server
        for &i in &self.sync_indices {
            let connection = &self.connections[i];
            if connection.is_connected() {
                if let Err(e) = connection.send_sync_ack() {
                    warn!(id = connection.id(), error = %e, "sync ack failed");
                }
            }
        }
        Ok(())
    }

    /// Post-draw, pre-swap barrier stage.
    ///
    /// Server under firm sync: wait (watchdog-bounded) until every client
    /// acked the frame sent in the pre-stage. Clients and loose-sync servers
    /// pass straight through.
    pub fn frame_lock_post_stage(&self) -> Result<(), NetworkError> {
        if !self.is_server() || self.active_sync_connections() == 0 {
            return Ok(());
        }
        self.wait_for_sync(WaitingFor::Clients)
    }

    fn wait_for_sync(&self, waiting_for: WaitingFor) -> Result<(), NetworkError> {
        let start = Instant::now();
        let done = self.signal.wait_until(
            self.options.sync_timeout,
            || !self.is_running() || self.is_sync_complete(),
            || {
                for stats in self.sync_stats() {
                    info!(
                        send = stats.send_frame,
                        recv_current = stats.recv_frame_current,
                        recv_previous = ?stats.recv_frame_previous,
                        %waiting_for,
                        "waiting for sync"
                    );
                }
            },
        );
        if done {
            Ok(())
        } else {
            Err(NetworkError::SyncTimeout {
                waiting_for,
                elapsed: start.elapsed(),
            })
        }
    }

    /// Flood a data-transfer package to every connected transfer peer.
    pub fn transfer_data(&self, package: i32, data: &[u8]) {
        for &i in &self.transfer_indices {
            let connection = &self.connections[i];
            if connection.is_connected() {
                if let Err(e) = connection.send_package(package, data) {
                    warn!(id = connection.id(), error = %e, "package send failed");
                }
            }
        }
    }

    /// Orderly shutdown: stop the frame loop, tell peers, unblock and join
    /// every receive thread.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.signal.notify_all();
        for connection in &self.connections {
            connection.start_shutdown();
        }
        for connection in &mut self.connections {
            connection.join();
        }
        info!("network layer closed");
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("role", &self.role)
            .field("connections", &self.connections.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Bridges per-connection callbacks to manager-level state without the
/// manager and its connections holding references to each other.
struct SharedHooks {
    role: ClusterRole,
    running: Arc<AtomicBool>,
    cluster_ready: Arc<AtomicBool>,
    callbacks: Arc<ClusterCallbacks>,
}

impl SharedHooks {
    fn new(manager: &NetworkManager, callbacks: ClusterCallbacks) -> Self {
        Self {
            role: manager.role,
            running: Arc::clone(&manager.running),
            cluster_ready: Arc::clone(&manager.cluster_ready),
            callbacks: Arc::new(callbacks),
        }
    }

    fn callbacks_for(&self, kind: ConnectionKind) -> Callbacks {
        let mut callbacks = Callbacks::default();

        if kind == ConnectionKind::Sync {
            let app = Arc::clone(&self.callbacks);
            callbacks.decode = Some(Box::new(move |payload: &[u8]| {
                if let Some(decode) = &app.sync_decode {
                    decode(payload);
                }
            }));
        }

        if kind == ConnectionKind::DataTransfer {
            let app = Arc::clone(&self.callbacks);
            callbacks.package = Some(Box::new(move |payload: &[u8], package, id| {
                if let Some(cb) = &app.package {
                    cb(payload, package, id);
                }
            }));
            let app = Arc::clone(&self.callbacks);
            callbacks.acknowledge = Some(Box::new(move |package, id| {
                if let Some(cb) = &app.acknowledge {
                    cb(package, id);
                }
            }));
        }

        let role = self.role;
        let running = Arc::clone(&self.running);
        let app = Arc::clone(&self.callbacks);
        let sync = kind == ConnectionKind::Sync;
        callbacks.connection_changed = Some(Box::new(move |connected, conn_id| {
            info!(id = conn_id, connected, "connection status changed");
            // a client that lost its sync link cannot keep rendering
            if sync && !connected && role == ClusterRole::Client {
                running.store(false, Ordering::SeqCst);
            }
            if let Some(cb) = &app.connection_changed {
                cb(connected, conn_id);
            }
        }));

        let cluster_ready = Arc::clone(&self.cluster_ready);
        callbacks.cluster_connected = Some(Box::new(move || {
            cluster_ready.store(true, Ordering::SeqCst);
        }));

        callbacks
    }
}
