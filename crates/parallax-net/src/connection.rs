// SPDX-License-Identifier: Apache-2.0
//! One peer connection: a TCP socket plus its dedicated receive thread.
//!
//! The receive thread is the only reader; the render thread (and the manager)
//! only send and inspect the mutex-guarded frame counters. Shutdown follows a
//! strict order — terminate flag, then socket shutdown to unblock the
//! blocking read, then join — so a connection can never resurrect itself
//! after being told to stop.

use std::io::BufReader;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use parallax_proto::{
    next_frame, read_message, write_message, Message, ProtocolError, DEFAULT_BUFFER_SIZE,
    FRAME_NUMBER_SIZE, MAX_PAYLOAD_SIZE,
};
use tracing::{debug, error, info, warn};

use crate::error::NetworkError;
use crate::signal::{lock, SyncSignal};

/// What a connection carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Frame-gated shared-state sync.
    Sync,
    /// Out-of-band binary packages with ids and acks.
    DataTransfer,
    /// Raw command payloads, not subject to the frame barrier.
    ExternalControl,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::Sync => f.write_str("sync"),
            ConnectionKind::DataTransfer => f.write_str("data transfer"),
            ConnectionKind::ExternalControl => f.write_str("external control"),
        }
    }
}

/// Shared-data decode callback: receives each sync payload.
pub type DecodeFn = Box<dyn Fn(&[u8]) + Send + Sync>;
/// Data-transfer package callback: payload, package id, connection id.
pub type PackageFn = Box<dyn Fn(&[u8], i32, usize) + Send + Sync>;
/// Data-transfer acknowledge callback: package id, connection id.
pub type AcknowledgeFn = Box<dyn Fn(i32, usize) + Send + Sync>;
/// Connection status callback: connected flag, connection id.
pub type ConnectionChangedFn = Box<dyn Fn(bool, usize) + Send + Sync>;
/// Whole-cluster-connected callback (`Connected` token received).
pub type ClusterConnectedFn = Box<dyn Fn() + Send + Sync>;

/// Callbacks a connection invokes from its receive thread.
///
/// All are fixed at construction; runtime errors are reported through these,
/// never unwound across the thread boundary.
#[derive(Default)]
pub struct Callbacks {
    /// Sync payload decoder.
    pub decode: Option<DecodeFn>,
    /// Data-transfer package receiver.
    pub package: Option<PackageFn>,
    /// Data-transfer acknowledge receiver.
    pub acknowledge: Option<AcknowledgeFn>,
    /// Connect/disconnect notifications.
    pub connection_changed: Option<ConnectionChangedFn>,
    /// Cluster-wide connected notification.
    pub cluster_connected: Option<ClusterConnectedFn>,
}

/// Frame counters and buffer bookkeeping shared between the render thread
/// and the receive thread. This pair of counters is the only state the two
/// threads share.
#[derive(Debug)]
struct SyncState {
    send_frame: u64,
    recv_current: u64,
    recv_previous: Option<u64>,
    updated: bool,
    peer_buffer_size: u32,
    recv_buffer_size: u32,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            send_frame: 0,
            recv_current: 0,
            recv_previous: None,
            updated: false,
            peer_buffer_size: DEFAULT_BUFFER_SIZE,
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Snapshot of a connection's counters, for diagnostics and tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Last frame number sent on this connection.
    pub send_frame: u64,
    /// Most recently received frame number.
    pub recv_frame_current: u64,
    /// Previously received frame number, if any frame arrived yet.
    pub recv_frame_previous: Option<u64>,
    /// Our declared receive-buffer size after renegotiation.
    pub receive_buffer_size: u32,
    /// Our record of the peer's declared buffer size.
    pub peer_buffer_size: u32,
}

struct Core {
    id: usize,
    kind: ConnectionKind,
    is_server: bool,
    connected: AtomicBool,
    terminate: AtomicBool,
    stream: Mutex<Option<TcpStream>>,
    state: Mutex<SyncState>,
    signal: Arc<SyncSignal>,
    callbacks: Callbacks,
}

impl Core {
    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            if let Some(cb) = &self.callbacks.connection_changed {
                cb(connected, self.id);
            }
        }
        self.signal.notify_all();
    }

    fn send(&self, message: &Message) -> Result<(), NetworkError> {
        let guard = lock(&self.stream);
        let Some(stream) = guard.as_ref() else {
            return Err(NetworkError::NotConnected { id: self.id });
        };
        write_message(&mut (&*stream), message).map_err(|e| match e {
            ProtocolError::Io(source) => NetworkError::Send {
                id: self.id,
                source,
            },
            other => NetworkError::Receive {
                id: self.id,
                source: other,
            },
        })
    }

    /// Receive loop body; returns when the peer goes away or shutdown is
    /// requested.
    fn run(&self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(id = self.id, error = %e, "failed to disable Nagle's algorithm");
        }
        {
            let write_half = stream.try_clone().ok();
            *lock(&self.stream) = write_half;
        }
        self.set_connected(true);
        info!(id = self.id, kind = %self.kind, "connection established");

        let mut reader = BufReader::new(stream);
        while !self.terminate.load(Ordering::SeqCst) {
            let max_payload = if self.kind == ConnectionKind::Sync {
                lock(&self.state).recv_buffer_size.max(FRAME_NUMBER_SIZE as u32)
            } else {
                MAX_PAYLOAD_SIZE
            };

            match read_message(&mut reader, max_payload) {
                Ok(message) => {
                    if !self.handle_message(message) {
                        break;
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(id = self.id, error = %e, "discarding malformed frame");
                }
                Err(ProtocolError::Io(e)) => {
                    if self.terminate.load(Ordering::SeqCst) {
                        break;
                    }
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        info!(id = self.id, "TCP connection closed by peer");
                    } else {
                        error!(id = self.id, error = %e, "receive failed");
                    }
                    break;
                }
                Err(e) => {
                    error!(id = self.id, error = %e, "protocol violation, closing connection");
                    break;
                }
            }
        }

        self.teardown();
    }

    /// Returns whether the receive loop should keep going.
    fn handle_message(&self, message: Message) -> bool {
        match message {
            Message::Sync { frame, payload } => {
                if self.kind != ConnectionKind::Sync {
                    warn!(id = self.id, kind = %self.kind, "sync frame on non-sync connection");
                    return true;
                }
                // decode strictly before the counters advance: the moment the
                // barrier predicate can open, this frame's data is in place
                if !payload.is_empty() {
                    if let Some(decode) = &self.callbacks.decode {
                        decode(&payload);
                    }
                }
                {
                    let mut state = lock(&self.state);
                    state.recv_previous = Some(state.recv_current);
                    state.recv_current = frame;
                    state.updated = true;
                }
                self.signal.notify_all();
                true
            }
            Message::Connected => {
                if let Some(cb) = &self.callbacks.cluster_connected {
                    cb();
                }
                self.signal.notify_all();
                true
            }
            Message::Disconnect => {
                info!(id = self.id, "peer terminated connection");
                false
            }
            Message::Size { required } => {
                if required > MAX_PAYLOAD_SIZE {
                    let abuse = NetworkError::BufferSizeAbuse {
                        id: self.id,
                        requested: required,
                        max: MAX_PAYLOAD_SIZE,
                    };
                    error!(error = %abuse, "closing connection");
                    return false;
                }
                let mut state = lock(&self.state);
                // buffers only grow
                if required > state.recv_buffer_size {
                    info!(
                        id = self.id,
                        old = state.recv_buffer_size,
                        new = required,
                        "re-sizing receive buffer"
                    );
                    state.recv_buffer_size = required;
                }
                true
            }
            Message::Fill { payload } => self.handle_fill(&payload),
            Message::Ack { package } => {
                if let Some(cb) = &self.callbacks.acknowledge {
                    cb(package, self.id);
                }
                true
            }
        }
    }

    fn handle_fill(&self, payload: &[u8]) -> bool {
        match self.kind {
            ConnectionKind::DataTransfer => {
                if payload.len() < 4 {
                    warn!(id = self.id, "data package shorter than its id prefix");
                    return true;
                }
                let package = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                if let Some(cb) = &self.callbacks.package {
                    cb(&payload[4..], package, self.id);
                }
                if let Err(e) = self.send(&Message::Ack { package }) {
                    warn!(id = self.id, error = %e, "failed to acknowledge package");
                }
                true
            }
            ConnectionKind::ExternalControl => {
                if let Some(decode) = &self.callbacks.decode {
                    decode(payload);
                }
                true
            }
            ConnectionKind::Sync => {
                warn!(id = self.id, "out-of-band payload on sync connection, skipping");
                true
            }
        }
    }

    fn teardown(&self) {
        if let Some(stream) = lock(&self.stream).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.set_connected(false);
        info!(id = self.id, "connection closed");
    }
}

/// A peer connection handle owned by the manager (or the application, for
/// external-control channels).
pub struct Connection {
    core: Arc<Core>,
    thread: Option<JoinHandle<()>>,
    local_port: u16,
}

impl Connection {
    /// Server side: bind `port` (0 picks an ephemeral port) and accept one
    /// peer in the background.
    ///
    /// Binding happens synchronously so construction-time failures surface
    /// as errors; only the accept and the receive loop run on the thread.
    pub fn listen(
        port: u16,
        kind: ConnectionKind,
        id: usize,
        signal: Arc<SyncSignal>,
        callbacks: Callbacks,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| NetworkError::Bind { port, source })?;
        let local_port = listener
            .local_addr()
            .map_err(|source| NetworkError::Bind { port, source })?
            .port();
        listener
            .set_nonblocking(true)
            .map_err(|source| NetworkError::Bind { port, source })?;

        let core = Arc::new(Core {
            id,
            kind,
            is_server: true,
            connected: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            stream: Mutex::new(None),
            state: Mutex::new(SyncState::default()),
            signal,
            callbacks,
        });

        let thread_core = Arc::clone(&core);
        let thread = std::thread::Builder::new()
            .name(format!("parallax-conn-{id}"))
            .spawn(move || accept_and_run(&listener, &thread_core))
            .map_err(|source| NetworkError::Bind { port, source })?;

        Ok(Self {
            core,
            thread: Some(thread),
            local_port,
        })
    }

    /// Client side: connect to `address:port` in the background, retrying
    /// once per second until the server accepts or shutdown is requested.
    pub fn connect(
        address: impl Into<String>,
        port: u16,
        kind: ConnectionKind,
        id: usize,
        signal: Arc<SyncSignal>,
        callbacks: Callbacks,
    ) -> Self {
        let address = address.into();
        let core = Arc::new(Core {
            id,
            kind,
            is_server: false,
            connected: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            stream: Mutex::new(None),
            state: Mutex::new(SyncState::default()),
            signal,
            callbacks,
        });

        let thread_core = Arc::clone(&core);
        let thread = std::thread::Builder::new()
            .name(format!("parallax-conn-{id}"))
            .spawn(move || connect_and_run(&address, port, &thread_core))
            .ok();

        Self {
            core,
            thread,
            local_port: 0,
        }
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> usize {
        self.core.id
    }

    /// What this connection carries.
    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        self.core.kind
    }

    /// The locally bound listen port (server side; useful with port 0).
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Whether the peer is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::SeqCst)
    }

    /// Snapshot the frame counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let state = lock(&self.core.state);
        ConnectionStats {
            send_frame: state.send_frame,
            recv_frame_current: state.recv_current,
            recv_frame_previous: state.recv_previous,
            receive_buffer_size: state.recv_buffer_size,
            peer_buffer_size: state.peer_buffer_size,
        }
    }

    /// Barrier predicate for this connection.
    ///
    /// Server side: the peer's latest ack must equal the frame we sent.
    /// Client side: the previously received frame must equal the frame we
    /// last acked (the current one is the frame being rendered). Loose sync
    /// only requires that something new arrived since the last ack.
    #[must_use]
    pub fn is_updated(&self, firm_sync: bool) -> bool {
        let state = lock(&self.core.state);
        let caught_up = if self.core.is_server {
            if firm_sync {
                state.recv_current == state.send_frame
            } else {
                true
            }
        } else if firm_sync {
            state.recv_previous == Some(state.send_frame)
        } else {
            state.updated
        };
        caught_up && self.is_connected()
    }

    /// Server per-frame send: advance the frame counter, renegotiate the
    /// peer's buffer if the payload outgrew it, then push the payload.
    ///
    /// The resize message, when needed, is sent exactly once and strictly
    /// before the oversized payload, per connection.
    pub fn send_sync_payload(&self, payload: &[u8]) -> Result<u64, NetworkError> {
        let required = (FRAME_NUMBER_SIZE + payload.len()) as u32;
        let (frame, resize) = {
            let mut state = lock(&self.core.state);
            state.send_frame = next_frame(state.send_frame);
            state.updated = false;
            let resize = required > state.peer_buffer_size;
            if resize {
                state.peer_buffer_size = required;
            }
            (state.send_frame, resize)
        };

        if resize {
            debug!(id = self.id(), required, "negotiating receive buffer growth");
            self.send(&Message::Size { required })?;
        }
        self.send(&Message::Sync {
            frame,
            payload: payload.to_vec(),
        })?;
        Ok(frame)
    }

    /// Client per-frame acknowledgement: an empty-payload sync frame carrying
    /// the advanced frame counter.
    pub fn send_sync_ack(&self) -> Result<u64, NetworkError> {
        let frame = {
            let mut state = lock(&self.core.state);
            state.send_frame = next_frame(state.send_frame);
            state.updated = false;
            state.send_frame
        };
        self.send(&Message::Sync {
            frame,
            payload: Vec::new(),
        })?;
        Ok(frame)
    }

    /// Send a data-transfer package (`package_id || data`).
    pub fn send_package(&self, package: i32, data: &[u8]) -> Result<(), NetworkError> {
        let mut payload = Vec::with_capacity(4 + data.len());
        payload.extend_from_slice(&package.to_le_bytes());
        payload.extend_from_slice(data);
        self.send(&Message::Fill { payload })
    }

    /// Send a raw out-of-band payload (external-control commands).
    pub fn send_fill(&self, data: &[u8]) -> Result<(), NetworkError> {
        self.send(&Message::Fill {
            payload: data.to_vec(),
        })
    }

    /// Send the whole-cluster-connected notification.
    pub fn send_cluster_connected(&self) -> Result<(), NetworkError> {
        self.send(&Message::Connected)
    }

    fn send(&self, message: &Message) -> Result<(), NetworkError> {
        self.core.send(message)
    }

    /// Begin shutdown: best-effort disconnect notice, then terminate flag,
    /// then socket shutdown to unblock the receive thread. The flag is set
    /// before the socket closes so the thread cannot start a reconnect after
    /// being told to stop.
    pub fn start_shutdown(&self) {
        if self.is_connected() {
            let _ = self.send(&Message::Disconnect);
        }
        self.core.terminate.store(true, Ordering::SeqCst);
        if let Some(stream) = lock(&self.core.stream).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.core.signal.notify_all();
    }

    /// Join the receive thread after `start_shutdown`.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Full orderly close.
    pub fn close(&mut self) {
        self.start_shutdown();
        self.join();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.core.id)
            .field("kind", &self.core.kind)
            .field("is_server", &self.core.is_server)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn accept_and_run(listener: &TcpListener, core: &Core) {
    info!(id = core.id, kind = %core.kind, "waiting for peer to connect");
    loop {
        if core.terminate.load(Ordering::SeqCst) {
            return;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(id = core.id, %peer, "accepted peer");
                if stream.set_nonblocking(false).is_err() {
                    error!(id = core.id, "failed to restore blocking mode on accepted socket");
                    return;
                }
                core.run(stream);
                return;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                info!(id = core.id, "re-accept after interrupted system call");
            }
            Err(e) => {
                error!(id = core.id, error = %e, "accept failed");
                core.set_connected(false);
                return;
            }
        }
    }
}

fn connect_and_run(address: &str, port: u16, core: &Core) {
    loop {
        if core.terminate.load(Ordering::SeqCst) {
            return;
        }
        info!(
            id = core.id,
            address,
            port,
            kind = %core.kind,
            "attempting to connect to server"
        );
        match TcpStream::connect((address, port)) {
            Ok(stream) => {
                core.run(stream);
                return;
            }
            Err(e) => {
                debug!(id = core.id, error = %e, "waiting for server");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_barrier_predicate_follows_the_ack() {
        let signal = Arc::new(SyncSignal::new());
        let core = Core {
            id: 0,
            kind: ConnectionKind::Sync,
            is_server: true,
            connected: AtomicBool::new(true),
            terminate: AtomicBool::new(false),
            stream: Mutex::new(None),
            state: Mutex::new(SyncState::default()),
            signal: Arc::clone(&signal),
            callbacks: Callbacks::default(),
        };
        let conn = Connection {
            core: Arc::new(core),
            thread: None,
            local_port: 0,
        };

        // nothing outstanding: both counters at zero
        assert!(conn.is_updated(true));

        // simulate a sent frame without an ack
        lock(&conn.core.state).send_frame = 1;
        assert!(!conn.is_updated(true));
        assert!(conn.is_updated(false));

        // ack arrives
        conn.core.handle_message(Message::Sync {
            frame: 1,
            payload: Vec::new(),
        });
        assert!(conn.is_updated(true));
    }

    #[test]
    fn client_barrier_predicate_uses_the_previous_frame() {
        let signal = Arc::new(SyncSignal::new());
        let core = Core {
            id: 0,
            kind: ConnectionKind::Sync,
            is_server: false,
            connected: AtomicBool::new(true),
            terminate: AtomicBool::new(false),
            stream: Mutex::new(None),
            state: Mutex::new(SyncState::default()),
            signal,
            callbacks: Callbacks::default(),
        };
        let conn = Connection {
            core: Arc::new(core),
            thread: None,
            local_port: 0,
        };

        // nothing received yet: the barrier stays closed
        assert!(!conn.is_updated(true));

        // first server frame arrives: previous becomes 0, matching our
        // not-yet-advanced send counter
        conn.core.handle_message(Message::Sync {
            frame: 1,
            payload: Vec::new(),
        });
        assert!(conn.is_updated(true));

        // after acking frame 1, a second barrier pass needs frame 2
        lock(&conn.core.state).send_frame = 1;
        lock(&conn.core.state).updated = false;
        assert!(!conn.is_updated(true));
        conn.core.handle_message(Message::Sync {
            frame: 2,
            payload: Vec::new(),
        });
        assert!(conn.is_updated(true));
    }

    #[test]
    fn oversized_buffer_request_kills_the_connection() {
        let core = Core {
            id: 3,
            kind: ConnectionKind::Sync,
            is_server: false,
            connected: AtomicBool::new(true),
            terminate: AtomicBool::new(false),
            stream: Mutex::new(None),
            state: Mutex::new(SyncState::default()),
            signal: Arc::new(SyncSignal::new()),
            callbacks: Callbacks::default(),
        };

        assert!(core.handle_message(Message::Size { required: 4096 }));
        assert_eq!(lock(&core.state).recv_buffer_size, 4096);

        // shrinking is ignored
        assert!(core.handle_message(Message::Size { required: 16 }));
        assert_eq!(lock(&core.state).recv_buffer_size, 4096);

        // absurd growth terminates
        assert!(!core.handle_message(Message::Size {
            required: MAX_PAYLOAD_SIZE + 1
        }));
    }
}
