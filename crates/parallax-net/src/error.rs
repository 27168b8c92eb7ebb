// SPDX-License-Identifier: Apache-2.0
//! Network-component errors with stable numeric codes.

use std::time::Duration;

use parallax_proto::ProtocolError;
use thiserror::Error;

/// Which side of the barrier a node was waiting on when it gave up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitingFor {
    /// A client waiting for the server's frame broadcast.
    Master,
    /// The server waiting for client acknowledgements.
    Clients,
}

impl WaitingFor {
    /// Numeric error code for the matching timeout.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            WaitingFor::Master => 3004,
            WaitingFor::Clients => 3005,
        }
    }
}

impl std::fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitingFor::Master => f.write_str("master"),
            WaitingFor::Clients => f.write_str("clients"),
        }
    }
}

/// Fatal network errors. Codes follow the `[Network] error NNNN` convention
/// so one log line identifies the subsystem and the failure.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Listening socket could not be created.
    #[error("[Network] error 5002: failed to bind port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying socket error.
        source: std::io::Error,
    },
    /// Outgoing connection failed permanently (shutdown during retry).
    #[error("[Network] error 5004: failed to connect to {address}:{port}: {source}")]
    Connect {
        /// Server address.
        address: String,
        /// Server port.
        port: u16,
        /// Underlying socket error.
        source: std::io::Error,
    },
    /// Send on an established connection failed.
    #[error("[Network] error 5014: send on connection {id} failed: {source}")]
    Send {
        /// Connection id.
        id: usize,
        /// Underlying socket error.
        source: std::io::Error,
    },
    /// Receive loop died on a connection-fatal protocol error.
    #[error("[Network] error 5013: receive on connection {id} failed: {source}")]
    Receive {
        /// Connection id.
        id: usize,
        /// Protocol-level cause.
        source: ProtocolError,
    },
    /// A buffer renegotiation asked for more than the configured maximum.
    #[error(
        "[Network] error 5016: buffer size request {requested} on connection {id} \
         exceeds maximum {max}"
    )]
    BufferSizeAbuse {
        /// Connection id.
        id: usize,
        /// Requested buffer size.
        requested: u32,
        /// Configured ceiling.
        max: u32,
    },
    /// Operation requires a connected peer.
    #[error("[Network] error 5017: connection {id} is not connected")]
    NotConnected {
        /// Connection id.
        id: usize,
    },
    /// The frame-lock barrier watchdog expired.
    #[error(
        "[Network] error {}: no sync signal from {waiting_for} for {elapsed:.1?}",
        .waiting_for.code()
    )]
    SyncTimeout {
        /// Which side went silent.
        waiting_for: WaitingFor,
        /// How long the node waited.
        elapsed: Duration,
    },
    /// Cluster start-up did not complete in time.
    #[error("[Network] error 5018: cluster connections did not come up within {elapsed:.1?}")]
    ConnectTimeout {
        /// How long the node waited.
        elapsed: Duration,
    },
}
