// SPDX-License-Identifier: Apache-2.0
//! Cluster frame synchronization over TCP.
//!
//! One server node and any number of client nodes hold dedicated sync
//! connections (one per client, on the client node's configured port). Each
//! connection owns a background thread doing blocking reads; the render
//! thread's only blocking interaction with this layer is the frame-lock
//! barrier, a condition variable over the shared frame counters.
//!
//! Per frame, the server floods `Sync{frame, blob}` to every client, each
//! client decodes the blob, passes its barrier and answers with an
//! empty-payload `Sync` ack; under firm sync the server's barrier opens only
//! once every client's ack has caught up to the sent frame. Loose sync lets
//! the server present without waiting, trading cross-node tearing for
//! latency.

pub mod connection;
pub mod error;
pub mod manager;
pub mod shared;
mod signal;

pub use connection::{Callbacks, Connection, ConnectionKind, ConnectionStats};
pub use error::NetworkError;
pub use manager::{ClusterCallbacks, ClusterRole, NetworkManager, ServerPeer, SyncOptions};
pub use shared::{decode_callback, SharedDataCodec};
pub use signal::SyncSignal;
