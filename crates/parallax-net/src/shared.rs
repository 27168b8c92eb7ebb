// SPDX-License-Identifier: Apache-2.0
//! The application's shared-data encode/decode pair.

use std::sync::{Arc, Mutex};

use crate::connection::DecodeFn;
use crate::signal::lock;

/// Serialization seam between the application and the sync layer.
///
/// The server calls `encode` exactly once per frame; every client's receive
/// path calls `decode` exactly once per received frame. What `encode` writes,
/// `decode` must read back in the same order and types — the sync layer
/// treats the blob as opaque bytes and never inspects it.
pub trait SharedDataCodec: Send {
    /// Serialize this frame's shared state.
    fn encode(&mut self) -> Vec<u8>;

    /// Apply a received frame's shared state.
    fn decode(&mut self, bytes: &[u8]);
}

/// Adapt a codec into the receive-thread decode callback shape.
///
/// The codec is shared because the render thread keeps using it for `encode`
/// and for reading the applied state.
pub fn decode_callback<C: SharedDataCodec + 'static>(codec: Arc<Mutex<C>>) -> DecodeFn {
    Box::new(move |bytes: &[u8]| lock(&codec).decode(bytes))
}
