// SPDX-License-Identifier: Apache-2.0
//! Core data model for the Parallax cluster rendering framework.
//!
//! This crate owns the pieces every node needs regardless of how its pixels
//! reach a screen: the off-axis frustum/projection engine, the viewport and
//! user (head pose) model, the non-linear projection state machine that turns
//! six cube faces into fisheye/cylindrical/equirectangular/mirror output, the
//! cluster configuration, and the port traits behind which all GPU work and
//! scene drawing live.

pub mod cluster;
pub mod config;
pub mod correction;
pub mod error;
pub mod frustum;
pub mod projection;
pub mod render;
pub mod settings;
pub mod user;
pub mod viewport;

pub use cluster::{Cluster, Node, Window};
pub use error::{Component, Error};
pub use frustum::{Frustum, FrustumMode, Projection, ProjectionPlane};
pub use render::{RenderData, SceneRenderer};
pub use settings::Settings;
pub use user::User;
pub use viewport::{BaseViewport, Viewport};
