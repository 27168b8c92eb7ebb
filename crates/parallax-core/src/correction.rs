// SPDX-License-Identifier: Apache-2.0
//! Warp/blend correction-mesh geometry.
//!
//! The file-format parsers (OBJ/SCISS/PFM/MPCDI/DomeProjection/…) live
//! outside this crate; they all funnel into [`MeshBuffer`], which the warp
//! renderer consumes as-is.

use crate::error::{Component, Error};

/// Primitive topology of a mesh buffer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum GeometryType {
    /// Independent triangles.
    #[default]
    Triangles,
    /// Triangle strip.
    TriangleStrip,
    /// Triangle fan.
    TriangleFan,
    /// Line list (calibration overlays).
    Lines,
}

/// One warp-mesh vertex: position and texture coordinate in normalized
/// viewport space, plus a blend color.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MeshVertex {
    /// Position in `[0,1]²` viewport space.
    pub position: [f32; 2],
    /// Source texture coordinate in `[0,1]²`.
    pub tex_coord: [f32; 2],
    /// Blend/edge-feather color.
    pub color: [f32; 4],
}

/// Geometry produced by a correction-data loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBuffer {
    /// Vertex array.
    pub vertices: Vec<MeshVertex>,
    /// Index array into `vertices`.
    pub indices: Vec<u32>,
    /// How the indices are assembled into primitives.
    pub geometry: GeometryType,
}

impl MeshBuffer {
    /// The fixed full-screen quad used when no correction data is configured.
    #[must_use]
    pub fn full_screen_quad() -> Self {
        let corner = |x: f32, y: f32| MeshVertex {
            position: [x, y],
            tex_coord: [x, y],
            color: [1.0, 1.0, 1.0, 1.0],
        };
        Self {
            vertices: vec![
                corner(0.0, 0.0),
                corner(1.0, 0.0),
                corner(1.0, 1.0),
                corner(0.0, 1.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            geometry: GeometryType::Triangles,
        }
    }

    /// Validate index bounds and primitive counts before the buffer reaches
    /// the GPU path.
    pub fn validate(&self) -> Result<(), Error> {
        let vertex_count = self.vertices.len() as u32;
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= vertex_count) {
            return Err(Error::new(
                Component::CorrectionMesh,
                2000,
                format!("index {bad} out of bounds for {vertex_count} vertices"),
            ));
        }
        let ok = match self.geometry {
            GeometryType::Triangles => self.indices.len() % 3 == 0,
            GeometryType::TriangleStrip | GeometryType::TriangleFan => {
                self.indices.is_empty() || self.indices.len() >= 3
            }
            GeometryType::Lines => self.indices.len() % 2 == 0,
        };
        if !ok {
            return Err(Error::new(
                Component::CorrectionMesh,
                2001,
                format!(
                    "index count {} does not form whole {:?} primitives",
                    self.indices.len(),
                    self.geometry
                ),
            ));
        }
        Ok(())
    }
}

/// Correction meshes attached to a viewport: the warp geometry plus an
/// optional blend/black-level mask.
#[derive(Debug, Clone, Default)]
pub struct CorrectionMesh {
    /// Geometry the final image is drawn through.
    pub warp: MeshBuffer,
    /// Optional blend mask drawn on top.
    pub mask: Option<MeshBuffer>,
}

impl CorrectionMesh {
    /// A pass-through mesh (full-screen quad, no mask).
    #[must_use]
    pub fn pass_through() -> Self {
        Self {
            warp: MeshBuffer::full_screen_quad(),
            mask: None,
        }
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_screen_quad_is_valid() {
        MeshBuffer::full_screen_quad().validate().expect("valid quad");
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let mut mesh = MeshBuffer::full_screen_quad();
        mesh.indices.push(99);
        let err = mesh.validate().expect_err("oob index");
        assert_eq!(err.component, Component::CorrectionMesh);
        assert_eq!(err.code, 2000);
    }

    #[test]
    fn partial_triangle_is_rejected() {
        let mut mesh = MeshBuffer::full_screen_quad();
        mesh.indices.push(0);
        let err = mesh.validate().expect_err("partial tri");
        assert_eq!(err.code, 2001);
    }
}
