// SPDX-License-Identifier: Apache-2.0
//! Port traits for scene drawing and GPU-side projection resources.
//!
//! The framework never touches a graphics API directly: the application's
//! scene drawing arrives through [`SceneRenderer`], and all texture/FBO/shader
//! work for the non-linear projection path goes through a
//! [`ProjectionBackend`] implementation owned by the render thread.

use glam::Mat4;

use crate::correction::MeshBuffer;
use crate::error::Error;
use crate::frustum::FrustumMode;
use crate::projection::{CompositeShader, CubeFace};

/// Matrices and context handed to the scene callback for one draw pass.
#[derive(Debug, Copy, Clone)]
pub struct RenderData {
    /// View matrix for the pass.
    pub view: Mat4,
    /// Projection matrix for the pass.
    pub projection: Mat4,
    /// `projection * view`.
    pub view_projection: Mat4,
    /// Eye the pass belongs to.
    pub frustum_mode: FrustumMode,
    /// Target resolution in pixels.
    pub resolution: [u32; 2],
    /// Set when the pass renders one cube face of a non-linear projection.
    pub face: Option<CubeFace>,
}

/// Application scene drawing, invoked once per visible viewport or cube face.
pub trait SceneRenderer {
    /// Draw the scene with the given matrices into the currently bound
    /// target.
    fn render(&mut self, data: &RenderData);
}

impl<F: FnMut(&RenderData)> SceneRenderer for F {
    fn render(&mut self, data: &RenderData) {
        self(data);
    }
}

/// Opaque handle to the six per-face offscreen targets of one non-linear
/// projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceTargets {
    /// Backend-assigned identifier.
    pub id: u64,
    /// Side length of each square face target in pixels.
    pub resolution: u32,
    /// MSAA sample count (1 = single-sampled).
    pub samples: u32,
}

/// Opaque handle to a compiled composite program.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompositeProgram(pub u64);

/// Everything a backend needs to run one composite pass.
#[derive(Debug)]
pub struct CompositePass<'a> {
    /// Which face textures the program samples, in face declaration order.
    pub faces: [bool; 6],
    /// Geometry the output is drawn through: one full-screen quad for the
    /// remap methods, four warp meshes for the spherical mirror.
    pub meshes: &'a [MeshBuffer],
}

/// GPU resource port for the non-linear projection path.
///
/// Allocation and compilation failures are fatal: they abort initialization
/// of the owning window with a component-tagged error.
pub trait ProjectionBackend {
    /// Allocate the six square face targets at `resolution`, with `samples`
    /// MSAA samples each.
    fn allocate_face_targets(&mut self, resolution: u32, samples: u32)
        -> Result<FaceTargets, Error>;

    /// Reallocate existing face targets at a new resolution.
    fn resize_face_targets(
        &mut self,
        targets: &mut FaceTargets,
        resolution: u32,
    ) -> Result<(), Error>;

    /// Compile and link the composite program for one projection method.
    fn compile_composite_program(
        &mut self,
        shader: CompositeShader,
    ) -> Result<CompositeProgram, Error>;

    /// Bind one face target for drawing, set its pixel viewport/scissor and
    /// clear it.
    fn bind_face_target(
        &mut self,
        targets: &FaceTargets,
        face: CubeFace,
        viewport: [u32; 4],
        clear_color: [f32; 4],
    );

    /// Resolve a multisampled face into its sampleable texture.
    fn resolve_face_target(&mut self, targets: &FaceTargets, face: CubeFace);

    /// Run the composite pass into the currently bound output target.
    fn composite(
        &mut self,
        targets: &FaceTargets,
        program: &CompositeProgram,
        pass: &CompositePass<'_>,
    );
}

/// A backend that allocates nothing and records call counts.
///
/// Used by the cluster test harness and by unit tests to drive the projection
/// state machine without a GPU.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    /// Face binds performed, in order.
    pub bound_faces: Vec<CubeFace>,
    /// Faces resolved after multisampled draws.
    pub resolved_faces: Vec<CubeFace>,
    /// Composite passes run.
    pub composites: usize,
    /// Programs compiled.
    pub programs: Vec<CompositeShader>,
}

impl HeadlessBackend {
    /// Create a fresh headless backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionBackend for HeadlessBackend {
    fn allocate_face_targets(
        &mut self,
        resolution: u32,
        samples: u32,
    ) -> Result<FaceTargets, Error> {
        self.next_id += 1;
        Ok(FaceTargets {
            id: self.next_id,
            resolution,
            samples,
        })
    }

    fn resize_face_targets(
        &mut self,
        targets: &mut FaceTargets,
        resolution: u32,
    ) -> Result<(), Error> {
        targets.resolution = resolution;
        Ok(())
    }

    fn compile_composite_program(
        &mut self,
        shader: CompositeShader,
    ) -> Result<CompositeProgram, Error> {
        self.programs.push(shader);
        Ok(CompositeProgram(self.programs.len() as u64))
    }

    fn bind_face_target(
        &mut self,
        _targets: &FaceTargets,
        face: CubeFace,
        _viewport: [u32; 4],
        _clear_color: [f32; 4],
    ) {
        self.bound_faces.push(face);
    }

    fn resolve_face_target(&mut self, _targets: &FaceTargets, face: CubeFace) {
        self.resolved_faces.push(face);
    }

    fn composite(
        &mut self,
        _targets: &FaceTargets,
        _program: &CompositeProgram,
        _pass: &CompositePass<'_>,
    ) {
        self.composites += 1;
    }
}
