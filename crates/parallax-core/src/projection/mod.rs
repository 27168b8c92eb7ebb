// SPDX-License-Identifier: Apache-2.0
//! Non-linear output projections assembled from six cube faces.
//!
//! Every variant works the same way: render the scene into up to six 90°
//! cube-face targets, then run one kind-specific composite pass that remaps
//! or warps the faces into the final image. The variant set is closed, so the
//! kinds are a tagged enum dispatched with `match` rather than a trait-object
//! hierarchy; the per-face render loop stays free of virtual calls.

use glam::{Mat4, Vec3, Vec2};

use crate::correction::MeshBuffer;
use crate::error::Error;
use crate::frustum::FrustumMode;
use crate::render::{
    CompositePass, CompositeProgram, FaceTargets, ProjectionBackend, RenderData, SceneRenderer,
};
use crate::user::User;
use crate::viewport::BaseViewport;

pub mod cubemap;
pub mod cylindrical;
pub mod equirectangular;
pub mod fisheye;
pub mod spherical_mirror;
pub mod spout;

pub use cubemap::CubemapConfig;
pub use cylindrical::CylindricalConfig;
pub use equirectangular::EquirectangularConfig;
pub use fisheye::FisheyeConfig;
pub use spherical_mirror::SphericalMirrorConfig;
pub use spout::SpoutConfig;

/// Default side length of the cube-face targets in pixels.
pub const DEFAULT_CUBEMAP_RESOLUTION: u32 = 512;

/// One face of the render cube, in declaration (render) order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CubeFace {
    /// +X.
    Right,
    /// -X.
    Left,
    /// +Y (looking down).
    Bottom,
    /// -Y (looking up).
    Top,
    /// +Z.
    Front,
    /// -Z.
    Back,
}

impl CubeFace {
    /// All faces in render order.
    pub const ALL: [CubeFace; 6] = [
        CubeFace::Right,
        CubeFace::Left,
        CubeFace::Bottom,
        CubeFace::Top,
        CubeFace::Front,
        CubeFace::Back,
    ];

    /// Storage index for per-face arrays.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            CubeFace::Right => 0,
            CubeFace::Left => 1,
            CubeFace::Bottom => 2,
            CubeFace::Top => 3,
            CubeFace::Front => 4,
            CubeFace::Back => 5,
        }
    }
}

/// Composite program selector, one per projection method.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompositeShader {
    /// Angular fisheye remap.
    FisheyeRemap,
    /// Straight per-face passthrough into a cubemap layout.
    CubemapPassthrough,
    /// Cylindrical panorama remap.
    CylindricalRemap,
    /// Equirectangular (lat/long) remap.
    EquirectangularRemap,
    /// Four-mesh warp for a first-surface spherical mirror.
    SphericalMirrorWarp,
    /// Passthrough variant feeding a texture-sharing sink.
    SpoutPassthrough,
}

/// Projection method with its configuration.
#[derive(Debug, Clone)]
pub enum ProjectionKind {
    /// Angular fisheye / dome master.
    Fisheye(FisheyeConfig),
    /// Plain cubemap output.
    Cubemap(CubemapConfig),
    /// Cylindrical panorama.
    Cylindrical(CylindricalConfig),
    /// Equirectangular panorama.
    Equirectangular(EquirectangularConfig),
    /// Spherical-mirror (mirror-dome) projection.
    SphericalMirror(SphericalMirrorConfig),
    /// Cubemap faces exported through a texture-sharing sink.
    SpoutOutput(SpoutConfig),
}

impl ProjectionKind {
    fn composite_shader(&self) -> CompositeShader {
        match self {
            ProjectionKind::Fisheye(_) => CompositeShader::FisheyeRemap,
            ProjectionKind::Cubemap(_) => CompositeShader::CubemapPassthrough,
            ProjectionKind::Cylindrical(_) => CompositeShader::CylindricalRemap,
            ProjectionKind::Equirectangular(_) => CompositeShader::EquirectangularRemap,
            ProjectionKind::SphericalMirror(_) => CompositeShader::SphericalMirrorWarp,
            ProjectionKind::SpoutOutput(_) => CompositeShader::SpoutPassthrough,
        }
    }
}

/// Initialization stages, in the only legal order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitStage {
    /// Nothing allocated yet.
    Uninitialized,
    /// Face targets exist; viewports may now reference them.
    TexturesAllocated,
    /// Face viewports/planes are set up.
    ViewportsInitialized,
    /// Composite program compiled and linked.
    ShadersInitialized,
    /// Fully usable; `update`/`render_cubemap`/`render` are legal.
    Ready,
}

/// State machine driving one non-linear projection.
#[derive(Debug)]
pub struct NonLinearProjection {
    kind: ProjectionKind,
    stage: InitStage,
    faces: [BaseViewport; 6],
    cubemap_resolution: u32,
    samples: u32,
    clear_color: [f32; 4],
    targets: Option<FaceTargets>,
    program: Option<CompositeProgram>,
    composite_meshes: Vec<MeshBuffer>,
    output_size: [u32; 2],
}

impl NonLinearProjection {
    /// Create an uninitialized projection of the given kind.
    #[must_use]
    pub fn new(kind: ProjectionKind) -> Self {
        Self {
            kind,
            stage: InitStage::Uninitialized,
            faces: Default::default(),
            cubemap_resolution: DEFAULT_CUBEMAP_RESOLUTION,
            samples: 1,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            targets: None,
            program: None,
            composite_meshes: Vec::new(),
            output_size: [0, 0],
        }
    }

    /// Set the face target side length. Takes effect at initialization or the
    /// next `update`.
    pub fn set_cubemap_resolution(&mut self, resolution: u32) {
        self.cubemap_resolution = resolution;
    }

    /// Set the MSAA sample count for the face targets. Must be called before
    /// initialization.
    pub fn set_samples(&mut self, samples: u32) {
        assert_eq!(
            self.stage,
            InitStage::Uninitialized,
            "sample count is fixed at initialization"
        );
        self.samples = samples.max(1);
    }

    /// Set the clear color applied to each face before its draw.
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    /// Current stage of the state machine.
    #[must_use]
    pub fn stage(&self) -> InitStage {
        self.stage
    }

    /// The projection method.
    #[must_use]
    pub fn kind(&self) -> &ProjectionKind {
        &self.kind
    }

    /// Configured face target side length in pixels.
    #[must_use]
    pub fn cubemap_resolution(&self) -> u32 {
        self.cubemap_resolution
    }

    /// One face sub-viewport.
    #[must_use]
    pub fn face(&self, face: CubeFace) -> &BaseViewport {
        &self.faces[face.index()]
    }

    /// Mutable access to one face sub-viewport.
    pub fn face_mut(&mut self, face: CubeFace) -> &mut BaseViewport {
        &mut self.faces[face.index()]
    }

    /// Run the fixed init sequence: allocate face targets, set up the face
    /// viewports, compile the composite program.
    ///
    /// Target allocation must precede viewport setup (the viewports reference
    /// the targets) and the composite program loads last so it can query
    /// resources bound by the earlier stages. Allocation or compile failure
    /// aborts initialization of the owning window.
    pub fn initialize<B: ProjectionBackend>(&mut self, backend: &mut B) -> Result<(), Error> {
        assert_eq!(
            self.stage,
            InitStage::Uninitialized,
            "non-linear projection initialized twice"
        );

        let targets = backend.allocate_face_targets(self.cubemap_resolution, self.samples)?;
        self.targets = Some(targets);
        self.stage = InitStage::TexturesAllocated;

        self.init_viewports();
        self.stage = InitStage::ViewportsInitialized;

        let program = backend.compile_composite_program(self.kind.composite_shader())?;
        self.program = Some(program);
        self.stage = InitStage::ShadersInitialized;

        self.composite_meshes = match &self.kind {
            ProjectionKind::SphericalMirror(cfg) => cfg.warp_meshes(),
            _ => vec![MeshBuffer::full_screen_quad()],
        };
        self.stage = InitStage::Ready;
        Ok(())
    }

    /// Recompute the frustums of all enabled faces for `mode`.
    pub fn update_frustums(&mut self, mode: FrustumMode, user: &User, near: f32, far: f32) {
        for vp in &mut self.faces {
            if vp.is_enabled() {
                vp.calculate_non_linear_frustum(mode, user, near, far);
            }
        }
    }

    /// React to an output size change: reallocate the face targets if the
    /// configured cubemap resolution no longer matches the allocation. The
    /// face side length never follows the output aspect.
    pub fn update<B: ProjectionBackend>(
        &mut self,
        backend: &mut B,
        new_size: [u32; 2],
    ) -> Result<(), Error> {
        assert_eq!(self.stage, InitStage::Ready, "update before initialization");

        if self.output_size != new_size {
            self.output_size = new_size;
            let targets = self
                .targets
                .as_mut()
                .expect("targets exist in Ready stage");
            if targets.resolution != self.cubemap_resolution {
                tracing::debug!(
                    old = targets.resolution,
                    new = self.cubemap_resolution,
                    "resizing cube face targets"
                );
                backend.resize_face_targets(targets, self.cubemap_resolution)?;
            }
        }
        Ok(())
    }

    /// Render the scene once into every enabled cube face, in declaration
    /// order. Disabled faces are skipped entirely; whatever their textures
    /// last held is accepted.
    pub fn render_cubemap<B: ProjectionBackend>(
        &mut self,
        backend: &mut B,
        scene: &mut dyn SceneRenderer,
        mode: FrustumMode,
    ) {
        assert_eq!(
            self.stage,
            InitStage::Ready,
            "render_cubemap before initialization"
        );
        let targets = self.targets.as_ref().expect("targets exist in Ready stage");
        let resolution = targets.resolution as f32;

        for face in CubeFace::ALL {
            let vp = &self.faces[face.index()];
            if !vp.is_enabled() {
                continue;
            }

            let viewport_px = [
                (vp.position().x * resolution + 0.5).floor() as u32,
                (vp.position().y * resolution + 0.5).floor() as u32,
                (vp.size().x * resolution + 0.5).floor() as u32,
                (vp.size().y * resolution + 0.5).floor() as u32,
            ];
            backend.bind_face_target(targets, face, viewport_px, self.clear_color);

            let projection = vp.projection(mode);
            scene.render(&RenderData {
                view: projection.view_matrix(),
                projection: projection.projection_matrix(),
                view_projection: projection.view_projection_matrix(),
                frustum_mode: mode,
                resolution: [targets.resolution, targets.resolution],
                face: Some(face),
            });

            if targets.samples > 1 {
                backend.resolve_face_target(targets, face);
            }
        }
    }

    /// Run the kind-specific composite pass into the currently bound output
    /// target.
    pub fn render<B: ProjectionBackend>(&mut self, backend: &mut B) {
        assert_eq!(self.stage, InitStage::Ready, "render before initialization");
        let targets = self.targets.as_ref().expect("targets exist in Ready stage");
        let program = self.program.as_ref().expect("program exists in Ready stage");

        let mut enabled = [false; 6];
        for face in CubeFace::ALL {
            enabled[face.index()] = self.faces[face.index()].is_enabled();
        }

        backend.composite(
            targets,
            program,
            &CompositePass {
                faces: enabled,
                meshes: &self.composite_meshes,
            },
        );
    }

    fn init_viewports(&mut self) {
        match &self.kind {
            ProjectionKind::Fisheye(cfg) => fisheye::init_viewports(&mut self.faces, cfg),
            ProjectionKind::Cubemap(cfg) => cubemap::init_viewports(&mut self.faces, cfg),
            ProjectionKind::Cylindrical(cfg) => cylindrical::init_viewports(&mut self.faces, cfg),
            ProjectionKind::Equirectangular(cfg) => {
                equirectangular::init_viewports(&mut self.faces, cfg);
            }
            ProjectionKind::SphericalMirror(cfg) => {
                spherical_mirror::init_viewports(&mut self.faces, cfg);
            }
            ProjectionKind::SpoutOutput(cfg) => spout::init_viewports(&mut self.faces, cfg),
        }
    }
}

/// `glm::rotate`-style helper: post-multiply `m` with a rotation of `degrees`
/// about `axis`.
pub(crate) fn rotate(m: Mat4, degrees: f32, axis: Vec3) -> Mat4 {
    m * Mat4::from_axis_angle(axis, degrees.to_radians())
}

/// Set a face viewport's plane to the rotated copy of three base corners.
pub(crate) fn set_face_plane(
    vp: &mut BaseViewport,
    rot: Mat4,
    lower_left: Vec3,
    upper_left: Vec3,
    upper_right: Vec3,
) {
    vp.projection_plane_mut().set_coordinates(
        rot.transform_point3(lower_left),
        rot.transform_point3(upper_left),
        rot.transform_point3(upper_right),
    );
}

/// Reset a face to the full target area and enabled state before a kind
/// applies its own crops.
pub(crate) fn reset_faces(faces: &mut [BaseViewport; 6]) {
    for vp in faces.iter_mut() {
        vp.set_enabled(true);
        vp.set_position(Vec2::ZERO);
        vp.set_size(Vec2::ONE);
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessBackend;
    use approx::assert_relative_eq;

    fn ready_projection(kind: ProjectionKind, backend: &mut HeadlessBackend) -> NonLinearProjection {
        let mut projection = NonLinearProjection::new(kind);
        projection.initialize(backend).expect("init");
        projection
    }

    #[test]
    fn init_walks_the_fixed_stage_order() {
        let mut projection =
            NonLinearProjection::new(ProjectionKind::Cubemap(CubemapConfig::default()));
        assert_eq!(projection.stage(), InitStage::Uninitialized);

        let mut backend = HeadlessBackend::new();
        projection.initialize(&mut backend).expect("init");
        assert_eq!(projection.stage(), InitStage::Ready);
        assert_eq!(backend.programs, vec![CompositeShader::CubemapPassthrough]);
    }

    #[test]
    #[should_panic(expected = "render_cubemap before initialization")]
    fn render_before_ready_is_a_programmer_error() {
        let mut projection =
            NonLinearProjection::new(ProjectionKind::Cubemap(CubemapConfig::default()));
        let mut backend = HeadlessBackend::new();
        let mut scene = |_: &RenderData| {};
        projection.render_cubemap(&mut backend, &mut scene, FrustumMode::Mono);
    }

    #[test]
    fn cubemap_invokes_scene_exactly_six_times_with_90_degree_faces() {
        let mut backend = HeadlessBackend::new();
        let mut projection =
            ready_projection(ProjectionKind::Cubemap(CubemapConfig::default()), &mut backend);

        let user = User::new("u");
        projection.update_frustums(FrustumMode::Mono, &user, 0.1, 100.0);

        let mut calls: Vec<RenderData> = Vec::new();
        let mut scene = |data: &RenderData| calls.push(*data);
        projection.render_cubemap(&mut backend, &mut scene, FrustumMode::Mono);

        assert_eq!(calls.len(), 6);
        assert_eq!(backend.bound_faces.len(), 6);
        assert_eq!(backend.bound_faces, CubeFace::ALL.to_vec());

        // every face frustum spans exactly 90° in both axes
        for face in CubeFace::ALL {
            let f = projection.face(face).projection(FrustumMode::Mono).frustum();
            let h = ((f.right / f.near).atan() - (f.left / f.near).atan()).to_degrees();
            let v = ((f.top / f.near).atan() - (f.bottom / f.near).atan()).to_degrees();
            assert_relative_eq!(h, 90.0, epsilon = 1e-3);
            assert_relative_eq!(v, 90.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn disabled_faces_are_skipped() {
        let mut backend = HeadlessBackend::new();
        let mut projection =
            ready_projection(ProjectionKind::Cubemap(CubemapConfig::default()), &mut backend);
        projection.face_mut(CubeFace::Back).set_enabled(false);

        let user = User::new("u");
        projection.update_frustums(FrustumMode::Mono, &user, 0.1, 100.0);

        let mut count = 0usize;
        let mut scene = |_: &RenderData| count += 1;
        projection.render_cubemap(&mut backend, &mut scene, FrustumMode::Mono);
        assert_eq!(count, 5);
        assert!(!backend.bound_faces.contains(&CubeFace::Back));
    }

    #[test]
    fn msaa_faces_are_resolved_after_drawing() {
        let mut backend = HeadlessBackend::new();
        let mut projection =
            NonLinearProjection::new(ProjectionKind::Cubemap(CubemapConfig::default()));
        projection.set_samples(4);
        projection.initialize(&mut backend).expect("init");

        let user = User::new("u");
        projection.update_frustums(FrustumMode::Mono, &user, 0.1, 100.0);
        let mut scene = |_: &RenderData| {};
        projection.render_cubemap(&mut backend, &mut scene, FrustumMode::Mono);

        assert_eq!(backend.resolved_faces.len(), 6);
    }

    #[test]
    fn update_resizes_only_on_resolution_change() {
        let mut backend = HeadlessBackend::new();
        let mut projection =
            ready_projection(ProjectionKind::Cubemap(CubemapConfig::default()), &mut backend);

        projection.update(&mut backend, [1920, 1080]).expect("update");
        projection.update(&mut backend, [1920, 1080]).expect("update");

        projection.set_cubemap_resolution(1024);
        projection.update(&mut backend, [2560, 1440]).expect("update");

        let targets = projection.targets.as_ref().expect("targets");
        assert_eq!(targets.resolution, 1024);
    }

    #[test]
    fn fisheye_180_disables_back_and_left_faces_only_when_four_face() {
        let mut backend = HeadlessBackend::new();
        let projection = ready_projection(
            ProjectionKind::Fisheye(FisheyeConfig::default()),
            &mut backend,
        );

        // 180° dome: the four-face method leaves left and back unused
        assert!(!projection.face(CubeFace::Left).is_enabled());
        assert!(!projection.face(CubeFace::Back).is_enabled());
        assert!(projection.face(CubeFace::Front).is_enabled());
    }

    #[test]
    fn spherical_mirror_composites_through_four_meshes() {
        let mut backend = HeadlessBackend::new();
        let mut projection = ready_projection(
            ProjectionKind::SphericalMirror(SphericalMirrorConfig::default()),
            &mut backend,
        );
        assert_eq!(projection.composite_meshes.len(), 4);

        projection.render(&mut backend);
        assert_eq!(backend.composites, 1);
    }
}
