use crate::config::Primitive;
use crate::error::Result;
use crate::gl::GlContext;
use crate::layer::flags::RenderPass;
use crate::renderer::buffer::{DrawCall, LayerBuffers, SubGeometry};
use crate::renderer::camera::Camera;
use crate::renderer::renderer_cache::RendererKey;
use crate::renderer::shader::{Program, TextureSlot};
use crate::renderer::techniques::{
    common, CameraSource, GeometryDescriptor, ProgramContext, SubGeometryPolicy, Technique,
    TechniqueDescriptor,
};
use crate::scene::{FrameContext, SceneRenderState, SnapMode};
use glam::{DMat3, DMat4, DVec3, Mat3, Mat4, Vec3};
use log::{debug, error};

/// Per-layer inputs of a draw
#[derive(Clone, Debug, PartialEq)]
pub struct LayerDrawInfo {
    pub origin: DVec3,
    pub model_matrix: DMat4,
    pub positions_decode_matrix: Mat4,
    pub uv_decode_matrix: Mat3,
    pub texture_set: Option<usize>,
}

/// Everything uniform providers read during one draw
pub struct DrawState<'a, G: GlContext> {
    pub scene: &'a SceneRenderState<G>,
    pub camera: &'a Camera,
    pub frame: &'a FrameContext,
    pub layer: &'a LayerDrawInfo,
    pub render_pass: RenderPass,
    /// Layer origin in world space
    pub rtc_center: DVec3,
    pub view_matrix: Mat4,
    pub proj_matrix: Mat4,
    pub world_matrix: Mat4,
    pub world_normal_matrix: Mat4,
    pub view_normal_matrix: Mat4,
    pub z_near: f32,
    pub z_far: f32,
}

impl<'a, G: GlContext> DrawState<'a, G> {
    pub fn texture(&self, slot: TextureSlot) -> Option<&'a G::Texture> {
        self.scene.texture(slot, self.layer.texture_set)
    }

    /// World position relative to the layer's RTC center, in f32
    pub fn rtc_relative(&self, world: DVec3) -> Vec3 {
        (world - self.rtc_center).as_vec3()
    }
}

/// View matrix re-based onto `rtc_center`, so positions relative to it stay
/// small before they reach f32
pub fn rtc_view_matrix(view: &DMat4, rtc_center: DVec3) -> Mat4 {
    (*view * DMat4::from_translation(rtc_center)).as_mat4()
}

/// One compiled technique for one geometry shape
pub struct LayerRenderer<G: GlContext> {
    id: u64,
    technique: Technique,
    primitive: Primitive,
    descriptor: TechniqueDescriptor,
    /// `None` when the build failed; draws are then skipped
    program: Option<Program<G>>,
    section_planes: usize,
    points_hash: Option<String>,
    technique_hash: String,
}

impl<G: GlContext> LayerRenderer<G> {
    pub fn new(
        gl: &G,
        id: u64,
        scene: &SceneRenderState<G>,
        key: &RendererKey,
        technique: Technique,
    ) -> LayerRenderer<G> {
        let config = &scene.config;
        let mut ctx = ProgramContext::new(GeometryDescriptor::from_key(key), config);
        let descriptor = technique.setup(&mut ctx);
        common::assemble(&mut ctx, &descriptor);

        let name = format!(
            "{}[{:?}/{:?}]",
            descriptor.program_name, key.layer_type, key.primitive
        );
        let program = match Program::build(gl, &name, ctx.vars) {
            Ok(program) => {
                debug!(target: "program", "built {} as renderer {}", name, id);
                Some(program)
            }
            Err(e) => {
                error!(target: "program", "{}; technique disabled", e);
                None
            }
        };

        LayerRenderer {
            id,
            technique,
            primitive: key.primitive,
            descriptor,
            program,
            section_planes: config.section_plane_count(),
            points_hash: Self::points_hash(key.primitive, scene),
            technique_hash: technique.hash(config),
        }
    }

    fn points_hash(primitive: Primitive, scene: &SceneRenderState<G>) -> Option<String> {
        (primitive == Primitive::Points).then(|| scene.config.points_material.hash())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    /// True when the program failed to build and draws do nothing
    pub fn is_noop(&self) -> bool {
        self.program.is_none()
    }

    pub fn program(&self) -> Option<&Program<G>> {
        self.program.as_ref()
    }

    /// False once the scene changed something compiled into the program
    pub fn is_valid(&self, scene: &SceneRenderState<G>) -> bool {
        self.section_planes == scene.config.section_plane_count()
            && self.points_hash == Self::points_hash(self.primitive, scene)
            && self.technique_hash == self.technique.hash(&scene.config)
    }

    fn sub_geometry(&self, frame: &FrameContext) -> SubGeometry {
        match self.descriptor.sub_geometry {
            SubGeometryPolicy::Surface => SubGeometry::Surface,
            SubGeometryPolicy::Edges => SubGeometry::Edges,
            SubGeometryPolicy::Vertices => SubGeometry::Vertices,
            SubGeometryPolicy::Snap { init: true } => SubGeometry::Surface,
            SubGeometryPolicy::Snap { init: false } => {
                if self.primitive == Primitive::Points {
                    return SubGeometry::Vertices;
                }
                match frame.snap_mode {
                    SnapMode::Vertex => SubGeometry::Vertices,
                    SnapMode::Edge => SubGeometry::Edges,
                }
            }
        }
    }

    /// Bind the program, push uniforms for this layer and issue its draw
    pub fn draw_layer(
        &self,
        gl: &G,
        scene: &SceneRenderState<G>,
        camera: &Camera,
        frame: &mut FrameContext,
        buffers: &mut LayerBuffers<G>,
        info: &LayerDrawInfo,
        render_pass: RenderPass,
    ) -> Result<()> {
        let Some(program) = &self.program else {
            return Ok(());
        };

        if frame.last_program_id != Some(self.id) {
            gl.use_program(Some(&program.handle));
            frame.last_program_id = Some(self.id);
            frame.use_program += 1;
        }

        let (view, proj, z_near, z_far) = match self.descriptor.camera {
            CameraSource::Main => (camera.view_matrix, camera.proj_matrix, camera.near, camera.far),
            CameraSource::Pick => (
                frame.pick_view_matrix.unwrap_or(camera.view_matrix),
                frame.pick_proj_matrix.unwrap_or(camera.proj_matrix),
                frame.pick_z_near as f64,
                frame.pick_z_far as f64,
            ),
            CameraSource::Shadow => (
                frame.shadow_view_matrix.unwrap_or(camera.view_matrix),
                frame.shadow_proj_matrix.unwrap_or(camera.proj_matrix),
                camera.near,
                camera.far,
            ),
        };

        let rtc_center = info.model_matrix.transform_point3(info.origin);
        let view_matrix = rtc_view_matrix(&view, rtc_center);
        let world_matrix = DMat4::from_mat3(DMat3::from_mat4(info.model_matrix)).as_mat4();
        let sub = self.sub_geometry(frame);

        let mut texture_unit = frame.texture_unit;
        {
            let state = DrawState {
                scene,
                camera,
                frame: &*frame,
                layer: info,
                render_pass,
                rtc_center,
                view_matrix,
                proj_matrix: proj.as_mat4(),
                world_matrix,
                world_normal_matrix: world_matrix.inverse().transpose(),
                view_normal_matrix: view_matrix.inverse().transpose(),
                z_near: z_near as f32,
                z_far: z_far as f32,
            };
            program.bind_inputs(gl, &state, &mut texture_unit);
        }
        frame.texture_unit = texture_unit;

        buffers.bind_vertex_array(gl, &program.attributes)?;
        frame.bind_array += 1;

        match buffers.draw(gl, sub) {
            Some(call) if self.descriptor.increment_draw_state => match call {
                DrawCall::Elements => frame.draw_elements += 1,
                DrawCall::Arrays => frame.draw_arrays += 1,
            },
            _ => {}
        }
        Ok(())
    }

    pub fn destroy(&self, gl: &G) {
        if let Some(program) = &self.program {
            program.destroy(gl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LayerType, SceneConfig};
    use crate::gl::recording::RecordingContext;

    fn key() -> RendererKey {
        RendererKey {
            layer_type: LayerType::Batching,
            primitive: Primitive::Solid,
            sao: false,
            pbr: false,
            color_texture: false,
            has_normals: true,
        }
    }

    #[test]
    fn test_rtc_view_matrix_matches_double_precision() {
        let view = DMat4::look_at_rh(
            DVec3::new(1.0e6 + 5.0, 2.0e6, 10.0),
            DVec3::new(1.0e6, 2.0e6, 0.0),
            DVec3::Y,
        );
        let rtc_center = DVec3::new(1.0e6, 2.0e6, 0.0);
        let rtc_view = rtc_view_matrix(&view, rtc_center);

        let local = glam::Vec3::new(0.25, -0.5, 1.0);
        let expected = view.transform_point3(rtc_center + local.as_dvec3());
        let actual = rtc_view.transform_point3(local).as_dvec3();
        assert!((expected - actual).length() < 1e-4);
    }

    #[test]
    fn test_failed_build_degrades_to_noop() {
        let gl = RecordingContext::new();
        *gl.fail_compile_containing.borrow_mut() = Some("outColor".to_string());
        let scene = SceneRenderState::new(SceneConfig::default());
        let renderer = LayerRenderer::new(&gl, 1, &scene, &key(), Technique::Silhouette);
        assert!(renderer.is_noop());

        let mut frame = FrameContext::default();
        let mut buffers = LayerBuffers::new(crate::gl::TRIANGLES);
        let info = LayerDrawInfo {
            origin: DVec3::ZERO,
            model_matrix: DMat4::IDENTITY,
            positions_decode_matrix: Mat4::IDENTITY,
            uv_decode_matrix: Mat3::IDENTITY,
            texture_set: None,
        };
        renderer
            .draw_layer(
                &gl,
                &scene,
                &Camera::new(),
                &mut frame,
                &mut buffers,
                &info,
                RenderPass::SilhouetteSelected,
            )
            .unwrap();
        assert_eq!(gl.draw_count(), 0);
        assert_eq!(frame.use_program, 0);
    }

    #[test]
    fn test_validity_tracks_section_planes_and_points_material() {
        let gl = RecordingContext::new();
        let mut scene = SceneRenderState::new(SceneConfig::default());
        let points_key = RendererKey {
            primitive: Primitive::Points,
            has_normals: false,
            ..key()
        };
        let renderer = LayerRenderer::new(&gl, 1, &scene, &points_key, Technique::PickMesh);
        assert!(renderer.is_valid(&scene));

        // Point size is a uniform, round points is compiled in
        scene.config.points_material.point_size = 7.0;
        assert!(renderer.is_valid(&scene));
        scene.config.points_material.round_points = !scene.config.points_material.round_points;
        assert!(!renderer.is_valid(&scene));

        let renderer = LayerRenderer::new(&gl, 2, &scene, &points_key, Technique::PickMesh);
        scene.config.section_planes.push(Default::default());
        assert!(!renderer.is_valid(&scene));
    }
}
