//! Scene-wide render state shared by every layer, the per-frame context
//! threaded through draws, and the scene that owns the renderer cache.

use crate::config::{SceneConfig, TextureSetRef};
use crate::error::{RenderError, Result};
use crate::gl::GlContext;
use crate::renderer::render_target::{self, AttachmentFormat, RenderTarget};
use crate::renderer::renderer_cache::RendererCache;
use crate::renderer::shader::TextureSlot;
use glam::{DMat4, DVec3, Vec3};
use log::debug;

/// Textures of one material texture set
pub struct TextureSet<G: GlContext> {
    pub color: Option<G::Texture>,
    pub metallic_roughness: Option<G::Texture>,
    pub emissive: Option<G::Texture>,
    pub occlusion: Option<G::Texture>,
}

impl<G: GlContext> Default for TextureSet<G> {
    fn default() -> Self {
        TextureSet {
            color: None,
            metallic_roughness: None,
            emissive: None,
            occlusion: None,
        }
    }
}

/// Configuration plus GPU-side resources the renderers read from
pub struct SceneRenderState<G: GlContext> {
    pub config: SceneConfig,
    pub texture_sets: Vec<TextureSet<G>>,
    /// Output of the SAO pass, sampled by SAO-enabled color programs
    pub occlusion_texture: Option<G::Texture>,
    pub light_map: Option<G::Texture>,
    pub reflection_map: Option<G::Texture>,
}

impl<G: GlContext> SceneRenderState<G> {
    pub fn new(config: SceneConfig) -> SceneRenderState<G> {
        SceneRenderState {
            config,
            texture_sets: Vec::new(),
            occlusion_texture: None,
            light_map: None,
            reflection_map: None,
        }
    }

    /// Which maps texture set `index` carries; layers built against it pick
    /// their programs from this
    pub fn texture_set_ref(&self, index: usize) -> Option<TextureSetRef> {
        let set = self.texture_sets.get(index)?;
        Some(TextureSetRef {
            index,
            has_color: set.color.is_some(),
            has_metallic_roughness: set.metallic_roughness.is_some(),
            has_emissive: set.emissive.is_some(),
            has_occlusion: set.occlusion.is_some(),
        })
    }

    fn slot_mut(&mut self, slot: TextureSlot, texture_set: Option<usize>) -> Option<&mut Option<G::Texture>> {
        match slot {
            TextureSlot::SaoOcclusion => return Some(&mut self.occlusion_texture),
            TextureSlot::LightMap => return Some(&mut self.light_map),
            TextureSlot::ReflectionMap => return Some(&mut self.reflection_map),
            _ => {}
        }
        let index = texture_set?;
        if index >= self.texture_sets.len() {
            self.texture_sets.resize_with(index + 1, TextureSet::default);
        }
        let set = &mut self.texture_sets[index];
        match slot {
            TextureSlot::Color => Some(&mut set.color),
            TextureSlot::MetallicRoughness => Some(&mut set.metallic_roughness),
            TextureSlot::Emissive => Some(&mut set.emissive),
            TextureSlot::Occlusion => Some(&mut set.occlusion),
            _ => None,
        }
    }

    /// Store `texture` in a slot, releasing whatever it held
    fn replace_texture(
        &mut self,
        gl: &G,
        slot: TextureSlot,
        texture_set: Option<usize>,
        texture: G::Texture,
    ) -> Result<()> {
        let Some(entry) = self.slot_mut(slot, texture_set) else {
            gl.delete_texture(&texture);
            return Err(RenderError::InvalidConfig(format!(
                "{:?} needs a texture set",
                slot
            )));
        };
        if let Some(old) = entry.replace(texture) {
            gl.delete_texture(&old);
        }
        Ok(())
    }

    fn destroy_textures(&mut self, gl: &G) {
        for set in self.texture_sets.drain(..) {
            for texture in [set.color, set.metallic_roughness, set.emissive, set.occlusion]
                .into_iter()
                .flatten()
            {
                gl.delete_texture(&texture);
            }
        }
        for texture in [
            self.occlusion_texture.take(),
            self.light_map.take(),
            self.reflection_map.take(),
        ]
        .into_iter()
        .flatten()
        {
            gl.delete_texture(&texture);
        }
    }

    /// Scene-level textures; per-set slots resolve through the layer
    pub fn texture(&self, slot: TextureSlot, texture_set: Option<usize>) -> Option<&G::Texture> {
        let set = texture_set.and_then(|i| self.texture_sets.get(i));
        match slot {
            TextureSlot::SaoOcclusion => self.occlusion_texture.as_ref(),
            TextureSlot::LightMap => self.light_map.as_ref(),
            TextureSlot::ReflectionMap => self.reflection_map.as_ref(),
            TextureSlot::Color => set?.color.as_ref(),
            TextureSlot::MetallicRoughness => set?.metallic_roughness.as_ref(),
            TextureSlot::Emissive => set?.emissive.as_ref(),
            TextureSlot::Occlusion => set?.occlusion.as_ref(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapMode {
    #[default]
    Vertex,
    Edge,
}

/// Decode parameters of one layer in the snap target
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapPickLayerParams {
    pub origin: DVec3,
    pub coordinate_scale: Vec3,
}

/// Ephemeral per-frame GPU state shared by all draws of a frame
#[derive(Clone, Debug)]
pub struct FrameContext {
    pub texture_unit: u32,
    pub last_program_id: Option<u64>,
    pub draw_elements: u32,
    pub draw_arrays: u32,
    pub use_program: u32,
    pub bind_array: u32,
    pub viewport_size: [f32; 2],

    pub with_sao: bool,
    pub pbr_enabled: bool,
    pub color_texture_enabled: bool,

    /// Narrow frustum around the pick ray
    pub pick_view_matrix: Option<DMat4>,
    pub pick_proj_matrix: Option<DMat4>,
    pub pick_z_near: f32,
    pub pick_z_far: f32,

    pub shadow_view_matrix: Option<DMat4>,
    pub shadow_proj_matrix: Option<DMat4>,

    pub snap_mode: SnapMode,
    pub snap_vector_a: [f32; 2],
    pub snap_inv_vector_ab: [f32; 2],
    pub snap_pick_layer_number: u32,
    pub snap_pick_layer_params: Vec<SnapPickLayerParams>,
    pub snap_pick_coordinate_scale: Vec3,
    pub snap_pick_origin: DVec3,
}

impl Default for FrameContext {
    fn default() -> Self {
        FrameContext {
            texture_unit: 0,
            last_program_id: None,
            draw_elements: 0,
            draw_arrays: 0,
            use_program: 0,
            bind_array: 0,
            viewport_size: [1.0, 1.0],
            with_sao: false,
            pbr_enabled: false,
            color_texture_enabled: false,
            pick_view_matrix: None,
            pick_proj_matrix: None,
            pick_z_near: 0.01,
            pick_z_far: 5000.0,
            shadow_view_matrix: None,
            shadow_proj_matrix: None,
            snap_mode: SnapMode::Vertex,
            snap_vector_a: [0.0, 0.0],
            snap_inv_vector_ab: [1.0, 1.0],
            snap_pick_layer_number: 0,
            snap_pick_layer_params: Vec::new(),
            snap_pick_coordinate_scale: Vec3::ONE,
            snap_pick_origin: DVec3::ZERO,
        }
    }
}

impl FrameContext {
    /// Reset state at the start of a frame
    pub fn reset(&mut self) {
        self.texture_unit = 0;
        self.last_program_id = None;
        self.draw_elements = 0;
        self.draw_arrays = 0;
        self.use_program = 0;
        self.bind_array = 0;
        self.snap_pick_layer_number = 0;
        self.snap_pick_layer_params.clear();
    }

    pub fn draw_calls(&self) -> u32 {
        self.draw_elements + self.draw_arrays
    }

    /// Decode a snapped integer coordinate read back from the snap target
    /// into world space
    pub fn decode_snap_coordinate(&self, layer_number: usize, coords: [i32; 3]) -> Option<DVec3> {
        let params = self.snap_pick_layer_params.get(layer_number)?;
        let scale = params.coordinate_scale.as_dvec3();
        let local = DVec3::new(coords[0] as f64, coords[1] as f64, coords[2] as f64) / scale;
        Some(local + params.origin)
    }
}

/// Pixels searched around the pointer in each direction by snap picking
pub const SNAP_RADIUS: u32 = 30;

/// Snap target attachments
pub const SNAP_SURFACE: usize = 0;
pub const SNAP_NORMAL: usize = 1;
pub const SNAP_PICK_COLOR: usize = 2;
/// Vertex or edge coordinates from the refinement pass
pub const SNAP_CANDIDATE: usize = 3;

const SNAP_FORMATS: [AttachmentFormat; 4] = [
    AttachmentFormat::Rgba32i,
    AttachmentFormat::Rgba32i,
    AttachmentFormat::Rgba8ui,
    AttachmentFormat::Rgba32i,
];

/// Scene render configuration together with the renderer cache built for it
pub struct Scene<G: GlContext> {
    pub state: SceneRenderState<G>,
    pub renderers: RendererCache<G>,
    snap_target: Option<RenderTarget<G>>,
}

impl<G: GlContext> Scene<G> {
    pub fn new(config: SceneConfig) -> Scene<G> {
        Scene {
            state: SceneRenderState::new(config),
            renderers: RendererCache::new(),
            snap_target: None,
        }
    }

    pub fn config(&self) -> &SceneConfig {
        &self.state.config
    }

    /// Replace the configuration and rebuild renderers it invalidates
    pub fn set_config(&mut self, gl: &G, mut config: SceneConfig) {
        // Environment maps follow the uploaded textures
        config.lights.light_map = self.state.light_map.is_some();
        config.lights.reflection_map = self.state.reflection_map.is_some();
        self.state.config = config;
        self.compile(gl);
    }

    /// Broadcast a recompilation: renderers whose hashes no longer match the
    /// scene are rebuilt
    pub fn compile(&mut self, gl: &G) {
        debug!(target: "renderer_cache", "scene compile");
        self.renderers.revalidate(gl, &self.state, false);
    }

    /// Upload an RGBA8 image into one map of a texture set. Layers created
    /// afterwards against the set see the map through `texture_set_ref`.
    pub fn set_texture_image(
        &mut self,
        gl: &G,
        texture_set: usize,
        slot: TextureSlot,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<()> {
        if !matches!(
            slot,
            TextureSlot::Color | TextureSlot::MetallicRoughness | TextureSlot::Emissive | TextureSlot::Occlusion
        ) {
            return Err(RenderError::InvalidConfig(format!(
                "{:?} is not a texture set map",
                slot
            )));
        }
        let texture = render_target::create_rgba_texture(gl, width, height, pixels)?;
        self.state.replace_texture(gl, slot, Some(texture_set), texture)?;
        debug!(target: "scene", "texture set {}: {:?} {}x{}", texture_set, slot, width, height);
        Ok(())
    }

    /// Ambient occlusion in screen space, as packed depth in RGBA8. SAO
    /// programs only draw while one is present.
    pub fn set_occlusion_image(&mut self, gl: &G, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        let texture = render_target::create_rgba_texture(gl, width, height, pixels)?;
        self.state.replace_texture(gl, TextureSlot::SaoOcclusion, None, texture)
    }

    pub fn set_occlusion_texture(&mut self, gl: &G, texture: G::Texture) -> Result<()> {
        self.state.replace_texture(gl, TextureSlot::SaoOcclusion, None, texture)
    }

    pub fn has_occlusion_texture(&self) -> bool {
        self.state.occlusion_texture.is_some()
    }

    /// Irradiance cube map for PBR ambient light
    pub fn set_light_map(&mut self, gl: &G, size: u32, faces: &[u8]) -> Result<()> {
        let texture = render_target::create_cube_texture(gl, size, faces)?;
        self.state.replace_texture(gl, TextureSlot::LightMap, None, texture)?;
        if !self.state.config.lights.light_map {
            self.state.config.lights.light_map = true;
            self.compile(gl);
        }
        Ok(())
    }

    /// Environment cube map for PBR specular reflections
    pub fn set_reflection_map(&mut self, gl: &G, size: u32, faces: &[u8]) -> Result<()> {
        let texture = render_target::create_cube_texture(gl, size, faces)?;
        self.state.replace_texture(gl, TextureSlot::ReflectionMap, None, texture)?;
        if !self.state.config.lights.reflection_map {
            self.state.config.lights.reflection_map = true;
            self.compile(gl);
        }
        Ok(())
    }

    /// Hand out the snap target, creating it on first use. Return it with
    /// `restore_snap_target`.
    pub fn take_snap_target(&mut self, gl: &G) -> Result<RenderTarget<G>> {
        match self.snap_target.take() {
            Some(target) => Ok(target),
            None => RenderTarget::new(gl, 2 * SNAP_RADIUS, 2 * SNAP_RADIUS, &SNAP_FORMATS),
        }
    }

    pub fn restore_snap_target(&mut self, target: RenderTarget<G>) {
        self.snap_target = Some(target);
    }

    pub fn snap_target(&self) -> Option<&RenderTarget<G>> {
        self.snap_target.as_ref()
    }

    /// Release every cached renderer, texture and offscreen target
    pub fn destroy(&mut self, gl: &G) {
        self.renderers.destroy(gl);
        self.state.destroy_textures(gl);
        if let Some(target) = self.snap_target.take() {
            target.destroy(gl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::recording::RecordingContext;

    #[test]
    fn test_snap_coordinate_decoding() {
        let mut frame = FrameContext::default();
        frame.snap_pick_layer_params.push(SnapPickLayerParams {
            origin: DVec3::new(1000.0, 0.0, 0.0),
            coordinate_scale: Vec3::splat(100.0),
        });
        let world = frame.decode_snap_coordinate(0, [250, -100, 0]).unwrap();
        assert!((world - DVec3::new(1002.5, -1.0, 0.0)).length() < 1e-9);
        assert!(frame.decode_snap_coordinate(1, [0, 0, 0]).is_none());
    }

    #[test]
    fn test_frame_reset_clears_counters() {
        let mut frame = FrameContext {
            draw_elements: 3,
            last_program_id: Some(7),
            ..Default::default()
        };
        frame.reset();
        assert_eq!(frame.draw_calls(), 0);
        assert_eq!(frame.last_program_id, None);
    }

    #[test]
    fn test_texture_image_fills_its_set() {
        let gl = RecordingContext::new();
        let mut scene: Scene<RecordingContext> = Scene::new(SceneConfig::default());
        scene
            .set_texture_image(&gl, 2, TextureSlot::Color, 1, 1, &[255, 0, 0, 255])
            .unwrap();
        let color = *scene.state.texture(TextureSlot::Color, Some(2)).unwrap();
        assert_eq!(gl.texture(color).unwrap().data, vec![255, 0, 0, 255]);
        assert_eq!(
            scene.state.texture_set_ref(2),
            Some(TextureSetRef {
                index: 2,
                has_color: true,
                ..Default::default()
            })
        );
        assert_eq!(scene.state.texture_set_ref(0), Some(TextureSetRef::default()));
        assert!(scene.state.texture_set_ref(3).is_none());

        // Replacing a map releases the old texture
        scene
            .set_texture_image(&gl, 2, TextureSlot::Color, 1, 1, &[0, 255, 0, 255])
            .unwrap();
        assert!(gl.texture(color).is_none());
        assert!(matches!(
            scene.set_texture_image(&gl, 0, TextureSlot::LightMap, 1, 1, &[0; 4]),
            Err(RenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_environment_maps_recompile_lighting() {
        let gl = RecordingContext::new();
        let mut scene: Scene<RecordingContext> = Scene::new(SceneConfig::default());
        assert!(!scene.config().lights.light_map);
        scene.set_light_map(&gl, 1, &[128; 24]).unwrap();
        scene.set_reflection_map(&gl, 1, &[64; 24]).unwrap();
        assert!(scene.config().lights.light_map);
        assert!(scene.config().lights.reflection_map);
        assert!(scene.state.texture(TextureSlot::LightMap, None).is_some());
        assert!(scene.state.texture(TextureSlot::ReflectionMap, None).is_some());

        scene.set_occlusion_image(&gl, 1, 1, &[255; 4]).unwrap();
        assert!(scene.has_occlusion_texture());
        scene.destroy(&gl);
        assert!(gl.state.borrow().textures.is_empty());
    }

    #[test]
    fn test_missing_texture_set_resolves_to_none() {
        let state: SceneRenderState<RecordingContext> = SceneRenderState::new(SceneConfig::default());
        assert!(state.texture(TextureSlot::Color, Some(3)).is_none());
        assert!(state.texture(TextureSlot::SaoOcclusion, None).is_none());
    }
}
