//! Layers: GPU buffer sets holding many mesh portions of one primitive kind,
//! drawn with programs shared through the scene's renderer cache.
//!
//! A layer accumulates portions, is finalized exactly once, and from then on
//! only portion state (flags, color, offset, instance transform) changes. Each
//! per-pass draw method first checks the layer's aggregate flag counts and
//! skips the pass when no portion can appear in it.

pub mod flags;
pub mod geometry;
pub mod pick;
pub mod portion;
pub mod scratch;
pub mod vbo;

use crate::config::{ModelConfig, Primitive};
use crate::error::Result;
use crate::gl::GlContext;
use crate::renderer::camera::Camera;
use crate::renderer::renderer_cache::RendererCache;
use crate::scene::{FrameContext, SceneRenderState};
use flags::{EntityFlags, PortionCounts};
use geometry::Aabb;
use glam::{DMat4, DQuat, DVec3, EulerRot};
use pick::{Ray, SurfacePick};
use portion::PortionCfg;

/// Model-level state every layer of a model draws with
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRenderState {
    pub matrix: DMat4,
    pub backfaces: bool,
    pub sao_enabled: bool,
    pub pbr_enabled: bool,
    pub color_texture_enabled: bool,
}

impl Default for ModelRenderState {
    fn default() -> Self {
        ModelRenderState::from_config(&ModelConfig::default())
    }
}

impl ModelRenderState {
    pub fn from_config(config: &ModelConfig) -> ModelRenderState {
        let [rx, ry, rz] = config.rotation.map(f64::to_radians);
        let rotation = DQuat::from_euler(EulerRot::ZYX, rz, ry, rx);
        ModelRenderState {
            matrix: DMat4::from_scale_rotation_translation(
                DVec3::from(config.scale),
                rotation,
                DVec3::from(config.position),
            ),
            backfaces: config.backfaces,
            sao_enabled: config.sao_enabled,
            pbr_enabled: config.pbr_enabled,
            color_texture_enabled: config.color_texture_enabled,
        }
    }
}

/// Everything a layer needs to issue one pass
pub struct DrawContext<'a, G: GlContext> {
    pub gl: &'a G,
    pub scene: &'a SceneRenderState<G>,
    pub renderers: &'a mut RendererCache<G>,
    pub camera: &'a Camera,
    pub frame: &'a mut FrameContext,
    pub model: &'a ModelRenderState,
}

/// Portion lifecycle, state updates, per-pass draws and CPU-side queries of
/// a GPU-resident layer
pub trait Layer<G: GlContext> {
    fn primitive(&self) -> Primitive;

    /// Bounds of every portion relative to the layer origin
    fn aabb(&mut self) -> Aabb;

    fn num_portions(&self) -> usize;

    fn counts(&self) -> &PortionCounts;

    fn portion_flags(&self, portion: usize) -> Option<EntityFlags>;

    /// Whether a mesh of this size still fits
    fn can_create_portion(&self, num_position_components: usize, num_indices: usize) -> bool;

    /// Stage a mesh and return its portion id
    fn create_portion(&mut self, cfg: &PortionCfg<'_>) -> Result<usize>;

    /// Quantize and upload everything staged
    fn finalize(&mut self, gl: &G) -> Result<()>;

    fn is_finalized(&self) -> bool;

    /// Initial flags of a portion, buffered until [`Layer::flush_init_flags`]
    fn init_flags(&mut self, portion: usize, flags: EntityFlags) -> Result<()>;

    fn flush_init_flags(&mut self, gl: &G) -> Result<()>;

    fn set_flag(&mut self, gl: &G, portion: usize, flag: EntityFlags, on: bool) -> Result<()>;

    /// Whether highlighted and selected silhouettes draw over other geometry.
    /// Changing it re-packs the flag word of every portion.
    fn set_glow_through(&mut self, gl: &G, highlighted: bool, selected: bool) -> Result<()>;

    fn set_visible(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::VISIBLE, on)
    }

    fn set_highlighted(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::HIGHLIGHTED, on)
    }

    fn set_xrayed(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::XRAYED, on)
    }

    fn set_selected(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::SELECTED, on)
    }

    fn set_edges(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::EDGES, on)
    }

    fn set_clippable(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::CLIPPABLE, on)
    }

    fn set_pickable(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::PICKABLE, on)
    }

    fn set_culled(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::CULLED, on)
    }

    fn set_transparent(&mut self, gl: &G, portion: usize, on: bool) -> Result<()> {
        self.set_flag(gl, portion, EntityFlags::TRANSPARENT, on)
    }

    /// RGB plus opacity
    fn set_color(&mut self, gl: &G, portion: usize, color: [u8; 4]) -> Result<()>;

    fn set_offset(&mut self, gl: &G, portion: usize, offset: DVec3) -> Result<()>;

    /// Instance transform; instancing layers only
    fn set_matrix(&mut self, gl: &G, portion: usize, matrix: DMat4) -> Result<()>;

    /// World positions of a portion's vertices
    fn get_each_vertex(
        &self,
        portion: usize,
        model_matrix: &DMat4,
        f: &mut dyn FnMut(DVec3),
    ) -> Result<()>;

    /// Portion-relative indices
    fn get_each_index(&self, portion: usize, f: &mut dyn FnMut(u32)) -> Result<()>;

    /// World-space portion bounds
    fn portion_world_aabb(&self, portion: usize, model_matrix: &DMat4) -> Option<Aabb>;

    /// CPU ray cast against retained triangles, reporting the farthest hit
    fn precision_ray_pick_surface(
        &self,
        portion: usize,
        model_matrix: &DMat4,
        ray: &Ray,
    ) -> Option<SurfacePick>;

    fn draw_color_opaque(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_color_transparent(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_depth(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_silhouette_xrayed(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_silhouette_highlighted(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_silhouette_selected(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_edges_color_opaque(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_edges_color_transparent(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_edges_xrayed(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_edges_highlighted(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_edges_selected(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_occlusion(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_shadow(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_pick_mesh(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_pick_depths(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_pick_normals(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_snap_init(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;
    fn draw_snap(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()>;

    /// Release GPU buffers
    fn destroy(&mut self, gl: &G);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matrix_from_config() {
        let config = ModelConfig {
            position: [10.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 90.0],
            scale: [2.0, 2.0, 2.0],
            ..Default::default()
        };
        let state = ModelRenderState::from_config(&config);
        let p = state.matrix.transform_point3(DVec3::X);
        assert!((p - DVec3::new(10.0, 2.0, 0.0)).length() < 1e-9);
    }
}
