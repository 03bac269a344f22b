//! Scene models: meshes packed into layers and drawn pass by pass.
//!
//! A model routes each mesh to a batching layer that shares its primitive,
//! RTC origin and vertex attributes, opening a new layer once the current
//! one is full. Meshes naming the same geometry id share one instancing
//! layer. Mesh state set before [`SceneModel::finalize`] is remembered and
//! written as the initial flags of each portion.

use crate::config::{LayerConfig, LayerType, ModelConfig, Primitive, SceneConfig, TextureSetRef};
use crate::error::{RenderError, Result};
use crate::gl::{self, GlContext};
use crate::layer::flags::EntityFlags;
use crate::layer::geometry::Aabb;
use crate::layer::pick::{Ray, SurfacePick};
use crate::layer::portion::{GeometryCfg, PortionCfg};
use crate::layer::scratch::ScratchMemory;
use crate::layer::vbo::VboLayer;
use crate::layer::{DrawContext, Layer, ModelRenderState};
use crate::renderer::camera::Camera;
use crate::scene::{
    FrameContext, Scene, SnapMode, SNAP_CANDIDATE, SNAP_NORMAL, SNAP_PICK_COLOR, SNAP_RADIUS,
    SNAP_SURFACE,
};
use crate::renderer::render_target::RenderTarget;
use glam::{DMat4, DVec3, Mat4, Vec3};
use log::{debug, error, trace};
use std::collections::HashMap;

/// Grid that automatically chosen RTC origins snap to
pub const RTC_CELL_SIZE: f64 = 1000.0;

/// RTC origin for positions under `matrix`: the center of their bounds
/// snapped to the RTC grid
pub fn rtc_origin(positions: &[f64], matrix: &DMat4) -> DVec3 {
    let mut aabb = Aabb::EMPTY;
    for p in positions.chunks_exact(3) {
        aabb.expand(matrix.transform_point3(DVec3::new(p[0], p[1], p[2])));
    }
    if aabb.is_empty() {
        return DVec3::ZERO;
    }
    (aabb.center() / RTC_CELL_SIZE).round() * RTC_CELL_SIZE
}

/// One mesh to add to a model
#[derive(Clone, Debug)]
pub struct MeshCfg<'a> {
    pub primitive: Primitive,
    pub geometry: Option<GeometryCfg<'a>>,
    /// Meshes naming the same geometry are drawn as instances of it
    pub geometry_id: Option<String>,
    pub matrix: DMat4,
    pub color: [u8; 3],
    pub opacity: u8,
    pub metallic_roughness: [u8; 2],
    pub pick_color: [u8; 4],
    /// Derived from the positions when absent
    pub origin: Option<DVec3>,
    pub positions_decode_matrix: Option<Mat4>,
    pub texture_set: Option<TextureSetRef>,
}

impl Default for MeshCfg<'_> {
    fn default() -> Self {
        MeshCfg {
            primitive: Primitive::Solid,
            geometry: None,
            geometry_id: None,
            matrix: DMat4::IDENTITY,
            color: [255, 255, 255],
            opacity: 255,
            metallic_roughness: [0, 255],
            pick_color: [0, 0, 0, 0],
            origin: None,
            positions_decode_matrix: None,
            texture_set: None,
        }
    }
}

/// A mesh's place in its model
#[derive(Clone, Debug)]
pub struct SceneModelMesh {
    pub layer: usize,
    pub portion: usize,
    pub flags: EntityFlags,
    pub color: [u8; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct BatchKey {
    primitive: Primitive,
    origin: [u64; 3],
    decode_matrix: Option<[u32; 16]>,
    texture_set: Option<usize>,
    normals: bool,
    uvs: bool,
    colors: bool,
}

/// Passes a model can draw its layers in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawPass {
    ColorOpaque,
    ColorTransparent,
    Depth,
    SilhouetteXRayed,
    SilhouetteHighlighted,
    SilhouetteSelected,
    EdgesColorOpaque,
    EdgesColorTransparent,
    EdgesXRayed,
    EdgesHighlighted,
    EdgesSelected,
    Occlusion,
    Shadow,
    PickMesh,
    PickDepths,
    PickNormals,
    SnapInit,
    Snap,
}

impl DrawPass {
    /// Passes of one display frame, in submission order
    pub const FRAME: [DrawPass; 10] = [
        DrawPass::ColorOpaque,
        DrawPass::ColorTransparent,
        DrawPass::SilhouetteXRayed,
        DrawPass::SilhouetteHighlighted,
        DrawPass::SilhouetteSelected,
        DrawPass::EdgesColorOpaque,
        DrawPass::EdgesColorTransparent,
        DrawPass::EdgesXRayed,
        DrawPass::EdgesHighlighted,
        DrawPass::EdgesSelected,
    ];

    /// Drawn with alpha blending and without depth writes
    pub fn is_blended(self) -> bool {
        matches!(
            self,
            DrawPass::ColorTransparent
                | DrawPass::EdgesColorTransparent
                | DrawPass::SilhouetteXRayed
                | DrawPass::EdgesXRayed
        )
    }

    fn draw<G: GlContext>(self, layer: &mut dyn Layer<G>, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        match self {
            DrawPass::ColorOpaque => layer.draw_color_opaque(ctx),
            DrawPass::ColorTransparent => layer.draw_color_transparent(ctx),
            DrawPass::Depth => layer.draw_depth(ctx),
            DrawPass::SilhouetteXRayed => layer.draw_silhouette_xrayed(ctx),
            DrawPass::SilhouetteHighlighted => layer.draw_silhouette_highlighted(ctx),
            DrawPass::SilhouetteSelected => layer.draw_silhouette_selected(ctx),
            DrawPass::EdgesColorOpaque => layer.draw_edges_color_opaque(ctx),
            DrawPass::EdgesColorTransparent => layer.draw_edges_color_transparent(ctx),
            DrawPass::EdgesXRayed => layer.draw_edges_xrayed(ctx),
            DrawPass::EdgesHighlighted => layer.draw_edges_highlighted(ctx),
            DrawPass::EdgesSelected => layer.draw_edges_selected(ctx),
            DrawPass::Occlusion => layer.draw_occlusion(ctx),
            DrawPass::Shadow => layer.draw_shadow(ctx),
            DrawPass::PickMesh => layer.draw_pick_mesh(ctx),
            DrawPass::PickDepths => layer.draw_pick_depths(ctx),
            DrawPass::PickNormals => layer.draw_pick_normals(ctx),
            DrawPass::SnapInit => layer.draw_snap_init(ctx),
            DrawPass::Snap => layer.draw_snap(ctx),
        }
    }
}

/// Meshes of one model and the layers holding them
pub struct SceneModel<G: GlContext> {
    id: String,
    config: ModelConfig,
    state: ModelRenderState,
    highlight_glow_through: bool,
    selected_glow_through: bool,
    layers: Vec<Box<dyn Layer<G>>>,
    /// Open batching layer per key
    batch_layers: HashMap<BatchKey, usize>,
    instance_layers: HashMap<String, usize>,
    meshes: Vec<SceneModelMesh>,
    scratch: ScratchMemory,
    finalized: bool,
    failed: bool,
}

impl<G: GlContext> SceneModel<G> {
    pub fn new(
        id: &str,
        config: ModelConfig,
        scene: &SceneConfig,
        scratch: &ScratchMemory,
    ) -> SceneModel<G> {
        SceneModel {
            id: id.to_string(),
            state: ModelRenderState::from_config(&config),
            config,
            highlight_glow_through: scene.highlight_material.glow_through,
            selected_glow_through: scene.selected_material.glow_through,
            layers: Vec::new(),
            batch_layers: HashMap::new(),
            instance_layers: HashMap::new(),
            meshes: Vec::new(),
            scratch: scratch.clone(),
            finalized: false,
            failed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn render_state(&self) -> &ModelRenderState {
        &self.state
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn num_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn mesh(&self, mesh: usize) -> Option<&SceneModelMesh> {
        self.meshes.get(mesh)
    }

    fn layer_config(&self, cfg: &MeshCfg<'_>, layer_type: LayerType, origin: DVec3) -> LayerConfig {
        let geometry = cfg.geometry.as_ref();
        LayerConfig {
            origin,
            max_geometry_batch_size: self.config.max_geometry_batch_size,
            positions_decode_matrix: cfg.positions_decode_matrix,
            uses_normals: geometry
                .is_some_and(|g| !g.normals.is_empty() || !g.normals_compressed.is_empty()),
            uses_uvs: geometry.is_some_and(|g| !g.uvs.is_empty() || !g.uvs_compressed.is_empty()),
            uses_colors: geometry.is_some_and(|g| !g.colors.is_empty()),
            uses_metallic_roughness: cfg.texture_set.is_some_and(|t| t.has_metallic_roughness),
            retain_geometry: self.config.retain_geometry,
            offsets_enabled: self.config.offsets_enabled,
            texture_set: cfg.texture_set,
            highlight_glow_through: self.highlight_glow_through,
            selected_glow_through: self.selected_glow_through,
            ..LayerConfig::new(cfg.primitive, layer_type)
        }
    }

    fn add_layer(&mut self, config: LayerConfig) -> usize {
        debug!(
            target: "layer",
            "model '{}': new {:?}/{:?} layer at origin {}",
            self.id, config.layer_type, config.primitive, config.origin
        );
        self.layers
            .push(Box::new(VboLayer::<G>::new(config, &self.scratch)));
        self.layers.len() - 1
    }

    /// Layer a batched mesh goes into, opening one when needed
    fn batch_layer(&mut self, cfg: &MeshCfg<'_>, geometry: &GeometryCfg<'_>) -> usize {
        let origin = cfg
            .origin
            .unwrap_or_else(|| rtc_origin(geometry.positions, &cfg.matrix));
        let key = BatchKey {
            primitive: cfg.primitive,
            origin: origin.to_array().map(f64::to_bits),
            decode_matrix: cfg
                .positions_decode_matrix
                .map(|m| m.to_cols_array().map(f32::to_bits)),
            texture_set: cfg.texture_set.map(|t| t.index),
            normals: !geometry.normals.is_empty() || !geometry.normals_compressed.is_empty(),
            uvs: !geometry.uvs.is_empty() || !geometry.uvs_compressed.is_empty(),
            colors: !geometry.colors.is_empty(),
        };
        let num_indices = geometry.num_layer_indices(cfg.primitive);
        if let Some(&layer) = self.batch_layers.get(&key) {
            if self.layers[layer].can_create_portion(geometry.num_position_components(), num_indices)
            {
                return layer;
            }
        }
        let layer = self.add_layer(self.layer_config(cfg, LayerType::Batching, origin));
        self.batch_layers.insert(key, layer);
        layer
    }

    fn instance_layer(&mut self, cfg: &MeshCfg<'_>, geometry_id: &str) -> Result<usize> {
        if let Some(&layer) = self.instance_layers.get(geometry_id) {
            return Ok(layer);
        }
        let geometry = cfg.geometry.as_ref().ok_or_else(|| {
            RenderError::InvalidConfig(format!("geometry '{}' is not defined", geometry_id))
        })?;
        let origin = cfg
            .origin
            .unwrap_or_else(|| rtc_origin(geometry.positions, &cfg.matrix));
        let layer = self.add_layer(self.layer_config(cfg, LayerType::Instancing, origin));
        self.instance_layers.insert(geometry_id.to_string(), layer);
        Ok(layer)
    }

    /// Add a mesh and return its id
    pub fn create_mesh(&mut self, cfg: &MeshCfg<'_>) -> Result<usize> {
        if self.failed {
            return Err(RenderError::FinalizeFailed(self.id.clone()));
        }
        if self.finalized {
            error!(target: "layer", "model '{}': mesh created after finalize", self.id);
            return Err(RenderError::AlreadyFinalized);
        }
        let layer = match &cfg.geometry_id {
            Some(geometry_id) => self.instance_layer(cfg, geometry_id)?,
            None => {
                let geometry = cfg.geometry.as_ref().ok_or_else(|| {
                    RenderError::InvalidConfig("mesh has neither geometry nor geometry id".into())
                })?;
                self.batch_layer(cfg, geometry)
            }
        };
        let color = [cfg.color[0], cfg.color[1], cfg.color[2], cfg.opacity];
        let portion = self.layers[layer].create_portion(&PortionCfg {
            geometry: cfg.geometry.clone(),
            matrix: cfg.matrix,
            color,
            metallic_roughness: cfg.metallic_roughness,
            pick_color: cfg.pick_color,
        })?;

        let flags = EntityFlags::VISIBLE
            .with(EntityFlags::PICKABLE, true)
            .with(EntityFlags::CLIPPABLE, true)
            .with(EntityFlags::COLLIDABLE, true)
            .with(EntityFlags::CAST_SHADOW, true)
            .with(EntityFlags::RECEIVE_SHADOW, true)
            .with(EntityFlags::EDGES, self.config.edges)
            .with(EntityFlags::TRANSPARENT, cfg.opacity < 255);
        self.meshes.push(SceneModelMesh {
            layer,
            portion,
            flags,
            color,
        });
        Ok(self.meshes.len() - 1)
    }

    /// Upload every layer and write the initial mesh flags. A failure
    /// releases every layer and leaves the model unusable.
    pub fn finalize(&mut self, gl: &G) -> Result<()> {
        if self.failed {
            return Err(RenderError::FinalizeFailed(self.id.clone()));
        }
        if self.finalized {
            error!(target: "layer", "model '{}' finalized twice", self.id);
            return Err(RenderError::AlreadyFinalized);
        }
        if let Err(err) = self.finalize_layers(gl) {
            error!(target: "layer", "model '{}' failed to finalize: {}", self.id, err);
            self.destroy(gl);
            self.failed = true;
            return Err(err);
        }
        self.finalized = true;
        debug!(
            target: "layer",
            "model '{}' finalized: {} meshes in {} layers",
            self.id,
            self.meshes.len(),
            self.layers.len()
        );
        Ok(())
    }

    fn finalize_layers(&mut self, gl: &G) -> Result<()> {
        for layer in &mut self.layers {
            layer.finalize(gl)?;
        }
        for mesh in &self.meshes {
            self.layers[mesh.layer].init_flags(mesh.portion, mesh.flags)?;
        }
        for layer in &mut self.layers {
            layer.flush_init_flags(gl)?;
        }
        Ok(())
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn set_flag(&mut self, gl: &G, mesh: usize, flag: EntityFlags, on: bool) -> Result<()> {
        let m = self
            .meshes
            .get_mut(mesh)
            .ok_or(RenderError::UnknownMesh(mesh))?;
        m.flags.set(flag, on);
        if !self.finalized {
            return Ok(());
        }
        self.layers[m.layer].set_flag(gl, m.portion, flag, on)
    }

    /// Follow scene-wide emphasis settings baked into the flag words
    pub fn apply_scene_config(&mut self, gl: &G, scene: &SceneConfig) -> Result<()> {
        let highlighted = scene.highlight_material.glow_through;
        let selected = scene.selected_material.glow_through;
        if highlighted == self.highlight_glow_through && selected == self.selected_glow_through {
            return Ok(());
        }
        self.highlight_glow_through = highlighted;
        self.selected_glow_through = selected;
        for layer in &mut self.layers {
            layer.set_glow_through(gl, highlighted, selected)?;
        }
        Ok(())
    }

    pub fn set_visible(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::VISIBLE, on)
    }

    pub fn set_highlighted(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::HIGHLIGHTED, on)
    }

    pub fn set_selected(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::SELECTED, on)
    }

    pub fn set_xrayed(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::XRAYED, on)
    }

    pub fn set_edges(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::EDGES, on)
    }

    pub fn set_pickable(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::PICKABLE, on)
    }

    pub fn set_culled(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::CULLED, on)
    }

    pub fn set_clippable(&mut self, gl: &G, mesh: usize, on: bool) -> Result<()> {
        self.set_flag(gl, mesh, EntityFlags::CLIPPABLE, on)
    }

    fn finalized_mesh(&self, mesh: usize) -> Result<&SceneModelMesh> {
        let m = self.meshes.get(mesh).ok_or(RenderError::UnknownMesh(mesh))?;
        if !self.finalized {
            return Err(RenderError::NotFinalized);
        }
        Ok(m)
    }

    /// RGB; opacity is kept
    pub fn set_color(&mut self, gl: &G, mesh: usize, rgb: [u8; 3]) -> Result<()> {
        let m = self.finalized_mesh(mesh)?;
        let color = [rgb[0], rgb[1], rgb[2], m.color[3]];
        let (layer, portion) = (m.layer, m.portion);
        self.layers[layer].set_color(gl, portion, color)?;
        self.meshes[mesh].color = color;
        Ok(())
    }

    /// Opacity below 255 moves the mesh into the transparent pass
    pub fn set_opacity(&mut self, gl: &G, mesh: usize, opacity: u8) -> Result<()> {
        let m = self.finalized_mesh(mesh)?;
        let color = [m.color[0], m.color[1], m.color[2], opacity];
        let (layer, portion) = (m.layer, m.portion);
        self.layers[layer].set_color(gl, portion, color)?;
        self.meshes[mesh].color = color;
        self.set_flag(gl, mesh, EntityFlags::TRANSPARENT, opacity < 255)
    }

    pub fn set_offset(&mut self, gl: &G, mesh: usize, offset: DVec3) -> Result<()> {
        let m = self.finalized_mesh(mesh)?;
        let (layer, portion) = (m.layer, m.portion);
        self.layers[layer].set_offset(gl, portion, offset)
    }

    /// Instance transform of an instanced mesh
    pub fn set_mesh_matrix(&mut self, gl: &G, mesh: usize, matrix: DMat4) -> Result<()> {
        let m = self.finalized_mesh(mesh)?;
        let (layer, portion) = (m.layer, m.portion);
        self.layers[layer].set_matrix(gl, portion, matrix)
    }

    pub fn mesh_world_aabb(&self, mesh: usize) -> Option<Aabb> {
        let m = self.meshes.get(mesh)?;
        self.layers[m.layer].portion_world_aabb(m.portion, &self.state.matrix)
    }

    /// World bounds of every mesh
    pub fn aabb(&self) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for mesh in 0..self.meshes.len() {
            if let Some(mesh_aabb) = self.mesh_world_aabb(mesh) {
                aabb.union(&mesh_aabb);
            }
        }
        aabb
    }

    pub fn get_each_vertex(&self, mesh: usize, f: &mut dyn FnMut(DVec3)) -> Result<()> {
        let m = self.meshes.get(mesh).ok_or(RenderError::UnknownMesh(mesh))?;
        self.layers[m.layer].get_each_vertex(m.portion, &self.state.matrix, f)
    }

    pub fn get_each_index(&self, mesh: usize, f: &mut dyn FnMut(u32)) -> Result<()> {
        let m = self.meshes.get(mesh).ok_or(RenderError::UnknownMesh(mesh))?;
        self.layers[m.layer].get_each_index(m.portion, f)
    }

    /// Nearest mesh hit by a ray, against retained geometry
    pub fn pick_surface(&self, ray: &Ray) -> Option<(usize, SurfacePick)> {
        let mut best: Option<(usize, SurfacePick)> = None;
        for (id, mesh) in self.meshes.iter().enumerate() {
            let flags = mesh.flags;
            if !flags.contains(EntityFlags::VISIBLE)
                || !flags.contains(EntityFlags::PICKABLE)
                || flags.contains(EntityFlags::CULLED)
            {
                continue;
            }
            let Some(hit) =
                self.layers[mesh.layer].precision_ray_pick_surface(mesh.portion, &self.state.matrix, ray)
            else {
                continue;
            };
            if best.map_or(true, |(_, b)| hit.distance < b.distance) {
                best = Some((id, hit));
            }
        }
        best
    }

    /// Draw every layer of the model in one pass
    pub fn draw(
        &mut self,
        pass: DrawPass,
        gl: &G,
        scene: &mut Scene<G>,
        camera: &Camera,
        frame: &mut FrameContext,
    ) -> Result<()> {
        if !self.finalized {
            trace!(target: "layer", "model '{}' not finalized, nothing to draw", self.id);
            return Ok(());
        }
        let Scene { state, renderers, .. } = scene;
        let mut ctx = DrawContext {
            gl,
            scene: state,
            renderers,
            camera,
            frame,
            model: &self.state,
        };
        for layer in &mut self.layers {
            pass.draw(layer.as_mut(), &mut ctx)?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, gl: &G) {
        for layer in &mut self.layers {
            layer.destroy(gl);
        }
        self.layers.clear();
        self.meshes.clear();
        self.batch_layers.clear();
        self.instance_layers.clear();
    }
}

/// Replace the scene configuration and bring existing models in line with it
pub fn set_scene_config<G: GlContext>(
    gl: &G,
    scene: &mut Scene<G>,
    models: &mut [SceneModel<G>],
    config: SceneConfig,
) -> Result<()> {
    scene.set_config(gl, config);
    for model in models.iter_mut() {
        model.apply_scene_config(gl, scene.config())?;
    }
    Ok(())
}

/// Draw one pass over several models
pub fn draw_models<G: GlContext>(
    pass: DrawPass,
    gl: &G,
    scene: &mut Scene<G>,
    models: &mut [SceneModel<G>],
    camera: &Camera,
    frame: &mut FrameContext,
) -> Result<()> {
    for model in models.iter_mut() {
        model.draw(pass, gl, scene, camera, frame)?;
    }
    Ok(())
}

/// Draw a display frame: opaque color, transparent color, silhouettes,
/// then edges
pub fn render_frame<G: GlContext>(
    gl: &G,
    scene: &mut Scene<G>,
    models: &mut [SceneModel<G>],
    camera: &Camera,
    frame: &mut FrameContext,
) -> Result<()> {
    frame.reset();
    let config = scene.config();
    frame.with_sao = config.sao.enabled && scene.has_occlusion_texture();
    frame.pbr_enabled = config.pbr_enabled;
    frame.color_texture_enabled = config.color_texture_enabled;

    gl.enable(gl::DEPTH_TEST);
    gl.front_face(gl::CCW);
    gl.cull_face(gl::BACK);
    for pass in DrawPass::FRAME {
        if pass.is_blended() {
            gl.enable(gl::BLEND);
            gl.blend_func(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
            gl.depth_mask(false);
        }
        draw_models(pass, gl, scene, models, camera, frame)?;
        if pass.is_blended() {
            gl.disable(gl::BLEND);
            gl.depth_mask(true);
        }
    }
    trace!(
        target: "layer",
        "frame: {} draws, {} program switches",
        frame.draw_calls(),
        frame.use_program
    );
    Ok(())
}

/// Snap target pixel no layer wrote to
const EMPTY_SNAP_PIXEL: [i32; 4] = [0, 0, 0, -1];

/// Where to look for snap candidates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapRequest {
    pub canvas_size: [u32; 2],
    /// Canvas pixels, origin top left
    pub pointer: [f32; 2],
    pub mode: SnapMode,
}

/// Surface or snapped point under the pointer
#[derive(Clone, Debug, PartialEq)]
pub struct SnapResult {
    pub world_pos: DVec3,
    /// Zero when no surface lies under the pointer
    pub world_normal: Vec3,
    pub pick_color: [u8; 4],
    /// Moved onto a vertex or edge near the pointer
    pub snapped: bool,
}

/// Render the region around the pointer into the snap target: surfaces
/// first, then the vertices or edges lying on them
pub fn render_snap<G: GlContext>(
    gl: &G,
    scene: &mut Scene<G>,
    models: &mut [SceneModel<G>],
    camera: &Camera,
    frame: &mut FrameContext,
    request: &SnapRequest,
) -> Result<()> {
    frame.reset();
    let [width, height] = request.canvas_size.map(|v| v.max(1) as f32);
    let size = (2 * SNAP_RADIUS) as f32;
    frame.snap_mode = request.mode;
    frame.snap_vector_a = [
        2.0 * request.pointer[0] / width - 1.0,
        1.0 - 2.0 * request.pointer[1] / height,
    ];
    frame.snap_inv_vector_ab = [width / size, height / size];

    let target = scene.take_snap_target(gl)?;
    let drawn = draw_snap_passes(gl, scene, models, camera, frame, &target);
    target.unbind(gl);
    scene.restore_snap_target(target);
    gl.depth_func(gl::LESS);
    gl.viewport(
        0,
        0,
        frame.viewport_size[0] as i32,
        frame.viewport_size[1] as i32,
    );
    trace!(target: "layer", "snap: {} draws", frame.draw_calls());
    drawn
}

fn draw_snap_passes<G: GlContext>(
    gl: &G,
    scene: &mut Scene<G>,
    models: &mut [SceneModel<G>],
    camera: &Camera,
    frame: &mut FrameContext,
    target: &RenderTarget<G>,
) -> Result<()> {
    target.bind(gl);
    target.clear_color(gl, SNAP_SURFACE, EMPTY_SNAP_PIXEL);
    target.clear_color(gl, SNAP_NORMAL, [0; 4]);
    target.clear_color(gl, SNAP_PICK_COLOR, [0; 4]);
    target.clear_color(gl, SNAP_CANDIDATE, EMPTY_SNAP_PIXEL);
    target.clear_depth(gl);
    gl.enable(gl::DEPTH_TEST);
    gl.disable(gl::BLEND);
    gl.depth_mask(true);
    gl.depth_func(gl::LESS);

    target.set_draw_buffers(gl, &[SNAP_SURFACE, SNAP_NORMAL, SNAP_PICK_COLOR]);
    draw_models(DrawPass::SnapInit, gl, scene, models, camera, frame)?;
    // Only vertices and edges on the nearest surface pass
    gl.depth_func(gl::LEQUAL);
    target.set_draw_buffers(gl, &[SNAP_CANDIDATE]);
    draw_models(DrawPass::Snap, gl, scene, models, camera, frame)
}

/// Read back what `render_snap` drew: the candidate nearest the pointer
/// when there is one, else the surface under it
pub fn read_snap<G: GlContext>(
    gl: &G,
    scene: &Scene<G>,
    frame: &FrameContext,
) -> Result<Option<SnapResult>> {
    let Some(target) = scene.snap_target() else {
        return Ok(None);
    };
    let size = (2 * SNAP_RADIUS) as i32;
    let center = SNAP_RADIUS as i32;
    let decode = |pixel: &[i32; 4]| {
        if pixel[3] < 0 {
            return None;
        }
        frame.decode_snap_coordinate(pixel[3] as usize, [pixel[0], pixel[1], pixel[2]])
    };

    let candidates = target.read_block(gl, SNAP_CANDIDATE, 0, 0, size, size)?;
    let snapped = candidates
        .iter()
        .enumerate()
        .filter(|(_, pixel)| pixel[3] >= 0)
        .min_by_key(|(i, _)| {
            let dx = *i as i32 % size - center;
            let dy = *i as i32 / size - center;
            dx * dx + dy * dy
        })
        .and_then(|(_, pixel)| decode(pixel));

    let surface = target.read_block(gl, SNAP_SURFACE, center, center, 1, 1)?;
    let surface = surface.first().and_then(decode);
    let Some(world_pos) = snapped.or(surface) else {
        return Ok(None);
    };

    let mut world_normal = Vec3::ZERO;
    let mut pick_color = [0u8; 4];
    if surface.is_some() {
        if let Some(n) = target.read_block(gl, SNAP_NORMAL, center, center, 1, 1)?.first() {
            world_normal = (Vec3::new(n[0] as f32, n[1] as f32, n[2] as f32) / i32::MAX as f32)
                .normalize_or_zero();
        }
        if let Some(p) = target.read_block(gl, SNAP_PICK_COLOR, center, center, 1, 1)?.first() {
            pick_color = p.map(|c| c.clamp(0, 255) as u8);
        }
    }
    Ok(Some(SnapResult {
        world_pos,
        world_normal,
        pick_color,
        snapped: snapped.is_some(),
    }))
}
