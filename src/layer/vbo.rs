//! Vertex-buffer-backed layer, batching many meshes into shared buffers or
//! drawing one shared geometry once per instance.

use super::flags::{col_silh_edge_pick_flags, EntityFlags, GlowThrough, PortionCounts, RenderPass};
use super::geometry::{
    build_edge_indices, decompress_position, oct_encode_normal, positions_decode_matrix,
    quantize_positions, quantize_uvs, Aabb, DEFAULT_EDGE_THRESHOLD_DEGREES,
};
use super::pick::{farthest_hit, Ray, SurfacePick};
use super::portion::{GeometryCfg, Portion, PortionCfg, RetainedGeometry};
use super::scratch::{ScratchLease, ScratchMemory};
use super::{DrawContext, Layer, ModelRenderState};
use crate::config::{LayerConfig, LayerType, Primitive};
use crate::error::{RenderError, Result};
use crate::gl::{self, GlContext};
use crate::renderer::buffer::{ArrayBuf, AttributeSource, LayerBuffers};
use crate::renderer::layer_renderer::LayerDrawInfo;
use crate::renderer::renderer_cache::RendererKey;
use crate::renderer::techniques::Technique;
use crate::scene::SnapPickLayerParams;
use glam::{DMat3, DMat4, DVec3, Mat3, Vec3};
use log::{debug, error, trace, warn};

/// Largest integer coordinate written into the snap target
const SNAP_COORDINATE_RANGE: f64 = 10_000_000.0;

/// CPU-side arrays accumulated until finalize
#[derive(Default)]
struct Staging {
    /// Relative to the layer origin (batching) or geometry-local (instancing)
    positions: Vec<f64>,
    positions_compressed: Vec<u16>,
    normals: Vec<i8>,
    colors: Vec<u8>,
    uvs: Vec<f32>,
    uvs_compressed: Vec<u16>,
    metallic_roughness: Vec<u8>,
    pick_colors: Vec<u8>,
    offsets: Vec<f32>,
    indices: Vec<u32>,
    edge_indices: Vec<u32>,
    model_rows: [Vec<f32>; 3],
    normal_rows: [Vec<f32>; 3],
    num_vertices: usize,
    has_normals: bool,
    has_uvs: bool,
}

struct StagedGeometry {
    num_vertices: usize,
    indices_base: usize,
    num_indices: usize,
    aabb: Aabb,
}

impl Staging {
    /// Append vertex data, baking `matrix` into float positions when given
    fn push_geometry(
        &mut self,
        config: &LayerConfig,
        geometry: &GeometryCfg<'_>,
        matrix: Option<&DMat4>,
    ) -> Result<StagedGeometry> {
        let vertex_base = self.num_vertices;
        let num_vertices = geometry.num_vertices();
        let mut aabb = Aabb::EMPTY;
        let mut local_positions: Vec<f64> = Vec::with_capacity(num_vertices * 3);

        if !geometry.positions_compressed.is_empty() {
            let decode = config.positions_decode_matrix.ok_or_else(|| {
                RenderError::InvalidConfig("quantized positions need a layer decode matrix".into())
            })?;
            // Quantized positions are stored as given and cannot take a transform
            if matrix.is_some_and(|m| *m != DMat4::IDENTITY) {
                return Err(RenderError::InvalidConfig(
                    "quantized positions cannot be transformed by a mesh matrix".into(),
                ));
            }
            let decode = decode.as_dmat4();
            self.positions_compressed
                .extend_from_slice(&geometry.positions_compressed[..num_vertices * 3]);
            for q in geometry.positions_compressed.chunks_exact(3) {
                let p = decompress_position(q, &decode);
                aabb.expand(p);
                local_positions.extend_from_slice(&p.to_array());
            }
        } else {
            if config.positions_decode_matrix.is_some() {
                return Err(RenderError::InvalidConfig(
                    "float positions in a pre-quantized layer".into(),
                ));
            }
            for p in geometry.positions.chunks_exact(3) {
                let mut p = DVec3::new(p[0], p[1], p[2]);
                if let Some(m) = matrix {
                    p = m.transform_point3(p) - config.origin;
                }
                aabb.expand(p);
                local_positions.extend_from_slice(&p.to_array());
            }
            self.positions.extend_from_slice(&local_positions);
        }

        if config.uses_normals && config.primitive.is_triangles() {
            if geometry.normals_compressed.len() >= num_vertices * 2 {
                self.normals
                    .extend_from_slice(&geometry.normals_compressed[..num_vertices * 2]);
                self.has_normals = true;
            } else if geometry.normals.len() >= num_vertices * 3 {
                let normal_matrix = matrix.map(|m| DMat3::from_mat4(*m).inverse().transpose());
                for n in geometry.normals.chunks_exact(3).take(num_vertices) {
                    let mut n = Vec3::new(n[0], n[1], n[2]);
                    if let Some(nm) = &normal_matrix {
                        n = (*nm * n.as_dvec3()).normalize_or_zero().as_vec3();
                    }
                    self.normals.extend_from_slice(&oct_encode_normal(n));
                }
                self.has_normals = true;
            } else {
                self.normals.resize(self.normals.len() + num_vertices * 2, 0);
            }
        }

        if config.uses_uvs {
            if config.uv_decode_matrix.is_some() {
                let uvs = geometry.uvs_compressed;
                self.uvs_compressed
                    .extend((0..num_vertices * 2).map(|i| uvs.get(i).copied().unwrap_or(0)));
                self.has_uvs |= !uvs.is_empty();
            } else {
                let uvs = geometry.uvs;
                self.uvs
                    .extend((0..num_vertices * 2).map(|i| uvs.get(i).copied().unwrap_or(0.0)));
                self.has_uvs |= !uvs.is_empty();
            }
        }

        let indices_base = self.indices.len();
        if config.primitive != Primitive::Points {
            let base = vertex_base as u32;
            if geometry.indices.is_empty() {
                self.indices.extend((0..num_vertices as u32).map(|i| i + base));
            } else {
                self.indices.extend(geometry.indices.iter().map(|i| i + base));
            }
        }
        let num_indices = self.indices.len() - indices_base;

        if config.primitive.is_triangles() {
            if geometry.edge_indices.is_empty() {
                let triangles = &self.indices[indices_base..];
                let local: Vec<u32> = triangles.iter().map(|i| i - vertex_base as u32).collect();
                let edges = build_edge_indices(&local_positions, &local, DEFAULT_EDGE_THRESHOLD_DEGREES);
                self.edge_indices
                    .extend(edges.iter().map(|i| i + vertex_base as u32));
            } else {
                self.edge_indices
                    .extend(geometry.edge_indices.iter().map(|i| i + vertex_base as u32));
            }
        }

        self.num_vertices += num_vertices;
        Ok(StagedGeometry {
            num_vertices,
            indices_base,
            num_indices,
            aabb,
        })
    }

    /// Per-portion or per-instance attributes, `count` items of each
    fn push_state(&mut self, config: &LayerConfig, cfg: &PortionCfg<'_>, count: usize) {
        let vertex_colors = cfg
            .geometry
            .as_ref()
            .map(|g| g.colors)
            .filter(|colors| config.layer_type == LayerType::Batching && colors.len() >= count * 4);
        match vertex_colors {
            Some(colors) => self.colors.extend_from_slice(&colors[..count * 4]),
            None => {
                for _ in 0..count {
                    self.colors.extend_from_slice(&cfg.color);
                }
            }
        }
        for _ in 0..count {
            self.pick_colors.extend_from_slice(&cfg.pick_color);
            if config.uses_metallic_roughness {
                self.metallic_roughness
                    .extend_from_slice(&cfg.metallic_roughness);
            }
        }
        if config.offsets_enabled {
            self.offsets.resize(self.offsets.len() + count * 3, 0.0);
        }
    }

    fn push_instance_rows(&mut self, origin: DVec3, matrix: &DMat4) {
        let (model_rows, normal_rows) = instance_rows(origin, matrix);
        for i in 0..3 {
            self.model_rows[i].extend_from_slice(&model_rows[i]);
            self.normal_rows[i].extend_from_slice(&normal_rows[i]);
        }
    }
}

/// Rows of the origin-relative instance matrix and of its normal matrix
fn instance_rows(origin: DVec3, matrix: &DMat4) -> ([[f32; 4]; 3], [[f32; 4]; 3]) {
    let relative = DMat4::from_translation(-origin) * *matrix;
    let normal = DMat4::from_mat3(DMat3::from_mat4(*matrix).inverse().transpose());
    let row = |m: &DMat4, i: usize| m.row(i).as_vec4().to_array();
    (
        [row(&relative, 0), row(&relative, 1), row(&relative, 2)],
        [row(&normal, 0), row(&normal, 1), row(&normal, 2)],
    )
}

/// GPU-buffer-backed layer of one primitive kind
pub struct VboLayer<G: GlContext> {
    config: LayerConfig,
    portions: Vec<Portion>,
    counts: PortionCounts,
    /// `None` once finalized
    staging: Option<Staging>,
    buffers: LayerBuffers<G>,
    retained: Option<RetainedGeometry>,
    decode_matrix: DMat4,
    uv_decode_matrix: Mat3,
    deferred_flags: Option<Vec<u32>>,
    /// Instancing: bounds of the shared geometry
    geometry_aabb: Aabb,
    num_position_components: usize,
    num_indices: usize,
    has_normals: bool,
    has_edges: bool,
    pbr_supported: bool,
    color_texture_supported: bool,
    aabb: Aabb,
    aabb_dirty: bool,
    scratch: Option<ScratchLease>,
}

impl<G: GlContext> VboLayer<G> {
    pub fn new(config: LayerConfig, scratch: &ScratchMemory) -> VboLayer<G> {
        let buffers = LayerBuffers::new(config.primitive.gl_mode());
        VboLayer {
            decode_matrix: config
                .positions_decode_matrix
                .map_or(DMat4::IDENTITY, |m| m.as_dmat4()),
            uv_decode_matrix: config.uv_decode_matrix.unwrap_or(Mat3::IDENTITY),
            config,
            portions: Vec::new(),
            counts: PortionCounts::default(),
            staging: Some(Staging::default()),
            buffers,
            retained: None,
            deferred_flags: None,
            geometry_aabb: Aabb::EMPTY,
            num_position_components: 0,
            num_indices: 0,
            has_normals: false,
            has_edges: false,
            pbr_supported: false,
            color_texture_supported: false,
            aabb: Aabb::EMPTY,
            aabb_dirty: true,
            scratch: Some(scratch.acquire()),
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn pbr_supported(&self) -> bool {
        self.pbr_supported
    }

    pub fn color_texture_supported(&self) -> bool {
        self.color_texture_supported
    }

    fn require_finalized(&self) -> Result<()> {
        if self.staging.is_some() {
            error!(target: "layer", "portion state changed before finalize");
            return Err(RenderError::NotFinalized);
        }
        Ok(())
    }

    fn portion(&self, portion: usize) -> Result<&Portion> {
        self.portions.get(portion).ok_or(RenderError::UnknownPortion(portion))
    }

    /// First item and item count of a portion in per-vertex or per-instance
    /// buffers
    fn item_range(&self, portion: &Portion) -> (usize, usize) {
        match self.config.layer_type {
            LayerType::Batching => (portion.vertex_base, portion.num_vertices),
            LayerType::Instancing => (portion.vertex_base, 1),
        }
    }

    fn num_items(&self) -> usize {
        match self.config.layer_type {
            LayerType::Batching => self.num_position_components / 3,
            LayerType::Instancing => self.portions.len(),
        }
    }

    fn flags_word(&self, flags: EntityFlags) -> u32 {
        let glow = GlowThrough {
            highlighted: self.config.highlight_glow_through,
            selected: self.config.selected_glow_through,
        };
        col_silh_edge_pick_flags(
            flags,
            flags.contains(EntityFlags::TRANSPARENT),
            self.has_edges,
            glow,
        )
        .pack(flags.contains(EntityFlags::CLIPPABLE))
    }

    /// Current flag word of every portion, in buffer order
    fn packed_flags(&self) -> Vec<u32> {
        let mut words = vec![0; self.num_items()];
        for portion in &self.portions {
            let (base, len) = self.item_range(portion);
            words[base..base + len].fill(self.flags_word(portion.flags));
        }
        words
    }

    fn write_flags(&mut self, gl: &G, portion: usize, flags: EntityFlags) {
        let word = self.flags_word(flags);
        let (base, len) = self.item_range(&self.portions[portion]);
        if let Some(deferred) = self.deferred_flags.as_mut() {
            deferred[base..base + len].fill(word);
            return;
        }
        let (Some(buf), Some(scratch)) = (
            self.buffers.attributes.get(&AttributeSource::Flags),
            self.scratch.as_ref(),
        ) else {
            return;
        };
        scratch.with_words(len, |words| {
            words.fill(word);
            buf.set_data(gl, bytemuck::cast_slice(words), base);
        });
    }

    /// Same bytes repeated over every item of a portion
    fn write_repeated(&self, gl: &G, source: AttributeSource, portion: &Portion, item: &[u8]) {
        let (base, len) = self.item_range(portion);
        let (Some(buf), Some(scratch)) = (self.buffers.attributes.get(&source), self.scratch.as_ref())
        else {
            return;
        };
        scratch.with_bytes(len * item.len(), |bytes| {
            for chunk in bytes.chunks_exact_mut(item.len()) {
                chunk.copy_from_slice(item);
            }
            buf.set_data(gl, bytes, base * item.len());
        });
    }

    fn write_offsets(&self, gl: &G, portion: &Portion) {
        let (base, len) = self.item_range(portion);
        let (Some(buf), Some(scratch)) = (
            self.buffers.attributes.get(&AttributeSource::Offset),
            self.scratch.as_ref(),
        ) else {
            return;
        };
        let offset = portion.offset.as_vec3().to_array();
        scratch.with_floats(len * 3, |floats| {
            for chunk in floats.chunks_exact_mut(3) {
                chunk.copy_from_slice(&offset);
            }
            buf.set_data(gl, bytemuck::cast_slice(floats), base * 3);
        });
    }

    /// Model-space position of a vertex of a portion
    fn portion_model_position(&self, portion: &Portion, local: DVec3) -> DVec3 {
        match self.config.layer_type {
            LayerType::Batching => self.config.origin + local + portion.offset,
            LayerType::Instancing => portion.matrix.transform_point3(local) + portion.offset,
        }
    }

    /// Retained vertex indices of a portion, relative to the shared arrays
    fn portion_indices<'r>(&self, portion: &Portion, retained: &'r RetainedGeometry) -> &'r [u32] {
        match self.config.layer_type {
            LayerType::Batching => retained
                .indices
                .get(portion.indices_base..portion.indices_base + portion.num_indices)
                .unwrap_or(&[]),
            LayerType::Instancing => &retained.indices,
        }
    }

    fn renderer_key(&self, model: &ModelRenderState) -> RendererKey {
        RendererKey {
            layer_type: self.config.layer_type,
            primitive: self.config.primitive,
            sao: model.sao_enabled,
            pbr: self.pbr_supported,
            color_texture: self.color_texture_supported,
            has_normals: self.has_normals,
        }
    }

    fn draw_info(&self, model: &ModelRenderState) -> LayerDrawInfo {
        LayerDrawInfo {
            origin: self.config.origin,
            model_matrix: model.matrix,
            positions_decode_matrix: self.decode_matrix.as_mat4(),
            uv_decode_matrix: self.uv_decode_matrix,
            texture_set: self.config.texture_set.map(|t| t.index),
        }
    }

    /// Program variant for the color passes, falling back to flat shading
    /// when the layer lacks the data a richer one needs
    fn color_technique(&self, ctx: &DrawContext<'_, G>, sao_allowed: bool) -> Technique {
        if !self.config.primitive.is_triangles() {
            return Technique::Color {
                lighting: false,
                sao: false,
            };
        }
        let sao = sao_allowed && ctx.frame.with_sao && ctx.model.sao_enabled;
        if self.pbr_supported && ctx.model.pbr_enabled && ctx.frame.pbr_enabled {
            Technique::Pbr { sao }
        } else if self.color_texture_supported
            && ctx.model.color_texture_enabled
            && ctx.frame.color_texture_enabled
        {
            Technique::ColorTexture { sao }
        } else if self.has_normals {
            Technique::Color {
                lighting: true,
                sao,
            }
        } else {
            Technique::FlatColor { sao }
        }
    }

    /// False, with a trace, when a pass has nothing to draw
    fn gate(&self, pass: &str, skip: bool) -> bool {
        let skip = skip || self.staging.is_some() || self.counts.nothing_visible();
        if skip {
            trace!(target: "layer", "skipping {} pass", pass);
        }
        !skip
    }

    fn draw_pass(
        &mut self,
        ctx: &mut DrawContext<'_, G>,
        technique: Technique,
        render_pass: RenderPass,
        set_culling: bool,
    ) -> Result<()> {
        let gl = ctx.gl;
        if set_culling {
            if self.config.primitive == Primitive::Solid && !ctx.model.backfaces {
                gl.enable(gl::CULL_FACE);
            } else {
                gl.disable(gl::CULL_FACE);
            }
        }
        ctx.frame.texture_unit = 0;
        let key = self.renderer_key(ctx.model);
        let info = self.draw_info(ctx.model);
        let renderer = ctx.renderers.renderer(gl, ctx.scene, &key, technique);
        renderer.draw_layer(
            gl,
            ctx.scene,
            ctx.camera,
            ctx.frame,
            &mut self.buffers,
            &info,
            render_pass,
        )
    }

    fn draw_snap_pass(&mut self, ctx: &mut DrawContext<'_, G>, init: bool) -> Result<()> {
        if !self.gate("snap", false) {
            return Ok(());
        }
        let aabb = self.aabb();
        let linear = DMat4::from_mat3(DMat3::from_mat4(ctx.model.matrix));
        let rtc_aabb = aabb.transformed(&linear);
        let extent = rtc_aabb.min.abs().max(rtc_aabb.max.abs());
        let scale = |e: f64| if e > 0.0 { SNAP_COORDINATE_RANGE / e } else { 1.0 };
        let coordinate_scale = Vec3::new(
            scale(extent.x) as f32,
            scale(extent.y) as f32,
            scale(extent.z) as f32,
        );
        let origin = ctx.model.matrix.transform_point3(self.config.origin);

        let frame = &mut *ctx.frame;
        frame.snap_pick_coordinate_scale = coordinate_scale;
        frame.snap_pick_origin = origin;
        frame.snap_pick_layer_number = frame.snap_pick_layer_params.len() as u32;
        frame.snap_pick_layer_params.push(SnapPickLayerParams {
            origin,
            coordinate_scale,
        });
        self.draw_pass(ctx, Technique::Snap { init }, RenderPass::Pick, false)
    }

    /// Quantize staged data and upload it into `buffers`
    fn upload_staging(
        &mut self,
        gl: &G,
        staging: Staging,
        buffers: &mut LayerBuffers<G>,
    ) -> Result<()> {
        let config = &self.config;
        let instancing = config.layer_type == LayerType::Instancing;

        let positions = if config.positions_decode_matrix.is_some() {
            staging.positions_compressed
        } else {
            let aabb = Aabb::from_positions(&staging.positions);
            self.decode_matrix = positions_decode_matrix(&aabb);
            quantize_positions(&staging.positions, &aabb)
        };
        let num_vertices = positions.len() / 3;

        let array = |data: &[u8], item_size: i32, data_type: u32, usage: u32| {
            ArrayBuf::new(gl, gl::ARRAY_BUFFER, data, item_size, data_type, usage)
        };
        let per_item = |buf: Result<ArrayBuf<G>>| {
            if instancing {
                buf.map(ArrayBuf::per_instance)
            } else {
                buf
            }
        };

        if !positions.is_empty() {
            let buf = array(bytemuck::cast_slice(&positions), 3, gl::UNSIGNED_SHORT, gl::STATIC_DRAW);
            Self::upload(buffers, AttributeSource::Position, buf)?;
        }
        if staging.has_normals {
            let buf = array(bytemuck::cast_slice(&staging.normals), 2, gl::BYTE, gl::STATIC_DRAW)
                .map(ArrayBuf::normalized);
            Self::upload(buffers, AttributeSource::Normal, buf)?;
        }
        if staging.has_uvs {
            let uvs = if config.uv_decode_matrix.is_some() {
                staging.uvs_compressed
            } else {
                let (quantized, decode) = quantize_uvs(&staging.uvs);
                self.uv_decode_matrix = decode;
                quantized
            };
            let buf = array(bytemuck::cast_slice(&uvs), 2, gl::UNSIGNED_SHORT, gl::STATIC_DRAW);
            Self::upload(buffers, AttributeSource::Uv, buf)?;
        }
        let has_metallic_roughness = !staging.metallic_roughness.is_empty();
        if has_metallic_roughness {
            let buf = array(&staging.metallic_roughness, 2, gl::UNSIGNED_BYTE, gl::STATIC_DRAW)
                .map(ArrayBuf::normalized);
            Self::upload(buffers, AttributeSource::MetallicRoughness, per_item(buf))?;
        }
        if !staging.colors.is_empty() {
            let buf = array(&staging.colors, 4, gl::UNSIGNED_BYTE, gl::DYNAMIC_DRAW)
                .map(ArrayBuf::normalized);
            Self::upload(buffers, AttributeSource::Color, per_item(buf))?;
        }
        if !staging.pick_colors.is_empty() {
            let buf = array(&staging.pick_colors, 4, gl::UNSIGNED_BYTE, gl::STATIC_DRAW)
                .map(ArrayBuf::normalized);
            Self::upload(buffers, AttributeSource::PickColor, per_item(buf))?;
        }
        if !staging.offsets.is_empty() {
            let buf = array(bytemuck::cast_slice(&staging.offsets), 3, gl::FLOAT, gl::DYNAMIC_DRAW);
            Self::upload(buffers, AttributeSource::Offset, per_item(buf))?;
        }
        if instancing {
            for i in 0..3u8 {
                let rows = &staging.model_rows[i as usize];
                let buf = array(bytemuck::cast_slice(rows), 4, gl::FLOAT, gl::DYNAMIC_DRAW);
                Self::upload(buffers, AttributeSource::ModelMatrixRow(i), per_item(buf))?;
                if staging.has_normals {
                    let rows = &staging.normal_rows[i as usize];
                    let buf = array(bytemuck::cast_slice(rows), 4, gl::FLOAT, gl::DYNAMIC_DRAW);
                    Self::upload(buffers, AttributeSource::NormalMatrixRow(i), per_item(buf))?;
                }
            }
        }

        let num_items = if instancing {
            self.portions.len()
        } else {
            num_vertices
        };
        let flags = vec![0u32; num_items];
        let buf = array(bytemuck::cast_slice(&flags), 1, gl::UNSIGNED_INT, gl::DYNAMIC_DRAW)
            .map(ArrayBuf::integer);
        Self::upload(buffers, AttributeSource::Flags, per_item(buf))?;

        if !staging.indices.is_empty() {
            buffers.indices = Some(ArrayBuf::new(
                gl,
                gl::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&staging.indices),
                1,
                gl::UNSIGNED_INT,
                gl::STATIC_DRAW,
            )?);
        }
        self.has_edges = match config.primitive {
            Primitive::Points => false,
            Primitive::Lines => true,
            Primitive::Solid | Primitive::Surface => !staging.edge_indices.is_empty(),
        };
        if !staging.edge_indices.is_empty() {
            buffers.edge_indices = Some(ArrayBuf::new(
                gl,
                gl::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&staging.edge_indices),
                1,
                gl::UNSIGNED_INT,
                gl::STATIC_DRAW,
            )?);
        }
        buffers.num_vertices = num_vertices;
        buffers.num_instances = instancing.then_some(self.portions.len());

        if config.retain_geometry {
            self.retained = Some(RetainedGeometry {
                positions,
                indices: staging.indices,
                decode_matrix: self.decode_matrix,
            });
        }

        let texture_set = config.texture_set.unwrap_or_default();
        let textured = config.texture_set.is_some();
        self.has_normals = staging.has_normals;
        self.pbr_supported = textured
            && staging.has_normals
            && staging.has_uvs
            && has_metallic_roughness
            && texture_set.has_color
            && texture_set.has_metallic_roughness;
        self.color_texture_supported = textured && staging.has_uvs && texture_set.has_color;
        if config.uses_uvs && !staging.has_uvs {
            warn!(target: "layer", "layer declared UVs but no portion supplied any");
        }

        debug!(
            target: "layer",
            "finalized {:?}/{:?} layer: {} portions, {} vertices, pbr={}, color_texture={}",
            config.layer_type,
            config.primitive,
            self.portions.len(),
            num_vertices,
            self.pbr_supported,
            self.color_texture_supported
        );
        Ok(())
    }

    fn upload(
        buffers: &mut LayerBuffers<G>,
        source: AttributeSource,
        buf: Result<ArrayBuf<G>>,
    ) -> Result<()> {
        buffers.attributes.insert(source, buf?);
        Ok(())
    }
}

impl<G: GlContext> Layer<G> for VboLayer<G> {
    fn primitive(&self) -> Primitive {
        self.config.primitive
    }

    fn aabb(&mut self) -> Aabb {
        if self.aabb_dirty {
            let mut aabb = Aabb::EMPTY;
            for portion in &self.portions {
                if portion.aabb.is_empty() {
                    continue;
                }
                aabb.expand(portion.aabb.min + portion.offset - self.config.origin);
                aabb.expand(portion.aabb.max + portion.offset - self.config.origin);
            }
            self.aabb = aabb;
            self.aabb_dirty = false;
        }
        self.aabb
    }

    fn num_portions(&self) -> usize {
        self.portions.len()
    }

    fn counts(&self) -> &PortionCounts {
        &self.counts
    }

    fn portion_flags(&self, portion: usize) -> Option<EntityFlags> {
        self.portions.get(portion).map(|p| p.flags)
    }

    fn can_create_portion(&self, num_position_components: usize, num_indices: usize) -> bool {
        match self.config.layer_type {
            LayerType::Instancing => true,
            LayerType::Batching => {
                let max = self.config.max_geometry_batch_size * 3;
                self.num_position_components + num_position_components <= max
                    && self.num_indices + num_indices <= max
            }
        }
    }

    fn create_portion(&mut self, cfg: &PortionCfg<'_>) -> Result<usize> {
        let Some(staging) = self.staging.as_mut() else {
            error!(target: "layer", "portion created after finalize");
            return Err(RenderError::AlreadyFinalized);
        };
        let id = self.portions.len();

        let portion = match self.config.layer_type {
            LayerType::Batching => {
                let geometry = cfg.geometry.as_ref().ok_or_else(|| {
                    RenderError::InvalidConfig("batched portion without geometry".into())
                })?;
                let positions = geometry.num_position_components();
                let indices = geometry.num_layer_indices(self.config.primitive);
                let max = self.config.max_geometry_batch_size * 3;
                if self.num_position_components + positions > max || self.num_indices + indices > max
                {
                    return Err(RenderError::CapacityExceeded { positions, indices });
                }
                let vertex_base = staging.num_vertices;
                let staged = staging.push_geometry(&self.config, geometry, Some(&cfg.matrix))?;
                staging.push_state(&self.config, cfg, staged.num_vertices);
                self.num_position_components += positions;
                self.num_indices += indices;
                Portion {
                    flags: EntityFlags::NONE,
                    vertex_base,
                    num_vertices: staged.num_vertices,
                    indices_base: staged.indices_base,
                    num_indices: staged.num_indices,
                    matrix: DMat4::IDENTITY,
                    offset: DVec3::ZERO,
                    aabb: Aabb {
                        min: staged.aabb.min + self.config.origin,
                        max: staged.aabb.max + self.config.origin,
                    },
                    color: cfg.color,
                }
            }
            LayerType::Instancing => {
                if id == 0 {
                    let geometry = cfg.geometry.as_ref().ok_or_else(|| {
                        RenderError::InvalidConfig("first instance must carry the geometry".into())
                    })?;
                    let staged = staging.push_geometry(&self.config, geometry, None)?;
                    self.num_position_components = geometry.num_position_components();
                    self.num_indices = staged.num_indices;
                    self.geometry_aabb = staged.aabb;
                }
                staging.push_state(&self.config, cfg, 1);
                staging.push_instance_rows(self.config.origin, &cfg.matrix);
                Portion {
                    flags: EntityFlags::NONE,
                    vertex_base: id,
                    num_vertices: self.num_position_components / 3,
                    indices_base: 0,
                    num_indices: self.num_indices,
                    matrix: cfg.matrix,
                    offset: DVec3::ZERO,
                    aabb: self.geometry_aabb.transformed(&cfg.matrix),
                    color: cfg.color,
                }
            }
        };

        self.portions.push(portion);
        self.counts.portions += 1;
        self.aabb_dirty = true;
        Ok(id)
    }

    fn finalize(&mut self, gl: &G) -> Result<()> {
        let Some(staging) = self.staging.take() else {
            error!(target: "layer", "layer finalized twice");
            return Err(RenderError::AlreadyFinalized);
        };
        let mut buffers = LayerBuffers::new(self.config.primitive.gl_mode());
        if let Err(err) = self.upload_staging(gl, staging, &mut buffers) {
            buffers.destroy(gl);
            return Err(err);
        }
        self.buffers = buffers;
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.staging.is_none()
    }

    fn init_flags(&mut self, portion: usize, flags: EntityFlags) -> Result<()> {
        self.require_finalized()?;
        let old = self.portion(portion)?.flags;
        self.portions[portion].flags = flags;
        self.counts.apply(old, flags);
        if self.deferred_flags.is_none() {
            self.deferred_flags = Some(self.packed_flags());
        }
        let word = self.flags_word(flags);
        let (base, len) = self.item_range(&self.portions[portion]);
        if let Some(deferred) = self.deferred_flags.as_mut() {
            deferred[base..base + len].fill(word);
        }
        Ok(())
    }

    fn flush_init_flags(&mut self, gl: &G) -> Result<()> {
        self.require_finalized()?;
        let Some(deferred) = self.deferred_flags.take() else {
            return Ok(());
        };
        if let Some(buf) = self.buffers.attributes.get(&AttributeSource::Flags) {
            buf.set_data(gl, bytemuck::cast_slice(&deferred), 0);
        }
        Ok(())
    }

    fn set_flag(&mut self, gl: &G, portion: usize, flag: EntityFlags, on: bool) -> Result<()> {
        self.require_finalized()?;
        let old = self.portion(portion)?.flags;
        let new = old.with(flag, on);
        if old == new {
            return Ok(());
        }
        self.portions[portion].flags = new;
        self.counts.apply(old, new);
        self.write_flags(gl, portion, new);
        Ok(())
    }

    fn set_glow_through(&mut self, gl: &G, highlighted: bool, selected: bool) -> Result<()> {
        if self.config.highlight_glow_through == highlighted
            && self.config.selected_glow_through == selected
        {
            return Ok(());
        }
        self.config.highlight_glow_through = highlighted;
        self.config.selected_glow_through = selected;
        if self.staging.is_some() {
            return Ok(());
        }
        let words = self.packed_flags();
        let num_words = words.len();
        if let Some(deferred) = self.deferred_flags.as_mut() {
            *deferred = words;
        } else if let Some(buf) = self.buffers.attributes.get(&AttributeSource::Flags) {
            buf.set_data(gl, bytemuck::cast_slice(&words), 0);
        }
        debug!(
            target: "layer",
            "re-packed {} flag words (highlight glow={}, selected glow={})",
            num_words,
            highlighted,
            selected
        );
        Ok(())
    }

    fn set_color(&mut self, gl: &G, portion: usize, color: [u8; 4]) -> Result<()> {
        self.require_finalized()?;
        self.portion(portion)?;
        self.portions[portion].color = color;
        self.write_repeated(gl, AttributeSource::Color, &self.portions[portion], &color);
        Ok(())
    }

    fn set_offset(&mut self, gl: &G, portion: usize, offset: DVec3) -> Result<()> {
        self.require_finalized()?;
        self.portion(portion)?;
        if !self.config.offsets_enabled {
            warn!(target: "layer", "offset ignored, layer created without offsets");
            return Ok(());
        }
        self.portions[portion].offset = offset;
        self.write_offsets(gl, &self.portions[portion]);
        self.aabb_dirty = true;
        Ok(())
    }

    fn set_matrix(&mut self, gl: &G, portion: usize, matrix: DMat4) -> Result<()> {
        self.require_finalized()?;
        self.portion(portion)?;
        if self.config.layer_type != LayerType::Instancing {
            return Err(RenderError::InvalidConfig(
                "batched portions have their transform baked in".into(),
            ));
        }
        let (model_rows, normal_rows) = instance_rows(self.config.origin, &matrix);
        for i in 0..3u8 {
            if let Some(buf) = self.buffers.attributes.get(&AttributeSource::ModelMatrixRow(i)) {
                buf.set_data(gl, bytemuck::cast_slice(&model_rows[i as usize]), portion * 4);
            }
            if let Some(buf) = self.buffers.attributes.get(&AttributeSource::NormalMatrixRow(i)) {
                buf.set_data(gl, bytemuck::cast_slice(&normal_rows[i as usize]), portion * 4);
            }
        }
        let p = &mut self.portions[portion];
        p.matrix = matrix;
        p.aabb = self.geometry_aabb.transformed(&matrix);
        self.aabb_dirty = true;
        Ok(())
    }

    fn get_each_vertex(
        &self,
        portion: usize,
        model_matrix: &DMat4,
        f: &mut dyn FnMut(DVec3),
    ) -> Result<()> {
        let p = self.portion(portion)?;
        let Some(retained) = &self.retained else {
            debug!(target: "layer", "no retained geometry for portion {}", portion);
            return Ok(());
        };
        let range = match self.config.layer_type {
            LayerType::Batching => p.vertex_base..p.vertex_base + p.num_vertices,
            LayerType::Instancing => 0..retained.num_vertices(),
        };
        for i in range {
            if let Some(local) = retained.vertex(i) {
                f(model_matrix.transform_point3(self.portion_model_position(p, local)));
            }
        }
        Ok(())
    }

    fn get_each_index(&self, portion: usize, f: &mut dyn FnMut(u32)) -> Result<()> {
        let p = self.portion(portion)?;
        let Some(retained) = &self.retained else {
            return Ok(());
        };
        let base = match self.config.layer_type {
            LayerType::Batching => p.vertex_base as u32,
            LayerType::Instancing => 0,
        };
        for &i in self.portion_indices(p, retained) {
            f(i - base);
        }
        Ok(())
    }

    fn portion_world_aabb(&self, portion: usize, model_matrix: &DMat4) -> Option<Aabb> {
        let p = self.portions.get(portion)?;
        let shifted = Aabb {
            min: p.aabb.min + p.offset,
            max: p.aabb.max + p.offset,
        };
        Some(shifted.transformed(model_matrix))
    }

    fn precision_ray_pick_surface(
        &self,
        portion: usize,
        model_matrix: &DMat4,
        ray: &Ray,
    ) -> Option<SurfacePick> {
        if !self.config.primitive.is_triangles() {
            return None;
        }
        let p = self.portions.get(portion)?;
        let retained = self.retained.as_ref()?;
        let world_aabb = self.portion_world_aabb(portion, model_matrix)?;
        if !world_aabb.intersects_ray(ray.origin, ray.dir) {
            return None;
        }
        let world = |i: u32| {
            retained
                .vertex(i as usize)
                .map(|local| model_matrix.transform_point3(self.portion_model_position(p, local)))
        };
        let triangles = self
            .portion_indices(p, retained)
            .chunks_exact(3)
            .filter_map(|t| Some([world(t[0])?, world(t[1])?, world(t[2])?]));
        farthest_hit(ray, triangles)
    }

    fn draw_color_opaque(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        let c = self.counts;
        if !self.gate("color opaque", c.transparent == c.portions || c.xrayed == c.portions) {
            return Ok(());
        }
        let technique = self.color_technique(ctx, true);
        self.draw_pass(ctx, technique, RenderPass::ColorOpaque, true)
    }

    fn draw_color_transparent(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        let c = self.counts;
        if !self.gate("color transparent", c.transparent == 0 || c.xrayed == c.portions) {
            return Ok(());
        }
        let technique = self.color_technique(ctx, false);
        self.draw_pass(ctx, technique, RenderPass::ColorTransparent, true)
    }

    fn draw_depth(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        let c = self.counts;
        if !self.gate("depth", c.transparent == c.portions || c.xrayed == c.portions) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::Depth, RenderPass::ColorOpaque, true)
    }

    fn draw_silhouette_xrayed(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("silhouette xrayed", self.counts.xrayed == 0) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::Silhouette, RenderPass::SilhouetteXRayed, true)
    }

    fn draw_silhouette_highlighted(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("silhouette highlighted", self.counts.highlighted == 0) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::Silhouette, RenderPass::SilhouetteHighlighted, true)
    }

    fn draw_silhouette_selected(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("silhouette selected", self.counts.selected == 0) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::Silhouette, RenderPass::SilhouetteSelected, true)
    }

    fn draw_edges_color_opaque(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("edges opaque", !self.has_edges || self.counts.edges == 0) {
            return Ok(());
        }
        let technique = Technique::Edges {
            vertex_colors: self.config.uses_colors,
        };
        self.draw_pass(ctx, technique, RenderPass::EdgesColorOpaque, false)
    }

    fn draw_edges_color_transparent(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        let c = self.counts;
        if !self.gate("edges transparent", !self.has_edges || c.edges == 0 || c.transparent == 0) {
            return Ok(());
        }
        let technique = Technique::Edges {
            vertex_colors: self.config.uses_colors,
        };
        self.draw_pass(ctx, technique, RenderPass::EdgesColorTransparent, false)
    }

    fn draw_edges_xrayed(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("edges xrayed", !self.has_edges || self.counts.xrayed == 0) {
            return Ok(());
        }
        let technique = Technique::Edges {
            vertex_colors: false,
        };
        self.draw_pass(ctx, technique, RenderPass::EdgesXRayed, false)
    }

    fn draw_edges_highlighted(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("edges highlighted", !self.has_edges || self.counts.highlighted == 0) {
            return Ok(());
        }
        let technique = Technique::Edges {
            vertex_colors: false,
        };
        self.draw_pass(ctx, technique, RenderPass::EdgesHighlighted, false)
    }

    fn draw_edges_selected(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("edges selected", !self.has_edges || self.counts.selected == 0) {
            return Ok(());
        }
        let technique = Technique::Edges {
            vertex_colors: false,
        };
        self.draw_pass(ctx, technique, RenderPass::EdgesSelected, false)
    }

    fn draw_occlusion(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        let c = self.counts;
        if !self.gate("occlusion", c.transparent == c.portions || c.xrayed == c.portions) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::Occlusion, RenderPass::ColorOpaque, true)
    }

    fn draw_shadow(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        let c = self.counts;
        if !self.gate("shadow", c.transparent == c.portions || c.xrayed == c.portions) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::Shadow, RenderPass::ColorOpaque, true)
    }

    fn draw_pick_mesh(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("pick mesh", self.counts.pickable == 0) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::PickMesh, RenderPass::Pick, true)
    }

    fn draw_pick_depths(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        if !self.gate("pick depth", self.counts.pickable == 0) {
            return Ok(());
        }
        self.draw_pass(ctx, Technique::PickDepth, RenderPass::Pick, true)
    }

    fn draw_pick_normals(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        let triangles = self.config.primitive.is_triangles();
        if !self.gate("pick normals", !triangles || self.counts.pickable == 0) {
            return Ok(());
        }
        let technique = Technique::PickNormals {
            flat: !self.has_normals,
        };
        self.draw_pass(ctx, technique, RenderPass::Pick, true)
    }

    fn draw_snap_init(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        self.draw_snap_pass(ctx, true)
    }

    fn draw_snap(&mut self, ctx: &mut DrawContext<'_, G>) -> Result<()> {
        self.draw_snap_pass(ctx, false)
    }

    fn destroy(&mut self, gl: &G) {
        self.buffers.destroy(gl);
        self.retained = None;
        self.deferred_flags = None;
        self.scratch = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SceneConfig, TextureSetRef};
    use crate::gl::recording::RecordingContext;
    use crate::renderer::camera::Camera;
    use crate::renderer::render_target::create_rgba_texture;
    use crate::renderer::renderer_cache::RendererCache;
    use crate::scene::{FrameContext, SceneRenderState, TextureSet};

    const QUAD_POSITIONS: [f64; 12] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0];
    const QUAD_NORMALS: [f32; 12] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
    const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];
    const QUAD_UVS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];

    fn quad() -> GeometryCfg<'static> {
        GeometryCfg {
            positions: &QUAD_POSITIONS,
            normals: &QUAD_NORMALS,
            indices: &QUAD_INDICES,
            ..Default::default()
        }
    }

    fn solid_config(layer_type: LayerType) -> LayerConfig {
        LayerConfig {
            uses_normals: true,
            ..LayerConfig::new(Primitive::Solid, layer_type)
        }
    }

    struct Harness {
        gl: RecordingContext,
        scene: SceneRenderState<RecordingContext>,
        renderers: RendererCache<RecordingContext>,
        camera: Camera,
        frame: FrameContext,
        model: ModelRenderState,
    }

    impl Harness {
        fn new() -> Harness {
            Harness {
                gl: RecordingContext::new(),
                scene: SceneRenderState::new(SceneConfig::default()),
                renderers: RendererCache::new(),
                camera: Camera::new(),
                frame: FrameContext::default(),
                model: ModelRenderState::default(),
            }
        }

        fn draw(
            &mut self,
            layer: &mut VboLayer<RecordingContext>,
            pass: fn(&mut VboLayer<RecordingContext>, &mut DrawContext<'_, RecordingContext>) -> Result<()>,
        ) {
            let mut ctx = DrawContext {
                gl: &self.gl,
                scene: &self.scene,
                renderers: &mut self.renderers,
                camera: &self.camera,
                frame: &mut self.frame,
                model: &self.model,
            };
            pass(layer, &mut ctx).unwrap();
        }

        fn technique(&mut self, layer: &VboLayer<RecordingContext>, sao_allowed: bool) -> Technique {
            let ctx = DrawContext {
                gl: &self.gl,
                scene: &self.scene,
                renderers: &mut self.renderers,
                camera: &self.camera,
                frame: &mut self.frame,
                model: &self.model,
            };
            layer.color_technique(&ctx, sao_allowed)
        }

        /// Uniforms of the program an opaque color draw used
        fn opaque_uniforms(&mut self, layer: &mut VboLayer<RecordingContext>) -> Vec<String> {
            self.gl.clear_draws();
            self.draw(layer, VboLayer::draw_color_opaque);
            let draws = self.gl.draws();
            assert_eq!(draws.len(), 1);
            self.gl.program_uniform_names(draws[0].program.unwrap())
        }

        /// Texture set 0 with color and metallic-roughness maps
        fn upload_texture_set(&mut self) -> (u32, u32) {
            let color = create_rgba_texture(&self.gl, 1, 1, &[200, 100, 50, 255]).unwrap();
            let mr = create_rgba_texture(&self.gl, 1, 1, &[0, 128, 255, 255]).unwrap();
            self.scene.texture_sets.push(TextureSet {
                color: Some(color),
                metallic_roughness: Some(mr),
                ..Default::default()
            });
            (color, mr)
        }
    }

    const FULL_SET: TextureSetRef = TextureSetRef {
        index: 0,
        has_color: true,
        has_metallic_roughness: true,
        has_emissive: false,
        has_occlusion: false,
    };

    /// Visible quad layer sampling `set`, with or without UVs and normals
    fn textured_quad(
        gl: &RecordingContext,
        scratch: &ScratchMemory,
        set: TextureSetRef,
        uvs: bool,
        normals: bool,
    ) -> VboLayer<RecordingContext> {
        let config = LayerConfig {
            uses_normals: normals,
            uses_uvs: true,
            uses_metallic_roughness: set.has_metallic_roughness,
            texture_set: Some(set),
            ..LayerConfig::new(Primitive::Solid, LayerType::Batching)
        };
        let mut layer = VboLayer::new(config, scratch);
        layer
            .create_portion(&PortionCfg {
                geometry: Some(GeometryCfg {
                    positions: &QUAD_POSITIONS,
                    normals: if normals { &QUAD_NORMALS } else { &[] },
                    uvs: if uvs { &QUAD_UVS } else { &[] },
                    indices: &QUAD_INDICES,
                    ..Default::default()
                }),
                metallic_roughness: [255, 128],
                ..Default::default()
            })
            .unwrap();
        layer.finalize(gl).unwrap();
        layer.init_flags(0, EntityFlags::VISIBLE).unwrap();
        layer.flush_init_flags(gl).unwrap();
        layer
    }

    fn flag_words(gl: &RecordingContext, layer: &VboLayer<RecordingContext>) -> Vec<u32> {
        let id = layer.buffers.attributes[&AttributeSource::Flags].buffer;
        gl.buffer_bytes(id)
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn finalized_quad(gl: &RecordingContext, scratch: &ScratchMemory) -> VboLayer<RecordingContext> {
        let mut layer = VboLayer::new(solid_config(LayerType::Batching), scratch);
        layer
            .create_portion(&PortionCfg {
                geometry: Some(quad()),
                ..Default::default()
            })
            .unwrap();
        layer.finalize(gl).unwrap();
        layer
    }

    #[test]
    fn test_capacity_boundary() {
        let scratch = ScratchMemory::new();
        let mut config = solid_config(LayerType::Batching);
        config.max_geometry_batch_size = 8;
        let mut layer: VboLayer<RecordingContext> = VboLayer::new(config, &scratch);
        let cfg = PortionCfg {
            geometry: Some(quad()),
            ..Default::default()
        };
        assert!(layer.can_create_portion(12, 6));
        layer.create_portion(&cfg).unwrap();
        layer.create_portion(&cfg).unwrap();
        assert!(!layer.can_create_portion(12, 6));
        assert!(matches!(
            layer.create_portion(&cfg),
            Err(RenderError::CapacityExceeded { positions: 12, indices: 6 })
        ));
        assert_eq!(layer.num_portions(), 2);
    }

    #[test]
    fn test_finalize_guards() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer: VboLayer<RecordingContext> =
            VboLayer::new(solid_config(LayerType::Batching), &scratch);
        layer
            .create_portion(&PortionCfg {
                geometry: Some(quad()),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            layer.set_flag(&gl, 0, EntityFlags::VISIBLE, true),
            Err(RenderError::NotFinalized)
        ));
        layer.finalize(&gl).unwrap();
        assert!(layer.is_finalized());
        assert!(matches!(layer.finalize(&gl), Err(RenderError::AlreadyFinalized)));
        assert!(matches!(
            layer.create_portion(&PortionCfg::default()),
            Err(RenderError::AlreadyFinalized)
        ));
        assert!(matches!(
            layer.set_flag(&gl, 5, EntityFlags::VISIBLE, true),
            Err(RenderError::UnknownPortion(5))
        ));
    }

    #[test]
    fn test_counts_track_flag_changes() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer: VboLayer<RecordingContext> =
            VboLayer::new(solid_config(LayerType::Batching), &scratch);
        for _ in 0..5 {
            layer
                .create_portion(&PortionCfg {
                    geometry: Some(quad()),
                    ..Default::default()
                })
                .unwrap();
        }
        layer.finalize(&gl).unwrap();

        let all = [
            EntityFlags::VISIBLE,
            EntityFlags::CULLED,
            EntityFlags::PICKABLE,
            EntityFlags::CLIPPABLE,
            EntityFlags::XRAYED,
            EntityFlags::HIGHLIGHTED,
            EntityFlags::SELECTED,
            EntityFlags::EDGES,
            EntityFlags::TRANSPARENT,
        ];
        // Deterministic pseudo-random walk over portions and flags
        let mut seed: u32 = 12345;
        for _ in 0..200 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let portion = (seed >> 8) as usize % 5;
            let flag = all[(seed >> 16) as usize % all.len()];
            let on = (seed >> 4) & 1 == 1;
            layer.set_flag(&gl, portion, flag, on).unwrap();

            let flags: Vec<EntityFlags> = layer.portions.iter().map(|p| p.flags).collect();
            assert_eq!(*layer.counts(), PortionCounts::from_flags(&flags));
        }
    }

    #[test]
    fn test_far_origin_keeps_precision() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let origin = DVec3::new(1.0e6, -2.0e6, 5.0e5);
        let mut config = solid_config(LayerType::Batching);
        config.origin = origin;
        let mut layer: VboLayer<RecordingContext> = VboLayer::new(config, &scratch);
        let positions: Vec<f64> = QUAD_POSITIONS
            .chunks_exact(3)
            .flat_map(|p| [p[0] + origin.x, p[1] + origin.y, p[2] + origin.z])
            .collect();
        layer
            .create_portion(&PortionCfg {
                geometry: Some(GeometryCfg {
                    positions: &positions,
                    indices: &QUAD_INDICES,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        layer.finalize(&gl).unwrap();

        let mut out = Vec::new();
        layer
            .get_each_vertex(0, &DMat4::IDENTITY, &mut |p| out.push(p))
            .unwrap();
        assert_eq!(out.len(), 4);
        for (p, expected) in out.iter().zip(positions.chunks_exact(3)) {
            let expected = DVec3::new(expected[0], expected[1], expected[2]);
            assert!((*p - expected).length() < 1e-3);
        }

        let mut indices = Vec::new();
        layer.get_each_index(0, &mut |i| indices.push(i)).unwrap();
        assert_eq!(indices, QUAD_INDICES);
    }

    #[test]
    fn test_quad_draws_one_opaque_pass() {
        let mut h = Harness::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&h.gl, &scratch);
        layer
            .init_flags(0, EntityFlags::VISIBLE.with(EntityFlags::PICKABLE, true))
            .unwrap();
        layer.flush_init_flags(&h.gl).unwrap();

        h.draw(&mut layer, VboLayer::draw_color_opaque);
        let draws = h.gl.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].mode, gl::TRIANGLES);
        assert_eq!(draws[0].count, 6);
        assert_eq!(draws[0].render_pass, Some(RenderPass::ColorOpaque as i32));
        assert!(draws[0].cull_face);
        assert_eq!(h.frame.draw_elements, 1);

        h.gl.clear_draws();
        h.draw(&mut layer, VboLayer::draw_pick_mesh);
        let draws = h.gl.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].render_pass, Some(RenderPass::Pick as i32));
        assert_eq!(draws[0].count, 6);

        h.gl.clear_draws();
        h.draw(&mut layer, VboLayer::draw_color_transparent);
        h.draw(&mut layer, VboLayer::draw_silhouette_selected);
        assert_eq!(h.gl.draw_count(), 0);

        layer.set_transparent(&h.gl, 0, true).unwrap();
        h.draw(&mut layer, VboLayer::draw_color_opaque);
        assert_eq!(h.gl.draw_count(), 0);
        h.draw(&mut layer, VboLayer::draw_color_transparent);
        assert_eq!(h.gl.draw_count(), 1);

        h.gl.clear_draws();
        layer.set_xrayed(&h.gl, 0, true).unwrap();
        h.draw(&mut layer, VboLayer::draw_color_transparent);
        assert_eq!(h.gl.draw_count(), 0);
        h.draw(&mut layer, VboLayer::draw_silhouette_xrayed);
        assert_eq!(h.gl.draw_count(), 1);
    }

    #[test]
    fn test_invisible_layer_draws_nothing() {
        let mut h = Harness::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&h.gl, &scratch);
        layer.init_flags(0, EntityFlags::PICKABLE).unwrap();
        layer.flush_init_flags(&h.gl).unwrap();
        h.draw(&mut layer, VboLayer::draw_color_opaque);
        h.draw(&mut layer, VboLayer::draw_pick_mesh);
        h.draw(&mut layer, VboLayer::draw_depth);
        assert_eq!(h.gl.draw_count(), 0);
    }

    #[test]
    fn test_backfaces_disable_culling() {
        let mut h = Harness::new();
        h.model.backfaces = true;
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&h.gl, &scratch);
        layer.init_flags(0, EntityFlags::VISIBLE).unwrap();
        layer.flush_init_flags(&h.gl).unwrap();
        h.draw(&mut layer, VboLayer::draw_color_opaque);
        assert!(!h.gl.draws()[0].cull_face);
    }

    #[test]
    fn test_flags_word_written_per_vertex() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&gl, &scratch);
        layer.init_flags(0, EntityFlags::NONE).unwrap();
        layer.flush_init_flags(&gl).unwrap();
        layer.set_visible(&gl, 0, true).unwrap();

        let expected = layer.flags_word(EntityFlags::VISIBLE);
        assert_ne!(expected, 0);
        assert_eq!(flag_words(&gl, &layer), vec![expected; 4]);
    }

    #[test]
    fn test_init_flags_flush_once() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer: VboLayer<RecordingContext> =
            VboLayer::new(solid_config(LayerType::Batching), &scratch);
        for _ in 0..3 {
            layer
                .create_portion(&PortionCfg {
                    geometry: Some(quad()),
                    ..Default::default()
                })
                .unwrap();
        }
        layer.finalize(&gl).unwrap();
        let before = gl.state.borrow().buffer_sub_data_calls;
        for portion in 0..3 {
            layer
                .init_flags(portion, EntityFlags::VISIBLE.with(EntityFlags::PICKABLE, true))
                .unwrap();
        }
        assert_eq!(gl.state.borrow().buffer_sub_data_calls, before);
        layer.flush_init_flags(&gl).unwrap();
        assert_eq!(gl.state.borrow().buffer_sub_data_calls, before + 1);
        assert_eq!(layer.counts().visible, 3);
        assert_eq!(layer.counts().pickable, 3);
    }

    #[test]
    fn test_precise_pick_hits_quad() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let layer = finalized_quad(&gl, &scratch);

        let ray = Ray::new(DVec3::new(0.5, 0.5, 10.0), DVec3::NEG_Z);
        let hit = layer
            .precision_ray_pick_surface(0, &DMat4::IDENTITY, &ray)
            .unwrap();
        assert!((hit.world_pos - DVec3::new(0.5, 0.5, 0.0)).length() < 1e-3);
        assert!((hit.world_normal - DVec3::Z).length() < 1e-6);

        let miss = Ray::new(DVec3::new(5.0, 5.0, 10.0), DVec3::NEG_Z);
        assert!(layer
            .precision_ray_pick_surface(0, &DMat4::IDENTITY, &miss)
            .is_none());
    }

    #[test]
    fn test_instances_share_geometry() {
        let mut h = Harness::new();
        let scratch = ScratchMemory::new();
        let mut layer = VboLayer::new(solid_config(LayerType::Instancing), &scratch);
        layer
            .create_portion(&PortionCfg {
                geometry: Some(quad()),
                ..Default::default()
            })
            .unwrap();
        layer
            .create_portion(&PortionCfg {
                matrix: DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0)),
                ..Default::default()
            })
            .unwrap();
        layer.finalize(&h.gl).unwrap();
        for portion in 0..2 {
            layer.init_flags(portion, EntityFlags::VISIBLE).unwrap();
        }
        layer.flush_init_flags(&h.gl).unwrap();

        h.draw(&mut layer, VboLayer::draw_color_opaque);
        let draws = h.gl.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].instances, 2);

        let ray = Ray::new(DVec3::new(10.5, 0.5, 10.0), DVec3::NEG_Z);
        assert!(layer
            .precision_ray_pick_surface(1, &DMat4::IDENTITY, &ray)
            .is_some());

        layer
            .set_matrix(&h.gl, 1, DMat4::from_translation(DVec3::new(0.0, 20.0, 0.0)))
            .unwrap();
        assert!(layer
            .precision_ray_pick_surface(1, &DMat4::IDENTITY, &ray)
            .is_none());
        let moved = Ray::new(DVec3::new(0.5, 20.5, 10.0), DVec3::NEG_Z);
        assert!(layer
            .precision_ray_pick_surface(1, &DMat4::IDENTITY, &moved)
            .is_some());
        assert!((layer.aabb().max.y - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_instancing_needs_geometry_first() {
        let scratch = ScratchMemory::new();
        let mut layer: VboLayer<RecordingContext> =
            VboLayer::new(solid_config(LayerType::Instancing), &scratch);
        assert!(matches!(
            layer.create_portion(&PortionCfg::default()),
            Err(RenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_batched_matrix_is_fixed() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&gl, &scratch);
        assert!(matches!(
            layer.set_matrix(&gl, 0, DMat4::IDENTITY),
            Err(RenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_snap_pass_registers_layer_params() {
        let mut h = Harness::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&h.gl, &scratch);
        layer.init_flags(0, EntityFlags::VISIBLE).unwrap();
        layer.flush_init_flags(&h.gl).unwrap();

        h.draw(&mut layer, VboLayer::draw_snap_init);
        h.draw(&mut layer, VboLayer::draw_snap);
        assert_eq!(h.frame.snap_pick_layer_params.len(), 2);
        assert_eq!(h.frame.snap_pick_layer_number, 1);
        let params = h.frame.snap_pick_layer_params[0];
        assert!((params.coordinate_scale.x - 1.0e7).abs() < 1.0);
        assert_eq!(params.origin, DVec3::ZERO);
    }

    #[test]
    fn test_destroy_releases_scratch() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&gl, &scratch);
        assert_eq!(scratch.users(), 1);
        layer.destroy(&gl);
        assert_eq!(scratch.users(), 0);
    }

    #[test]
    fn test_textured_layer_falls_back_by_frame_switches() {
        let mut h = Harness::new();
        let (color, mr) = h.upload_texture_set();
        let scratch = ScratchMemory::new();
        let mut layer = textured_quad(&h.gl, &scratch, FULL_SET, true, true);
        assert!(layer.pbr_supported());
        assert!(layer.color_texture_supported());

        h.model.pbr_enabled = true;
        h.frame.pbr_enabled = true;
        h.frame.color_texture_enabled = true;
        assert_eq!(h.technique(&layer, true), Technique::Pbr { sao: false });
        let uniforms = h.opaque_uniforms(&mut layer);
        assert!(uniforms.iter().any(|u| u == "uMetallicRoughMap"));
        let binds = h.gl.state.borrow().texture_binds.clone();
        assert!(binds.iter().any(|(_, t)| *t == color));
        assert!(binds.iter().any(|(_, t)| *t == mr));

        h.frame.pbr_enabled = false;
        assert_eq!(h.technique(&layer, true), Technique::ColorTexture { sao: false });
        let uniforms = h.opaque_uniforms(&mut layer);
        assert!(uniforms.iter().any(|u| u == "uColorMap"));
        assert!(!uniforms.iter().any(|u| u == "uMetallicRoughMap"));

        h.frame.color_texture_enabled = false;
        assert_eq!(
            h.technique(&layer, true),
            Technique::Color {
                lighting: true,
                sao: false
            }
        );
        let uniforms = h.opaque_uniforms(&mut layer);
        assert!(!uniforms.iter().any(|u| u == "uColorMap"));
    }

    #[test]
    fn test_missing_layer_data_limits_technique() {
        let mut h = Harness::new();
        h.upload_texture_set();
        h.model.pbr_enabled = true;
        h.frame.pbr_enabled = true;
        h.frame.color_texture_enabled = true;
        let scratch = ScratchMemory::new();

        // Color map only
        let color_only = TextureSetRef {
            has_metallic_roughness: false,
            ..FULL_SET
        };
        let mut layer = textured_quad(&h.gl, &scratch, color_only, true, true);
        assert!(!layer.pbr_supported());
        assert!(layer.color_texture_supported());
        assert_eq!(h.technique(&layer, true), Technique::ColorTexture { sao: false });
        let uniforms = h.opaque_uniforms(&mut layer);
        assert!(uniforms.iter().any(|u| u == "uColorMap"));
        assert!(!uniforms.iter().any(|u| u == "uMetallicRoughMap"));

        // No UVs: lit color
        let layer = textured_quad(&h.gl, &scratch, FULL_SET, false, true);
        assert!(!layer.pbr_supported());
        assert!(!layer.color_texture_supported());
        assert_eq!(
            h.technique(&layer, true),
            Technique::Color {
                lighting: true,
                sao: false
            }
        );

        // No normals: PBR is out, and flat color once textures are off
        let mut layer = textured_quad(&h.gl, &scratch, FULL_SET, true, false);
        assert!(!layer.pbr_supported());
        assert!(layer.color_texture_supported());
        assert_eq!(h.technique(&layer, true), Technique::ColorTexture { sao: false });
        h.frame.color_texture_enabled = false;
        assert_eq!(h.technique(&layer, true), Technique::FlatColor { sao: false });
        h.opaque_uniforms(&mut layer);

        // Untextured layer
        let layer = finalized_quad(&h.gl, &scratch);
        assert!(!layer.pbr_supported());
        assert!(!layer.color_texture_supported());
    }

    #[test]
    fn test_sao_needs_frame_model_and_opaque_pass() {
        let mut h = Harness::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&h.gl, &scratch);
        layer.init_flags(0, EntityFlags::VISIBLE).unwrap();
        layer.flush_init_flags(&h.gl).unwrap();
        let lit = |sao| Technique::Color { lighting: true, sao };

        assert_eq!(h.technique(&layer, true), lit(false));
        h.frame.with_sao = true;
        assert_eq!(h.technique(&layer, true), lit(true));
        let uniforms = h.opaque_uniforms(&mut layer);
        assert!(uniforms.iter().any(|u| u == "uOcclusionTexture"));
        // Transparent draws never sample occlusion
        assert_eq!(h.technique(&layer, false), lit(false));

        h.model.sao_enabled = false;
        assert_eq!(h.technique(&layer, true), lit(false));
        let uniforms = h.opaque_uniforms(&mut layer);
        assert!(!uniforms.iter().any(|u| u == "uOcclusionTexture"));
    }

    #[test]
    fn test_reinit_keeps_other_portion_flags() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer: VboLayer<RecordingContext> =
            VboLayer::new(solid_config(LayerType::Batching), &scratch);
        for _ in 0..2 {
            layer
                .create_portion(&PortionCfg {
                    geometry: Some(quad()),
                    ..Default::default()
                })
                .unwrap();
        }
        layer.finalize(&gl).unwrap();
        for portion in 0..2 {
            layer.init_flags(portion, EntityFlags::VISIBLE).unwrap();
        }
        layer.flush_init_flags(&gl).unwrap();

        let selected = EntityFlags::VISIBLE.with(EntityFlags::SELECTED, true);
        layer.init_flags(0, selected).unwrap();
        layer.flush_init_flags(&gl).unwrap();

        let words = flag_words(&gl, &layer);
        assert_eq!(words[..4], [layer.flags_word(selected); 4]);
        assert_eq!(words[4..], [layer.flags_word(EntityFlags::VISIBLE); 4]);
        assert_eq!(layer.counts().visible, 2);
        assert_eq!(layer.counts().selected, 1);
    }

    #[test]
    fn test_glow_through_repacks_words() {
        let gl = RecordingContext::new();
        let scratch = ScratchMemory::new();
        let mut layer = finalized_quad(&gl, &scratch);
        let selected = EntityFlags::VISIBLE.with(EntityFlags::SELECTED, true);
        layer.init_flags(0, selected).unwrap();
        layer.flush_init_flags(&gl).unwrap();
        let glowing = flag_words(&gl, &layer);

        layer.set_glow_through(&gl, true, false).unwrap();
        let hidden = flag_words(&gl, &layer);
        assert_ne!(glowing, hidden);
        assert_eq!(hidden, vec![layer.flags_word(selected); 4]);

        layer.set_glow_through(&gl, true, true).unwrap();
        assert_eq!(flag_words(&gl, &layer), glowing);
    }

    #[test]
    fn test_quantized_positions_reject_mesh_matrix() {
        let scratch = ScratchMemory::new();
        let mut config = solid_config(LayerType::Batching);
        config.positions_decode_matrix = Some(glam::Mat4::IDENTITY);
        let mut layer: VboLayer<RecordingContext> = VboLayer::new(config, &scratch);
        let quantized: [u16; 12] = [0, 0, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0];
        let geometry = GeometryCfg {
            positions_compressed: &quantized,
            indices: &QUAD_INDICES,
            ..Default::default()
        };
        assert!(matches!(
            layer.create_portion(&PortionCfg {
                geometry: Some(geometry.clone()),
                matrix: DMat4::from_translation(DVec3::X),
                ..Default::default()
            }),
            Err(RenderError::InvalidConfig(_))
        ));
        assert_eq!(layer.num_portions(), 0);
        layer
            .create_portion(&PortionCfg {
                geometry: Some(geometry),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(layer.num_portions(), 1);
    }

    #[test]
    fn test_index_slots_follow_staged_indices() {
        let scratch = ScratchMemory::new();
        let unindexed = GeometryCfg {
            positions: &QUAD_POSITIONS,
            ..Default::default()
        };
        for (primitive, expected) in [(Primitive::Lines, 4), (Primitive::Points, 0)] {
            let mut layer: VboLayer<RecordingContext> =
                VboLayer::new(LayerConfig::new(primitive, LayerType::Batching), &scratch);
            layer
                .create_portion(&PortionCfg {
                    geometry: Some(unindexed.clone()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(layer.portions[0].num_indices, expected);
            assert_eq!(layer.num_indices, expected);
        }
    }
}
