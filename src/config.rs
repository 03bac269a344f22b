//! Layer, model and scene configuration.
//!
//! Model and scene configs are deserialized from JSON at the wasm boundary;
//! every field has a default so partial documents are accepted.

use crate::gl;
use glam::{DVec3, Mat3, Mat4};
use serde::Deserialize;

/// Default vertex budget of a batching layer
pub const DEFAULT_MAX_GEOMETRY_BATCH_SIZE: usize = 1 << 21;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Points,
    Lines,
    /// Closed triangle mesh, back faces may be culled
    Solid,
    /// Open triangle mesh
    Surface,
}

impl Primitive {
    pub fn is_triangles(self) -> bool {
        matches!(self, Primitive::Solid | Primitive::Surface)
    }

    pub fn gl_mode(self) -> u32 {
        match self {
            Primitive::Points => gl::POINTS,
            Primitive::Lines => gl::LINES,
            Primitive::Solid | Primitive::Surface => gl::TRIANGLES,
        }
    }
}

impl std::str::FromStr for Primitive {
    type Err = crate::error::RenderError;

    fn from_str(s: &str) -> crate::error::Result<Primitive> {
        match s {
            "points" => Ok(Primitive::Points),
            "lines" => Ok(Primitive::Lines),
            "solid" | "triangles" => Ok(Primitive::Solid),
            "surface" => Ok(Primitive::Surface),
            other => Err(crate::error::RenderError::InvalidConfig(format!(
                "unknown primitive '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerType {
    Batching,
    Instancing,
}

/// Texture set a layer samples from, with which maps it carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureSetRef {
    pub index: usize,
    pub has_color: bool,
    pub has_metallic_roughness: bool,
    pub has_emissive: bool,
    pub has_occlusion: bool,
}

/// Per-layer configuration, fixed at layer creation
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub primitive: Primitive,
    pub layer_type: LayerType,
    /// RTC origin; positions are stored relative to it
    pub origin: DVec3,
    pub max_geometry_batch_size: usize,
    /// Set when positions arrive pre-quantized
    pub positions_decode_matrix: Option<Mat4>,
    /// Set when UVs arrive pre-quantized
    pub uv_decode_matrix: Option<Mat3>,
    pub uses_normals: bool,
    pub uses_uvs: bool,
    pub uses_colors: bool,
    pub uses_metallic_roughness: bool,
    pub retain_geometry: bool,
    pub offsets_enabled: bool,
    pub texture_set: Option<TextureSetRef>,
    pub highlight_glow_through: bool,
    pub selected_glow_through: bool,
}

impl LayerConfig {
    pub fn new(primitive: Primitive, layer_type: LayerType) -> LayerConfig {
        LayerConfig {
            primitive,
            layer_type,
            origin: DVec3::ZERO,
            max_geometry_batch_size: DEFAULT_MAX_GEOMETRY_BATCH_SIZE,
            positions_decode_matrix: None,
            uv_decode_matrix: None,
            uses_normals: false,
            uses_uvs: false,
            uses_colors: false,
            uses_metallic_roughness: false,
            retain_geometry: true,
            offsets_enabled: false,
            texture_set: None,
            highlight_glow_through: true,
            selected_glow_through: true,
        }
    }
}

/// Per-model configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub position: [f64; 3],
    /// Euler angles in degrees, applied X then Y then Z
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
    pub backfaces: bool,
    pub sao_enabled: bool,
    pub pbr_enabled: bool,
    pub color_texture_enabled: bool,
    pub edges: bool,
    pub retain_geometry: bool,
    pub offsets_enabled: bool,
    pub max_geometry_batch_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
            backfaces: false,
            sao_enabled: true,
            pbr_enabled: false,
            color_texture_enabled: true,
            edges: false,
            retain_geometry: true,
            offsets_enabled: false,
            max_geometry_batch_size: DEFAULT_MAX_GEOMETRY_BATCH_SIZE,
        }
    }
}

/// World-space clipping plane; geometry on the side the direction points to
/// is discarded
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SectionPlane {
    pub pos: [f64; 3],
    pub dir: [f32; 3],
    pub active: bool,
}

impl Default for SectionPlane {
    fn default() -> Self {
        SectionPlane {
            pos: [0.0; 3],
            dir: [0.0, 0.0, -1.0],
            active: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightSpace {
    View,
    World,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Light {
    Directional {
        dir: [f32; 3],
        color: [f32; 3],
        intensity: f32,
        space: LightSpace,
    },
    Point {
        pos: [f64; 3],
        color: [f32; 3],
        intensity: f32,
        space: LightSpace,
        /// Constant, linear and quadratic attenuation
        attenuation: [f32; 3],
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LightsConfig {
    pub ambient_color: [f32; 3],
    pub ambient_intensity: f32,
    pub lights: Vec<Light>,
    /// Scene has an irradiance cube map for PBR; follows the uploaded map
    pub light_map: bool,
    /// Scene has a reflection cube map for PBR; follows the uploaded map
    pub reflection_map: bool,
}

impl Default for LightsConfig {
    fn default() -> Self {
        LightsConfig {
            ambient_color: [0.7, 0.7, 0.8],
            ambient_intensity: 1.0,
            lights: vec![
                Light::Directional {
                    dir: [0.8, -0.5, -0.5],
                    color: [0.8, 0.8, 1.0],
                    intensity: 1.0,
                    space: LightSpace::View,
                },
                Light::Directional {
                    dir: [-0.8, -1.0, 0.5],
                    color: [1.0, 1.0, 0.9],
                    intensity: 1.0,
                    space: LightSpace::View,
                },
            ],
            light_map: false,
            reflection_map: false,
        }
    }
}

impl LightsConfig {
    /// Shape of the light setup; programs are rebuilt when it changes
    pub fn hash(&self) -> String {
        let mut hash = String::from("L");
        for light in &self.lights {
            hash.push_str(match light {
                Light::Directional {
                    space: LightSpace::View,
                    ..
                } => "dv",
                Light::Directional { .. } => "dw",
                Light::Point {
                    space: LightSpace::View,
                    ..
                } => "pv",
                Light::Point { .. } => "pw",
            });
        }
        if self.light_map {
            hash.push_str("-lm");
        }
        if self.reflection_map {
            hash.push_str("-rm");
        }
        hash
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SaoConfig {
    pub enabled: bool,
    pub blend_cutoff: f32,
    pub blend_factor: f32,
}

impl Default for SaoConfig {
    fn default() -> Self {
        SaoConfig {
            enabled: false,
            blend_cutoff: 0.3,
            blend_factor: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PointsMaterial {
    pub point_size: f32,
    pub round_points: bool,
    pub perspective_points: bool,
    pub min_perspective_point_size: f32,
    pub max_perspective_point_size: f32,
    pub filter_intensity: bool,
    pub min_intensity: f32,
    pub max_intensity: f32,
}

impl Default for PointsMaterial {
    fn default() -> Self {
        PointsMaterial {
            point_size: 2.0,
            round_points: true,
            perspective_points: true,
            min_perspective_point_size: 1.0,
            max_perspective_point_size: 6.0,
            filter_intensity: false,
            min_intensity: 0.0,
            max_intensity: 1.0,
        }
    }
}

impl PointsMaterial {
    /// Only the statically compiled switches take part
    pub fn hash(&self) -> String {
        format!(
            "{};{};{}",
            self.round_points, self.perspective_points, self.filter_intensity
        )
    }
}

/// Fill and edge appearance of an emphasis state
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmphasisMaterial {
    pub fill: bool,
    pub fill_color: [f32; 3],
    pub fill_alpha: f32,
    pub edges: bool,
    pub edge_color: [f32; 3],
    pub edge_alpha: f32,
    pub glow_through: bool,
}

impl Default for EmphasisMaterial {
    fn default() -> Self {
        EmphasisMaterial {
            fill: true,
            fill_color: [1.0, 1.0, 0.0],
            fill_alpha: 0.2,
            edges: true,
            edge_color: [1.0, 1.0, 0.0],
            edge_alpha: 0.5,
            glow_through: true,
        }
    }
}

impl EmphasisMaterial {
    fn with_colors(fill: [f32; 3], fill_alpha: f32, edge: [f32; 3], edge_alpha: f32) -> Self {
        EmphasisMaterial {
            fill_color: fill,
            fill_alpha,
            edge_color: edge,
            edge_alpha,
            ..EmphasisMaterial::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EdgeMaterial {
    pub edge_color: [f32; 3],
    pub edge_alpha: f32,
    pub edge_width: f32,
}

impl Default for EdgeMaterial {
    fn default() -> Self {
        EdgeMaterial {
            edge_color: [0.0, 0.0, 0.0],
            edge_alpha: 1.0,
            edge_width: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrossSections {
    pub slice_thickness: f32,
    pub slice_color: [f32; 4],
}

impl Default for CrossSections {
    fn default() -> Self {
        CrossSections {
            slice_thickness: 0.0,
            slice_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Scene-wide render configuration consumed by layers and renderers
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub section_planes: Vec<SectionPlane>,
    pub lights: LightsConfig,
    pub sao: SaoConfig,
    pub points_material: PointsMaterial,
    pub highlight_material: EmphasisMaterial,
    pub selected_material: EmphasisMaterial,
    pub xray_material: EmphasisMaterial,
    pub edge_material: EdgeMaterial,
    pub cross_sections: CrossSections,
    pub gamma_output: bool,
    pub gamma_factor: f32,
    pub logarithmic_depth_buffer_enabled: bool,
    pub pick_surface_precision_enabled: bool,
    pub pbr_enabled: bool,
    pub color_texture_enabled: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            section_planes: Vec::new(),
            lights: LightsConfig::default(),
            sao: SaoConfig::default(),
            points_material: PointsMaterial::default(),
            highlight_material: EmphasisMaterial::with_colors(
                [1.0, 1.0, 0.0],
                0.2,
                [1.0, 1.0, 0.0],
                0.5,
            ),
            selected_material: EmphasisMaterial::with_colors(
                [0.0, 1.0, 0.0],
                0.2,
                [0.0, 1.0, 0.0],
                0.5,
            ),
            xray_material: EmphasisMaterial {
                glow_through: false,
                ..EmphasisMaterial::with_colors([0.9, 0.7, 0.6], 0.4, [0.5, 0.4, 0.4], 0.2)
            },
            edge_material: EdgeMaterial::default(),
            cross_sections: CrossSections::default(),
            gamma_output: false,
            gamma_factor: 2.2,
            logarithmic_depth_buffer_enabled: false,
            pick_surface_precision_enabled: false,
            pbr_enabled: false,
            color_texture_enabled: true,
        }
    }
}

impl SceneConfig {
    pub fn from_json(json: &str) -> crate::error::Result<SceneConfig> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn section_plane_count(&self) -> usize {
        self.section_planes.len()
    }
}

impl ModelConfig {
    pub fn from_json(json: &str) -> crate::error::Result<ModelConfig> {
        Ok(serde_json::from_str(json)?)
    }
}
