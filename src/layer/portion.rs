use crate::config::Primitive;
use crate::layer::flags::EntityFlags;
use crate::layer::geometry::{decompress_position, Aabb};
use glam::{DMat4, DVec3};

/// Mesh geometry handed to a layer. Positions are model-space and either
/// float or pre-quantized against the layer's decode matrix.
#[derive(Clone, Debug, Default)]
pub struct GeometryCfg<'a> {
    pub positions: &'a [f64],
    pub positions_compressed: &'a [u16],
    pub normals: &'a [f32],
    /// Octahedral-encoded, two snorm bytes per vertex
    pub normals_compressed: &'a [i8],
    /// Per-vertex RGBA; overrides the portion color when present
    pub colors: &'a [u8],
    pub uvs: &'a [f32],
    pub uvs_compressed: &'a [u16],
    pub indices: &'a [u32],
    /// Built from the triangles when empty
    pub edge_indices: &'a [u32],
}

impl GeometryCfg<'_> {
    pub fn num_vertices(&self) -> usize {
        if self.positions_compressed.is_empty() {
            self.positions.len() / 3
        } else {
            self.positions_compressed.len() / 3
        }
    }

    pub fn num_position_components(&self) -> usize {
        self.num_vertices() * 3
    }

    /// Index slots taken in a layer of `primitive`. Points are drawn without
    /// indices; unindexed lines and triangles get one index per vertex.
    pub fn num_layer_indices(&self, primitive: Primitive) -> usize {
        match primitive {
            Primitive::Points => 0,
            _ if self.indices.is_empty() => self.num_vertices(),
            _ => self.indices.len(),
        }
    }
}

/// One mesh to place in a layer
#[derive(Clone, Debug)]
pub struct PortionCfg<'a> {
    /// Required for batching layers; an instancing layer takes it from its
    /// first portion and ignores it afterwards
    pub geometry: Option<GeometryCfg<'a>>,
    /// Mesh transform; baked into positions when batching
    pub matrix: DMat4,
    /// RGB plus opacity
    pub color: [u8; 4],
    pub metallic_roughness: [u8; 2],
    pub pick_color: [u8; 4],
}

impl Default for PortionCfg<'_> {
    fn default() -> Self {
        PortionCfg {
            geometry: None,
            matrix: DMat4::IDENTITY,
            color: [255, 255, 255, 255],
            metallic_roughness: [0, 255],
            pick_color: [0, 0, 0, 0],
        }
    }
}

/// A mesh's slice of its layer's shared buffers
#[derive(Clone, Debug)]
pub struct Portion {
    pub flags: EntityFlags,
    /// First vertex (batching) or instance (instancing) in the shared arrays
    pub vertex_base: usize,
    pub num_vertices: usize,
    pub indices_base: usize,
    pub num_indices: usize,
    /// Instance transform; identity for batched portions
    pub matrix: DMat4,
    pub offset: DVec3,
    /// Bounds relative to the layer origin, before the model transform
    pub aabb: Aabb,
    pub color: [u8; 4],
}

/// CPU copy of quantized positions and indices kept after finalize for
/// precise picking and geometry queries
#[derive(Clone, Debug, Default)]
pub struct RetainedGeometry {
    pub positions: Vec<u16>,
    pub indices: Vec<u32>,
    pub decode_matrix: DMat4,
}

impl RetainedGeometry {
    /// Position relative to the layer origin
    pub fn vertex(&self, index: usize) -> Option<DVec3> {
        let q = self.positions.get(index * 3..index * 3 + 3)?;
        Some(decompress_position(q, &self.decode_matrix))
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.len() / 3
    }
}
