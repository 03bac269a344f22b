//! Rendering techniques.
//!
//! A technique is a pure setup function over a [`ProgramContext`]: it declares
//! the inputs it needs and appends fragment (and optionally vertex) output
//! logic, returning a [`TechniqueDescriptor`] that tells the layer renderer how
//! to drive the program. The shared vertex pipeline, clipping, logarithmic
//! depth and point sizing are added afterwards by [`common::assemble`].

pub mod common;
mod color;
mod depth;
mod edges;
mod lighting;
mod pbr;
mod pick;
mod silhouette;
mod snap;

use crate::config::{LayerType, Primitive, SceneConfig};
use crate::gl::GlContext;
use crate::layer::flags::PassNibble;
use crate::renderer::program_variables::{Line, ProgramVariables, VarId};
use crate::renderer::renderer_cache::RendererKey;

/// Every program variant a layer can be drawn with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Technique {
    Color { lighting: bool, sao: bool },
    FlatColor { sao: bool },
    ColorTexture { sao: bool },
    Pbr { sao: bool },
    Depth,
    Edges { vertex_colors: bool },
    Occlusion,
    Silhouette,
    PickMesh,
    PickDepth,
    PickNormals { flat: bool },
    Shadow,
    Snap { init: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instantiation {
    /// Built with the cache entry so first interaction has no compile stall
    Eager,
    /// Built on first draw
    Lazy,
}

/// Which camera matrices a program reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraSource {
    Main,
    Pick,
    Shadow,
}

/// Which index set a technique draws
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubGeometryPolicy {
    Surface,
    Edges,
    Vertices,
    /// Triangles for the init pass; vertices or edges by snap mode afterwards
    Snap { init: bool },
}

/// How the layer renderer drives a built program
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TechniqueDescriptor {
    pub program_name: String,
    pub pass_nibble: PassNibble,
    pub camera: CameraSource,
    pub sub_geometry: SubGeometryPolicy,
    pub log_depth: bool,
    pub increment_draw_state: bool,
}

impl TechniqueDescriptor {
    pub fn new(program_name: impl Into<String>, pass_nibble: PassNibble) -> TechniqueDescriptor {
        TechniqueDescriptor {
            program_name: program_name.into(),
            pass_nibble,
            camera: CameraSource::Main,
            sub_geometry: SubGeometryPolicy::Surface,
            log_depth: true,
            increment_draw_state: true,
        }
    }
}

/// Buffer-side inputs available to a program
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryDescriptor {
    pub layer_type: LayerType,
    pub primitive: Primitive,
    pub has_normals: bool,
    pub has_uvs: bool,
    pub has_metallic_roughness: bool,
}

impl GeometryDescriptor {
    pub fn from_key(key: &RendererKey) -> GeometryDescriptor {
        GeometryDescriptor {
            layer_type: key.layer_type,
            primitive: key.primitive,
            has_normals: key.has_normals,
            has_uvs: key.pbr || key.color_texture,
            has_metallic_roughness: key.pbr,
        }
    }
}

/// Shared camera and model matrices, carried in the `Matrices` uniform block
#[derive(Clone, Copy, Debug)]
pub struct Matrices {
    pub world: VarId,
    pub view: VarId,
    pub proj: VarId,
    pub world_normal: VarId,
    pub view_normal: VarId,
}

/// Program under construction
pub struct ProgramContext<'s, G: GlContext> {
    pub vars: ProgramVariables<G>,
    pub geometry: GeometryDescriptor,
    pub scene: &'s SceneConfig,
    pub matrices: Matrices,
    /// Vertex statements run once the clip position is known
    pub vertex_outputs: Vec<Line>,
    pub fragment_outputs: Vec<Line>,
    /// Statements rewriting `clipPos` before it is written out
    pub clip_pos_transform: Vec<Line>,
    /// Output that receives the slice color inside a cross-section cap
    pub clipping_caps: Option<VarId>,
    pub(crate) needs_normals: bool,
}

impl<'s, G: GlContext> ProgramContext<'s, G> {
    pub fn new(geometry: GeometryDescriptor, scene: &'s SceneConfig) -> ProgramContext<'s, G> {
        let mut vars = ProgramVariables::new();
        let matrices = common::declare_matrices(&mut vars);
        ProgramContext {
            vars,
            geometry,
            scene,
            matrices,
            vertex_outputs: Vec::new(),
            fragment_outputs: Vec::new(),
            clip_pos_transform: Vec::new(),
            clipping_caps: None,
            needs_normals: false,
        }
    }

    pub fn vertex_output(&mut self, line: Line) {
        self.vertex_outputs.push(line);
    }

    pub fn fragment_output(&mut self, line: Line) {
        self.fragment_outputs.push(line);
    }
}

impl Technique {
    /// Eager/lazy instantiation policy
    pub fn instantiation(self) -> Instantiation {
        match self {
            Technique::Silhouette
            | Technique::PickMesh
            | Technique::PickDepth
            | Technique::PickNormals { .. }
            | Technique::Snap { .. } => Instantiation::Eager,
            Technique::Color { .. }
            | Technique::FlatColor { .. }
            | Technique::ColorTexture { .. }
            | Technique::Pbr { .. }
            | Technique::Depth
            | Technique::Edges { .. }
            | Technique::Occlusion
            | Technique::Shadow => Instantiation::Lazy,
        }
    }

    /// Techniques built together with a new cache entry
    pub fn eager_for(key: &RendererKey) -> Vec<Technique> {
        let mut techniques = vec![
            Technique::Silhouette,
            Technique::PickMesh,
            Technique::PickDepth,
            Technique::Snap { init: true },
            Technique::Snap { init: false },
        ];
        if key.primitive.is_triangles() {
            techniques.push(Technique::PickNormals {
                flat: !key.has_normals,
            });
        }
        techniques
    }

    /// Scene-dependent inputs baked into the program source
    pub fn hash(self, scene: &SceneConfig) -> String {
        let base = if scene.logarithmic_depth_buffer_enabled {
            "ld"
        } else {
            "-"
        };
        let gamma = if scene.gamma_output { "g" } else { "" };
        match self {
            Technique::Color { lighting: true, .. }
            | Technique::FlatColor { .. }
            | Technique::ColorTexture { .. } => {
                format!("{};{};{}", base, scene.lights.hash(), gamma)
            }
            Technique::Pbr { .. } => format!("{};{};{};pbr", base, scene.lights.hash(), gamma),
            Technique::Color { lighting: false, .. } => format!("{};{}", base, gamma),
            _ => base.to_string(),
        }
    }

    /// Declare the technique's inputs and outputs
    pub fn setup<G: GlContext>(self, ctx: &mut ProgramContext<'_, G>) -> TechniqueDescriptor {
        match self {
            Technique::Color { lighting, sao } => color::color(ctx, lighting, sao),
            Technique::FlatColor { sao } => color::flat_color(ctx, sao),
            Technique::ColorTexture { sao } => color::color_texture(ctx, sao),
            Technique::Pbr { sao } => pbr::pbr(ctx, sao),
            Technique::Depth => depth::depth(ctx),
            Technique::Shadow => depth::shadow(ctx),
            Technique::Occlusion => depth::occlusion(ctx),
            Technique::Edges { vertex_colors } => edges::edges(ctx, vertex_colors),
            Technique::Silhouette => silhouette::silhouette(ctx),
            Technique::PickMesh => pick::pick_mesh(ctx),
            Technique::PickDepth => pick::pick_depth(ctx),
            Technique::PickNormals { flat } => pick::pick_normals(ctx, flat),
            Technique::Snap { init } => snap::snap(ctx, init),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::recording::RecordingContext;

    fn key(primitive: Primitive, has_normals: bool) -> RendererKey {
        RendererKey {
            layer_type: LayerType::Batching,
            primitive,
            sao: false,
            pbr: false,
            color_texture: false,
            has_normals,
        }
    }

    const ALL: [Technique; 13] = [
        Technique::Color {
            lighting: true,
            sao: true,
        },
        Technique::FlatColor { sao: false },
        Technique::ColorTexture { sao: false },
        Technique::Pbr { sao: true },
        Technique::Depth,
        Technique::Edges {
            vertex_colors: true,
        },
        Technique::Occlusion,
        Technique::Silhouette,
        Technique::PickMesh,
        Technique::PickDepth,
        Technique::PickNormals { flat: false },
        Technique::Shadow,
        Technique::Snap { init: true },
    ];

    #[test]
    fn test_policy_table() {
        assert_eq!(Technique::Silhouette.instantiation(), Instantiation::Eager);
        assert_eq!(Technique::Snap { init: false }.instantiation(), Instantiation::Eager);
        assert_eq!(Technique::Pbr { sao: true }.instantiation(), Instantiation::Lazy);
        assert_eq!(Technique::Edges { vertex_colors: false }.instantiation(), Instantiation::Lazy);

        let eager = Technique::eager_for(&key(Primitive::Solid, false));
        assert!(eager.contains(&Technique::PickNormals { flat: true }));
        let eager = Technique::eager_for(&key(Primitive::Points, false));
        assert!(!eager.iter().any(|t| matches!(t, Technique::PickNormals { .. })));
    }

    #[test]
    fn test_lighting_hash_tracks_lights() {
        let mut scene = SceneConfig::default();
        let technique = Technique::Color {
            lighting: true,
            sao: false,
        };
        let before = technique.hash(&scene);
        scene.lights.lights.pop();
        assert_ne!(before, technique.hash(&scene));
        // Unlit programs ignore lights
        let unlit = Technique::Color {
            lighting: false,
            sao: false,
        };
        assert_eq!(unlit.hash(&scene), unlit.hash(&SceneConfig::default()));
    }

    #[test]
    fn test_every_technique_emits_valid_sources() {
        let mut scene = SceneConfig::default();
        scene.section_planes.push(Default::default());
        scene.logarithmic_depth_buffer_enabled = true;
        scene.gamma_output = true;
        for primitive in [Primitive::Solid, Primitive::Lines, Primitive::Points] {
            for layer_type in [LayerType::Batching, LayerType::Instancing] {
                let geometry = GeometryDescriptor {
                    layer_type,
                    primitive,
                    has_normals: true,
                    has_uvs: true,
                    has_metallic_roughness: true,
                };
                for technique in ALL {
                    let mut ctx: ProgramContext<'_, RecordingContext> =
                        ProgramContext::new(geometry, &scene);
                    let descriptor = technique.setup(&mut ctx);
                    common::assemble(&mut ctx, &descriptor);
                    let built = ctx.vars.build(&descriptor.program_name);
                    assert!(
                        built.is_ok(),
                        "{:?} on {:?}/{:?}: {:?}",
                        technique,
                        primitive,
                        layer_type,
                        built.err()
                    );
                }
            }
        }
    }
}
