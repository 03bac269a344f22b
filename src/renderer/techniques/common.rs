//! Vertex pipeline and cross-cutting fragment logic shared by every technique:
//! pass-flag gating, position decoding, RTC world transform, clipping with
//! optional cross-section caps, logarithmic depth and point sizing.

use super::{Matrices, ProgramContext, TechniqueDescriptor};
use crate::config::{LayerType, Primitive};
use crate::gl::GlContext;
use crate::layer::flags::CLIPPABLE_SHIFT;
use crate::renderer::buffer::AttributeSource;
use crate::renderer::program_variables::{glsl, Line, Piece, ProgramVariables, VarId};
use crate::renderer::shader::{TextureSlot, UniformValue};
use glam::DVec3;

pub fn declare_matrices<G: GlContext>(vars: &mut ProgramVariables<G>) -> Matrices {
    Matrices {
        world: vars.block_matrix("Matrices", "worldMatrix", |s| {
            Some(UniformValue::Mat4(s.world_matrix))
        }),
        view: vars.block_matrix("Matrices", "viewMatrix", |s| {
            Some(UniformValue::Mat4(s.view_matrix))
        }),
        proj: vars.block_matrix("Matrices", "projMatrix", |s| {
            Some(UniformValue::Mat4(s.proj_matrix))
        }),
        world_normal: vars.block_matrix("Matrices", "worldNormalMatrix", |s| {
            Some(UniformValue::Mat4(s.world_normal_matrix))
        }),
        view_normal: vars.block_matrix("Matrices", "viewNormalMatrix", |s| {
            Some(UniformValue::Mat4(s.view_normal_matrix))
        }),
    }
}

/// Declares a varying fed from a vertex-stage expression, once per program
fn varying_from<G: GlContext>(
    ctx: &mut ProgramContext<'_, G>,
    name: &str,
    glsl_type: &'static str,
    flat: bool,
    source: Vec<Piece>,
) -> VarId {
    if let Some(id) = ctx.vars.find(name) {
        return id;
    }
    let id = if flat {
        ctx.vars.flat_varying(name, glsl_type)
    } else {
        ctx.vars.varying(name, glsl_type)
    };
    let mut pieces = vec![Piece::Var(id), Piece::from(" = ")];
    pieces.extend(source);
    pieces.push(Piece::from(";"));
    ctx.vertex_outputs.push(Line::new(pieces));
    id
}

/// View-space position, interpolated
pub fn view_position<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    varying_from(ctx, "vViewPosition", "vec4", false, vec!["viewPosition".into()])
}

/// RTC-relative world position, interpolated
pub fn world_position<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    varying_from(ctx, "vWorldPosition", "vec3", false, vec!["worldPosition.xyz".into()])
}

pub fn vertex_color<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    let color = ctx.vars.attribute("color", "vec4", AttributeSource::Color);
    varying_from(ctx, "vColor", "vec4", false, vec![color.into()])
}

pub fn view_normal<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    ctx.needs_normals = true;
    varying_from(ctx, "vViewNormal", "vec3", false, vec!["viewNormal".into()])
}

pub fn world_normal<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    ctx.needs_normals = true;
    varying_from(ctx, "vWorldNormal", "vec3", false, vec!["worldNormal".into()])
}

pub fn pick_color<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    let pick_color = ctx.vars.attribute("pickColor", "vec4", AttributeSource::PickColor);
    varying_from(ctx, "vPickColor", "vec4", true, vec![pick_color.into()])
}

pub fn uv<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    let uv = ctx.vars.attribute("uv", "vec2", AttributeSource::Uv);
    let decode = ctx.vars.uniform("uvDecodeMatrix", "mat3", |s| {
        Some(UniformValue::Mat3(s.layer.uv_decode_matrix))
    });
    varying_from(
        ctx,
        "vUV",
        "vec2",
        false,
        vec!["(".into(), decode.into(), " * vec3(".into(), uv.into(), ", 1.0)).xy".into()],
    )
}

pub fn metallic_roughness<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> VarId {
    let mr = ctx
        .vars
        .attribute("metallicRoughness", "vec2", AttributeSource::MetallicRoughness);
    varying_from(ctx, "vMetallicRoughness", "vec2", false, vec![mr.into()])
}

/// Fragment statements defining a local `vec3 viewNormal`, from vertex
/// normals when present and from screen-space derivatives otherwise
pub fn fragment_view_normal<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> Vec<Line> {
    let mut lines = Vec::new();
    if ctx.geometry.has_normals {
        let v_normal = view_normal(ctx);
        lines.push(glsl!["vec3 viewNormal = normalize(", v_normal, ");"]);
    } else {
        let v_view = view_position(ctx);
        lines.push(glsl![
            "vec3 viewNormal = normalize(cross(dFdx(",
            v_view,
            ".xyz), dFdy(",
            v_view,
            ".xyz)));"
        ]);
    }
    if ctx.geometry.primitive == Primitive::Surface {
        lines.push(glsl!["if (!gl_FrontFacing) { viewNormal = -viewNormal; }"]);
    }
    lines
}

/// Darkens `local` by the screen-space ambient occlusion texture
pub fn apply_sao<G: GlContext>(ctx: &mut ProgramContext<'_, G>, local: &str) -> Vec<Line> {
    let params = ctx.vars.uniform("uSAOParams", "vec4", |s| {
        let sao = &s.scene.config.sao;
        Some(UniformValue::Vec4([
            s.frame.viewport_size[0],
            s.frame.viewport_size[1],
            sao.blend_cutoff,
            sao.blend_factor,
        ]))
    });
    let occlusion = ctx.vars.uniform("uOcclusionTexture", "sampler2D", |_| {
        Some(UniformValue::Texture(TextureSlot::SaoOcclusion))
    });
    let unpack = ctx.vars.function(
        "unpackRGBAToDepth",
        vec![
            glsl!["float unpackRGBAToDepth(const in vec4 v) {"],
            glsl!["    const float UnpackDownscale = 255.0 / 256.0;"],
            glsl!["    const vec3 PackFactors = vec3(256.0 * 256.0 * 256.0, 256.0 * 256.0, 256.0);"],
            glsl!["    const vec4 UnpackFactors = UnpackDownscale / vec4(PackFactors, 1.0);"],
            glsl!["    return dot(v, UnpackFactors);"],
            glsl!["}"],
        ],
    );
    vec![
        glsl!["vec2 saoUV = gl_FragCoord.xy / ", params, ".xy;"],
        glsl![
            "float ambient = smoothstep(",
            params,
            ".z, 1.0, ",
            unpack,
            "(texture(",
            occlusion,
            ", saoUV))) * ",
            params,
            ".w;"
        ],
        glsl![format!("{0} = vec4({0}.rgb * ambient, {0}.a);", local)],
    ]
}

/// Writes `local` to `out`, gamma-encoded when the scene asks for it
pub fn write_color<G: GlContext>(ctx: &mut ProgramContext<'_, G>, out: VarId, local: &str) -> Line {
    if !ctx.scene.gamma_output {
        return glsl![out, format!(" = {};", local)];
    }
    let factor = ctx.vars.uniform("gammaFactor", "float", |s| {
        Some(UniformValue::Float(s.scene.config.gamma_factor))
    });
    let to_gamma = ctx.vars.function(
        "linearToGamma",
        vec![
            glsl!["vec4 linearToGamma(in vec4 value, in float gammaFactor) {"],
            glsl!["    return vec4(pow(value.xyz, vec3(1.0 / gammaFactor)), value.w);"],
            glsl!["}"],
        ],
    );
    glsl![out, " = ", to_gamma, format!("({}, ", local), factor, ");"]
}

/// Packs a [0, 1) depth into RGBA8, inverse of `unpackRGBAToDepth`
pub fn pack_depth_to_rgba<G: GlContext>(vars: &mut ProgramVariables<G>) -> VarId {
    vars.function(
        "packDepthToRGBA",
        vec![
            glsl!["vec4 packDepthToRGBA(const in float v) {"],
            glsl!["    const float PackUpscale = 256.0 / 255.0;"],
            glsl!["    const float ShiftRight8 = 1.0 / 256.0;"],
            glsl!["    const vec3 PackFactors = vec3(256.0 * 256.0 * 256.0, 256.0 * 256.0, 256.0);"],
            glsl!["    vec4 r = vec4(fract(v * PackFactors), v);"],
            glsl!["    r.yzw -= r.xyz * ShiftRight8;"],
            glsl!["    return r * PackUpscale;"],
            glsl!["}"],
        ],
    )
}

fn hide_vertex() -> [Line; 3] {
    [
        glsl!["    gl_Position = vec4(3.0, 3.0, 3.0, 1.0);"],
        glsl!["    return;"],
        glsl!["}"],
    ]
}

/// Adds the shared vertex pipeline around the technique's statements and
/// the shared fragment prelude before its outputs
pub fn assemble<G: GlContext>(ctx: &mut ProgramContext<'_, G>, descriptor: &TechniqueDescriptor) {
    let geometry = ctx.geometry;
    let scene = ctx.scene;
    let m = ctx.matrices;
    let points = geometry.primitive == Primitive::Points;
    let clipping = !scene.section_planes.is_empty();
    let log_depth = descriptor.log_depth && scene.logarithmic_depth_buffer_enabled;

    let mut vertex: Vec<Line> = Vec::new();
    let mut fragment: Vec<Line> = Vec::new();

    // Pass gating
    let position = ctx.vars.attribute("position", "vec3", AttributeSource::Position);
    let flags = ctx.vars.attribute("flags", "uint", AttributeSource::Flags);
    let offset = ctx.vars.attribute("offset", "vec3", AttributeSource::Offset);
    let render_pass = ctx.vars.uniform("renderPass", "int", |s| {
        Some(UniformValue::Int(s.render_pass as i32))
    });
    let decode = ctx.vars.uniform("positionsDecodeMatrix", "mat4", |s| {
        Some(UniformValue::Mat4(s.layer.positions_decode_matrix))
    });
    vertex.push(glsl![
        "int passFlag = int((",
        flags,
        format!(" >> {}u) & 15u);", descriptor.pass_nibble.shift())
    ]);
    vertex.push(glsl!["if (passFlag != ", render_pass, ") {"]);
    vertex.extend(hide_vertex());

    if points && scene.points_material.filter_intensity {
        let color = ctx.vars.attribute("color", "vec4", AttributeSource::Color);
        let range = ctx.vars.uniform("intensityRange", "vec2", |s| {
            let material = &s.scene.config.points_material;
            Some(UniformValue::Vec2([material.min_intensity, material.max_intensity]))
        });
        vertex.push(glsl![
            "if (", color, ".a < ", range, ".x || ", color, ".a > ", range, ".y) {"
        ]);
        vertex.extend(hide_vertex());
    }

    // Model space relative to the layer origin, then RTC world space
    vertex.push(glsl!["vec4 localPosition = ", decode, " * vec4(", position, ", 1.0);"]);
    match geometry.layer_type {
        LayerType::Batching => {
            vertex.push(glsl!["localPosition.xyz += ", offset, ";"]);
            vertex.push(glsl!["vec4 worldPosition = ", m.world, " * localPosition;"]);
        }
        LayerType::Instancing => {
            let rows: Vec<VarId> = (0..3u8)
                .map(|i| {
                    ctx.vars.attribute(
                        &format!("modelMatrixRow{}", i),
                        "vec4",
                        AttributeSource::ModelMatrixRow(i),
                    )
                })
                .collect();
            vertex.push(glsl![
                "vec4 modelPosition = vec4(dot(localPosition, ",
                rows[0],
                "), dot(localPosition, ",
                rows[1],
                "), dot(localPosition, ",
                rows[2],
                "), 1.0);"
            ]);
            vertex.push(glsl!["modelPosition.xyz += ", offset, ";"]);
            vertex.push(glsl!["vec4 worldPosition = ", m.world, " * modelPosition;"]);
        }
    }

    if ctx.needs_normals {
        if geometry.has_normals {
            let normal = ctx.vars.attribute("normal", "vec2", AttributeSource::Normal);
            let oct_decode = ctx.vars.function(
                "octDecode",
                vec![
                    glsl!["vec3 octDecode(vec2 oct) {"],
                    glsl!["    vec3 v = vec3(oct.xy, 1.0 - abs(oct.x) - abs(oct.y));"],
                    glsl!["    if (v.z < 0.0) {"],
                    glsl!["        v.xy = (1.0 - abs(v.yx)) * vec2(v.x >= 0.0 ? 1.0 : -1.0, v.y >= 0.0 ? 1.0 : -1.0);"],
                    glsl!["    }"],
                    glsl!["    return normalize(v);"],
                    glsl!["}"],
                ],
            );
            vertex.push(glsl!["vec3 localNormal = ", oct_decode, "(", normal, ");"]);
            match geometry.layer_type {
                LayerType::Batching => vertex.push(glsl!["vec3 modelNormal = localNormal;"]),
                LayerType::Instancing => {
                    let rows: Vec<VarId> = (0..3u8)
                        .map(|i| {
                            ctx.vars.attribute(
                                &format!("normalMatrixRow{}", i),
                                "vec4",
                                AttributeSource::NormalMatrixRow(i),
                            )
                        })
                        .collect();
                    vertex.push(glsl!["vec4 localNormal4 = vec4(localNormal, 0.0);"]);
                    vertex.push(glsl![
                        "vec3 modelNormal = vec3(dot(localNormal4, ",
                        rows[0],
                        "), dot(localNormal4, ",
                        rows[1],
                        "), dot(localNormal4, ",
                        rows[2],
                        "));"
                    ]);
                }
            }
        } else {
            vertex.push(glsl!["vec3 modelNormal = vec3(0.0, 0.0, 1.0);"]);
        }
        vertex.push(glsl![
            "vec3 worldNormal = normalize((",
            m.world_normal,
            " * vec4(modelNormal, 0.0)).xyz);"
        ]);
        vertex.push(glsl![
            "vec3 viewNormal = normalize((",
            m.view_normal,
            " * vec4(worldNormal, 0.0)).xyz);"
        ]);
    }

    vertex.push(glsl!["vec4 viewPosition = ", m.view, " * worldPosition;"]);
    vertex.push(glsl!["vec4 clipPos = ", m.proj, " * viewPosition;"]);
    vertex.append(&mut ctx.clip_pos_transform);

    if log_depth {
        let frag_depth = ctx.vars.varying("vFragDepth", "float");
        let is_perspective = ctx.vars.flat_varying("vIsPerspective", "float");
        let is_perspective_matrix = ctx.vars.function(
            "isPerspectiveMatrix",
            vec![
                glsl!["bool isPerspectiveMatrix(mat4 m) {"],
                glsl!["    return (m[2][3] == -1.0);"],
                glsl!["}"],
            ],
        );
        let log_fc = ctx.vars.uniform("logDepthBufFC", "float", |s| {
            Some(UniformValue::Float(2.0 / (s.z_far + 1.0).log2()))
        });
        vertex.push(glsl![frag_depth, " = 1.0 + clipPos.w;"]);
        vertex.push(glsl![
            is_perspective,
            " = float(",
            is_perspective_matrix,
            "(",
            m.proj,
            "));"
        ]);
        // Written first so every fragment path assigns it
        fragment.push(glsl![
            "gl_FragDepth = ",
            is_perspective,
            " == 0.0 ? gl_FragCoord.z : log2(",
            frag_depth,
            ") * ",
            log_fc,
            " * 0.5;"
        ]);
    }

    if clipping {
        let v_world = world_position(ctx);
        let v_clippable = ctx.vars.flat_varying("vClippable", "float");
        vertex.push(glsl![
            v_clippable,
            " = float((",
            flags,
            format!(" >> {}u) & 1u);", CLIPPABLE_SHIFT)
        ]);
        fragment.push(glsl!["if (", v_clippable, " > 0.0) {"]);
        fragment.push(glsl!["    float dist = 0.0;"]);
        for i in 0..scene.section_planes.len() {
            let active = ctx.vars.uniform(&format!("sectionPlaneActive{}", i), "bool", move |s| {
                let plane = s.scene.config.section_planes.get(i)?;
                Some(UniformValue::Bool(plane.active))
            });
            let pos = ctx.vars.uniform(&format!("sectionPlanePos{}", i), "vec3", move |s| {
                let plane = s.scene.config.section_planes.get(i)?;
                Some(UniformValue::Vec3(s.rtc_relative(DVec3::from(plane.pos)).to_array()))
            });
            let dir = ctx.vars.uniform(&format!("sectionPlaneDir{}", i), "vec3", move |s| {
                let plane = s.scene.config.section_planes.get(i)?;
                Some(UniformValue::Vec3(plane.dir))
            });
            fragment.push(glsl![
                "    if (",
                active,
                ") { dist += clamp(dot(-",
                dir,
                ", ",
                v_world,
                " - ",
                pos,
                "), 0.0, 1000.0); }"
            ]);
        }
        match ctx.clipping_caps {
            Some(caps) if geometry.primitive == Primitive::Solid => {
                let thickness = ctx.vars.uniform("sliceThickness", "float", |s| {
                    Some(UniformValue::Float(s.scene.config.cross_sections.slice_thickness))
                });
                let slice_color = ctx.vars.uniform("sliceColor", "vec4", |s| {
                    Some(UniformValue::Vec4(s.scene.config.cross_sections.slice_color))
                });
                fragment.push(glsl!["    if (dist > ", thickness, ") { discard; }"]);
                fragment.push(glsl!["    if (dist > 0.0) { ", caps, " = ", slice_color, "; return; }"]);
            }
            _ => fragment.push(glsl!["    if (dist > 0.0) { discard; }"]),
        }
        fragment.push(glsl!["}"]);
    }

    vertex.push(glsl!["gl_Position = clipPos;"]);

    if points {
        let material = &scene.points_material;
        let point_size = ctx.vars.uniform("pointSize", "float", |s| {
            Some(UniformValue::Float(s.scene.config.points_material.point_size))
        });
        if material.perspective_points {
            let near_plane_height = ctx.vars.uniform("nearPlaneHeight", "float", |s| {
                Some(UniformValue::Float(
                    s.proj_matrix.y_axis.y * s.frame.viewport_size[1] * 0.5,
                ))
            });
            let min_size = ctx.vars.uniform("minPointSize", "float", |s| {
                Some(UniformValue::Float(
                    s.scene.config.points_material.min_perspective_point_size,
                ))
            });
            let max_size = ctx.vars.uniform("maxPointSize", "float", |s| {
                Some(UniformValue::Float(
                    s.scene.config.points_material.max_perspective_point_size,
                ))
            });
            vertex.push(glsl![
                "gl_PointSize = max(",
                min_size,
                ", min(",
                max_size,
                ", ",
                near_plane_height,
                " * ",
                point_size,
                " / clipPos.w));"
            ]);
        } else {
            vertex.push(glsl!["gl_PointSize = ", point_size, ";"]);
        }
        if material.round_points {
            fragment.push(glsl!["vec2 cxy = 2.0 * gl_PointCoord - 1.0;"]);
            fragment.push(glsl!["if (dot(cxy, cxy) > 1.0) { discard; }"]);
        }
    }

    vertex.append(&mut ctx.vertex_outputs);
    fragment.append(&mut ctx.fragment_outputs);
    ctx.vars.vertex_lines(vertex);
    ctx.vars.fragment_lines(fragment);
}
