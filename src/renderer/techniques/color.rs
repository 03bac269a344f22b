use super::common;
use super::lighting;
use super::{ProgramContext, TechniqueDescriptor};
use crate::gl::GlContext;
use crate::layer::flags::PassNibble;
use crate::renderer::program_variables::glsl;
use crate::renderer::shader::{TextureSlot, UniformValue};

fn program_name(base: &str, lighting: bool, sao: bool) -> String {
    let mut name = base.to_string();
    if lighting {
        name.push_str("+lights");
    }
    if sao {
        name.push_str("+sao");
    }
    name
}

/// Vertex colors, optionally lit with vertex normals and darkened by SAO
pub fn color<G: GlContext>(
    ctx: &mut ProgramContext<'_, G>,
    lighting: bool,
    sao: bool,
) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outColor", "vec4", 0);
    ctx.clipping_caps = Some(out_color);
    let v_color = common::vertex_color(ctx);

    let mut lines = Vec::new();
    if lighting && ctx.geometry.primitive.is_triangles() {
        lines.extend(common::fragment_view_normal(ctx));
        lines.extend(lighting::diffuse(ctx));
        lines.push(glsl![
            "vec4 fragColor = vec4(reflectedColor * ",
            v_color,
            ".rgb, ",
            v_color,
            ".a);"
        ]);
    } else {
        lines.push(glsl!["vec4 fragColor = ", v_color, ";"]);
    }
    if sao {
        lines.extend(common::apply_sao(ctx, "fragColor"));
    }
    lines.push(common::write_color(ctx, out_color, "fragColor"));
    ctx.fragment_outputs.extend(lines);

    TechniqueDescriptor::new(program_name("Color", lighting, sao), PassNibble::Color)
}

/// Lit with face normals derived in the fragment stage, for geometry
/// without vertex normals
pub fn flat_color<G: GlContext>(ctx: &mut ProgramContext<'_, G>, sao: bool) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outColor", "vec4", 0);
    ctx.clipping_caps = Some(out_color);
    let v_color = common::vertex_color(ctx);
    let v_view = common::view_position(ctx);

    let mut lines = vec![glsl![
        "vec3 viewNormal = normalize(cross(dFdx(",
        v_view,
        ".xyz), dFdy(",
        v_view,
        ".xyz)));"
    ]];
    lines.extend(lighting::diffuse(ctx));
    lines.push(glsl![
        "vec4 fragColor = vec4(reflectedColor * ",
        v_color,
        ".rgb, ",
        v_color,
        ".a);"
    ]);
    if sao {
        lines.extend(common::apply_sao(ctx, "fragColor"));
    }
    lines.push(common::write_color(ctx, out_color, "fragColor"));
    ctx.fragment_outputs.extend(lines);

    TechniqueDescriptor::new(program_name("FlatColor", true, sao), PassNibble::Color)
}

/// Base color texture modulated by vertex color and lighting
pub fn color_texture<G: GlContext>(
    ctx: &mut ProgramContext<'_, G>,
    sao: bool,
) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outColor", "vec4", 0);
    ctx.clipping_caps = Some(out_color);
    let v_color = common::vertex_color(ctx);
    let v_uv = common::uv(ctx);
    let color_map = ctx.vars.uniform("uColorMap", "sampler2D", |_| {
        Some(UniformValue::Texture(TextureSlot::Color))
    });

    let mut lines = common::fragment_view_normal(ctx);
    lines.extend(lighting::diffuse(ctx));
    lines.push(glsl!["vec4 texColor = texture(", color_map, ", ", v_uv, ");"]);
    lines.push(glsl![
        "vec4 fragColor = vec4(reflectedColor * texColor.rgb * ",
        v_color,
        ".rgb, texColor.a * ",
        v_color,
        ".a);"
    ]);
    if sao {
        lines.extend(common::apply_sao(ctx, "fragColor"));
    }
    lines.push(common::write_color(ctx, out_color, "fragColor"));
    ctx.fragment_outputs.extend(lines);

    TechniqueDescriptor::new(program_name("ColorTexture", true, sao), PassNibble::Color)
}
