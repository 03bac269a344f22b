use super::common;
use super::{CameraSource, ProgramContext, TechniqueDescriptor};
use crate::gl::GlContext;
use crate::layer::flags::PassNibble;
use crate::renderer::program_variables::glsl;
use crate::renderer::shader::UniformValue;

fn pick_descriptor(name: &str) -> TechniqueDescriptor {
    TechniqueDescriptor {
        camera: CameraSource::Pick,
        ..TechniqueDescriptor::new(name, PassNibble::Pick)
    }
}

/// Per-portion pick color, identifying the entity under the pointer
pub fn pick_mesh<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outPickColor", "vec4", 0);
    let v_pick = common::pick_color(ctx);
    ctx.fragment_output(glsl![out_color, " = ", v_pick, ";"]);
    pick_descriptor("PickMesh")
}

/// View depth normalized to the pick frustum's z range, packed into RGBA
pub fn pick_depth<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outPackedDepth", "vec4", 0);
    let v_view = common::view_position(ctx);
    let z_near = ctx.vars.uniform("pickZNear", "float", |s| {
        Some(UniformValue::Float(s.frame.pick_z_near))
    });
    let z_far = ctx.vars.uniform("pickZFar", "float", |s| {
        Some(UniformValue::Float(s.frame.pick_z_far))
    });
    let pack = ctx.vars.function(
        "packDepth",
        vec![
            glsl!["vec4 packDepth(const in float depth) {"],
            glsl!["    const vec4 bitShift = vec4(256.0 * 256.0 * 256.0, 256.0 * 256.0, 256.0, 1.0);"],
            glsl!["    const vec4 bitMask = vec4(0.0, 1.0 / 256.0, 1.0 / 256.0, 1.0 / 256.0);"],
            glsl!["    vec4 res = fract(depth * bitShift);"],
            glsl!["    res -= res.xxyz * bitMask;"],
            glsl!["    return res;"],
            glsl!["}"],
        ],
    );
    ctx.fragment_output(glsl![
        "float zNormalizedDepth = abs((",
        z_near,
        " + ",
        v_view,
        ".z) / (",
        z_far,
        " - ",
        z_near,
        "));"
    ]);
    ctx.fragment_output(glsl![out_color, " = ", pack, "(zNormalizedDepth);"]);
    pick_descriptor("PickDepth")
}

/// World-space surface normal under the pointer
pub fn pick_normals<G: GlContext>(
    ctx: &mut ProgramContext<'_, G>,
    flat: bool,
) -> TechniqueDescriptor {
    let out_normal = ctx.vars.output("outNormal", "vec4", 0);
    if flat || !ctx.geometry.has_normals {
        let v_world = common::world_position(ctx);
        ctx.fragment_output(glsl![
            "vec3 worldNormal = normalize(cross(dFdx(",
            v_world,
            "), dFdy(",
            v_world,
            ")));"
        ]);
    } else {
        let v_normal = common::world_normal(ctx);
        ctx.fragment_output(glsl!["vec3 worldNormal = normalize(", v_normal, ");"]);
    }
    ctx.fragment_output(glsl![out_normal, " = vec4(worldNormal, 1.0);"]);
    pick_descriptor(if flat { "PickNormalsFlat" } else { "PickNormals" })
}
