use super::common;
use super::{ProgramContext, SubGeometryPolicy, TechniqueDescriptor};
use crate::gl::GlContext;
use crate::layer::flags::PassNibble;
use crate::renderer::program_variables::glsl;
use crate::renderer::shader::UniformValue;
use crate::scene::{SNAP_CANDIDATE, SNAP_NORMAL, SNAP_PICK_COLOR, SNAP_SURFACE};

/// Writes integer RTC coordinates tagged with the layer number into the snap
/// target. The init pass also writes normals and pick colors; refinement
/// passes draw vertices or edges only.
pub fn snap<G: GlContext>(ctx: &mut ProgramContext<'_, G>, init: bool) -> TechniqueDescriptor {
    let vector_a = ctx.vars.uniform("snapVectorA", "vec2", |s| {
        Some(UniformValue::Vec2(s.frame.snap_vector_a))
    });
    let inv_vector_ab = ctx.vars.uniform("snapInvVectorAB", "vec2", |s| {
        Some(UniformValue::Vec2(s.frame.snap_inv_vector_ab))
    });
    ctx.clip_pos_transform.push(glsl![
        "clipPos.xy = (clipPos.xy - ",
        vector_a,
        " * clipPos.w) * ",
        inv_vector_ab,
        ";"
    ]);
    ctx.vertex_output(glsl!["gl_PointSize = 1.0;"]);

    let v_world = common::world_position(ctx);
    let scale = ctx.vars.uniform("uCoordinateScaler", "vec3", |s| {
        Some(UniformValue::Vec3(s.frame.snap_pick_coordinate_scale.to_array()))
    });
    let layer_number = ctx.vars.uniform("uLayerNumber", "int", |s| {
        Some(UniformValue::Int(s.frame.snap_pick_layer_number as i32))
    });
    // Refinement lands in its own attachment so surface hits survive it
    let location = if init { SNAP_SURFACE } else { SNAP_CANDIDATE };
    let out_coords = ctx.vars.output("outCoords", "ivec4", location as u32);
    ctx.fragment_output(glsl![
        out_coords,
        " = ivec4(",
        v_world,
        " * ",
        scale,
        ", ",
        layer_number,
        ");"
    ]);

    if init {
        let out_normal = ctx.vars.output("outNormal", "ivec4", SNAP_NORMAL as u32);
        let out_pick = ctx.vars.output("outPickColor", "uvec4", SNAP_PICK_COLOR as u32);
        let v_pick = common::pick_color(ctx);
        if ctx.geometry.primitive.is_triangles() {
            ctx.fragment_output(glsl![
                "vec3 worldNormal = normalize(cross(dFdx(",
                v_world,
                "), dFdy(",
                v_world,
                ")));"
            ]);
            ctx.fragment_output(glsl![out_normal, " = ivec4(worldNormal * 2147483647.0, 0);"]);
        } else {
            ctx.fragment_output(glsl![out_normal, " = ivec4(0);"]);
        }
        ctx.fragment_output(glsl![out_pick, " = uvec4(", v_pick, " * 255.0);"]);
    }

    TechniqueDescriptor {
        sub_geometry: SubGeometryPolicy::Snap { init },
        increment_draw_state: false,
        ..TechniqueDescriptor::new(if init { "SnapInit" } else { "Snap" }, PassNibble::Pick)
    }
}
