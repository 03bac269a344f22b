use super::common;
use super::{CameraSource, ProgramContext, TechniqueDescriptor};
use crate::gl::GlContext;
use crate::layer::flags::PassNibble;
use crate::renderer::program_variables::glsl;

/// Packed fragment depth of opaque geometry, input to the SAO pass
pub fn depth<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> TechniqueDescriptor {
    let out_depth = ctx.vars.output("outDepth", "vec4", 0);
    let pack = common::pack_depth_to_rgba(&mut ctx.vars);
    ctx.fragment_output(glsl![out_depth, " = ", pack, "(gl_FragCoord.z);"]);
    TechniqueDescriptor::new("Depth", PassNibble::Color)
}

/// Packed depth from the shadow caster's point of view
pub fn shadow<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> TechniqueDescriptor {
    let out_depth = ctx.vars.output("outDepth", "vec4", 0);
    let pack = common::pack_depth_to_rgba(&mut ctx.vars);
    ctx.fragment_output(glsl![out_depth, " = ", pack, "(gl_FragCoord.z);"]);
    TechniqueDescriptor {
        camera: CameraSource::Shadow,
        log_depth: false,
        ..TechniqueDescriptor::new("Shadow", PassNibble::Color)
    }
}

/// Solid blue where opaque geometry covers a pixel, for occlusion tests
pub fn occlusion<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outColor", "vec4", 0);
    ctx.fragment_output(glsl![out_color, " = vec4(0.0, 0.0, 1.0, 1.0);"]);
    TechniqueDescriptor {
        increment_draw_state: false,
        ..TechniqueDescriptor::new("Occlusion", PassNibble::Color)
    }
}
