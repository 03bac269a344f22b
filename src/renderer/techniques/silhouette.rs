use super::common;
use super::{ProgramContext, TechniqueDescriptor};
use crate::gl::GlContext;
use crate::layer::flags::{PassNibble, RenderPass};
use crate::renderer::program_variables::glsl;
use crate::renderer::shader::UniformValue;

/// Emphasis fill for highlighted, selected and x-rayed portions
pub fn silhouette<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outColor", "vec4", 0);
    let color = ctx.vars.uniform("silhouetteColor", "vec4", |s| {
        let config = &s.scene.config;
        let material = match s.render_pass {
            RenderPass::SilhouetteHighlighted => &config.highlight_material,
            RenderPass::SilhouetteSelected => &config.selected_material,
            _ => &config.xray_material,
        };
        let [r, g, b] = material.fill_color;
        Some(UniformValue::Vec4([r, g, b, material.fill_alpha]))
    });
    ctx.fragment_output(glsl!["vec4 fragColor = ", color, ";"]);
    let write = common::write_color(ctx, out_color, "fragColor");
    ctx.fragment_output(write);
    TechniqueDescriptor::new("Silhouette", PassNibble::Silhouette)
}
