use super::common;
use super::{ProgramContext, SubGeometryPolicy, TechniqueDescriptor};
use crate::gl::GlContext;
use crate::layer::flags::{PassNibble, RenderPass};
use crate::renderer::program_variables::glsl;
use crate::renderer::shader::UniformValue;

/// Edge lines, either darkened vertex colors or the emphasis material's
/// edge color for the current pass
pub fn edges<G: GlContext>(
    ctx: &mut ProgramContext<'_, G>,
    vertex_colors: bool,
) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outColor", "vec4", 0);
    if vertex_colors {
        let v_color = common::vertex_color(ctx);
        ctx.fragment_output(glsl![
            "vec4 fragColor = vec4(",
            v_color,
            ".rgb * 0.5, ",
            v_color,
            ".a);"
        ]);
    } else {
        let edge_color = ctx.vars.uniform("edgeColor", "vec4", |s| {
            let config = &s.scene.config;
            let (color, alpha) = match s.render_pass {
                RenderPass::EdgesHighlighted => (
                    config.highlight_material.edge_color,
                    config.highlight_material.edge_alpha,
                ),
                RenderPass::EdgesSelected => (
                    config.selected_material.edge_color,
                    config.selected_material.edge_alpha,
                ),
                RenderPass::EdgesXRayed => {
                    (config.xray_material.edge_color, config.xray_material.edge_alpha)
                }
                _ => (config.edge_material.edge_color, config.edge_material.edge_alpha),
            };
            Some(UniformValue::Vec4([color[0], color[1], color[2], alpha]))
        });
        ctx.fragment_output(glsl!["vec4 fragColor = ", edge_color, ";"]);
    }
    let write = common::write_color(ctx, out_color, "fragColor");
    ctx.fragment_output(write);

    let name = if vertex_colors { "EdgesColor" } else { "EdgesEmphasis" };
    TechniqueDescriptor {
        sub_geometry: SubGeometryPolicy::Edges,
        ..TechniqueDescriptor::new(name, PassNibble::Edges)
    }
}
