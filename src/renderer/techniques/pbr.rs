use super::common;
use super::lighting;
use super::{ProgramContext, TechniqueDescriptor};
use crate::gl::GlContext;
use crate::layer::flags::PassNibble;
use crate::renderer::program_variables::glsl;
use crate::renderer::shader::{TextureSlot, UniformValue};
use glam::Mat3;

/// Metallic-roughness shading (GGX distribution, Smith geometry, Schlick
/// Fresnel) over base color, metallic-roughness, emissive and occlusion maps
pub fn pbr<G: GlContext>(ctx: &mut ProgramContext<'_, G>, sao: bool) -> TechniqueDescriptor {
    let out_color = ctx.vars.output("outColor", "vec4", 0);
    ctx.clipping_caps = Some(out_color);
    let v_color = common::vertex_color(ctx);
    let v_uv = common::uv(ctx);
    let v_mr = common::metallic_roughness(ctx);
    let v_view = common::view_position(ctx);

    let sampler = |ctx: &mut ProgramContext<'_, G>, name: &str, slot: TextureSlot| {
        ctx.vars
            .uniform(name, "sampler2D", move |_| Some(UniformValue::Texture(slot)))
    };
    let color_map = sampler(ctx, "uColorMap", TextureSlot::Color);
    let mr_map = sampler(ctx, "uMetallicRoughMap", TextureSlot::MetallicRoughness);
    let emissive_map = sampler(ctx, "uEmissiveMap", TextureSlot::Emissive);
    let occlusion_map = sampler(ctx, "uAOMap", TextureSlot::Occlusion);

    let brdf = ctx.vars.function(
        "specularBRDF",
        vec![
            glsl!["const float PI = 3.14159265359;"],
            glsl!["vec3 specularBRDF(vec3 N, vec3 V, vec3 L, vec3 F0, float roughness) {"],
            glsl!["    vec3 H = normalize(V + L);"],
            glsl!["    float NdotH = max(dot(N, H), 0.0);"],
            glsl!["    float NdotV = max(dot(N, V), 0.0);"],
            glsl!["    float NdotL = max(dot(N, L), 0.0);"],
            glsl!["    float a = roughness * roughness;"],
            glsl!["    float a2 = a * a;"],
            glsl!["    float d = NdotH * NdotH * (a2 - 1.0) + 1.0;"],
            glsl!["    float D = a2 / (PI * d * d);"],
            glsl!["    float k = (roughness + 1.0) * (roughness + 1.0) / 8.0;"],
            glsl!["    float G = (NdotV / (NdotV * (1.0 - k) + k)) * (NdotL / (NdotL * (1.0 - k) + k));"],
            glsl!["    vec3 F = F0 + (1.0 - F0) * pow(1.0 - max(dot(H, V), 0.0), 5.0);"],
            glsl!["    return D * G * F / max(4.0 * NdotV * NdotL, 0.001);"],
            glsl!["}"],
        ],
    );

    let mut lines = common::fragment_view_normal(ctx);
    lines.push(glsl!["vec4 baseColor = ", v_color, " * texture(", color_map, ", ", v_uv, ");"]);
    lines.push(glsl!["vec4 mrSample = texture(", mr_map, ", ", v_uv, ");"]);
    lines.push(glsl!["float metallic = ", v_mr, ".r * mrSample.b;"]);
    lines.push(glsl!["float roughness = clamp(", v_mr, ".g * mrSample.g, 0.04, 1.0);"]);
    lines.push(glsl!["vec3 viewDir = normalize(-", v_view, ".xyz);"]);
    lines.push(glsl!["vec3 F0 = mix(vec3(0.04), baseColor.rgb, metallic);"]);
    lines.push(glsl!["vec3 diffuseColor = baseColor.rgb * (1.0 - metallic);"]);
    lines.push(lighting::ambient(ctx));
    lines.push(glsl!["vec3 reflectedColor = ambientColor * diffuseColor;"]);
    lines.extend(lighting::for_each_light(ctx, || {
        vec![
            glsl!["    float NdotL = max(dot(viewNormal, lightDir), 0.0);"],
            glsl![
                "    reflectedColor += (diffuseColor / PI + ",
                brdf,
                "(viewNormal, viewDir, lightDir, F0, roughness)) * radiance * NdotL;"
            ],
        ]
    }));
    let (light_map, reflection_map) = (ctx.scene.lights.light_map, ctx.scene.lights.reflection_map);
    if light_map || reflection_map {
        let to_world = ctx.vars.uniform("uViewToWorldNormal", "mat3", |s| {
            let view = Mat3::from_mat4(s.camera.view_matrix.as_mat4());
            Some(UniformValue::Mat3(view.transpose()))
        });
        lines.push(glsl!["vec3 worldNormal = normalize(", to_world, " * viewNormal);"]);
        lines.push(glsl!["vec3 worldReflect = ", to_world, " * reflect(-viewDir, viewNormal);"]);
    }
    if light_map {
        let irradiance = ctx.vars.uniform("uLightMap", "samplerCube", |_| {
            Some(UniformValue::Texture(TextureSlot::LightMap))
        });
        lines.push(glsl!["reflectedColor += diffuseColor * texture(", irradiance, ", worldNormal).rgb;"]);
    }
    if reflection_map {
        let reflection = ctx.vars.uniform("uReflectionMap", "samplerCube", |_| {
            Some(UniformValue::Texture(TextureSlot::ReflectionMap))
        });
        lines.push(glsl![
            "reflectedColor += F0 * texture(",
            reflection,
            ", worldReflect).rgb * (1.0 - roughness);"
        ]);
    }
    // Unbound samplers read black, so optional maps are switched explicitly
    let has_ao = ctx.vars.uniform("uHasAOMap", "bool", |s| {
        Some(UniformValue::Bool(s.texture(TextureSlot::Occlusion).is_some()))
    });
    let has_emissive = ctx.vars.uniform("uHasEmissiveMap", "bool", |s| {
        Some(UniformValue::Bool(s.texture(TextureSlot::Emissive).is_some()))
    });
    lines.push(glsl![
        "if (", has_ao, ") { reflectedColor *= texture(", occlusion_map, ", ", v_uv, ").r; }"
    ]);
    lines.push(glsl![
        "if (", has_emissive, ") { reflectedColor += texture(", emissive_map, ", ", v_uv, ").rgb; }"
    ]);
    lines.push(glsl!["vec4 fragColor = vec4(reflectedColor, baseColor.a);"]);
    if sao {
        lines.extend(common::apply_sao(ctx, "fragColor"));
    }
    lines.push(common::write_color(ctx, out_color, "fragColor"));
    ctx.fragment_outputs.extend(lines);

    let name = if sao { "PBR+sao" } else { "PBR" };
    TechniqueDescriptor::new(name, PassNibble::Color)
}
