use super::common;
use super::ProgramContext;
use crate::config::{Light, LightSpace};
use crate::gl::GlContext;
use crate::renderer::program_variables::{glsl, Line};
use crate::renderer::shader::UniformValue;
use glam::{DVec3, Vec3};

/// Ambient term as a local `vec3 ambientColor`
pub fn ambient<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> Line {
    let ambient = ctx.vars.uniform("lightAmbient", "vec4", |s| {
        let lights = &s.scene.config.lights;
        let [r, g, b] = lights.ambient_color;
        Some(UniformValue::Vec4([r, g, b, lights.ambient_intensity]))
    });
    glsl!["vec3 ambientColor = ", ambient, ".rgb * ", ambient, ".a;"]
}

/// Emits one block per scene light defining `lightDir` (view space, towards
/// the light) and `radiance`, followed by `body`
pub fn for_each_light<G, F>(ctx: &mut ProgramContext<'_, G>, body: F) -> Vec<Line>
where
    G: GlContext,
    F: Fn() -> Vec<Line>,
{
    let mut lines = Vec::new();
    let lights = ctx.scene.lights.lights.clone();
    for (i, light) in lights.iter().enumerate() {
        let color = ctx.vars.uniform(&format!("lightColor{}", i), "vec4", move |s| {
            match s.scene.config.lights.lights.get(i)? {
                Light::Directional {
                    color, intensity, ..
                }
                | Light::Point {
                    color, intensity, ..
                } => Some(UniformValue::Vec4([color[0], color[1], color[2], *intensity])),
            }
        });
        lines.push(glsl!["{"]);
        match light {
            Light::Directional { .. } => {
                let dir = ctx.vars.uniform(&format!("lightDir{}", i), "vec3", move |s| {
                    let Light::Directional { dir, space, .. } = s.scene.config.lights.lights.get(i)?
                    else {
                        return None;
                    };
                    let dir = Vec3::from(*dir).as_dvec3();
                    let view_dir = match space {
                        LightSpace::View => dir,
                        LightSpace::World => s.camera.view_matrix.transform_vector3(dir),
                    };
                    Some(UniformValue::Vec3(view_dir.normalize_or_zero().as_vec3().to_array()))
                });
                lines.push(glsl!["    vec3 lightDir = normalize(-", dir, ");"]);
                lines.push(glsl!["    vec3 radiance = ", color, ".rgb * ", color, ".a;"]);
            }
            Light::Point { .. } => {
                let v_view = common::view_position(ctx);
                let pos = ctx.vars.uniform(&format!("lightPos{}", i), "vec3", move |s| {
                    let Light::Point { pos, space, .. } = s.scene.config.lights.lights.get(i)? else {
                        return None;
                    };
                    let pos = DVec3::from(*pos);
                    let view_pos = match space {
                        LightSpace::View => pos,
                        LightSpace::World => s.camera.view_matrix.transform_point3(pos),
                    };
                    Some(UniformValue::Vec3(view_pos.as_vec3().to_array()))
                });
                let attenuation =
                    ctx.vars
                        .uniform(&format!("lightAttenuation{}", i), "vec3", move |s| {
                            let Light::Point { attenuation, .. } =
                                s.scene.config.lights.lights.get(i)?
                            else {
                                return None;
                            };
                            Some(UniformValue::Vec3(*attenuation))
                        });
                lines.push(glsl!["    vec3 toLight = ", pos, " - ", v_view, ".xyz;"]);
                lines.push(glsl!["    float lightDist = length(toLight);"]);
                lines.push(glsl!["    vec3 lightDir = toLight / lightDist;"]);
                lines.push(glsl![
                    "    float attenuation = 1.0 / (",
                    attenuation,
                    ".x + ",
                    attenuation,
                    ".y * lightDist + ",
                    attenuation,
                    ".z * lightDist * lightDist);"
                ]);
                lines.push(glsl![
                    "    vec3 radiance = ",
                    color,
                    ".rgb * ",
                    color,
                    ".a * attenuation;"
                ]);
            }
        }
        lines.extend(body());
        lines.push(glsl!["}"]);
    }
    lines
}

/// Lambertian lighting into a local `vec3 reflectedColor`; expects a local
/// `viewNormal` in scope
pub fn diffuse<G: GlContext>(ctx: &mut ProgramContext<'_, G>) -> Vec<Line> {
    let mut lines = vec![ambient(ctx), glsl!["vec3 reflectedColor = ambientColor;"]];
    lines.extend(for_each_light(ctx, || {
        vec![glsl![
            "    reflectedColor += max(dot(viewNormal, lightDir), 0.0) * radiance;"
        ]]
    }));
    lines
}
