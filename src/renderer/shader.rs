use crate::error::{RenderError, Result};
use crate::gl::{self, GlContext};
use crate::renderer::buffer::AttributeSource;
use crate::renderer::layer_renderer::DrawState;
use crate::renderer::program_variables::{ProgramVariables, UniformFn};
use glam::{Mat3, Mat4};
use log::debug;
use std::collections::HashMap;

/// Texture inputs a uniform can resolve to at draw time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    SaoOcclusion,
    Color,
    MetallicRoughness,
    Emissive,
    Occlusion,
    LightMap,
    ReflectionMap,
}

impl std::str::FromStr for TextureSlot {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<TextureSlot> {
        match s {
            "color" => Ok(TextureSlot::Color),
            "metallic_roughness" => Ok(TextureSlot::MetallicRoughness),
            "emissive" => Ok(TextureSlot::Emissive),
            "occlusion" => Ok(TextureSlot::Occlusion),
            other => Err(RenderError::InvalidConfig(format!(
                "unknown texture slot '{}'",
                other
            ))),
        }
    }
}

/// Value produced by a uniform provider for one draw
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Bool(bool),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3(Mat3),
    Mat4(Mat4),
    Texture(TextureSlot),
}

struct BoundUniform<G: GlContext> {
    name: String,
    location: G::UniformLocation,
    texture_target: u32,
    provider: UniformFn<G>,
}

struct BoundBlock<G: GlContext> {
    binding: u32,
    buffer: G::Buffer,
    members: Vec<UniformFn<G>>,
}

/// Attribute the linker kept, with the buffer that feeds it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoundAttribute {
    pub location: u32,
    pub source: AttributeSource,
}

/// Linked shader program with its input bindings
pub struct Program<G: GlContext> {
    pub name: String,
    pub handle: G::Program,
    pub attributes: Vec<BoundAttribute>,
    pub vertex_source: String,
    pub fragment_source: String,
    uniforms: Vec<BoundUniform<G>>,
    blocks: Vec<BoundBlock<G>>,
}

impl<G: GlContext> Program<G> {
    /// Emit, compile and link a program from its declared variables
    pub fn build(gl: &G, name: &str, vars: ProgramVariables<G>) -> Result<Program<G>> {
        let built = vars.build(name)?;
        let handle = compile_program(gl, name, &built.vertex, &built.fragment)?;

        let mut attributes: Vec<BoundAttribute> = built
            .attributes
            .into_iter()
            .filter_map(|(attr_name, source)| {
                let location = gl.attrib_location(&handle, &attr_name);
                // Negative means the linker dropped it
                (location >= 0).then_some(BoundAttribute {
                    location: location as u32,
                    source,
                })
            })
            .collect();
        attributes.sort();

        let active: HashMap<String, u32> = gl
            .active_uniforms(&handle)
            .into_iter()
            .map(|info| (info.name, info.gl_type))
            .collect();

        let mut uniforms = Vec::new();
        for (uniform_name, provider) in built.uniforms {
            let Some(location) = gl.uniform_location(&handle, &uniform_name) else {
                debug!(target: "shader", "{}: uniform '{}' optimized out", name, uniform_name);
                continue;
            };
            let texture_target = match active.get(&uniform_name) {
                Some(&gl::SAMPLER_CUBE) => gl::TEXTURE_CUBE_MAP,
                _ => gl::TEXTURE_2D,
            };
            uniforms.push(BoundUniform {
                name: uniform_name,
                location,
                texture_target,
                provider,
            });
        }

        let mut blocks = Vec::new();
        for (binding, (block_name, members)) in built.blocks.into_iter().enumerate() {
            let binding = binding as u32;
            let block_index = gl.uniform_block_index(&handle, &block_name);
            if block_index == u32::MAX {
                continue;
            }
            gl.uniform_block_binding(&handle, block_index, binding);
            let buffer = gl
                .create_buffer()
                .ok_or(RenderError::ResourceCreation("uniform buffer"))?;
            blocks.push(BoundBlock {
                binding,
                buffer,
                members: members.into_iter().map(|(_, provider)| provider).collect(),
            });
        }

        Ok(Program {
            name: name.to_string(),
            handle,
            attributes,
            vertex_source: built.vertex,
            fragment_source: built.fragment,
            uniforms,
            blocks,
        })
    }

    /// Uploads every uniform and block for one draw, binding textures from
    /// `texture_unit` upward
    pub fn bind_inputs(&self, gl: &G, state: &DrawState<'_, G>, texture_unit: &mut u32) {
        for uniform in &self.uniforms {
            let Some(value) = (uniform.provider)(state) else {
                continue;
            };
            let location = &uniform.location;
            match value {
                UniformValue::Int(v) => gl.uniform1i(location, v),
                UniformValue::Bool(v) => gl.uniform1i(location, v as i32),
                UniformValue::Float(v) => gl.uniform1f(location, v),
                UniformValue::Vec2(v) => gl.uniform2fv(location, &v),
                UniformValue::Vec3(v) => gl.uniform3fv(location, &v),
                UniformValue::Vec4(v) => gl.uniform4fv(location, &v),
                UniformValue::Mat3(m) => gl.uniform_matrix3fv(location, &m.to_cols_array()),
                UniformValue::Mat4(m) => gl.uniform_matrix4fv(location, &m.to_cols_array()),
                UniformValue::Texture(slot) => {
                    let Some(texture) = state.texture(slot) else {
                        debug!(target: "shader", "{}: no texture for '{}'", self.name, uniform.name);
                        continue;
                    };
                    gl.active_texture(gl::TEXTURE0 + *texture_unit);
                    gl.bind_texture(uniform.texture_target, Some(texture));
                    gl.uniform1i(location, *texture_unit as i32);
                    *texture_unit += 1;
                }
            }
        }

        for block in &self.blocks {
            let mut data: Vec<f32> = Vec::with_capacity(block.members.len() * 16);
            for member in &block.members {
                let matrix = match member(state) {
                    Some(UniformValue::Mat4(m)) => m,
                    _ => Mat4::IDENTITY,
                };
                data.extend_from_slice(&matrix.to_cols_array());
            }
            gl.bind_buffer(gl::UNIFORM_BUFFER, Some(&block.buffer));
            gl.buffer_data(gl::UNIFORM_BUFFER, bytemuck::cast_slice(&data), gl::DYNAMIC_DRAW);
            gl.bind_buffer_base(gl::UNIFORM_BUFFER, block.binding, Some(&block.buffer));
        }
    }

    pub fn destroy(&self, gl: &G) {
        for block in &self.blocks {
            gl.delete_buffer(&block.buffer);
        }
        gl.delete_program(&self.handle);
    }
}

/// Compile and link a vertex/fragment pair
pub fn compile_program<G: GlContext>(
    gl: &G,
    name: &str,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<G::Program> {
    let vert_shader = compile_shader(gl, name, gl::VERTEX_SHADER, vertex_src)?;
    let frag_shader = match compile_shader(gl, name, gl::FRAGMENT_SHADER, fragment_src) {
        Ok(shader) => shader,
        Err(e) => {
            gl.delete_shader(&vert_shader);
            return Err(e);
        }
    };

    let program = gl
        .create_program()
        .ok_or(RenderError::ResourceCreation("shader program"))?;

    gl.attach_shader(&program, &vert_shader);
    gl.attach_shader(&program, &frag_shader);
    gl.link_program(&program);

    gl.delete_shader(&vert_shader);
    gl.delete_shader(&frag_shader);

    if !gl.program_link_status(&program) {
        let log = gl
            .program_info_log(&program)
            .unwrap_or_else(|| "Unknown error".to_string());
        gl.delete_program(&program);
        return Err(RenderError::ShaderLink {
            program: name.to_string(),
            log,
        });
    }

    Ok(program)
}

/// Compile a single shader
fn compile_shader<G: GlContext>(
    gl: &G,
    name: &str,
    shader_type: u32,
    source: &str,
) -> Result<G::Shader> {
    let shader = gl
        .create_shader(shader_type)
        .ok_or(RenderError::ResourceCreation("shader object"))?;

    gl.shader_source(&shader, source);
    gl.compile_shader(&shader);

    if !gl.shader_compile_status(&shader) {
        let log = gl
            .shader_info_log(&shader)
            .unwrap_or_else(|| "Unknown error".to_string());
        gl.delete_shader(&shader);
        return Err(RenderError::ShaderCompile {
            program: name.to_string(),
            log,
        });
    }

    Ok(shader)
}
