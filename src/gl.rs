//! Narrow OpenGL-ES-3 surface consumed by the layer engine.
//!
//! Everything that touches the GPU goes through [`GlContext`]. The production
//! backend is `web_sys::WebGl2RenderingContext`; tests run against a recording
//! context that never touches a browser.

mod webgl;

#[cfg(test)]
pub(crate) mod recording;

use crate::error::Result;
use web_sys::WebGl2RenderingContext as Gl2;

// WebGL constants
pub const ARRAY_BUFFER: u32 = Gl2::ARRAY_BUFFER;
pub const ELEMENT_ARRAY_BUFFER: u32 = Gl2::ELEMENT_ARRAY_BUFFER;
pub const UNIFORM_BUFFER: u32 = Gl2::UNIFORM_BUFFER;
pub const STATIC_DRAW: u32 = Gl2::STATIC_DRAW;
pub const DYNAMIC_DRAW: u32 = Gl2::DYNAMIC_DRAW;
pub const VERTEX_SHADER: u32 = Gl2::VERTEX_SHADER;
pub const FRAGMENT_SHADER: u32 = Gl2::FRAGMENT_SHADER;

pub const POINTS: u32 = Gl2::POINTS;
pub const LINES: u32 = Gl2::LINES;
pub const TRIANGLES: u32 = Gl2::TRIANGLES;

pub const BYTE: u32 = Gl2::BYTE;
pub const UNSIGNED_BYTE: u32 = Gl2::UNSIGNED_BYTE;
pub const SHORT: u32 = Gl2::SHORT;
pub const UNSIGNED_SHORT: u32 = Gl2::UNSIGNED_SHORT;
pub const INT: u32 = Gl2::INT;
pub const UNSIGNED_INT: u32 = Gl2::UNSIGNED_INT;
pub const FLOAT: u32 = Gl2::FLOAT;

pub const FLOAT_VEC2: u32 = Gl2::FLOAT_VEC2;
pub const FLOAT_VEC3: u32 = Gl2::FLOAT_VEC3;
pub const FLOAT_VEC4: u32 = Gl2::FLOAT_VEC4;
pub const INT_VEC2: u32 = Gl2::INT_VEC2;
pub const INT_VEC3: u32 = Gl2::INT_VEC3;
pub const INT_VEC4: u32 = Gl2::INT_VEC4;
pub const UNSIGNED_INT_VEC4: u32 = Gl2::UNSIGNED_INT_VEC4;
pub const BOOL: u32 = Gl2::BOOL;
pub const FLOAT_MAT3: u32 = Gl2::FLOAT_MAT3;
pub const FLOAT_MAT4: u32 = Gl2::FLOAT_MAT4;
pub const SAMPLER_2D: u32 = Gl2::SAMPLER_2D;
pub const SAMPLER_CUBE: u32 = Gl2::SAMPLER_CUBE;

pub const TEXTURE0: u32 = Gl2::TEXTURE0;
pub const TEXTURE_2D: u32 = Gl2::TEXTURE_2D;
pub const TEXTURE_CUBE_MAP: u32 = Gl2::TEXTURE_CUBE_MAP;
pub const TEXTURE_CUBE_MAP_POSITIVE_X: u32 = Gl2::TEXTURE_CUBE_MAP_POSITIVE_X;
pub const TEXTURE_MIN_FILTER: u32 = Gl2::TEXTURE_MIN_FILTER;
pub const TEXTURE_MAG_FILTER: u32 = Gl2::TEXTURE_MAG_FILTER;
pub const TEXTURE_WRAP_S: u32 = Gl2::TEXTURE_WRAP_S;
pub const TEXTURE_WRAP_T: u32 = Gl2::TEXTURE_WRAP_T;
pub const NEAREST: u32 = Gl2::NEAREST;
pub const LINEAR: u32 = Gl2::LINEAR;
pub const CLAMP_TO_EDGE: u32 = Gl2::CLAMP_TO_EDGE;

pub const RGBA: u32 = Gl2::RGBA;
pub const RGBA8: u32 = Gl2::RGBA8;
pub const RGBA8UI: u32 = Gl2::RGBA8UI;
pub const RGBA32I: u32 = Gl2::RGBA32I;
pub const RGBA_INTEGER: u32 = Gl2::RGBA_INTEGER;
pub const DEPTH_COMPONENT: u32 = Gl2::DEPTH_COMPONENT;
pub const DEPTH_COMPONENT24: u32 = Gl2::DEPTH_COMPONENT24;

pub const FRAMEBUFFER: u32 = Gl2::FRAMEBUFFER;
pub const FRAMEBUFFER_COMPLETE: u32 = Gl2::FRAMEBUFFER_COMPLETE;
pub const COLOR_ATTACHMENT0: u32 = Gl2::COLOR_ATTACHMENT0;
pub const DEPTH_ATTACHMENT: u32 = Gl2::DEPTH_ATTACHMENT;
pub const NONE: u32 = Gl2::NONE;
pub const COLOR: u32 = Gl2::COLOR;
pub const DEPTH: u32 = Gl2::DEPTH;

pub const CULL_FACE: u32 = Gl2::CULL_FACE;
pub const BACK: u32 = Gl2::BACK;
pub const CCW: u32 = Gl2::CCW;
pub const DEPTH_TEST: u32 = Gl2::DEPTH_TEST;
pub const LESS: u32 = Gl2::LESS;
pub const LEQUAL: u32 = Gl2::LEQUAL;
pub const BLEND: u32 = Gl2::BLEND;
pub const SRC_ALPHA: u32 = Gl2::SRC_ALPHA;
pub const ONE_MINUS_SRC_ALPHA: u32 = Gl2::ONE_MINUS_SRC_ALPHA;
pub const COLOR_BUFFER_BIT: u32 = Gl2::COLOR_BUFFER_BIT;
pub const DEPTH_BUFFER_BIT: u32 = Gl2::DEPTH_BUFFER_BIT;

/// Name, GLSL type and array size of an active program input
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveInfo {
    pub name: String,
    pub gl_type: u32,
    pub size: i32,
}

/// The graphics API surface used for buffer uploads, program builds and draws.
///
/// Handle types are associated so a backend can use its native objects.
pub trait GlContext: 'static {
    type Buffer: Clone + 'static;
    type Shader: 'static;
    type Program: Clone + 'static;
    type VertexArray: Clone + 'static;
    type UniformLocation: Clone + 'static;
    type Texture: Clone + 'static;
    type Framebuffer: Clone + 'static;

    fn create_buffer(&self) -> Option<Self::Buffer>;
    fn delete_buffer(&self, buffer: &Self::Buffer);
    fn bind_buffer(&self, target: u32, buffer: Option<&Self::Buffer>);
    fn buffer_data(&self, target: u32, data: &[u8], usage: u32);
    fn buffer_sub_data(&self, target: u32, dst_byte_offset: i32, data: &[u8]);
    fn bind_buffer_base(&self, target: u32, index: u32, buffer: Option<&Self::Buffer>);

    fn create_vertex_array(&self) -> Option<Self::VertexArray>;
    fn bind_vertex_array(&self, vao: Option<&Self::VertexArray>);
    fn delete_vertex_array(&self, vao: &Self::VertexArray);
    fn enable_vertex_attrib_array(&self, location: u32);
    fn vertex_attrib_pointer(
        &self,
        location: u32,
        size: i32,
        data_type: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    );
    fn vertex_attrib_i_pointer(
        &self,
        location: u32,
        size: i32,
        data_type: u32,
        stride: i32,
        offset: i32,
    );
    fn vertex_attrib_divisor(&self, location: u32, divisor: u32);

    fn create_shader(&self, shader_type: u32) -> Option<Self::Shader>;
    fn shader_source(&self, shader: &Self::Shader, source: &str);
    fn compile_shader(&self, shader: &Self::Shader);
    fn shader_compile_status(&self, shader: &Self::Shader) -> bool;
    fn shader_info_log(&self, shader: &Self::Shader) -> Option<String>;
    fn delete_shader(&self, shader: &Self::Shader);

    fn create_program(&self) -> Option<Self::Program>;
    fn attach_shader(&self, program: &Self::Program, shader: &Self::Shader);
    fn link_program(&self, program: &Self::Program);
    fn program_link_status(&self, program: &Self::Program) -> bool;
    fn program_info_log(&self, program: &Self::Program) -> Option<String>;
    fn use_program(&self, program: Option<&Self::Program>);
    fn delete_program(&self, program: &Self::Program);

    fn active_attributes(&self, program: &Self::Program) -> Vec<ActiveInfo>;
    fn active_uniforms(&self, program: &Self::Program) -> Vec<ActiveInfo>;
    fn attrib_location(&self, program: &Self::Program, name: &str) -> i32;
    fn uniform_location(
        &self,
        program: &Self::Program,
        name: &str,
    ) -> Option<Self::UniformLocation>;
    fn uniform_block_index(&self, program: &Self::Program, name: &str) -> u32;
    fn uniform_block_binding(&self, program: &Self::Program, block_index: u32, binding: u32);

    fn uniform1i(&self, location: &Self::UniformLocation, value: i32);
    fn uniform1f(&self, location: &Self::UniformLocation, value: f32);
    fn uniform2fv(&self, location: &Self::UniformLocation, value: &[f32]);
    fn uniform3fv(&self, location: &Self::UniformLocation, value: &[f32]);
    fn uniform4fv(&self, location: &Self::UniformLocation, value: &[f32]);
    fn uniform_matrix3fv(&self, location: &Self::UniformLocation, value: &[f32]);
    fn uniform_matrix4fv(&self, location: &Self::UniformLocation, value: &[f32]);

    fn create_texture(&self) -> Option<Self::Texture>;
    fn delete_texture(&self, texture: &Self::Texture);
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: u32, texture: Option<&Self::Texture>);
    /// Allocate level 0 of the bound texture, uploading `pixels` when given
    fn tex_image_2d(
        &self,
        target: u32,
        internal_format: u32,
        width: i32,
        height: i32,
        format: u32,
        data_type: u32,
        pixels: Option<&[u8]>,
    ) -> Result<()>;
    fn tex_parameteri(&self, target: u32, pname: u32, param: i32);

    fn create_framebuffer(&self) -> Option<Self::Framebuffer>;
    fn delete_framebuffer(&self, framebuffer: &Self::Framebuffer);
    fn bind_framebuffer(&self, target: u32, framebuffer: Option<&Self::Framebuffer>);
    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        tex_target: u32,
        texture: Option<&Self::Texture>,
    );
    fn check_framebuffer_status(&self, target: u32) -> u32;
    fn draw_buffers(&self, buffers: &[u32]);
    fn read_buffer(&self, source: u32);
    fn clear_buffer_fv(&self, buffer: u32, draw_buffer: i32, values: &[f32]);
    fn clear_buffer_iv(&self, buffer: u32, draw_buffer: i32, values: &[i32]);
    fn clear_buffer_uiv(&self, buffer: u32, draw_buffer: i32, values: &[u32]);
    /// Read a block of the read buffer; `dst` holds `data_type` components
    /// in native byte order
    fn read_pixels(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        data_type: u32,
        dst: &mut [u8],
    ) -> Result<()>;

    fn enable(&self, cap: u32);
    fn disable(&self, cap: u32);
    fn cull_face(&self, mode: u32);
    fn front_face(&self, mode: u32);
    fn blend_func(&self, src: u32, dst: u32);
    fn depth_mask(&self, flag: bool);
    fn depth_func(&self, func: u32);
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);
    fn clear(&self, mask: u32);

    fn draw_arrays(&self, mode: u32, first: i32, count: i32);
    fn draw_elements(&self, mode: u32, count: i32, index_type: u32, byte_offset: i32);
    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instance_count: i32);
    fn draw_elements_instanced(
        &self,
        mode: u32,
        count: i32,
        index_type: u32,
        byte_offset: i32,
        instance_count: i32,
    );
}

/// Byte size of one component of the given GL data type
pub fn data_type_size(data_type: u32) -> i32 {
    match data_type {
        BYTE | UNSIGNED_BYTE => 1,
        SHORT | UNSIGNED_SHORT => 2,
        _ => 4,
    }
}
