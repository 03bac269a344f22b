use super::{ActiveInfo, GlContext};
use crate::error::{RenderError, Result};
use wasm_bindgen::JsValue;
use web_sys::{
    WebGl2RenderingContext, WebGlBuffer, WebGlFramebuffer, WebGlProgram, WebGlShader,
    WebGlTexture, WebGlUniformLocation, WebGlVertexArrayObject,
};

fn active_count(gl: &WebGl2RenderingContext, program: &WebGlProgram, pname: u32) -> u32 {
    gl.get_program_parameter(program, pname)
        .as_f64()
        .map(|n| n as u32)
        .unwrap_or(0)
}

/// Array uniforms report as "name[0]"
fn strip_array_suffix(name: String) -> String {
    match name.strip_suffix("[0]") {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

impl GlContext for WebGl2RenderingContext {
    type Buffer = WebGlBuffer;
    type Shader = WebGlShader;
    type Program = WebGlProgram;
    type VertexArray = WebGlVertexArrayObject;
    type UniformLocation = WebGlUniformLocation;
    type Texture = WebGlTexture;
    type Framebuffer = WebGlFramebuffer;

    fn create_buffer(&self) -> Option<WebGlBuffer> {
        WebGl2RenderingContext::create_buffer(self)
    }

    fn delete_buffer(&self, buffer: &WebGlBuffer) {
        WebGl2RenderingContext::delete_buffer(self, Some(buffer));
    }

    fn bind_buffer(&self, target: u32, buffer: Option<&WebGlBuffer>) {
        WebGl2RenderingContext::bind_buffer(self, target, buffer);
    }

    fn buffer_data(&self, target: u32, data: &[u8], usage: u32) {
        self.buffer_data_with_u8_array(target, data, usage);
    }

    fn buffer_sub_data(&self, target: u32, dst_byte_offset: i32, data: &[u8]) {
        self.buffer_sub_data_with_i32_and_u8_array(target, dst_byte_offset, data);
    }

    fn bind_buffer_base(&self, target: u32, index: u32, buffer: Option<&WebGlBuffer>) {
        WebGl2RenderingContext::bind_buffer_base(self, target, index, buffer);
    }

    fn create_vertex_array(&self) -> Option<WebGlVertexArrayObject> {
        WebGl2RenderingContext::create_vertex_array(self)
    }

    fn bind_vertex_array(&self, vao: Option<&WebGlVertexArrayObject>) {
        WebGl2RenderingContext::bind_vertex_array(self, vao);
    }

    fn delete_vertex_array(&self, vao: &WebGlVertexArrayObject) {
        WebGl2RenderingContext::delete_vertex_array(self, Some(vao));
    }

    fn enable_vertex_attrib_array(&self, location: u32) {
        WebGl2RenderingContext::enable_vertex_attrib_array(self, location);
    }

    fn vertex_attrib_pointer(
        &self,
        location: u32,
        size: i32,
        data_type: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        self.vertex_attrib_pointer_with_i32(location, size, data_type, normalized, stride, offset);
    }

    fn vertex_attrib_i_pointer(
        &self,
        location: u32,
        size: i32,
        data_type: u32,
        stride: i32,
        offset: i32,
    ) {
        self.vertex_attrib_i_pointer_with_i32(location, size, data_type, stride, offset);
    }

    fn vertex_attrib_divisor(&self, location: u32, divisor: u32) {
        WebGl2RenderingContext::vertex_attrib_divisor(self, location, divisor);
    }

    fn create_shader(&self, shader_type: u32) -> Option<WebGlShader> {
        WebGl2RenderingContext::create_shader(self, shader_type)
    }

    fn shader_source(&self, shader: &WebGlShader, source: &str) {
        WebGl2RenderingContext::shader_source(self, shader, source);
    }

    fn compile_shader(&self, shader: &WebGlShader) {
        WebGl2RenderingContext::compile_shader(self, shader);
    }

    fn shader_compile_status(&self, shader: &WebGlShader) -> bool {
        self.get_shader_parameter(shader, WebGl2RenderingContext::COMPILE_STATUS)
            .as_bool()
            .unwrap_or(false)
    }

    fn shader_info_log(&self, shader: &WebGlShader) -> Option<String> {
        self.get_shader_info_log(shader)
    }

    fn delete_shader(&self, shader: &WebGlShader) {
        WebGl2RenderingContext::delete_shader(self, Some(shader));
    }

    fn create_program(&self) -> Option<WebGlProgram> {
        WebGl2RenderingContext::create_program(self)
    }

    fn attach_shader(&self, program: &WebGlProgram, shader: &WebGlShader) {
        WebGl2RenderingContext::attach_shader(self, program, shader);
    }

    fn link_program(&self, program: &WebGlProgram) {
        WebGl2RenderingContext::link_program(self, program);
    }

    fn program_link_status(&self, program: &WebGlProgram) -> bool {
        self.get_program_parameter(program, WebGl2RenderingContext::LINK_STATUS)
            .as_bool()
            .unwrap_or(false)
    }

    fn program_info_log(&self, program: &WebGlProgram) -> Option<String> {
        self.get_program_info_log(program)
    }

    fn use_program(&self, program: Option<&WebGlProgram>) {
        WebGl2RenderingContext::use_program(self, program);
    }

    fn delete_program(&self, program: &WebGlProgram) {
        WebGl2RenderingContext::delete_program(self, Some(program));
    }

    fn active_attributes(&self, program: &WebGlProgram) -> Vec<ActiveInfo> {
        let count = active_count(self, program, WebGl2RenderingContext::ACTIVE_ATTRIBUTES);
        (0..count)
            .filter_map(|i| self.get_active_attrib(program, i))
            .map(|info| ActiveInfo {
                name: info.name(),
                gl_type: info.type_(),
                size: info.size(),
            })
            .collect()
    }

    fn active_uniforms(&self, program: &WebGlProgram) -> Vec<ActiveInfo> {
        let count = active_count(self, program, WebGl2RenderingContext::ACTIVE_UNIFORMS);
        (0..count)
            .filter_map(|i| self.get_active_uniform(program, i))
            .map(|info| ActiveInfo {
                name: strip_array_suffix(info.name()),
                gl_type: info.type_(),
                size: info.size(),
            })
            .collect()
    }

    fn attrib_location(&self, program: &WebGlProgram, name: &str) -> i32 {
        self.get_attrib_location(program, name)
    }

    fn uniform_location(&self, program: &WebGlProgram, name: &str) -> Option<WebGlUniformLocation> {
        self.get_uniform_location(program, name)
    }

    fn uniform_block_index(&self, program: &WebGlProgram, name: &str) -> u32 {
        self.get_uniform_block_index(program, name)
    }

    fn uniform_block_binding(&self, program: &WebGlProgram, block_index: u32, binding: u32) {
        WebGl2RenderingContext::uniform_block_binding(self, program, block_index, binding);
    }

    fn uniform1i(&self, location: &WebGlUniformLocation, value: i32) {
        WebGl2RenderingContext::uniform1i(self, Some(location), value);
    }

    fn uniform1f(&self, location: &WebGlUniformLocation, value: f32) {
        WebGl2RenderingContext::uniform1f(self, Some(location), value);
    }

    fn uniform2fv(&self, location: &WebGlUniformLocation, value: &[f32]) {
        self.uniform2fv_with_f32_array(Some(location), value);
    }

    fn uniform3fv(&self, location: &WebGlUniformLocation, value: &[f32]) {
        self.uniform3fv_with_f32_array(Some(location), value);
    }

    fn uniform4fv(&self, location: &WebGlUniformLocation, value: &[f32]) {
        self.uniform4fv_with_f32_array(Some(location), value);
    }

    fn uniform_matrix3fv(&self, location: &WebGlUniformLocation, value: &[f32]) {
        self.uniform_matrix3fv_with_f32_array(Some(location), false, value);
    }

    fn uniform_matrix4fv(&self, location: &WebGlUniformLocation, value: &[f32]) {
        self.uniform_matrix4fv_with_f32_array(Some(location), false, value);
    }

    fn create_texture(&self) -> Option<WebGlTexture> {
        WebGl2RenderingContext::create_texture(self)
    }

    fn delete_texture(&self, texture: &WebGlTexture) {
        WebGl2RenderingContext::delete_texture(self, Some(texture));
    }

    fn active_texture(&self, unit: u32) {
        WebGl2RenderingContext::active_texture(self, unit);
    }

    fn bind_texture(&self, target: u32, texture: Option<&WebGlTexture>) {
        WebGl2RenderingContext::bind_texture(self, target, texture);
    }

    fn tex_image_2d(
        &self,
        target: u32,
        internal_format: u32,
        width: i32,
        height: i32,
        format: u32,
        data_type: u32,
        pixels: Option<&[u8]>,
    ) -> Result<()> {
        self.tex_image_2d_with_i32_and_i32_and_i32_and_format_and_type_and_opt_u8_array(
            target,
            0,
            internal_format as i32,
            width,
            height,
            0,
            format,
            data_type,
            pixels,
        )
        .map_err(|_| RenderError::ResourceCreation("texture image"))
    }

    fn tex_parameteri(&self, target: u32, pname: u32, param: i32) {
        WebGl2RenderingContext::tex_parameteri(self, target, pname, param);
    }

    fn create_framebuffer(&self) -> Option<WebGlFramebuffer> {
        WebGl2RenderingContext::create_framebuffer(self)
    }

    fn delete_framebuffer(&self, framebuffer: &WebGlFramebuffer) {
        WebGl2RenderingContext::delete_framebuffer(self, Some(framebuffer));
    }

    fn bind_framebuffer(&self, target: u32, framebuffer: Option<&WebGlFramebuffer>) {
        WebGl2RenderingContext::bind_framebuffer(self, target, framebuffer);
    }

    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        tex_target: u32,
        texture: Option<&WebGlTexture>,
    ) {
        WebGl2RenderingContext::framebuffer_texture_2d(
            self, target, attachment, tex_target, texture, 0,
        );
    }

    fn check_framebuffer_status(&self, target: u32) -> u32 {
        WebGl2RenderingContext::check_framebuffer_status(self, target)
    }

    fn draw_buffers(&self, buffers: &[u32]) {
        let buffers: js_sys::Array = buffers.iter().map(|b| JsValue::from(*b)).collect();
        WebGl2RenderingContext::draw_buffers(self, &buffers);
    }

    fn read_buffer(&self, source: u32) {
        WebGl2RenderingContext::read_buffer(self, source);
    }

    fn clear_buffer_fv(&self, buffer: u32, draw_buffer: i32, values: &[f32]) {
        self.clear_bufferfv_with_f32_array(buffer, draw_buffer, values);
    }

    fn clear_buffer_iv(&self, buffer: u32, draw_buffer: i32, values: &[i32]) {
        self.clear_bufferiv_with_i32_array(buffer, draw_buffer, values);
    }

    fn clear_buffer_uiv(&self, buffer: u32, draw_buffer: i32, values: &[u32]) {
        self.clear_bufferuiv_with_u32_array(buffer, draw_buffer, values);
    }

    // Integer reads need a typed array of the matching element type
    fn read_pixels(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        data_type: u32,
        dst: &mut [u8],
    ) -> Result<()> {
        let words = dst.len() / 4;
        let result = match data_type {
            WebGl2RenderingContext::INT => {
                let view = js_sys::Int32Array::new_with_length(words as u32);
                let object: &js_sys::Object = view.as_ref();
                self.read_pixels_with_opt_array_buffer_view(
                    x, y, width, height, format, data_type, Some(object),
                )
                .map(|_| {
                    let mut values = vec![0i32; words];
                    view.copy_to(&mut values);
                    dst[..words * 4].copy_from_slice(bytemuck::cast_slice(&values));
                })
            }
            WebGl2RenderingContext::UNSIGNED_INT => {
                let view = js_sys::Uint32Array::new_with_length(words as u32);
                let object: &js_sys::Object = view.as_ref();
                self.read_pixels_with_opt_array_buffer_view(
                    x, y, width, height, format, data_type, Some(object),
                )
                .map(|_| {
                    let mut values = vec![0u32; words];
                    view.copy_to(&mut values);
                    dst[..words * 4].copy_from_slice(bytemuck::cast_slice(&values));
                })
            }
            _ => self.read_pixels_with_opt_u8_array(
                x,
                y,
                width,
                height,
                format,
                data_type,
                Some(dst),
            ),
        };
        result.map_err(|_| RenderError::ResourceCreation("pixel read"))
    }

    fn enable(&self, cap: u32) {
        WebGl2RenderingContext::enable(self, cap);
    }

    fn disable(&self, cap: u32) {
        WebGl2RenderingContext::disable(self, cap);
    }

    fn cull_face(&self, mode: u32) {
        WebGl2RenderingContext::cull_face(self, mode);
    }

    fn front_face(&self, mode: u32) {
        WebGl2RenderingContext::front_face(self, mode);
    }

    fn blend_func(&self, src: u32, dst: u32) {
        WebGl2RenderingContext::blend_func(self, src, dst);
    }

    fn depth_mask(&self, flag: bool) {
        WebGl2RenderingContext::depth_mask(self, flag);
    }

    fn depth_func(&self, func: u32) {
        WebGl2RenderingContext::depth_func(self, func);
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        WebGl2RenderingContext::viewport(self, x, y, width, height);
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        WebGl2RenderingContext::clear_color(self, r, g, b, a);
    }

    fn clear(&self, mask: u32) {
        WebGl2RenderingContext::clear(self, mask);
    }

    fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        WebGl2RenderingContext::draw_arrays(self, mode, first, count);
    }

    fn draw_elements(&self, mode: u32, count: i32, index_type: u32, byte_offset: i32) {
        self.draw_elements_with_i32(mode, count, index_type, byte_offset);
    }

    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instance_count: i32) {
        WebGl2RenderingContext::draw_arrays_instanced(self, mode, first, count, instance_count);
    }

    fn draw_elements_instanced(
        &self,
        mode: u32,
        count: i32,
        index_type: u32,
        byte_offset: i32,
        instance_count: i32,
    ) {
        self.draw_elements_instanced_with_i32(mode, count, index_type, byte_offset, instance_count);
    }
}
