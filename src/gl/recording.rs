//! Headless [`GlContext`] that records calls instead of talking to a GPU.

use super::*;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub mode: u32,
    pub count: i32,
    pub instances: i32,
    pub program: Option<u32>,
    pub render_pass: Option<i32>,
    pub cull_face: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UniformRecord {
    Int(i32),
    Floats(Vec<f32>),
}

/// Level 0 of a texture, RGBA components stored per the internal format
#[derive(Clone, Debug, Default)]
pub struct TextureRecord {
    pub internal_format: u32,
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
    pub uploads: usize,
}

impl TextureRecord {
    fn bytes_per_pixel(&self) -> usize {
        match self.internal_format {
            RGBA32I => 16,
            _ => 4,
        }
    }

    fn pixel_offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * self.bytes_per_pixel())
    }

    fn components(&self, x: i32, y: i32) -> [i64; 4] {
        let Some(offset) = self.pixel_offset(x, y) else {
            return [0; 4];
        };
        let pixel = &self.data[offset..offset + self.bytes_per_pixel()];
        let mut out = [0i64; 4];
        for (i, c) in out.iter_mut().enumerate() {
            *c = if pixel.len() == 16 {
                i32::from_le_bytes([pixel[i * 4], pixel[i * 4 + 1], pixel[i * 4 + 2], pixel[i * 4 + 3]])
                    as i64
            } else {
                pixel[i] as i64
            };
        }
        out
    }

    fn set_components(&mut self, x: i32, y: i32, components: [i64; 4]) {
        let Some(offset) = self.pixel_offset(x, y) else {
            return;
        };
        let wide = self.bytes_per_pixel() == 16;
        for (i, c) in components.iter().enumerate() {
            if wide {
                let bytes = (*c as i32).to_le_bytes();
                self.data[offset + i * 4..offset + i * 4 + 4].copy_from_slice(&bytes);
            } else {
                self.data[offset + i] = (*c).clamp(0, 255) as u8;
            }
        }
    }

    fn fill(&mut self, components: [i64; 4]) {
        for y in 0..self.height {
            for x in 0..self.width {
                self.set_components(x, y, components);
            }
        }
    }
}

#[derive(Default)]
struct ProgramRecord {
    shaders: Vec<u32>,
    attributes: Vec<ActiveInfo>,
    uniforms: Vec<ActiveInfo>,
    blocks: Vec<String>,
    linked: bool,
}

#[derive(Default)]
pub struct Recorded {
    pub draws: Vec<DrawRecord>,
    pub buffers: HashMap<u32, Vec<u8>>,
    pub buffer_sub_data_calls: usize,
    pub use_program_calls: usize,
    pub programs_created: usize,
    pub programs_deleted: usize,
    pub vertex_arrays_created: usize,
    pub uniforms: HashMap<(u32, String), UniformRecord>,
    pub enabled: HashSet<u32>,
    pub clears: usize,
    pub textures: HashMap<u32, TextureRecord>,
    /// Attachment to texture, per framebuffer
    pub framebuffers: HashMap<u32, HashMap<u32, u32>>,
    pub draw_buffers: Vec<u32>,
    /// Texture unit and texture of every sampler binding
    pub texture_binds: Vec<(u32, u32)>,
    bound_buffers: HashMap<u32, u32>,
    bound_textures: HashMap<u32, u32>,
    active_unit: u32,
    bound_framebuffer: Option<u32>,
    read_source: Option<u32>,
    shader_sources: HashMap<u32, (u32, String)>,
    programs: HashMap<u32, ProgramRecord>,
    current_program: Option<u32>,
}

/// Records GL calls; programs "link" by parsing declarations out of the GLSL
#[derive(Default)]
pub struct RecordingContext {
    pub state: RefCell<Recorded>,
    next_id: Cell<u32>,
    /// Fail compilation of any shader whose source contains this text
    pub fail_compile_containing: RefCell<Option<String>>,
    /// Refuse new buffers once this many are alive
    pub max_buffers: Cell<Option<usize>>,
}

impl RecordingContext {
    pub fn new() -> RecordingContext {
        RecordingContext::default()
    }

    fn next(&self) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn program_uniform_names(&self, program: u32) -> Vec<String> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.uniforms.iter().map(|u| u.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn texture(&self, texture: u32) -> Option<TextureRecord> {
        self.state.borrow().textures.get(&texture).cloned()
    }

    /// Stand in for a fragment written by a draw
    pub fn write_pixel(&self, texture: u32, x: i32, y: i32, components: [i32; 4]) {
        if let Some(record) = self.state.borrow_mut().textures.get_mut(&texture) {
            record.set_components(x, y, components.map(i64::from));
        }
    }

    fn attachment_texture(state: &Recorded, attachment: u32) -> Option<u32> {
        let framebuffer = state.bound_framebuffer?;
        state.framebuffers.get(&framebuffer)?.get(&attachment).copied()
    }

    fn clear_attachment(&self, buffer: u32, draw_buffer: i32, components: [i64; 4]) {
        if buffer != COLOR {
            return;
        }
        let mut state = self.state.borrow_mut();
        let attachment = state
            .draw_buffers
            .get(draw_buffer as usize)
            .copied()
            .unwrap_or(COLOR_ATTACHMENT0 + draw_buffer as u32);
        if let Some(texture) = Self::attachment_texture(&state, attachment) {
            if let Some(record) = state.textures.get_mut(&texture) {
                record.fill(components);
            }
        }
    }

    pub fn draw_count(&self) -> usize {
        self.state.borrow().draws.len()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn clear_draws(&self) {
        self.state.borrow_mut().draws.clear();
    }

    pub fn buffer_bytes(&self, buffer: u32) -> Vec<u8> {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .cloned()
            .unwrap_or_default()
    }

    fn record_draw(&self, mode: u32, count: i32, instances: i32) {
        let mut state = self.state.borrow_mut();
        let program = state.current_program;
        let render_pass = program.and_then(|p| {
            match state.uniforms.get(&(p, "renderPass".to_string())) {
                Some(UniformRecord::Int(v)) => Some(*v),
                _ => None,
            }
        });
        let cull_face = state.enabled.contains(&CULL_FACE);
        state.draws.push(DrawRecord {
            mode,
            count,
            instances,
            program,
            render_pass,
            cull_face,
        });
    }

    fn set_uniform(&self, location: &(u32, String), value: UniformRecord) {
        self.state
            .borrow_mut()
            .uniforms
            .insert(location.clone(), value);
    }
}

fn glsl_type(name: &str) -> u32 {
    match name {
        "float" => FLOAT,
        "vec2" => FLOAT_VEC2,
        "vec3" => FLOAT_VEC3,
        "vec4" => FLOAT_VEC4,
        "int" => INT,
        "ivec2" => INT_VEC2,
        "ivec3" => INT_VEC3,
        "ivec4" => INT_VEC4,
        "uint" => UNSIGNED_INT,
        "uvec4" => UNSIGNED_INT_VEC4,
        "bool" => BOOL,
        "mat3" => FLOAT_MAT3,
        "mat4" => FLOAT_MAT4,
        "sampler2D" => SAMPLER_2D,
        "samplerCube" => SAMPLER_CUBE,
        _ => 0,
    }
}

const QUALIFIERS: [&str; 6] = ["flat", "highp", "mediump", "lowp", "smooth", "centroid"];

/// Parses `<storage> [qualifiers] <type> <name>[N];` declarations
fn parse_declarations(source: &str, storage: &str) -> (Vec<ActiveInfo>, Vec<String>) {
    let mut infos = Vec::new();
    let mut blocks = Vec::new();
    let mut in_block = false;
    for raw in source.lines() {
        let line = raw.trim();
        if in_block {
            if line.starts_with('}') {
                in_block = false;
            }
            continue;
        }
        let line = line.strip_prefix("layout(std140) ").unwrap_or(line);
        let mut words: Vec<&str> = line
            .trim_end_matches(';')
            .split_whitespace()
            .filter(|w| !QUALIFIERS.contains(w))
            .collect();
        if words.first() != Some(&storage) {
            continue;
        }
        words.remove(0);
        if words.len() == 2 && words[1] == "{" {
            blocks.push(words[0].to_string());
            in_block = true;
            continue;
        }
        if words.len() != 2 {
            continue;
        }
        let (name, size) = match words[1].split_once('[') {
            Some((name, rest)) => (name, rest.trim_end_matches(']').parse().unwrap_or(1)),
            None => (words[1], 1),
        };
        infos.push(ActiveInfo {
            name: name.to_string(),
            gl_type: glsl_type(words[0]),
            size,
        });
    }
    (infos, blocks)
}

impl GlContext for RecordingContext {
    type Buffer = u32;
    type Shader = u32;
    type Program = u32;
    type VertexArray = u32;
    type UniformLocation = (u32, String);
    type Texture = u32;
    type Framebuffer = u32;

    fn create_buffer(&self) -> Option<u32> {
        if let Some(max) = self.max_buffers.get() {
            if self.state.borrow().buffers.len() >= max {
                return None;
            }
        }
        let id = self.next();
        self.state.borrow_mut().buffers.insert(id, Vec::new());
        Some(id)
    }

    fn delete_buffer(&self, buffer: &u32) {
        self.state.borrow_mut().buffers.remove(buffer);
    }

    fn bind_buffer(&self, target: u32, buffer: Option<&u32>) {
        let mut state = self.state.borrow_mut();
        match buffer {
            Some(id) => state.bound_buffers.insert(target, *id),
            None => state.bound_buffers.remove(&target),
        };
    }

    fn buffer_data(&self, target: u32, data: &[u8], _usage: u32) {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.bound_buffers.get(&target).copied() {
            state.buffers.insert(id, data.to_vec());
        }
    }

    fn buffer_sub_data(&self, target: u32, dst_byte_offset: i32, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.buffer_sub_data_calls += 1;
        if let Some(id) = state.bound_buffers.get(&target).copied() {
            if let Some(bytes) = state.buffers.get_mut(&id) {
                let start = dst_byte_offset as usize;
                let end = start + data.len();
                if bytes.len() < end {
                    bytes.resize(end, 0);
                }
                bytes[start..end].copy_from_slice(data);
            }
        }
    }

    fn bind_buffer_base(&self, _target: u32, _index: u32, _buffer: Option<&u32>) {}

    fn create_vertex_array(&self) -> Option<u32> {
        self.state.borrow_mut().vertex_arrays_created += 1;
        Some(self.next())
    }

    fn bind_vertex_array(&self, _vao: Option<&u32>) {}

    fn delete_vertex_array(&self, _vao: &u32) {}

    fn enable_vertex_attrib_array(&self, _location: u32) {}

    fn vertex_attrib_pointer(
        &self,
        _location: u32,
        _size: i32,
        _data_type: u32,
        _normalized: bool,
        _stride: i32,
        _offset: i32,
    ) {
    }

    fn vertex_attrib_i_pointer(
        &self,
        _location: u32,
        _size: i32,
        _data_type: u32,
        _stride: i32,
        _offset: i32,
    ) {
    }

    fn vertex_attrib_divisor(&self, _location: u32, _divisor: u32) {}

    fn create_shader(&self, shader_type: u32) -> Option<u32> {
        let id = self.next();
        self.state
            .borrow_mut()
            .shader_sources
            .insert(id, (shader_type, String::new()));
        Some(id)
    }

    fn shader_source(&self, shader: &u32, source: &str) {
        if let Some(entry) = self.state.borrow_mut().shader_sources.get_mut(shader) {
            entry.1 = source.to_string();
        }
    }

    fn compile_shader(&self, _shader: &u32) {}

    fn shader_compile_status(&self, shader: &u32) -> bool {
        let fail = self.fail_compile_containing.borrow();
        match (fail.as_deref(), self.state.borrow().shader_sources.get(shader)) {
            (Some(needle), Some((_, source))) => !source.contains(needle),
            _ => true,
        }
    }

    fn shader_info_log(&self, _shader: &u32) -> Option<String> {
        Some("ERROR: 0:1: simulated failure".to_string())
    }

    fn delete_shader(&self, _shader: &u32) {}

    fn create_program(&self) -> Option<u32> {
        let id = self.next();
        let mut state = self.state.borrow_mut();
        state.programs_created += 1;
        state.programs.insert(id, ProgramRecord::default());
        Some(id)
    }

    fn attach_shader(&self, program: &u32, shader: &u32) {
        if let Some(record) = self.state.borrow_mut().programs.get_mut(program) {
            record.shaders.push(*shader);
        }
    }

    fn link_program(&self, program: &u32) {
        let mut state = self.state.borrow_mut();
        let sources: Vec<(u32, String)> = match state.programs.get(program) {
            Some(record) => record
                .shaders
                .iter()
                .filter_map(|s| state.shader_sources.get(s).cloned())
                .collect(),
            None => return,
        };
        let mut attributes = Vec::new();
        let mut uniforms: Vec<ActiveInfo> = Vec::new();
        let mut blocks = Vec::new();
        for (shader_type, source) in &sources {
            if *shader_type == VERTEX_SHADER {
                attributes.extend(parse_declarations(source, "in").0);
            }
            let (infos, found_blocks) = parse_declarations(source, "uniform");
            for info in infos {
                if !uniforms.iter().any(|u| u.name == info.name) {
                    uniforms.push(info);
                }
            }
            for block in found_blocks {
                if !blocks.contains(&block) {
                    blocks.push(block);
                }
            }
        }
        if let Some(record) = state.programs.get_mut(program) {
            record.attributes = attributes;
            record.uniforms = uniforms;
            record.blocks = blocks;
            record.linked = true;
        }
    }

    fn program_link_status(&self, program: &u32) -> bool {
        self.state
            .borrow()
            .programs
            .get(program)
            .map(|p| p.linked)
            .unwrap_or(false)
    }

    fn program_info_log(&self, _program: &u32) -> Option<String> {
        None
    }

    fn use_program(&self, program: Option<&u32>) {
        let mut state = self.state.borrow_mut();
        state.use_program_calls += 1;
        state.current_program = program.copied();
    }

    fn delete_program(&self, program: &u32) {
        let mut state = self.state.borrow_mut();
        state.programs_deleted += 1;
        state.programs.remove(program);
    }

    fn active_attributes(&self, program: &u32) -> Vec<ActiveInfo> {
        self.state
            .borrow()
            .programs
            .get(program)
            .map(|p| p.attributes.clone())
            .unwrap_or_default()
    }

    fn active_uniforms(&self, program: &u32) -> Vec<ActiveInfo> {
        self.state
            .borrow()
            .programs
            .get(program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn attrib_location(&self, program: &u32, name: &str) -> i32 {
        self.state
            .borrow()
            .programs
            .get(program)
            .and_then(|p| p.attributes.iter().position(|a| a.name == name))
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    fn uniform_location(&self, program: &u32, name: &str) -> Option<(u32, String)> {
        let state = self.state.borrow();
        let record = state.programs.get(program)?;
        record
            .uniforms
            .iter()
            .any(|u| u.name == name)
            .then(|| (*program, name.to_string()))
    }

    fn uniform_block_index(&self, program: &u32, name: &str) -> u32 {
        self.state
            .borrow()
            .programs
            .get(program)
            .and_then(|p| p.blocks.iter().position(|b| b == name))
            .map(|i| i as u32)
            .unwrap_or(u32::MAX)
    }

    fn uniform_block_binding(&self, _program: &u32, _block_index: u32, _binding: u32) {}

    fn uniform1i(&self, location: &(u32, String), value: i32) {
        self.set_uniform(location, UniformRecord::Int(value));
    }

    fn uniform1f(&self, location: &(u32, String), value: f32) {
        self.set_uniform(location, UniformRecord::Floats(vec![value]));
    }

    fn uniform2fv(&self, location: &(u32, String), value: &[f32]) {
        self.set_uniform(location, UniformRecord::Floats(value.to_vec()));
    }

    fn uniform3fv(&self, location: &(u32, String), value: &[f32]) {
        self.set_uniform(location, UniformRecord::Floats(value.to_vec()));
    }

    fn uniform4fv(&self, location: &(u32, String), value: &[f32]) {
        self.set_uniform(location, UniformRecord::Floats(value.to_vec()));
    }

    fn uniform_matrix3fv(&self, location: &(u32, String), value: &[f32]) {
        self.set_uniform(location, UniformRecord::Floats(value.to_vec()));
    }

    fn uniform_matrix4fv(&self, location: &(u32, String), value: &[f32]) {
        self.set_uniform(location, UniformRecord::Floats(value.to_vec()));
    }

    fn create_texture(&self) -> Option<u32> {
        let id = self.next();
        self.state
            .borrow_mut()
            .textures
            .insert(id, TextureRecord::default());
        Some(id)
    }

    fn delete_texture(&self, texture: &u32) {
        self.state.borrow_mut().textures.remove(texture);
    }

    fn active_texture(&self, unit: u32) {
        self.state.borrow_mut().active_unit = unit.saturating_sub(TEXTURE0);
    }

    fn bind_texture(&self, target: u32, texture: Option<&u32>) {
        let mut state = self.state.borrow_mut();
        match texture {
            Some(id) => {
                state.bound_textures.insert(target, *id);
                let unit = state.active_unit;
                state.texture_binds.push((unit, *id));
            }
            None => {
                state.bound_textures.remove(&target);
            }
        }
    }

    fn tex_image_2d(
        &self,
        target: u32,
        internal_format: u32,
        width: i32,
        height: i32,
        _format: u32,
        _data_type: u32,
        pixels: Option<&[u8]>,
    ) -> Result<()> {
        let bind_target = if (TEXTURE_CUBE_MAP_POSITIVE_X..TEXTURE_CUBE_MAP_POSITIVE_X + 6).contains(&target) {
            TEXTURE_CUBE_MAP
        } else {
            target
        };
        let mut state = self.state.borrow_mut();
        let texture = state
            .bound_textures
            .get(&bind_target)
            .copied()
            .ok_or(crate::error::RenderError::ResourceCreation("texture image"))?;
        let record = state
            .textures
            .get_mut(&texture)
            .ok_or(crate::error::RenderError::ResourceCreation("texture image"))?;
        record.internal_format = internal_format;
        record.width = width;
        record.height = height;
        let size = width as usize * height as usize * record.bytes_per_pixel();
        record.data = match pixels {
            Some(pixels) if pixels.len() < size => {
                return Err(crate::error::RenderError::ResourceCreation("texture image"))
            }
            Some(pixels) => pixels[..size].to_vec(),
            None => vec![0; size],
        };
        record.uploads += 1;
        Ok(())
    }

    fn tex_parameteri(&self, _target: u32, _pname: u32, _param: i32) {}

    fn create_framebuffer(&self) -> Option<u32> {
        let id = self.next();
        self.state
            .borrow_mut()
            .framebuffers
            .insert(id, HashMap::new());
        Some(id)
    }

    fn delete_framebuffer(&self, framebuffer: &u32) {
        self.state.borrow_mut().framebuffers.remove(framebuffer);
    }

    fn bind_framebuffer(&self, _target: u32, framebuffer: Option<&u32>) {
        let mut state = self.state.borrow_mut();
        state.bound_framebuffer = framebuffer.copied();
        if framebuffer.is_none() {
            state.draw_buffers.clear();
            state.read_source = None;
        }
    }

    fn framebuffer_texture_2d(
        &self,
        _target: u32,
        attachment: u32,
        _tex_target: u32,
        texture: Option<&u32>,
    ) {
        let mut state = self.state.borrow_mut();
        let Some(framebuffer) = state.bound_framebuffer else {
            return;
        };
        if let Some(attachments) = state.framebuffers.get_mut(&framebuffer) {
            match texture {
                Some(texture) => attachments.insert(attachment, *texture),
                None => attachments.remove(&attachment),
            };
        }
    }

    fn check_framebuffer_status(&self, _target: u32) -> u32 {
        let state = self.state.borrow();
        let complete = state
            .bound_framebuffer
            .and_then(|f| state.framebuffers.get(&f))
            .is_some_and(|attachments| !attachments.is_empty());
        if complete {
            FRAMEBUFFER_COMPLETE
        } else {
            0
        }
    }

    fn draw_buffers(&self, buffers: &[u32]) {
        self.state.borrow_mut().draw_buffers = buffers.to_vec();
    }

    fn read_buffer(&self, source: u32) {
        self.state.borrow_mut().read_source = Some(source);
    }

    fn clear_buffer_fv(&self, buffer: u32, draw_buffer: i32, values: &[f32]) {
        let mut components = [0i64; 4];
        for (c, v) in components.iter_mut().zip(values) {
            *c = (v.clamp(0.0, 1.0) * 255.0).round() as i64;
        }
        self.clear_attachment(buffer, draw_buffer, components);
    }

    fn clear_buffer_iv(&self, buffer: u32, draw_buffer: i32, values: &[i32]) {
        let mut components = [0i64; 4];
        for (c, v) in components.iter_mut().zip(values) {
            *c = *v as i64;
        }
        self.clear_attachment(buffer, draw_buffer, components);
    }

    fn clear_buffer_uiv(&self, buffer: u32, draw_buffer: i32, values: &[u32]) {
        let mut components = [0i64; 4];
        for (c, v) in components.iter_mut().zip(values) {
            *c = *v as i64;
        }
        self.clear_attachment(buffer, draw_buffer, components);
    }

    fn read_pixels(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        _format: u32,
        data_type: u32,
        dst: &mut [u8],
    ) -> Result<()> {
        let state = self.state.borrow();
        let source = state.read_source.unwrap_or(COLOR_ATTACHMENT0);
        let record = Self::attachment_texture(&state, source)
            .and_then(|t| state.textures.get(&t))
            .ok_or(crate::error::RenderError::ResourceCreation("pixel read"))?;
        let wide = matches!(data_type, INT | UNSIGNED_INT);
        let pixel_size = if wide { 16 } else { 4 };
        for row in 0..height {
            for col in 0..width {
                let offset = (row as usize * width as usize + col as usize) * pixel_size;
                let Some(out) = dst.get_mut(offset..offset + pixel_size) else {
                    return Err(crate::error::RenderError::ResourceCreation("pixel read"));
                };
                let components = record.components(x + col, y + row);
                for (i, c) in components.iter().enumerate() {
                    if wide {
                        out[i * 4..i * 4 + 4].copy_from_slice(&(*c as i32).to_le_bytes());
                    } else {
                        out[i] = (*c).clamp(0, 255) as u8;
                    }
                }
            }
        }
        Ok(())
    }

    fn enable(&self, cap: u32) {
        self.state.borrow_mut().enabled.insert(cap);
    }

    fn disable(&self, cap: u32) {
        self.state.borrow_mut().enabled.remove(&cap);
    }

    fn cull_face(&self, _mode: u32) {}

    fn front_face(&self, _mode: u32) {}

    fn blend_func(&self, _src: u32, _dst: u32) {}

    fn depth_mask(&self, _flag: bool) {}

    fn depth_func(&self, _func: u32) {}

    fn viewport(&self, _x: i32, _y: i32, _width: i32, _height: i32) {}

    fn clear_color(&self, _r: f32, _g: f32, _b: f32, _a: f32) {}

    fn clear(&self, _mask: u32) {
        self.state.borrow_mut().clears += 1;
    }

    fn draw_arrays(&self, mode: u32, _first: i32, count: i32) {
        self.record_draw(mode, count, 1);
    }

    fn draw_elements(&self, mode: u32, count: i32, _index_type: u32, _byte_offset: i32) {
        self.record_draw(mode, count, 1);
    }

    fn draw_arrays_instanced(&self, mode: u32, _first: i32, count: i32, instance_count: i32) {
        self.record_draw(mode, count, instance_count);
    }

    fn draw_elements_instanced(
        &self,
        mode: u32,
        count: i32,
        _index_type: u32,
        _byte_offset: i32,
        instance_count: i32,
    ) {
        self.record_draw(mode, count, instance_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declarations_skips_block_members() {
        let source = "#version 300 es\nuniform mat4 projMatrix;\nlayout(std140) uniform Matrices {\n    mat4 viewMatrix;\n};\nuniform vec3 sectionPlanePos[2];\nin vec3 position;\n";
        let (uniforms, blocks) = parse_declarations(source, "uniform");
        assert_eq!(uniforms.len(), 2);
        assert_eq!(uniforms[0].name, "projMatrix");
        assert_eq!(uniforms[0].gl_type, FLOAT_MAT4);
        assert_eq!(uniforms[1].size, 2);
        assert_eq!(blocks, vec!["Matrices".to_string()]);
        let (attributes, _) = parse_declarations(source, "in");
        assert_eq!(attributes[0].name, "position");
    }

    #[test]
    fn test_flat_qualifier_is_ignored() {
        let (infos, _) = parse_declarations("flat in uint vFlags;", "in");
        assert_eq!(infos[0].gl_type, UNSIGNED_INT);
    }
}
