use crate::error::{RenderError, Result};
use crate::gl::{self, GlContext};
use crate::renderer::shader::BoundAttribute;
use log::debug;
use std::collections::HashMap;

/// Which layer buffer feeds a vertex attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeSource {
    Position,
    Color,
    Normal,
    Uv,
    MetallicRoughness,
    Flags,
    Offset,
    PickColor,
    /// Row of the per-instance 3x4 model matrix
    ModelMatrixRow(u8),
    /// Row of the per-instance 3x4 normal matrix
    NormalMatrixRow(u8),
}

/// Which index set a draw consumes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubGeometry {
    Surface,
    Edges,
    Vertices,
}

/// GPU array buffer with its attribute layout
pub struct ArrayBuf<G: GlContext> {
    pub buffer: G::Buffer,
    pub target: u32,
    pub item_size: i32,
    pub data_type: u32,
    pub normalized: bool,
    /// Read by the shader as an integer attribute
    pub integer: bool,
    pub divisor: u32,
    pub num_items: usize,
}

impl<G: GlContext> ArrayBuf<G> {
    pub fn new(
        gl: &G,
        target: u32,
        data: &[u8],
        item_size: i32,
        data_type: u32,
        usage: u32,
    ) -> Result<ArrayBuf<G>> {
        let buffer = gl
            .create_buffer()
            .ok_or(RenderError::ResourceCreation("array buffer"))?;
        gl.bind_buffer(target, Some(&buffer));
        gl.buffer_data(target, data, usage);
        let component_size = gl::data_type_size(data_type) as usize;
        let num_items = data.len() / component_size.max(1);
        Ok(ArrayBuf {
            buffer,
            target,
            item_size,
            data_type,
            normalized: false,
            integer: false,
            divisor: 0,
            num_items,
        })
    }

    pub fn normalized(mut self) -> Self {
        self.normalized = true;
        self
    }

    pub fn integer(mut self) -> Self {
        self.integer = true;
        self
    }

    pub fn per_instance(mut self) -> Self {
        self.divisor = 1;
        self
    }

    /// Overwrite part of the buffer, `item_offset` counted in components
    pub fn set_data(&self, gl: &G, data: &[u8], item_offset: usize) {
        let byte_offset = item_offset * gl::data_type_size(self.data_type) as usize;
        gl.bind_buffer(self.target, Some(&self.buffer));
        gl.buffer_sub_data(self.target, byte_offset as i32, data);
    }

    fn bind_attribute(&self, gl: &G, location: u32) {
        gl.bind_buffer(gl::ARRAY_BUFFER, Some(&self.buffer));
        gl.enable_vertex_attrib_array(location);
        if self.integer {
            gl.vertex_attrib_i_pointer(location, self.item_size, self.data_type, 0, 0);
        } else {
            gl.vertex_attrib_pointer(
                location,
                self.item_size,
                self.data_type,
                self.normalized,
                0,
                0,
            );
        }
        if self.divisor > 0 {
            gl.vertex_attrib_divisor(location, self.divisor);
        }
    }

    pub fn destroy(&self, gl: &G) {
        gl.delete_buffer(&self.buffer);
    }
}

/// Buffer set of one layer plus its vertex array objects, cached per
/// attribute layout
pub struct LayerBuffers<G: GlContext> {
    pub primitive_mode: u32,
    pub attributes: HashMap<AttributeSource, ArrayBuf<G>>,
    pub indices: Option<ArrayBuf<G>>,
    pub edge_indices: Option<ArrayBuf<G>>,
    pub num_vertices: usize,
    /// Set for instanced layers
    pub num_instances: Option<usize>,
    vaos: HashMap<Vec<BoundAttribute>, G::VertexArray>,
}

/// What a draw call issued, for frame statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawCall {
    Elements,
    Arrays,
}

impl<G: GlContext> LayerBuffers<G> {
    pub fn new(primitive_mode: u32) -> LayerBuffers<G> {
        LayerBuffers {
            primitive_mode,
            attributes: HashMap::new(),
            indices: None,
            edge_indices: None,
            num_vertices: 0,
            num_instances: None,
            vaos: HashMap::new(),
        }
    }

    pub fn attribute(&self, source: AttributeSource) -> Option<&ArrayBuf<G>> {
        self.attributes.get(&source)
    }

    /// Bind a vertex array matching the program's attribute layout, creating
    /// it on first use
    pub fn bind_vertex_array(&mut self, gl: &G, layout: &[BoundAttribute]) -> Result<()> {
        if let Some(vao) = self.vaos.get(layout) {
            gl.bind_vertex_array(Some(vao));
            return Ok(());
        }
        let vao = gl
            .create_vertex_array()
            .ok_or(RenderError::ResourceCreation("vertex array"))?;
        gl.bind_vertex_array(Some(&vao));
        for attribute in layout {
            match self.attributes.get(&attribute.source) {
                Some(buf) => buf.bind_attribute(gl, attribute.location),
                None => {
                    debug!(target: "layer", "no buffer for attribute {:?}", attribute.source)
                }
            }
        }
        // Element buffer binding is VAO state; the edge set is rebound per draw
        if let Some(indices) = &self.indices {
            gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, Some(&indices.buffer));
        }
        self.vaos.insert(layout.to_vec(), vao);
        Ok(())
    }

    /// Issue the draw for a sub-geometry, returning `None` when the layer
    /// has nothing to draw for it
    pub fn draw(&self, gl: &G, sub: SubGeometry) -> Option<DrawCall> {
        let (mode, elements) = match sub {
            SubGeometry::Vertices => (gl::POINTS, None),
            SubGeometry::Surface => (self.primitive_mode, self.indices.as_ref()),
            SubGeometry::Edges if self.primitive_mode == gl::TRIANGLES => {
                (gl::LINES, Some(self.edge_indices.as_ref()?))
            }
            SubGeometry::Edges if self.primitive_mode == gl::LINES => {
                (gl::LINES, self.indices.as_ref())
            }
            SubGeometry::Edges => return None,
        };
        match elements {
            Some(indices) => {
                if indices.num_items == 0 {
                    return None;
                }
                gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, Some(&indices.buffer));
                let count = indices.num_items as i32;
                match self.num_instances {
                    Some(instances) => gl.draw_elements_instanced(
                        mode,
                        count,
                        indices.data_type,
                        0,
                        instances as i32,
                    ),
                    None => gl.draw_elements(mode, count, indices.data_type, 0),
                }
                if let (SubGeometry::Edges, Some(surface)) = (sub, &self.indices) {
                    gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, Some(&surface.buffer));
                }
                Some(DrawCall::Elements)
            }
            None => {
                if self.num_vertices == 0 {
                    return None;
                }
                let count = self.num_vertices as i32;
                match self.num_instances {
                    Some(instances) => gl.draw_arrays_instanced(mode, 0, count, instances as i32),
                    None => gl.draw_arrays(mode, 0, count),
                }
                Some(DrawCall::Arrays)
            }
        }
    }

    pub fn destroy(&mut self, gl: &G) {
        for (_, vao) in self.vaos.drain() {
            gl.delete_vertex_array(&vao);
        }
        for (_, buf) in self.attributes.drain() {
            buf.destroy(gl);
        }
        if let Some(buf) = self.indices.take() {
            buf.destroy(gl);
        }
        if let Some(buf) = self.edge_indices.take() {
            buf.destroy(gl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::recording::RecordingContext;

    fn triangle_buffers(gl: &RecordingContext) -> LayerBuffers<RecordingContext> {
        let mut buffers = LayerBuffers::new(gl::TRIANGLES);
        let positions: [u16; 9] = [0, 0, 0, 1, 0, 0, 0, 1, 0];
        let position_buf = ArrayBuf::new(
            gl,
            gl::ARRAY_BUFFER,
            bytemuck::cast_slice(&positions),
            3,
            gl::UNSIGNED_SHORT,
            gl::STATIC_DRAW,
        )
        .unwrap();
        buffers.attributes.insert(AttributeSource::Position, position_buf);
        let indices: [u32; 3] = [0, 1, 2];
        buffers.indices = Some(
            ArrayBuf::new(
                gl,
                gl::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&indices),
                1,
                gl::UNSIGNED_INT,
                gl::STATIC_DRAW,
            )
            .unwrap(),
        );
        buffers.num_vertices = 3;
        buffers
    }

    #[test]
    fn test_vertex_array_is_cached_per_layout() {
        let gl = RecordingContext::new();
        let mut buffers = triangle_buffers(&gl);
        let layout = [BoundAttribute {
            location: 0,
            source: AttributeSource::Position,
        }];
        buffers.bind_vertex_array(&gl, &layout).unwrap();
        buffers.bind_vertex_array(&gl, &layout).unwrap();
        assert_eq!(gl.state.borrow().vertex_arrays_created, 1);
    }

    #[test]
    fn test_draw_selects_index_set() {
        let gl = RecordingContext::new();
        let buffers = triangle_buffers(&gl);
        assert_eq!(buffers.draw(&gl, SubGeometry::Surface), Some(DrawCall::Elements));
        // No edge indices were uploaded
        assert_eq!(buffers.draw(&gl, SubGeometry::Edges), None);
        assert_eq!(buffers.draw(&gl, SubGeometry::Vertices), Some(DrawCall::Arrays));

        let draws = gl.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].mode, gl::TRIANGLES);
        assert_eq!(draws[0].count, 3);
        assert_eq!(draws[1].mode, gl::POINTS);
    }
}
