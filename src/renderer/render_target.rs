use crate::error::{RenderError, Result};
use crate::gl::{self, GlContext};
use log::{debug, warn};

/// Storage of a color attachment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentFormat {
    /// Normalized RGBA8 color
    Rgba8,
    /// Unsigned bytes read back as integers, e.g. pick colors
    Rgba8ui,
    /// Signed 32-bit integers, e.g. snapped coordinates and normals
    Rgba32i,
}

impl AttachmentFormat {
    fn internal_format(self) -> u32 {
        match self {
            AttachmentFormat::Rgba8 => gl::RGBA8,
            AttachmentFormat::Rgba8ui => gl::RGBA8UI,
            AttachmentFormat::Rgba32i => gl::RGBA32I,
        }
    }

    fn format(self) -> u32 {
        match self {
            AttachmentFormat::Rgba8 => gl::RGBA,
            AttachmentFormat::Rgba8ui | AttachmentFormat::Rgba32i => gl::RGBA_INTEGER,
        }
    }

    fn upload_type(self) -> u32 {
        match self {
            AttachmentFormat::Rgba8 | AttachmentFormat::Rgba8ui => gl::UNSIGNED_BYTE,
            AttachmentFormat::Rgba32i => gl::INT,
        }
    }

    /// Integer formats only read back as 32-bit components
    fn read_type(self) -> u32 {
        match self {
            AttachmentFormat::Rgba8 => gl::UNSIGNED_BYTE,
            AttachmentFormat::Rgba8ui => gl::UNSIGNED_INT,
            AttachmentFormat::Rgba32i => gl::INT,
        }
    }

    fn read_pixel_size(self) -> usize {
        match self {
            AttachmentFormat::Rgba8 => 4,
            AttachmentFormat::Rgba8ui | AttachmentFormat::Rgba32i => 16,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn create_texture_2d<G: GlContext>(
    gl: &G,
    internal_format: u32,
    width: i32,
    height: i32,
    format: u32,
    data_type: u32,
    filter: u32,
    pixels: Option<&[u8]>,
) -> Result<G::Texture> {
    let texture = gl
        .create_texture()
        .ok_or(RenderError::ResourceCreation("texture"))?;
    gl.bind_texture(gl::TEXTURE_2D, Some(&texture));
    let uploaded = gl.tex_image_2d(
        gl::TEXTURE_2D,
        internal_format,
        width,
        height,
        format,
        data_type,
        pixels,
    );
    if let Err(err) = uploaded {
        gl.bind_texture(gl::TEXTURE_2D, None);
        gl.delete_texture(&texture);
        return Err(err);
    }
    gl.tex_parameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, filter as i32);
    gl.tex_parameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, filter as i32);
    gl.tex_parameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
    gl.tex_parameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
    gl.bind_texture(gl::TEXTURE_2D, None);
    Ok(texture)
}

fn check_image(width: u32, height: u32, pixels: &[u8]) -> Result<()> {
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || pixels.len() != expected {
        return Err(RenderError::InvalidConfig(format!(
            "{}x{} RGBA image needs {} bytes, got {}",
            width,
            height,
            expected,
            pixels.len()
        )));
    }
    Ok(())
}

/// Sampled RGBA8 texture from tightly packed pixels
pub fn create_rgba_texture<G: GlContext>(
    gl: &G,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<G::Texture> {
    check_image(width, height, pixels)?;
    create_texture_2d(
        gl,
        gl::RGBA8,
        width as i32,
        height as i32,
        gl::RGBA,
        gl::UNSIGNED_BYTE,
        gl::LINEAR,
        Some(pixels),
    )
}

/// Cube map from six square RGBA8 faces in +X, -X, +Y, -Y, +Z, -Z order
pub fn create_cube_texture<G: GlContext>(gl: &G, size: u32, faces: &[u8]) -> Result<G::Texture> {
    let face_len = size as usize * size as usize * 4;
    if size == 0 || faces.len() != face_len * 6 {
        return Err(RenderError::InvalidConfig(format!(
            "cube map of size {} needs {} bytes, got {}",
            size,
            face_len * 6,
            faces.len()
        )));
    }
    let texture = gl
        .create_texture()
        .ok_or(RenderError::ResourceCreation("cube texture"))?;
    gl.bind_texture(gl::TEXTURE_CUBE_MAP, Some(&texture));
    for (i, face) in faces.chunks_exact(face_len).enumerate() {
        let uploaded = gl.tex_image_2d(
            gl::TEXTURE_CUBE_MAP_POSITIVE_X + i as u32,
            gl::RGBA8,
            size as i32,
            size as i32,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            Some(face),
        );
        if let Err(err) = uploaded {
            gl.bind_texture(gl::TEXTURE_CUBE_MAP, None);
            gl.delete_texture(&texture);
            return Err(err);
        }
    }
    gl.tex_parameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
    gl.tex_parameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
    gl.tex_parameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
    gl.tex_parameteri(gl::TEXTURE_CUBE_MAP, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
    gl.bind_texture(gl::TEXTURE_CUBE_MAP, None);
    Ok(texture)
}

/// Offscreen framebuffer with texture color attachments and a depth texture
pub struct RenderTarget<G: GlContext> {
    framebuffer: G::Framebuffer,
    colors: Vec<(G::Texture, AttachmentFormat)>,
    depth: G::Texture,
    width: u32,
    height: u32,
}

impl<G: GlContext> RenderTarget<G> {
    pub fn new(gl: &G, width: u32, height: u32, formats: &[AttachmentFormat]) -> Result<RenderTarget<G>> {
        if width == 0 || height == 0 || formats.is_empty() {
            return Err(RenderError::InvalidConfig(format!(
                "render target {}x{} with {} attachments",
                width,
                height,
                formats.len()
            )));
        }
        let (w, h) = (width as i32, height as i32);
        let mut colors = Vec::with_capacity(formats.len());
        let release = |gl: &G, colors: &[(G::Texture, AttachmentFormat)]| {
            for (texture, _) in colors {
                gl.delete_texture(texture);
            }
        };
        for format in formats {
            let created = create_texture_2d(
                gl,
                format.internal_format(),
                w,
                h,
                format.format(),
                format.upload_type(),
                gl::NEAREST,
                None,
            );
            match created {
                Ok(texture) => colors.push((texture, *format)),
                Err(err) => {
                    release(gl, &colors);
                    return Err(err);
                }
            }
        }
        let depth = match create_texture_2d(
            gl,
            gl::DEPTH_COMPONENT24,
            w,
            h,
            gl::DEPTH_COMPONENT,
            gl::UNSIGNED_INT,
            gl::NEAREST,
            None,
        ) {
            Ok(depth) => depth,
            Err(err) => {
                release(gl, &colors);
                return Err(err);
            }
        };
        let Some(framebuffer) = gl.create_framebuffer() else {
            release(gl, &colors);
            gl.delete_texture(&depth);
            return Err(RenderError::ResourceCreation("framebuffer"));
        };

        gl.bind_framebuffer(gl::FRAMEBUFFER, Some(&framebuffer));
        for (i, (texture, _)) in colors.iter().enumerate() {
            gl.framebuffer_texture_2d(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0 + i as u32,
                gl::TEXTURE_2D,
                Some(texture),
            );
        }
        gl.framebuffer_texture_2d(gl::FRAMEBUFFER, gl::DEPTH_ATTACHMENT, gl::TEXTURE_2D, Some(&depth));
        let status = gl.check_framebuffer_status(gl::FRAMEBUFFER);
        gl.bind_framebuffer(gl::FRAMEBUFFER, None);

        let target = RenderTarget {
            framebuffer,
            colors,
            depth,
            width,
            height,
        };
        if status != gl::FRAMEBUFFER_COMPLETE {
            warn!(target: "render_target", "framebuffer incomplete: 0x{:x}", status);
            target.destroy(gl);
            return Err(RenderError::ResourceCreation("complete framebuffer"));
        }
        debug!(
            target: "render_target",
            "created {}x{} target, {} color attachments",
            width,
            height,
            formats.len()
        );
        Ok(target)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    pub fn color(&self, index: usize) -> Option<&G::Texture> {
        self.colors.get(index).map(|(texture, _)| texture)
    }

    /// Bind for drawing into every color attachment over the whole target
    pub fn bind(&self, gl: &G) {
        gl.bind_framebuffer(gl::FRAMEBUFFER, Some(&self.framebuffer));
        let all: Vec<u32> = (0..self.colors.len() as u32)
            .map(|i| gl::COLOR_ATTACHMENT0 + i)
            .collect();
        gl.draw_buffers(&all);
        gl.viewport(0, 0, self.width as i32, self.height as i32);
    }

    /// Route fragment outputs only to the listed attachments; output
    /// location `i` lands in attachment `i` or nowhere
    pub fn set_draw_buffers(&self, gl: &G, attachments: &[usize]) {
        let buffers: Vec<u32> = (0..self.colors.len())
            .map(|i| {
                if attachments.contains(&i) {
                    gl::COLOR_ATTACHMENT0 + i as u32
                } else {
                    gl::NONE
                }
            })
            .collect();
        gl.draw_buffers(&buffers);
    }

    /// Clear one color attachment to `value`; RGBA8 values are 0..=255.
    /// Draw buffers are reset to every attachment.
    pub fn clear_color(&self, gl: &G, index: usize, value: [i32; 4]) {
        let Some((_, format)) = self.colors.get(index) else {
            return;
        };
        self.set_draw_buffers(gl, &(0..self.colors.len()).collect::<Vec<_>>());
        match format {
            AttachmentFormat::Rgba8 => {
                gl.clear_buffer_fv(gl::COLOR, index as i32, &value.map(|v| v as f32 / 255.0))
            }
            AttachmentFormat::Rgba8ui => {
                gl.clear_buffer_uiv(gl::COLOR, index as i32, &value.map(|v| v.max(0) as u32))
            }
            AttachmentFormat::Rgba32i => gl.clear_buffer_iv(gl::COLOR, index as i32, &value),
        }
    }

    pub fn clear_depth(&self, gl: &G) {
        gl.clear_buffer_fv(gl::DEPTH, 0, &[1.0]);
    }

    /// RGBA components of a block of pixels, rows bottom-up
    pub fn read_block(
        &self,
        gl: &G,
        index: usize,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<Vec<[i32; 4]>> {
        let (_, format) = self
            .colors
            .get(index)
            .ok_or(RenderError::ResourceCreation("color attachment"))?;
        let pixel_size = format.read_pixel_size();
        let count = width.max(0) as usize * height.max(0) as usize;
        let mut bytes = vec![0u8; count * pixel_size];
        gl.bind_framebuffer(gl::FRAMEBUFFER, Some(&self.framebuffer));
        gl.read_buffer(gl::COLOR_ATTACHMENT0 + index as u32);
        let read = gl.read_pixels(
            x,
            y,
            width,
            height,
            format.format(),
            format.read_type(),
            &mut bytes,
        );
        gl.bind_framebuffer(gl::FRAMEBUFFER, None);
        read?;
        Ok(bytes
            .chunks_exact(pixel_size)
            .map(|pixel| {
                let mut out = [0i32; 4];
                for (i, c) in out.iter_mut().enumerate() {
                    *c = if pixel_size == 16 {
                        i32::from_le_bytes([
                            pixel[i * 4],
                            pixel[i * 4 + 1],
                            pixel[i * 4 + 2],
                            pixel[i * 4 + 3],
                        ])
                    } else {
                        pixel[i] as i32
                    };
                }
                out
            })
            .collect())
    }

    pub fn unbind(&self, gl: &G) {
        gl.bind_framebuffer(gl::FRAMEBUFFER, None);
    }

    pub fn destroy(&self, gl: &G) {
        gl.delete_framebuffer(&self.framebuffer);
        for (texture, _) in &self.colors {
            gl.delete_texture(texture);
        }
        gl.delete_texture(&self.depth);
    }
}
