use glow::HasContext;

use crate::gl::{Filter, GlBackend, Sampling, TextureTarget, UniformLocation, Wrap};
use crate::types::{BufferId, FramebufferId, ProgramId, RenderDimensions, RenderbufferId, TextureId};

/// `GL_TEXTURE_EXTERNAL_OES`, absent from glow's core constants.
const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// [`GlBackend`] over a `glow` function table loaded for the current context.
pub struct GlowBackend {
    gl: glow::Context,
}

impl GlowBackend {
    /// Wraps a loaded function table.
    ///
    /// # Safety
    /// `gl` must have been loaded for the context that is current on the
    /// calling thread, and every later call must happen on that thread.
    pub unsafe fn new(gl: glow::Context) -> Self {
        Self { gl }
    }
}

fn target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::External => TEXTURE_EXTERNAL_OES,
        TextureTarget::Texture2d => glow::TEXTURE_2D,
    }
}

fn texture(id: TextureId) -> glow::NativeTexture {
    glow::NativeTexture(id.non_zero())
}

fn extent(size: RenderDimensions) -> (i32, i32) {
    (
        i32::try_from(size.width).unwrap_or(i32::MAX),
        i32::try_from(size.height).unwrap_or(i32::MAX),
    )
}

// SAFETY (applies to every block below): the backend is only reachable from
// the render thread, where its context is current, and every object name
// passed in was created by this backend.
impl GlBackend for GlowBackend {
    fn create_texture(&self) -> Result<TextureId, String> {
        unsafe { self.gl.create_texture() }.map(|raw| TextureId::from_non_zero(raw.0))
    }

    fn delete_texture(&self, id: TextureId) {
        unsafe { self.gl.delete_texture(texture(id)) }
    }

    fn bind_texture(&self, binding: TextureTarget, id: Option<TextureId>) {
        unsafe { self.gl.bind_texture(target(binding), id.map(texture)) }
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn set_sampling(&self, binding: TextureTarget, sampling: Sampling) {
        let filter = match sampling.filter {
            Filter::Nearest => glow::NEAREST,
            Filter::Linear => glow::LINEAR,
        } as i32;
        let wrap = match sampling.wrap {
            Wrap::Repeat => glow::REPEAT,
            Wrap::ClampToEdge => glow::CLAMP_TO_EDGE,
        } as i32;
        let binding = target(binding);
        unsafe {
            self.gl.tex_parameter_i32(binding, glow::TEXTURE_MIN_FILTER, filter);
            self.gl.tex_parameter_i32(binding, glow::TEXTURE_MAG_FILTER, filter);
            self.gl.tex_parameter_i32(binding, glow::TEXTURE_WRAP_S, wrap);
            self.gl.tex_parameter_i32(binding, glow::TEXTURE_WRAP_T, wrap);
        }
    }

    fn allocate_rgba8(&self, size: RenderDimensions) {
        let (width, height) = extent(size);
        unsafe {
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                width,
                height,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                None,
            );
        }
    }

    fn create_renderbuffer(&self) -> Result<RenderbufferId, String> {
        unsafe { self.gl.create_renderbuffer() }.map(|raw| RenderbufferId::from_non_zero(raw.0))
    }

    fn delete_renderbuffer(&self, id: RenderbufferId) {
        unsafe { self.gl.delete_renderbuffer(glow::NativeRenderbuffer(id.non_zero())) }
    }

    fn bind_renderbuffer(&self, id: Option<RenderbufferId>) {
        unsafe {
            self.gl.bind_renderbuffer(
                glow::RENDERBUFFER,
                id.map(|id| glow::NativeRenderbuffer(id.non_zero())),
            )
        }
    }

    fn allocate_depth16(&self, size: RenderDimensions) {
        let (width, height) = extent(size);
        unsafe {
            self.gl
                .renderbuffer_storage(glow::RENDERBUFFER, glow::DEPTH_COMPONENT16, width, height)
        }
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, String> {
        unsafe { self.gl.create_framebuffer() }.map(|raw| FramebufferId::from_non_zero(raw.0))
    }

    fn delete_framebuffer(&self, id: FramebufferId) {
        unsafe { self.gl.delete_framebuffer(glow::NativeFramebuffer(id.non_zero())) }
    }

    fn bind_framebuffer(&self, id: Option<FramebufferId>) {
        unsafe {
            self.gl.bind_framebuffer(
                glow::FRAMEBUFFER,
                id.map(|id| glow::NativeFramebuffer(id.non_zero())),
            )
        }
    }

    fn attach_color_texture(&self, id: TextureId) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture(id)),
                0,
            )
        }
    }

    fn attach_depth_renderbuffer(&self, id: RenderbufferId) {
        unsafe {
            self.gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                Some(glow::NativeRenderbuffer(id.non_zero())),
            )
        }
    }

    fn framebuffer_status(&self) -> u32 {
        unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) }
    }

    fn create_buffer(&self) -> Result<BufferId, String> {
        unsafe { self.gl.create_buffer() }.map(|raw| BufferId::from_non_zero(raw.0))
    }

    fn delete_buffer(&self, id: BufferId) {
        unsafe { self.gl.delete_buffer(glow::NativeBuffer(id.non_zero())) }
    }

    fn upload_vertices(&self, id: BufferId, data: &[f32]) {
        unsafe {
            self.gl
                .bind_buffer(glow::ARRAY_BUFFER, Some(glow::NativeBuffer(id.non_zero())));
            self.gl
                .buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(data), glow::STATIC_DRAW);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
    }

    fn bind_vertex_attribute(&self, id: BufferId, index: u32, components: i32, offset: usize) {
        let offset = i32::try_from(offset * std::mem::size_of::<f32>()).unwrap_or(i32::MAX);
        unsafe {
            self.gl
                .bind_buffer(glow::ARRAY_BUFFER, Some(glow::NativeBuffer(id.non_zero())));
            self.gl
                .vertex_attrib_pointer_f32(index, components, glow::FLOAT, false, 0, offset);
            self.gl.enable_vertex_attrib_array(index);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
    }

    fn create_program(&self, vertex: &str, fragment: &str) -> Result<ProgramId, String> {
        unsafe {
            let program = self.gl.create_program()?;
            let mut shaders = Vec::with_capacity(2);
            for (stage, source) in [(glow::VERTEX_SHADER, vertex), (glow::FRAGMENT_SHADER, fragment)] {
                let shader = match self.gl.create_shader(stage) {
                    Ok(shader) => shader,
                    Err(err) => {
                        self.release_program(program, &shaders);
                        return Err(err);
                    }
                };
                shaders.push(shader);
                self.gl.shader_source(shader, source);
                self.gl.compile_shader(shader);
                if !self.gl.get_shader_compile_status(shader) {
                    let log = self.gl.get_shader_info_log(shader);
                    self.release_program(program, &shaders);
                    return Err(format!("compile failed: {log}"));
                }
                self.gl.attach_shader(program, shader);
            }

            self.gl.link_program(program);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.release_program(program, &shaders);
                return Err(format!("link failed: {log}"));
            }
            for shader in shaders {
                self.gl.detach_shader(program, shader);
                self.gl.delete_shader(shader);
            }
            Ok(ProgramId::from_non_zero(program.0))
        }
    }

    fn delete_program(&self, id: ProgramId) {
        unsafe { self.gl.delete_program(glow::NativeProgram(id.non_zero())) }
    }

    fn use_program(&self, id: Option<ProgramId>) {
        unsafe {
            self.gl
                .use_program(id.map(|id| glow::NativeProgram(id.non_zero())))
        }
    }

    fn uniform_location(&self, id: ProgramId, name: &str) -> Option<UniformLocation> {
        unsafe {
            self.gl
                .get_uniform_location(glow::NativeProgram(id.non_zero()), name)
                .map(|location| UniformLocation(location.0))
        }
    }

    fn attrib_location(&self, id: ProgramId, name: &str) -> Option<u32> {
        unsafe {
            self.gl
                .get_attrib_location(glow::NativeProgram(id.non_zero()), name)
        }
    }

    fn set_uniform_i32(&self, location: UniformLocation, value: i32) {
        let location = glow::NativeUniformLocation(location.0);
        unsafe { self.gl.uniform_1_i32(Some(&location), value) }
    }

    fn set_uniform_mat4(&self, location: UniformLocation, value: &[f32; 16]) {
        let location = glow::NativeUniformLocation(location.0);
        unsafe { self.gl.uniform_matrix_4_f32_slice(Some(&location), false, value) }
    }

    fn viewport(&self, size: RenderDimensions) {
        let (width, height) = extent(size);
        unsafe { self.gl.viewport(0, 0, width, height) }
    }

    fn clear_color_and_depth(&self) {
        unsafe {
            self.gl.clear_color(0.0, 0.0, 0.0, 0.0);
            self.gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }

    fn enable_alpha_blending(&self) {
        unsafe {
            self.gl.enable(glow::BLEND);
            self.gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        }
    }

    fn draw_triangle_strip(&self, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(glow::TRIANGLE_STRIP, first, count) }
    }

    fn finish(&self) {
        unsafe { self.gl.finish() }
    }

    fn get_error(&self) -> u32 {
        unsafe { self.gl.get_error() }
    }
}

impl GlowBackend {
    unsafe fn release_program(&self, program: glow::NativeProgram, shaders: &[glow::NativeShader]) {
        for shader in shaders {
            self.gl.delete_shader(*shader);
        }
        self.gl.delete_program(program);
    }
}
