//! The slice of OpenGL ES the compositor relies on.
//!
//! [`GlBackend`] is implemented by the native `glow` wrapper and by the
//! in-memory headless model. Every method must be called on the thread the
//! owning context is current on; implementations do not synchronise.

pub(crate) mod shaders;

use crate::error::{RenderError, SetupError};
use crate::types::{BufferId, FramebufferId, ProgramId, RenderDimensions, RenderbufferId, TextureId};

pub const NO_ERROR: u32 = 0;
pub const INVALID_ENUM: u32 = 0x0500;
pub const INVALID_VALUE: u32 = 0x0501;
pub const INVALID_OPERATION: u32 = 0x0502;
pub const OUT_OF_MEMORY: u32 = 0x0505;
pub const INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;

pub const FRAMEBUFFER_COMPLETE: u32 = 0x8CD5;
pub const FRAMEBUFFER_INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;
pub const FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT: u32 = 0x8CD7;
pub const FRAMEBUFFER_INCOMPLETE_DIMENSIONS: u32 = 0x8CD9;

/// Texture binding points used by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// `GL_TEXTURE_EXTERNAL_OES`: samples a decoder-owned image stream.
    External,
    /// `GL_TEXTURE_2D`.
    Texture2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Repeat,
    ClampToEdge,
}

/// Min/mag filter and S/T wrap applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub filter: Filter,
    pub wrap: Wrap,
}

impl Sampling {
    pub const LINEAR_CLAMP: Sampling = Sampling {
        filter: Filter::Linear,
        wrap: Wrap::ClampToEdge,
    };
}

/// Location of a uniform in a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

pub trait GlBackend {
    fn create_texture(&self) -> Result<TextureId, String>;
    fn delete_texture(&self, texture: TextureId);
    fn bind_texture(&self, target: TextureTarget, texture: Option<TextureId>);
    /// Selects texture unit `unit` (0-based) for subsequent binds.
    fn active_texture(&self, unit: u32);
    /// Applies `sampling` to the texture bound at `target`.
    fn set_sampling(&self, target: TextureTarget, sampling: Sampling);
    /// (Re)allocates uninitialised RGBA8 storage for the bound 2D texture.
    fn allocate_rgba8(&self, size: RenderDimensions);

    fn create_renderbuffer(&self) -> Result<RenderbufferId, String>;
    fn delete_renderbuffer(&self, renderbuffer: RenderbufferId);
    fn bind_renderbuffer(&self, renderbuffer: Option<RenderbufferId>);
    /// (Re)allocates 16-bit depth storage for the bound renderbuffer.
    fn allocate_depth16(&self, size: RenderDimensions);

    fn create_framebuffer(&self) -> Result<FramebufferId, String>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);
    /// `None` binds the default (window-system) framebuffer.
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>);
    fn attach_color_texture(&self, texture: TextureId);
    fn attach_depth_renderbuffer(&self, renderbuffer: RenderbufferId);
    /// Raw `glCheckFramebufferStatus` result for the bound framebuffer.
    fn framebuffer_status(&self) -> u32;

    fn create_buffer(&self) -> Result<BufferId, String>;
    fn delete_buffer(&self, buffer: BufferId);
    /// Uploads static vertex data into `buffer`.
    fn upload_vertices(&self, buffer: BufferId, data: &[f32]);
    /// Points attribute `index` at `components` floats per vertex, starting
    /// `offset` floats into `buffer`, and enables the array.
    fn bind_vertex_attribute(&self, buffer: BufferId, index: u32, components: i32, offset: usize);

    /// Compiles and links a program from GLSL ES sources.
    fn create_program(&self, vertex: &str, fragment: &str) -> Result<ProgramId, String>;
    fn delete_program(&self, program: ProgramId);
    fn use_program(&self, program: Option<ProgramId>);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn set_uniform_i32(&self, location: UniformLocation, value: i32);
    fn set_uniform_mat4(&self, location: UniformLocation, value: &[f32; 16]);

    fn viewport(&self, size: RenderDimensions);
    fn clear_color_and_depth(&self);
    fn enable_alpha_blending(&self);
    fn draw_triangle_strip(&self, first: i32, count: i32);
    fn finish(&self);
    /// Returns and clears the oldest recorded error flag.
    fn get_error(&self) -> u32;
}

/// Post-condition for a draw, bind, or allocation block.
pub fn check_render<G: GlBackend + ?Sized>(gl: &G, op: &'static str) -> Result<(), RenderError> {
    match gl.get_error() {
        NO_ERROR => Ok(()),
        code => {
            tracing::error!(op, code = format_args!("{code:#06x}"), "GL error");
            Err(RenderError::Gl { op, code })
        }
    }
}

/// Same as [`check_render`] for setup-time blocks.
pub fn check_setup<G: GlBackend + ?Sized>(gl: &G, op: &'static str) -> Result<(), SetupError> {
    match gl.get_error() {
        NO_ERROR => Ok(()),
        code => {
            tracing::error!(op, code = format_args!("{code:#06x}"), "GL error during setup");
            Err(SetupError::Gl { op, code })
        }
    }
}

/// Runs `block` then applies the render post-condition.
pub fn checked<G, T>(gl: &G, op: &'static str, block: impl FnOnce(&G) -> T) -> Result<T, RenderError>
where
    G: GlBackend + ?Sized,
{
    let value = block(gl);
    check_render(gl, op)?;
    Ok(value)
}
