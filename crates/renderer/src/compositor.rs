//! Offscreen/onscreen texture compositor.
//!
//! Owns the source external texture, the destination 2D texture, its depth
//! renderbuffer and the framebuffer tying them together, plus the quad buffer
//! and lazily linked programs. Every frame the source is drawn into the
//! framebuffer; optionally the result is then drawn onto the default
//! framebuffer.

use tracing::{debug, trace};

use crate::error::{RenderError, SetupError};
use crate::gl::shaders::{
    ProgramKind, ATTRIB_POSITION, ATTRIB_TEX_COORD, UNIFORM_TEXTURE, UNIFORM_TRANSFORM,
};
use crate::gl::{check_render, check_setup, checked, GlBackend, Sampling, TextureTarget, FRAMEBUFFER_COMPLETE};
use crate::types::{
    BufferId, DimensionPolicy, FrameTransform, FramebufferId, ProgramId, RenderDimensions,
    RenderbufferId, TextureId,
};

/// Unit square covering the viewport, as a 4-vertex triangle strip.
#[rustfmt::skip]
pub const QUAD_POSITIONS: [f32; 12] = [
    -1.0, -1.0, 0.0,
     1.0, -1.0, 0.0,
    -1.0,  1.0, 0.0,
     1.0,  1.0, 0.0,
];

/// Texture coordinates matching [`QUAD_POSITIONS`] vertex for vertex.
#[rustfmt::skip]
pub const QUAD_TEX_COORDS: [f32; 8] = [
    0.0, 0.0,
    1.0, 0.0,
    0.0, 1.0,
    1.0, 1.0,
];

const QUAD_VERTEX_COUNT: i32 = 4;
const POSITION_COMPONENTS: i32 = 3;
const TEX_COORD_COMPONENTS: i32 = 2;

const DESTINATION_TEXTURE_UNIT: u32 = 0;
const SOURCE_TEXTURE_UNIT: u32 = 1;

/// The four GPU objects that make up the offscreen target. Either all are
/// live or the compositor holds none of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSet {
    /// External texture the decoder writes frames into.
    pub source: TextureId,
    /// 2D texture written by the offscreen pass and handed to the host.
    pub destination: TextureId,
    pub depth: RenderbufferId,
    pub framebuffer: FramebufferId,
}

/// Which passes a [`TextureCompositor::render_frame`] call executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePasses {
    pub offscreen: bool,
    pub onscreen: bool,
}

#[derive(Debug, Clone, Copy)]
struct Resources {
    textures: TextureSet,
    quad: BufferId,
}

#[derive(Debug, Default)]
struct Programs {
    external: Option<ProgramId>,
    texture_2d: Option<ProgramId>,
}

impl Programs {
    fn slot(&mut self, kind: ProgramKind) -> &mut Option<ProgramId> {
        match kind {
            ProgramKind::External => &mut self.external,
            ProgramKind::Texture2d => &mut self.texture_2d,
        }
    }
}

pub struct TextureCompositor<G: GlBackend> {
    gl: G,
    resources: Option<Resources>,
    dimensions: RenderDimensions,
    storage: RenderDimensions,
    policy: DimensionPolicy,
    programs: Programs,
}

impl<G: GlBackend> TextureCompositor<G> {
    /// Allocates every offscreen resource sized to `dimensions` and validates
    /// the framebuffer. On failure nothing allocated here stays alive.
    pub fn setup(gl: G, dimensions: RenderDimensions, policy: DimensionPolicy) -> Result<Self, SetupError> {
        let storage = policy.storage_for(dimensions);
        let resources = allocate(&gl, storage)?;
        debug!(
            source = %resources.textures.source,
            destination = %resources.textures.destination,
            depth = %resources.textures.depth,
            framebuffer = %resources.textures.framebuffer,
            %dimensions,
            %storage,
            "offscreen target ready"
        );
        Ok(Self {
            gl,
            resources: Some(resources),
            dimensions,
            storage,
            policy,
            programs: Programs::default(),
        })
    }

    /// Reallocates destination and depth storage for `dimensions`. Object
    /// names and framebuffer attachments stay the same.
    pub fn update_size(&mut self, dimensions: RenderDimensions) -> Result<(), RenderError> {
        let resources = self.resources.ok_or(RenderError::Disposed)?;
        let storage = self.policy.storage_for(dimensions);
        let textures = resources.textures;

        checked(&self.gl, "resize depth buffer", |gl| {
            gl.bind_renderbuffer(Some(textures.depth));
            gl.allocate_depth16(storage);
            gl.bind_renderbuffer(None);
        })?;
        checked(&self.gl, "resize destination texture", |gl| {
            gl.bind_texture(TextureTarget::Texture2d, Some(textures.destination));
            gl.allocate_rgba8(storage);
            gl.bind_texture(TextureTarget::Texture2d, None);
        })?;

        debug!(from = %self.dimensions, to = %dimensions, %storage, "offscreen target resized");
        self.dimensions = dimensions;
        self.storage = storage;
        Ok(())
    }

    /// Draws the source into the offscreen target and, when
    /// `also_draw_on_screen` is set, the offscreen result onto the default
    /// framebuffer. A missing transform samples with identity.
    pub fn render_frame(
        &mut self,
        transform: Option<&FrameTransform>,
        also_draw_on_screen: bool,
    ) -> Result<FramePasses, RenderError> {
        let resources = self.resources.ok_or(RenderError::Disposed)?;
        let transform = transform.unwrap_or(&FrameTransform::IDENTITY);

        self.draw_offscreen(resources, transform)?;
        if also_draw_on_screen {
            self.draw_onscreen(resources)?;
        }
        trace!(onscreen = also_draw_on_screen, "frame composited");
        Ok(FramePasses {
            offscreen: true,
            onscreen: also_draw_on_screen,
        })
    }

    fn draw_offscreen(&mut self, resources: Resources, transform: &FrameTransform) -> Result<(), RenderError> {
        let program = self.program(ProgramKind::External)?;
        let textures = resources.textures;
        let viewport = self.dimensions;

        checked(&self.gl, "bind offscreen framebuffer", |gl| {
            gl.bind_framebuffer(Some(textures.framebuffer));
            gl.clear_color_and_depth();
            gl.viewport(viewport);
        })?;
        checked(&self.gl, "bind source texture", |gl| {
            gl.use_program(Some(program));
            gl.active_texture(SOURCE_TEXTURE_UNIT);
            gl.bind_texture(TextureTarget::External, Some(textures.source));
        })?;
        checked(&self.gl, "set offscreen uniforms", |gl| {
            set_uniforms(gl, program, SOURCE_TEXTURE_UNIT, transform)
        })?;
        checked(&self.gl, "draw offscreen quad", |gl| {
            bind_quad(gl, program, resources.quad);
            gl.draw_triangle_strip(0, QUAD_VERTEX_COUNT);
            gl.bind_framebuffer(None);
        })
    }

    fn draw_onscreen(&mut self, resources: Resources) -> Result<(), RenderError> {
        let program = self.program(ProgramKind::Texture2d)?;
        let textures = resources.textures;
        let viewport = self.dimensions;
        let region = FrameTransform::content_region(self.dimensions, self.storage);

        checked(&self.gl, "bind default framebuffer", |gl| {
            gl.bind_framebuffer(None);
            gl.viewport(viewport);
        })?;
        checked(&self.gl, "bind destination texture", |gl| {
            gl.use_program(Some(program));
            gl.active_texture(DESTINATION_TEXTURE_UNIT);
            gl.bind_texture(TextureTarget::Texture2d, Some(textures.destination));
        })?;
        checked(&self.gl, "set onscreen uniforms", |gl| {
            set_uniforms(gl, program, DESTINATION_TEXTURE_UNIT, &region)
        })?;
        checked(&self.gl, "draw onscreen quad", |gl| {
            bind_quad(gl, program, resources.quad);
            gl.draw_triangle_strip(0, QUAD_VERTEX_COUNT);
        })
    }

    fn program(&mut self, kind: ProgramKind) -> Result<ProgramId, RenderError> {
        if let Some(program) = *self.programs.slot(kind) {
            return Ok(program);
        }
        let program = self
            .gl
            .create_program(kind.vertex_source(), kind.fragment_source())
            .map_err(|reason| RenderError::Program {
                program: kind.label(),
                reason,
            })?;
        check_render(&self.gl, "link program")?;
        debug!(program = %program, kind = kind.label(), "program linked");
        *self.programs.slot(kind) = Some(program);
        Ok(program)
    }

    /// Deletes every GPU object owned by the compositor. Later calls are
    /// no-ops; draws and resizes afterwards fail with `Disposed`.
    pub fn dispose(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };
        let textures = resources.textures;
        self.gl.bind_framebuffer(None);
        self.gl.delete_framebuffer(textures.framebuffer);
        self.gl.delete_renderbuffer(textures.depth);
        self.gl.delete_texture(textures.destination);
        self.gl.delete_texture(textures.source);
        self.gl.delete_buffer(resources.quad);
        for program in [self.programs.external.take(), self.programs.texture_2d.take()]
            .into_iter()
            .flatten()
        {
            self.gl.delete_program(program);
        }
        debug!(framebuffer = %textures.framebuffer, "offscreen target disposed");
    }

    pub fn gl(&self) -> &G {
        &self.gl
    }

    pub fn textures(&self) -> Option<TextureSet> {
        self.resources.map(|resources| resources.textures)
    }

    /// Destination texture the host samples from.
    pub fn offscreen_texture(&self) -> Option<TextureId> {
        self.textures().map(|textures| textures.destination)
    }

    pub fn source_texture(&self) -> Option<TextureId> {
        self.textures().map(|textures| textures.source)
    }

    /// Logical size; drives the viewport.
    pub fn dimensions(&self) -> RenderDimensions {
        self.dimensions
    }

    /// Allocated size of the destination texture and depth buffer.
    pub fn storage_size(&self) -> RenderDimensions {
        self.storage
    }

    pub fn is_disposed(&self) -> bool {
        self.resources.is_none()
    }
}

impl<G: GlBackend> Drop for TextureCompositor<G> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn set_uniforms<G: GlBackend>(gl: &G, program: ProgramId, unit: u32, transform: &FrameTransform) {
    if let Some(location) = gl.uniform_location(program, UNIFORM_TEXTURE) {
        gl.set_uniform_i32(location, unit as i32);
    }
    if let Some(location) = gl.uniform_location(program, UNIFORM_TRANSFORM) {
        gl.set_uniform_mat4(location, transform.as_array());
    }
}

fn bind_quad<G: GlBackend>(gl: &G, program: ProgramId, quad: BufferId) {
    if let Some(index) = gl.attrib_location(program, ATTRIB_POSITION) {
        gl.bind_vertex_attribute(quad, index, POSITION_COMPONENTS, 0);
    }
    if let Some(index) = gl.attrib_location(program, ATTRIB_TEX_COORD) {
        gl.bind_vertex_attribute(quad, index, TEX_COORD_COMPONENTS, QUAD_POSITIONS.len());
    }
}

fn quad_vertices() -> Vec<f32> {
    let mut data = Vec::with_capacity(QUAD_POSITIONS.len() + QUAD_TEX_COORDS.len());
    data.extend_from_slice(&QUAD_POSITIONS);
    data.extend_from_slice(&QUAD_TEX_COORDS);
    data
}

#[derive(Debug, Clone, Copy)]
enum Allocated {
    Texture(TextureId),
    Renderbuffer(RenderbufferId),
    Framebuffer(FramebufferId),
    Buffer(BufferId),
}

/// Deletes everything created during a setup attempt unless committed.
struct PendingObjects<'a, G: GlBackend> {
    gl: &'a G,
    objects: Vec<Allocated>,
}

impl<'a, G: GlBackend> PendingObjects<'a, G> {
    fn new(gl: &'a G) -> Self {
        Self {
            gl,
            objects: Vec::with_capacity(5),
        }
    }

    fn track<T: Copy>(
        &mut self,
        created: Result<T, String>,
        object: &'static str,
        wrap: fn(T) -> Allocated,
    ) -> Result<T, SetupError> {
        let value = created.map_err(|reason| SetupError::Allocation { object, reason })?;
        self.objects.push(wrap(value));
        Ok(value)
    }

    fn commit(mut self) {
        self.objects.clear();
    }
}

impl<G: GlBackend> Drop for PendingObjects<'_, G> {
    fn drop(&mut self) {
        if self.objects.is_empty() {
            return;
        }
        self.gl.bind_framebuffer(None);
        for object in self.objects.drain(..).rev() {
            match object {
                Allocated::Texture(id) => self.gl.delete_texture(id),
                Allocated::Renderbuffer(id) => self.gl.delete_renderbuffer(id),
                Allocated::Framebuffer(id) => self.gl.delete_framebuffer(id),
                Allocated::Buffer(id) => self.gl.delete_buffer(id),
            }
        }
        // Clear any error raised by the failed attempt.
        let _ = self.gl.get_error();
        debug!("released partially allocated offscreen target");
    }
}

fn allocate<G: GlBackend>(gl: &G, storage: RenderDimensions) -> Result<Resources, SetupError> {
    let mut pending = PendingObjects::new(gl);

    let source = pending.track(gl.create_texture(), "source texture", Allocated::Texture)?;
    let destination = pending.track(gl.create_texture(), "destination texture", Allocated::Texture)?;

    gl.bind_texture(TextureTarget::External, Some(source));
    gl.set_sampling(TextureTarget::External, Sampling::LINEAR_CLAMP);
    gl.bind_texture(TextureTarget::External, None);
    check_setup(gl, "configure source texture")?;

    gl.bind_texture(TextureTarget::Texture2d, Some(destination));
    gl.set_sampling(TextureTarget::Texture2d, Sampling::LINEAR_CLAMP);
    gl.allocate_rgba8(storage);
    gl.bind_texture(TextureTarget::Texture2d, None);
    check_setup(gl, "allocate destination texture")?;

    let depth = pending.track(gl.create_renderbuffer(), "depth renderbuffer", Allocated::Renderbuffer)?;
    gl.bind_renderbuffer(Some(depth));
    gl.allocate_depth16(storage);
    gl.bind_renderbuffer(None);
    check_setup(gl, "allocate depth buffer")?;

    let framebuffer = pending.track(gl.create_framebuffer(), "framebuffer", Allocated::Framebuffer)?;
    gl.bind_framebuffer(Some(framebuffer));
    gl.attach_color_texture(destination);
    gl.attach_depth_renderbuffer(depth);
    let status = gl.framebuffer_status();
    gl.bind_framebuffer(None);
    if status != FRAMEBUFFER_COMPLETE {
        tracing::error!(status = format_args!("{status:#06x}"), "offscreen framebuffer incomplete");
        return Err(SetupError::IncompleteFramebuffer { status });
    }
    check_setup(gl, "attach framebuffer")?;

    let quad = pending.track(gl.create_buffer(), "quad buffer", Allocated::Buffer)?;
    gl.upload_vertices(quad, &quad_vertices());
    check_setup(gl, "upload quad")?;

    pending.commit();
    Ok(Resources {
        textures: TextureSet {
            source,
            destination,
            depth,
            framebuffer,
        },
        quad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{FRAMEBUFFER_INCOMPLETE_ATTACHMENT, INVALID_OPERATION};
    use crate::headless::{GlFault, GlObjectKind, HeadlessGl};

    fn setup(gl: &HeadlessGl, width: u32, height: u32) -> TextureCompositor<HeadlessGl> {
        TextureCompositor::setup(gl.clone(), RenderDimensions::new(width, height), DimensionPolicy::Exact)
            .expect("setup")
    }

    #[test]
    fn setup_allocates_complete_texture_set() {
        let gl = HeadlessGl::new();
        let compositor = setup(&gl, 640, 480);
        let textures = compositor.textures().expect("textures");

        assert_ne!(textures.source, textures.destination);
        assert_eq!(gl.texture_target(textures.source), Some(TextureTarget::External));
        assert_eq!(gl.texture_sampling(textures.source), Some(Sampling::LINEAR_CLAMP));
        assert_eq!(gl.texture_sampling(textures.destination), Some(Sampling::LINEAR_CLAMP));
        assert_eq!(gl.texture_size(textures.destination), Some(RenderDimensions::new(640, 480)));
        assert_eq!(gl.renderbuffer_size(textures.depth), Some(RenderDimensions::new(640, 480)));
        assert_eq!(
            gl.framebuffer_attachments(textures.framebuffer),
            Some((Some(textures.destination), Some(textures.depth)))
        );

        let live = gl.live_objects();
        assert_eq!(live.textures, 2);
        assert_eq!(live.renderbuffers, 1);
        assert_eq!(live.framebuffers, 1);
        assert_eq!(live.buffers, 1);
    }

    #[test]
    fn incomplete_framebuffer_leaves_nothing_allocated() {
        let gl = HeadlessGl::new();
        gl.inject(GlFault::IncompleteFramebuffer);
        let err = TextureCompositor::setup(gl.clone(), RenderDimensions::new(640, 480), DimensionPolicy::Exact)
            .err()
            .expect("setup should fail");
        assert_eq!(
            err,
            SetupError::IncompleteFramebuffer {
                status: FRAMEBUFFER_INCOMPLETE_ATTACHMENT
            }
        );
        assert!(gl.live_objects().is_empty());
    }

    #[test]
    fn allocation_failure_leaves_nothing_allocated() {
        let gl = HeadlessGl::new();
        gl.inject(GlFault::CreateFails(GlObjectKind::Renderbuffer));
        let err = TextureCompositor::setup(gl.clone(), RenderDimensions::new(64, 64), DimensionPolicy::Exact)
            .err()
            .expect("setup should fail");
        assert!(matches!(
            err,
            SetupError::Allocation {
                object: "depth renderbuffer",
                ..
            }
        ));
        assert!(gl.live_objects().is_empty());
    }

    #[test]
    fn update_size_keeps_handles_and_resizes_together() {
        let gl = HeadlessGl::new();
        let mut compositor = setup(&gl, 640, 480);
        let before = compositor.textures().expect("textures");

        for (width, height) in [(1920, 1080), (320, 240), (1, 4096)] {
            compositor
                .update_size(RenderDimensions::new(width, height))
                .expect("resize");
            let after = compositor.textures().expect("textures");
            assert_eq!(before, after);
            let expected = Some(RenderDimensions::new(width, height));
            assert_eq!(gl.texture_size(after.destination), expected);
            assert_eq!(gl.renderbuffer_size(after.depth), expected);
        }
    }

    #[test]
    fn onscreen_frame_runs_two_passes() {
        let gl = HeadlessGl::new();
        let mut compositor = setup(&gl, 640, 480);
        let textures = compositor.textures().expect("textures");

        let passes = compositor.render_frame(None, true).expect("render");
        assert_eq!(
            passes,
            FramePasses {
                offscreen: true,
                onscreen: true
            }
        );

        let draws = gl.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].framebuffer, Some(textures.framebuffer));
        assert_eq!(draws[0].texture, Some(textures.source));
        assert_eq!(draws[0].transform, Some(FrameTransform::IDENTITY.0));
        assert_eq!(draws[0].vertex_count, 4);
        assert_eq!(draws[1].framebuffer, None);
        assert_eq!(draws[1].texture, Some(textures.destination));
        assert!(draws.iter().all(|draw| draw.viewport == RenderDimensions::new(640, 480)));
    }

    #[test]
    fn offscreen_only_frame_uses_supplied_transform() {
        let gl = HeadlessGl::new();
        let mut compositor = setup(&gl, 640, 480);
        let flip = FrameTransform::flip_vertical();

        compositor.render_frame(Some(&flip), false).expect("render");
        let draws = gl.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].transform, Some(flip.0));
    }

    #[test]
    fn viewport_follows_logical_size_under_power_of_two_storage() {
        let gl = HeadlessGl::new();
        let mut compositor =
            TextureCompositor::setup(gl.clone(), RenderDimensions::new(640, 480), DimensionPolicy::PowerOfTwo)
                .expect("setup");
        compositor
            .update_size(RenderDimensions::new(1920, 1080))
            .expect("resize");
        let textures = compositor.textures().expect("textures");
        assert_eq!(gl.texture_size(textures.destination), Some(RenderDimensions::new(2048, 2048)));
        assert_eq!(compositor.storage_size(), RenderDimensions::new(2048, 2048));

        compositor.render_frame(None, false).expect("render");
        assert_eq!(gl.draws()[0].viewport, RenderDimensions::new(1920, 1080));
    }

    #[test]
    fn onscreen_pass_samples_only_content_of_padded_storage() {
        let gl = HeadlessGl::new();
        let mut compositor =
            TextureCompositor::setup(gl.clone(), RenderDimensions::new(640, 480), DimensionPolicy::PowerOfTwo)
                .expect("setup");
        compositor
            .update_size(RenderDimensions::new(1920, 1080))
            .expect("resize");

        compositor.render_frame(None, true).expect("render");
        let draws = gl.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].transform, Some(FrameTransform::IDENTITY.0));

        let onscreen = draws[1].transform.expect("onscreen transform");
        assert_eq!(onscreen[0], 1920.0 / 2048.0);
        assert_eq!(onscreen[5], 1080.0 / 2048.0);
        assert_eq!(draws[1].viewport, RenderDimensions::new(1920, 1080));
    }

    #[test]
    fn onscreen_pass_uses_identity_for_exact_storage() {
        let gl = HeadlessGl::new();
        let mut compositor = setup(&gl, 640, 480);
        compositor.render_frame(None, true).expect("render");
        assert_eq!(gl.draws()[1].transform, Some(FrameTransform::IDENTITY.0));
    }

    #[test]
    fn gl_error_during_draw_is_reported() {
        let gl = HeadlessGl::new();
        let mut compositor = setup(&gl, 640, 480);
        gl.inject(GlFault::ErrorOn {
            call: "draw_triangle_strip",
            code: INVALID_OPERATION,
        });
        let err = compositor.render_frame(None, true).unwrap_err();
        assert_eq!(
            err,
            RenderError::Gl {
                op: "draw offscreen quad",
                code: INVALID_OPERATION
            }
        );
    }

    #[test]
    fn program_failure_is_a_render_error() {
        let gl = HeadlessGl::new();
        let mut compositor = setup(&gl, 64, 64);
        gl.inject(GlFault::ProgramFails);
        let err = compositor.render_frame(None, false).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Program {
                program: "external-source",
                ..
            }
        ));
    }

    #[test]
    fn dispose_is_idempotent_and_frees_everything() {
        let gl = HeadlessGl::new();
        let mut compositor = setup(&gl, 640, 480);
        compositor.render_frame(None, true).expect("render");

        compositor.dispose();
        compositor.dispose();
        assert!(compositor.is_disposed());
        assert!(gl.live_objects().is_empty());
        assert_eq!(compositor.render_frame(None, true), Err(RenderError::Disposed));
        assert_eq!(
            compositor.update_size(RenderDimensions::new(10, 10)),
            Err(RenderError::Disposed)
        );
    }
}
