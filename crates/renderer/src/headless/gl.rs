use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::gl::{
    GlBackend, Sampling, TextureTarget, UniformLocation, FRAMEBUFFER_COMPLETE,
    FRAMEBUFFER_INCOMPLETE_ATTACHMENT, FRAMEBUFFER_INCOMPLETE_DIMENSIONS,
    FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT, INVALID_ENUM, INVALID_FRAMEBUFFER_OPERATION,
    INVALID_OPERATION, INVALID_VALUE, NO_ERROR,
};
use crate::types::{BufferId, FramebufferId, ProgramId, RenderDimensions, RenderbufferId, TextureId};

const TEXTURE_UNITS: u32 = 8;
const MAX_RENDERBUFFER_SIZE: u32 = 16384;

/// Object kinds that can be made to fail on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlObjectKind {
    Texture,
    Renderbuffer,
    Framebuffer,
    Buffer,
}

/// One-shot faults consumed by the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlFault {
    /// Raise `code` after the next call to the named [`GlBackend`] method.
    ErrorOn { call: &'static str, code: u32 },
    /// The next `create_*` of this kind fails.
    CreateFails(GlObjectKind),
    /// The next completeness check reports an incomplete attachment.
    IncompleteFramebuffer,
    /// The next program fails to link.
    ProgramFails,
}

/// A recorded `draw_triangle_strip`.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    /// Global draw order across the model.
    pub seq: u64,
    pub thread: ThreadId,
    /// `None` is the default framebuffer.
    pub framebuffer: Option<FramebufferId>,
    pub viewport: RenderDimensions,
    pub program: ProgramId,
    /// Texture bound to the unit the program's sampler reads.
    pub texture: Option<TextureId>,
    pub transform: Option<[f32; 16]>,
    pub first: i32,
    pub vertex_count: i32,
    pub blending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveObjects {
    pub textures: usize,
    pub renderbuffers: usize,
    pub framebuffers: usize,
    pub buffers: usize,
    pub programs: usize,
}

impl LiveObjects {
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.textures + self.renderbuffers + self.framebuffers + self.buffers + self.programs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    /// Standalone model: any thread may issue calls.
    AnyThread,
    Thread(ThreadId),
    Released,
}

#[derive(Debug, Default)]
struct TextureObject {
    target: Option<TextureTarget>,
    sampling: Option<Sampling>,
    size: Option<RenderDimensions>,
}

#[derive(Debug, Default)]
struct FramebufferObject {
    color: Option<TextureId>,
    depth: Option<RenderbufferId>,
}

#[derive(Debug, Clone, Copy)]
enum UniformValue {
    Int(i32),
    Mat4([f32; 16]),
}

#[derive(Debug)]
struct ProgramObject {
    samples: TextureTarget,
    uniforms: Vec<String>,
    attributes: Vec<String>,
    values: HashMap<u32, UniformValue>,
}

#[derive(Debug)]
struct GlState {
    binding: Binding,
    next_name: u32,
    textures: HashMap<TextureId, TextureObject>,
    renderbuffers: HashMap<RenderbufferId, Option<RenderDimensions>>,
    framebuffers: HashMap<FramebufferId, FramebufferObject>,
    buffers: HashMap<BufferId, usize>,
    programs: HashMap<ProgramId, ProgramObject>,
    active_unit: u32,
    bound_textures: HashMap<(u32, TextureTarget), TextureId>,
    bound_renderbuffer: Option<RenderbufferId>,
    bound_framebuffer: Option<FramebufferId>,
    current_program: Option<ProgramId>,
    viewport: RenderDimensions,
    blending: bool,
    error: Option<u32>,
    faults: Vec<GlFault>,
    draws: Vec<DrawCall>,
    draw_seq: u64,
    clears: usize,
    finishes: usize,
    foreign_calls: usize,
}

impl Default for GlState {
    fn default() -> Self {
        Self {
            binding: Binding::AnyThread,
            next_name: 1,
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            active_unit: 0,
            bound_textures: HashMap::new(),
            bound_renderbuffer: None,
            bound_framebuffer: None,
            current_program: None,
            viewport: RenderDimensions::new(0, 0),
            blending: false,
            error: None,
            faults: Vec::new(),
            draws: Vec::new(),
            draw_seq: 0,
            clears: 0,
            finishes: 0,
            foreign_calls: 0,
        }
    }
}

impl GlState {
    fn raise(&mut self, code: u32) {
        // GL keeps the first error until it is read.
        if self.error.is_none() {
            self.error = Some(code);
        }
    }

    fn take_fault(&mut self, matches: impl Fn(&GlFault) -> bool) -> Option<GlFault> {
        let index = self.faults.iter().position(matches)?;
        Some(self.faults.remove(index))
    }

    fn allocate_name(&mut self, kind: GlObjectKind) -> Result<u32, String> {
        if self
            .take_fault(|fault| *fault == GlFault::CreateFails(kind))
            .is_some()
        {
            self.raise(crate::gl::OUT_OF_MEMORY);
            return Err(format!("{kind:?} allocation failed"));
        }
        let name = self.next_name;
        self.next_name += 1;
        Ok(name)
    }

    fn bound_texture(&self, target: TextureTarget) -> Option<TextureId> {
        self.bound_textures.get(&(self.active_unit, target)).copied()
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> u32 {
        let Some(object) = self.framebuffers.get(&framebuffer) else {
            return FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
        };
        let Some(color) = object.color else {
            return FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT;
        };
        let Some(color_size) = self.textures.get(&color).and_then(|texture| texture.size) else {
            return FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
        };
        match object.depth {
            None => FRAMEBUFFER_COMPLETE,
            Some(depth) => match self.renderbuffers.get(&depth).copied().flatten() {
                None => FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
                Some(depth_size) if depth_size != color_size => FRAMEBUFFER_INCOMPLETE_DIMENSIONS,
                Some(_) => FRAMEBUFFER_COMPLETE,
            },
        }
    }
}

/// In-memory model of the GLES subset the compositor uses.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// compositor owns another. Calls made from a thread other than the one the
/// owning context is current on are rejected with `INVALID_OPERATION` and
/// counted in [`HeadlessGl::foreign_calls`].
#[derive(Debug, Clone, Default)]
pub struct HeadlessGl {
    state: Arc<Mutex<GlState>>,
}

impl HeadlessGl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `op` if the caller may issue GL calls, then applies any
    /// injected error for `name`. Returns `None` for rejected calls.
    fn call<T>(&self, name: &'static str, op: impl FnOnce(&mut GlState) -> T) -> Option<T> {
        let mut state = self.lock();
        let allowed = match state.binding {
            Binding::AnyThread => true,
            Binding::Thread(owner) => owner == thread::current().id(),
            Binding::Released => false,
        };
        if !allowed {
            state.foreign_calls += 1;
            state.raise(INVALID_OPERATION);
            return None;
        }
        let value = op(&mut state);
        if let Some(GlFault::ErrorOn { code, .. }) =
            state.take_fault(|fault| matches!(fault, GlFault::ErrorOn { call, .. } if *call == name))
        {
            state.raise(code);
        }
        Some(value)
    }

    pub fn inject(&self, fault: GlFault) {
        self.lock().faults.push(fault);
    }

    pub(crate) fn bind_to_current_thread(&self) {
        self.lock().binding = Binding::Thread(thread::current().id());
    }

    pub(crate) fn release_binding(&self) {
        self.lock().binding = Binding::Released;
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.lock().draws.clone()
    }

    pub fn live_objects(&self) -> LiveObjects {
        let state = self.lock();
        LiveObjects {
            textures: state.textures.len(),
            renderbuffers: state.renderbuffers.len(),
            framebuffers: state.framebuffers.len(),
            buffers: state.buffers.len(),
            programs: state.programs.len(),
        }
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<RenderDimensions> {
        self.lock().textures.get(&texture).and_then(|object| object.size)
    }

    pub fn texture_target(&self, texture: TextureId) -> Option<TextureTarget> {
        self.lock().textures.get(&texture).and_then(|object| object.target)
    }

    pub fn texture_sampling(&self, texture: TextureId) -> Option<Sampling> {
        self.lock().textures.get(&texture).and_then(|object| object.sampling)
    }

    pub fn renderbuffer_size(&self, renderbuffer: RenderbufferId) -> Option<RenderDimensions> {
        self.lock().renderbuffers.get(&renderbuffer).copied().flatten()
    }

    pub fn framebuffer_attachments(
        &self,
        framebuffer: FramebufferId,
    ) -> Option<(Option<TextureId>, Option<RenderbufferId>)> {
        self.lock()
            .framebuffers
            .get(&framebuffer)
            .map(|object| (object.color, object.depth))
    }

    pub fn blending_enabled(&self) -> bool {
        self.lock().blending
    }

    pub fn clears(&self) -> usize {
        self.lock().clears
    }

    pub fn finishes(&self) -> usize {
        self.lock().finishes
    }

    pub fn foreign_calls(&self) -> usize {
        self.lock().foreign_calls
    }
}

fn declared_names(sources: [&str; 2], qualifier: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in sources.iter().flat_map(|source| source.lines()) {
        let line = line.trim();
        if !line.starts_with(qualifier) {
            continue;
        }
        if let Some(name) = line
            .trim_end_matches(';')
            .split_whitespace()
            .last()
            .filter(|name| !names.iter().any(|known| known == name))
        {
            names.push(name.to_string());
        }
    }
    names
}

impl GlBackend for HeadlessGl {
    fn create_texture(&self) -> Result<TextureId, String> {
        self.call("create_texture", |state| {
            let name = state.allocate_name(GlObjectKind::Texture)?;
            let id = TextureId::new(name).ok_or("texture name overflow")?;
            state.textures.insert(id, TextureObject::default());
            Ok(id)
        })
        .unwrap_or_else(|| Err("no current context".to_string()))
    }

    fn delete_texture(&self, texture: TextureId) {
        self.call("delete_texture", |state| {
            state.textures.remove(&texture);
            state.bound_textures.retain(|_, bound| *bound != texture);
        });
    }

    fn bind_texture(&self, target: TextureTarget, texture: Option<TextureId>) {
        self.call("bind_texture", |state| {
            let unit = state.active_unit;
            let Some(texture) = texture else {
                state.bound_textures.remove(&(unit, target));
                return;
            };
            let existing = match state.textures.get(&texture) {
                Some(object) => object.target,
                None => {
                    state.raise(INVALID_OPERATION);
                    return;
                }
            };
            if existing.is_some_and(|existing| existing != target) {
                state.raise(INVALID_OPERATION);
                return;
            }
            if let Some(object) = state.textures.get_mut(&texture) {
                object.target = Some(target);
            }
            state.bound_textures.insert((unit, target), texture);
        });
    }

    fn active_texture(&self, unit: u32) {
        self.call("active_texture", |state| {
            if unit >= TEXTURE_UNITS {
                state.raise(INVALID_ENUM);
            } else {
                state.active_unit = unit;
            }
        });
    }

    fn set_sampling(&self, target: TextureTarget, sampling: Sampling) {
        self.call("set_sampling", |state| {
            match state.bound_texture(target) {
                Some(texture) => {
                    if let Some(object) = state.textures.get_mut(&texture) {
                        object.sampling = Some(sampling);
                    }
                }
                None => state.raise(INVALID_OPERATION),
            }
        });
    }

    fn allocate_rgba8(&self, size: RenderDimensions) {
        self.call("allocate_rgba8", |state| {
            if size.width > MAX_RENDERBUFFER_SIZE || size.height > MAX_RENDERBUFFER_SIZE {
                state.raise(INVALID_VALUE);
                return;
            }
            match state.bound_texture(TextureTarget::Texture2d) {
                Some(texture) => {
                    if let Some(object) = state.textures.get_mut(&texture) {
                        object.size = Some(size);
                    }
                }
                None => state.raise(INVALID_OPERATION),
            }
        });
    }

    fn create_renderbuffer(&self) -> Result<RenderbufferId, String> {
        self.call("create_renderbuffer", |state| {
            let name = state.allocate_name(GlObjectKind::Renderbuffer)?;
            let id = RenderbufferId::new(name).ok_or("renderbuffer name overflow")?;
            state.renderbuffers.insert(id, None);
            Ok(id)
        })
        .unwrap_or_else(|| Err("no current context".to_string()))
    }

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferId) {
        self.call("delete_renderbuffer", |state| {
            state.renderbuffers.remove(&renderbuffer);
            if state.bound_renderbuffer == Some(renderbuffer) {
                state.bound_renderbuffer = None;
            }
        });
    }

    fn bind_renderbuffer(&self, renderbuffer: Option<RenderbufferId>) {
        self.call("bind_renderbuffer", |state| match renderbuffer {
            Some(id) if !state.renderbuffers.contains_key(&id) => state.raise(INVALID_OPERATION),
            _ => state.bound_renderbuffer = renderbuffer,
        });
    }

    fn allocate_depth16(&self, size: RenderDimensions) {
        self.call("allocate_depth16", |state| {
            if size.width > MAX_RENDERBUFFER_SIZE || size.height > MAX_RENDERBUFFER_SIZE {
                state.raise(INVALID_VALUE);
                return;
            }
            match state.bound_renderbuffer {
                Some(id) => {
                    state.renderbuffers.insert(id, Some(size));
                }
                None => state.raise(INVALID_OPERATION),
            }
        });
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, String> {
        self.call("create_framebuffer", |state| {
            let name = state.allocate_name(GlObjectKind::Framebuffer)?;
            let id = FramebufferId::new(name).ok_or("framebuffer name overflow")?;
            state.framebuffers.insert(id, FramebufferObject::default());
            Ok(id)
        })
        .unwrap_or_else(|| Err("no current context".to_string()))
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        self.call("delete_framebuffer", |state| {
            state.framebuffers.remove(&framebuffer);
            if state.bound_framebuffer == Some(framebuffer) {
                state.bound_framebuffer = None;
            }
        });
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        self.call("bind_framebuffer", |state| match framebuffer {
            Some(id) if !state.framebuffers.contains_key(&id) => state.raise(INVALID_OPERATION),
            _ => state.bound_framebuffer = framebuffer,
        });
    }

    fn attach_color_texture(&self, texture: TextureId) {
        self.call("attach_color_texture", |state| {
            let bound = state.bound_framebuffer;
            match bound {
                Some(id) if state.textures.contains_key(&texture) => {
                    if let Some(object) = state.framebuffers.get_mut(&id) {
                        object.color = Some(texture);
                    }
                }
                _ => state.raise(INVALID_OPERATION),
            }
        });
    }

    fn attach_depth_renderbuffer(&self, renderbuffer: RenderbufferId) {
        self.call("attach_depth_renderbuffer", |state| {
            let bound = state.bound_framebuffer;
            match bound {
                Some(id) if state.renderbuffers.contains_key(&renderbuffer) => {
                    if let Some(object) = state.framebuffers.get_mut(&id) {
                        object.depth = Some(renderbuffer);
                    }
                }
                _ => state.raise(INVALID_OPERATION),
            }
        });
    }

    fn framebuffer_status(&self) -> u32 {
        self.call("framebuffer_status", |state| {
            if state
                .take_fault(|fault| *fault == GlFault::IncompleteFramebuffer)
                .is_some()
            {
                return FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
            }
            match state.bound_framebuffer {
                None => FRAMEBUFFER_COMPLETE,
                Some(id) => state.framebuffer_status(id),
            }
        })
        .unwrap_or(0)
    }

    fn create_buffer(&self) -> Result<BufferId, String> {
        self.call("create_buffer", |state| {
            let name = state.allocate_name(GlObjectKind::Buffer)?;
            let id = BufferId::new(name).ok_or("buffer name overflow")?;
            state.buffers.insert(id, 0);
            Ok(id)
        })
        .unwrap_or_else(|| Err("no current context".to_string()))
    }

    fn delete_buffer(&self, buffer: BufferId) {
        self.call("delete_buffer", |state| {
            state.buffers.remove(&buffer);
        });
    }

    fn upload_vertices(&self, buffer: BufferId, data: &[f32]) {
        self.call("upload_vertices", |state| match state.buffers.get_mut(&buffer) {
            Some(len) => *len = data.len(),
            None => state.raise(INVALID_OPERATION),
        });
    }

    fn bind_vertex_attribute(&self, buffer: BufferId, _index: u32, components: i32, offset: usize) {
        self.call("bind_vertex_attribute", |state| {
            let Some(len) = state.buffers.get(&buffer).copied() else {
                state.raise(INVALID_OPERATION);
                return;
            };
            if !(1..=4).contains(&components) || offset >= len {
                state.raise(INVALID_VALUE);
            }
        });
    }

    fn create_program(&self, vertex: &str, fragment: &str) -> Result<ProgramId, String> {
        self.call("create_program", |state| {
            if state.take_fault(|fault| *fault == GlFault::ProgramFails).is_some() {
                return Err("link failed: injected fault".to_string());
            }
            let external = fragment.contains("samplerExternalOES");
            if external && !fragment.contains("GL_OES_EGL_image_external") {
                return Err("compile failed: samplerExternalOES requires GL_OES_EGL_image_external".to_string());
            }
            let name = state.next_name;
            state.next_name += 1;
            let id = ProgramId::new(name).ok_or("program name overflow")?;
            state.programs.insert(
                id,
                ProgramObject {
                    samples: if external {
                        TextureTarget::External
                    } else {
                        TextureTarget::Texture2d
                    },
                    uniforms: declared_names([vertex, fragment], "uniform "),
                    attributes: declared_names([vertex, fragment], "attribute "),
                    values: HashMap::new(),
                },
            );
            Ok(id)
        })
        .unwrap_or_else(|| Err("no current context".to_string()))
    }

    fn delete_program(&self, program: ProgramId) {
        self.call("delete_program", |state| {
            state.programs.remove(&program);
            if state.current_program == Some(program) {
                state.current_program = None;
            }
        });
    }

    fn use_program(&self, program: Option<ProgramId>) {
        self.call("use_program", |state| match program {
            Some(id) if !state.programs.contains_key(&id) => state.raise(INVALID_VALUE),
            _ => state.current_program = program,
        });
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.call("uniform_location", |state| {
            let object = state.programs.get(&program)?;
            let index = object.uniforms.iter().position(|uniform| uniform == name)?;
            u32::try_from(index).ok().map(UniformLocation)
        })
        .flatten()
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.call("attrib_location", |state| {
            let object = state.programs.get(&program)?;
            let index = object.attributes.iter().position(|attribute| attribute == name)?;
            u32::try_from(index).ok()
        })
        .flatten()
    }

    fn set_uniform_i32(&self, location: UniformLocation, value: i32) {
        self.call("set_uniform_i32", |state| set_uniform(state, location, UniformValue::Int(value)));
    }

    fn set_uniform_mat4(&self, location: UniformLocation, value: &[f32; 16]) {
        self.call("set_uniform_mat4", |state| set_uniform(state, location, UniformValue::Mat4(*value)));
    }

    fn viewport(&self, size: RenderDimensions) {
        self.call("viewport", |state| state.viewport = size);
    }

    fn clear_color_and_depth(&self) {
        self.call("clear_color_and_depth", |state| {
            if let Some(id) = state.bound_framebuffer {
                if state.framebuffer_status(id) != FRAMEBUFFER_COMPLETE {
                    state.raise(INVALID_FRAMEBUFFER_OPERATION);
                    return;
                }
            }
            state.clears += 1;
        });
    }

    fn enable_alpha_blending(&self) {
        self.call("enable_alpha_blending", |state| state.blending = true);
    }

    fn draw_triangle_strip(&self, first: i32, count: i32) {
        self.call("draw_triangle_strip", |state| {
            let Some(program) = state.current_program else {
                state.raise(INVALID_OPERATION);
                return;
            };
            if let Some(id) = state.bound_framebuffer {
                if state.framebuffer_status(id) != FRAMEBUFFER_COMPLETE {
                    state.raise(INVALID_FRAMEBUFFER_OPERATION);
                    return;
                }
            }
            let Some(object) = state.programs.get(&program) else {
                state.raise(INVALID_OPERATION);
                return;
            };
            let mut unit = 0;
            let mut transform = None;
            for value in object.values.values() {
                match value {
                    UniformValue::Int(value) => unit = *value,
                    UniformValue::Mat4(matrix) => transform = Some(*matrix),
                }
            }
            let texture = u32::try_from(unit)
                .ok()
                .and_then(|unit| state.bound_textures.get(&(unit, object.samples)).copied());

            state.draw_seq += 1;
            let call = DrawCall {
                seq: state.draw_seq,
                thread: thread::current().id(),
                framebuffer: state.bound_framebuffer,
                viewport: state.viewport,
                program,
                texture,
                transform,
                first,
                vertex_count: count,
                blending: state.blending,
            };
            state.draws.push(call);
        });
    }

    fn finish(&self) {
        self.call("finish", |state| state.finishes += 1);
    }

    fn get_error(&self) -> u32 {
        self.lock().error.take().unwrap_or(NO_ERROR)
    }
}

fn set_uniform(state: &mut GlState, location: UniformLocation, value: UniformValue) {
    let Some(program) = state.current_program else {
        state.raise(INVALID_OPERATION);
        return;
    };
    match state.programs.get_mut(&program) {
        Some(object) if (location.0 as usize) < object.uniforms.len() => {
            object.values.insert(location.0, value);
        }
        _ => state.raise(INVALID_OPERATION),
    }
}
