use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::trace;

use super::gl::HeadlessGl;
use crate::context::DisplayDriver;
use crate::error::{ContextCreationError, DriverError};
use crate::types::{ContextAttributes, ContextHandles, GlesVersion, SharedContextHandle};

/// Driver calls in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    GetDisplay,
    Initialize,
    ChooseConfig,
    CreateContext { share: Option<usize> },
    CreateSurface(usize),
    MakeCurrent { context: usize },
    ReleaseCurrent,
    SwapBuffers,
    DestroySurface(usize),
    DestroyContext(usize),
    Terminate,
    LoadGl,
}

/// Persistent failures: once injected, every matching call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverFault {
    NoDisplay,
    InitializeFails,
    NoConfig,
    ContextCreation,
    SurfaceCreation,
    MakeCurrentFails,
    /// Swaps succeed this many times, then fail.
    SwapFailsAfter(u64),
    LoadGlFails,
}

/// A driver object that has been created and not yet released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverObject {
    Display(usize),
    Context(usize),
    Surface(usize),
}

#[derive(Debug)]
struct DriverState {
    gl: HeadlessGl,
    next_handle: usize,
    faults: Vec<DriverFault>,
    events: Vec<DriverEvent>,
    live: Vec<DriverObject>,
    current: Option<(ThreadId, usize)>,
    swaps: u64,
}

impl DriverState {
    fn has(&self, fault: DriverFault) -> bool {
        self.faults.contains(&fault)
    }

    fn handle(&mut self) -> usize {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn release(&mut self, object: DriverObject) -> Result<(), DriverError> {
        match self.live.iter().position(|live| *live == object) {
            Some(index) => {
                self.live.remove(index);
                Ok(())
            }
            None => Err(DriverError::new(format!("{object:?} is not live"))),
        }
    }
}

/// In-memory display driver. Clones share state so tests can observe a
/// driver that has been moved onto the render thread.
#[derive(Debug, Clone)]
pub struct HeadlessDriver {
    state: Arc<Mutex<DriverState>>,
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DriverState {
                gl: HeadlessGl::new(),
                next_handle: 1,
                faults: Vec::new(),
                events: Vec::new(),
                live: Vec::new(),
                current: None,
                swaps: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inject(&self, fault: DriverFault) {
        self.lock().faults.push(fault);
    }

    /// GL model handed out by `load_gl`.
    pub fn gl(&self) -> HeadlessGl {
        self.lock().gl.clone()
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.lock().events.clone()
    }

    pub fn live_driver_objects(&self) -> Vec<DriverObject> {
        self.lock().live.clone()
    }

    pub fn swap_count(&self) -> u64 {
        self.lock().swaps
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.lock().current.map(|(thread, _)| thread)
    }

    pub fn is_current_on_this_thread(&self) -> bool {
        self.current_thread() == Some(thread::current().id())
    }
}

impl DisplayDriver for HeadlessDriver {
    type Display = usize;
    type Config = usize;
    type Context = usize;
    type Surface = usize;
    type Gl = HeadlessGl;

    fn get_display(&mut self) -> Option<usize> {
        let mut state = self.lock();
        state.events.push(DriverEvent::GetDisplay);
        if state.has(DriverFault::NoDisplay) {
            return None;
        }
        Some(state.handle())
    }

    fn initialize(&mut self, display: usize) -> Result<(i32, i32), DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::Initialize);
        if state.has(DriverFault::InitializeFails) {
            return Err(DriverError::new("display initialization failed"));
        }
        state.live.push(DriverObject::Display(display));
        Ok((1, 4))
    }

    fn choose_config(
        &mut self,
        _display: usize,
        attributes: &ContextAttributes,
    ) -> Result<Option<usize>, DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::ChooseConfig);
        let unsupported = attributes.depth_bits > 24 || attributes.red_bits > 8;
        if state.has(DriverFault::NoConfig) || unsupported {
            return Ok(None);
        }
        let config = match attributes.version {
            GlesVersion::Gles2 => 2,
            GlesVersion::Gles3 => 3,
        };
        Ok(Some(config))
    }

    fn create_context(
        &mut self,
        _display: usize,
        _config: usize,
        _attributes: &ContextAttributes,
        share: Option<SharedContextHandle>,
    ) -> Result<usize, DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::CreateContext {
            share: share.map(SharedContextHandle::as_raw),
        });
        if state.has(DriverFault::ContextCreation) {
            return Err(DriverError::new("context creation failed"));
        }
        let context = state.handle();
        state.live.push(DriverObject::Context(context));
        Ok(context)
    }

    fn create_window_surface(&mut self, _display: usize, _config: usize) -> Result<usize, ContextCreationError> {
        let mut state = self.lock();
        if state.has(DriverFault::SurfaceCreation) {
            return Err(ContextCreationError::SurfaceCreation(DriverError::new(
                "destination surface rejected",
            )));
        }
        let surface = state.handle();
        state.events.push(DriverEvent::CreateSurface(surface));
        state.live.push(DriverObject::Surface(surface));
        Ok(surface)
    }

    fn make_current(&mut self, _display: usize, _surface: usize, context: usize) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::MakeCurrent { context });
        if state.has(DriverFault::MakeCurrentFails) {
            return Err(DriverError::new("make current failed"));
        }
        state.current = Some((thread::current().id(), context));
        state.gl.bind_to_current_thread();
        Ok(())
    }

    fn release_current(&mut self, _display: usize) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::ReleaseCurrent);
        state.current = None;
        state.gl.release_binding();
        Ok(())
    }

    fn swap_buffers(&mut self, _display: usize, surface: usize) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::SwapBuffers);
        let limit = state.faults.iter().find_map(|fault| match fault {
            DriverFault::SwapFailsAfter(limit) => Some(*limit),
            _ => None,
        });
        if limit.is_some_and(|limit| state.swaps >= limit) {
            return Err(DriverError::new("surface lost"));
        }
        if !state.live.contains(&DriverObject::Surface(surface)) {
            return Err(DriverError::new("bad surface"));
        }
        state.swaps += 1;
        trace!(swaps = state.swaps, "headless swap");
        Ok(())
    }

    fn destroy_surface(&mut self, _display: usize, surface: usize) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::DestroySurface(surface));
        state.release(DriverObject::Surface(surface))
    }

    fn destroy_context(&mut self, _display: usize, context: usize) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::DestroyContext(context));
        state.release(DriverObject::Context(context))
    }

    fn terminate(&mut self, display: usize) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::Terminate);
        state.release(DriverObject::Display(display))
    }

    fn load_gl(&mut self) -> Result<HeadlessGl, DriverError> {
        let mut state = self.lock();
        state.events.push(DriverEvent::LoadGl);
        if state.has(DriverFault::LoadGlFails) {
            return Err(DriverError::new("GL entry points unavailable"));
        }
        Ok(state.gl.clone())
    }

    fn raw_handles(&self, display: usize, context: usize, surface: usize) -> ContextHandles {
        ContextHandles {
            display,
            context,
            surface,
        }
    }
}
