use std::ffi::c_void;
use std::fmt;
use std::ptr;

use khronos_egl as egl;
use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use tracing::debug;

use super::glow_backend::GlowBackend;
use crate::context::DisplayDriver;
use crate::error::{ContextCreationError, DriverError};
use crate::types::{ContextAttributes, ContextHandles, GlesVersion, SharedContextHandle};

type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

/// `EGL_OPENGL_ES3_BIT_KHR`; not exported for EGL 1.4.
const OPENGL_ES3_BIT: egl::Int = 0x0040;

/// Destination surface the window surface is created against.
#[derive(Clone, Copy)]
pub struct NativeWindow(*mut c_void);

// SAFETY: the pointer is an opaque platform handle; it is only passed to
// EGL, on the render thread, while the host keeps the window alive.
unsafe impl Send for NativeWindow {}

impl NativeWindow {
    /// Extracts the EGL native window from a platform handle.
    pub fn from_raw(handle: RawWindowHandle) -> Result<Self, ContextCreationError> {
        let raw = match handle {
            RawWindowHandle::AndroidNdk(handle) => handle.a_native_window.as_ptr(),
            RawWindowHandle::Xlib(handle) => handle.window as usize as *mut c_void,
            RawWindowHandle::Win32(handle) => handle.hwnd.get() as *mut c_void,
            other => {
                return Err(ContextCreationError::UnsupportedSurface(format!("{other:?}")));
            }
        };
        Ok(Self(raw))
    }

    pub fn from_window(window: &impl HasWindowHandle) -> Result<Self, ContextCreationError> {
        let handle = window
            .window_handle()
            .map_err(|err| ContextCreationError::UnsupportedSurface(err.to_string()))?;
        Self::from_raw(handle.as_raw())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

impl fmt::Debug for NativeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeWindow({:p})", self.0)
    }
}

/// [`DisplayDriver`] over a runtime-loaded libEGL.
pub struct EglDriver {
    egl: EglInstance,
    window: NativeWindow,
}

// SAFETY: the driver is built on the owning thread and moved once onto the
// render thread, which is the only thread that ever calls into it.
unsafe impl Send for EglDriver {}

impl EglDriver {
    /// Loads libEGL for a driver bound to `window`.
    pub fn load(window: NativeWindow) -> Result<Self, ContextCreationError> {
        // SAFETY: loading libEGL runs its initialisers, which have no
        // preconditions on our side.
        let egl = unsafe { EglInstance::load_required() }
            .map_err(|err| ContextCreationError::DriverUnavailable(err.to_string()))?;
        debug!(?window, "libEGL loaded");
        Ok(Self { egl, window })
    }
}

fn driver_error(op: &str, err: egl::Error) -> DriverError {
    DriverError::new(format!("{op}: {err}"))
}

impl DisplayDriver for EglDriver {
    type Display = egl::Display;
    type Config = egl::Config;
    type Context = egl::Context;
    type Surface = egl::Surface;
    type Gl = GlowBackend;

    fn get_display(&mut self) -> Option<egl::Display> {
        // SAFETY: DEFAULT_DISPLAY is always a valid native display id.
        unsafe { self.egl.get_display(egl::DEFAULT_DISPLAY) }
    }

    fn initialize(&mut self, display: egl::Display) -> Result<(i32, i32), DriverError> {
        self.egl
            .initialize(display)
            .map_err(|err| driver_error("eglInitialize", err))
    }

    fn choose_config(
        &mut self,
        display: egl::Display,
        attributes: &ContextAttributes,
    ) -> Result<Option<egl::Config>, DriverError> {
        let renderable = match attributes.version {
            GlesVersion::Gles2 => egl::OPENGL_ES2_BIT,
            GlesVersion::Gles3 => OPENGL_ES3_BIT,
        };
        let attrib_list = [
            egl::RED_SIZE,
            egl::Int::from(attributes.red_bits),
            egl::GREEN_SIZE,
            egl::Int::from(attributes.green_bits),
            egl::BLUE_SIZE,
            egl::Int::from(attributes.blue_bits),
            egl::ALPHA_SIZE,
            egl::Int::from(attributes.alpha_bits),
            egl::DEPTH_SIZE,
            egl::Int::from(attributes.depth_bits),
            egl::RENDERABLE_TYPE,
            renderable,
            egl::SURFACE_TYPE,
            egl::WINDOW_BIT,
            egl::NONE,
        ];
        self.egl
            .choose_first_config(display, &attrib_list)
            .map_err(|err| driver_error("eglChooseConfig", err))
    }

    fn create_context(
        &mut self,
        display: egl::Display,
        config: egl::Config,
        attributes: &ContextAttributes,
        share: Option<SharedContextHandle>,
    ) -> Result<egl::Context, DriverError> {
        self.egl
            .bind_api(egl::OPENGL_ES_API)
            .map_err(|err| driver_error("eglBindAPI", err))?;
        // SAFETY: the host guarantees a shared handle names a live context
        // for the lifetime of this player; it is only read here.
        let share = share.map(|handle| unsafe { egl::Context::from_ptr(handle.as_raw() as egl::EGLContext) });
        let attrib_list = [egl::CONTEXT_CLIENT_VERSION, attributes.version.major(), egl::NONE];
        self.egl
            .create_context(display, config, share, &attrib_list)
            .map_err(|err| driver_error("eglCreateContext", err))
    }

    fn create_window_surface(
        &mut self,
        display: egl::Display,
        config: egl::Config,
    ) -> Result<egl::Surface, ContextCreationError> {
        // SAFETY: the window was supplied by the host, which keeps it alive
        // until the player is disposed.
        unsafe {
            self.egl
                .create_window_surface(display, config, self.window.as_ptr(), None)
        }
        .map_err(|err| ContextCreationError::SurfaceCreation(driver_error("eglCreateWindowSurface", err)))
    }

    fn make_current(
        &mut self,
        display: egl::Display,
        surface: egl::Surface,
        context: egl::Context,
    ) -> Result<(), DriverError> {
        self.egl
            .make_current(display, Some(surface), Some(surface), Some(context))
            .map_err(|err| driver_error("eglMakeCurrent", err))
    }

    fn release_current(&mut self, display: egl::Display) -> Result<(), DriverError> {
        self.egl
            .make_current(display, None, None, None)
            .map_err(|err| driver_error("eglMakeCurrent(none)", err))
    }

    fn swap_buffers(&mut self, display: egl::Display, surface: egl::Surface) -> Result<(), DriverError> {
        self.egl
            .swap_buffers(display, surface)
            .map_err(|err| driver_error("eglSwapBuffers", err))
    }

    fn destroy_surface(&mut self, display: egl::Display, surface: egl::Surface) -> Result<(), DriverError> {
        self.egl
            .destroy_surface(display, surface)
            .map_err(|err| driver_error("eglDestroySurface", err))
    }

    fn destroy_context(&mut self, display: egl::Display, context: egl::Context) -> Result<(), DriverError> {
        self.egl
            .destroy_context(display, context)
            .map_err(|err| driver_error("eglDestroyContext", err))
    }

    fn terminate(&mut self, display: egl::Display) -> Result<(), DriverError> {
        self.egl
            .terminate(display)
            .map_err(|err| driver_error("eglTerminate", err))
    }

    fn load_gl(&mut self) -> Result<GlowBackend, DriverError> {
        let egl = &self.egl;
        // SAFETY: called on the render thread right after make_current, so
        // the resolved entry points belong to the current context.
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name)
                    .map_or(ptr::null(), |proc| proc as *const c_void)
            })
        };
        // SAFETY: as above.
        Ok(unsafe { GlowBackend::new(gl) })
    }

    fn raw_handles(&self, display: egl::Display, context: egl::Context, surface: egl::Surface) -> ContextHandles {
        ContextHandles {
            display: display.as_ptr() as usize,
            context: context.as_ptr() as usize,
            surface: surface.as_ptr() as usize,
        }
    }
}
