//! Display/context/surface lifecycle for one render thread.
//!
//! [`DisplayDriver`] is the EGL-shaped seam: the native implementation talks
//! to libEGL, the headless one models it in memory. [`GraphicsContext`] owns a
//! driver plus the live display, context and surface, and guarantees they are
//! released exactly once, surface first, display last.

use std::fmt;

use tracing::{debug, error, warn};

use crate::error::{ContextCreationError, DriverError, SwapError};
use crate::gl::GlBackend;
use crate::types::{ContextAttributes, ContextHandles, PresentMode, SharedContext, SharedContextHandle};

pub trait DisplayDriver: Send + 'static {
    type Display: Copy + fmt::Debug;
    type Config: Copy + fmt::Debug;
    type Context: Copy + fmt::Debug;
    type Surface: Copy + fmt::Debug;
    type Gl: GlBackend + 'static;

    fn get_display(&mut self) -> Option<Self::Display>;
    /// Initializes the display, returning the driver's (major, minor) version.
    fn initialize(&mut self, display: Self::Display) -> Result<(i32, i32), DriverError>;
    fn choose_config(
        &mut self,
        display: Self::Display,
        attributes: &ContextAttributes,
    ) -> Result<Option<Self::Config>, DriverError>;
    /// Creates a context, sharing objects with `share` when given. The share
    /// context is borrowed and must never be destroyed by the driver.
    fn create_context(
        &mut self,
        display: Self::Display,
        config: Self::Config,
        attributes: &ContextAttributes,
        share: Option<SharedContextHandle>,
    ) -> Result<Self::Context, DriverError>;
    /// Creates a window surface bound to the driver's destination surface.
    fn create_window_surface(
        &mut self,
        display: Self::Display,
        config: Self::Config,
    ) -> Result<Self::Surface, ContextCreationError>;
    fn make_current(
        &mut self,
        display: Self::Display,
        surface: Self::Surface,
        context: Self::Context,
    ) -> Result<(), DriverError>;
    fn release_current(&mut self, display: Self::Display) -> Result<(), DriverError>;
    fn swap_buffers(&mut self, display: Self::Display, surface: Self::Surface) -> Result<(), DriverError>;
    fn destroy_surface(&mut self, display: Self::Display, surface: Self::Surface) -> Result<(), DriverError>;
    fn destroy_context(&mut self, display: Self::Display, context: Self::Context) -> Result<(), DriverError>;
    fn terminate(&mut self, display: Self::Display) -> Result<(), DriverError>;
    /// Builds the GL function table for the current context.
    fn load_gl(&mut self) -> Result<Self::Gl, DriverError>;
    fn raw_handles(
        &self,
        display: Self::Display,
        context: Self::Context,
        surface: Self::Surface,
    ) -> ContextHandles;
}

struct LiveContext<D: DisplayDriver> {
    display: D::Display,
    context: D::Context,
    surface: D::Surface,
}

/// GPU context bound to a destination surface. Thread-affine: create, use and
/// drop it on the render thread only.
pub struct GraphicsContext<D: DisplayDriver> {
    driver: D,
    live: Option<LiveContext<D>>,
    shared: SharedContext,
    mode: PresentMode,
    version: (i32, i32),
}

impl<D: DisplayDriver> GraphicsContext<D> {
    /// Selects a display and config, creates the (optionally shared) context
    /// and window surface, and makes the context current on this thread.
    /// Partially created objects are released before an error is returned.
    pub fn initialize(
        mut driver: D,
        shared: SharedContext,
        attributes: &ContextAttributes,
    ) -> Result<Self, ContextCreationError> {
        let display = driver
            .get_display()
            .ok_or(ContextCreationError::MissingDisplay)?;
        let version = driver
            .initialize(display)
            .map_err(ContextCreationError::DisplayInit)?;

        let config = match driver.choose_config(display, attributes) {
            Ok(Some(config)) => config,
            Ok(None) => {
                abandon(&mut driver, display, None, None);
                return Err(ContextCreationError::IncompatibleConfig);
            }
            Err(err) => {
                warn!(%err, "config selection failed");
                abandon(&mut driver, display, None, None);
                return Err(ContextCreationError::IncompatibleConfig);
            }
        };

        let context = match driver.create_context(display, config, attributes, shared.handle()) {
            Ok(context) => context,
            Err(err) => {
                abandon(&mut driver, display, None, None);
                return Err(ContextCreationError::ContextCreation(err));
            }
        };

        let surface = match driver.create_window_surface(display, config) {
            Ok(surface) => surface,
            Err(err) => {
                abandon(&mut driver, display, Some(context), None);
                return Err(err);
            }
        };

        if let Err(err) = driver.make_current(display, surface, context) {
            abandon(&mut driver, display, Some(context), Some(surface));
            return Err(ContextCreationError::MakeCurrent(err));
        }

        let mode = PresentMode::for_shared(&shared);
        // `display` inside tracing macros resolves to `tracing::field::display`.
        let egl_display = display;
        debug!(
            ?egl_display,
            ?context,
            ?surface,
            shared = shared.is_shared(),
            %mode,
            version = ?version,
            "render context ready"
        );

        Ok(Self {
            driver,
            live: Some(LiveContext {
                display,
                context,
                surface,
            }),
            shared,
            mode,
            version,
        })
    }

    /// Binds the context to the calling thread.
    pub fn make_current(&mut self) -> Result<(), ContextCreationError> {
        let live = self.live.as_ref().ok_or(ContextCreationError::TornDown)?;
        self.driver
            .make_current(live.display, live.surface, live.context)
            .map_err(ContextCreationError::MakeCurrent)
    }

    /// Presents the current back buffer.
    pub fn swap_buffers(&mut self) -> Result<(), SwapError> {
        let live = self.live.as_ref().ok_or(SwapError::NoSurface)?;
        self.driver
            .swap_buffers(live.display, live.surface)
            .map_err(|err| {
                error!(%err, "buffer swap failed");
                SwapError::Driver(err)
            })
    }

    /// Loads GL entry points for the current context.
    pub fn load_gl(&mut self) -> Result<D::Gl, ContextCreationError> {
        if self.live.is_none() {
            return Err(ContextCreationError::TornDown);
        }
        self.driver
            .load_gl()
            .map_err(|err| ContextCreationError::DriverUnavailable(err.to_string()))
    }

    /// Releases surface, context and display, in that order. Safe to call
    /// more than once.
    pub fn teardown(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        if let Err(err) = self.driver.release_current(live.display) {
            warn!(%err, "failed to release current context");
        }
        abandon(&mut self.driver, live.display, Some(live.context), Some(live.surface));
        debug!("render context torn down");
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn present_mode(&self) -> PresentMode {
        self.mode
    }

    pub fn shared(&self) -> SharedContext {
        self.shared
    }

    pub fn driver_version(&self) -> (i32, i32) {
        self.version
    }

    pub fn handles(&self) -> Option<ContextHandles> {
        self.live
            .as_ref()
            .map(|live| self.driver.raw_handles(live.display, live.context, live.surface))
    }
}

impl<D: DisplayDriver> Drop for GraphicsContext<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn abandon<D: DisplayDriver>(
    driver: &mut D,
    display: D::Display,
    context: Option<D::Context>,
    surface: Option<D::Surface>,
) {
    if let Some(surface) = surface {
        if let Err(err) = driver.destroy_surface(display, surface) {
            warn!(%err, "failed to destroy surface");
        }
    }
    if let Some(context) = context {
        if let Err(err) = driver.destroy_context(display, context) {
            warn!(%err, "failed to destroy context");
        }
    }
    if let Err(err) = driver.terminate(display) {
        warn!(%err, "failed to terminate display");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DriverEvent, DriverFault, HeadlessDriver};

    fn init(driver: HeadlessDriver, shared: SharedContext) -> Result<GraphicsContext<HeadlessDriver>, ContextCreationError> {
        GraphicsContext::initialize(driver, shared, &ContextAttributes::default())
    }

    #[test]
    fn initialize_makes_context_current() {
        let driver = HeadlessDriver::new();
        let probe = driver.clone();
        let context = init(driver, SharedContext::None).expect("context");
        assert!(context.is_live());
        assert_eq!(context.present_mode(), PresentMode::OffscreenAndOnscreen);
        assert!(probe.is_current_on_this_thread());
    }

    #[test]
    fn shared_context_is_passed_and_never_destroyed() {
        let driver = HeadlessDriver::new();
        let probe = driver.clone();
        let shared = SharedContext::from_raw(0x5000);
        let mut context = init(driver, shared).expect("context");
        assert_eq!(context.present_mode(), PresentMode::OffscreenOnly);
        context.teardown();

        let events = probe.events();
        assert!(events.contains(&DriverEvent::CreateContext {
            share: Some(0x5000)
        }));
        assert!(events
            .iter()
            .all(|event| *event != DriverEvent::DestroyContext(0x5000)));
    }

    #[test]
    fn teardown_releases_in_order_and_is_idempotent() {
        let driver = HeadlessDriver::new();
        let probe = driver.clone();
        let mut context = init(driver, SharedContext::None).expect("context");
        context.teardown();
        context.teardown();
        drop(context);

        let releases: Vec<_> = probe
            .events()
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    DriverEvent::DestroySurface(_)
                        | DriverEvent::DestroyContext(_)
                        | DriverEvent::Terminate
                )
            })
            .collect();
        assert_eq!(releases.len(), 3);
        assert!(matches!(releases[0], DriverEvent::DestroySurface(_)));
        assert!(matches!(releases[1], DriverEvent::DestroyContext(_)));
        assert_eq!(releases[2], DriverEvent::Terminate);
        assert!(probe.live_driver_objects().is_empty());
    }

    #[test]
    fn creation_failures_map_to_distinct_errors() {
        let cases = [
            (DriverFault::NoDisplay, ContextCreationError::MissingDisplay),
            (DriverFault::NoConfig, ContextCreationError::IncompatibleConfig),
        ];
        for (fault, expected) in cases {
            let driver = HeadlessDriver::new();
            driver.inject(fault);
            let err = init(driver, SharedContext::None).err().expect("failure");
            assert_eq!(err, expected);
        }

        let driver = HeadlessDriver::new();
        driver.inject(DriverFault::SurfaceCreation);
        let probe = driver.clone();
        let err = init(driver, SharedContext::None).err().expect("failure");
        assert!(matches!(err, ContextCreationError::SurfaceCreation(_)));
        assert!(probe.live_driver_objects().is_empty(), "partial context leaked");
    }

    #[test]
    fn swap_after_teardown_reports_missing_surface() {
        let driver = HeadlessDriver::new();
        let mut context = init(driver, SharedContext::None).expect("context");
        context.swap_buffers().expect("swap");
        context.teardown();
        assert_eq!(context.swap_buffers(), Err(SwapError::NoSurface));
        assert_eq!(context.make_current(), Err(ContextCreationError::TornDown));
    }

    #[test]
    fn swap_failure_surfaces_driver_error() {
        let driver = HeadlessDriver::new();
        driver.inject(DriverFault::SwapFailsAfter(0));
        let mut context = init(driver, SharedContext::None).expect("context");
        assert!(matches!(context.swap_buffers(), Err(SwapError::Driver(_))));
    }
}
