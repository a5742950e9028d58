use scheduler::SchedulerError;
use thiserror::Error;

use crate::types::RenderDimensions;

/// Failure reported by a display driver call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The render context could not be brought up. Fatal for the instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextCreationError {
    #[error("display driver unavailable: {0}")]
    DriverUnavailable(String),
    #[error("no display available")]
    MissingDisplay,
    #[error("failed to initialize display: {0}")]
    DisplayInit(DriverError),
    #[error("no display configuration matches the requested attributes")]
    IncompatibleConfig,
    #[error("failed to create context: {0}")]
    ContextCreation(DriverError),
    #[error("destination surface is not supported: {0}")]
    UnsupportedSurface(String),
    #[error("failed to create window surface: {0}")]
    SurfaceCreation(DriverError),
    #[error("failed to make context current: {0}")]
    MakeCurrent(DriverError),
    #[error("context has been torn down")]
    TornDown,
}

/// Offscreen resources could not be allocated. Nothing from the failed
/// attempt stays allocated; the caller may retry with a fresh instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("failed to allocate {object}: {reason}")]
    Allocation { object: &'static str, reason: String },
    #[error("offscreen framebuffer incomplete (status {status:#06x})")]
    IncompleteFramebuffer { status: u32 },
    #[error("GL error {code:#06x} during {op}")]
    Gl { op: &'static str, code: u32 },
}

/// A draw or resize left the GPU in an error state. Fatal for the instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("GL error {code:#06x} after {op}")]
    Gl { op: &'static str, code: u32 },
    #[error("failed to build {program} program: {reason}")]
    Program { program: &'static str, reason: String },
    #[error("failed to latch decoded frame: {0}")]
    Latch(String),
    #[error("compositor resources have been disposed")]
    Disposed,
}

/// Presenting the frame failed. Fatal for the instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("buffer swap failed: {0}")]
    Driver(DriverError),
    #[error("no live surface to present to")]
    NoSurface,
}

/// Anything that aborts a single frame notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Swap(#[from] SwapError),
}

/// Errors surfaced to the owner of a player instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Context(#[from] ContextCreationError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Swap(#[from] SwapError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("dimensions {dimensions} outside 1..={max}")]
    InvalidDimensions { dimensions: RenderDimensions, max: u32 },
    #[error("render subsystem is no longer available (failed or disposed)")]
    Unavailable,
}

impl From<FrameError> for PlayerError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Render(err) => PlayerError::Render(err),
            FrameError::Swap(err) => PlayerError::Swap(err),
        }
    }
}
