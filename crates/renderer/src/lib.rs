//! Video texture renderer.
//!
//! A decoder writes frames into an external (OES) texture; this crate draws
//! each one into an offscreen 2D texture the host compositor samples, and,
//! when the player owns its own surface, onto the screen as well. All GPU work
//! for one player happens on a single dedicated render thread:
//!
//! ```text
//!   decoder ──on_frame──▶ FrameNotifier ──run_async──▶ render thread
//!   host ──update_size──▶ VideoRenderer ──run_sync───▶   │
//!                                                         ▼
//!                      FrameSink ─▶ TextureCompositor (offscreen [+ onscreen])
//!                                          │
//!                                          ▼
//!                                  GraphicsContext::swap_buffers
//! ```
//!
//! [`context::DisplayDriver`] and [`gl::GlBackend`] are the seams to the
//! platform: [`native`] talks to libEGL and GLES through `glow`, [`headless`]
//! models both in memory.

pub mod compositor;
pub mod context;
pub mod error;
pub mod gl;
pub mod headless;
#[cfg(feature = "native")]
pub mod native;
pub mod player;
pub mod sink;
pub mod types;

pub use compositor::{FramePasses, TextureCompositor, TextureSet, QUAD_POSITIONS, QUAD_TEX_COORDS};
pub use context::{DisplayDriver, GraphicsContext};
pub use error::{
    ContextCreationError, DriverError, FrameError, PlayerError, RenderError, SetupError, SwapError,
};
pub use gl::GlBackend;
pub use player::{
    DecoderEvents, FrameNotifier, RenderEvent, RenderStats, VideoRenderer, EVENT_QUEUE_CAPACITY,
};
pub use sink::{DecodedFrame, FrameLatch, FrameOutcome, FramePhase, FrameSink, FrameStats, NoopLatch};
pub use types::{
    ContextAttributes, ContextHandles, DimensionPolicy, FrameTransform, GlesVersion, PresentMode,
    RenderDimensions, RenderOptions, SharedContext, SharedContextHandle, TextureId,
    DEFAULT_HEIGHT, DEFAULT_MAX_TEXTURE_SIZE, DEFAULT_WIDTH,
};
