//! Per-frame handler run on the render thread for every decoder notification.

use std::fmt;

use tracing::{trace, warn};

use crate::compositor::{FramePasses, TextureCompositor};
use crate::context::{DisplayDriver, GraphicsContext};
use crate::error::{FrameError, RenderError};
use crate::gl::{check_render, GlBackend};
use crate::types::{FrameTransform, PresentMode, RenderOptions, TextureId};

/// A frame the decoder has finished writing into the source texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame {
    pub source: TextureId,
    pub transform: Option<FrameTransform>,
}

impl DecodedFrame {
    pub fn new(source: TextureId, transform: Option<FrameTransform>) -> Self {
        Self { source, transform }
    }
}

/// Where the most recent notification got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    #[default]
    Idle,
    FrameReceived,
    OffscreenDrawn,
    OnscreenDrawn,
    Presented,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FramePhase::Idle => "idle",
            FramePhase::FrameReceived => "frame-received",
            FramePhase::OffscreenDrawn => "offscreen-drawn",
            FramePhase::OnscreenDrawn => "onscreen-drawn",
            FramePhase::Presented => "presented",
        };
        f.write_str(label)
    }
}

/// Hook that makes the newest decoded image visible through the source
/// texture before it is sampled. Runs on the render thread with the context
/// current.
pub trait FrameLatch: Send {
    fn latch(&mut self, source: TextureId) -> Result<(), String>;
}

/// For decoders that write straight into the source texture.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLatch;

impl FrameLatch for NoopLatch {
    fn latch(&mut self, _source: TextureId) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub frames_received: u64,
    pub frames_presented: u64,
    /// Notifications naming a texture other than our source.
    pub frames_rejected: u64,
    pub offscreen_passes: u64,
    pub onscreen_passes: u64,
    pub swaps: u64,
    pub last_phase: FramePhase,
}

/// Result of handling one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was drawn and presented; `frame` counts from 1.
    Presented { frame: u64, passes: FramePasses },
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    pub alpha_blending: bool,
    pub finish_before_swap: bool,
}

impl From<&RenderOptions> for SinkOptions {
    fn from(options: &RenderOptions) -> Self {
        Self {
            alpha_blending: options.alpha_blending,
            finish_before_swap: options.finish_before_swap,
        }
    }
}

pub struct FrameSink {
    mode: PresentMode,
    options: SinkOptions,
    latch: Box<dyn FrameLatch>,
    stats: FrameStats,
}

impl FrameSink {
    pub fn new(mode: PresentMode, options: SinkOptions, latch: Box<dyn FrameLatch>) -> Self {
        Self {
            mode,
            options,
            latch,
            stats: FrameStats::default(),
        }
    }

    /// Latches, composites and presents one frame. Any GL or swap error
    /// aborts the frame before it is presented.
    pub fn on_frame<D: DisplayDriver>(
        &mut self,
        context: &mut GraphicsContext<D>,
        compositor: &mut TextureCompositor<D::Gl>,
        frame: &DecodedFrame,
    ) -> Result<FrameOutcome, FrameError> {
        if compositor.source_texture() != Some(frame.source) {
            warn!(
                texture = %frame.source,
                expected = ?compositor.source_texture(),
                "frame notification for foreign texture ignored"
            );
            self.stats.frames_rejected += 1;
            return Ok(FrameOutcome::Rejected);
        }

        self.stats.last_phase = FramePhase::FrameReceived;
        self.stats.frames_received += 1;
        self.latch.latch(frame.source).map_err(RenderError::Latch)?;

        if self.options.alpha_blending {
            compositor.gl().enable_alpha_blending();
            check_render(compositor.gl(), "enable blending")?;
        }

        let passes = compositor.render_frame(frame.transform.as_ref(), self.mode.draws_on_screen())?;
        self.stats.offscreen_passes += 1;
        self.stats.last_phase = FramePhase::OffscreenDrawn;
        if passes.onscreen {
            self.stats.onscreen_passes += 1;
            self.stats.last_phase = FramePhase::OnscreenDrawn;
        }

        if self.options.finish_before_swap {
            compositor.gl().finish();
            check_render(compositor.gl(), "finish")?;
        }

        context.swap_buffers()?;
        self.stats.swaps += 1;
        self.stats.frames_presented += 1;
        self.stats.last_phase = FramePhase::Presented;

        let frame = self.stats.frames_presented;
        trace!(frame, mode = %self.mode, "frame presented");
        Ok(FrameOutcome::Presented { frame, passes })
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn present_mode(&self) -> PresentMode {
        self.mode
    }
}

impl fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSink")
            .field("mode", &self.mode)
            .field("options", &self.options)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
