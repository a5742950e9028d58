use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

/// Default destination size used until the decoder negotiates one.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
/// Largest texture side accepted unless the caller overrides it.
pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 4096;

macro_rules! gl_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Wraps a raw GL object name; `None` for the reserved name `0`.
            pub fn new(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn from_non_zero(raw: NonZeroU32) -> Self {
                Self(raw)
            }

            pub fn get(self) -> u32 {
                self.0.get()
            }

            pub fn non_zero(self) -> NonZeroU32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

gl_handle!(
    /// GL texture object name.
    TextureId
);
gl_handle!(
    /// GL renderbuffer object name.
    RenderbufferId
);
gl_handle!(
    /// GL framebuffer object name. The default framebuffer has no id.
    FramebufferId
);
gl_handle!(
    /// GL buffer object name.
    BufferId
);
gl_handle!(
    /// Linked GL program name.
    ProgramId
);

/// Negotiated destination size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderDimensions {
    pub width: u32,
    pub height: u32,
}

impl RenderDimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns true if both sides are non-zero and within `max`.
    pub fn fits(&self, max: u32) -> bool {
        !self.is_empty() && self.width <= max && self.height <= max
    }
}

impl Default for RenderDimensions {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl fmt::Display for RenderDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How requested dimensions map onto texture storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DimensionPolicy {
    /// Allocate exactly the requested size.
    #[default]
    Exact,
    /// Round each side up to the next power of two, for hardware that cannot
    /// sample non-power-of-two render targets.
    PowerOfTwo,
}

impl DimensionPolicy {
    /// Storage size to allocate for the logical `dimensions`.
    pub fn storage_for(self, dimensions: RenderDimensions) -> RenderDimensions {
        match self {
            DimensionPolicy::Exact => dimensions,
            DimensionPolicy::PowerOfTwo => RenderDimensions::new(
                upper_power_of_two(dimensions.width),
                upper_power_of_two(dimensions.height),
            ),
        }
    }
}

impl fmt::Display for DimensionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionPolicy::Exact => f.write_str("exact"),
            DimensionPolicy::PowerOfTwo => f.write_str("power-of-two"),
        }
    }
}

fn upper_power_of_two(value: u32) -> u32 {
    value.max(1).checked_next_power_of_two().unwrap_or(value)
}

/// Column-major 4x4 matrix describing how the source texture is sampled
/// (crop, flip, rotation) for one decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform(pub [f32; 16]);

impl FrameTransform {
    pub const IDENTITY: FrameTransform = FrameTransform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn from_column_major(values: [f32; 16]) -> Self {
        Self(values)
    }

    /// Vertical flip in texture space, the usual transform for decoders
    /// whose image origin is top-left.
    pub fn flip_vertical() -> Self {
        let mut values = Self::IDENTITY.0;
        values[5] = -1.0;
        values[13] = 1.0;
        Self(values)
    }

    /// Scales texture coordinates so the unit quad samples only the
    /// `content` corner of a texture allocated at `storage`.
    pub fn content_region(content: RenderDimensions, storage: RenderDimensions) -> Self {
        if content == storage || storage.is_empty() {
            return Self::IDENTITY;
        }
        let mut values = Self::IDENTITY.0;
        values[0] = content.width as f32 / storage.width as f32;
        values[5] = content.height as f32 / storage.height as f32;
        Self(values)
    }

    pub fn as_array(&self) -> &[f32; 16] {
        &self.0
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Opaque handle to a GPU context owned by the host process.
///
/// The renderer only ever passes it to the driver as the share-context of the
/// context it creates; it is never made current, modified, or destroyed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedContextHandle(NonZeroUsize);

impl SharedContextHandle {
    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// Whether the render context shares resources with a host context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SharedContext {
    /// Create a private context and present on-screen ourselves.
    #[default]
    None,
    /// Share objects with the host's context; the host composites on-screen.
    Shared(SharedContextHandle),
}

impl SharedContext {
    /// Maps a raw platform pointer to a sharing mode. Null (the usual
    /// "no context" sentinel) becomes [`SharedContext::None`].
    pub fn from_raw(raw: usize) -> Self {
        match NonZeroUsize::new(raw) {
            Some(raw) => SharedContext::Shared(SharedContextHandle(raw)),
            None => SharedContext::None,
        }
    }

    pub fn handle(&self) -> Option<SharedContextHandle> {
        match self {
            SharedContext::None => None,
            SharedContext::Shared(handle) => Some(*handle),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, SharedContext::Shared(_))
    }
}

/// Which passes each frame runs. Fixed once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentMode {
    /// Host shares our objects and draws the offscreen texture itself.
    OffscreenOnly,
    /// We own the visible surface: offscreen pass, then blit it on-screen.
    OffscreenAndOnscreen,
}

impl PresentMode {
    pub fn for_shared(shared: &SharedContext) -> Self {
        if shared.is_shared() {
            PresentMode::OffscreenOnly
        } else {
            PresentMode::OffscreenAndOnscreen
        }
    }

    pub fn draws_on_screen(self) -> bool {
        matches!(self, PresentMode::OffscreenAndOnscreen)
    }
}

impl fmt::Display for PresentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresentMode::OffscreenOnly => f.write_str("offscreen-only"),
            PresentMode::OffscreenAndOnscreen => f.write_str("offscreen+onscreen"),
        }
    }
}

/// Client API version requested from the display driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlesVersion {
    #[default]
    Gles2,
    Gles3,
}

impl GlesVersion {
    pub fn major(self) -> i32 {
        match self {
            GlesVersion::Gles2 => 2,
            GlesVersion::Gles3 => 3,
        }
    }
}

/// Framebuffer configuration requested when choosing a display config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAttributes {
    pub version: GlesVersion,
    pub red_bits: u8,
    pub green_bits: u8,
    pub blue_bits: u8,
    pub alpha_bits: u8,
    pub depth_bits: u8,
}

impl Default for ContextAttributes {
    fn default() -> Self {
        Self {
            version: GlesVersion::default(),
            red_bits: 8,
            green_bits: 8,
            blue_bits: 8,
            alpha_bits: 8,
            depth_bits: 16,
        }
    }
}

/// Options that shape one player's render subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Destination size allocated during setup.
    pub initial_size: RenderDimensions,
    /// Storage rounding applied to the destination texture and depth buffer.
    pub dimension_policy: DimensionPolicy,
    /// Resize requests beyond this side length are rejected.
    pub max_texture_size: u32,
    /// Enable `SRC_ALPHA, ONE_MINUS_SRC_ALPHA` blending before each frame.
    pub alpha_blending: bool,
    /// Drain the GPU before presenting.
    pub finish_before_swap: bool,
    /// Requested display configuration.
    pub context: ContextAttributes,
    /// Name of the dedicated render thread.
    pub thread_name: String,
    /// Upper bound for synchronous hand-offs; `None` waits indefinitely.
    pub sync_timeout: Option<Duration>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            initial_size: RenderDimensions::default(),
            dimension_policy: DimensionPolicy::default(),
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            alpha_blending: true,
            finish_before_swap: true,
            context: ContextAttributes::default(),
            thread_name: "video-render".to_string(),
            sync_timeout: None,
        }
    }
}

/// Raw driver handles of a live context, for hosts that set up their own
/// sharing against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHandles {
    pub display: usize,
    pub context: usize,
    pub surface: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_policy_rounds_up_each_side() {
        let storage = DimensionPolicy::PowerOfTwo.storage_for(RenderDimensions::new(1920, 1080));
        assert_eq!(storage, RenderDimensions::new(2048, 2048));
        let exact = DimensionPolicy::PowerOfTwo.storage_for(RenderDimensions::new(512, 256));
        assert_eq!(exact, RenderDimensions::new(512, 256));
    }

    #[test]
    fn content_region_scales_into_padded_storage() {
        let transform = FrameTransform::content_region(
            RenderDimensions::new(1920, 1080),
            RenderDimensions::new(2048, 2048),
        );
        assert_eq!(transform.0[0], 1920.0 / 2048.0);
        assert_eq!(transform.0[5], 1080.0 / 2048.0);
        assert_eq!(transform.0[10], 1.0);
        let dims = RenderDimensions::new(512, 256);
        assert!(FrameTransform::content_region(dims, dims).is_identity());
    }

    #[test]
    fn exact_policy_keeps_dimensions() {
        let dims = RenderDimensions::new(641, 479);
        assert_eq!(DimensionPolicy::Exact.storage_for(dims), dims);
    }

    #[test]
    fn null_shared_context_means_no_sharing() {
        assert_eq!(SharedContext::from_raw(0), SharedContext::None);
        let shared = SharedContext::from_raw(0xdead_beef);
        assert_eq!(shared.handle().map(|h| h.as_raw()), Some(0xdead_beef));
    }

    #[test]
    fn present_mode_follows_sharing() {
        assert_eq!(
            PresentMode::for_shared(&SharedContext::None),
            PresentMode::OffscreenAndOnscreen
        );
        assert_eq!(
            PresentMode::for_shared(&SharedContext::from_raw(8)),
            PresentMode::OffscreenOnly
        );
    }

    #[test]
    fn dimensions_fit_checks_bounds() {
        assert!(RenderDimensions::new(4096, 1).fits(4096));
        assert!(!RenderDimensions::new(4097, 1).fits(4096));
        assert!(!RenderDimensions::new(0, 10).fits(4096));
    }

    #[test]
    fn handles_reject_zero() {
        assert!(TextureId::new(0).is_none());
        assert_eq!(TextureId::new(7).map(TextureId::get), Some(7));
    }
}
