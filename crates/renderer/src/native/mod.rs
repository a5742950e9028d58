//! Hardware backend: libEGL for the context, `glow` for GLES calls.

mod egl;
mod glow_backend;

pub use egl::{EglDriver, NativeWindow};
pub use glow_backend::GlowBackend;
