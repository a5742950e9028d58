//! GPU-less implementations of [`GlBackend`](crate::gl::GlBackend) and
//! [`DisplayDriver`](crate::context::DisplayDriver).
//!
//! The model tracks object lifetimes, storage, attachments, bindings and the
//! thread each call arrives on, and records every draw. Faults can be
//! injected to drive error paths.

mod driver;
mod gl;

pub use driver::{DriverEvent, DriverFault, DriverObject, HeadlessDriver};
pub use gl::{DrawCall, GlFault, GlObjectKind, HeadlessGl, LiveObjects};
