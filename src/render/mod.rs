//! Raster surface, compositing primitives, and the frame renderer.

pub(crate) mod composite;
mod elements;
mod frame;
mod surface;
pub(crate) mod text;

pub use frame::FrameRenderer;
pub use surface::Surface;

pub(crate) use surface::premultiply;
