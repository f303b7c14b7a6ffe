//! Pipeline Initializer, Particle Buffer Loader, Physics Step Driver and Frame Renderer.

pub mod builder;
mod passes;
#[allow(clippy::module_inception)]
pub mod pipeline;

pub use pipeline::Pipeline;
