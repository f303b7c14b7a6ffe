//! GPU pipeline that renders an N-body particle simulation as a bloom-lit point cloud.
//!
//! Every frame runs a fixed topology: two compute dispatches advance the particles, an additive
//! HDR splat draws them, a ping-pong separable blur produces the glow, a mip chain reduces the
//! scene luminance to an exposure estimate, and a tonemap pass composites everything to the
//! caller's target.

// Apparently `pub use` is bad?
// https://rust-lang.github.io/rust-clippy/master/index.html#/pub_use
#![allow(clippy::pub_use)]

pub mod config;
pub mod error;
pub mod headless;
pub mod pipeline;
pub mod resources;
pub mod schedule;
pub mod shader;
pub mod uniforms;

pub use crate::config::{PipelineConfig, SimParams};
pub use crate::error::{GpuError, PipelineError};
pub use crate::pipeline::Pipeline;
