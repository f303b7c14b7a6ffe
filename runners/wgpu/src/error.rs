//! Errors for GPU bring-up and for the pipeline itself

use thiserror::Error;

use crate::schedule::{Hazard, Resource};

/// Errors that can occur while getting hold of a GPU device.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GpuError {
    /// No adapter matched the request.
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    /// The adapter is missing something the pipeline can't run without.
    #[error("Adapter does not support the required downlevel capabilities: {0:?}")]
    MissingCapabilities(wgpu::DownlevelFlags),

    /// Failed to request device.
    #[error("Failed to request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    /// Failed to create surface.
    #[error("Failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    /// Surface is not supported by adapter.
    #[error("Surface not supported by adapter")]
    UnsupportedSurface,

    /// Mapping a buffer back to the host failed.
    #[error("Failed to read back from the GPU: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
}

/// Everything that can go wrong building or driving the pipeline. None of these are recoverable,
/// they either point at a broken shader asset or at a caller breaking the pipeline's contract.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// A shader stage failed to parse or validate.
    #[error("Shader program `{program}` failed to build in `{stage}`:\n{log}")]
    Shader {
        /// Program being built
        program: &'static str,
        /// File name of the offending stage
        stage: &'static str,
        /// Compiler output
        log: String,
    },

    /// The device rejected an object created while building the pipeline.
    #[error("GPU rejected `{program}`: {log}")]
    Device {
        /// Program or resource being built
        program: &'static str,
        /// Validation error reported by the device
        log: String,
    },

    /// Window dimensions that are zero, or too big to pad, can't size the render targets.
    #[error("Window dimensions {width}x{height} can't size the render targets")]
    InvalidDimensions {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// A blur downscale of zero would divide by zero.
    #[error("Blur downscale must be at least 1")]
    InvalidDownscale,

    /// The flare sprite needs at least one texel.
    #[error("Flare size must be at least 1")]
    InvalidFlareSize,

    /// More blur passes than one frame is allowed to record.
    #[error("{requested} blur iterations per direction, at most {max} are supported")]
    TooManyBlurIterations {
        /// Iterations asked for
        requested: u32,
        /// [`crate::PipelineConfig::MAX_BLUR_ITERATIONS`]
        max: u32,
    },

    /// A texture would be bigger than the device allows.
    #[error("`{texture}` would be {width}x{height}, the device allows at most {max} per side")]
    TextureTooLarge {
        /// Label of the texture
        texture: &'static str,
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// `max_texture_dimension_2d` of the device
        max: u32,
    },

    /// Position and velocity arrays must describe the same particles.
    #[error("Got {positions} positions but {velocities} velocities")]
    LengthMismatch {
        /// Number of positions
        positions: usize,
        /// Number of velocities
        velocities: usize,
    },

    /// Particle counts are 32 bit on the GPU.
    #[error("{0} particles don't fit in a 32 bit count")]
    TooManyParticles(usize),

    /// The particle buffers are fixed-size for the session.
    #[error("Particle buffers hold {loaded} particles, refusing to reload with {requested}")]
    ParticleCountChanged {
        /// Size of the existing buffers
        loaded: u32,
        /// Size of the rejected upload
        requested: u32,
    },

    /// More particles were asked for than the buffers hold.
    #[error("{requested} particles requested but only {loaded} are loaded")]
    ParticleCountExceeded {
        /// Size of the existing buffers
        loaded: u32,
        /// Particle count passed in
        requested: u32,
    },

    /// Particles must be loaded before they can be stepped or drawn.
    #[error("No particles have been loaded")]
    NotLoaded,

    /// A schedule that draws to the screen was encoded without a view of the screen.
    #[error("Schedule ends in a tonemap pass but no target view was given")]
    MissingTarget,

    /// A pass reads or draws into something the pipeline never created.
    #[error("Pass `{pass}` needs {resource:?}, which the pipeline doesn't have")]
    MissingResource {
        /// Label of the pass
        pass: &'static str,
        /// What it asked for
        resource: Resource,
    },

    /// The pass schedule would race on the GPU.
    #[error(transparent)]
    Hazard(#[from] Hazard),
}
