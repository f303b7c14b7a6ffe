use starglow_wgpu::{GpuError, PipelineError};
use thiserror::Error;

/// Anything that ends the viewer
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Failed to run the event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("Failed to create the window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Out of memory acquiring the next surface texture")]
    SurfaceOutOfMemory,
}
