#[allow(clippy::module_inception)]
pub mod event_loop;

use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::gpu_manager;

pub fn run(
    gpu_manager: gpu_manager::GPUManager,
    event_loop: winit::event_loop::EventLoop<()>,
    viewer: &ViewerConfig,
) -> Result<(), ViewerError> {
    crate::event_loop::event_loop::EventLoop::run(gpu_manager, event_loop, viewer)
}
