//! User-defineable config for the viewer

use starglow_wgpu::SimParams;

use crate::camera::OrbitCamera;
use crate::galaxy::DiskGalaxy;

#[derive(Clone, Copy, Debug)]
pub struct ViewerConfig {
    /// Window size. The window can't be resized, the pipeline's targets are fixed-size.
    pub width: u32,
    pub height: u32,
    /// Initial conditions
    pub galaxy: DiskGalaxy,
    /// Seed for the initial conditions, the same seed gives the same galaxy
    pub seed: u64,
    pub sim: SimParams,
    pub camera: OrbitCamera,
    /// Frames averaged per frame time report
    pub report_every: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let sim = SimParams::default();
        Self {
            width: 1280,
            height: 720,
            galaxy: DiskGalaxy {
                softening: sim.damping,
                gravity: sim.gravity,
                ..DiskGalaxy::default()
            },
            seed: 0x5EED,
            sim,
            camera: OrbitCamera::default(),
            report_every: 100,
        }
    }
}
