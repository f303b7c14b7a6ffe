use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng as _;
use starglow_wgpu::{GpuError, Pipeline};

use crate::config::ViewerConfig;
use crate::error::ViewerError;

pub struct GPUManager {
    pub window: Arc<winit::window::Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub pipeline: Pipeline,
    pub config: wgpu::SurfaceConfiguration,
}

impl GPUManager {
    pub async fn setup(
        viewer: &ViewerConfig,
    ) -> Result<(Self, winit::event_loop::EventLoop<()>), ViewerError> {
        let event_loop = winit::event_loop::EventLoop::new()?;
        let window = Arc::new(
            winit::window::WindowBuilder::new()
                .with_title("Starglow")
                .with_inner_size(winit::dpi::PhysicalSize::new(viewer.width, viewer.height))
                .with_resizable(false)
                .build(&event_loop)?,
        );

        log::info!("Initializing the surface...");

        let backends = wgpu::util::backend_bits_from_env().unwrap_or_else(wgpu::Backends::all);
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let size = window.inner_size();
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(GpuError::from)?;
        let adapter = wgpu::util::initialize_adapter_from_env_or_default(&instance, Some(&surface))
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = Pipeline::request_device(&adapter).await?;

        let mut config = surface
            .get_default_config(&adapter, size.width.max(1), size.height.max(1))
            .ok_or(GpuError::UnsupportedSurface)?;
        config.present_mode = wgpu::PresentMode::AutoNoVsync;
        surface.configure(&device, &config);

        let mut pipeline = Pipeline::init(
            &device,
            &queue,
            config.format,
            config.width,
            config.height,
            viewer.sim,
        )?;

        let (positions, velocities) = viewer
            .galaxy
            .generate(&mut StdRng::seed_from_u64(viewer.seed));
        pipeline.load_particles(&device, &queue, &positions, &velocities)?;

        Ok((
            Self {
                window,
                surface,
                device,
                queue,
                pipeline,
                config,
            },
            // `event_loop` has to be passed seperately because of the `event_loop.run()` closure
            event_loop,
        ))
    }

    pub fn start(
        self,
        event_loop: winit::event_loop::EventLoop<()>,
        viewer: &ViewerConfig,
    ) -> Result<(), ViewerError> {
        crate::event_loop::run(self, event_loop, viewer)
    }
}
