use std::time::Instant;

use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopWindowTarget};
use winit::keyboard::{Key, NamedKey};

use crate::camera::OrbitCamera;
use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::gpu_manager;

pub struct EventLoop {
    manager: gpu_manager::GPUManager,
    camera: OrbitCamera,
    started: Instant,
    last_frame_inst: Instant,
    frame_count: u32,
    report_every: u32,
    accum_time: f32,
    /// Set when the loop has to stop on an error
    failure: Option<ViewerError>,
}

impl EventLoop {
    pub fn run(
        manager: gpu_manager::GPUManager,
        event_loop: winit::event_loop::EventLoop<()>,
        viewer: &ViewerConfig,
    ) -> Result<(), ViewerError> {
        let instance = Self {
            manager,
            camera: viewer.camera,
            started: Instant::now(),
            last_frame_inst: Instant::now(),
            frame_count: 0,
            report_every: viewer.report_every.max(1),
            accum_time: 0.0,
            failure: None,
        };
        instance.enter(event_loop)
    }

    fn enter(mut self, event_loop: winit::event_loop::EventLoop<()>) -> Result<(), ViewerError> {
        log::info!("Entering render loop...");
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run(|event, target| self.handle_event(event, target))?;
        self.failure.map_or(Ok(()), Err)
    }

    fn handle_event(&mut self, event: Event<()>, target: &EventLoopWindowTarget<()>) {
        match event {
            Event::AboutToWait => self.manager.window.request_redraw(),
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested
                | WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key: Key::Named(NamedKey::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => target.exit(),
                WindowEvent::RedrawRequested => {
                    if let Err(error) = self.redraw_requested() {
                        self.failure = Some(error);
                        target.exit();
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn redraw_requested(&mut self) -> Result<(), ViewerError> {
        self.accum_time += self.last_frame_inst.elapsed().as_secs_f32();
        self.last_frame_inst = Instant::now();
        self.frame_count += 1;
        if self.frame_count == self.report_every {
            log::info!(
                "Avg frame time {}ms",
                self.accum_time * 1000.0 / self.frame_count as f32
            );
            self.accum_time = 0.0;
            self.frame_count = 0;
        }

        let manager = &self.manager;
        let particles = manager.pipeline.particle_count();
        manager
            .pipeline
            .step_physics(&manager.device, &manager.queue, particles)?;

        let frame = match manager.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(ViewerError::SurfaceOutOfMemory),
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Timed out acquiring the next surface texture");
                return Ok(());
            }
            Err(error) => {
                log::debug!("Reconfiguring the surface: {error}");
                manager.surface.configure(&manager.device, &manager.config);
                return Ok(());
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let seconds = self.started.elapsed().as_secs_f32();
        manager.pipeline.render_frame(
            &manager.device,
            &manager.queue,
            &view,
            self.camera
                .projection(manager.config.width, manager.config.height),
            self.camera.view(seconds),
            particles,
        )?;
        manager.window.pre_present_notify();
        frame.present();
        Ok(())
    }
}
