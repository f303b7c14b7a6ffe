//! The public face of the pipeline.

use glam::{Mat4, Vec4};

use super::builder;
use crate::config::{PipelineConfig, SimParams};
use crate::error::{GpuError, PipelineError};
use crate::resources::{FramebufferLayout, ParticleBuffers, ResourceBundle};
use crate::schedule::Schedule;
use crate::uniforms::{HdrUniform, UniformValue};

/// The bloom particle pipeline. Owns every GPU resource it uses, so any number of them can live
/// side by side on one device.
pub struct Pipeline {
    /// Shape of the post-processing
    config: PipelineConfig,
    /// Everything on the GPU
    bundle: ResourceBundle,
}

impl Pipeline {
    /// Build the pipeline for a `width` x `height` window with the default topology.
    ///
    /// # Errors
    /// Bad dimensions, or a shader the device or naga rejects.
    #[inline]
    pub fn init(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        output_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        params: SimParams,
    ) -> Result<Self, PipelineError> {
        Self::with_config(
            device,
            queue,
            output_format,
            (width, height),
            params,
            PipelineConfig::default(),
        )
    }

    /// Build the pipeline with a custom topology.
    ///
    /// # Errors
    /// Bad dimensions, a zero blur downscale, or a shader the device or naga rejects.
    pub fn with_config(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        output_format: wgpu::TextureFormat,
        (width, height): (u32, u32),
        params: SimParams,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let layout = FramebufferLayout::new(width, height, &config)?;
        let bundle =
            builder::Builder::new(device, queue).build(layout, output_format, &params, &config)?;

        let padded = layout.padded();
        log::info!(
            "Pipeline ready: window {width}x{height}, targets {}x{}, luminance lod {}, {} blur passes",
            padded.width,
            padded.height,
            layout.lod(),
            config.blur_iterations.saturating_mul(2),
        );

        Ok(Self { config, bundle })
    }

    /// Upload the particles. The first call allocates the buffers, later calls must pass the
    /// same number of particles and overwrite them in place.
    ///
    /// # Errors
    /// Mismatched slice lengths, or a particle count different from the first upload.
    pub fn load_particles(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        positions: &[Vec4],
        velocities: &[Vec4],
    ) -> Result<(), PipelineError> {
        if let Some(particles) = &self.bundle.particles {
            log::trace!("Re-uploading {} particles", particles.count());
            return particles.upload(queue, positions, velocities);
        }

        let particles =
            ParticleBuffers::new(device, &self.bundle.storage_layout, positions, velocities)?;
        log::info!("Loaded {} particles", particles.count());
        self.bundle.particles = Some(particles);
        Ok(())
    }

    /// Advance the first `particle_count` particles by one timestep.
    ///
    /// # Errors
    /// Nothing loaded, more particles than loaded, or a hazard in the schedule.
    pub fn step_physics(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        particle_count: u32,
    ) -> Result<(), PipelineError> {
        self.check_particle_count(particle_count)?;
        self.bundle
            .uniforms
            .write_particle_count(queue, particle_count);
        self.submit(
            device,
            queue,
            &Schedule::physics_step(particle_count),
            None,
            "physics step",
        )
    }

    /// Draw one frame of the first `particle_count` particles into `target`, which must be a
    /// window-sized view in the output format the pipeline was built with. Drawing zero
    /// particles doesn't need anything loaded.
    ///
    /// # Errors
    /// More particles than loaded, or a hazard in the schedule.
    pub fn render_frame(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        projection: Mat4,
        view: Mat4,
        particle_count: u32,
    ) -> Result<(), PipelineError> {
        if particle_count > 0 {
            self.check_particle_count(particle_count)?;
        }

        let hdr = &self.bundle.uniforms.hdr;
        hdr.set(queue, HdrUniform::View, UniformValue::Mat4(view));
        hdr.set(queue, HdrUniform::Projection, UniformValue::Mat4(projection));

        let schedule = Schedule::frame(
            particle_count,
            self.config.blur_iterations,
            self.bundle.layout.lod(),
        );
        self.submit(device, queue, &schedule, Some(target), "frame")
    }

    /// Check, encode and submit a schedule as one command buffer
    fn submit(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        schedule: &Schedule,
        screen: Option<&wgpu::TextureView>,
        label: &str,
    ) -> Result<(), PipelineError> {
        schedule.validate()?;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        self.encode(&mut encoder, schedule, screen)?;
        queue.submit(Some(encoder.finish()));
        log::trace!("Submitted {label}, {} passes", schedule.passes().len());
        Ok(())
    }

    fn check_particle_count(&self, requested: u32) -> Result<(), PipelineError> {
        let particles = self
            .bundle
            .particles
            .as_ref()
            .ok_or(PipelineError::NotLoaded)?;
        if requested > particles.count() {
            return Err(PipelineError::ParticleCountExceeded {
                loaded: particles.count(),
                requested,
            });
        }
        Ok(())
    }

    pub(super) const fn bundle(&self) -> &ResourceBundle {
        &self.bundle
    }

    /// Target sizes
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &FramebufferLayout {
        &self.bundle.layout
    }

    /// Topology the pipeline was built with
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of particles the buffers hold, zero before the first upload
    #[inline]
    #[must_use]
    pub fn particle_count(&self) -> u32 {
        self.bundle
            .particles
            .as_ref()
            .map_or(0, ParticleBuffers::count)
    }

    /// Position and velocity buffers, once loaded
    #[inline]
    #[must_use]
    pub fn particle_buffers(&self) -> Option<(&wgpu::Buffer, &wgpu::Buffer)> {
        self.bundle
            .particles
            .as_ref()
            .map(|particles| (&particles.positions, &particles.velocities))
    }

    /// Check the adapter can run the pipeline, then request a device for it. Honours
    /// `WGPU_TRACE` for API traces.
    ///
    /// # Errors
    /// Missing downlevel capabilities, or the device request failing.
    pub async fn request_device(
        adapter: &wgpu::Adapter,
    ) -> Result<(wgpu::Device, wgpu::Queue), GpuError> {
        let adapter_info = adapter.get_info();
        log::info!("Using {} ({:?})", adapter_info.name, adapter_info.backend);

        let required_downlevel_capabilities = Self::required_downlevel_capabilities();
        let downlevel_capabilities = adapter.get_downlevel_capabilities();
        if !downlevel_capabilities
            .flags
            .contains(required_downlevel_capabilities.flags)
        {
            return Err(GpuError::MissingCapabilities(
                required_downlevel_capabilities.flags - downlevel_capabilities.flags,
            ));
        }

        // Make sure we use the texture resolution limits from the adapter, so we can support images the size of the surface.
        let needed_limits = Self::required_limits().using_resolution(adapter.limits());

        let trace_dir = std::env::var("WGPU_TRACE");
        let device = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: Self::required_features(),
                    required_limits: needed_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                trace_dir.ok().as_ref().map(std::path::Path::new),
            )
            .await?;
        Ok(device)
    }

    /// Limits the pipeline fits within
    #[inline]
    #[must_use]
    pub fn required_limits() -> wgpu::Limits {
        wgpu::Limits::downlevel_defaults()
    }

    /// No optional features are used
    #[inline]
    #[must_use]
    pub const fn required_features() -> wgpu::Features {
        wgpu::Features::empty()
    }

    /// Compute shaders are the only hard requirement
    #[inline]
    #[must_use]
    pub fn required_downlevel_capabilities() -> wgpu::DownlevelCapabilities {
        wgpu::DownlevelCapabilities {
            flags: wgpu::DownlevelFlags::COMPUTE_SHADERS,
            ..Default::default()
        }
    }
}
