//! A device with no window, rendering into an offscreen texture that can be read back. Lets the
//! pipeline be driven from tests and tools.

use crate::error::GpuError;
use crate::pipeline::Pipeline;
use crate::resources::Extent;

/// Bytes per pixel of [`Headless::FORMAT`]
const BYTES_PER_PIXEL: u32 = 4;

/// Offscreen stand-in for a window
pub struct Headless {
    /// Device the pipeline runs on
    pub device: wgpu::Device,
    /// Queue of `device`
    pub queue: wgpu::Queue,
    /// Stands in for a window surface
    pub target: wgpu::Texture,
    /// Render attachment view of `target`
    pub target_view: wgpu::TextureView,
    /// Size of `target`
    pub extent: Extent,
}

impl Headless {
    /// Format of the offscreen target
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    /// Grab any adapter that can run the pipeline and make a `width` x `height` target.
    ///
    /// # Errors
    /// No adapter, or one that can't run the pipeline.
    pub async fn new(width: u32, height: u32) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        let (device, queue) = Pipeline::request_device(&adapter).await?;

        let extent = Extent::new(width, height);
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("headless target"),
            size: extent.to_wgpu(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            device,
            queue,
            target,
            target_view,
            extent,
        })
    }

    /// RGBA8 pixels of the target, row major, without row padding.
    ///
    /// # Errors
    /// If the staging buffer can't be mapped.
    pub fn read_target(&self) -> Result<Vec<u8>, GpuError> {
        let row_bytes = self.extent.width * BYTES_PER_PIXEL;
        let padded_row_bytes = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = self.staging_buffer(u64::from(padded_row_bytes * self.extent.height));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read target"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(self.extent.height),
                },
            },
            self.extent.to_wgpu(),
        );
        self.queue.submit(Some(encoder.finish()));

        let padded = self.map(&staging)?;
        Ok(padded
            .chunks(padded_row_bytes as usize)
            .flat_map(|row| row.iter().take(row_bytes as usize).copied())
            .collect())
    }

    /// Whole contents of `buffer`, which needs `COPY_SRC` usage.
    ///
    /// # Errors
    /// If the staging buffer can't be mapped.
    pub fn read_buffer(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, GpuError> {
        let staging = self.staging_buffer(buffer.size());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read buffer"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, buffer.size());
        self.queue.submit(Some(encoder.finish()));
        self.map(&staging)
    }

    fn staging_buffer(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Block until `staging` is mapped and copy it out
    fn map(&self, staging: &wgpu::Buffer) -> Result<Vec<u8>, GpuError> {
        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver.recv().unwrap_or(Err(wgpu::BufferAsyncError))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }
}
