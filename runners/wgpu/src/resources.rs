//! Everything the pipeline owns on the GPU, and the sizing maths behind it.

use glam::{Vec2, Vec4};
use wgpu::util::DeviceExt as _;

use crate::config::{PipelineConfig, SimParams};
use crate::error::PipelineError;
use crate::schedule::{BlurDirection, Resource};
use crate::uniforms::{
    BlurUniform, HdrUniform, IntegrationUniform, InteractionUniform, TonemapUniform,
    UniformBuffer, UniformValue,
};

/// The four offscreen render targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Attachment {
    /// HDR scene the particles are splatted into
    Scene = 0,
    /// First blur buffer
    BlurA = 1,
    /// Second blur buffer
    BlurB = 2,
    /// Luminance, with a full mip chain
    Luminance = 3,
}

impl Attachment {
    /// Every attachment, in index order
    pub const ALL: [Self; 4] = [Self::Scene, Self::BlurA, Self::BlurB, Self::Luminance];

    /// Position in [`Attachment::ALL`]
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Debug label
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Scene => "scene",
            Self::BlurA => "blur a",
            Self::BlurB => "blur b",
            Self::Luminance => "luminance",
        }
    }

    /// Texel format
    #[inline]
    #[must_use]
    pub const fn format(self) -> wgpu::TextureFormat {
        match self {
            Self::Scene | Self::BlurA | Self::BlurB => wgpu::TextureFormat::Rgba16Float,
            Self::Luminance => wgpu::TextureFormat::R16Float,
        }
    }
}

/// Width and height in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_structs)]
pub struct Extent {
    /// Pixels across
    pub width: u32,
    /// Pixels down
    pub height: u32,
}

impl Extent {
    /// A `width` x `height` extent
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of mip `level`, never smaller than a pixel
    #[inline]
    #[must_use]
    pub fn mip(self, level: u32) -> Self {
        Self::new(
            self.width.checked_shr(level).unwrap_or(0).max(1),
            self.height.checked_shr(level).unwrap_or(0).max(1),
        )
    }

    /// Single layer `wgpu` extent
    #[inline]
    #[must_use]
    pub const fn to_wgpu(self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Sizes of every offscreen target for a given window.
///
/// All targets are padded by the margin on every side. The blur targets are the padded size
/// divided by the downscale factor, the luminance target is half the padded size with mips down
/// to `lod`, where `lod = floor(log2(max(padded) / 2))` using integer division.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferLayout {
    /// Window size, also the tonemap viewport
    window: Extent,
    /// Window plus the margin on every side
    padded: Extent,
    /// Pixels of padding per side
    margin: u32,
    /// Divisor of the blur targets
    blur_downscale: u32,
    /// Deepest luminance mip
    lod: u32,
}

impl FramebufferLayout {
    /// # Errors
    /// A zero window dimension, a window too big to pad, or a config the passes can't be built
    /// from (zero downscale, zero flare, too many blur iterations).
    #[inline]
    pub fn new(width: u32, height: u32, config: &PipelineConfig) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions { width, height });
        }
        if config.blur_downscale == 0 {
            return Err(PipelineError::InvalidDownscale);
        }
        if config.flare_size == 0 {
            return Err(PipelineError::InvalidFlareSize);
        }
        if config.blur_iterations > PipelineConfig::MAX_BLUR_ITERATIONS {
            return Err(PipelineError::TooManyBlurIterations {
                requested: config.blur_iterations,
                max: PipelineConfig::MAX_BLUR_ITERATIONS,
            });
        }

        let pad = |side: u32| {
            config
                .margin
                .checked_mul(2)
                .and_then(|margins| side.checked_add(margins))
        };
        let (Some(padded_width), Some(padded_height)) = (pad(width), pad(height)) else {
            return Err(PipelineError::InvalidDimensions { width, height });
        };
        let padded = Extent::new(padded_width, padded_height);

        Ok(Self {
            window: Extent::new(width, height),
            padded,
            margin: config.margin,
            blur_downscale: config.blur_downscale,
            lod: (padded.width.max(padded.height) / 2).max(1).ilog2(),
        })
    }

    /// Check every target and the flare against the device's texture size limit.
    ///
    /// # Errors
    /// [`PipelineError::TextureTooLarge`] for the first texture over the limit.
    pub fn check_limits(&self, limits: &wgpu::Limits, flare_size: u32) -> Result<(), PipelineError> {
        let max = limits.max_texture_dimension_2d;
        let textures = Attachment::ALL
            .map(|attachment| (attachment.label(), self.size(attachment)))
            .into_iter()
            .chain([("flare", Extent::new(flare_size, flare_size))]);
        for (texture, extent) in textures {
            if extent.width > max || extent.height > max {
                return Err(PipelineError::TextureTooLarge {
                    texture,
                    width: extent.width,
                    height: extent.height,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Window size
    #[inline]
    #[must_use]
    pub const fn window(&self) -> Extent {
        self.window
    }

    /// Window plus the margin on every side
    #[inline]
    #[must_use]
    pub const fn padded(&self) -> Extent {
        self.padded
    }

    /// Deepest mip of the luminance target
    #[inline]
    #[must_use]
    pub const fn lod(&self) -> u32 {
        self.lod
    }

    /// Base size of `attachment`
    #[inline]
    #[must_use]
    pub fn size(&self, attachment: Attachment) -> Extent {
        let padded = self.padded();
        let divisor = match attachment {
            Attachment::Scene => 1,
            Attachment::BlurA | Attachment::BlurB => self.blur_downscale,
            Attachment::Luminance => 2,
        };
        Extent::new(
            (padded.width / divisor).max(1),
            (padded.height / divisor).max(1),
        )
    }

    /// Mips allocated for `attachment`
    #[inline]
    #[must_use]
    pub const fn mip_level_count(&self, attachment: Attachment) -> u32 {
        match attachment {
            Attachment::Luminance => self.lod + 1,
            Attachment::Scene | Attachment::BlurA | Attachment::BlurB => 1,
        }
    }

    /// Viewport of a pass drawing into `target`. `None` for things that aren't render targets.
    #[inline]
    #[must_use]
    pub fn viewport(&self, target: Resource) -> Option<Extent> {
        match target {
            Resource::Attachment { attachment, level } => Some(self.size(attachment).mip(level)),
            Resource::Screen => Some(self.window),
            Resource::Positions | Resource::Velocities | Resource::Flare => None,
        }
    }

    /// Half size of a particle sprite in normalised device coordinates
    #[inline]
    #[must_use]
    pub fn sprite_size(&self, flare_size: u32) -> Vec2 {
        Vec2::new(
            flare_size as f32 / (2.0 * self.window.width as f32),
            flare_size as f32 / (2.0 * self.window.height as f32),
        )
    }

    /// Distance between blur taps in texture coordinates
    #[inline]
    #[must_use]
    pub fn blur_offset(&self) -> Vec2 {
        Vec2::new(
            self.blur_downscale as f32 / self.window.width as f32,
            self.blur_downscale as f32 / self.window.height as f32,
        )
    }

    /// Scale and offset mapping screen texture coordinates into the padded targets
    #[inline]
    #[must_use]
    pub fn crop(&self) -> Vec4 {
        let padded = self.padded();
        Vec4::new(
            self.window.width as f32 / padded.width as f32,
            self.window.height as f32 / padded.height as f32,
            self.margin as f32 / padded.width as f32,
            self.margin as f32 / padded.height as f32,
        )
    }
}

/// Intensity of the flare sprite, row major, `size * size` values in `[0, 1]`.
///
/// A Gaussian centred on the middle of the grid, gamma-raised by 2.2 to tighten the core.
#[must_use]
pub fn flare_pixels(size: u32) -> Vec<f32> {
    let sigma2 = size as f32 / 2.0;
    let centre = (size as f32 - 1.0) / 2.0;
    (0..size)
        .flat_map(|i| {
            (0..size).map(move |j| {
                let di = i as f32 - centre;
                let dj = j as f32 - centre;
                (-(di * di + dj * dj) / (2.0 * sigma2)).exp().powf(2.2)
            })
        })
        .collect()
}

/// Quantise flare intensities for an `R8Unorm` texture
#[must_use]
pub fn flare_texels(pixels: &[f32]) -> Vec<u8> {
    pixels
        .iter()
        .map(|pixel| (pixel.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect()
}

/// One offscreen target with a view per mip level
pub struct RenderTarget {
    /// The texture itself
    pub texture: wgpu::Texture,
    /// All mips, for sampling
    pub view: wgpu::TextureView,
    /// One view per mip, for rendering into
    pub levels: Vec<wgpu::TextureView>,
    /// Size of mip 0
    pub extent: Extent,
}

impl RenderTarget {
    /// Allocate `attachment` at its size in `layout`
    #[must_use]
    pub fn new(device: &wgpu::Device, layout: &FramebufferLayout, attachment: Attachment) -> Self {
        let extent = layout.size(attachment);
        let mip_level_count = layout.mip_level_count(attachment);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(attachment.label()),
            size: extent.to_wgpu(),
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: attachment.format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let levels = (0..mip_level_count)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(attachment.label()),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        Self {
            texture,
            view,
            levels,
            extent,
        }
    }
}

/// The four offscreen targets
pub struct RenderTargets {
    scene: RenderTarget,
    blur_a: RenderTarget,
    blur_b: RenderTarget,
    luminance: RenderTarget,
}

impl RenderTargets {
    /// Allocate every target at the sizes `layout` gives
    #[must_use]
    pub fn new(device: &wgpu::Device, layout: &FramebufferLayout) -> Self {
        Self {
            scene: RenderTarget::new(device, layout, Attachment::Scene),
            blur_a: RenderTarget::new(device, layout, Attachment::BlurA),
            blur_b: RenderTarget::new(device, layout, Attachment::BlurB),
            luminance: RenderTarget::new(device, layout, Attachment::Luminance),
        }
    }

    /// The target backing `attachment`
    #[inline]
    #[must_use]
    pub const fn get(&self, attachment: Attachment) -> &RenderTarget {
        match attachment {
            Attachment::Scene => &self.scene,
            Attachment::BlurA => &self.blur_a,
            Attachment::BlurB => &self.blur_b,
            Attachment::Luminance => &self.luminance,
        }
    }
}

/// Positions and velocities, shared by the kernels (as storage) and the splat (as instances).
pub struct ParticleBuffers {
    /// `vec4` per particle, mass in `w`
    pub positions: wgpu::Buffer,
    /// `vec4` per particle
    pub velocities: wgpu::Buffer,
    /// Both buffers at storage bindings 0 and 1
    pub bind_group: wgpu::BindGroup,
    /// Number of particles the buffers hold
    count: u32,
}

impl ParticleBuffers {
    /// Label of the position buffer
    pub const POSITIONS: &'static str = "particle positions";
    /// Label of the velocity buffer
    pub const VELOCITIES: &'static str = "particle velocities";

    /// Allocate both buffers and fill them. An empty set still gets one zeroed element so the
    /// bind group is valid.
    ///
    /// # Errors
    /// If the slices differ in length or hold more than `u32::MAX` particles.
    pub fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        positions: &[Vec4],
        velocities: &[Vec4],
    ) -> Result<Self, PipelineError> {
        let count = Self::count_of(positions, velocities)?;
        let create = |label, data: &[Vec4]| {
            let contents = if data.is_empty() { &[Vec4::ZERO][..] } else { data };
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            })
        };
        let positions = create(Self::POSITIONS, positions);
        let velocities = create(Self::VELOCITIES, velocities);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particles"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: velocities.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            positions,
            velocities,
            bind_group,
            count,
        })
    }

    /// Overwrite the buffers in place. The count must match the allocation.
    ///
    /// # Errors
    /// If the slices differ in length or don't match the allocated count.
    pub fn upload(
        &self,
        queue: &wgpu::Queue,
        positions: &[Vec4],
        velocities: &[Vec4],
    ) -> Result<(), PipelineError> {
        let requested = Self::count_of(positions, velocities)?;
        if requested != self.count {
            return Err(PipelineError::ParticleCountChanged {
                loaded: self.count,
                requested,
            });
        }
        if requested > 0 {
            queue.write_buffer(&self.positions, 0, bytemuck::cast_slice(positions));
            queue.write_buffer(&self.velocities, 0, bytemuck::cast_slice(velocities));
        }
        Ok(())
    }

    /// Number of particles the buffers hold
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    fn count_of(positions: &[Vec4], velocities: &[Vec4]) -> Result<u32, PipelineError> {
        if positions.len() != velocities.len() {
            return Err(PipelineError::LengthMismatch {
                positions: positions.len(),
                velocities: velocities.len(),
            });
        }
        u32::try_from(positions.len())
            .map_err(|_error| PipelineError::TooManyParticles(positions.len()))
    }
}

/// Uniform buffers of every program
pub struct Uniforms {
    /// Interaction kernel constants and count
    pub interaction: UniformBuffer<InteractionUniform>,
    /// Integration kernel constants and count
    pub integration: UniformBuffer<IntegrationUniform>,
    /// Camera and sprite size
    pub hdr: UniformBuffer<HdrUniform>,
    /// One per direction, so the direction never has to change mid-frame
    pub blur: [UniformBuffer<BlurUniform>; 2],
    /// Crop and luminance lod
    pub tonemap: UniformBuffer<TonemapUniform>,
}

impl Uniforms {
    /// Allocate every buffer zeroed
    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            interaction: UniformBuffer::new(device, "interaction uniforms"),
            integration: UniformBuffer::new(device, "integration uniforms"),
            hdr: UniformBuffer::new(device, "hdr uniforms"),
            blur: BlurDirection::ALL.map(|direction| match direction {
                BlurDirection::Horizontal => {
                    UniformBuffer::new(device, "horizontal blur uniforms")
                }
                BlurDirection::Vertical => UniformBuffer::new(device, "vertical blur uniforms"),
            }),
            tonemap: UniformBuffer::new(device, "tonemap uniforms"),
        }
    }

    /// Write the values that stay fixed for the whole session
    pub fn write_constants(
        &self,
        queue: &wgpu::Queue,
        layout: &FramebufferLayout,
        params: &SimParams,
        config: &PipelineConfig,
    ) {
        let interaction = &self.interaction;
        interaction.set(queue, InteractionUniform::TimeStep, UniformValue::Float(params.dt));
        interaction.set(queue, InteractionUniform::Gravity, UniformValue::Float(params.gravity));
        interaction.set(queue, InteractionUniform::Damping, UniformValue::Float(params.damping));
        self.integration
            .set(queue, IntegrationUniform::TimeStep, UniformValue::Float(params.dt));

        self.hdr.set(
            queue,
            HdrUniform::SpriteSize,
            UniformValue::Vec2(layout.sprite_size(config.flare_size)),
        );

        for direction in BlurDirection::ALL {
            if let Some(blur) = self.blur.get(direction.index()) {
                blur.set(queue, BlurUniform::Offset, UniformValue::Vec2(layout.blur_offset()));
                blur.set(
                    queue,
                    BlurUniform::Direction,
                    UniformValue::Vec2(Vec2::from_array(direction.axis())),
                );
            }
        }

        self.tonemap
            .set(queue, TonemapUniform::Lod, UniformValue::Float(layout.lod() as f32));
        self.tonemap
            .set(queue, TonemapUniform::Crop, UniformValue::Vec4(layout.crop()));
    }

    /// Particle count for both kernels, written before every physics step
    pub fn write_particle_count(&self, queue: &wgpu::Queue, particle_count: u32) {
        self.interaction.set(
            queue,
            InteractionUniform::ParticleCount,
            UniformValue::UInt(particle_count),
        );
        self.integration.set(
            queue,
            IntegrationUniform::ParticleCount,
            UniformValue::UInt(particle_count),
        );
    }
}

/// The linked programs
pub struct Programs {
    /// Accumulates accelerations
    pub interaction: wgpu::ComputePipeline,
    /// Advances positions
    pub integration: wgpu::ComputePipeline,
    /// HDR sprite splat
    pub hdr: wgpu::RenderPipeline,
    /// Composite to the screen
    pub tonemap: wgpu::RenderPipeline,
    /// One separable blur pass
    pub blur: wgpu::RenderPipeline,
    /// Scene luminance into mip 0
    pub luminance: wgpu::RenderPipeline,
    /// Luminance mip chain generation
    pub downsample: wgpu::RenderPipeline,
}

/// Pre-built bind groups for every pass of the fixed topology
pub struct BindGroups {
    /// Interaction uniforms
    pub interaction: wgpu::BindGroup,
    /// Integration uniforms
    pub integration: wgpu::BindGroup,
    /// HDR uniforms
    pub hdr: wgpu::BindGroup,
    /// Blur uniforms, by direction
    pub blur: [wgpu::BindGroup; 2],
    /// Tonemap uniforms
    pub tonemap: wgpu::BindGroup,
    /// Flare sprite at texture unit 0
    pub flare: wgpu::BindGroup,
    /// Scene, blur a and blur b at texture unit 0, by attachment index
    pub blur_sources: [wgpu::BindGroup; 3],
    /// Scene at texture unit 0
    pub luminance_source: wgpu::BindGroup,
    /// Luminance mip `level - 1` at texture unit 0, for `level` in `1..=lod`
    pub downsample_sources: Vec<wgpu::BindGroup>,
    /// Scene, bloom and luminance at texture units 0, 1 and 2
    pub tonemap_sources: wgpu::BindGroup,
}

impl BindGroups {
    /// Blur uniforms for `direction`
    #[inline]
    #[must_use]
    pub const fn blur_uniforms(&self, direction: BlurDirection) -> &wgpu::BindGroup {
        let [horizontal, vertical] = &self.blur;
        match direction {
            BlurDirection::Horizontal => horizontal,
            BlurDirection::Vertical => vertical,
        }
    }

    /// `attachment` as the input of a blur pass. The luminance target never feeds the blur.
    #[inline]
    #[must_use]
    pub const fn blur_source(&self, attachment: Attachment) -> Option<&wgpu::BindGroup> {
        let [scene, blur_a, blur_b] = &self.blur_sources;
        match attachment {
            Attachment::Scene => Some(scene),
            Attachment::BlurA => Some(blur_a),
            Attachment::BlurB => Some(blur_b),
            Attachment::Luminance => None,
        }
    }
}

/// Everything the pipeline owns on the GPU
pub struct ResourceBundle {
    /// Target sizes
    pub layout: FramebufferLayout,
    /// Offscreen targets
    pub targets: RenderTargets,
    /// Flare sprite
    pub flare: wgpu::Texture,
    /// Full screen triangle, `(-2,-1) (2,-1) (0,4)`
    pub deferred_vertices: wgpu::Buffer,
    /// Linked pipelines
    pub programs: Programs,
    /// Uniform buffers
    pub uniforms: Uniforms,
    /// Bind groups of every pass
    pub bind_groups: BindGroups,
    /// Layout the particle bind group is built against
    pub storage_layout: wgpu::BindGroupLayout,
    /// Present once particles have been loaded
    pub particles: Option<ParticleBuffers>,
}

#[allow(clippy::indexing_slicing)]
#[cfg(test)]
mod test {
    use super::*;

    fn layout(width: u32, height: u32) -> FramebufferLayout {
        FramebufferLayout::new(width, height, &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn attachments_for_800_by_600() {
        let layout = layout(800, 600);
        assert_eq!(layout.size(Attachment::Scene), Extent::new(900, 700));
        assert_eq!(layout.size(Attachment::BlurA), Extent::new(450, 350));
        assert_eq!(layout.size(Attachment::BlurB), Extent::new(450, 350));
        assert_eq!(layout.size(Attachment::Luminance), Extent::new(450, 350));
        assert_eq!(layout.lod(), 8);
        assert_eq!(layout.mip_level_count(Attachment::Luminance), 9);
        assert_eq!(layout.mip_level_count(Attachment::Scene), 1);
    }

    #[test]
    fn sizing_law_holds_for_many_windows() {
        for width in (1..2000).step_by(37) {
            for height in (1..1500).step_by(41) {
                let layout = layout(width, height);
                let (base_width, base_height) = (width + 100, height + 100);
                assert_eq!(layout.padded(), Extent::new(base_width, base_height));
                assert_eq!(
                    layout.size(Attachment::BlurA),
                    Extent::new(base_width / 2, base_height / 2)
                );
                assert_eq!(
                    layout.size(Attachment::Luminance),
                    Extent::new(base_width / 2, base_height / 2)
                );
                let expected = f64::from(base_width.max(base_height) / 2).log2().floor();
                assert_eq!(f64::from(layout.lod()), expected, "{width}x{height}");
            }
        }
    }

    #[test]
    fn deepest_luminance_mip_is_at_least_a_pixel() {
        for (width, height) in [(1, 1), (640, 480), (1920, 1080), (4096, 16)] {
            let layout = layout(width, height);
            let deepest = layout.size(Attachment::Luminance).mip(layout.lod());
            assert!(deepest.width >= 1 && deepest.height >= 1);
            assert!(deepest.width <= 2 && deepest.height <= 2, "{deepest:?}");
        }
    }

    #[test]
    fn viewports_follow_the_pass_targets() {
        let layout = layout(800, 600);
        assert_eq!(
            layout.viewport(Resource::base(Attachment::Scene)),
            Some(Extent::new(900, 700))
        );
        assert_eq!(
            layout.viewport(Resource::base(Attachment::BlurB)),
            Some(Extent::new(450, 350))
        );
        assert_eq!(
            layout.viewport(Resource::Attachment {
                attachment: Attachment::Luminance,
                level: 3
            }),
            Some(Extent::new(56, 43))
        );
        assert_eq!(layout.viewport(Resource::Screen), Some(Extent::new(800, 600)));
        assert_eq!(layout.viewport(Resource::Positions), None);
    }

    #[test]
    fn blur_downscale_of_one_keeps_full_size() {
        let config = PipelineConfig {
            blur_downscale: 1,
            ..PipelineConfig::default()
        };
        let layout = FramebufferLayout::new(320, 240, &config).unwrap();
        assert_eq!(layout.size(Attachment::BlurA), layout.padded());
    }

    #[test]
    fn bad_dimensions_are_rejected() {
        assert!(matches!(
            FramebufferLayout::new(0, 600, &PipelineConfig::default()),
            Err(PipelineError::InvalidDimensions {
                width: 0,
                height: 600
            })
        ));
        let config = PipelineConfig {
            blur_downscale: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            FramebufferLayout::new(800, 600, &config),
            Err(PipelineError::InvalidDownscale)
        ));
    }

    #[test]
    fn windows_too_big_to_pad_are_rejected() {
        assert!(matches!(
            FramebufferLayout::new(u32::MAX - 10, 600, &PipelineConfig::default()),
            Err(PipelineError::InvalidDimensions { height: 600, .. })
        ));
        let config = PipelineConfig {
            margin: u32::MAX / 2 + 1,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            FramebufferLayout::new(1, 1, &config),
            Err(PipelineError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn unbuildable_configs_are_rejected() {
        let no_flare = PipelineConfig {
            flare_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            FramebufferLayout::new(800, 600, &no_flare),
            Err(PipelineError::InvalidFlareSize)
        ));

        let endless_blur = PipelineConfig {
            blur_iterations: u32::MAX,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            FramebufferLayout::new(800, 600, &endless_blur),
            Err(PipelineError::TooManyBlurIterations {
                requested: u32::MAX,
                ..
            })
        ));
    }

    #[test]
    fn huge_windows_have_finite_uniform_constants() {
        let layout = layout(1 << 31, 600);
        assert!(layout.sprite_size(16).is_finite());
        assert!(layout.blur_offset().is_finite());
        assert!(layout.crop().is_finite());
    }

    #[test]
    fn targets_over_the_device_limit_are_rejected() {
        let limits = wgpu::Limits::downlevel_defaults();
        let max = limits.max_texture_dimension_2d;
        layout(800, 600).check_limits(&limits, 16).unwrap();

        // The margin pushes the scene target past the limit
        assert!(matches!(
            layout(max, 600).check_limits(&limits, 16),
            Err(PipelineError::TextureTooLarge {
                texture: "scene",
                ..
            })
        ));
        assert!(matches!(
            layout(800, 600).check_limits(&limits, max + 1),
            Err(PipelineError::TextureTooLarge {
                texture: "flare",
                ..
            })
        ));
    }

    #[test]
    fn uniform_constants_for_800_by_600() {
        let layout = layout(800, 600);
        assert_eq!(layout.sprite_size(16), Vec2::new(0.01, 16.0 / 1200.0));
        assert_eq!(layout.blur_offset(), Vec2::new(2.0 / 800.0, 2.0 / 600.0));
        assert_eq!(
            layout.crop(),
            Vec4::new(800.0 / 900.0, 600.0 / 700.0, 50.0 / 900.0, 50.0 / 700.0)
        );
    }

    #[test]
    fn flare_is_symmetric() {
        let size = 16;
        let pixels = flare_pixels(size);
        assert_eq!(pixels.len(), 256);
        let at = |i: u32, j: u32| pixels[(i * size + j) as usize];
        for i in 0..size {
            for j in 0..size {
                let value = at(i, j);
                assert_eq!(value.to_bits(), at(size - 1 - i, j).to_bits());
                assert_eq!(value.to_bits(), at(i, size - 1 - j).to_bits());
                assert_eq!(value.to_bits(), at(j, i).to_bits());
            }
        }
    }

    #[test]
    fn flare_falls_off_from_the_centre() {
        let size = 16_u32;
        let centre = (size as f32 - 1.0) / 2.0;
        let mut by_distance: Vec<(f32, f32)> = flare_pixels(size)
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let i = (index as u32 / size) as f32 - centre;
                let j = (index as u32 % size) as f32 - centre;
                (i * i + j * j, value)
            })
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

        for pair in by_distance.windows(2) {
            let ((near_distance, near), (far_distance, far)) = (pair[0], pair[1]);
            if far_distance > near_distance {
                assert!(near > far, "{near} at {near_distance} vs {far} at {far_distance}");
            } else {
                assert_eq!(near.to_bits(), far.to_bits());
            }
        }
        assert!(by_distance.iter().all(|&(_, value)| value > 0.0 && value <= 1.0));
    }

    #[test]
    fn flare_quantises_to_bytes() {
        assert_eq!(flare_texels(&[0.0, 1.0, 0.5, 2.0]), vec![0, 255, 128, 255]);
    }
}
