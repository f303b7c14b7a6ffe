//! Creation of every GPU object the pipeline owns.

use wgpu::util::DeviceExt as _;

use crate::config::{PipelineConfig, SimParams};
use crate::error::PipelineError;
use crate::resources::{
    flare_pixels, flare_texels, Attachment, BindGroups, FramebufferLayout, Programs,
    RenderTargets, ResourceBundle, Uniforms,
};
use crate::schedule::PingPong;
use crate::shader::{device_scope, Program, ProgramBuilder};

/// Position at vertex location 0, one per instance
const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x4];
/// Velocity at vertex location 1, one per instance
const VELOCITY_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x4];
/// Clip space corner of the full screen triangle
const DEFERRED_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

/// Byte stride of a `vec4<f32>` particle attribute
const PARTICLE_STRIDE: wgpu::BufferAddress = 16;

/// The full screen triangle. Overscans the clip volume so the visible quad is fully covered.
const DEFERRED_TRIANGLE: [[f32; 2]; 3] = [[-2.0, -1.0], [2.0, -1.0], [0.0, 4.0]];

/// Additive blending for the HDR splat
const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// What a render program needs beyond its shader module
struct RenderProgram<'b> {
    program: Program,
    bind_group_layouts: &'b [&'b wgpu::BindGroupLayout],
    vertex_buffers: &'b [wgpu::VertexBufferLayout<'b>],
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
}

/// Creates the GPU objects of a [`ResourceBundle`]
pub struct Builder<'a> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
}

impl<'a> Builder<'a> {
    /// Build on `device`, uploading through `queue`
    pub const fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Create every GPU object of the fixed topology and push the session constants.
    pub fn build(
        &self,
        layout: FramebufferLayout,
        output_format: wgpu::TextureFormat,
        params: &SimParams,
        config: &PipelineConfig,
    ) -> Result<ResourceBundle, PipelineError> {
        layout.check_limits(&self.device.limits(), config.flare_size)?;

        let storage_layout = self.storage_layout();
        let uniform_layout = self.uniform_layout();
        let single_texture_layout = self.texture_layout("single texture", 1);
        let tonemap_texture_layout = self.texture_layout("tonemap textures", 3);

        let particle_buffers = Self::particle_vertex_layouts();
        let deferred_buffers = [Self::deferred_vertex_layout()];

        let programs = Programs {
            interaction: self
                .compute_pipeline(Program::Interaction, &[&storage_layout, &uniform_layout])?,
            integration: self
                .compute_pipeline(Program::Integration, &[&storage_layout, &uniform_layout])?,
            hdr: self.render_pipeline(&RenderProgram {
                program: Program::Hdr,
                bind_group_layouts: &[&single_texture_layout, &uniform_layout],
                vertex_buffers: &particle_buffers,
                format: Attachment::Scene.format(),
                blend: Some(ADDITIVE),
            })?,
            tonemap: self.render_pipeline(&RenderProgram {
                program: Program::Tonemap,
                bind_group_layouts: &[&tonemap_texture_layout, &uniform_layout],
                vertex_buffers: &deferred_buffers,
                format: output_format,
                blend: None,
            })?,
            blur: self.render_pipeline(&RenderProgram {
                program: Program::Blur,
                bind_group_layouts: &[&single_texture_layout, &uniform_layout],
                vertex_buffers: &deferred_buffers,
                format: Attachment::BlurA.format(),
                blend: None,
            })?,
            luminance: self.render_pipeline(&RenderProgram {
                program: Program::Luminance,
                bind_group_layouts: &[&single_texture_layout],
                vertex_buffers: &deferred_buffers,
                format: Attachment::Luminance.format(),
                blend: None,
            })?,
            downsample: self.render_pipeline(&RenderProgram {
                program: Program::Downsample,
                bind_group_layouts: &[&single_texture_layout],
                vertex_buffers: &deferred_buffers,
                format: Attachment::Luminance.format(),
                blend: None,
            })?,
        };

        let targets = device_scope(self.device, "render targets", || {
            RenderTargets::new(self.device, &layout)
        })?;
        let (flare, flare_view) = device_scope(self.device, "flare", || {
            let flare = self.flare_texture(config.flare_size);
            let view = flare.create_view(&wgpu::TextureViewDescriptor::default());
            (flare, view)
        })?;
        let linear = self.sampler("linear clamp", wgpu::FilterMode::Nearest);
        let trilinear = self.sampler("trilinear clamp", wgpu::FilterMode::Linear);

        let uniforms = Uniforms::new(self.device);
        uniforms.write_constants(self.queue, &layout, params, config);

        let luminance = targets.get(Attachment::Luminance);
        let bloom = PingPong::result(config.blur_iterations.saturating_mul(2));
        let bind_groups = BindGroups {
            interaction: self.uniform_bind_group(
                "interaction",
                &uniform_layout,
                uniforms.interaction.buffer(),
            ),
            integration: self.uniform_bind_group(
                "integration",
                &uniform_layout,
                uniforms.integration.buffer(),
            ),
            hdr: self.uniform_bind_group("hdr", &uniform_layout, uniforms.hdr.buffer()),
            blur: uniforms
                .blur
                .each_ref()
                .map(|blur| self.uniform_bind_group("blur", &uniform_layout, blur.buffer())),
            tonemap: self.uniform_bind_group("tonemap", &uniform_layout, uniforms.tonemap.buffer()),
            flare: self.texture_bind_group("flare", &single_texture_layout, &[(&flare_view, &linear)]),
            blur_sources: [Attachment::Scene, Attachment::BlurA, Attachment::BlurB].map(
                |source| {
                    self.texture_bind_group(
                        source.label(),
                        &single_texture_layout,
                        &[(&targets.get(source).view, &linear)],
                    )
                },
            ),
            luminance_source: self.texture_bind_group(
                "luminance source",
                &single_texture_layout,
                &[(&targets.get(Attachment::Scene).view, &linear)],
            ),
            downsample_sources: luminance
                .levels
                .iter()
                .take(layout.lod() as usize)
                .map(|level| {
                    self.texture_bind_group(
                        "luminance mip",
                        &single_texture_layout,
                        &[(level, &linear)],
                    )
                })
                .collect(),
            tonemap_sources: self.texture_bind_group(
                "tonemap sources",
                &tonemap_texture_layout,
                &[
                    (&targets.get(Attachment::Scene).view, &linear),
                    (&targets.get(bloom).view, &linear),
                    (&luminance.view, &trilinear),
                ],
            ),
        };

        Ok(ResourceBundle {
            layout,
            targets,
            flare,
            deferred_vertices: self.deferred_vertices(),
            programs,
            uniforms,
            bind_groups,
            storage_layout,
            particles: None,
        })
    }

    /// Positions and velocities at storage bindings 0 and 1
    pub fn storage_layout(&self) -> wgpu::BindGroupLayout {
        let entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(PARTICLE_STRIDE),
            },
            count: None,
        };
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("particle storage"),
                entries: &[entry(0), entry(1)],
            })
    }

    /// A program's uniform buffer at binding 0
    pub fn uniform_layout(&self) -> wgpu::BindGroupLayout {
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniforms"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE
                        | wgpu::ShaderStages::VERTEX
                        | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
    }

    /// `units` texture units, unit `n` being a texture at binding `2n` and its sampler at `2n + 1`
    pub fn texture_layout(&self, label: &str, units: u32) -> wgpu::BindGroupLayout {
        let entries: Vec<_> = (0..units)
            .flat_map(|unit| {
                [
                    wgpu::BindGroupLayoutEntry {
                        binding: unit * 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: unit * 2 + 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ]
            })
            .collect();

        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            })
    }

    fn uniform_bind_group(
        &self,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    fn texture_bind_group(
        &self,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        units: &[(&wgpu::TextureView, &wgpu::Sampler)],
    ) -> wgpu::BindGroup {
        let mut entries = Vec::with_capacity(units.len() * 2);
        for (unit, &(view, sampler)) in (0_u32..).zip(units) {
            entries.push(wgpu::BindGroupEntry {
                binding: unit * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: unit * 2 + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        })
    }

    /// Clamp-to-edge bilinear sampler, `mipmap_filter` decides whether it blends between mips
    fn sampler(&self, label: &str, mipmap_filter: wgpu::FilterMode) -> wgpu::Sampler {
        self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter,
            ..Default::default()
        })
    }

    /// Flare sprite as an `R8Unorm` texture
    pub fn flare_texture(&self, size: u32) -> wgpu::Texture {
        let texels = flare_texels(&flare_pixels(size));
        self.device.create_texture_with_data(
            self.queue,
            &wgpu::TextureDescriptor {
                label: Some("flare"),
                size: wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &texels,
        )
    }

    fn deferred_vertices(&self) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("deferred triangle"),
                contents: bytemuck::cast_slice(&DEFERRED_TRIANGLE),
                usage: wgpu::BufferUsages::VERTEX,
            })
    }

    /// Positions in vertex buffer slot 0, velocities in slot 1, both advancing per instance
    pub fn particle_vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
        [
            wgpu::VertexBufferLayout {
                array_stride: PARTICLE_STRIDE,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &POSITION_ATTRIBUTES,
            },
            wgpu::VertexBufferLayout {
                array_stride: PARTICLE_STRIDE,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &VELOCITY_ATTRIBUTES,
            },
        ]
    }

    /// The full screen triangle, one `vec2` per vertex
    pub fn deferred_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: 8,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &DEFERRED_ATTRIBUTES,
        }
    }

    fn compute_pipeline(
        &self,
        program: Program,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
    ) -> Result<wgpu::ComputePipeline, PipelineError> {
        let linked = ProgramBuilder::new(self.device, program)
            .stages_of(program)
            .link()?;

        device_scope(self.device, program.label(), || {
            let layout = self
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(program.label()),
                    bind_group_layouts,
                    push_constant_ranges: &[],
                });
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(program.label()),
                    layout: Some(&layout),
                    module: &linked.module,
                    entry_point: Some(Program::COMPUTE_ENTRY),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        })
    }

    fn render_pipeline(
        &self,
        descriptor: &RenderProgram<'_>,
    ) -> Result<wgpu::RenderPipeline, PipelineError> {
        let program = descriptor.program;
        let linked = ProgramBuilder::new(self.device, program)
            .stages_of(program)
            .link()?;

        device_scope(self.device, program.label(), || {
            let layout = self
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(program.label()),
                    bind_group_layouts: descriptor.bind_group_layouts,
                    push_constant_ranges: &[],
                });
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(program.label()),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: &linked.module,
                        entry_point: Some(Program::VERTEX_ENTRY),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        buffers: descriptor.vertex_buffers,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &linked.module,
                        entry_point: Some(Program::FRAGMENT_ENTRY),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: descriptor.format,
                            blend: descriptor.blend,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
        })
    }
}
