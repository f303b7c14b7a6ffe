//! Encoding of a checked schedule into wgpu passes.

use super::pipeline::Pipeline;
use crate::error::PipelineError;
use crate::resources::{Attachment, Extent, ParticleBuffers};
use crate::schedule::{Dispatch, Kernel, Pass, Resource, Schedule, Segment};

impl Pipeline {
    /// Record `schedule` into `encoder`. `screen` is the target of the tonemap pass.
    pub(super) fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        schedule: &Schedule,
        screen: Option<&wgpu::TextureView>,
    ) -> Result<(), PipelineError> {
        for segment in schedule.segments() {
            match segment {
                Segment::Compute(dispatches) => self.encode_compute(encoder, &dispatches)?,
                Segment::Render(pass) => self.encode_render(encoder, &pass, screen)?,
            }
        }
        Ok(())
    }

    fn encode_compute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        dispatches: &[Dispatch],
    ) -> Result<(), PipelineError> {
        let bundle = self.bundle();
        let particles = bundle.particles.as_ref().ok_or(PipelineError::NotLoaded)?;

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("physics"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &particles.bind_group, &[]);
        for dispatch in dispatches {
            let (pipeline, uniforms) = match dispatch.kernel {
                Kernel::Interaction => (
                    &bundle.programs.interaction,
                    &bundle.bind_groups.interaction,
                ),
                Kernel::Integration => (
                    &bundle.programs.integration,
                    &bundle.bind_groups.integration,
                ),
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, uniforms, &[]);
            if dispatch.workgroups > 0 {
                pass.dispatch_workgroups(dispatch.workgroups, 1, 1);
            }
        }
        Ok(())
    }

    fn encode_render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &Pass,
        screen: Option<&wgpu::TextureView>,
    ) -> Result<(), PipelineError> {
        let (Some(target), Some(draw)) = (pass.target(), self.draw(pass)?) else {
            return Ok(());
        };
        let bundle = self.bundle();
        let missing = |resource| PipelineError::MissingResource {
            pass: pass.label(),
            resource,
        };
        let view = match target {
            Resource::Attachment { attachment, level } => bundle
                .targets
                .get(attachment)
                .levels
                .get(level as usize)
                .ok_or_else(|| missing(target))?,
            Resource::Screen => screen.ok_or(PipelineError::MissingTarget)?,
            Resource::Positions | Resource::Velocities | Resource::Flare => {
                return Err(missing(target))
            }
        };
        let viewport = bundle.layout.viewport(target).ok_or_else(|| missing(target))?;

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(pass.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        set_viewport(&mut render_pass, viewport);
        render_pass.set_pipeline(draw.pipeline);
        for (index, bind_group) in (0_u32..).zip(&draw.bind_groups) {
            render_pass.set_bind_group(index, *bind_group, &[]);
        }
        match draw.geometry {
            Geometry::Sprites(Some(particles), instances) => {
                render_pass.set_vertex_buffer(0, particles.positions.slice(..));
                render_pass.set_vertex_buffer(1, particles.velocities.slice(..));
                render_pass.draw(0..6, 0..instances);
            }
            Geometry::Sprites(None, _) => {}
            Geometry::FullScreen => {
                render_pass.set_vertex_buffer(0, bundle.deferred_vertices.slice(..));
                render_pass.draw(0..3, 0..1);
            }
        }
        Ok(())
    }

    /// Pipeline, bind groups and geometry of a render pass, all looked up before the pass starts.
    /// `None` for passes that don't draw.
    fn draw(&self, pass: &Pass) -> Result<Option<Draw<'_>>, PipelineError> {
        let bundle = self.bundle();
        let programs = &bundle.programs;
        let bind_groups = &bundle.bind_groups;
        let missing = |resource| PipelineError::MissingResource {
            pass: pass.label(),
            resource,
        };

        let draw = match *pass {
            Pass::Splat { instances } => {
                let particles = if instances == 0 {
                    None
                } else {
                    Some(bundle.particles.as_ref().ok_or(PipelineError::NotLoaded)?)
                };
                Draw {
                    pipeline: &programs.hdr,
                    bind_groups: vec![&bind_groups.flare, &bind_groups.hdr],
                    geometry: Geometry::Sprites(particles, instances),
                }
            }
            Pass::Blur {
                direction, source, ..
            } => Draw {
                pipeline: &programs.blur,
                bind_groups: vec![
                    bind_groups
                        .blur_source(source)
                        .ok_or_else(|| missing(Resource::base(source)))?,
                    bind_groups.blur_uniforms(direction),
                ],
                geometry: Geometry::FullScreen,
            },
            Pass::Luminance => Draw {
                pipeline: &programs.luminance,
                bind_groups: vec![&bind_groups.luminance_source],
                geometry: Geometry::FullScreen,
            },
            Pass::Downsample { level } => {
                let previous = level.saturating_sub(1);
                let source = level
                    .checked_sub(1)
                    .and_then(|index| bind_groups.downsample_sources.get(index as usize))
                    .ok_or_else(|| {
                        missing(Resource::Attachment {
                            attachment: Attachment::Luminance,
                            level: previous,
                        })
                    })?;
                Draw {
                    pipeline: &programs.downsample,
                    bind_groups: vec![source],
                    geometry: Geometry::FullScreen,
                }
            }
            Pass::Tonemap { .. } => Draw {
                pipeline: &programs.tonemap,
                bind_groups: vec![&bind_groups.tonemap_sources, &bind_groups.tonemap],
                geometry: Geometry::FullScreen,
            },
            Pass::Barrier(_) | Pass::Dispatch(_) => return Ok(None),
        };
        Ok(Some(draw))
    }
}

/// What a render pass draws
enum Geometry<'a> {
    /// One sprite per particle, nothing when there are no particles
    Sprites(Option<&'a ParticleBuffers>, u32),
    /// The deferred triangle
    FullScreen,
}

/// Everything a render pass binds
struct Draw<'a> {
    pipeline: &'a wgpu::RenderPipeline,
    /// In group order
    bind_groups: Vec<&'a wgpu::BindGroup>,
    geometry: Geometry<'a>,
}

fn set_viewport(render_pass: &mut wgpu::RenderPass<'_>, viewport: Extent) {
    render_pass.set_viewport(
        0.0,
        0.0,
        viewport.width as f32,
        viewport.height as f32,
        0.0,
        1.0,
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{PipelineConfig, SimParams};
    use crate::headless::Headless;
    use crate::resources::FramebufferLayout;

    /// Every render pass of a frame has a viewport that matches the size of what it draws into
    #[test]
    fn frame_viewports_match_their_targets() {
        let layout = FramebufferLayout::new(800, 600, &PipelineConfig::default()).unwrap();
        let schedule = Schedule::frame(4, 100, layout.lod());
        for pass in schedule.passes() {
            let Some(target) = pass.target() else {
                continue;
            };
            let viewport = layout.viewport(target).unwrap();
            let expected = match *pass {
                Pass::Splat { .. } => Extent::new(900, 700),
                Pass::Blur { .. } | Pass::Luminance => Extent::new(450, 350),
                Pass::Downsample { level } => layout.size(Attachment::Luminance).mip(level),
                Pass::Tonemap { .. } => Extent::new(800, 600),
                Pass::Barrier(_) | Pass::Dispatch(_) => unreachable!(),
            };
            assert_eq!(viewport, expected, "{pass:?}");
        }
    }

    fn pipeline() -> Option<(Headless, Pipeline)> {
        let gpu = pollster::block_on(Headless::new(64, 64)).ok()?;
        let pipeline = Pipeline::init(
            &gpu.device,
            &gpu.queue,
            Headless::FORMAT,
            64,
            64,
            SimParams::default(),
        )
        .unwrap();
        Some((gpu, pipeline))
    }

    fn encode(gpu: &Headless, pipeline: &Pipeline, passes: Vec<Pass>) -> Result<(), PipelineError> {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        pipeline.encode(&mut encoder, &Schedule::new(passes), Some(&gpu.target_view))
    }

    #[test]
    fn passes_past_the_mip_chain_are_refused() {
        let Some((gpu, pipeline)) = pipeline() else {
            return;
        };
        let level = pipeline.layout().lod() + 1;
        assert!(matches!(
            encode(&gpu, &pipeline, vec![Pass::Downsample { level }]),
            Err(PipelineError::MissingResource {
                resource: Resource::Attachment {
                    attachment: Attachment::Luminance,
                    ..
                },
                ..
            })
        ));
    }

    #[test]
    fn luminance_never_feeds_the_blur() {
        let Some((gpu, pipeline)) = pipeline() else {
            return;
        };
        let blur = Pass::Blur {
            direction: crate::schedule::BlurDirection::Horizontal,
            source: Attachment::Luminance,
            destination: Attachment::BlurA,
        };
        assert!(matches!(
            encode(&gpu, &pipeline, vec![blur]),
            Err(PipelineError::MissingResource {
                pass: "horizontal blur",
                ..
            })
        ));
    }

    #[test]
    fn sprites_without_particles_are_refused() {
        let Some((gpu, pipeline)) = pipeline() else {
            return;
        };
        assert!(matches!(
            encode(&gpu, &pipeline, vec![Pass::Splat { instances: 1 }]),
            Err(PipelineError::NotLoaded)
        ));
        encode(&gpu, &pipeline, vec![Pass::Splat { instances: 0 }]).unwrap();
    }
}
