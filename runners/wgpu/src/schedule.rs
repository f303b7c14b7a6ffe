//! The ordered list of GPU work for one physics step or one frame.
//!
//! A schedule is plain data. It is built, checked for read-after-write hazards on the particle
//! buffers and for render targets that would sample themselves, and only then encoded. Keeping
//! it separate from encoding means the pass order can be tested without a GPU.

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::resources::Attachment;

/// Makes earlier compute writes to the particle buffers visible to a later stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Barrier {
    /// Before a compute kernel reads or writes what a previous kernel wrote
    ShaderStorage,
    /// Before the particle buffers are fetched as vertex attributes
    VertexAttribArray,
}

/// The two physics kernels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Kernel {
    /// Accumulates gravitational acceleration into the velocities
    Interaction,
    /// Moves the positions along the velocities
    Integration,
}

/// Axis of one blur pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum BlurDirection {
    /// `(1, 0)`
    Horizontal,
    /// `(0, 1)`
    Vertical,
}

impl BlurDirection {
    /// Both directions, in the order they run
    pub const ALL: [Self; 2] = [Self::Horizontal, Self::Vertical];

    /// Position in [`BlurDirection::ALL`]
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Horizontal => 0,
            Self::Vertical => 1,
        }
    }

    /// Unit vector along the axis
    #[inline]
    #[must_use]
    pub const fn axis(self) -> [f32; 2] {
        match self {
            Self::Horizontal => [1.0, 0.0],
            Self::Vertical => [0.0, 1.0],
        }
    }
}

/// One compute dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_structs)]
pub struct Dispatch {
    /// Kernel to run
    pub kernel: Kernel,
    /// Workgroups along x
    pub workgroups: u32,
}

/// One entry of a schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Pass {
    /// A memory barrier
    Barrier(Barrier),
    /// A compute dispatch over the particle buffers
    Dispatch(Dispatch),
    /// Additive point splat of the particles into the scene target
    Splat {
        /// Number of particles drawn. Zero records the pass (it still clears) without a draw.
        instances: u32,
    },
    /// One separable blur pass
    Blur {
        /// Axis of the blur
        direction: BlurDirection,
        /// Attachment sampled
        source: Attachment,
        /// Attachment drawn into
        destination: Attachment,
    },
    /// Luminance of the scene into mip 0 of the luminance target
    Luminance,
    /// Box filter of luminance mip `level - 1` into mip `level`
    Downsample {
        /// Mip level written, at least 1
        level: u32,
    },
    /// Composite of scene, bloom and exposure onto the screen
    Tonemap {
        /// Attachment holding the finished blur
        bloom: Attachment,
        /// Luminance mip read as the scene average
        lod: u32,
    },
}

/// Something a pass reads or writes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Resource {
    /// Particle position buffer
    Positions,
    /// Particle velocity buffer
    Velocities,
    /// Flare sprite texture
    Flare,
    /// One mip level of an offscreen target
    Attachment {
        /// Which target
        attachment: Attachment,
        /// Which mip
        level: u32,
    },
    /// The caller's target
    Screen,
}

impl Resource {
    /// Mip 0 of `attachment`
    #[inline]
    #[must_use]
    pub const fn base(attachment: Attachment) -> Self {
        Self::Attachment {
            attachment,
            level: 0,
        }
    }
}

/// The pipeline stage an access happens in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Stage {
    /// Compute kernel
    Compute,
    /// Vertex fetch
    Vertex,
    /// Fragment sampling or colour output
    Fragment,
}

impl Stage {
    /// The barrier that makes compute writes visible to this stage
    #[inline]
    #[must_use]
    pub const fn barrier(self) -> Option<Barrier> {
        match self {
            Self::Compute => Some(Barrier::ShaderStorage),
            Self::Vertex => Some(Barrier::VertexAttribArray),
            Self::Fragment => None,
        }
    }
}

/// A single read or write by a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_structs)]
pub struct Access {
    /// What is touched
    pub resource: Resource,
    /// Where
    pub stage: Stage,
    /// Whether it is written
    pub write: bool,
}

impl Access {
    const fn read(resource: Resource, stage: Stage) -> Self {
        Self {
            resource,
            stage,
            write: false,
        }
    }

    const fn write(resource: Resource, stage: Stage) -> Self {
        Self {
            resource,
            stage,
            write: true,
        }
    }
}

impl Pass {
    /// Short name used for GPU debug labels and errors
    #[inline]
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match *self {
            Self::Barrier(Barrier::ShaderStorage) => "shader storage barrier",
            Self::Barrier(Barrier::VertexAttribArray) => "vertex attribute barrier",
            Self::Dispatch(Dispatch {
                kernel: Kernel::Interaction,
                ..
            }) => "interaction",
            Self::Dispatch(Dispatch {
                kernel: Kernel::Integration,
                ..
            }) => "integration",
            Self::Splat { .. } => "hdr",
            Self::Blur {
                direction: BlurDirection::Horizontal,
                ..
            } => "horizontal blur",
            Self::Blur {
                direction: BlurDirection::Vertical,
                ..
            } => "vertical blur",
            Self::Luminance => "luminance",
            Self::Downsample { .. } => "luminance downsample",
            Self::Tonemap { .. } => "tonemap",
        }
    }

    /// Everything the pass reads and writes
    #[must_use]
    pub fn accesses(&self) -> Vec<Access> {
        use Resource::{Positions, Velocities};

        match *self {
            Self::Barrier(_) => Vec::new(),
            Self::Dispatch(Dispatch {
                kernel: Kernel::Interaction,
                ..
            }) => vec![
                Access::read(Positions, Stage::Compute),
                Access::read(Velocities, Stage::Compute),
                Access::write(Velocities, Stage::Compute),
            ],
            Self::Dispatch(Dispatch {
                kernel: Kernel::Integration,
                ..
            }) => vec![
                Access::read(Positions, Stage::Compute),
                Access::read(Velocities, Stage::Compute),
                Access::write(Positions, Stage::Compute),
            ],
            Self::Splat { .. } => vec![
                Access::read(Positions, Stage::Vertex),
                Access::read(Velocities, Stage::Vertex),
                Access::read(Resource::Flare, Stage::Fragment),
                Access::write(Resource::base(Attachment::Scene), Stage::Fragment),
            ],
            Self::Blur {
                source,
                destination,
                ..
            } => vec![
                Access::read(Resource::base(source), Stage::Fragment),
                Access::write(Resource::base(destination), Stage::Fragment),
            ],
            Self::Luminance => vec![
                Access::read(Resource::base(Attachment::Scene), Stage::Fragment),
                Access::write(Resource::base(Attachment::Luminance), Stage::Fragment),
            ],
            Self::Downsample { level } => vec![
                Access::read(
                    Resource::Attachment {
                        attachment: Attachment::Luminance,
                        level: level.saturating_sub(1),
                    },
                    Stage::Fragment,
                ),
                Access::write(
                    Resource::Attachment {
                        attachment: Attachment::Luminance,
                        level,
                    },
                    Stage::Fragment,
                ),
            ],
            Self::Tonemap { bloom, lod } => vec![
                Access::read(Resource::base(Attachment::Scene), Stage::Fragment),
                Access::read(Resource::base(bloom), Stage::Fragment),
                Access::read(
                    Resource::Attachment {
                        attachment: Attachment::Luminance,
                        level: lod,
                    },
                    Stage::Fragment,
                ),
                Access::write(Resource::Screen, Stage::Fragment),
            ],
        }
    }

    /// Colour attachment of a render pass. `None` for barriers and dispatches.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> Option<Resource> {
        match *self {
            Self::Barrier(_) | Self::Dispatch(_) => None,
            Self::Splat { .. } => Some(Resource::base(Attachment::Scene)),
            Self::Blur { destination, .. } => Some(Resource::base(destination)),
            Self::Luminance => Some(Resource::base(Attachment::Luminance)),
            Self::Downsample { level } => Some(Resource::Attachment {
                attachment: Attachment::Luminance,
                level,
            }),
            Self::Tonemap { .. } => Some(Resource::Screen),
        }
    }
}

/// The blur's double buffering. Iteration `i` of the combined horizontal then vertical run
/// writes `TARGETS[i & 1]` and reads whatever iteration `i - 1` wrote, the first iteration
/// reading the unblurred scene.
#[derive(Clone, Copy, Debug)]
#[allow(clippy::exhaustive_structs)]
pub struct PingPong;

impl PingPong {
    /// The two attachments the blur bounces between
    pub const TARGETS: [Attachment; 2] = [Attachment::BlurA, Attachment::BlurB];

    /// Attachment written by `iteration`
    #[inline]
    #[must_use]
    pub const fn destination(iteration: u32) -> Attachment {
        Self::TARGETS[(iteration & 1) as usize]
    }

    /// Attachment read by `iteration`
    #[inline]
    #[must_use]
    pub const fn source(iteration: u32) -> Attachment {
        if iteration == 0 {
            Attachment::Scene
        } else {
            Self::TARGETS[(!iteration & 1) as usize]
        }
    }

    /// Attachment holding the result after `total` iterations
    #[inline]
    #[must_use]
    pub const fn result(total: u32) -> Attachment {
        if total == 0 {
            Attachment::Scene
        } else {
            Self::destination(total - 1)
        }
    }
}

/// A pass schedule that would race on the GPU
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Hazard {
    /// A particle buffer written by a kernel is touched again without the barrier that makes the
    /// write visible.
    #[error("Pass {pass} ({label}) touches {resource:?} in the {stage:?} stage without a {needed:?} barrier since it was last written")]
    Unsynchronised {
        /// Index of the offending pass
        pass: usize,
        /// Its label
        label: &'static str,
        /// The buffer
        resource: Resource,
        /// Stage of the access
        stage: Stage,
        /// The barrier that was missing
        needed: Barrier,
    },

    /// A render pass samples its own colour attachment.
    #[error("Pass {pass} ({label}) reads and writes {resource:?}")]
    FeedbackLoop {
        /// Index of the offending pass
        pass: usize,
        /// Its label
        label: &'static str,
        /// The attachment
        resource: Resource,
    },
}

/// A run of work that encodes into one wgpu pass
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Segment {
    /// Consecutive dispatches with no barrier between them share one compute pass
    Compute(Vec<Dispatch>),
    /// Every draw gets its own render pass
    Render(Pass),
}

/// Ordered GPU work
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    /// The passes, in submission order
    passes: Vec<Pass>,
}

impl Schedule {
    /// Wrap an arbitrary pass list. Nothing is checked until [`Schedule::validate`].
    #[inline]
    #[must_use]
    pub const fn new(passes: Vec<Pass>) -> Self {
        Self { passes }
    }

    /// One physics step: barrier, interaction, barrier, integration.
    #[inline]
    #[must_use]
    pub fn physics_step(particle_count: u32) -> Self {
        let workgroups = PipelineConfig::workgroups(particle_count);
        Self::new(vec![
            Pass::Barrier(Barrier::ShaderStorage),
            Pass::Dispatch(Dispatch {
                kernel: Kernel::Interaction,
                workgroups,
            }),
            Pass::Barrier(Barrier::ShaderStorage),
            Pass::Dispatch(Dispatch {
                kernel: Kernel::Integration,
                workgroups,
            }),
        ])
    }

    /// One frame: HDR splat, blur ping-pong, luminance chain, tonemap. `blur_iterations` is
    /// capped at [`PipelineConfig::MAX_BLUR_ITERATIONS`].
    #[must_use]
    pub fn frame(particle_count: u32, blur_iterations: u32, lod: u32) -> Self {
        let blur_iterations = blur_iterations.min(PipelineConfig::MAX_BLUR_ITERATIONS);
        let total = blur_iterations * 2;
        let mut passes = Vec::with_capacity(total as usize + lod as usize + 4);

        passes.push(Pass::Barrier(Barrier::VertexAttribArray));
        passes.push(Pass::Splat {
            instances: particle_count,
        });

        for direction in BlurDirection::ALL {
            let start = blur_iterations * direction.index() as u32;
            for iteration in start..start + blur_iterations {
                passes.push(Pass::Blur {
                    direction,
                    source: PingPong::source(iteration),
                    destination: PingPong::destination(iteration),
                });
            }
        }

        passes.push(Pass::Luminance);
        passes.extend((1..=lod).map(|level| Pass::Downsample { level }));
        passes.push(Pass::Tonemap {
            bloom: PingPong::result(total),
            lod,
        });

        Self::new(passes)
    }

    /// The passes in order
    #[inline]
    #[must_use]
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Check the schedule for races before anything is encoded. Both particle buffers are
    /// treated as freshly written by a kernel when the schedule starts, since the previous
    /// submission may have been a physics step.
    ///
    /// # Errors
    /// The first [`Hazard`] found.
    pub fn validate(&self) -> Result<(), Hazard> {
        let mut unsynced_compute = vec![Resource::Positions, Resource::Velocities];
        let mut unsynced_vertex = unsynced_compute.clone();

        for (index, pass) in self.passes.iter().enumerate() {
            match *pass {
                Pass::Barrier(Barrier::ShaderStorage) => unsynced_compute.clear(),
                Pass::Barrier(Barrier::VertexAttribArray) => unsynced_vertex.clear(),
                _ => {
                    let accesses = pass.accesses();
                    for access in &accesses {
                        let unsynced = match access.stage {
                            Stage::Compute => &unsynced_compute,
                            Stage::Vertex => &unsynced_vertex,
                            Stage::Fragment => continue,
                        };
                        if let Some(needed) = access.stage.barrier() {
                            if unsynced.contains(&access.resource) {
                                return Err(Hazard::Unsynchronised {
                                    pass: index,
                                    label: pass.label(),
                                    resource: access.resource,
                                    stage: access.stage,
                                    needed,
                                });
                            }
                        }
                    }

                    if let Some(target) = pass.target() {
                        if accesses
                            .iter()
                            .any(|access| !access.write && access.resource == target)
                        {
                            return Err(Hazard::FeedbackLoop {
                                pass: index,
                                label: pass.label(),
                                resource: target,
                            });
                        }
                    }

                    for access in accesses
                        .iter()
                        .filter(|access| access.write && access.stage == Stage::Compute)
                    {
                        for unsynced in [&mut unsynced_compute, &mut unsynced_vertex] {
                            if !unsynced.contains(&access.resource) {
                                unsynced.push(access.resource);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Group the passes the way they are encoded. Barriers end the open compute pass and
    /// otherwise encode to nothing, wgpu synchronises between passes itself.
    #[must_use]
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut dispatches = Vec::new();

        for pass in &self.passes {
            match *pass {
                Pass::Dispatch(dispatch) => dispatches.push(dispatch),
                Pass::Barrier(_) => {
                    if !dispatches.is_empty() {
                        segments.push(Segment::Compute(core::mem::take(&mut dispatches)));
                    }
                }
                _ => {
                    if !dispatches.is_empty() {
                        segments.push(Segment::Compute(core::mem::take(&mut dispatches)));
                    }
                    segments.push(Segment::Render(*pass));
                }
            }
        }
        if !dispatches.is_empty() {
            segments.push(Segment::Compute(dispatches));
        }
        segments
    }
}

#[allow(clippy::indexing_slicing)]
#[cfg(test)]
mod test {
    use super::*;

    fn count(schedule: &Schedule, predicate: impl Fn(&Pass) -> bool) -> usize {
        schedule.passes().iter().filter(|pass| predicate(pass)).count()
    }

    #[test]
    fn ping_pong_follows_the_index_law() {
        for iteration in 0..200 {
            let destination = PingPong::destination(iteration);
            let source = PingPong::source(iteration);
            assert_eq!(destination, PingPong::TARGETS[(iteration % 2) as usize]);
            if iteration == 0 {
                assert_eq!(source, Attachment::Scene);
            } else {
                assert_eq!(source, PingPong::TARGETS[((iteration + 1) % 2) as usize]);
                assert_eq!(source, PingPong::destination(iteration - 1));
            }
            assert_ne!(source, destination, "iteration {iteration} aliases");
        }
    }

    #[test]
    fn blur_ends_in_the_second_blur_target() {
        assert_eq!(PingPong::result(200), Attachment::BlurB);
        assert_eq!(PingPong::result(1), Attachment::BlurA);
        assert_eq!(PingPong::result(0), Attachment::Scene);
    }

    #[test]
    fn physics_step_is_two_barriers_and_two_dispatches() {
        for particles in [0, 1, 4, 255, 256, 257, 16_384, 1_000_000] {
            let schedule = Schedule::physics_step(particles);
            assert_eq!(count(&schedule, |pass| matches!(pass, Pass::Barrier(_))), 2);
            assert_eq!(count(&schedule, |pass| matches!(pass, Pass::Dispatch(_))), 2);
            assert!(matches!(
                schedule.passes()[0],
                Pass::Barrier(Barrier::ShaderStorage)
            ));
            assert!(matches!(
                schedule.passes()[2],
                Pass::Barrier(Barrier::ShaderStorage)
            ));
            assert_eq!(
                schedule.passes()[3],
                Pass::Dispatch(Dispatch {
                    kernel: Kernel::Integration,
                    workgroups: PipelineConfig::workgroups(particles),
                })
            );
            schedule.validate().unwrap();
        }
    }

    #[test]
    fn physics_dispatches_encode_into_separate_compute_passes() {
        let segments = Schedule::physics_step(1024).segments();
        assert_eq!(segments.len(), 2);
        assert!(segments
            .iter()
            .all(|segment| matches!(segment, Segment::Compute(dispatches) if dispatches.len() == 1)));
    }

    #[test]
    fn missing_storage_barrier_is_a_hazard() {
        let mut passes = Schedule::physics_step(1024).passes().to_vec();
        passes.remove(2);
        let hazard = Schedule::new(passes).validate().unwrap_err();
        assert_eq!(
            hazard,
            Hazard::Unsynchronised {
                pass: 2,
                label: "integration",
                resource: Resource::Velocities,
                stage: Stage::Compute,
                needed: Barrier::ShaderStorage,
            }
        );
    }

    #[test]
    fn leading_storage_barrier_is_required() {
        let mut passes = Schedule::physics_step(4).passes().to_vec();
        passes.remove(0);
        assert!(matches!(
            Schedule::new(passes).validate(),
            Err(Hazard::Unsynchronised { pass: 0, .. })
        ));
    }

    #[test]
    fn splat_after_physics_needs_a_vertex_barrier() {
        let mut passes = Schedule::physics_step(4).passes().to_vec();
        passes.push(Pass::Splat { instances: 4 });
        let hazard = Schedule::new(passes.clone()).validate().unwrap_err();
        assert!(matches!(
            hazard,
            Hazard::Unsynchronised {
                stage: Stage::Vertex,
                needed: Barrier::VertexAttribArray,
                ..
            }
        ));

        passes.insert(4, Pass::Barrier(Barrier::VertexAttribArray));
        Schedule::new(passes).validate().unwrap();
    }

    #[test]
    fn reordered_barrier_is_a_hazard() {
        let mut passes = Schedule::frame(4, 1, 1).passes().to_vec();
        passes.swap(0, 1);
        assert!(Schedule::new(passes).validate().is_err());
    }

    #[test]
    fn blur_reading_its_own_target_is_a_hazard() {
        let schedule = Schedule::new(vec![Pass::Blur {
            direction: BlurDirection::Horizontal,
            source: Attachment::BlurA,
            destination: Attachment::BlurA,
        }]);
        assert!(matches!(
            schedule.validate(),
            Err(Hazard::FeedbackLoop { pass: 0, .. })
        ));
    }

    #[test]
    fn frame_runs_the_stages_in_order() {
        let lod = 9;
        let schedule = Schedule::frame(16, 100, lod);
        schedule.validate().unwrap();
        let passes = schedule.passes();

        assert_eq!(passes.len(), 2 + 200 + 1 + lod as usize + 1);
        assert_eq!(passes[0], Pass::Barrier(Barrier::VertexAttribArray));
        assert_eq!(passes[1], Pass::Splat { instances: 16 });
        for (iteration, pass) in passes[2..202].iter().enumerate() {
            let Pass::Blur {
                direction,
                source,
                destination,
            } = *pass
            else {
                panic!("expected a blur at {iteration}, got {pass:?}");
            };
            let expected = if iteration < 100 {
                BlurDirection::Horizontal
            } else {
                BlurDirection::Vertical
            };
            assert_eq!(direction, expected);
            assert_eq!(source, PingPong::source(iteration as u32));
            assert_eq!(destination, PingPong::destination(iteration as u32));
        }
        assert_eq!(passes[202], Pass::Luminance);
        for level in 1..=lod {
            assert_eq!(passes[202 + level as usize], Pass::Downsample { level });
        }
        assert_eq!(
            passes.last(),
            Some(&Pass::Tonemap {
                bloom: Attachment::BlurB,
                lod
            })
        );
    }

    #[test]
    fn every_frame_pass_is_its_own_render_pass() {
        let schedule = Schedule::frame(0, 100, 3);
        let segments = schedule.segments();
        assert_eq!(segments.len(), schedule.passes().len() - 1);
        assert!(segments
            .iter()
            .all(|segment| matches!(segment, Segment::Render(_))));
    }

    #[test]
    fn empty_frame_still_clears_and_composites() {
        let schedule = Schedule::frame(0, 100, 4);
        schedule.validate().unwrap();
        assert_eq!(schedule.passes()[1], Pass::Splat { instances: 0 });
        assert!(matches!(
            schedule.passes().last(),
            Some(Pass::Tonemap { .. })
        ));
    }

    #[test]
    fn blur_iterations_are_capped() {
        let schedule = Schedule::frame(0, u32::MAX, 1);
        let blurs = schedule
            .passes()
            .iter()
            .filter(|pass| matches!(pass, Pass::Blur { .. }))
            .count();
        assert_eq!(blurs, PipelineConfig::MAX_BLUR_ITERATIONS as usize * 2);
        schedule.validate().unwrap();
    }
}
