//! Shader Program Builder.
//!
//! A program is put together from one WGSL file per stage. The stage files are concatenated
//! into a single module, so later stages can use the structs and helpers of earlier ones, then
//! parsed and validated with naga before the device ever sees them. That way a broken stage is
//! reported with its own file name and a readable compiler log, rather than as a device
//! validation error against an anonymous module.

use core::ops::Range;

use crate::error::PipelineError;

/// A WGSL stage source embedded in the crate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_structs)]
pub struct ShaderAsset {
    /// File name under `assets/shaders`
    pub name: &'static str,
    /// WGSL source
    pub source: &'static str,
}

macro_rules! shader_asset {
    ($name:literal) => {
        ShaderAsset {
            name: $name,
            source: include_str!(concat!("../../../assets/shaders/", $name)),
        }
    };
}

/// The stage sources shipped with the crate
pub mod assets {
    use super::ShaderAsset;

    /// Pairwise gravity kernel
    pub const INTERACTION: ShaderAsset = shader_asset!("interaction.comp.wgsl");
    /// Euler integration kernel
    pub const INTEGRATION: ShaderAsset = shader_asset!("integration.comp.wgsl");
    /// Particle transform and colour
    pub const MAIN_VERT: ShaderAsset = shader_asset!("main.vert.wgsl");
    /// Sprite expansion
    pub const MAIN_GEOM: ShaderAsset = shader_asset!("main.geom.wgsl");
    /// Flare modulation
    pub const MAIN_FRAG: ShaderAsset = shader_asset!("main.frag.wgsl");
    /// Full screen triangle
    pub const DEFERRED_VERT: ShaderAsset = shader_asset!("deferred.vert.wgsl");
    /// Bloom composite and tonemap
    pub const TONEMAP_FRAG: ShaderAsset = shader_asset!("tonemap.frag.wgsl");
    /// Separable Gaussian
    pub const BLUR_FRAG: ShaderAsset = shader_asset!("blur.frag.wgsl");
    /// Scene luminance
    pub const LUMINANCE_FRAG: ShaderAsset = shader_asset!("luminance.frag.wgsl");
    /// Luminance mip reduction
    pub const DOWNSAMPLE_FRAG: ShaderAsset = shader_asset!("downsample.frag.wgsl");
}

/// The kind of stage a source file provides
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StageKind {
    /// A compute kernel
    Compute,
    /// Per-vertex transform
    Vertex,
    /// Sprite expansion. Runs as part of the vertex stage.
    Geometry,
    /// Per-fragment shading
    Fragment,
}

/// Every program the pipeline builds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Program {
    /// Pairwise gravity
    Interaction,
    /// Position update
    Integration,
    /// Additive sprite splat into the scene target
    Hdr,
    /// Final composite
    Tonemap,
    /// One blur direction
    Blur,
    /// Scene luminance
    Luminance,
    /// One step down the luminance mip chain
    Downsample,
}

impl Program {
    /// Every program, in build order
    pub const ALL: [Self; 7] = [
        Self::Interaction,
        Self::Integration,
        Self::Hdr,
        Self::Tonemap,
        Self::Blur,
        Self::Luminance,
        Self::Downsample,
    ];

    /// Entry point of compute programs
    pub const COMPUTE_ENTRY: &'static str = "main";
    /// Entry point of the vertex stage of render programs
    pub const VERTEX_ENTRY: &'static str = "vs_main";
    /// Entry point of the fragment stage of render programs
    pub const FRAGMENT_ENTRY: &'static str = "fs_main";

    /// Debug label
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Interaction => "interaction",
            Self::Integration => "integration",
            Self::Hdr => "hdr",
            Self::Tonemap => "tonemap",
            Self::Blur => "blur",
            Self::Luminance => "luminance",
            Self::Downsample => "downsample",
        }
    }

    /// Stage sources, in the order they're composed
    #[inline]
    #[must_use]
    pub const fn stages(self) -> &'static [(StageKind, ShaderAsset)] {
        match self {
            Self::Interaction => &[(StageKind::Compute, assets::INTERACTION)],
            Self::Integration => &[(StageKind::Compute, assets::INTEGRATION)],
            Self::Hdr => &[
                (StageKind::Vertex, assets::MAIN_VERT),
                (StageKind::Geometry, assets::MAIN_GEOM),
                (StageKind::Fragment, assets::MAIN_FRAG),
            ],
            Self::Tonemap => &[
                (StageKind::Vertex, assets::DEFERRED_VERT),
                (StageKind::Fragment, assets::TONEMAP_FRAG),
            ],
            Self::Blur => &[
                (StageKind::Vertex, assets::DEFERRED_VERT),
                (StageKind::Fragment, assets::BLUR_FRAG),
            ],
            Self::Luminance => &[
                (StageKind::Vertex, assets::DEFERRED_VERT),
                (StageKind::Fragment, assets::LUMINANCE_FRAG),
            ],
            Self::Downsample => &[
                (StageKind::Vertex, assets::DEFERRED_VERT),
                (StageKind::Fragment, assets::DOWNSAMPLE_FRAG),
            ],
        }
    }

    /// Whether the program is a compute kernel
    #[inline]
    #[must_use]
    pub fn is_compute(self) -> bool {
        self.stages()
            .iter()
            .any(|&(kind, _)| kind == StageKind::Compute)
    }
}

/// The stage files of a program joined into one WGSL module
#[derive(Clone, Debug)]
pub struct ComposedSource {
    /// Label of the program
    pub program: &'static str,
    /// The joined WGSL
    pub code: String,
    /// Byte range each stage file occupies in `code`
    stages: Vec<(Range<usize>, &'static str)>,
}

impl ComposedSource {
    /// Join stage sources in order
    #[must_use]
    pub fn new(program: &'static str, stages: &[(StageKind, ShaderAsset)]) -> Self {
        let mut code = String::new();
        let mut ranges = Vec::with_capacity(stages.len());
        for &(_, asset) in stages {
            let start = code.len();
            code.push_str(asset.source);
            code.push('\n');
            ranges.push((start..code.len(), asset.name));
        }
        Self {
            program,
            code,
            stages: ranges,
        }
    }

    /// File name of the stage that byte `offset` of the joined source came from
    #[must_use]
    pub fn stage_at(&self, offset: usize) -> &'static str {
        self.stages
            .iter()
            .find(|(range, _)| range.contains(&offset))
            .or_else(|| self.stages.last())
            .map_or("<empty>", |&(_, name)| name)
    }

    fn error(&self, offset: Option<u32>, log: String) -> PipelineError {
        let stage = match offset {
            Some(offset) => self.stage_at(offset as usize),
            None => self.stages.first().map_or("<empty>", |&(_, name)| name),
        };
        PipelineError::Shader {
            program: self.program,
            stage,
            log,
        }
    }
}

/// Join the stages of one of the pipeline's programs
#[inline]
#[must_use]
pub fn compose(program: Program) -> ComposedSource {
    ComposedSource::new(program.label(), program.stages())
}

/// Parse and validate a composed source.
///
/// # Errors
/// [`PipelineError::Shader`] naming the stage file the first error points into.
pub fn validate(source: &ComposedSource) -> Result<naga::Module, PipelineError> {
    let module = naga::front::wgsl::parse_str(&source.code).map_err(|error| {
        source.error(
            error.location(&source.code).map(|location| location.offset),
            error.emit_to_string(&source.code),
        )
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|error| {
        source.error(
            error.location(&source.code).map(|location| location.offset),
            error.emit_to_string(&source.code),
        )
    })?;

    Ok(module)
}

/// Run `create` inside a validation error scope and turn anything the device reports into a
/// [`PipelineError::Device`] for `program`.
///
/// # Errors
/// The device's validation error, if any.
pub fn device_scope<T>(
    device: &wgpu::Device,
    program: &'static str,
    create: impl FnOnce() -> T,
) -> Result<T, PipelineError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let created = create();
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(created),
        Some(error) => Err(PipelineError::Device {
            program,
            log: error.to_string(),
        }),
    }
}

/// A program whose module the device accepted
pub struct LinkedProgram {
    /// Which program
    pub program: Program,
    /// Its validated module
    pub module: wgpu::ShaderModule,
}

/// Collects stage sources, then validates and links them.
pub struct ProgramBuilder<'a> {
    /// The device to create the module on
    device: &'a wgpu::Device,
    /// What's being built
    program: Program,
    /// Stages added so far
    stages: Vec<(StageKind, ShaderAsset)>,
}

impl<'a> ProgramBuilder<'a> {
    /// An empty program
    #[inline]
    #[must_use]
    pub const fn new(device: &'a wgpu::Device, program: Program) -> Self {
        Self {
            device,
            program,
            stages: Vec::new(),
        }
    }

    /// Add one stage source
    #[inline]
    #[must_use]
    pub fn stage(mut self, kind: StageKind, asset: ShaderAsset) -> Self {
        self.stages.push((kind, asset));
        self
    }

    /// Add every stage `program` is made of
    #[inline]
    #[must_use]
    pub fn stages_of(self, program: Program) -> Self {
        program
            .stages()
            .iter()
            .fold(self, |builder, &(kind, asset)| builder.stage(kind, asset))
    }

    /// Validate the stages together and hand them to the device.
    ///
    /// # Errors
    /// [`PipelineError::Shader`] if naga rejects the source, [`PipelineError::Device`] if the
    /// device does.
    pub fn link(self) -> Result<LinkedProgram, PipelineError> {
        let label = self.program.label();
        let source = ComposedSource::new(label, &self.stages);
        validate(&source)?;
        log::debug!(
            "Validated program `{label}` from {:?}",
            self.stages
                .iter()
                .map(|&(_, asset)| asset.name)
                .collect::<Vec<_>>()
        );

        let module = device_scope(self.device, label, || {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.code.into()),
                })
        })?;

        Ok(LinkedProgram {
            program: self.program,
            module,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_program_validates() {
        for program in Program::ALL {
            let module = validate(&compose(program))
                .unwrap_or_else(|error| panic!("{program:?} failed to validate: {error}"));

            let entry_points: Vec<_> = module
                .entry_points
                .iter()
                .map(|entry| (entry.stage, entry.name.as_str()))
                .collect();
            if program.is_compute() {
                assert_eq!(
                    entry_points,
                    [(naga::ShaderStage::Compute, Program::COMPUTE_ENTRY)]
                );
            } else {
                assert!(entry_points.contains(&(naga::ShaderStage::Vertex, Program::VERTEX_ENTRY)));
                assert!(
                    entry_points.contains(&(naga::ShaderStage::Fragment, Program::FRAGMENT_ENTRY))
                );
            }
        }
    }

    #[test]
    fn compute_kernels_match_the_host_workgroup_size() {
        for program in [Program::Interaction, Program::Integration] {
            let module = validate(&compose(program)).unwrap();
            let size = module.entry_points.first().map(|entry| entry.workgroup_size);
            assert_eq!(
                size,
                Some([crate::config::PipelineConfig::WORKGROUP_SIZE, 1, 1])
            );
        }
    }

    #[test]
    fn stage_offsets_map_back_to_files() {
        let source = compose(Program::Hdr);
        let vert_len = assets::MAIN_VERT.source.len();
        assert_eq!(source.stage_at(0), "main.vert.wgsl");
        assert_eq!(source.stage_at(vert_len + 1), "main.geom.wgsl");
        assert_eq!(source.stage_at(source.code.len() - 1), "main.frag.wgsl");
    }

    #[test]
    fn broken_stage_is_reported_by_file() {
        let broken = ShaderAsset {
            name: "broken.frag.wgsl",
            source: "@fragment fn fs_main() -> @location(0) vec4<f32> { return undefined_thing; }",
        };
        let source = ComposedSource::new(
            "broken",
            &[
                (StageKind::Vertex, assets::DEFERRED_VERT),
                (StageKind::Fragment, broken),
            ],
        );
        let Err(PipelineError::Shader {
            program,
            stage,
            log,
        }) = validate(&source)
        else {
            panic!("broken source validated");
        };
        assert_eq!(program, "broken");
        assert_eq!(stage, "broken.frag.wgsl");
        assert!(log.contains("undefined_thing"), "{log}");
    }

    #[test]
    fn stage_missing_its_dependencies_fails() {
        let source = ComposedSource::new("orphan", &[(StageKind::Fragment, assets::BLUR_FRAG)]);
        assert!(matches!(
            validate(&source),
            Err(PipelineError::Shader {
                stage: "blur.frag.wgsl",
                ..
            })
        ));
    }
}
