//! Uniform locations shared between the host and the WGSL assets.
//!
//! Every program keeps its uniforms in one buffer bound at `@group(1) @binding(0)`, laid out as
//! an array of 16 byte slots. A location is a slot index, so a `mat4x4` spans four locations the
//! same way it would in GLSL. Each program gets its own enum so a value can't be pushed into the
//! wrong program's buffer, and the tests check every location against the struct offsets naga
//! computes for the WGSL source.

use core::marker::PhantomData;

use glam::{Mat4, Vec2, Vec4};

/// Size of one uniform slot in bytes.
pub const SLOT_SIZE: u64 = 16;

/// A named slot in one program's uniform buffer.
pub trait UniformLocation: Copy + core::fmt::Debug + 'static {
    /// Every location of the program
    const ALL: &'static [Self];
    /// Name of the WGSL struct the locations index into
    const STRUCT_NAME: &'static str;

    /// Slot index, the equivalent of a GLSL `layout(location = N)`
    fn index(self) -> u32;

    /// Name of the WGSL struct member at this location
    fn member(self) -> &'static str;

    /// Number of consecutive slots the value occupies
    #[inline]
    fn slots(self) -> u32 {
        1
    }

    /// Offset of the location into the uniform buffer
    #[inline]
    fn byte_offset(self) -> u64 {
        u64::from(self.index()) * SLOT_SIZE
    }

    /// Size of the whole uniform buffer
    #[inline]
    fn block_size() -> u64 {
        let slots = Self::ALL
            .iter()
            .map(|location| location.index() + location.slots())
            .max()
            .unwrap_or(1);
        u64::from(slots) * SLOT_SIZE
    }
}

/// Uniforms of the interaction kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum InteractionUniform {
    /// Physics timestep
    TimeStep = 0,
    /// Gravitational constant
    Gravity = 1,
    /// Softening length
    Damping = 2,
    /// Number of live particles, the kernel ignores invocations past it
    ParticleCount = 3,
}

impl UniformLocation for InteractionUniform {
    const ALL: &'static [Self] = &[
        Self::TimeStep,
        Self::Gravity,
        Self::Damping,
        Self::ParticleCount,
    ];
    const STRUCT_NAME: &'static str = "InteractionParams";

    #[inline]
    fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    fn member(self) -> &'static str {
        match self {
            Self::TimeStep => "dt",
            Self::Gravity => "gravity",
            Self::Damping => "damping",
            Self::ParticleCount => "count",
        }
    }
}

/// Uniforms of the integration kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum IntegrationUniform {
    /// Physics timestep
    TimeStep = 0,
    /// Number of live particles
    ParticleCount = 1,
}

impl UniformLocation for IntegrationUniform {
    const ALL: &'static [Self] = &[Self::TimeStep, Self::ParticleCount];
    const STRUCT_NAME: &'static str = "IntegrationParams";

    #[inline]
    fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    fn member(self) -> &'static str {
        match self {
            Self::TimeStep => "dt",
            Self::ParticleCount => "count",
        }
    }
}

/// Uniforms of the HDR splat
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum HdrUniform {
    /// World to camera
    View = 0,
    /// Camera to clip space
    Projection = 4,
    /// Half size of a particle sprite in normalised device coordinates
    SpriteSize = 8,
}

impl UniformLocation for HdrUniform {
    const ALL: &'static [Self] = &[Self::View, Self::Projection, Self::SpriteSize];
    const STRUCT_NAME: &'static str = "HdrParams";

    #[inline]
    fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    fn member(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Projection => "projection",
            Self::SpriteSize => "sprite_size",
        }
    }

    #[inline]
    fn slots(self) -> u32 {
        match self {
            Self::View | Self::Projection => 4,
            Self::SpriteSize => 1,
        }
    }
}

/// Uniforms of the blur
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum BlurUniform {
    /// Distance between taps, in texture coordinates
    Offset = 0,
    /// Unit axis the blur runs along
    Direction = 1,
}

impl UniformLocation for BlurUniform {
    const ALL: &'static [Self] = &[Self::Offset, Self::Direction];
    const STRUCT_NAME: &'static str = "BlurParams";

    #[inline]
    fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    fn member(self) -> &'static str {
        match self {
            Self::Offset => "offset",
            Self::Direction => "direction",
        }
    }
}

/// Uniforms of the tonemap composite
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum TonemapUniform {
    /// Mip level of the luminance target read as the scene's average
    Lod = 0,
    /// Scale (`xy`) and offset (`zw`) that crop the margin out of the padded targets
    Crop = 1,
}

impl UniformLocation for TonemapUniform {
    const ALL: &'static [Self] = &[Self::Lod, Self::Crop];
    const STRUCT_NAME: &'static str = "TonemapParams";

    #[inline]
    fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    fn member(self) -> &'static str {
        match self {
            Self::Lod => "lod",
            Self::Crop => "crop",
        }
    }
}

/// A value to write at a uniform location
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum UniformValue {
    /// `f32`
    Float(f32),
    /// `u32`
    UInt(u32),
    /// `vec2<f32>`
    Vec2(Vec2),
    /// `vec4<f32>`
    Vec4(Vec4),
    /// `mat4x4<f32>`, column major on both sides
    Mat4(Mat4),
}

impl UniformValue {
    /// Number of slots the value spans
    #[inline]
    #[must_use]
    pub const fn slots(&self) -> u32 {
        match *self {
            Self::Mat4(_) => 4,
            Self::Float(_) | Self::UInt(_) | Self::Vec2(_) | Self::Vec4(_) => 1,
        }
    }

    /// Raw bytes as they sit in the uniform buffer
    #[inline]
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::Float(value) => bytemuck::bytes_of(&value).to_vec(),
            Self::UInt(value) => bytemuck::bytes_of(&value).to_vec(),
            Self::Vec2(value) => bytemuck::bytes_of(&value).to_vec(),
            Self::Vec4(value) => bytemuck::bytes_of(&value).to_vec(),
            Self::Mat4(value) => bytemuck::bytes_of(&value).to_vec(),
        }
    }
}

/// One program's uniform buffer, only writable through that program's locations.
pub struct UniformBuffer<L: UniformLocation> {
    /// The buffer itself
    buffer: wgpu::Buffer,
    /// Ties the buffer to its program's locations
    location: PhantomData<L>,
}

impl<L: UniformLocation> UniformBuffer<L> {
    /// Allocate a zeroed buffer big enough for every location
    #[inline]
    #[must_use]
    pub fn new(device: &wgpu::Device, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: L::block_size(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            location: PhantomData,
        }
    }

    /// Queue a write of `value` at `location`. Lands with the next submit.
    #[inline]
    pub fn set(&self, queue: &wgpu::Queue, location: L, value: UniformValue) {
        debug_assert_eq!(
            value.slots(),
            location.slots(),
            "{location:?} doesn't take a {value:?}"
        );
        queue.write_buffer(&self.buffer, location.byte_offset(), &value.to_bytes());
    }

    /// The underlying buffer, for bind groups
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[allow(clippy::indexing_slicing)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::shader::{compose, validate, Program};

    /// Layout of one WGSL struct as naga lays it out
    struct StructLayout {
        /// Name, offset and type of every member, padding included
        members: Vec<(String, u32, naga::Handle<naga::Type>)>,
        span: u32,
        layouter: naga::proc::Layouter,
    }

    fn wgsl_struct_layout(program: Program, name: &str) -> StructLayout {
        let module = validate(&compose(program)).unwrap();
        let mut layouter = naga::proc::Layouter::default();
        layouter.update(module.to_ctx()).unwrap();

        let found = module.types.iter().find_map(|(_, ty)| match ty.inner {
            naga::TypeInner::Struct {
                ref members,
                span,
            } if ty.name.as_deref() == Some(name) => Some((
                members
                    .iter()
                    .map(|member| {
                        (
                            member.name.clone().unwrap_or_default(),
                            member.offset,
                            member.ty,
                        )
                    })
                    .collect(),
                span,
            )),
            _ => None,
        });
        let (members, span) = found.unwrap_or_else(|| panic!("No struct `{name}` in {program:?}"));
        StructLayout {
            members,
            span,
            layouter,
        }
    }

    fn assert_layout_matches<L: UniformLocation>(program: Program) {
        let layout = wgsl_struct_layout(program, L::STRUCT_NAME);
        let named: Vec<_> = layout
            .members
            .iter()
            .filter(|(name, ..)| !name.starts_with('_'))
            .collect();
        assert_eq!(named.len(), L::ALL.len());
        for location in L::ALL {
            let offset = named
                .iter()
                .find(|(name, ..)| name == location.member())
                .map(|&&(_, offset, _)| offset)
                .unwrap_or_else(|| panic!("{location:?} has no member in the WGSL"));
            assert_eq!(u64::from(offset), location.byte_offset(), "{location:?}");
        }
        assert_eq!(u64::from(layout.span), L::block_size());
    }

    /// Every member sits where plain alignment puts it, so backends that drop `@align` and
    /// `@size` lay the struct out the same way.
    fn assert_naturally_aligned<L: UniformLocation>(program: Program) {
        let layout = wgsl_struct_layout(program, L::STRUCT_NAME);
        let mut end = 0;
        let mut alignment = naga::proc::Alignment::ONE;
        for &(ref name, offset, ty) in &layout.members {
            let member = layout.layouter[ty];
            assert_eq!(offset, member.alignment.round_up(end), "`{name}` is padded implicitly");
            end = offset + member.size;
            alignment = alignment.max(member.alignment);
        }
        assert_eq!(layout.span, alignment.round_up(end));
    }

    #[test]
    fn uniform_structs_need_no_explicit_alignment() {
        assert_naturally_aligned::<InteractionUniform>(Program::Interaction);
        assert_naturally_aligned::<IntegrationUniform>(Program::Integration);
        assert_naturally_aligned::<HdrUniform>(Program::Hdr);
        assert_naturally_aligned::<BlurUniform>(Program::Blur);
        assert_naturally_aligned::<TonemapUniform>(Program::Tonemap);
    }

    #[test]
    fn interaction_locations_match_wgsl() {
        assert_layout_matches::<InteractionUniform>(Program::Interaction);
    }

    #[test]
    fn integration_locations_match_wgsl() {
        assert_layout_matches::<IntegrationUniform>(Program::Integration);
    }

    #[test]
    fn hdr_locations_match_wgsl() {
        assert_layout_matches::<HdrUniform>(Program::Hdr);
    }

    #[test]
    fn blur_locations_match_wgsl() {
        assert_layout_matches::<BlurUniform>(Program::Blur);
    }

    #[test]
    fn tonemap_locations_match_wgsl() {
        assert_layout_matches::<TonemapUniform>(Program::Tonemap);
    }

    #[test]
    fn matrices_span_four_locations() {
        assert_eq!(HdrUniform::Projection.index(), 4);
        assert_eq!(HdrUniform::SpriteSize.byte_offset(), 128);
        assert_eq!(HdrUniform::block_size(), 144);
        assert_eq!(UniformValue::Mat4(Mat4::IDENTITY).to_bytes().len(), 64);
    }

    #[test]
    fn values_serialise_to_their_natural_size() {
        assert_eq!(UniformValue::Float(1.0).to_bytes(), 1.0_f32.to_ne_bytes());
        assert_eq!(UniformValue::UInt(7).to_bytes(), 7_u32.to_ne_bytes());
        assert_eq!(UniformValue::Vec2(Vec2::ONE).to_bytes().len(), 8);
        assert_eq!(UniformValue::Vec4(Vec4::ONE).to_bytes().len(), 16);
    }
}
