//! User-defineable config for the pipeline

/// Constants of the N-body simulation, pushed into the compute programs once at startup.
#[derive(Clone, Copy, Debug, PartialEq)]
#[allow(clippy::exhaustive_structs)]
pub struct SimParams {
    /// Length of a single physics step
    pub dt: f32,
    /// Gravitational constant
    pub gravity: f32,
    /// Softening length. Keeps the force finite when two particles nearly overlap.
    pub damping: f32,
}

impl Default for SimParams {
    #[inline]
    fn default() -> Self {
        Self {
            dt: 0.01,
            gravity: 1.0,
            damping: 0.1,
        }
    }
}

/// Shape of the render targets and the post-processing passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_structs)]
pub struct PipelineConfig {
    /// Padding added to every side of the offscreen targets, in pixels. The blur smears glow
    /// across the edges, so particles just off screen still contribute and nothing clips.
    pub margin: u32,
    /// The blur targets are this many times smaller than the scene target.
    pub blur_downscale: u32,
    /// Blur passes per direction. The shader's tap spacing is tuned for this count.
    pub blur_iterations: u32,
    /// Width and height of the flare sprite texture.
    pub flare_size: u32,
}

impl PipelineConfig {
    /// Local size of both compute kernels. Must match `@workgroup_size` in the WGSL.
    pub const WORKGROUP_SIZE: u32 = 256;

    /// Upper bound on `blur_iterations`
    pub const MAX_BLUR_ITERATIONS: u32 = 4096;

    /// Number of workgroups needed to cover `particle_count` particles. Rounds up, the kernels
    /// bounds-check against the particle count themselves.
    #[inline]
    #[must_use]
    pub const fn workgroups(particle_count: u32) -> u32 {
        particle_count.div_ceil(Self::WORKGROUP_SIZE)
    }
}

impl Default for PipelineConfig {
    #[inline]
    fn default() -> Self {
        Self {
            margin: 50,
            blur_downscale: 2,
            blur_iterations: 100,
            flare_size: 16,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn workgroups_round_up() {
        assert_eq!(PipelineConfig::workgroups(0), 0);
        assert_eq!(PipelineConfig::workgroups(4), 1);
        assert_eq!(PipelineConfig::workgroups(256), 1);
        assert_eq!(PipelineConfig::workgroups(257), 2);
        assert_eq!(PipelineConfig::workgroups(16_384), 64);
    }

    #[test]
    fn defaults_match_the_fixed_topology() {
        let config = PipelineConfig::default();
        assert_eq!(config.margin, 50);
        assert_eq!(config.blur_downscale, 2);
        assert_eq!(config.blur_iterations, 100);
        assert_eq!(config.flare_size, 16);
    }
}
