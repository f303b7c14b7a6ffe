//! Initial conditions: a thin exponential disk of stars orbiting a heavy core.

use glam::{Vec3, Vec4};
use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiskGalaxy {
    /// Total number of bodies, core included. A multiple of 256 fills every workgroup.
    pub particles: u32,
    /// Mass of the core
    pub central_mass: f32,
    /// Mass of all the stars together
    pub disk_mass: f32,
    /// Radius over which the disk's surface density falls by `e`
    pub scale_length: f32,
    /// Full height of the disk
    pub thickness: f32,
    /// Gravitational constant the simulation runs with
    pub gravity: f32,
    /// Softening length the simulation runs with
    pub softening: f32,
}

impl Default for DiskGalaxy {
    fn default() -> Self {
        Self {
            particles: 16_384,
            central_mass: 60.0,
            disk_mass: 40.0,
            scale_length: 4.0,
            thickness: 0.3,
            gravity: 1.0,
            softening: 0.1,
        }
    }
}

impl DiskGalaxy {
    /// Positions (mass in `w`) and velocities. The core is always the first body, at rest at the
    /// origin. The disk lies in the `xz` plane and rotates clockwise seen from `+y`.
    pub fn generate(&self, rng: &mut impl Rng) -> (Vec<Vec4>, Vec<Vec4>) {
        let count = self.particles as usize;
        let mut positions = Vec::with_capacity(count);
        let mut velocities = Vec::with_capacity(count);
        if count == 0 {
            return (positions, velocities);
        }

        positions.push(Vec3::ZERO.extend(self.central_mass));
        velocities.push(Vec4::ZERO);

        let star_mass = self.disk_mass / (count - 1).max(1) as f32;
        for _ in 1..count {
            // Radii of an exponential disk are Gamma(2) distributed, the sum of two exponentials
            let u1: f32 = rng.gen_range(f32::EPSILON..=1.0);
            let u2: f32 = rng.gen_range(f32::EPSILON..=1.0);
            let radius = -self.scale_length * (u1 * u2).ln();
            let angle = rng.gen_range(0.0..core::f32::consts::TAU);
            let height = self.thickness * rng.gen_range(-0.5..=0.5);

            let (sin, cos) = angle.sin_cos();
            positions.push(Vec4::new(radius * cos, height, radius * sin, star_mass));

            let speed = self.circular_speed(radius);
            velocities.push(Vec4::new(-sin * speed, 0.0, cos * speed, 0.0));
        }
        (positions, velocities)
    }

    /// Mass inside `radius`: the core plus the enclosed share of the disk
    pub fn enclosed_mass(&self, radius: f32) -> f32 {
        let x = radius / self.scale_length;
        self.central_mass + self.disk_mass * (1.0 - (1.0 + x) * (-x).exp())
    }

    /// Speed of a circular orbit at `radius` under the softened force the kernel applies
    pub fn circular_speed(&self, radius: f32) -> f32 {
        let softened = radius.mul_add(radius, self.softening * self.softening);
        (self.gravity * self.enclosed_mass(radius) * radius * radius / softened.powf(1.5)).sqrt()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn galaxy(particles: u32) -> DiskGalaxy {
        DiskGalaxy {
            particles,
            ..DiskGalaxy::default()
        }
    }

    #[test]
    fn core_comes_first() {
        let (positions, velocities) = galaxy(256).generate(&mut StdRng::seed_from_u64(1));
        assert_eq!(positions.len(), 256);
        assert_eq!(velocities.len(), 256);
        assert_eq!(positions[0], Vec4::new(0.0, 0.0, 0.0, 60.0));
        assert_eq!(velocities[0], Vec4::ZERO);
    }

    #[test]
    fn same_seed_same_galaxy() {
        let first = galaxy(512).generate(&mut StdRng::seed_from_u64(7));
        let second = galaxy(512).generate(&mut StdRng::seed_from_u64(7));
        let other = galaxy(512).generate(&mut StdRng::seed_from_u64(8));
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn stars_orbit_tangentially_in_a_thin_disk() {
        let disk = galaxy(1024);
        let (positions, velocities) = disk.generate(&mut StdRng::seed_from_u64(3));
        for (position, velocity) in positions.iter().zip(&velocities).skip(1) {
            assert!(position.is_finite() && velocity.is_finite());
            assert!(position.y.abs() <= disk.thickness / 2.0);
            let radial = Vec3::new(position.x, 0.0, position.z);
            let tangential = velocity.truncate();
            assert!(radial.dot(tangential).abs() < 1e-3 * radial.length().max(1.0));
            // Clockwise seen from +y
            assert!(radial.cross(tangential).y <= 0.0);
        }
    }

    #[test]
    fn disk_mass_is_shared_between_the_stars() {
        let disk = galaxy(257);
        let (positions, _) = disk.generate(&mut StdRng::seed_from_u64(0));
        let stars: f32 = positions.iter().skip(1).map(|position| position.w).sum();
        assert!((stars - disk.disk_mass).abs() < 1e-3);
    }

    #[test]
    fn enclosed_mass_grows_to_the_total() {
        let disk = DiskGalaxy::default();
        assert_eq!(disk.enclosed_mass(0.0), disk.central_mass);
        assert!(disk.enclosed_mass(4.0) < disk.enclosed_mass(8.0));
        let total = disk.central_mass + disk.disk_mass;
        assert!((disk.enclosed_mass(1000.0) - total).abs() < 1e-3);
    }

    #[test]
    fn no_bodies_no_galaxy() {
        let (positions, velocities) = galaxy(0).generate(&mut StdRng::seed_from_u64(0));
        assert!(positions.is_empty() && velocities.is_empty());
    }
}
