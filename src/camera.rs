//! A camera circling the galaxy slowly, looking at its core.

use glam::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitCamera {
    /// Horizontal distance from the origin
    pub distance: f32,
    /// Height above the disk
    pub height: f32,
    /// Radians per second
    pub angular_speed: f32,
    /// Vertical field of view in radians
    pub fov: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            distance: 40.0,
            height: 15.0,
            angular_speed: 0.05,
            fov: 45_f32.to_radians(),
        }
    }
}

impl OrbitCamera {
    /// Where the camera is `seconds` into the orbit
    pub fn eye(&self, seconds: f32) -> Vec3 {
        let (sin, cos) = (self.angular_speed * seconds).sin_cos();
        Vec3::new(self.distance * cos, self.height, self.distance * sin)
    }

    pub fn view(&self, seconds: f32) -> Mat4 {
        Mat4::look_at_rh(self.eye(seconds), Vec3::ZERO, Vec3::Y)
    }

    pub fn projection(&self, width: u32, height: u32) -> Mat4 {
        let aspect = width as f32 / height.max(1) as f32;
        Mat4::perspective_rh(self.fov, aspect, 0.1, 1000.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn orbit_keeps_its_distance_and_height() {
        let camera = OrbitCamera::default();
        for seconds in [0.0, 1.0, 30.0, 600.0] {
            let eye = camera.eye(seconds);
            assert!((eye.x.hypot(eye.z) - camera.distance).abs() < 1e-3);
            assert_eq!(eye.y, camera.height);
        }
    }

    #[test]
    fn origin_is_in_the_middle_of_the_screen() {
        let camera = OrbitCamera::default();
        let clip = camera.projection(1280, 720) * camera.view(12.0) * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
