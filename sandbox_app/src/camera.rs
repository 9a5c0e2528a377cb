//! Orbiting camera and sun

use nalgebra::{Matrix4, Orthographic3, Perspective3, Point3, Vector2, Vector3};
use render_core::frame::FrameParameters;
use render_core::producers::VisibilityFlags;

/// Maps GL clip space (y up, depth -1..1) to Vulkan (y down, depth 0..1)
fn vulkan_clip_correction() -> Matrix4<f32> {
    Matrix4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, -1.0, 0.0, 0.0, //
        0.0, 0.0, 0.5, 0.5, //
        0.0, 0.0, 0.0, 1.0,
    )
}

#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Point3<f32>,
    pub distance: f32,
    pub height: f32,
    pub angular_speed: f32,
    pub field_of_view: f32,
    aspect_ratio: f32,
}

impl OrbitCamera {
    pub fn new(aspect_ratio: f32) -> Self {
        Self {
            target: Point3::origin(),
            distance: 18.0,
            height: 7.0,
            angular_speed: 0.15,
            field_of_view: 60_f32.to_radians(),
            aspect_ratio,
        }
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect_ratio = width as f32 / height as f32;
        }
    }

    pub fn position(&self, elapsed_seconds: f32) -> Point3<f32> {
        let angle = elapsed_seconds * self.angular_speed;
        Point3::new(
            self.target.x + self.distance * angle.cos(),
            self.target.y + self.height,
            self.target.z + self.distance * angle.sin(),
        )
    }

    /// Unit vector the camera looks along
    pub fn forward(&self, elapsed_seconds: f32) -> Vector3<f32> {
        (self.target - self.position(elapsed_seconds)).normalize()
    }

    /// Everything the renderer needs for one frame
    pub fn frame_parameters(&self, elapsed_seconds: f32, delta_seconds: f32) -> FrameParameters {
        let eye = self.position(elapsed_seconds);
        let view = Matrix4::look_at_rh(&eye, &self.target, &Vector3::y());
        let projection = vulkan_clip_correction()
            * Perspective3::new(self.aspect_ratio, self.field_of_view, 0.1, 200.0).to_homogeneous();

        let light_direction = Vector3::new(0.4, 1.0, 0.3).normalize();
        let light_eye = self.target + light_direction * 30.0;
        let light_view = Matrix4::look_at_rh(&light_eye, &self.target, &Vector3::y());
        let light_projection =
            vulkan_clip_correction() * Orthographic3::new(-20.0, 20.0, -20.0, 20.0, 1.0, 60.0).to_homogeneous();
        let mut shadow_view_projections = [Matrix4::identity(); VisibilityFlags::SHADOW_MAP_SLOTS];
        shadow_view_projections[0] = light_projection * light_view;

        FrameParameters {
            view,
            projection,
            camera_position: eye.coords,
            light_direction,
            shadow_view_projections,
            elapsed_seconds,
            delta_seconds,
            wind_direction: Vector2::new(elapsed_seconds * 0.1, 1.0),
            wind_strength: 0.35,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_orbit_keeps_distance_and_height() {
        let camera = OrbitCamera::new(16.0 / 9.0);
        for t in [0.0, 3.0, 11.5] {
            let eye = camera.position(t);
            assert_relative_eq!(eye.y, camera.height);
            assert_relative_eq!(Vector2::new(eye.x, eye.z).norm(), camera.distance, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_target_projects_to_screen_center() {
        let camera = OrbitCamera::new(1.0);
        let parameters = camera.frame_parameters(2.0, 0.016);
        let clip = parameters.projection * parameters.view * camera.target.to_homogeneous();
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }
}
