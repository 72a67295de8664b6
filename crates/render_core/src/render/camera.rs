//! Perspective camera
//!
//! The camera is placed by a camera-to-world transform. View space is
//! right-handed and Y-up with the camera looking down -Z; the projection
//! applies the Vulkan coordinate transform so clip space is Y-down with
//! depth in `0..1`.

use crate::foundation::math::{Mat4, Mat4Ext, Vec3};

/// Camera state owned by the rendering server
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera-to-world transform (rotation and translation)
    pub transform: Mat4,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Distance to the near clipping plane
    pub z_near: f32,
    /// Distance to the far clipping plane
    pub z_far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            transform: Mat4::identity(),
            fov_y: 70.0_f32.to_radians(),
            z_near: 0.1,
            z_far: 1000.0,
        }
    }
}

impl Camera {
    /// World-to-view transform
    pub fn view_matrix(&self) -> Mat4 {
        self.transform.rigid_inverse()
    }

    /// Projection for a viewport of the given aspect ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective(self.fov_y, aspect, self.z_near, self.z_far) * Mat4::vulkan_coordinate_transform()
    }

    /// Camera position in world space
    pub fn position(&self) -> Vec3 {
        self.transform.translation_part()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_view_moves_world_opposite_to_camera() {
        let camera = Camera {
            transform: Mat4::new_translation(&Vec3::new(0.0, 2.0, 5.0)),
            ..Camera::default()
        };

        let origin_in_view = camera.view_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin_in_view, Vec4::new(0.0, -2.0, -5.0, 1.0), epsilon = 1e-6);
        assert_relative_eq!(camera.position(), Vec3::new(0.0, 2.0, 5.0));
    }

    #[test]
    fn test_point_in_front_lands_inside_clip_volume() {
        let camera = Camera {
            transform: Mat4::new_translation(&Vec3::new(0.0, 0.0, 5.0)),
            ..Camera::default()
        };

        let clip = camera.projection_matrix(16.0 / 9.0) * camera.view_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = clip.z / clip.w;
        assert!(clip.w > 0.0);
        assert!((0.0..=1.0).contains(&depth));
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rotated_camera_view_is_inverse_of_transform() {
        let transform = Mat4::new_translation(&Vec3::new(3.0, 1.0, -2.0))
            * Mat4::from_axis_angle(&Vec3::y_axis(), 1.2);
        let camera = Camera {
            transform,
            ..Camera::default()
        };

        assert_relative_eq!(camera.view_matrix() * transform, Mat4::identity(), epsilon = 1e-5);
    }
}
