//! Math types and Vulkan projection helpers
//!
//! Column-vector convention throughout: a point is transformed as `M * p`, so
//! a model-view matrix is `view * model`.

pub use nalgebra::{Matrix3, Matrix4, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Extension trait for Mat4 with the projection and rigid-transform helpers
/// the renderer needs
pub trait Mat4Ext {
    /// Perspective projection mapping view depth `near..far` to `0..1`
    ///
    /// Expects view space already flipped into Vulkan's Y-down, Z-forward
    /// frame; see [`Mat4Ext::vulkan_coordinate_transform`].
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Flip Y and Z so a right-handed Y-up view space matches Vulkan clip space
    fn vulkan_coordinate_transform() -> Mat4;

    /// Inverse of a rotation + translation matrix without a general inverse
    fn rigid_inverse(&self) -> Mat4;

    /// Normal matrix for a model-view transform: `transpose(inverse(m))`
    ///
    /// A singular input yields the identity.
    fn normal_matrix(&self) -> Mat4;

    /// Translation column
    fn translation_part(&self) -> Vec3;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        // https://johannesugb.github.io/gpu-programming/setting-up-a-proper-vulkan-projection-matrix/
        let tan_half_fovy = (fov_y * 0.5).tan();

        let mut result = Mat4::zeros();
        result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        result[(1, 1)] = 1.0 / tan_half_fovy;
        result[(2, 2)] = far / (far - near);
        result[(2, 3)] = -(near * far) / (far - near);
        result[(3, 2)] = 1.0;
        result
    }

    fn vulkan_coordinate_transform() -> Mat4 {
        Mat4::new(
            1.0,  0.0,  0.0, 0.0,
            0.0, -1.0,  0.0, 0.0,
            0.0,  0.0, -1.0, 0.0,
            0.0,  0.0,  0.0, 1.0,
        )
    }

    fn rigid_inverse(&self) -> Mat4 {
        let rotation_t = self.fixed_view::<3, 3>(0, 0).transpose();
        let translation = -(rotation_t * self.translation_part());

        let mut result = Mat4::identity();
        result.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation_t);
        result.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        result
    }

    fn normal_matrix(&self) -> Mat4 {
        self.try_inverse()
            .map_or_else(Mat4::identity, |inverse| inverse.transpose())
    }

    fn translation_part(&self) -> Vec3 {
        Vec3::new(self[(0, 3)], self[(1, 3)], self[(2, 3)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perspective_maps_near_and_far_to_unit_depth() {
        let near = 0.1;
        let far = 100.0;
        let proj = Mat4::perspective(std::f32::consts::FRAC_PI_2, 1.0, near, far)
            * Mat4::vulkan_coordinate_transform();

        let near_clip = proj * Vec4::new(0.0, 0.0, -near, 1.0);
        let far_clip = proj * Vec4::new(0.0, 0.0, -far, 1.0);

        assert_relative_eq!(near_clip.z / near_clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far_clip.z / far_clip.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_vulkan_projection_points_y_down() {
        let proj = Mat4::perspective(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 10.0)
            * Mat4::vulkan_coordinate_transform();
        let above = proj * Vec4::new(0.0, 1.0, -2.0, 1.0);
        assert!(above.y / above.w < 0.0);
    }

    #[test]
    fn test_rigid_inverse_matches_general_inverse() {
        let rotation = Mat4::from_axis_angle(&Vec3::y_axis(), 0.7)
            * Mat4::from_axis_angle(&Vec3::x_axis(), -0.3);
        let transform = Mat4::new_translation(&Vec3::new(1.0, -2.0, 3.5)) * rotation;

        let expected = transform.try_inverse().unwrap();
        assert_relative_eq!(transform.rigid_inverse(), expected, epsilon = 1e-5);
    }

    #[test]
    fn test_normal_matrix_of_singular_matrix_is_identity() {
        assert_eq!(Mat4::zeros().normal_matrix(), Mat4::identity());
    }
}
