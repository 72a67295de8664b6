//! GPU-visible data layouts
//!
//! Every struct here is `#[repr(C)]` and `Pod` so it can be copied straight
//! into mapped memory or push constants. Field order and padding follow std140
//! for the uniform block and std430 for the light array.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

use crate::foundation::math::{Mat4, Vec3};

/// Number of frames recorded concurrently
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound on point lights uploaded to the GPU
pub const MAX_LIGHT_COUNT: usize = 8;

/// Interleaved mesh vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
    /// Tangent with handedness in `w`
    pub tangent: [f32; 4],
}

impl Vertex {
    /// Create a vertex with a default +X tangent
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
            tangent: [1.0, 0.0, 0.0, 1.0],
        }
    }

    /// Single interleaved binding at slot 0
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0..4: position, normal, uv, tangent
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, normal)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Self, uv)),
            attribute(3, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Self, tangent)),
        ]
    }
}

/// One point light as laid out in the light storage buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightData {
    /// World-space position
    pub position: [f32; 3],
    /// Distance at which the light's contribution reaches zero
    pub range: f32,
    /// Linear RGB color
    pub color: [f32; 3],
    /// Scalar intensity
    pub intensity: f32,
}

impl LightData {
    /// White light at the origin with unit intensity and zero range
    pub fn new() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            ..Self::default()
        }
    }
}

/// Directional light as packed into the frame uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightData {
    /// World-space direction the light travels
    pub direction: [f32; 3],
    /// Scalar intensity, zero when no directional light exists
    pub intensity: f32,
    /// Linear RGB color
    pub color: [f32; 3],
    /// std140 padding
    pub _padding: f32,
}

impl DirectionalLightData {
    /// White light pointing down -Z with unit intensity
    pub fn new() -> Self {
        Self {
            direction: [0.0, 0.0, -1.0],
            intensity: 1.0,
            color: [1.0, 1.0, 1.0],
            _padding: 0.0,
        }
    }
}

/// Per-frame uniform block bound at set 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// `projection * view`
    pub proj_view: [[f32; 4]; 4],
    /// World to view transform, used to bring lights into view space
    pub view: [[f32; 4]; 4],
    /// Camera position in world space
    pub view_position: [f32; 3],
    /// Number of valid entries in the light buffer
    pub light_count: u32,
    /// Primary directional light
    pub directional: DirectionalLightData,
}

impl UniformBufferObject {
    /// Pack camera and light state for upload
    pub fn new(
        projection: &Mat4,
        view: &Mat4,
        view_position: &Vec3,
        light_count: u32,
        directional: DirectionalLightData,
    ) -> Self {
        Self {
            proj_view: (projection * view).into(),
            view: (*view).into(),
            view_position: (*view_position).into(),
            light_count,
            directional,
        }
    }
}

/// Per-draw push constants for the geometry pipeline (vertex stage)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshPushConstants {
    /// Object to world transform
    pub model: [[f32; 4]; 4],
    /// Inverse-transpose of the model-view transform
    pub model_view_normal: [[f32; 4]; 4],
}

impl MeshPushConstants {
    /// Size in bytes of the push constant range
    pub const SIZE: u32 = size_of::<Self>() as u32;

    /// Build from the two matrices
    pub fn new(model: &Mat4, model_view_normal: &Mat4) -> Self {
        Self {
            model: (*model).into(),
            model_view_normal: (*model_view_normal).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_struct_sizes_match_shader_layouts() {
        assert_eq!(size_of::<Vertex>(), 48);
        assert_eq!(size_of::<LightData>(), 32);
        assert_eq!(size_of::<DirectionalLightData>(), 32);
        assert_eq!(size_of::<UniformBufferObject>(), 176);
        assert_eq!(MeshPushConstants::SIZE, 128);
    }

    #[test]
    fn test_vertex_attribute_offsets() {
        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        assert_eq!(Vertex::binding_description().stride, 48);
    }

    #[test]
    fn test_matrices_are_stored_column_major() {
        let model = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let constants = MeshPushConstants::new(&model, &Mat4::identity());
        assert_eq!(constants.model[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
