//! Descriptor set layouts, pool and writes
//!
//! Set layout order used by the geometry pipeline: 0 = frame uniforms,
//! 1 = point lights, 2 = material albedo. The tone-map pipeline has a single
//! set holding the HDR input attachment.

use ash::{vk, Device};

use super::{VulkanError, VulkanResult};
use crate::render::types::FRAMES_IN_FLIGHT;

/// Upper bound on live material sets
pub const MAX_MATERIAL_SETS: u32 = 1000;

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-descriptor binding
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// The four layouts the renderer binds
pub struct DescriptorLayouts {
    /// Per-frame uniform block, vertex and fragment stages
    pub uniform: DescriptorSetLayout,
    /// HDR input attachment for the tone-map subpass
    pub input_attachment: DescriptorSetLayout,
    /// Point light storage buffer
    pub light: DescriptorSetLayout,
    /// Material albedo sampler
    pub texture: DescriptorSetLayout,
}

impl DescriptorLayouts {
    /// Create all layouts, each with a single binding 0
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            uniform: DescriptorSetLayoutBuilder::new()
                .add_binding(
                    0,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                )
                .build(device)?,
            input_attachment: DescriptorSetLayoutBuilder::new()
                .add_binding(
                    0,
                    vk::DescriptorType::INPUT_ATTACHMENT,
                    vk::ShaderStageFlags::FRAGMENT,
                )
                .build(device)?,
            light: DescriptorSetLayoutBuilder::new()
                .add_binding(
                    0,
                    vk::DescriptorType::STORAGE_BUFFER,
                    vk::ShaderStageFlags::FRAGMENT,
                )
                .build(device)?,
            texture: DescriptorSetLayoutBuilder::new()
                .add_binding(
                    0,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    vk::ShaderStageFlags::FRAGMENT,
                )
                .build(device)?,
        })
    }

    /// Set layouts of the geometry pipeline in set order
    pub fn material_sets(&self) -> [vk::DescriptorSetLayout; 3] {
        [self.uniform.handle(), self.light.handle(), self.texture.handle()]
    }
}

/// Pool sizes: one uniform set per frame, one input attachment, one light
/// buffer and the material samplers
pub fn pool_sizes() -> [vk::DescriptorPoolSize; 4] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: FRAMES_IN_FLIGHT as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count: 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_MATERIAL_SETS,
        },
    ]
}

/// Descriptor pool whose sets can be freed individually
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Create the pool; every set holds one descriptor so max sets is the
    /// sum of the pool sizes
    pub fn new(device: Device) -> VulkanResult<Self> {
        let pool_sizes = pool_sizes();
        let max_sets = pool_sizes.iter().map(|size| size.descriptor_count).sum();

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(Self { pool, device })
    }

    /// Allocate one set per layout
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)
    }

    /// Allocate a single set
    pub fn allocate_one(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        self.allocate(&[layout])?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "descriptor set allocation returned nothing".to_string(),
            })
    }

    /// Return a set to the pool
    pub fn free(&self, set: vk::DescriptorSet) -> VulkanResult<()> {
        unsafe { self.device.free_descriptor_sets(self.pool, &[set]) }.map_err(VulkanError::Api)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Point binding 0 of `set` at a whole buffer
pub fn write_buffer(device: &Device, set: vk::DescriptorSet, ty: vk::DescriptorType, buffer: vk::Buffer) {
    let buffer_info = [vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range: vk::WHOLE_SIZE,
    }];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(ty)
        .buffer_info(&buffer_info)
        .build();
    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Point binding 0 of `set` at an image, with an optional sampler
pub fn write_image(
    device: &Device,
    set: vk::DescriptorSet,
    ty: vk::DescriptorType,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = [vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(ty)
        .image_info(&image_info)
        .build();
    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_cover_fixed_sets_and_materials() {
        let sizes = pool_sizes();
        let total: u32 = sizes.iter().map(|s| s.descriptor_count).sum();
        assert_eq!(total, FRAMES_IN_FLIGHT as u32 + 2 + MAX_MATERIAL_SETS);
        assert_eq!(sizes[3].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }
}
