//! Vulkan synchronization primitives
//!
//! RAII wrappers for semaphores and fences, the per-frame synchronization
//! bundle, and the image layout barriers used during texture upload.

use ash::{vk, Device};

use super::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block until the fence is signaled
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects owned by one frame-in-flight slot
pub struct FrameSync {
    /// Signaled by swapchain acquisition, waited on by the frame's submit
    pub image_available: Semaphore,
    /// Signaled by the frame's submit, waited on by presentation
    pub render_finished: Semaphore,
    /// Signaled when the slot's command buffer has finished executing
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects; the fence starts signaled so the
    /// first wait on a fresh slot returns immediately
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Image memory barriers for the transitions a texture goes through
pub struct ImageBarrier;

impl ImageBarrier {
    /// Color subresource range covering `level_count` levels from `base_mip_level`
    pub fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Access masks and pipeline stages for a supported layout transition
    pub fn transition_masks(
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> VulkanResult<(vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
        use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

        match (old_layout, new_layout) {
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
                Ok((A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER))
            }
            (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
                Ok((A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER))
            }
            (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
                Ok((A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER))
            }
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
                Ok((A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER))
            }
            _ => Err(VulkanError::InvalidOperation {
                reason: format!("unsupported layout transition {old_layout:?} -> {new_layout:?}"),
            }),
        }
    }

    /// Record a layout transition for `range` of `image`
    pub fn transition(
        device: &Device,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let (src_access, dst_access, src_stage, dst_stage) =
            Self::transition_masks(old_layout, new_layout)?;

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_waits_on_nothing() {
        let (src, dst, src_stage, dst_stage) = ImageBarrier::transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert!(src.is_empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_mip_level_handoff_targets_fragment_shader() {
        let (_, dst, _, dst_stage) = ImageBarrier::transition_masks(
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_unsupported_transition_is_an_error() {
        let result = ImageBarrier::transition_masks(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(result.is_err());
    }
}
