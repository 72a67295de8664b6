//! Framebuffers and the offscreen attachments they reference

use std::sync::Arc;

use ash::{vk, Device};
use vk_mem::Alloc;

use super::{VulkanError, VulkanResult};

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a new framebuffer
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            framebuffer,
        })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

fn attachment_image_info(
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> vk::ImageCreateInfo {
    vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1)
        .build()
}

// Render targets are recreated with the swapchain; each gets its own block
fn attachment_allocation_info() -> vk_mem::AllocationCreateInfo {
    vk_mem::AllocationCreateInfo {
        usage: vk_mem::MemoryUsage::AutoPreferDevice,
        flags: vk_mem::AllocationCreateFlags::DEDICATED_MEMORY,
        ..Default::default()
    }
}

/// Device-local single-level image + view used as a render target
///
/// Allocated through the shared `vk-mem` allocator and released with it on drop.
pub struct Attachment {
    device: Device,
    allocator: Arc<vk_mem::Allocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    image_view: vk::ImageView,
}

impl Attachment {
    /// Create an attachment of `format` covering `extent`
    pub fn new(
        device: Device,
        allocator: Arc<vk_mem::Allocator>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect_mask: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let image_create_info = attachment_image_info(extent, format, usage);
        let (image, mut allocation) =
            unsafe { allocator.create_image(&image_create_info, &attachment_allocation_info()) }
                .map_err(VulkanError::Api)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let image_view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(VulkanError::Api(err));
            }
        };

        Ok(Self {
            device,
            allocator,
            image,
            allocation,
            image_view,
        })
    }

    /// Get the image view handle
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.image_view, None);
            self.allocator.destroy_image(self.image, &mut self.allocation);
        }
    }
}
