//! Vulkan rendering backend
//!
//! RAII wrappers for the Vulkan objects the renderer uses, the surface-bound
//! [`DeviceContext`] and the [`RenderingDevice`] that implements
//! [`crate::render::GraphicsDevice`].

pub mod commands;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod frame;
pub mod framebuffer;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use commands::{CommandPool, SingleTimeCommands};
pub use context::{
    DeviceContext, LogicalDevice, PhysicalDeviceInfo, VulkanError, VulkanInstance, VulkanResult,
    TEXTURE_FORMAT,
};
pub use descriptors::{DescriptorLayouts, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use device::{GpuBuffer, GpuImage, RenderingDevice, Texture};
pub use frame::FrameCursor;
pub use framebuffer::{Attachment, Framebuffer};
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, PipelineDesc, ShaderModule};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, ImageBarrier, Semaphore};
