//! Device abstraction used by the rendering server
//!
//! The server only ever talks to the GPU through [`GraphicsDevice`]. The
//! Vulkan implementation is [`crate::render::vulkan::RenderingDevice`].

use ash::vk;

use super::image::Image;
use super::types::{DirectionalLightData, LightData, MeshPushConstants};
use super::RenderError;
use crate::foundation::math::{Mat4, Vec3};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, RenderError>;

/// GPU operations the rendering server needs
///
/// Resource types are owned values: destroying consumes them, so a resource
/// can be released at most once.
pub trait GraphicsDevice {
    /// Buffer plus its memory
    type Buffer;
    /// Image, view and sampler
    type Texture;
    /// Descriptor set binding one texture as a material
    type MaterialSet: Copy;
    /// Command buffer of the frame being recorded
    type CommandBuffer: Copy;

    /// Create a device-local buffer of `size` bytes
    fn buffer_create(&mut self, usage: vk::BufferUsageFlags, size: u64) -> BackendResult<Self::Buffer>;

    /// Copy `data` into `buffer` through a staging buffer, blocking until done
    fn buffer_send(&mut self, buffer: &Self::Buffer, data: &[u8]) -> BackendResult<()>;

    /// Release a buffer and its memory
    fn buffer_destroy(&mut self, buffer: Self::Buffer);

    /// Upload an RGBA8 image with a full mip chain
    fn texture_create(&mut self, image: &Image) -> BackendResult<Self::Texture>;

    /// Release image, view and sampler together
    fn texture_destroy(&mut self, texture: Self::Texture);

    /// Allocate a material set sampling `texture`
    fn material_set_create(&mut self, texture: &Self::Texture) -> BackendResult<Self::MaterialSet>;

    /// Return a material set to the pool
    fn material_set_free(&mut self, set: Self::MaterialSet);

    /// Write this frame's uniform block
    fn update_uniform_buffer(
        &mut self,
        projection: &Mat4,
        view: &Mat4,
        view_position: &Vec3,
        light_count: u32,
        directional: DirectionalLightData,
    ) -> BackendResult<()>;

    /// Replace the contents of the point light buffer
    fn update_light_buffer(&mut self, lights: &[LightData]) -> BackendResult<()>;

    /// Wait for this slot, acquire an image and start recording
    fn draw_begin(&mut self) -> BackendResult<Self::CommandBuffer>;

    /// Push per-draw matrices
    fn push_constants(&mut self, command_buffer: Self::CommandBuffer, constants: &MeshPushConstants);

    /// Bind a material and geometry and issue an indexed draw
    fn draw_primitive(
        &mut self,
        command_buffer: Self::CommandBuffer,
        material: Self::MaterialSet,
        vertex_buffer: &Self::Buffer,
        index_buffer: &Self::Buffer,
        index_count: u32,
    );

    /// Tone-map, submit and present
    fn draw_end(&mut self, command_buffer: Self::CommandBuffer) -> BackendResult<()>;

    /// Note a new window size; the swapchain follows at the next present
    fn window_resize(&mut self, width: u32, height: u32);

    /// Wait for all submitted work to finish
    fn wait_idle(&self) -> BackendResult<()>;
}
