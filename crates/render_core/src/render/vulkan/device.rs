//! Rendering device
//!
//! Owns every buffer and image the renderer creates,
//! the descriptor pool and layouts, the geometry and tone-map pipelines and
//! the per-frame begin/end protocol. Memory is managed through `vk-mem`.

use std::mem::size_of;
use std::ptr;
use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use super::context::{DeviceContext, VulkanError, VulkanInstance, VulkanResult, TEXTURE_FORMAT};
use super::descriptors::{self, DescriptorLayouts, DescriptorPool};
use super::frame::FrameCursor;
use super::render_pass::clear_values;
use super::shader::{GraphicsPipeline, PipelineDesc, ShaderModule};
use super::sync::{FrameSync, ImageBarrier};
use crate::config::ShaderConfig;
use crate::foundation::math::{Mat4, Vec3};
use crate::render::backend::{BackendResult, GraphicsDevice};
use crate::render::image::{Image, ImageFormat};
use crate::render::types::{
    DirectionalLightData, LightData, MeshPushConstants, UniformBufferObject, Vertex,
    FRAMES_IN_FLIGHT, MAX_LIGHT_COUNT,
};
use crate::render::RenderError;

/// Buffer and the allocation backing it
pub struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: u64,
}

impl GpuBuffer {
    /// Vulkan buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Image and the allocation backing it
pub struct GpuImage {
    image: vk::Image,
    allocation: vk_mem::Allocation,
}

impl GpuImage {
    /// Vulkan image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }
}

/// Sampled texture: image, default view and sampler
pub struct Texture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    mip_levels: u32,
}

impl Texture {
    /// View covering every mip level
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Linear repeat sampler
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

struct FrameSlot {
    sync: FrameSync,
    command_buffer: vk::CommandBuffer,
    uniform_buffer: GpuBuffer,
    uniform_mapped: *mut u8,
    uniform_set: vk::DescriptorSet,
}

fn device_local() -> vk_mem::AllocationCreateInfo {
    vk_mem::AllocationCreateInfo {
        usage: vk_mem::MemoryUsage::Auto,
        ..Default::default()
    }
}

fn host_visible() -> vk_mem::AllocationCreateInfo {
    vk_mem::AllocationCreateInfo {
        usage: vk_mem::MemoryUsage::Auto,
        flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
        required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ..Default::default()
    }
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Vulkan implementation of [`GraphicsDevice`]
///
/// Field order matters: RAII wrappers drop before the context that owns the
/// logical device, and the instance goes last.
pub struct RenderingDevice {
    frames: Vec<FrameSlot>,
    light_buffer: Option<GpuBuffer>,
    light_set: vk::DescriptorSet,
    input_attachment_set: vk::DescriptorSet,
    material_pipeline: GraphicsPipeline,
    tonemap_pipeline: GraphicsPipeline,
    descriptor_pool: DescriptorPool,
    layouts: DescriptorLayouts,
    cursor: FrameCursor,
    width: u32,
    height: u32,
    resized: bool,
    allocator: Arc<vk_mem::Allocator>,
    context: DeviceContext,
    _instance: VulkanInstance,
}

impl RenderingDevice {
    /// Bring up the device for `surface`, which must have been created from
    /// `instance`
    ///
    /// Failure here is fatal for the renderer.
    pub fn new(
        instance: VulkanInstance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        shaders: &ShaderConfig,
    ) -> BackendResult<Self> {
        let context = DeviceContext::initialize(&instance, surface, width, height)?;
        let device = context.device().clone();
        let allocator = Arc::clone(context.allocator());

        let layouts = DescriptorLayouts::new(&device)?;
        let descriptor_pool = DescriptorPool::new(device.clone())?;

        let material_vertex = ShaderModule::from_file(device.clone(), &shaders.material_vertex_path)?;
        let material_fragment = ShaderModule::from_file(device.clone(), &shaders.material_fragment_path)?;
        let tonemap_vertex = ShaderModule::from_file(device.clone(), &shaders.tonemap_vertex_path)?;
        let tonemap_fragment = ShaderModule::from_file(device.clone(), &shaders.tonemap_fragment_path)?;

        let material_sets = layouts.material_sets();
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: MeshPushConstants::SIZE,
        }];
        let vertex_bindings = [Vertex::binding_description()];
        let vertex_attributes = Vertex::attribute_descriptions();
        let material_pipeline = GraphicsPipeline::new(
            device.clone(),
            context.render_pass(),
            &PipelineDesc {
                vertex_shader: &material_vertex,
                fragment_shader: &material_fragment,
                set_layouts: &material_sets,
                push_constant_ranges: &push_constant_ranges,
                vertex_bindings: &vertex_bindings,
                vertex_attributes: &vertex_attributes,
                subpass: 0,
                depth_test: true,
            },
        )?;

        let tonemap_sets = [layouts.input_attachment.handle()];
        let tonemap_pipeline = GraphicsPipeline::new(
            device,
            context.render_pass(),
            &PipelineDesc {
                vertex_shader: &tonemap_vertex,
                fragment_shader: &tonemap_fragment,
                set_layouts: &tonemap_sets,
                push_constant_ranges: &[],
                vertex_bindings: &[],
                vertex_attributes: &[],
                subpass: 1,
                depth_test: false,
            },
        )?;

        let light_set = descriptor_pool.allocate_one(layouts.light.handle())?;
        let input_attachment_set = descriptor_pool.allocate_one(layouts.input_attachment.handle())?;

        let mut rendering_device = Self {
            frames: Vec::with_capacity(FRAMES_IN_FLIGHT),
            light_buffer: None,
            light_set,
            input_attachment_set,
            material_pipeline,
            tonemap_pipeline,
            descriptor_pool,
            layouts,
            cursor: FrameCursor::new(FRAMES_IN_FLIGHT),
            width,
            height,
            resized: false,
            allocator,
            context,
            _instance: instance,
        };

        rendering_device.create_frame_slots()?;
        rendering_device.create_light_buffer()?;
        rendering_device.bind_input_attachment()?;

        log::info!("Rendering device ready ({width}x{height}, {FRAMES_IN_FLIGHT} frames in flight)");
        Ok(rendering_device)
    }

    fn create_frame_slots(&mut self) -> VulkanResult<()> {
        let command_buffers = self
            .context
            .command_pool()
            .allocate_command_buffers(FRAMES_IN_FLIGHT as u32)?;
        let uniform_layouts = [self.layouts.uniform.handle(); FRAMES_IN_FLIGHT];
        let uniform_sets = self.descriptor_pool.allocate(&uniform_layouts)?;

        for (command_buffer, uniform_set) in command_buffers.into_iter().zip(uniform_sets) {
            let sync = FrameSync::new(self.context.device().clone())?;
            let mut uniform_buffer = self.allocate_buffer(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                size_of::<UniformBufferObject>() as u64,
                &host_visible(),
            )?;

            let uniform_mapped = match unsafe { self.allocator.map_memory(&mut uniform_buffer.allocation) } {
                Ok(mapped) => mapped,
                Err(err) => {
                    self.release_buffer(uniform_buffer);
                    return Err(VulkanError::Api(err));
                }
            };

            descriptors::write_buffer(
                self.context.device(),
                uniform_set,
                vk::DescriptorType::UNIFORM_BUFFER,
                uniform_buffer.buffer,
            );

            self.frames.push(FrameSlot {
                sync,
                command_buffer,
                uniform_buffer,
                uniform_mapped,
                uniform_set,
            });
        }
        Ok(())
    }

    fn create_light_buffer(&mut self) -> VulkanResult<()> {
        let light_buffer = self.allocate_buffer(
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            (MAX_LIGHT_COUNT * size_of::<LightData>()) as u64,
            &device_local(),
        )?;
        descriptors::write_buffer(
            self.context.device(),
            self.light_set,
            vk::DescriptorType::STORAGE_BUFFER,
            light_buffer.buffer,
        );
        self.light_buffer = Some(light_buffer);
        Ok(())
    }

    /// Point the tone-map set at the current HDR attachment
    fn bind_input_attachment(&self) -> VulkanResult<()> {
        descriptors::write_image(
            self.context.device(),
            self.input_attachment_set,
            vk::DescriptorType::INPUT_ATTACHMENT,
            self.context.hdr_view()?,
            vk::Sampler::null(),
        );
        Ok(())
    }

    /// Rebuild the swapchain at the last recorded window size
    ///
    /// Returns `false` while the window has no area; the pending resize is
    /// kept so the rebuild happens once it is restored.
    fn recreate_swapchain(&mut self) -> VulkanResult<bool> {
        if self.width == 0 || self.height == 0 {
            log::debug!("Skipping swapchain recreation while window is minimized");
            return Ok(false);
        }

        self.context.recreate_swapchain(self.width, self.height)?;
        self.bind_input_attachment()?;
        self.resized = false;

        log::info!("Swapchain recreated at {}x{}", self.width, self.height);
        Ok(true)
    }

    fn allocate_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        size: u64,
        allocation_info: &vk_mem::AllocationCreateInfo,
    ) -> VulkanResult<GpuBuffer> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot create a zero-sized buffer".to_string(),
            });
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_info, allocation_info) }
            .map_err(VulkanError::Api)?;

        Ok(GpuBuffer {
            buffer,
            allocation,
            size,
        })
    }

    fn release_buffer(&self, mut buffer: GpuBuffer) {
        unsafe {
            self.allocator
                .destroy_buffer(buffer.buffer, &mut buffer.allocation);
        }
    }

    /// Host-visible buffer holding a copy of `data`
    fn create_staging_buffer(&self, data: &[u8]) -> VulkanResult<GpuBuffer> {
        let mut staging = self.allocate_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            data.len() as u64,
            &host_visible(),
        )?;

        match unsafe { self.allocator.map_memory(&mut staging.allocation) } {
            Ok(mapped) => unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
                self.allocator.unmap_memory(&mut staging.allocation);
            },
            Err(err) => {
                self.release_buffer(staging);
                return Err(VulkanError::Api(err));
            }
        }

        Ok(staging)
    }

    /// Run `record` in a one-shot command buffer and block until the queue
    /// is idle
    fn submit_single_time(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer) -> VulkanResult<()>,
    ) -> VulkanResult<()> {
        let commands = self.context.command_pool().begin_single_time()?;
        record(self.context.device(), commands.handle())?;
        commands.submit_and_wait(self.context.queue())
    }

    /// Create a 2D optimal-tiling image
    pub fn image_create(
        &self,
        extent: vk::Extent2D,
        mip_levels: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> VulkanResult<GpuImage> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let (image, allocation) = unsafe { self.allocator.create_image(&image_info, &device_local()) }
            .map_err(VulkanError::Api)?;

        Ok(GpuImage { image, allocation })
    }

    /// Destroy an image and free its memory
    pub fn image_destroy(&self, mut image: GpuImage) {
        unsafe {
            self.allocator
                .destroy_image(image.image, &mut image.allocation);
        }
    }

    /// Color view covering `mip_levels` levels
    pub fn image_view_create(
        &self,
        image: &GpuImage,
        format: vk::Format,
        mip_levels: u32,
    ) -> VulkanResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(ImageBarrier::color_range(0, mip_levels));

        unsafe { self.context.device().create_image_view(&view_info, None) }.map_err(VulkanError::Api)
    }

    /// Destroy an image view
    pub fn image_view_destroy(&self, view: vk::ImageView) {
        unsafe { self.context.device().destroy_image_view(view, None) };
    }

    /// Linear repeat sampler with maximum anisotropy reaching down `mip_levels`
    pub fn sampler_create(&self, mip_levels: u32) -> VulkanResult<vk::Sampler> {
        let max_anisotropy = self
            .context
            .physical_device()
            .properties
            .limits
            .max_sampler_anisotropy;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(mip_levels as f32)
            .mip_lod_bias(0.0);

        unsafe { self.context.device().create_sampler(&sampler_info, None) }.map_err(VulkanError::Api)
    }

    /// Destroy a sampler
    pub fn sampler_destroy(&self, sampler: vk::Sampler) {
        unsafe { self.context.device().destroy_sampler(sampler, None) };
    }

    /// Record the blit chain that fills levels `1..mip_levels` from level 0
    ///
    /// Expects every level in TRANSFER_DST; leaves every level in
    /// SHADER_READ_ONLY.
    #[allow(clippy::cast_possible_wrap)]
    fn record_mip_chain(
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> VulkanResult<()> {
        let mut mip_width = width as i32;
        let mut mip_height = height as i32;

        for level in 1..mip_levels {
            let source = ImageBarrier::color_range(level - 1, 1);
            ImageBarrier::transition(
                device,
                command_buffer,
                image,
                source,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )?;

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);
            let blit = vk::ImageBlit {
                src_subresource: color_layers(level - 1),
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: mip_width,
                        y: mip_height,
                        z: 1,
                    },
                ],
                dst_subresource: color_layers(level),
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ],
            };

            unsafe {
                device.cmd_blit_image(
                    command_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }

            ImageBarrier::transition(
                device,
                command_buffer,
                image,
                source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;

            mip_width = next_width;
            mip_height = next_height;
        }

        ImageBarrier::transition(
            device,
            command_buffer,
            image,
            ImageBarrier::color_range(mip_levels - 1, 1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    }

    fn upload_texture(&self, image: &GpuImage, source: &Image, mip_levels: u32) -> VulkanResult<()> {
        let staging = self.create_staging_buffer(source.data())?;
        let (width, height) = (source.width(), source.height());

        let uploaded = self.submit_single_time(|device, command_buffer| {
            ImageBarrier::transition(
                device,
                command_buffer,
                image.image,
                ImageBarrier::color_range(0, mip_levels),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(color_layers(0))
                .image_offset(vk::Offset3D::default())
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                })
                .build();

            unsafe {
                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            Self::record_mip_chain(device, command_buffer, image.image, width, height, mip_levels)
        });

        self.release_buffer(staging);
        uploaded
    }

    fn acquire_image(&mut self, semaphore: vk::Semaphore) -> BackendResult<u32> {
        loop {
            let swapchain = self.context.swapchain()?.handle();
            let acquired = unsafe {
                self.context.swapchain_loader().acquire_next_image(
                    swapchain,
                    u64::MAX,
                    semaphore,
                    vk::Fence::null(),
                )
            };

            match acquired {
                Ok((image_index, _suboptimal)) => return Ok(image_index),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    if !self.recreate_swapchain()? {
                        return Err(RenderError::RenderingFailed(
                            "swapchain out of date while the window has no area".to_string(),
                        ));
                    }
                }
                Err(err) => return Err(VulkanError::Api(err).into()),
            }
        }
    }

    fn record_frame_start(&self, command_buffer: vk::CommandBuffer, image_index: u32, frame: &FrameSlot) -> VulkanResult<()> {
        let device = self.context.device();
        let extent = self.context.extent()?;
        let framebuffer = self.context.framebuffer(image_index)?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }.map_err(VulkanError::Api)?;

        let clear_values = clear_values();
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.context.render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };

        unsafe {
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.material_pipeline.handle(),
            );
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.material_pipeline.layout(),
                0,
                &[frame.uniform_set, self.light_set],
                &[],
            );
        }
        Ok(())
    }

    fn record_tonemap(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let device = self.context.device();
        unsafe {
            device.cmd_next_subpass(command_buffer, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.tonemap_pipeline.handle(),
            );
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.tonemap_pipeline.layout(),
                0,
                &[self.input_attachment_set],
                &[],
            );
            device.cmd_draw(command_buffer, 3, 1, 0, 0);
            device.cmd_end_render_pass(command_buffer);
            device.end_command_buffer(command_buffer).map_err(VulkanError::Api)
        }
    }

    fn submit_frame(&self, slot: usize, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let sync = &self.frames[slot].sync;
        let wait_semaphores = [sync.image_available.handle()];
        let signal_semaphores = [sync.render_finished.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        // Unsignaled only for as long as the submission that signals it is pending
        sync.in_flight.reset()?;
        unsafe {
            self.context
                .device()
                .queue_submit(self.context.queue(), &[submit_info], sync.in_flight.handle())
        }
        .map_err(VulkanError::Api)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> BackendResult<()> {
        let wait_semaphores = [self.frames[slot].sync.render_finished.handle()];
        let swapchains = [self.context.swapchain()?.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe {
            self.context
                .swapchain_loader()
                .queue_present(self.context.queue(), &present_info)
        };

        let stale = match presented {
            Ok(suboptimal) => suboptimal || self.resized,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(err) => return Err(VulkanError::Api(err).into()),
        };
        if stale {
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    /// Give up on the frame being recorded
    ///
    /// An empty submission waits on the acquire semaphore and signals the
    /// slot's fence, so the next wait on this slot returns.
    fn abandon_frame(&mut self, command_buffer: vk::CommandBuffer) {
        let slot = self.cursor.current();
        let Some(image_index) = self.cursor.abandon() else {
            return;
        };
        log::warn!("Abandoning frame slot {slot} with swapchain image {image_index}");

        let device = self.context.device();
        let sync = &self.frames[slot].sync;
        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();

        let released = unsafe { device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }
            .map_err(VulkanError::Api)
            .and_then(|()| sync.in_flight.reset())
            .and_then(|()| {
                unsafe { device.queue_submit(self.context.queue(), &[submit_info], sync.in_flight.handle()) }
                    .map_err(VulkanError::Api)
            });
        if let Err(err) = released {
            log::error!("Failed to release frame slot {slot}: {err}");
        }
    }
}

impl GraphicsDevice for RenderingDevice {
    type Buffer = GpuBuffer;
    type Texture = Texture;
    type MaterialSet = vk::DescriptorSet;
    type CommandBuffer = vk::CommandBuffer;

    fn buffer_create(&mut self, usage: vk::BufferUsageFlags, size: u64) -> BackendResult<GpuBuffer> {
        let buffer = self.allocate_buffer(usage | vk::BufferUsageFlags::TRANSFER_DST, size, &device_local())?;
        log::debug!("Created buffer {:?} ({size} bytes, {usage:?})", buffer.buffer);
        Ok(buffer)
    }

    fn buffer_send(&mut self, buffer: &GpuBuffer, data: &[u8]) -> BackendResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() as u64 > buffer.size {
            return Err(RenderError::InvalidOperation(format!(
                "{} bytes do not fit in a {} byte buffer",
                data.len(),
                buffer.size
            )));
        }

        let staging = self.create_staging_buffer(data)?;
        let size = data.len() as u64;
        let copied = self.submit_single_time(|device, command_buffer| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { device.cmd_copy_buffer(command_buffer, staging.buffer, buffer.buffer, &[region]) };
            Ok(())
        });
        self.release_buffer(staging);
        copied?;

        log::trace!("Sent {size} bytes to buffer {:?}", buffer.buffer);
        Ok(())
    }

    fn buffer_destroy(&mut self, buffer: GpuBuffer) {
        log::debug!("Destroying buffer {:?}", buffer.buffer);
        self.release_buffer(buffer);
    }

    fn texture_create(&mut self, source: &Image) -> BackendResult<Texture> {
        if source.format() != ImageFormat::Rgba8 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "textures must be RGBA8, got {:?}",
                source.format()
            )));
        }

        let mip_levels = source.mip_levels();
        let extent = vk::Extent2D {
            width: source.width(),
            height: source.height(),
        };
        let image = self.image_create(
            extent,
            mip_levels,
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        )?;

        if let Err(err) = self.upload_texture(&image, source, mip_levels) {
            self.image_destroy(image);
            return Err(err.into());
        }

        let view = match self.image_view_create(&image, TEXTURE_FORMAT, mip_levels) {
            Ok(view) => view,
            Err(err) => {
                self.image_destroy(image);
                return Err(err.into());
            }
        };

        let sampler = match self.sampler_create(mip_levels) {
            Ok(sampler) => sampler,
            Err(err) => {
                self.image_view_destroy(view);
                self.image_destroy(image);
                return Err(err.into());
            }
        };

        log::debug!(
            "Created texture {:?} ({}x{}, {mip_levels} mips)",
            image.image,
            extent.width,
            extent.height
        );
        Ok(Texture {
            image,
            view,
            sampler,
            mip_levels,
        })
    }

    fn texture_destroy(&mut self, texture: Texture) {
        log::debug!("Destroying texture {:?}", texture.image.image);
        self.sampler_destroy(texture.sampler);
        self.image_view_destroy(texture.view);
        self.image_destroy(texture.image);
    }

    fn material_set_create(&mut self, texture: &Texture) -> BackendResult<vk::DescriptorSet> {
        let set = self
            .descriptor_pool
            .allocate_one(self.layouts.texture.handle())?;
        descriptors::write_image(
            self.context.device(),
            set,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            texture.view,
            texture.sampler,
        );
        Ok(set)
    }

    fn material_set_free(&mut self, set: vk::DescriptorSet) {
        if let Err(err) = self.descriptor_pool.free(set) {
            log::error!("Failed to free material descriptor set: {err}");
        }
    }

    fn update_uniform_buffer(
        &mut self,
        projection: &Mat4,
        view: &Mat4,
        view_position: &Vec3,
        light_count: u32,
        directional: DirectionalLightData,
    ) -> BackendResult<()> {
        let frame = &self.frames[self.cursor.current()];
        // Outside of a frame the slot may still be read by the GPU
        if !self.cursor.is_recording() {
            frame.sync.in_flight.wait(u64::MAX)?;
        }

        let uniforms = UniformBufferObject::new(projection, view, view_position, light_count, directional);
        let bytes = bytemuck::bytes_of(&uniforms);
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), frame.uniform_mapped, bytes.len());
        }
        Ok(())
    }

    fn update_light_buffer(&mut self, lights: &[LightData]) -> BackendResult<()> {
        let lights = if lights.len() > MAX_LIGHT_COUNT {
            log::warn!("Uploading {MAX_LIGHT_COUNT} of {} point lights", lights.len());
            &lights[..MAX_LIGHT_COUNT]
        } else {
            lights
        };

        let light_buffer = self.light_buffer.take().ok_or_else(|| {
            RenderError::InvalidOperation("light buffer is not available".to_string())
        })?;
        let sent = self.buffer_send(&light_buffer, bytemuck::cast_slice(lights));
        self.light_buffer = Some(light_buffer);
        sent
    }

    fn draw_begin(&mut self) -> BackendResult<vk::CommandBuffer> {
        if self.cursor.is_recording() {
            return Err(RenderError::InvalidOperation(
                "draw_begin called twice without draw_end".to_string(),
            ));
        }

        let slot = self.cursor.current();
        let (image_available, command_buffer) = {
            let frame = &self.frames[slot];
            frame.sync.in_flight.wait(u64::MAX)?;
            (frame.sync.image_available.handle(), frame.command_buffer)
        };

        let image_index = self.acquire_image(image_available)?;
        self.cursor.begin(image_index)?;

        log::trace!("Frame slot {slot} recording into image {image_index}");
        if let Err(err) = self.record_frame_start(command_buffer, image_index, &self.frames[slot]) {
            self.abandon_frame(command_buffer);
            return Err(err.into());
        }
        Ok(command_buffer)
    }

    fn push_constants(&mut self, command_buffer: vk::CommandBuffer, constants: &MeshPushConstants) {
        unsafe {
            self.context.device().cmd_push_constants(
                command_buffer,
                self.material_pipeline.layout(),
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(constants),
            );
        }
    }

    fn draw_primitive(
        &mut self,
        command_buffer: vk::CommandBuffer,
        material: vk::DescriptorSet,
        vertex_buffer: &GpuBuffer,
        index_buffer: &GpuBuffer,
        index_count: u32,
    ) {
        let device = self.context.device();
        unsafe {
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.material_pipeline.layout(),
                2,
                &[material],
                &[],
            );
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(command_buffer, index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0);
        }
    }

    fn draw_end(&mut self, command_buffer: vk::CommandBuffer) -> BackendResult<()> {
        let image_index = match self.cursor.require_acquired() {
            Ok(image_index) => image_index,
            Err(err) => {
                log::error!("{err}");
                return Err(RenderError::InvalidOperation(err.to_string()));
            }
        };

        let slot = self.cursor.current();
        let submitted = self
            .record_tonemap(command_buffer)
            .and_then(|()| self.submit_frame(slot, command_buffer));
        if let Err(err) = submitted {
            self.abandon_frame(command_buffer);
            return Err(err.into());
        }

        self.cursor.finish();
        self.present(slot, image_index)
    }

    fn window_resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            log::debug!("Window resized to {width}x{height}");
            self.width = width;
            self.height = height;
            self.resized = true;
        }
    }

    fn wait_idle(&self) -> BackendResult<()> {
        unsafe { self.context.device().device_wait_idle() }.map_err(VulkanError::Api)?;
        Ok(())
    }
}

impl Drop for RenderingDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.device().device_wait_idle();
        }

        for mut frame in std::mem::take(&mut self.frames) {
            unsafe {
                self.allocator
                    .unmap_memory(&mut frame.uniform_buffer.allocation);
            }
            self.release_buffer(frame.uniform_buffer);
        }
        if let Some(light_buffer) = self.light_buffer.take() {
            self.release_buffer(light_buffer);
        }
        log::debug!("Rendering device destroyed");
    }
}
