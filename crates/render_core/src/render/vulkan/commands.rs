//! Command buffer management
//!
//! A resettable command pool for the per-frame buffers, plus one-shot
//! recording for blocking transfers.

use ash::{vk, Device};

use super::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Allocate a command buffer and begin one-time recording
    pub fn begin_single_time(&self) -> VulkanResult<SingleTimeCommands> {
        let command_buffer = self
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "command buffer allocation returned nothing".to_string(),
            })?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let begun = unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) };
        if let Err(err) = begun {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, &[command_buffer]);
            }
            return Err(VulkanError::Api(err));
        }

        Ok(SingleTimeCommands {
            device: self.device.clone(),
            pool: self.command_pool,
            command_buffer,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// One-shot command buffer; submitted and waited on by [`SingleTimeCommands::submit_and_wait`]
pub struct SingleTimeCommands {
    device: Device,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl SingleTimeCommands {
    /// The recording command buffer
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// End recording, submit to `queue` and block until the queue is idle
    pub fn submit_and_wait(self, queue: vk::Queue) -> VulkanResult<()> {
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
            self.device
                .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device
                .queue_wait_idle(queue)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for SingleTimeCommands {
    fn drop(&mut self) {
        unsafe {
            self.device
                .free_command_buffers(self.pool, &[self.command_buffer]);
        }
    }
}
