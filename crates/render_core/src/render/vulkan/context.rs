//! Vulkan context management
//!
//! Instance creation, physical device selection, the logical device with its
//! single graphics+present queue, and [`DeviceContext`], which owns everything
//! tied to the surface: swapchain, offscreen attachments, render pass and
//! framebuffers.

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::ffi::{CStr, CString};
use std::sync::Arc;
use thiserror::Error;

use super::commands::CommandPool;
use super::framebuffer::{Attachment, Framebuffer};
use super::render_pass::{RenderPass, DEPTH_FORMAT, HDR_FORMAT};
use super::swapchain::Swapchain;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The device cannot perform an operation on a format
    #[error("Format {format:?} does not support {feature}")]
    UnsupportedFormat {
        /// Format that was queried
        format: vk::Format,
        /// Missing capability
        feature: &'static str,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Format every texture is uploaded in
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    pub debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance enabling `required_extensions` (as reported by the
    /// windowing layer) and, when requested and available, validation
    pub fn new(app_name: &str, required_extensions: &[String], enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name_cstr = to_cstring(app_name)?;
        let engine_name_cstr = to_cstring("render_core")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| to_cstring(ext))
            .collect::<VulkanResult<Vec<_>>>()?;

        #[allow(unused_mut)]
        let mut extensions: Vec<*const std::ffi::c_char> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let validation_layer = c"VK_LAYER_KHRONOS_validation";
        let use_validation = enable_validation && layer_available(&entry, validation_layer);
        if enable_validation && !use_validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        #[cfg(debug_assertions)]
        if use_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names: Vec<*const std::ffi::c_char> = if use_validation {
            vec![validation_layer.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        #[cfg(debug_assertions)]
        let debug_utils = if use_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        log::info!("Created Vulkan instance (validation: {use_validation})");

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
        })
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Raw instance handle, for surface creation by the windowing layer
    pub fn handle(&self) -> vk::Instance {
        self.instance.handle()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value)
        .map_err(|_| VulkanError::InitializationFailed(format!("Interior NUL in {value:?}")))
}

fn layer_available(entry: &Entry, layer: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) } == layer)
        })
        .unwrap_or(false)
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Index of the queue family used for graphics, transfer and presentation
    pub queue_family: u32,
}

/// First queue family that supports graphics and can present to the surface
pub fn find_queue_family(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .map(|(index, family)| (index as u32, family))
        .find(|(index, family)| {
            family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && supports_present(*index)
        })
        .map(|(index, _)| index)
}

/// Whether `name` is among the extensions a device reports
pub fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available.iter().any(|extension| {
        let extension_name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
        extension_name == name
    })
}

/// Whether a texture format can be mipmapped with linear-filtered blits
pub fn supports_mipmap_blits(properties: vk::FormatProperties) -> bool {
    properties.optimal_tiling_features.contains(
        vk::FormatFeatureFlags::BLIT_SRC
            | vk::FormatFeatureFlags::BLIT_DST
            | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
    )
}

impl PhysicalDeviceInfo {
    /// Select a device that can render to and present on `surface`
    ///
    /// Discrete GPUs are preferred when several qualify.
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        let mut candidates: Vec<Self> = Vec::new();
        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => candidates.push(info),
                Err(reason) => log::debug!("Skipping GPU: {reason}"),
            }
        }

        let chosen = candidates
            .into_iter()
            .max_by_key(|info| info.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
            .ok_or_else(|| VulkanError::InitializationFailed("No suitable GPU found".to_string()))?;

        log::info!("Selected GPU: {}", unsafe {
            CStr::from_ptr(chosen.properties.device_name.as_ptr()).to_string_lossy()
        });
        Ok(chosen)
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let queue_family = find_queue_family(&queue_families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            VulkanError::InitializationFailed(
                "No queue family supports both graphics and presentation".to_string(),
            )
        })?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        if !has_extension(&extensions, SwapchainLoader::name()) {
            return Err(VulkanError::InitializationFailed(
                "VK_KHR_swapchain not supported".to_string(),
            ));
        }

        if features.sampler_anisotropy == vk::FALSE {
            return Err(VulkanError::InitializationFailed(
                "Sampler anisotropy not supported".to_string(),
            ));
        }

        let format_properties =
            unsafe { instance.get_physical_device_format_properties(device, TEXTURE_FORMAT) };
        if !supports_mipmap_blits(format_properties) {
            return Err(VulkanError::UnsupportedFormat {
                format: TEXTURE_FORMAT,
                feature: "linear-filtered blits",
            });
        }

        Ok(Self {
            device,
            properties,
            queue_family,
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Queue used for graphics, transfers and presentation
    pub queue: vk::Queue,
    /// Index of the queue's family
    pub queue_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with one queue
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device_info.queue_family)
            .queue_priorities(&priorities)
            .build()];

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical_device_info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let queue = unsafe { device.get_device_queue(physical_device_info.queue_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            queue,
            queue_family: physical_device_info.queue_family,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Everything whose size follows the swapchain
struct SwapchainTargets {
    framebuffers: Vec<Framebuffer>,
    hdr: Attachment,
    // Only referenced through the framebuffers
    _depth: Attachment,
    swapchain: Swapchain,
}

/// Surface-bound device state: swapchain, attachments, render pass and
/// framebuffers, plus the command pool and memory allocator for the device
pub struct DeviceContext {
    targets: Option<SwapchainTargets>,
    render_pass: RenderPass,
    command_pool: CommandPool,
    // Outlives every allocation and goes before the logical device
    allocator: Arc<vk_mem::Allocator>,
    /// Surface extension loader
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    physical_device: PhysicalDeviceInfo,
    device: LogicalDevice,
}

impl DeviceContext {
    /// Select a device for `surface` and build the swapchain and render targets
    ///
    /// Takes ownership of `surface`; it is destroyed with the context.
    pub fn initialize(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> VulkanResult<Self> {
        let surface_loader = Surface::new(&instance.entry, &instance.instance);

        let selected = PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader)
            .and_then(|physical| {
                LogicalDevice::new(&instance.instance, &physical).map(|device| (physical, device))
            });
        let (physical_device, device) = match selected {
            Ok(selected) => selected,
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(err);
            }
        };

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance.instance,
            &device.device,
            physical_device.device,
        ));
        let allocator = match allocator {
            Ok(allocator) => Arc::new(allocator),
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(VulkanError::Api(err));
            }
        };

        let raw_device = device.device.clone();
        let command_pool = CommandPool::new(raw_device.clone(), device.queue_family)?;

        let swapchain = Swapchain::new(
            raw_device.clone(),
            device.swapchain_loader.clone(),
            surface,
            &surface_loader,
            &physical_device,
            vk::Extent2D { width, height },
            vk::SwapchainKHR::null(),
        )?;
        let render_pass = RenderPass::new_tonemapped(raw_device, swapchain.format().format)?;

        let mut context = Self {
            targets: None,
            render_pass,
            command_pool,
            allocator,
            surface_loader,
            surface,
            physical_device,
            device,
        };
        context.targets = Some(context.build_targets(swapchain)?);
        Ok(context)
    }

    fn build_targets(&self, swapchain: Swapchain) -> VulkanResult<SwapchainTargets> {
        let extent = swapchain.extent();
        let device = self.device.device.clone();

        let hdr = Attachment::new(
            device.clone(),
            Arc::clone(&self.allocator),
            extent,
            HDR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::INPUT_ATTACHMENT
                | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = Attachment::new(
            device.clone(),
            Arc::clone(&self.allocator),
            extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    device.clone(),
                    self.render_pass.handle(),
                    &[view, hdr.image_view(), depth.image_view()],
                    extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        Ok(SwapchainTargets {
            framebuffers,
            hdr,
            _depth: depth,
            swapchain,
        })
    }

    /// Rebuild swapchain, attachments and framebuffers at a new size
    ///
    /// The render pass is kept. Callers must re-point descriptors at the new
    /// HDR attachment view afterwards.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        unsafe {
            self.device
                .device
                .device_wait_idle()
                .map_err(VulkanError::Api)?;
        }

        let old = self.targets.take();
        let old_handle = old
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |targets| targets.swapchain.handle());

        let swapchain = Swapchain::new(
            self.device.device.clone(),
            self.device.swapchain_loader.clone(),
            self.surface,
            &self.surface_loader,
            &self.physical_device,
            vk::Extent2D { width, height },
            old_handle,
        )?;
        drop(old);

        self.targets = Some(self.build_targets(swapchain)?);
        Ok(())
    }

    fn targets(&self) -> VulkanResult<&SwapchainTargets> {
        self.targets.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "swapchain is not available".to_string(),
        })
    }

    /// Current swapchain
    pub fn swapchain(&self) -> VulkanResult<&Swapchain> {
        Ok(&self.targets()?.swapchain)
    }

    /// Framebuffer for a swapchain image index
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.targets()?
            .framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no framebuffer for swapchain image {image_index}"),
            })
    }

    /// View of the HDR color attachment read by the tone-map subpass
    pub fn hdr_view(&self) -> VulkanResult<vk::ImageView> {
        Ok(self.targets()?.hdr.image_view())
    }

    /// Current swapchain extent
    pub fn extent(&self) -> VulkanResult<vk::Extent2D> {
        Ok(self.targets()?.swapchain.extent())
    }

    /// Render pass handle
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Memory allocator shared by every buffer and image on this device
    pub fn allocator(&self) -> &Arc<vk_mem::Allocator> {
        &self.allocator
    }

    /// Command pool for the graphics queue
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Graphics + present queue
    pub fn queue(&self) -> vk::Queue {
        self.device.queue
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
        }
        // Swapchain must go before its surface
        self.targets = None;
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_family_needs_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];

        assert_eq!(find_queue_family(&families, |_| true), Some(1));
        assert_eq!(find_queue_family(&families, |i| i == 2), Some(2));
        assert_eq!(find_queue_family(&families, |i| i == 0), None);
    }

    #[test]
    fn test_mipmap_blit_support_requires_linear_filter() {
        let blit_only = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST,
            ..Default::default()
        };
        assert!(!supports_mipmap_blits(blit_only));

        let full = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
            ..Default::default()
        };
        assert!(supports_mipmap_blits(full));
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut properties = vk::ExtensionProperties::default();
        for (dst, &src) in properties.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as std::ffi::c_char;
        }
        properties
    }

    #[test]
    fn test_swapchain_extension_is_found_by_name() {
        let surface_only = [extension(Surface::name())];
        assert!(!has_extension(&surface_only, SwapchainLoader::name()));

        let both = [extension(Surface::name()), extension(SwapchainLoader::name())];
        assert!(has_extension(&both, SwapchainLoader::name()));
        assert!(!has_extension(&[], SwapchainLoader::name()));
    }
}
