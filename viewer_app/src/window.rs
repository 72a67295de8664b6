//! GLFW window that owns the presentation surface's lifetime

use ash::vk;
use glfw::{Glfw, GlfwReceiver, PWindow, WindowEvent};
use thiserror::Error;

/// Window errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not start
    #[error("GLFW initialization failed: {0}")]
    InitializationFailed(String),

    /// Window creation failed
    #[error("Window creation failed")]
    CreationFailed,

    /// Vulkan is not usable through GLFW on this system
    #[error("Vulkan unavailable: {0}")]
    VulkanUnavailable(String),

    /// Surface creation returned an error code
    #[error("Surface creation failed: {0:?}")]
    SurfaceCreationFailed(vk::Result),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Resizable window without a client API, polled for key, close and resize events
pub struct Window {
    glfw: Glfw,
    window: PWindow,
    events: GlfwReceiver<(f64, WindowEvent)>,
}

impl Window {
    /// Open a window of the given size
    pub fn new(width: u32, height: u32, title: &str) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|e| WindowError::InitializationFailed(format!("{e:?}")))?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::VulkanUnavailable("no Vulkan loader found".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request the window to close
    pub fn set_should_close(&mut self, value: bool) {
        self.window.set_should_close(value);
    }

    /// Pump the platform event queue
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Block until at least one event arrives
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Drain events received since the last poll
    pub fn flush_events(&self) -> Vec<WindowEvent> {
        glfw::flush_messages(&self.events).map(|(_, event)| event).collect()
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (u32::try_from(width).unwrap_or(0), u32::try_from(height).unwrap_or(0))
    }

    /// Seconds since GLFW started
    pub fn time(&self) -> f64 {
        self.glfw.get_time()
    }

    /// Instance extensions GLFW needs to present to this window
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::VulkanUnavailable("no surface extensions reported".to_string()))
    }

    /// Create a presentation surface on `instance`
    pub fn create_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreationFailed(result))
        }
    }
}
