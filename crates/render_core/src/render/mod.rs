//! Rendering: handle-based server, device abstraction and Vulkan backend

pub mod backend;
pub mod camera;
pub mod image;
pub mod server;
pub mod types;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod recording;

use thiserror::Error;

pub use backend::{BackendResult, GraphicsDevice};
pub use camera::Camera;
pub use image::{Image, ImageFormat};
pub use server::RenderingServer;
pub use types::{
    DirectionalLightData, LightData, MeshPushConstants, UniformBufferObject, Vertex,
    FRAMES_IN_FLIGHT, MAX_LIGHT_COUNT,
};
pub use vulkan::{RenderingDevice, VulkanError};

/// High-level rendering error types
#[derive(Error, Debug)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A rendering operation failed during execution
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Resource creation or management failed
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// An operation was called out of order
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    BackendError(#[from] VulkanError),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
