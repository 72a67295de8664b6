//! # Render Core
//!
//! Resource and frame orchestration for a Vulkan forward renderer.
//!
//! ## Features
//!
//! - **Handle-based API**: meshes, instances, lights, textures and materials
//!   are addressed through generation-checked handles
//! - **Two-subpass frame**: opaque geometry into an HDR target, then a
//!   full-screen tone-map pass into the swapchain
//! - **Two frames in flight** with swapchain recovery on resize
//! - **Scene loading** from decoded scene data
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn run(instance: VulkanInstance, surface: ash::vk::SurfaceKHR) -> Result<(), RenderError> {
//!     let config = RendererConfig::new("viewer");
//!     let device = RenderingDevice::new(instance, surface, 1280, 720, &config.shaders)?;
//!
//!     let mut server = RenderingServer::new(device);
//!     server.window_init(1280, 720)?;
//!
//!     let light = server.point_light_create();
//!     server.point_light_set_position(light, Vec3::new(0.0, 3.0, 2.0));
//!
//!     server.draw()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, RendererConfig, ShaderConfig},
        foundation::{
            collections::{
                DirectionalLightId, MaterialId, MeshId, MeshInstanceId, PointLightId, RawHandle, TextureId,
            },
            math::{Mat4, Mat4Ext, Vec3},
        },
        render::{
            vulkan::{RenderingDevice, VulkanInstance},
            Camera, GraphicsDevice, Image, ImageFormat, LightData, RenderError, RenderResult,
            RenderingServer, Vertex,
        },
        scene::{
            Scene, SceneData, SceneError, SceneLight, SceneLightKind, SceneMaterial, SceneMesh,
            SceneMeshInstance, ScenePrimitive,
        },
    };
}
