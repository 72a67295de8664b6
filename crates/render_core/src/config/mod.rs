//! Configuration system
//!
//! Renderer settings are plain serde structs that load from and save to TOML
//! or RON, chosen by file extension.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const SHADER_DIRS: [&str; 5] = [
    "target/shaders/",
    "shaders/",
    "resources/shaders/",
    "../target/shaders/",
    "./",
];

fn resolve_shader(file_name: &str) -> String {
    SHADER_DIRS
        .iter()
        .map(|dir| format!("{dir}{file_name}"))
        .find(|candidate| Path::new(candidate).exists())
        .unwrap_or_else(|| format!("target/shaders/{file_name}"))
}

/// Locations of the precompiled SPIR-V blobs for the two fixed pipelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Geometry pass vertex shader
    pub material_vertex_path: String,
    /// Geometry pass fragment shader
    pub material_fragment_path: String,
    /// Full-screen tone-map vertex shader
    pub tonemap_vertex_path: String,
    /// Tone-map fragment shader reading the HDR input attachment
    pub tonemap_fragment_path: String,
}

impl ShaderConfig {
    /// Resolve the default shader file names against the usual output
    /// directories, so the binary works from the workspace root or a crate dir
    pub fn with_path_resolution() -> Self {
        Self {
            material_vertex_path: resolve_shader("material.vert.spv"),
            material_fragment_path: resolve_shader("material.frag.spv"),
            tonemap_vertex_path: resolve_shader("tonemap.vert.spv"),
            tonemap_fragment_path: resolve_shader("tonemap.frag.spv"),
        }
    }

    /// Point every shader at `dir`, keeping the default file names
    pub fn in_directory(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let path = |name: &str| dir.join(name).to_string_lossy().into_owned();
        Self {
            material_vertex_path: path("material.vert.spv"),
            material_fragment_path: path("material.frag.spv"),
            tonemap_vertex_path: path("tonemap.vert.spv"),
            tonemap_fragment_path: path("tonemap.frag.spv"),
        }
    }

    fn paths(&self) -> [&str; 4] {
        [
            &self.material_vertex_path,
            &self.material_fragment_path,
            &self.tonemap_vertex_path,
            &self.tonemap_fragment_path,
        ]
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.paths().into_iter().find(|p| !Path::new(p).exists()) {
            Some(missing) => Err(ConfigError::Invalid(format!("Shader not found: {missing}"))),
            None => Ok(()),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution()
    }
}

/// Renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Shader configuration
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Effective validation setting
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }
        self.shaders.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Render Core Application".to_string(),
            enable_validation: None,
            log_level: "info".to_string(),
            shaders: ShaderConfig::default(),
        }
    }
}

impl Config for RendererConfig {}
