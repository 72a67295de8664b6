//! Viewer application
//!
//! Opens a window, brings up the rendering server and draws a small lit scene
//! of textured cubes until the window is closed. Window resizes are forwarded
//! to the server. The first argument, when given, is a TOML or RON renderer
//! configuration file.

mod demo;
mod window;

use glfw::{Action, Key, WindowEvent};
use render_core::foundation::logging;
use render_core::prelude::*;

use window::{Window, WindowError};

const INITIAL_WIDTH: u32 = 1280;
const INITIAL_HEIGHT: u32 = 720;
const SPIN_SPEED: f32 = 0.6;

/// Fatal application errors
#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

fn load_config() -> Result<RendererConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => RendererConfig::load_from_file(&path),
        None => Ok(RendererConfig::new("Render Core Viewer")),
    }
}

fn run(config: &RendererConfig) -> Result<(), AppError> {
    config.validate()?;

    let mut window = Window::new(INITIAL_WIDTH, INITIAL_HEIGHT, &config.application_name)?;
    let extensions = window.required_instance_extensions()?;
    let instance = VulkanInstance::new(&config.application_name, &extensions, config.validation_enabled())
        .map_err(RenderError::from)?;
    let surface = window.create_surface(instance.handle())?;

    let (width, height) = window.framebuffer_size();
    let device = RenderingDevice::new(instance, surface, width, height, &config.shaders)?;
    let mut server = RenderingServer::new(device);
    server.window_init(width, height)?;

    let mut scene = Scene::load(&mut server, &demo::scene_data()?)?;
    log::info!("Loaded demo scene with {} mesh instance(s)", scene.mesh_instances().len());

    server.camera_set_transform(demo::camera_transform());
    let spinning = scene.mesh_instances().first().copied();
    let start = window.time();

    while !window.should_close() {
        window.poll_events();
        for event in window.flush_events() {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) | WindowEvent::Close => {
                    window.set_should_close(true);
                }
                WindowEvent::FramebufferSize(w, h) => {
                    let (w, h) = (u32::try_from(w).unwrap_or(0), u32::try_from(h).unwrap_or(0));
                    log::debug!("Framebuffer resized to {w}x{h}");
                    server.window_resized(w, h);
                }
                _ => {}
            }
        }

        let (w, h) = window.framebuffer_size();
        if w == 0 || h == 0 {
            // Minimized; nothing to present until the window comes back
            window.wait_events();
            continue;
        }

        if let Some(instance) = spinning {
            #[allow(clippy::cast_possible_truncation)]
            let elapsed = (window.time() - start) as f32;
            server.mesh_instance_set_transform(instance, demo::spin_transform(elapsed * SPIN_SPEED));
        }

        if let Err(e) = server.draw() {
            log::error!("Frame failed: {e}");
        }
    }

    scene.clear(&mut server);
    drop(server);
    Ok(())
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init_with_level(&config.log_level);

    log::info!("Starting {}", config.application_name);
    if let Err(e) = run(&config) {
        log::error!("Viewer failed: {e}");
        std::process::exit(1);
    }
    log::info!("Viewer exited cleanly");
}
