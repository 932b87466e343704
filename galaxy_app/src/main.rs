//! Galaxy demo application
//!
//! Opens a window and runs the star simulation until the window is closed
//! or Escape is pressed.
//!
//! Usage: `galaxy [config.toml|config.ron]` (defaults to `galaxy.toml`; built-in
//! defaults are used when the file does not exist).

mod error;

use std::path::PathBuf;

use galaxy_engine::ash::vk;
use galaxy_engine::foundation::logging;
use galaxy_engine::prelude::*;

use crate::error::GalaxyError;

const DEFAULT_CONFIG_PATH: &str = "galaxy.toml";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

fn load_config() -> Result<GalaxyConfig, GalaxyError> {
    let config = GalaxyConfig::load_or_default(config_path())?;
    config.validate()?;
    Ok(config)
}

fn run(config: &GalaxyConfig) -> Result<(), GalaxyError> {
    log::info!(
        "Starting galaxy: {} stars at {}x{}",
        config.simulation.star_count,
        config.window.width,
        config.window.height
    );

    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let extent = vk::Extent2D {
        width: config.window.width,
        height: config.window.height,
    };
    let context = VulkanContext::new(&mut window, &config.window.title, config.logging.validation_layers, extent)?;
    let mut galaxy = Galaxy::new(&context, config)?;

    while !window.should_close() {
        window.poll_events();
        galaxy.draw_frame(&context)?;
    }

    log::info!("Window closed after {} frames", galaxy.frame_count());
    Ok(())
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init();
            log::error!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    // Validated above, so the level parses
    logging::init_with_level(config.logging.level_filter().unwrap_or(log::LevelFilter::Info));
    log::debug!("Config path: {}", config_path().display());

    if let Err(e) = run(&config) {
        log::error!("{}", e);
        if let GalaxyError::Vulkan(vulkan) = &e {
            if let Some(raw) = vulkan.raw_result() {
                log::error!("VkResult {} (exit status {})", raw, e.exit_code());
            }
        }
        std::process::exit(e.exit_code());
    }
}
