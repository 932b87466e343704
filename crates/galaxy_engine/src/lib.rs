//! # Galaxy Engine
//!
//! Real-time gravitational N-body star simulation, run and drawn entirely in
//! Vulkan compute shaders.
//!
//! ## Pipeline
//!
//! - **Stars**: positions, tints and weights generated once and uploaded to
//!   device-local storage buffers, with two position generations for
//!   ping-ponging
//! - **Simulate**: all-pairs gravity, reading one generation and writing the other
//! - **Project**: world positions to screen coordinates through the camera
//! - **Rasterize**: one thread per pixel into an off-screen storage image
//! - **Present**: the image is copied into the swapchain and presented
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use galaxy_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GalaxyConfig::default().with_star_count(1024);
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let extent = galaxy_engine::ash::vk::Extent2D { width: config.window.width, height: config.window.height };
//!     let context = VulkanContext::new(&mut window, "galaxy", false, extent)?;
//!     let mut galaxy = Galaxy::new(&context, &config)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         galaxy.draw_frame(&context)?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod galaxy;
pub mod render;

pub use ash;
pub use galaxy::Galaxy;

/// Common imports for applications
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::{FenceTimeoutPolicy, GalaxyConfig},
        foundation::math::{Mat4, Point3, Vec3},
        galaxy::{Galaxy, StarData},
        render::{
            vulkan::{PresentStatus, VulkanContext, VulkanError, VulkanResult, Window, WindowError},
            Camera,
        },
    };
}
