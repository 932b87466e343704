//! Application error type

use galaxy_engine::config::ConfigError;
use galaxy_engine::render::vulkan::{VulkanError, WindowError};
use thiserror::Error;

/// Anything that stops the application
#[derive(Error, Debug)]
pub enum GalaxyError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window or GLFW failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Vulkan failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

impl GalaxyError {
    /// Process exit status for this error
    ///
    /// Vulkan failures exit with the low byte of their result code (1 when
    /// that byte is zero); everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Vulkan(e) => e.exit_code(),
            Self::Config(_) | Self::Window(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_engine::ash::vk;

    #[test]
    fn test_config_errors_exit_with_one() {
        let err = GalaxyError::from(ConfigError::Invalid("bad".to_string()));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_vulkan_errors_exit_non_zero() {
        let err = GalaxyError::from(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(err.exit_code(), 252);
        assert!(err.to_string().starts_with("Vulkan error"));

        let surface_lost = GalaxyError::from(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR));
        assert_ne!(surface_lost.exit_code() & 0xFF, 0);

        let suboptimal = GalaxyError::from(VulkanError::Api(vk::Result::SUBOPTIMAL_KHR));
        assert_ne!(suboptimal.exit_code() & 0xFF, 0);

        let timeout = GalaxyError::from(VulkanError::Timeout { stage: "frame fence" });
        assert_eq!(timeout.exit_code(), 1);
    }
}
